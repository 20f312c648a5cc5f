//! Ledger / state store (versioned KV with a deterministic state root).
//!
//! Design goals:
//! - `StateStore` is the narrow interface the staking layer consumes: keyed state
//!   get/set/remove and typed-token balance, transfer, mint and burn.
//! - `Ledger` keeps an immutable ordered snapshot; `begin()` hands out a
//!   copy-on-write `LedgerTx`; `commit()` installs it atomically.
//! - Dropping a `LedgerTx` discards every write, so a failed operation leaves
//!   the committed state untouched.
//! - Deterministic state root (blake3) over the sorted map.
//!
//! Deterministic ordering: std::collections::BTreeMap is an ordered map (sorted by key).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Result, StakingError};
use crate::types::{Address, Amount, Currency};

/// Opaque key/value types.
pub type Key = Vec<u8>;
pub type Value = Vec<u8>;

const STATE_PREFIX: u8 = b's';
const BALANCE_PREFIX: u8 = b'b';

/// Narrow state-store interface.
///
/// `balance` of an untouched account is zero. `transfer_asset`, `mint_asset`
/// and `burn_asset` are built on `set_balance`; implementors only need the
/// five required methods.
pub trait StateStore {
    fn get_state(&self, address: &Address) -> Option<Vec<u8>>;
    fn set_state(&mut self, address: Address, value: Vec<u8>);
    fn remove_state(&mut self, address: &Address);
    fn balance(&self, address: &Address, currency: &Currency) -> Amount;
    fn set_balance(&mut self, address: &Address, amount: Amount);

    fn transfer_asset(&mut self, from: &Address, to: &Address, amount: &Amount) -> Result<()> {
        if amount.is_zero() || from == to {
            return Ok(());
        }
        self.burn_asset(from, amount)?;
        self.mint_asset(to, amount)
    }

    fn mint_asset(&mut self, to: &Address, amount: &Amount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let next = self.balance(to, &amount.currency).checked_add(amount)?;
        self.set_balance(to, next);
        Ok(())
    }

    fn burn_asset(&mut self, from: &Address, amount: &Amount) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let available = self.balance(from, &amount.currency);
        if available.raw < amount.raw {
            return Err(StakingError::InsufficientFunds {
                address: *from,
                required: amount.clone(),
                available,
            });
        }
        let next = available.checked_sub(amount)?;
        self.set_balance(from, next);
        Ok(())
    }
}

/// Monotonic state version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub u64);

/// 32-byte blake3 state root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Root32(pub [u8; 32]);

/// Receipt returned after a successful commit.
#[derive(Clone, Debug)]
pub struct CommitReceipt {
    pub new_version: Version,
    pub new_root: Root32,
    pub writes: usize,
}

/// Immutable snapshot of the state at a version.
#[derive(Clone, Debug)]
pub struct Snapshot {
    version: Version,
    root: Root32,
    map: Arc<BTreeMap<Key, Value>>,
}

impl Snapshot {
    fn genesis() -> Self {
        let map = Arc::new(BTreeMap::new());
        Self { version: Version(0), root: compute_root(&map), map }
    }

    pub fn version(&self) -> Version {
        self.version
    }
    pub fn root(&self) -> Root32 {
        self.root
    }
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.map.get(key).map(|v| v.as_slice())
    }
    pub fn len(&self) -> usize {
        self.map.len()
    }
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Single-writer ledger. Actions within a block are applied strictly in order.
#[derive(Debug)]
pub struct Ledger {
    current: Snapshot,
}

impl Default for Ledger {
    fn default() -> Self {
        Self { current: Snapshot::genesis() }
    }
}

impl Ledger {
    /// Begin a new transaction on top of the latest snapshot.
    pub fn begin(&self) -> LedgerTx {
        LedgerTx { base: self.current.clone(), overlay: BTreeMap::new() }
    }

    pub fn latest(&self) -> Snapshot {
        self.current.clone()
    }

    pub fn root(&self) -> Root32 {
        self.current.root
    }

    pub fn version(&self) -> Version {
        self.current.version
    }

    /// Install the transaction overlay on top of the current snapshot.
    pub fn commit(&mut self, tx: LedgerTx) -> CommitReceipt {
        let writes = tx.overlay.len();
        if writes == 0 {
            return CommitReceipt {
                new_version: self.current.version,
                new_root: self.current.root,
                writes: 0,
            };
        }

        let mut map: BTreeMap<Key, Value> = (*self.current.map).clone();
        for (k, v) in tx.overlay {
            match v {
                Some(v) => {
                    map.insert(k, v);
                }
                None => {
                    map.remove(&k);
                }
            }
        }
        let map = Arc::new(map);
        let version = Version(self.current.version.0 + 1);
        self.current = Snapshot { version, root: compute_root(&map), map };

        CommitReceipt {
            new_version: self.current.version,
            new_root: self.current.root,
            writes,
        }
    }
}

/// Copy-on-write transaction. Reads go through the overlay first.
#[derive(Clone, Debug)]
pub struct LedgerTx {
    base: Snapshot,
    overlay: BTreeMap<Key, Option<Value>>,
}

impl Default for LedgerTx {
    /// Detached transaction over an empty state.
    fn default() -> Self {
        Self { base: Snapshot::genesis(), overlay: BTreeMap::new() }
    }
}

impl LedgerTx {
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.overlay.get(key) {
            Some(v) => v.clone(),
            None => self.base.get(key).map(|v| v.to_vec()),
        }
    }

    pub fn put(&mut self, key: Key, value: Value) {
        self.overlay.insert(key, Some(value));
    }

    pub fn delete(&mut self, key: Key) {
        self.overlay.insert(key, None);
    }

    pub fn writes(&self) -> usize {
        self.overlay.len()
    }

    /// Drop changes.
    pub fn rollback(self) {}
}

fn state_key(address: &Address) -> Key {
    let mut k = Vec::with_capacity(1 + address.as_bytes().len());
    k.push(STATE_PREFIX);
    k.extend_from_slice(address.as_bytes());
    k
}

fn balance_key(address: &Address, currency: &Currency) -> Key {
    let mut k = Vec::with_capacity(2 + address.as_bytes().len() + currency.ticker.len() + 1);
    k.push(BALANCE_PREFIX);
    k.extend_from_slice(address.as_bytes());
    k.extend_from_slice(currency.ticker.as_bytes());
    k.push(0x00);
    k.push(currency.decimal_places);
    k
}

impl StateStore for LedgerTx {
    fn get_state(&self, address: &Address) -> Option<Vec<u8>> {
        self.get(&state_key(address))
    }

    fn set_state(&mut self, address: Address, value: Vec<u8>) {
        self.put(state_key(&address), value);
    }

    fn remove_state(&mut self, address: &Address) {
        self.delete(state_key(address));
    }

    fn balance(&self, address: &Address, currency: &Currency) -> Amount {
        let raw = self
            .get(&balance_key(address, currency))
            .and_then(|v| <[u8; 16]>::try_from(v.as_slice()).ok())
            .map(u128::from_be_bytes)
            .unwrap_or(0);
        Amount::new(currency.clone(), raw)
    }

    fn set_balance(&mut self, address: &Address, amount: Amount) {
        let key = balance_key(address, &amount.currency);
        if amount.is_zero() {
            self.delete(key);
        } else {
            self.put(key, amount.raw.to_be_bytes().to_vec());
        }
    }
}

/// root = blake3( Σ in ascending key order: len(k) || k || len(v) || v )
fn compute_root(map: &BTreeMap<Key, Value>) -> Root32 {
    let mut hasher = blake3::Hasher::new();
    for (k, v) in map.iter() {
        hasher.update(&(k.len() as u64).to_be_bytes());
        hasher.update(k);
        hasher.update(&(v.len() as u64).to_be_bytes());
        hasher.update(v);
    }
    Root32(*hasher.finalize().as_bytes())
}

// ----------------------------- Tests -----------------------------
#[cfg(test)]
mod tests {
    use super::*;

    fn gold() -> Currency {
        Currency::new("GOLD", 2)
    }

    #[test]
    fn snapshot_isolation_and_commit() {
        let mut ledger = Ledger::default();
        assert_eq!(ledger.version(), Version(0));
        assert!(ledger.latest().is_empty());

        let a = Address::reserved(0x42);
        let mut tx = ledger.begin();
        tx.set_state(a, b"v1".to_vec());
        assert_eq!(tx.get_state(&a), Some(b"v1".to_vec()));
        // not visible before commit
        assert_eq!(ledger.begin().get_state(&a), None);

        let genesis_root = ledger.root();
        let r = ledger.commit(tx);
        assert_eq!(r.new_version, Version(1));
        assert_eq!(r.writes, 1);
        assert_eq!(ledger.begin().get_state(&a), Some(b"v1".to_vec()));
        assert_ne!(ledger.root(), genesis_root);
    }

    #[test]
    fn dropped_transaction_leaves_state_untouched() {
        let mut ledger = Ledger::default();
        let a = Address::reserved(0x10);
        let mut tx = ledger.begin();
        tx.mint_asset(&a, &Amount::new(gold(), 100)).unwrap();
        ledger.commit(tx);
        let root = ledger.root();

        let mut tx = ledger.begin();
        tx.burn_asset(&a, &Amount::new(gold(), 40)).unwrap();
        tx.rollback();

        assert_eq!(ledger.root(), root);
        assert_eq!(ledger.begin().balance(&a, &gold()).raw, 100);
    }

    #[test]
    fn delete_and_reinsert_determinism() {
        let mut ledger = Ledger::default();
        let (a, b) = (Address::reserved(1), Address::reserved(2));
        let mut tx = ledger.begin();
        tx.set_state(a, vec![1]);
        tx.set_state(b, vec![2]);
        ledger.commit(tx);
        let root_after_insert = ledger.root();

        let mut tx = ledger.begin();
        tx.remove_state(&b);
        ledger.commit(tx);
        assert_ne!(ledger.root(), root_after_insert);

        let mut tx = ledger.begin();
        tx.set_state(b, vec![2]);
        ledger.commit(tx);
        assert_eq!(ledger.root(), root_after_insert);
    }

    #[test]
    fn empty_commit_keeps_version() {
        let mut ledger = Ledger::default();
        let mut tx = ledger.begin();
        tx.set_state(Address::reserved(1), vec![1]);
        ledger.commit(tx);
        let tx = ledger.begin();
        let r = ledger.commit(tx);
        assert_eq!(r.new_version, Version(1));
        assert_eq!(r.writes, 0);
        assert_eq!(ledger.latest().len(), 1);
    }

    #[test]
    fn transfer_checks_funds_and_currency_keys() {
        let mut tx = LedgerTx::default();
        let (a, b) = (Address::reserved(1), Address::reserved(2));
        tx.mint_asset(&a, &Amount::new(gold(), 50)).unwrap();
        tx.transfer_asset(&a, &b, &Amount::new(gold(), 20)).unwrap();
        assert_eq!(tx.balance(&a, &gold()).raw, 30);
        assert_eq!(tx.balance(&b, &gold()).raw, 20);
        assert_eq!(tx.balance(&b, &Currency::new("GOLD", 3)).raw, 0);

        let err = tx.transfer_asset(&a, &b, &Amount::new(gold(), 31)).unwrap_err();
        assert!(matches!(err, StakingError::InsufficientFunds { .. }));
        assert_eq!(tx.balance(&a, &gold()).raw, 30);
    }
}
