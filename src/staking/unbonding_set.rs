//! Unbonding Set: всё, что ещё ждёт созревания, и его обход в конце блока.

use std::collections::BTreeSet;

use borsh::{BorshDeserialize, BorshSerialize};
use tracing::debug;

use super::{BlockContext, StakingEngine};
use crate::error::Result;
use crate::ledger::StateStore;
use crate::repository::DelegationRepository;
use crate::types::{Address, Amount};

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UnbondingSet {
    pub validators: BTreeSet<Address>,
    pub undelegations: BTreeSet<Address>,
    pub redelegations: BTreeSet<Address>,
}

impl UnbondingSet {
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty() && self.undelegations.is_empty() && self.redelegations.is_empty()
    }

    fn members_mut(&mut self, kind: UnbondingKind) -> &mut BTreeSet<Address> {
        match kind {
            UnbondingKind::Validator => &mut self.validators,
            UnbondingKind::Undelegation => &mut self.undelegations,
            UnbondingKind::Redelegation => &mut self.redelegations,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnbondingKind {
    Validator,
    Undelegation,
    Redelegation,
}

pub(crate) fn insert<S: StateStore + ?Sized>(store: &mut S, kind: UnbondingKind, address: &Address) -> Result<()> {
    let mut set = store.unbonding_set()?;
    if set.members_mut(kind).insert(*address) {
        store.set_unbonding_set(&set)?;
    }
    Ok(())
}

pub(crate) fn remove<S: StateStore + ?Sized>(store: &mut S, kind: UnbondingKind, address: &Address) -> Result<()> {
    let mut set = store.unbonding_set()?;
    if set.members_mut(kind).remove(address) {
        store.set_unbonding_set(&set)?;
    }
    Ok(())
}

/// Итог одного обхода.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnbondingSweep {
    pub validators_unbonded: Vec<Address>,
    /// Governance token paid out by matured undelegation entries.
    pub undelegation_payout: Amount,
    pub redelegation_entries_completed: usize,
}

impl StakingEngine {
    /// Завершить всё созревшее к `ctx.height`.
    pub fn complete_unbonding_set<S: StateStore>(&self, store: &mut S, ctx: &BlockContext) -> Result<UnbondingSweep> {
        // снимок: complete_* меняют множество по ходу обхода
        let set = store.unbonding_set()?;
        let mut sweep = UnbondingSweep {
            validators_unbonded: Vec::new(),
            undelegation_payout: Amount::zero(self.params.governance_token.clone()),
            redelegation_entries_completed: 0,
        };

        for address in &set.validators {
            if self.complete_validator_unbonding(store, ctx, address)? {
                sweep.validators_unbonded.push(*address);
            }
        }
        for address in &set.undelegations {
            let paid = self.complete_undelegation(store, ctx, address)?;
            sweep.undelegation_payout = sweep.undelegation_payout.checked_add(&paid)?;
        }
        for address in &set.redelegations {
            sweep.redelegation_entries_completed += self.complete_redelegation(store, ctx, address)?;
        }

        debug!(
            height = ctx.height,
            validators = sweep.validators_unbonded.len(),
            paid = %sweep.undelegation_payout,
            redelegations = sweep.redelegation_entries_completed,
            "unbonding set swept"
        );
        Ok(sweep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;
    use crate::ledger::LedgerTx;
    use crate::staking::testing::*;

    #[test]
    fn insert_and_remove_are_idempotent() {
        let mut tx = LedgerTx::default();
        let a = account(1);
        insert(&mut tx, UnbondingKind::Redelegation, &a).unwrap();
        insert(&mut tx, UnbondingKind::Redelegation, &a).unwrap();
        assert_eq!(tx.unbonding_set().unwrap().redelegations.len(), 1);
        remove(&mut tx, UnbondingKind::Redelegation, &a).unwrap();
        remove(&mut tx, UnbondingKind::Redelegation, &a).unwrap();
        assert!(tx.unbonding_set().unwrap().is_empty());
    }

    #[test]
    fn membership_tracks_incomplete_entries() {
        let engine = engine();
        let mut tx = LedgerTx::default();
        let v = create_validator(&engine, &mut tx, 1, 1, 100);
        let w = create_validator(&engine, &mut tx, 1, 2, 100);
        fund(&mut tx, &account(9), 30);
        engine.delegate(&mut tx, &ctx(2), account(9), v, &gov_amount(30)).unwrap();
        engine.bond_validator(&mut tx, &v).unwrap();

        engine.undelegate(&mut tx, &ctx(3), account(9), v, &share(5)).unwrap();
        engine.undelegate(&mut tx, &ctx(4), account(9), v, &share(5)).unwrap();
        engine.redelegate(&mut tx, &ctx(4), account(9), v, w, &share(5)).unwrap();
        engine.unbond_validator(&mut tx, &ctx(4), &v).unwrap();

        let und = keys::undelegation_address(&account(9), &v);
        let red = keys::redelegation_address(&account(9), &v, &w);
        let set = tx.unbonding_set().unwrap();
        assert!(set.undelegations.contains(&und));
        assert!(set.redelegations.contains(&red));
        assert!(set.validators.contains(&v));

        // first undelegation entry matures at 6, the rest at 7
        let sweep = engine.complete_unbonding_set(&mut tx, &ctx(6)).unwrap();
        assert_eq!(sweep.undelegation_payout, gov_amount(5));
        assert!(sweep.validators_unbonded.is_empty());
        assert!(tx.unbonding_set().unwrap().undelegations.contains(&und));

        let sweep = engine.complete_unbonding_set(&mut tx, &ctx(7)).unwrap();
        assert_eq!(sweep.undelegation_payout, gov_amount(5));
        assert_eq!(sweep.redelegation_entries_completed, 1);
        assert_eq!(sweep.validators_unbonded, vec![v]);
        assert!(tx.unbonding_set().unwrap().is_empty());
        assert_eq!(gov_of(&tx, &account(9)), 10);

        let sweep = engine.complete_unbonding_set(&mut tx, &ctx(8)).unwrap();
        assert!(sweep.undelegation_payout.is_zero());
        assert_eq!(gov_of(&tx, &account(9)), 10);
    }
}
