//! Redelegation: мгновенный перенос долей между валидаторами.
//!
//! Мощность переезжает сразу, но запись остаётся под slashing у источника
//! ещё один полный `unbonding_period`.

use borsh::{BorshDeserialize, BorshSerialize};
use tracing::{debug, info};

use super::delegation;
use super::unbonding_set::{self, UnbondingKind};
use super::validator::{Delegatee, Validator};
use super::{bond, BlockContext, StakingEngine};
use crate::error::{Result, StakingError};
use crate::keys;
use crate::ledger::StateStore;
use crate::repository::DelegationRepository;
use crate::types::{Address, Amount, Currency};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct RedelegationEntry {
    pub owner_address: Address,
    /// Shares cancelled at the source validator.
    pub redelegating_share: Amount,
    /// Consensus token carried over; basis for slashing at the source.
    pub unbonding_consensus_token: Amount,
    /// Shares issued at the destination; what a source slash claws back.
    pub issued_dst_share: Amount,
    pub index: u64,
    pub creation_height: i64,
    pub completion_height: i64,
}

impl RedelegationEntry {
    pub fn is_matured(&self, height: i64) -> bool {
        height >= self.completion_height
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Redelegation {
    pub address: Address,
    pub delegator_address: Address,
    pub src_validator_address: Address,
    pub dst_validator_address: Address,
    pub next_index: u64,
    pub entries: Vec<RedelegationEntry>,
}

impl Redelegation {
    pub fn new(delegator: Address, src: Address, dst: Address) -> Self {
        Self {
            address: keys::redelegation_address(&delegator, &src, &dst),
            delegator_address: delegator,
            src_validator_address: src,
            dst_validator_address: dst,
            next_index: 0,
            entries: Vec::new(),
        }
    }
}

impl StakingEngine {
    /// Перенести `share` долей от `src` к `dst`. Возвращает созданную запись.
    pub fn redelegate<S: StateStore>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        delegator: Address,
        src: Address,
        dst: Address,
        share: &Amount,
    ) -> Result<RedelegationEntry> {
        if src == dst {
            return Err(StakingError::InvalidInput(format!("cannot redelegate from {src} to itself")));
        }
        share.ensure_currency(&Currency::share())?;
        if share.is_zero() {
            return Err(StakingError::InvalidInput("redelegated share must be positive".into()));
        }

        let address = keys::redelegation_address(&delegator, &src, &dst);
        let mut redelegation = store
            .redelegation(&address)?
            .unwrap_or_else(|| Redelegation::new(delegator, src, dst));
        if redelegation.entries.len() >= self.params.max_redelegation_entries as usize {
            return Err(StakingError::CapacityExceeded {
                kind: "redelegation",
                address,
                max: self.params.max_redelegation_entries,
            });
        }

        let mut src_v = store.validator_required(&src)?;
        let mut dst_v = store.validator_required(&dst)?;
        let mut src_delegation = store.delegation_required(&keys::delegation_address(&delegator, &src))?;
        let mut dst_delegation = delegation::load_or_new(store, &delegator, &dst, ctx.height)?;

        self.settle_rewards(store, ctx, &mut src_delegation)?;
        self.settle_rewards(store, ctx, &mut dst_delegation)?;

        let token = bond::cancel(store, &mut src_v, &src_delegation, share)?;

        let (from_pool, to_pool) = (src_v.pool_address(), dst_v.pool_address());
        if from_pool != to_pool {
            let gov = token.convert(&self.params.governance_token);
            store.transfer_asset(&from_pool, &to_pool, &gov)?;
        }

        let issued = bond::bond(store, &mut dst_v, &dst_delegation, &token)?;
        store.set_delegation(&dst_delegation)?;

        let entry = RedelegationEntry {
            owner_address: delegator,
            redelegating_share: share.clone(),
            unbonding_consensus_token: token,
            issued_dst_share: issued,
            index: redelegation.next_index,
            creation_height: ctx.height,
            completion_height: ctx.height + self.params.unbonding_period,
        };
        redelegation.next_index += 1;
        redelegation.entries.push(entry.clone());
        store.set_redelegation(&redelegation)?;
        unbonding_set::insert(store, UnbondingKind::Redelegation, &address)?;

        self.enforce_min_self_delegation(store, &delegator, &src)?;
        let src_v: Validator = store.validator_required(&src)?;
        self.checkpoint_rewards(store, ctx, &src_v)?;
        self.checkpoint_rewards(store, ctx, &dst_v)?;

        info!(
            delegator = %delegator,
            src = %src,
            dst = %dst,
            share = %share,
            moved = %entry.unbonding_consensus_token,
            issued = %entry.issued_dst_share,
            "redelegated"
        );
        Ok(entry)
    }

    /// Убрать созревшие записи. Капитал уже перенесён, выплачивать нечего.
    pub fn complete_redelegation<S: StateStore>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        address: &Address,
    ) -> Result<usize> {
        let Some(mut redelegation) = store.redelegation(address)? else {
            unbonding_set::remove(store, UnbondingKind::Redelegation, address)?;
            return Ok(0);
        };
        let before = redelegation.entries.len();
        redelegation.entries.retain(|e| !e.is_matured(ctx.height));
        let completed = before - redelegation.entries.len();

        if completed > 0 {
            store.set_redelegation(&redelegation)?;
            debug!(redelegation = %address, completed, "redelegation entries completed");
        }
        if redelegation.entries.is_empty() {
            unbonding_set::remove(store, UnbondingKind::Redelegation, address)?;
        }
        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerTx;
    use crate::staking::testing::*;

    fn setup() -> (StakingEngine, LedgerTx, Address, Address) {
        let engine = engine();
        let mut tx = LedgerTx::default();
        let a = create_validator(&engine, &mut tx, 1, 1, 100);
        let b = create_validator(&engine, &mut tx, 1, 2, 100);
        fund(&mut tx, &account(9), 20);
        engine.delegate(&mut tx, &ctx(2), account(9), a, &gov_amount(20)).unwrap();
        (engine, tx, a, b)
    }

    #[test]
    fn power_moves_immediately() {
        let (engine, mut tx, a, b) = setup();
        let entry = engine.redelegate(&mut tx, &ctx(5), account(9), a, b, &share(8)).unwrap();
        assert_eq!(entry.unbonding_consensus_token, consensus(8));
        assert_eq!(entry.issued_dst_share, share(8));
        assert_eq!(entry.completion_height, 8);

        assert_eq!(consensus_of(&tx, &a), 112);
        assert_eq!(consensus_of(&tx, &b), 108);
        assert_eq!(shares_of(&tx, &account(9), &a), 12);
        assert_eq!(shares_of(&tx, &account(9), &b), 8);
        let index = tx.power_index().unwrap();
        assert_eq!(index.entries()[0].validator_address, a);
        assert_eq!(index.entries()[0].consensus_token, 112);
    }

    #[test]
    fn pool_transfer_follows_validator_statuses() {
        let (engine, mut tx, a, b) = setup();
        engine.bond_validator(&mut tx, &a).unwrap();
        assert_eq!(gov_of(&tx, &keys::BONDED_POOL), 120);

        engine.redelegate(&mut tx, &ctx(3), account(9), a, b, &share(5)).unwrap();
        assert_eq!(gov_of(&tx, &keys::BONDED_POOL), 115);
        assert_eq!(gov_of(&tx, &keys::UNBONDED_POOL), 105);

        engine.bond_validator(&mut tx, &b).unwrap();
        assert_eq!(gov_of(&tx, &keys::BONDED_POOL), 220);
        engine.redelegate(&mut tx, &ctx(4), account(9), a, b, &share(5)).unwrap();
        assert_eq!(gov_of(&tx, &keys::BONDED_POOL), 220);
        assert_eq!(gov_of(&tx, &keys::UNBONDED_POOL), 0);
    }

    #[test]
    fn rejects_self_redelegation_and_full_bucket() {
        let (engine, mut tx, a, b) = setup();
        assert!(matches!(
            engine.redelegate(&mut tx, &ctx(3), account(9), a, a, &share(1)),
            Err(StakingError::InvalidInput(_))
        ));
        for h in 3..6 {
            engine.redelegate(&mut tx, &ctx(h), account(9), a, b, &share(1)).unwrap();
        }
        let err = engine.redelegate(&mut tx, &ctx(6), account(9), a, b, &share(1)).unwrap_err();
        assert!(matches!(err, StakingError::CapacityExceeded { kind: "redelegation", .. }));
    }

    #[test]
    fn completion_drops_matured_entries_only() {
        let (engine, mut tx, a, b) = setup();
        engine.redelegate(&mut tx, &ctx(3), account(9), a, b, &share(1)).unwrap();
        engine.redelegate(&mut tx, &ctx(4), account(9), a, b, &share(1)).unwrap();
        let addr = keys::redelegation_address(&account(9), &a, &b);

        assert_eq!(engine.complete_redelegation(&mut tx, &ctx(6), &addr).unwrap(), 1);
        let bucket = tx.redelegation(&addr).unwrap().unwrap();
        assert_eq!(bucket.entries.len(), 1);
        assert_eq!(bucket.entries[0].index, 1);

        assert_eq!(engine.complete_redelegation(&mut tx, &ctx(7), &addr).unwrap(), 1);
        assert_eq!(engine.complete_redelegation(&mut tx, &ctx(8), &addr).unwrap(), 0);
        assert!(tx.unbonding_set().unwrap().is_empty());
        assert_eq!(shares_of(&tx, &account(9), &b), 2);
    }
}
