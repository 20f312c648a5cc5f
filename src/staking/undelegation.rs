//! Очередь undelegation-записей на пару (delegator, validator).

use borsh::{BorshDeserialize, BorshSerialize};
use tracing::{debug, info};

use super::unbonding_set::{self, UnbondingKind};
use super::validator::Validator;
use super::{bond, BlockContext, StakingEngine};
use crate::error::{Result, StakingError};
use crate::keys;
use crate::ledger::StateStore;
use crate::repository::DelegationRepository;
use crate::types::{Address, Amount, Currency};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UndelegationEntry {
    pub owner_address: Address,
    /// Consensus token at creation; slashing is proportional to it.
    pub initial_consensus_token: Amount,
    /// What is still owed on completion.
    pub unbonding_consensus_token: Amount,
    pub index: u64,
    pub creation_height: i64,
    pub completion_height: i64,
}

impl UndelegationEntry {
    pub fn is_matured(&self, height: i64) -> bool {
        height >= self.completion_height
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Undelegation {
    pub address: Address,
    pub delegator_address: Address,
    pub validator_address: Address,
    pub next_index: u64,
    pub entries: Vec<UndelegationEntry>,
}

impl Undelegation {
    pub fn new(delegator: Address, validator: Address) -> Self {
        Self {
            address: keys::undelegation_address(&delegator, &validator),
            delegator_address: delegator,
            validator_address: validator,
            next_index: 0,
            entries: Vec::new(),
        }
    }

    fn push(&mut self, token: Amount, creation_height: i64, completion_height: i64) -> UndelegationEntry {
        let entry = UndelegationEntry {
            owner_address: self.delegator_address,
            initial_consensus_token: token.clone(),
            unbonding_consensus_token: token,
            index: self.next_index,
            creation_height,
            completion_height,
        };
        self.next_index += 1;
        self.entries.push(entry.clone());
        entry
    }
}

impl StakingEngine {
    /// Отозвать `share` долей: consensus token уходит в очередь на `unbonding_period`.
    pub fn undelegate<S: StateStore>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        delegator: Address,
        validator: Address,
        share: &Amount,
    ) -> Result<UndelegationEntry> {
        share.ensure_currency(&Currency::share())?;
        if share.is_zero() {
            return Err(StakingError::InvalidInput("undelegated share must be positive".into()));
        }

        let address = keys::undelegation_address(&delegator, &validator);
        let mut undelegation = store
            .undelegation(&address)?
            .unwrap_or_else(|| Undelegation::new(delegator, validator));
        if undelegation.entries.len() >= self.params.max_undelegation_entries as usize {
            return Err(StakingError::CapacityExceeded {
                kind: "undelegation",
                address,
                max: self.params.max_undelegation_entries,
            });
        }

        let mut v = store.validator_required(&validator)?;
        let mut delegation = store.delegation_required(&keys::delegation_address(&delegator, &validator))?;

        self.settle_rewards(store, ctx, &mut delegation)?;

        let was_bonded = v.is_bonded();
        let token = bond::cancel(store, &mut v, &delegation, share)?;
        if was_bonded {
            let gov = token.convert(&self.params.governance_token);
            store.transfer_asset(&keys::BONDED_POOL, &keys::UNBONDED_POOL, &gov)?;
        }

        let entry = undelegation.push(token, ctx.height, ctx.height + self.params.unbonding_period);
        store.set_undelegation(&undelegation)?;
        unbonding_set::insert(store, UnbondingKind::Undelegation, &address)?;

        self.enforce_min_self_delegation(store, &delegator, &validator)?;
        let v = store.validator_required(&validator)?;
        self.checkpoint_rewards(store, ctx, &v)?;

        info!(
            delegator = %delegator,
            validator = %validator,
            share = %share,
            unbonding = %entry.unbonding_consensus_token,
            completion_height = entry.completion_height,
            "undelegated"
        );
        Ok(entry)
    }

    /// Выплатить созревшие записи. Отсутствующая или пустая очередь: no-op.
    pub fn complete_undelegation<S: StateStore>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        address: &Address,
    ) -> Result<Amount> {
        let mut paid = Amount::zero(self.params.governance_token.clone());
        let Some(mut undelegation) = store.undelegation(address)? else {
            unbonding_set::remove(store, UnbondingKind::Undelegation, address)?;
            return Ok(paid);
        };

        let (matured, pending): (Vec<_>, Vec<_>) =
            undelegation.entries.drain(..).partition(|e| e.is_matured(ctx.height));
        undelegation.entries = pending;

        for entry in &matured {
            let gov = entry.unbonding_consensus_token.convert(&self.params.governance_token);
            store.transfer_asset(&keys::UNBONDED_POOL, &entry.owner_address, &gov)?;
            paid = paid.checked_add(&gov)?;
            debug!(undelegation = %address, index = entry.index, paid = %gov, "undelegation entry completed");
        }

        if !matured.is_empty() {
            store.set_undelegation(&undelegation)?;
        }
        if undelegation.entries.is_empty() {
            unbonding_set::remove(store, UnbondingKind::Undelegation, address)?;
        }
        Ok(paid)
    }

    /// Вернуть ещё не созревший consensus token обратно в делегацию (новейшие записи первыми).
    pub fn cancel_undelegation<S: StateStore>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        delegator: Address,
        validator: Address,
        amount: &Amount,
    ) -> Result<Amount> {
        amount.ensure_currency(&Currency::consensus_token())?;
        if amount.is_zero() {
            return Err(StakingError::InvalidInput("cancelled amount must be positive".into()));
        }
        let address = keys::undelegation_address(&delegator, &validator);
        let mut undelegation = store
            .undelegation(&address)?
            .ok_or_else(|| StakingError::not_found("undelegation", address))?;

        let mut left = amount.raw;
        let cancellable = undelegation
            .entries
            .iter()
            .filter(|e| !e.is_matured(ctx.height))
            .try_fold(0u128, |acc, e| acc.checked_add(e.unbonding_consensus_token.raw))
            .ok_or(StakingError::Overflow)?;
        if cancellable < left {
            return Err(StakingError::InsufficientFunds {
                address,
                required: amount.clone(),
                available: Amount::new(Currency::consensus_token(), cancellable),
            });
        }
        for entry in undelegation.entries.iter_mut().rev() {
            if left == 0 {
                break;
            }
            if entry.is_matured(ctx.height) {
                continue;
            }
            let take = left.min(entry.unbonding_consensus_token.raw);
            entry.unbonding_consensus_token.raw -= take;
            left -= take;
        }
        // записи, опустошённые отменой, удаляются
        undelegation
            .entries
            .retain(|e| e.is_matured(ctx.height) || !e.unbonding_consensus_token.is_zero());
        store.set_undelegation(&undelegation)?;
        if undelegation.entries.is_empty() {
            unbonding_set::remove(store, UnbondingKind::Undelegation, &address)?;
        }

        let mut v: Validator = store.validator_required(&validator)?;
        let mut delegation = super::delegation::load_or_new(store, &delegator, &validator, ctx.height)?;
        self.settle_rewards(store, ctx, &mut delegation)?;

        if v.is_bonded() {
            let gov = amount.convert(&self.params.governance_token);
            store.transfer_asset(&keys::UNBONDED_POOL, &keys::BONDED_POOL, &gov)?;
        }
        let issued = bond::bond(store, &mut v, &delegation, amount)?;
        store.set_delegation(&delegation)?;
        self.checkpoint_rewards(store, ctx, &v)?;

        info!(delegator = %delegator, validator = %validator, amount = %amount, issued = %issued, "undelegation cancelled");
        Ok(issued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerTx;
    use crate::staking::testing::*;
    use crate::staking::validator::BondingStatus;

    fn setup() -> (StakingEngine, LedgerTx, Address) {
        let engine = engine();
        let mut tx = LedgerTx::default();
        let v = create_validator(&engine, &mut tx, 1, 1, 100);
        fund(&mut tx, &account(9), 10);
        engine.delegate(&mut tx, &ctx(2), account(9), v, &gov_amount(10)).unwrap();
        (engine, tx, v)
    }

    #[test]
    fn undelegate_then_complete_at_maturity() {
        // 1/3 of 10 shares at height 10, period 3
        let (engine, mut tx, v) = setup();
        let entry = engine.undelegate(&mut tx, &ctx(10), account(9), v, &share(3)).unwrap();
        assert_eq!(entry.creation_height, 10);
        assert_eq!(entry.completion_height, 13);
        assert_eq!(entry.unbonding_consensus_token, consensus(3));
        assert_eq!(shares_of(&tx, &account(9), &v), 7);

        let addr = keys::undelegation_address(&account(9), &v);
        assert!(tx.unbonding_set().unwrap().undelegations.contains(&addr));

        let paid = engine.complete_undelegation(&mut tx, &ctx(12), &addr).unwrap();
        assert!(paid.is_zero());
        assert_eq!(tx.undelegation(&addr).unwrap().unwrap().entries.len(), 1);

        let paid = engine.complete_undelegation(&mut tx, &ctx(13), &addr).unwrap();
        assert_eq!(paid, gov_amount(3));
        assert_eq!(gov_of(&tx, &account(9)), 3);
        assert!(tx.undelegation(&addr).unwrap().unwrap().entries.is_empty());
        assert!(!tx.unbonding_set().unwrap().undelegations.contains(&addr));

        // idempotent
        let paid = engine.complete_undelegation(&mut tx, &ctx(14), &addr).unwrap();
        assert!(paid.is_zero());
        assert_eq!(gov_of(&tx, &account(9)), 3);
    }

    #[test]
    fn bucket_capacity_is_enforced() {
        let (engine, mut tx, v) = setup();
        for h in 3..6 {
            engine.undelegate(&mut tx, &ctx(h), account(9), v, &share(1)).unwrap();
        }
        let err = engine.undelegate(&mut tx, &ctx(6), account(9), v, &share(1)).unwrap_err();
        assert!(matches!(err, StakingError::CapacityExceeded { kind: "undelegation", max: 3, .. }));
    }

    #[test]
    fn undelegate_more_than_held_fails() {
        let (engine, mut tx, v) = setup();
        let err = engine.undelegate(&mut tx, &ctx(3), account(9), v, &share(11)).unwrap_err();
        assert!(matches!(err, StakingError::InsufficientFunds { .. }));
        assert!(matches!(
            engine.undelegate(&mut tx, &ctx(3), account(8), v, &share(1)),
            Err(StakingError::NotFound { kind: "delegation", .. })
        ));
    }

    #[test]
    fn undelegating_from_bonded_validator_moves_pool() {
        let (engine, mut tx, v) = setup();
        engine.bond_validator(&mut tx, &v).unwrap();
        assert_eq!(gov_of(&tx, &keys::BONDED_POOL), 110);
        engine.undelegate(&mut tx, &ctx(3), account(9), v, &share(4)).unwrap();
        assert_eq!(gov_of(&tx, &keys::BONDED_POOL), 106);
        assert_eq!(gov_of(&tx, &keys::UNBONDED_POOL), 4);
        assert_eq!(tx.validator_required(&v).unwrap().status, BondingStatus::Bonded);
    }

    #[test]
    fn operator_below_floor_gets_jailed() {
        let (engine, mut tx, v) = setup();
        engine.undelegate(&mut tx, &ctx(3), operator(1), v, &share(60)).unwrap();
        assert!(tx.validator_required(&v).unwrap().jailed);
        assert!(!tx.power_index().unwrap().contains(&v));
    }

    #[test]
    fn operator_below_floor_cannot_unjail_until_topped_up() {
        let (engine, mut tx, v) = setup();
        engine.undelegate(&mut tx, &ctx(3), operator(1), v, &share(60)).unwrap();
        assert!(tx.signing_info(&v).unwrap().unwrap().jailed_until < 10);

        let err = engine.unjail(&mut tx, &ctx(10), &v).unwrap_err();
        assert!(matches!(err, StakingError::InvalidState(_)));
        assert!(tx.validator_required(&v).unwrap().jailed);

        fund(&mut tx, &operator(1), 20);
        engine.delegate(&mut tx, &ctx(11), operator(1), v, &gov_amount(20)).unwrap();
        engine.unjail(&mut tx, &ctx(11), &v).unwrap();
        assert!(tx.power_index().unwrap().contains(&v));
    }

    #[test]
    fn cancel_rebonds_newest_entries_first() {
        let (engine, mut tx, v) = setup();
        engine.undelegate(&mut tx, &ctx(3), account(9), v, &share(2)).unwrap();
        engine.undelegate(&mut tx, &ctx(4), account(9), v, &share(3)).unwrap();

        let issued = engine.cancel_undelegation(&mut tx, &ctx(5), account(9), v, &consensus(4)).unwrap();
        assert_eq!(issued, share(4));
        let addr = keys::undelegation_address(&account(9), &v);
        let bucket = tx.undelegation(&addr).unwrap().unwrap();
        assert_eq!(bucket.entries.len(), 1);
        assert_eq!(bucket.entries[0].unbonding_consensus_token, consensus(1));
        assert_eq!(bucket.entries[0].index, 0);
        assert_eq!(shares_of(&tx, &account(9), &v), 9);

        let err = engine.cancel_undelegation(&mut tx, &ctx(5), account(9), v, &consensus(2)).unwrap_err();
        assert!(matches!(err, StakingError::InsufficientFunds { .. }));

        engine.cancel_undelegation(&mut tx, &ctx(5), account(9), v, &consensus(1)).unwrap();
        assert!(tx.undelegation(&addr).unwrap().unwrap().entries.is_empty());
        assert!(!tx.unbonding_set().unwrap().undelegations.contains(&addr));
    }
}
