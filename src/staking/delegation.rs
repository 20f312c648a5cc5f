//! Делегирования: (delegator, validator) -> баланс долей + watermark наград.

use borsh::{BorshDeserialize, BorshSerialize};
use tracing::info;

use super::validator::Delegatee;
use super::{bond, BlockContext, StakingEngine};
use crate::error::{Result, StakingError};
use crate::keys;
use crate::ledger::StateStore;
use crate::repository::DelegationRepository;
use crate::types::{Address, Amount, Currency};

/// Side of a delegation that owns shares.
pub trait Delegator {
    fn delegator_address(&self) -> Address;
    fn delegatee_address(&self) -> Address;
    /// Account holding the share balance.
    fn share_address(&self) -> Address;
    fn latest_distribute_height(&self) -> i64;

    fn shares<S: StateStore + ?Sized>(&self, store: &S) -> Amount {
        store.balance(&self.share_address(), &Currency::share())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Delegation {
    pub address: Address,
    pub delegator_address: Address,
    pub validator_address: Address,
    /// Rewards are settled up to this height.
    pub latest_distribute_height: i64,
}

impl Delegation {
    pub fn new(delegator: Address, validator: Address, height: i64) -> Self {
        Self {
            address: keys::delegation_address(&delegator, &validator),
            delegator_address: delegator,
            validator_address: validator,
            latest_distribute_height: height,
        }
    }
}

impl Delegator for Delegation {
    fn delegator_address(&self) -> Address {
        self.delegator_address
    }

    fn delegatee_address(&self) -> Address {
        self.validator_address
    }

    fn share_address(&self) -> Address {
        self.address
    }

    fn latest_distribute_height(&self) -> i64 {
        self.latest_distribute_height
    }
}

/// Load the delegation or start a fresh one watermarked at `height`.
pub(crate) fn load_or_new<S: StateStore>(
    store: &S,
    delegator: &Address,
    validator: &Address,
    height: i64,
) -> Result<Delegation> {
    let address = keys::delegation_address(delegator, validator);
    Ok(store
        .delegation(&address)?
        .unwrap_or_else(|| Delegation::new(*delegator, *validator, height)))
}

impl StakingEngine {
    /// Делегировать governance token валидатору. Возвращает выпущенные доли.
    pub fn delegate<S: StateStore>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        delegator: Address,
        validator: Address,
        amount: &Amount,
    ) -> Result<Amount> {
        amount.ensure_currency(&self.params.governance_token)?;
        if amount.is_zero() {
            return Err(StakingError::InvalidInput("delegation amount must be positive".into()));
        }
        let available = store.balance(&delegator, &amount.currency);
        if available.raw < amount.raw {
            return Err(StakingError::InsufficientFunds {
                address: delegator,
                required: amount.clone(),
                available,
            });
        }

        let mut v = store.validator_required(&validator)?;
        let mut delegation = load_or_new(store, &delegator, &validator, ctx.height)?;

        // сначала снять награды по старому балансу долей
        self.settle_rewards(store, ctx, &mut delegation)?;

        store.transfer_asset(&delegator, &v.pool_address(), amount)?;
        let issued = bond::bond(store, &mut v, &delegation, &amount.convert(&Currency::consensus_token()))?;
        store.set_delegation(&delegation)?;
        self.checkpoint_rewards(store, ctx, &v)?;

        info!(
            delegator = %delegator,
            validator = %validator,
            amount = %amount,
            issued = %issued,
            height = ctx.height,
            "delegated"
        );
        Ok(issued)
    }

    /// Claim pending lump-sum rewards of one delegation.
    pub fn claim_reward<S: StateStore>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        delegator: Address,
        validator: Address,
    ) -> Result<Vec<Amount>> {
        let v = store.validator_required(&validator)?;
        let mut delegation = store.delegation_required(&keys::delegation_address(&delegator, &validator))?;
        let paid = self.settle_rewards(store, ctx, &mut delegation)?;
        self.checkpoint_rewards(store, ctx, &v)?;
        info!(delegator = %delegator, validator = %validator, paid = ?paid, "reward claimed");
        Ok(paid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerTx;
    use crate::staking::testing::*;

    #[test]
    fn first_delegation_is_one_to_one() {
        // V self-delegates 100 (min 50), D delegates 10
        let engine = engine();
        let mut tx = LedgerTx::default();
        let v = create_validator(&engine, &mut tx, 1, 1, 100);
        fund(&mut tx, &account(9), 10);

        let issued = engine.delegate(&mut tx, &ctx(2), account(9), v, &gov_amount(10)).unwrap();
        assert_eq!(issued, share(10));
        assert_eq!(shares_of(&tx, &account(9), &v), 10);
        assert_eq!(consensus_of(&tx, &v), 110);
        assert_eq!(tx.validator_required(&v).unwrap().delegator_shares, share(110));
        assert_eq!(gov_of(&tx, &account(9)), 0);
    }

    #[test]
    fn delegate_rejects_bad_input() {
        let engine = engine();
        let mut tx = LedgerTx::default();
        let v = create_validator(&engine, &mut tx, 1, 1, 100);
        fund(&mut tx, &account(9), 10);

        let gold = Amount::new(Currency::new("GOLD", 0), 1);
        assert!(matches!(
            engine.delegate(&mut tx, &ctx(2), account(9), v, &gold),
            Err(StakingError::InvalidCurrency { .. })
        ));
        assert!(matches!(
            engine.delegate(&mut tx, &ctx(2), account(9), v, &gov_amount(11)),
            Err(StakingError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            engine.delegate(&mut tx, &ctx(2), account(9), account(77), &gov_amount(1)),
            Err(StakingError::NotFound { kind: "validator", .. })
        ));
    }

    #[test]
    fn delegation_to_bonded_validator_lands_in_bonded_pool() {
        let engine = engine();
        let mut tx = LedgerTx::default();
        let v = create_validator(&engine, &mut tx, 1, 1, 100);
        engine.bond_validator(&mut tx, &v).unwrap();
        fund(&mut tx, &account(9), 40);
        engine.delegate(&mut tx, &ctx(2), account(9), v, &gov_amount(40)).unwrap();
        assert_eq!(gov_of(&tx, &keys::BONDED_POOL), 140);
        assert_eq!(tx.power_index().unwrap().entries()[0].consensus_token, 140);
    }

    #[test]
    fn shares_are_conserved_across_delegators() {
        let engine = engine();
        let mut tx = LedgerTx::default();
        let a = create_validator(&engine, &mut tx, 1, 1, 100);
        let b = create_validator(&engine, &mut tx, 1, 2, 100);
        engine.bond_validator(&mut tx, &a).unwrap();

        let holders: Vec<Address> = [operator(1), operator(2)].into_iter().chain((10..13).map(account)).collect();
        let conserved = |tx: &LedgerTx| {
            for v in [a, b] {
                let total: u128 = holders.iter().map(|who| shares_of(tx, who, &v)).sum();
                assert_eq!(tx.validator_required(&v).unwrap().delegator_shares.raw, total);
            }
        };

        for (i, d) in (10..13).enumerate() {
            fund(&mut tx, &account(d), 1_000);
            engine
                .delegate(&mut tx, &ctx(2), account(d), a, &gov_amount(7 + 13 * i as u128))
                .unwrap();
            conserved(&tx);
        }

        engine.undelegate(&mut tx, &ctx(3), account(10), a, &share(3)).unwrap();
        conserved(&tx);
        engine.redelegate(&mut tx, &ctx(4), account(11), a, b, &share(8)).unwrap();
        conserved(&tx);
        engine.cancel_undelegation(&mut tx, &ctx(5), account(10), a, &consensus(2)).unwrap();
        conserved(&tx);

        // the undelegation matures at 6, only the redelegation is at risk
        let out = engine.slash(&mut tx, &ctx(6), &a, 3, 100, 2).unwrap();
        assert!(out.from_redelegations > 0);
        assert_eq!(shares_of(&tx, &account(11), &b), 4);
        conserved(&tx);

        let rest = share(shares_of(&tx, &account(12), &a));
        engine.undelegate(&mut tx, &ctx(7), account(12), a, &rest).unwrap();
        assert_eq!(shares_of(&tx, &account(12), &a), 0);
        conserved(&tx);
    }

    #[test]
    fn claim_without_delegation_is_not_found() {
        let engine = engine();
        let mut tx = LedgerTx::default();
        let v = create_validator(&engine, &mut tx, 1, 1, 100);
        assert!(matches!(
            engine.claim_reward(&mut tx, &ctx(3), account(9), v),
            Err(StakingError::NotFound { kind: "delegation", .. })
        ));
    }
}
