//! Реестр валидаторов: создание, bond/unbond, завершение unbonding, jail/unjail.

use borsh::{BorshDeserialize, BorshSerialize};
use tracing::{debug, info};

use super::signing::ValidatorSigningInfo;
use super::unbonding_set::{self, UnbondingKind};
use super::{power_index, BlockContext, StakingEngine};
use crate::error::{Result, StakingError};
use crate::keys;
use crate::ledger::StateStore;
use crate::repository::DelegationRepository;
use crate::types::{Address, Amount, Currency, PublicKey};

/// Стадия жизненного цикла валидатора.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum BondingStatus {
    Unbonded,
    Unbonding,
    Bonded,
}

/// Side of a delegation that issues shares against a pool.
///
/// Consensus token backing the shares is held at `address()`.
pub trait Delegatee {
    fn address(&self) -> Address;
    fn delegator_shares(&self) -> &Amount;
    fn set_delegator_shares(&mut self, shares: Amount);
    /// Governance-token pool currently backing this delegatee.
    fn pool_address(&self) -> Address;
    /// Write the record back after its shares or balance changed.
    fn save<S: StateStore>(&self, store: &mut S) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Validator {
    pub address: Address,
    pub operator_address: Address,
    pub operator_public_key: PublicKey,
    pub status: BondingStatus,
    pub jailed: bool,
    pub delegator_shares: Amount,
    pub unbonding_completion_height: i64,
}

impl Validator {
    pub fn new(operator_public_key: PublicKey) -> Self {
        let operator_address = operator_public_key.address();
        Self {
            address: keys::validator_address(&operator_address),
            operator_address,
            operator_public_key,
            status: BondingStatus::Unbonded,
            jailed: false,
            delegator_shares: Amount::zero(Currency::share()),
            unbonding_completion_height: 0,
        }
    }

    pub fn is_bonded(&self) -> bool {
        self.status == BondingStatus::Bonded
    }

    /// Bonded pool for `Bonded`, unbonded pool otherwise.
    pub fn pool_for(status: BondingStatus) -> Address {
        match status {
            BondingStatus::Bonded => keys::BONDED_POOL,
            BondingStatus::Unbonding | BondingStatus::Unbonded => keys::UNBONDED_POOL,
        }
    }

    pub fn self_delegation_address(&self) -> Address {
        keys::delegation_address(&self.operator_address, &self.address)
    }
}

impl Delegatee for Validator {
    fn address(&self) -> Address {
        self.address
    }

    fn delegator_shares(&self) -> &Amount {
        &self.delegator_shares
    }

    fn set_delegator_shares(&mut self, shares: Amount) {
        self.delegator_shares = shares;
    }

    fn pool_address(&self) -> Address {
        Validator::pool_for(self.status)
    }

    fn save<S: StateStore>(&self, store: &mut S) -> Result<()> {
        store.set_validator(self)?;
        power_index::refresh(store, self)
    }
}

/// Current consensus-token balance (voting power) of a validator.
pub fn consensus_token_of<S: StateStore + ?Sized>(store: &S, validator: &Address) -> Amount {
    store.balance(validator, &Currency::consensus_token())
}

impl StakingEngine {
    /// Создать валидатора и сразу выполнить self-delegation.
    pub fn create_validator<S: StateStore>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        operator: Address,
        operator_public_key: PublicKey,
        self_delegation: &Amount,
    ) -> Result<Validator> {
        if operator != operator_public_key.address() {
            return Err(StakingError::InvalidInput(format!(
                "operator {operator} is not derived from public key {operator_public_key}"
            )));
        }
        self_delegation.ensure_currency(&self.params.governance_token)?;

        let required = Amount::new(Currency::consensus_token(), self.params.min_self_delegation as u128);
        let offered = self_delegation.convert(&Currency::consensus_token());
        if offered.raw < required.raw {
            return Err(StakingError::BelowMinimumSelfDelegation { required, actual: offered });
        }

        let validator = Validator::new(operator_public_key);
        if store.validator(&validator.address)?.is_some() {
            return Err(StakingError::DuplicatedValidator(validator.address));
        }

        store.set_validator(&validator)?;
        store.set_signing_info(&ValidatorSigningInfo::new(validator.address, ctx.height))?;
        self.checkpoint_rewards(store, ctx, &validator)?;
        power_index::refresh(store, &validator)?;

        self.delegate(store, ctx, operator, validator.address, self_delegation)?;

        info!(
            validator = %validator.address,
            operator = %operator,
            self_delegation = %self_delegation,
            height = ctx.height,
            "validator created"
        );
        store.validator_required(&validator.address)
    }

    /// Перевести валидатора в Bonded: весь его consensus token переезжает в bonded pool.
    pub fn bond_validator<S: StateStore>(&self, store: &mut S, address: &Address) -> Result<()> {
        let mut v = store.validator_required(address)?;
        if v.is_bonded() {
            return Ok(());
        }
        let gov = consensus_token_of(&*store, address).convert(&self.params.governance_token);
        store.transfer_asset(&keys::UNBONDED_POOL, &keys::BONDED_POOL, &gov)?;
        v.status = BondingStatus::Bonded;
        v.unbonding_completion_height = 0;
        store.set_validator(&v)?;
        unbonding_set::remove(store, UnbondingKind::Validator, address)?;
        debug!(validator = %address, moved = %gov, "validator bonded");
        Ok(())
    }

    /// Начать unbonding валидатора. Повторный вызов для не-Bonded валидатора ничего не делает.
    pub fn unbond_validator<S: StateStore>(&self, store: &mut S, ctx: &BlockContext, address: &Address) -> Result<()> {
        let mut v = store.validator_required(address)?;
        if !v.is_bonded() {
            return Ok(());
        }
        let gov = consensus_token_of(&*store, address).convert(&self.params.governance_token);
        store.transfer_asset(&keys::BONDED_POOL, &keys::UNBONDED_POOL, &gov)?;
        v.status = BondingStatus::Unbonding;
        v.unbonding_completion_height = ctx.height + self.params.unbonding_period;
        store.set_validator(&v)?;
        unbonding_set::insert(store, UnbondingKind::Validator, address)?;
        debug!(
            validator = %address,
            moved = %gov,
            completion_height = v.unbonding_completion_height,
            "validator unbonding"
        );
        Ok(())
    }

    /// Завершить unbonding, если срок наступил. Возвращает `true`, если статус изменился.
    pub fn complete_validator_unbonding<S: StateStore>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        address: &Address,
    ) -> Result<bool> {
        let Some(mut v) = store.validator(address)? else {
            unbonding_set::remove(store, UnbondingKind::Validator, address)?;
            return Ok(false);
        };
        if v.status != BondingStatus::Unbonding {
            unbonding_set::remove(store, UnbondingKind::Validator, address)?;
            return Ok(false);
        }
        if ctx.height < v.unbonding_completion_height {
            return Ok(false);
        }
        v.status = BondingStatus::Unbonded;
        store.set_validator(&v)?;
        unbonding_set::remove(store, UnbondingKind::Validator, address)?;
        info!(validator = %address, height = ctx.height, "validator unbonded");
        Ok(true)
    }

    pub fn jail<S: StateStore>(&self, store: &mut S, address: &Address) -> Result<()> {
        let mut v = store.validator_required(address)?;
        if v.jailed {
            return Err(StakingError::JailedValidator(*address));
        }
        v.jailed = true;
        store.set_validator(&v)?;
        power_index::refresh(store, &v)?;
        info!(validator = %address, "validator jailed");
        Ok(())
    }

    pub fn unjail<S: StateStore>(&self, store: &mut S, ctx: &BlockContext, address: &Address) -> Result<()> {
        let mut v = store.validator_required(address)?;
        if !v.jailed {
            return Err(StakingError::InvalidState(format!("validator {address} is not jailed")));
        }
        let info = store
            .signing_info(address)?
            .ok_or_else(|| StakingError::not_found("signing info", *address))?;
        if info.tombstoned {
            return Err(StakingError::InvalidState(format!("validator {address} is tombstoned")));
        }
        if ctx.height < info.jailed_until {
            return Err(StakingError::InvalidState(format!(
                "validator {address} is jailed until {}",
                info.jailed_until
            )));
        }
        let self_bonded = self.self_bonded_consensus_token(&*store, &v)?;
        if self_bonded.raw < self.params.min_self_delegation as u128 {
            return Err(StakingError::InvalidState(format!(
                "self-bonded {self_bonded} of {address} is below the minimum self-delegation"
            )));
        }
        v.jailed = false;
        store.set_validator(&v)?;
        power_index::refresh(store, &v)?;
        info!(validator = %address, height = ctx.height, "validator unjailed");
        Ok(())
    }

    /// Consensus token backing the operator's own delegation.
    pub fn self_bonded_consensus_token<S: StateStore>(&self, store: &S, v: &Validator) -> Result<Amount> {
        let shares = store.balance(&v.self_delegation_address(), &Currency::share());
        let token = consensus_token_of(store, &v.address);
        Ok(super::pool::consensus_token_from_share(&v.delegator_shares, &token, &shares)?
            .unwrap_or_else(|| Amount::zero(Currency::consensus_token())))
    }

    /// Jails the validator when its operator withdrew below the self-delegation floor.
    pub(crate) fn enforce_min_self_delegation<S: StateStore>(
        &self,
        store: &mut S,
        delegator: &Address,
        validator: &Address,
    ) -> Result<()> {
        let v = store.validator_required(validator)?;
        if v.jailed || &v.operator_address != delegator {
            return Ok(());
        }
        let self_bonded = self.self_bonded_consensus_token(&*store, &v)?;
        if self_bonded.raw < self.params.min_self_delegation as u128 {
            info!(validator = %validator, self_bonded = %self_bonded, "self-delegation below minimum");
            self.jail(store, validator)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerTx;
    use crate::staking::testing::*;

    #[test]
    fn create_requires_matching_operator_key() {
        let engine = engine();
        let mut tx = LedgerTx::default();
        fund(&mut tx, &account(9), 100);
        let err = engine
            .create_validator(&mut tx, &ctx(1), account(9), public_key(1), &gov_amount(100))
            .unwrap_err();
        assert!(matches!(err, StakingError::InvalidInput(_)));
    }

    #[test]
    fn create_enforces_minimum_and_uniqueness() {
        let engine = engine();
        let mut tx = LedgerTx::default();
        fund(&mut tx, &operator(1), 1_000);

        let err = engine
            .create_validator(&mut tx, &ctx(1), operator(1), public_key(1), &gov_amount(49))
            .unwrap_err();
        assert!(matches!(err, StakingError::BelowMinimumSelfDelegation { .. }));

        let v = engine
            .create_validator(&mut tx, &ctx(1), operator(1), public_key(1), &gov_amount(100))
            .unwrap();
        assert_eq!(v.status, BondingStatus::Unbonded);
        assert_eq!(v.delegator_shares, share(100));
        assert_eq!(consensus_of(&tx, &v.address), 100);
        assert_eq!(gov_of(&tx, &keys::UNBONDED_POOL), 100);

        let err = engine
            .create_validator(&mut tx, &ctx(2), operator(1), public_key(1), &gov_amount(100))
            .unwrap_err();
        assert_eq!(err, StakingError::DuplicatedValidator(v.address));
    }

    #[test]
    fn create_rejects_foreign_currency() {
        let engine = engine();
        let mut tx = LedgerTx::default();
        let gold = Amount::new(Currency::new("GOLD", 0), 100);
        let err = engine
            .create_validator(&mut tx, &ctx(1), operator(1), public_key(1), &gold)
            .unwrap_err();
        assert!(matches!(err, StakingError::InvalidCurrency { .. }));
    }

    #[test]
    fn bond_unbond_complete_cycle() {
        let engine = engine();
        let mut tx = LedgerTx::default();
        let v = create_validator(&engine, &mut tx, 1, 1, 100);

        engine.bond_validator(&mut tx, &v).unwrap();
        assert_eq!(gov_of(&tx, &keys::BONDED_POOL), 100);
        assert_eq!(gov_of(&tx, &keys::UNBONDED_POOL), 0);

        engine.unbond_validator(&mut tx, &ctx(5), &v).unwrap();
        let rec = tx.validator_required(&v).unwrap();
        assert_eq!(rec.status, BondingStatus::Unbonding);
        assert_eq!(rec.unbonding_completion_height, 8);
        assert!(tx.unbonding_set().unwrap().validators.contains(&v));
        assert_eq!(gov_of(&tx, &keys::UNBONDED_POOL), 100);

        // second unbond is a no-op
        engine.unbond_validator(&mut tx, &ctx(6), &v).unwrap();
        assert_eq!(tx.validator_required(&v).unwrap().unbonding_completion_height, 8);

        assert!(!engine.complete_validator_unbonding(&mut tx, &ctx(7), &v).unwrap());
        assert!(engine.complete_validator_unbonding(&mut tx, &ctx(8), &v).unwrap());
        assert_eq!(tx.validator_required(&v).unwrap().status, BondingStatus::Unbonded);
        assert!(!tx.unbonding_set().unwrap().validators.contains(&v));
        assert!(!engine.complete_validator_unbonding(&mut tx, &ctx(9), &v).unwrap());
    }

    #[test]
    fn rebonding_cancels_pending_unbonding() {
        let engine = engine();
        let mut tx = LedgerTx::default();
        let v = create_validator(&engine, &mut tx, 1, 1, 100);
        engine.bond_validator(&mut tx, &v).unwrap();
        engine.unbond_validator(&mut tx, &ctx(2), &v).unwrap();
        engine.bond_validator(&mut tx, &v).unwrap();
        assert!(tx.unbonding_set().unwrap().is_empty());
        assert_eq!(gov_of(&tx, &keys::BONDED_POOL), 100);
    }

    #[test]
    fn jail_twice_is_an_error_and_unjail_checks_conditions() {
        let engine = engine();
        let mut tx = LedgerTx::default();
        let v = create_validator(&engine, &mut tx, 1, 1, 100);

        let err = engine.unjail(&mut tx, &ctx(2), &v).unwrap_err();
        assert!(matches!(err, StakingError::InvalidState(_)));

        engine.jail(&mut tx, &v).unwrap();
        assert!(!tx.power_index().unwrap().contains(&v));
        assert_eq!(engine.jail(&mut tx, &v).unwrap_err(), StakingError::JailedValidator(v));

        let mut info = tx.signing_info(&v).unwrap().unwrap();
        info.jailed_until = 10;
        tx.set_signing_info(&info).unwrap();
        assert!(engine.unjail(&mut tx, &ctx(9), &v).is_err());
        engine.unjail(&mut tx, &ctx(10), &v).unwrap();
        assert!(tx.power_index().unwrap().contains(&v));
    }

    #[test]
    fn tombstoned_validator_cannot_unjail() {
        let engine = engine();
        let mut tx = LedgerTx::default();
        let v = create_validator(&engine, &mut tx, 1, 1, 100);
        engine.jail(&mut tx, &v).unwrap();
        let mut info = tx.signing_info(&v).unwrap().unwrap();
        info.tombstoned = true;
        tx.set_signing_info(&info).unwrap();
        assert!(matches!(engine.unjail(&mut tx, &ctx(50), &v), Err(StakingError::InvalidState(_))));
    }
}
