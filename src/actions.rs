//! Действия над стейкингом и хуки блока.
//!
//! Каждое действие выполняется в собственном `LedgerTx` и фиксируется только
//! при успехе: ошибка оставляет состояние нетронутым.

use tracing::{debug, warn};

use crate::error::Result;
use crate::ledger::{CommitReceipt, Ledger, LedgerTx, StateStore};
use crate::repository::DelegationRepository;
use crate::staking::power_index::ValidatorUpdate;
use crate::staking::slashing::{Evidence, SlashReason};
use crate::staking::{BlockContext, StakingEngine};
use crate::types::{Address, Amount, PublicKey};

/// Caller-facing staking operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    CreateValidator { operator: Address, public_key: PublicKey, self_delegation: Amount },
    Delegate { delegator: Address, validator: Address, amount: Amount },
    Undelegate { delegator: Address, validator: Address, share: Amount },
    Redelegate { delegator: Address, src: Address, dst: Address, share: Amount },
    CancelUndelegation { delegator: Address, validator: Address, amount: Amount },
    ClaimReward { delegator: Address, validator: Address },
    ClaimValidatorReward { operator: Address },
    Jail { validator: Address },
    Unjail { validator: Address },
    Slash { validator: Address, infraction_height: i64, power: u128, factor: u64 },
    SlashWithReason { validator: Address, infraction_height: i64, power: u128, reason: SlashReason },
    SubmitEvidence(Evidence),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::CreateValidator { .. } => "create_validator",
            Action::Delegate { .. } => "delegate",
            Action::Undelegate { .. } => "undelegate",
            Action::Redelegate { .. } => "redelegate",
            Action::CancelUndelegation { .. } => "cancel_undelegation",
            Action::ClaimReward { .. } => "claim_reward",
            Action::ClaimValidatorReward { .. } => "claim_validator_reward",
            Action::Jail { .. } => "jail",
            Action::Unjail { .. } => "unjail",
            Action::Slash { .. } => "slash",
            Action::SlashWithReason { .. } => "slash_with_reason",
            Action::SubmitEvidence(_) => "submit_evidence",
        }
    }
}

/// Run `f` in a fresh transaction; commit on `Ok`, discard on `Err`.
pub fn transact<T>(ledger: &mut Ledger, f: impl FnOnce(&mut LedgerTx) -> Result<T>) -> Result<(T, CommitReceipt)> {
    let mut tx = ledger.begin();
    let value = f(&mut tx)?;
    Ok((value, ledger.commit(tx)))
}

impl StakingEngine {
    /// Apply one action to any store. No atomicity on its own; see `execute`.
    pub fn apply<S: StateStore>(&self, store: &mut S, ctx: &BlockContext, action: Action) -> Result<()> {
        match action {
            Action::CreateValidator { operator, public_key, self_delegation } => {
                self.create_validator(store, ctx, operator, public_key, &self_delegation)?;
            }
            Action::Delegate { delegator, validator, amount } => {
                self.delegate(store, ctx, delegator, validator, &amount)?;
            }
            Action::Undelegate { delegator, validator, share } => {
                self.undelegate(store, ctx, delegator, validator, &share)?;
            }
            Action::Redelegate { delegator, src, dst, share } => {
                self.redelegate(store, ctx, delegator, src, dst, &share)?;
            }
            Action::CancelUndelegation { delegator, validator, amount } => {
                self.cancel_undelegation(store, ctx, delegator, validator, &amount)?;
            }
            Action::ClaimReward { delegator, validator } => {
                self.claim_reward(store, ctx, delegator, validator)?;
            }
            Action::ClaimValidatorReward { operator } => {
                self.claim_validator_reward(store, operator)?;
            }
            Action::Jail { validator } => self.jail(store, &validator)?,
            Action::Unjail { validator } => self.unjail(store, ctx, &validator)?,
            Action::Slash { validator, infraction_height, power, factor } => {
                self.slash(store, ctx, &validator, infraction_height, power, factor)?;
            }
            Action::SlashWithReason { validator, infraction_height, power, reason } => {
                self.slash_with_reason(store, ctx, &validator, infraction_height, power, reason)?;
            }
            Action::SubmitEvidence(evidence) => self.submit_evidence(store, ctx, evidence)?,
        }
        Ok(())
    }

    /// Apply `action` atomically against the ledger.
    pub fn execute(&self, ledger: &mut Ledger, ctx: &BlockContext, action: Action) -> Result<CommitReceipt> {
        let name = action.name();
        match transact(ledger, |tx| self.apply(tx, ctx, action)) {
            Ok(((), receipt)) => {
                debug!(action = name, height = ctx.height, writes = receipt.writes, "action committed");
                Ok(receipt)
            }
            Err(e) => {
                warn!(action = name, height = ctx.height, error = %e, "action rejected");
                Err(e)
            }
        }
    }

    /// Начало блока: награды, сборы в цепочки, подписи, доказательства.
    pub fn begin_block<S: StateStore>(&self, store: &mut S, ctx: &BlockContext) -> Result<()> {
        // jailed or departed validators still earn for the block they signed
        let mut validators = self.allocate_reward(store, ctx)?;
        validators.extend(store.power_index()?.entries().iter().map(|e| e.validator_address));
        validators.extend(store.bonded_set()?.validators.keys().copied());
        for validator in &validators {
            self.collect_rewards(store, ctx, validator)?;
        }

        self.handle_last_commit(store, ctx)?;
        self.process_evidence(store, ctx)?;
        Ok(())
    }

    /// Конец блока: обход Unbonding Set, затем пересчёт активного сета.
    pub fn end_block<S: StateStore>(&self, store: &mut S, ctx: &BlockContext) -> Result<Vec<ValidatorUpdate>> {
        self.complete_unbonding_set(store, ctx)?;
        self.update_validator_set(store, ctx)
    }
}
