//! Slashing: штраф валидатора с каскадом в незавершённые unbonding-записи.
//!
//! `slash_factor` является делителем, штраф = power / factor. Запись под риском, если
//! она создана на высоте проступка или позже и ещё не созрела. Остаток штрафа
//! после записей списывается с consensus token самого валидатора.

use borsh::{BorshDeserialize, BorshSerialize};
use tracing::{info, warn};

use super::delegation::Delegator;
use super::redelegation::{Redelegation, RedelegationEntry};
use super::undelegation::{Undelegation, UndelegationEntry};
use super::validator::{consensus_token_of, BondingStatus, Delegatee, Validator};
use super::{bond, power_index, BlockContext, StakingEngine};
use crate::error::{Result, StakingError};
use crate::keys;
use crate::ledger::StateStore;
use crate::repository::DelegationRepository;
use crate::types::{Address, Amount, Currency};

#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum SlashReason {
    DoubleSign,
    Downtime,
}

/// Доказательство двойной подписи.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Evidence {
    pub validator_address: Address,
    pub height: i64,
    pub voting_power: u128,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct EvidenceQueue {
    pub items: Vec<Evidence>,
}

/// Burned consensus token, by source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlashOutcome {
    pub penalty: u128,
    pub from_undelegations: u128,
    pub from_redelegations: u128,
    pub from_validator: u128,
}

impl SlashOutcome {
    pub fn total_burned(&self) -> u128 {
        self.from_undelegations
            .saturating_add(self.from_redelegations)
            .saturating_add(self.from_validator)
    }
}

fn at_risk(creation_height: i64, completion_height: i64, infraction_height: i64, now: i64) -> bool {
    creation_height >= infraction_height && now < completion_height
}

/// Slash one undelegation entry. Returns the updated entry, the amount counted
/// against the penalty and the amount actually burned.
fn slash_undelegation_entry(
    entry: &UndelegationEntry,
    infraction_height: i64,
    now: i64,
    factor: u64,
) -> (UndelegationEntry, u128, u128) {
    if !at_risk(entry.creation_height, entry.completion_height, infraction_height, now) {
        return (entry.clone(), 0, 0);
    }
    let counted = entry.initial_consensus_token.raw / factor as u128;
    let burned = counted.min(entry.unbonding_consensus_token.raw);
    let mut slashed = entry.clone();
    slashed.unbonding_consensus_token.raw -= burned;
    (slashed, counted, burned)
}

/// Amount counted against the penalty and shares to claw back at the destination.
fn redelegation_entry_slash(entry: &RedelegationEntry, infraction_height: i64, now: i64, factor: u64) -> (u128, u128) {
    if !at_risk(entry.creation_height, entry.completion_height, infraction_height, now) {
        return (0, 0);
    }
    (
        entry.unbonding_consensus_token.raw / factor as u128,
        entry.issued_dst_share.raw / factor as u128,
    )
}

impl StakingEngine {
    /// Сжечь `power / factor` consensus token валидатора и его незавершённых записей.
    pub fn slash<S: StateStore>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        validator: &Address,
        infraction_height: i64,
        power: u128,
        factor: u64,
    ) -> Result<SlashOutcome> {
        if factor == 0 {
            return Err(StakingError::invariant("slash factor must be a positive divisor"));
        }
        if infraction_height > ctx.height {
            return Err(StakingError::InvalidInput(format!(
                "infraction at {infraction_height} is in the future of {}",
                ctx.height
            )));
        }
        let v = store.validator_required(validator)?;
        if v.status == BondingStatus::Unbonded {
            return Err(StakingError::InvalidState(format!("validator {validator} is already unbonded")));
        }

        let mut outcome = SlashOutcome { penalty: power / factor as u128, ..SlashOutcome::default() };
        let mut remaining = outcome.penalty;

        if infraction_height < ctx.height {
            let set = store.unbonding_set()?;
            for address in &set.undelegations {
                let Some(bucket) = store.undelegation(address)? else { continue };
                if &bucket.validator_address != validator {
                    continue;
                }
                let (counted, burned) = self.slash_undelegation(store, ctx, bucket, infraction_height, factor)?;
                remaining = remaining.saturating_sub(counted);
                outcome.from_undelegations = outcome.from_undelegations.checked_add(burned).ok_or(StakingError::Overflow)?;
            }
            for address in &set.redelegations {
                let Some(bucket) = store.redelegation(address)? else { continue };
                if &bucket.src_validator_address != validator {
                    continue;
                }
                let (counted, burned) = self.slash_redelegation(store, ctx, bucket, infraction_height, factor)?;
                remaining = remaining.saturating_sub(counted);
                outcome.from_redelegations = outcome.from_redelegations.checked_add(burned).ok_or(StakingError::Overflow)?;
            }
        }

        // статус мог измениться только у других валидаторов
        let v = store.validator_required(validator)?;
        let balance = consensus_token_of(&*store, validator);
        let burn = Amount::new(Currency::consensus_token(), remaining.min(balance.raw));
        store.burn_asset(validator, &burn)?;
        store.burn_asset(&v.pool_address(), &burn.convert(&self.params.governance_token))?;
        power_index::refresh(store, &v)?;
        outcome.from_validator = burn.raw;

        info!(
            validator = %validator,
            infraction_height,
            height = ctx.height,
            penalty = outcome.penalty,
            burned = outcome.total_burned(),
            "validator slashed"
        );
        Ok(outcome)
    }

    fn slash_undelegation<S: StateStore>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        mut bucket: Undelegation,
        infraction_height: i64,
        factor: u64,
    ) -> Result<(u128, u128)> {
        let (entries, counted, burned) = bucket.entries.iter().try_fold(
            (Vec::with_capacity(bucket.entries.len()), 0u128, 0u128),
            |(mut entries, counted, burned), entry| {
                let (slashed, c, b) = slash_undelegation_entry(entry, infraction_height, ctx.height, factor);
                entries.push(slashed);
                Ok::<_, StakingError>((
                    entries,
                    counted.checked_add(c).ok_or(StakingError::Overflow)?,
                    burned.checked_add(b).ok_or(StakingError::Overflow)?,
                ))
            },
        )?;
        if counted == 0 {
            return Ok((0, 0));
        }
        bucket.entries = entries;
        store.set_undelegation(&bucket)?;
        let gov = Amount::new(self.params.governance_token.clone(), burned);
        store.burn_asset(&keys::UNBONDED_POOL, &gov)?;
        Ok((counted, burned))
    }

    fn slash_redelegation<S: StateStore>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        mut bucket: Redelegation,
        infraction_height: i64,
        factor: u64,
    ) -> Result<(u128, u128)> {
        let dst = bucket.dst_validator_address;
        let delegation_address = keys::delegation_address(&bucket.delegator_address, &dst);
        let mut counted = 0u128;
        let mut burned = 0u128;
        let mut changed = false;

        for i in 0..bucket.entries.len() {
            let (c, wanted) = redelegation_entry_slash(&bucket.entries[i], infraction_height, ctx.height, factor);
            counted = counted.checked_add(c).ok_or(StakingError::Overflow)?;
            if wanted == 0 {
                continue;
            }
            let Some(mut delegation) = store.delegation(&delegation_address)? else { continue };
            let held = delegation.shares(&*store);
            let share = Amount::new(Currency::share(), wanted.min(held.raw));
            if share.is_zero() {
                continue;
            }

            self.settle_rewards(store, ctx, &mut delegation)?;
            let mut dst_v: Validator = store.validator_required(&dst)?;
            let token = bond::cancel(store, &mut dst_v, &delegation, &share)?;
            store.burn_asset(&dst_v.pool_address(), &token.convert(&self.params.governance_token))?;
            self.checkpoint_rewards(store, ctx, &dst_v)?;

            let entry = &mut bucket.entries[i];
            entry.issued_dst_share = entry.issued_dst_share.saturating_sub(&share)?;
            burned = burned.checked_add(token.raw).ok_or(StakingError::Overflow)?;
            changed = true;
        }
        if changed {
            store.set_redelegation(&bucket)?;
        }
        Ok((counted, burned))
    }

    /// Slash с последствиями по причине: jail, а для двойной подписи ещё и tombstone.
    pub fn slash_with_reason<S: StateStore>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        validator: &Address,
        infraction_height: i64,
        power: u128,
        reason: SlashReason,
    ) -> Result<SlashOutcome> {
        let mut info = store
            .signing_info(validator)?
            .ok_or_else(|| StakingError::not_found("signing info", *validator))?;
        if info.tombstoned {
            return Err(StakingError::InvalidState(format!("validator {validator} is tombstoned")));
        }
        let factor = match reason {
            SlashReason::DoubleSign => self.params.double_sign_slash_factor,
            SlashReason::Downtime => self.params.downtime_slash_factor,
        };
        let outcome = self.slash(store, ctx, validator, infraction_height, power, factor)?;

        if !store.validator_required(validator)?.jailed {
            self.jail(store, validator)?;
        }
        // slash/jail do not touch signing info
        match reason {
            SlashReason::DoubleSign => {
                info.tombstoned = true;
                info.jailed_until = i64::MAX;
            }
            SlashReason::Downtime => {
                info.jailed_until = ctx.height + self.params.downtime_jail_duration;
            }
        }
        store.set_signing_info(&info)?;
        warn!(validator = %validator, reason = ?reason, jailed_until = info.jailed_until, "validator punished");
        Ok(outcome)
    }

    /// Поставить доказательство в очередь; обрабатывается в begin block.
    pub fn submit_evidence<S: StateStore>(&self, store: &mut S, ctx: &BlockContext, evidence: Evidence) -> Result<()> {
        if evidence.height > ctx.height || evidence.height < 0 {
            return Err(StakingError::InvalidInput(format!(
                "evidence height {} outside [0, {}]",
                evidence.height, ctx.height
            )));
        }
        store.validator_required(&evidence.validator_address)?;
        let mut queue = store.evidence_queue()?;
        if queue.items.contains(&evidence) {
            return Ok(());
        }
        info!(validator = %evidence.validator_address, height = evidence.height, "evidence submitted");
        queue.items.push(evidence);
        store.set_evidence_queue(&queue)
    }

    /// Разобрать очередь доказательств. Возвращает число применённых.
    pub fn process_evidence<S: StateStore>(&self, store: &mut S, ctx: &BlockContext) -> Result<usize> {
        let queue = store.evidence_queue()?;
        if queue.items.is_empty() {
            return Ok(0);
        }
        let mut applied = 0;
        for ev in &queue.items {
            let addr = ev.validator_address;
            if ctx.height - ev.height > self.params.max_evidence_age {
                warn!(validator = %addr, height = ev.height, "evidence too old, dropped");
                continue;
            }
            let Some(v) = store.validator(&addr)? else {
                warn!(validator = %addr, "evidence for unknown validator, dropped");
                continue;
            };
            let tombstoned = store.signing_info(&addr)?.map(|i| i.tombstoned).unwrap_or(false);
            if tombstoned || v.status == BondingStatus::Unbonded {
                warn!(validator = %addr, tombstoned, status = ?v.status, "evidence for inactive validator, dropped");
                continue;
            }
            let infraction_height = (ev.height - self.params.validator_update_delay).max(0);
            self.slash_with_reason(store, ctx, &addr, infraction_height, ev.voting_power, SlashReason::DoubleSign)?;
            applied += 1;
        }
        store.set_evidence_queue(&EvidenceQueue::default())?;
        Ok(applied)
    }
}
