//! Lump-sum награды: цепочка чекпоинтов на валидатор.
//!
//! У каждого валидатора есть рабочая (WIP) запись по sentinel-адресу и
//! закрытые записи по адресу, выведенному из их `start_height`. Закрытые записи
//! неизменяемы и связаны назад через `last_start_height`.
//!
//! Делегации причитается каждая запись с `start_height >= latest_distribute_height`,
//! по формуле `accumulated * shares / total_shares` (остаток остаётся в vault).
//! Баланс долей делегации постоянен между двумя расчётами: любое изменение
//! долей сначала рассчитывает награды.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};
use tracing::{debug, warn};

use super::delegation::{Delegation, Delegator};
use super::validator::Validator;
use super::{BlockContext, StakingEngine};
use crate::error::{Result, StakingError};
use crate::keys;
use crate::ledger::StateStore;
use crate::repository::DelegationRepository;
use crate::types::{mul_div, Address, Amount, Currency};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct LumpSumRewardsRecord {
    /// Validator the chain belongs to.
    pub address: Address,
    pub start_height: i64,
    /// Validator shares when the record was opened.
    pub total_shares: Amount,
    pub accumulated: BTreeMap<Currency, u128>,
    pub last_start_height: Option<i64>,
}

impl LumpSumRewardsRecord {
    fn open(validator: &Validator, start_height: i64, last_start_height: Option<i64>) -> Self {
        Self {
            address: validator.address,
            start_height,
            total_shares: validator.delegator_shares.clone(),
            accumulated: BTreeMap::new(),
            last_start_height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.accumulated.values().all(|v| *v == 0)
    }

    pub fn accumulated_of(&self, currency: &Currency) -> Amount {
        Amount::new(currency.clone(), self.accumulated.get(currency).copied().unwrap_or(0))
    }

    fn portion(&self, currency: &Currency, shares: &Amount) -> Result<u128> {
        if self.total_shares.is_zero() {
            return Ok(0);
        }
        mul_div(self.accumulated_of(currency).raw, shares.raw, self.total_shares.raw)
    }
}

/// Закрыть WIP-запись под её высотой и открыть новую с текущим снимком долей.
fn close_and_reopen<S: StateStore>(
    store: &mut S,
    wip: &LumpSumRewardsRecord,
    validator: &Validator,
    height: i64,
) -> Result<()> {
    if wip.start_height >= height {
        return Err(StakingError::invariant(format!(
            "rewards record of {} started at {} cannot be closed at {height}",
            validator.address, wip.start_height
        )));
    }
    if store.closed_rewards_record(&validator.address, wip.start_height)?.is_some() {
        return Err(StakingError::invariant(format!(
            "rewards record of {} at {} is already closed",
            validator.address, wip.start_height
        )));
    }
    store.set_closed_rewards_record(wip)?;
    store.set_current_rewards_record(&LumpSumRewardsRecord::open(validator, height, Some(wip.start_height)))
}

impl StakingEngine {
    /// Перенести свежие награды из reward pool валидатора в его цепочку.
    ///
    /// If the WIP record was opened at this very height the collection is
    /// deferred to the next block, so that every closed record spans at least
    /// one block.
    pub fn collect_rewards<S: StateStore>(&self, store: &mut S, ctx: &BlockContext, validator: &Address) -> Result<()> {
        let v = store.validator_required(validator)?;
        let Some(mut wip) = store.current_rewards_record(validator)? else {
            warn!(validator = %validator, "validator has no rewards record, opening one");
            return store.set_current_rewards_record(&LumpSumRewardsRecord::open(&v, ctx.height, None));
        };
        if wip.start_height == ctx.height {
            return Ok(());
        }

        let pool = keys::reward_pool_address(validator);
        let vault = keys::reward_vault_address(validator);
        let mut fresh = false;
        for currency in &self.params.reward_currencies {
            let amount = store.balance(&pool, currency);
            if amount.is_zero() {
                continue;
            }
            store.transfer_asset(&pool, &vault, &amount)?;
            let acc = wip.accumulated.entry(currency.clone()).or_insert(0);
            *acc = acc.checked_add(amount.raw).ok_or(StakingError::Overflow)?;
            fresh = true;
        }
        if !fresh {
            return Ok(());
        }

        debug!(
            validator = %validator,
            start_height = wip.start_height,
            height = ctx.height,
            "rewards collected"
        );
        close_and_reopen(store, &wip, &v, ctx.height)
    }

    /// Обновить снимок долей после операции, изменившей доли валидатора.
    pub(crate) fn checkpoint_rewards<S: StateStore>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        validator: &Validator,
    ) -> Result<()> {
        let last_start_height = match store.current_rewards_record(&validator.address)? {
            None => None,
            // collect_rewards закрывает каждую заполненную запись
            Some(wip) if !wip.is_empty() => {
                return Err(StakingError::invariant(format!(
                    "rewards record of {} at {} holds uncollected rewards",
                    validator.address, wip.start_height
                )));
            }
            Some(wip) => wip.last_start_height,
        };
        // пустую запись можно сдвинуть без потери истории
        store.set_current_rewards_record(&LumpSumRewardsRecord::open(validator, ctx.height, last_start_height))
    }

    /// Причитающаяся делегации награда в `currency` с её watermark.
    pub fn get_reward<S: StateStore, D: Delegator>(&self, store: &S, delegation: &D, currency: &Currency) -> Result<Amount> {
        let validator = delegation.delegatee_address();
        let watermark = delegation.latest_distribute_height();
        let shares = delegation.shares(store);
        let mut total = Amount::zero(currency.clone());

        let Some(wip) = store.current_rewards_record(&validator)? else {
            return Ok(total);
        };
        if wip.start_height < watermark {
            return Ok(total);
        }
        total.raw = wip.portion(currency, &shares)?;

        let mut next_start = wip.start_height;
        let mut cursor = wip.last_start_height;
        while let Some(height) = cursor {
            if height < watermark {
                break;
            }
            let record = store.closed_rewards_record(&validator, height)?.ok_or_else(|| {
                StakingError::invariant(format!("rewards record of {validator} at {height} is missing"))
            })?;
            if record.start_height != height || record.start_height >= next_start || record.address != validator {
                return Err(StakingError::invariant(format!(
                    "rewards chain of {validator} is broken at {height}"
                )));
            }
            total.raw = total
                .raw
                .checked_add(record.portion(currency, &shares)?)
                .ok_or(StakingError::Overflow)?;
            next_start = record.start_height;
            cursor = record.last_start_height;
        }
        Ok(total)
    }

    /// Выплатить всё причитающееся и сдвинуть watermark на текущую высоту.
    pub(crate) fn settle_rewards<S: StateStore>(
        &self,
        store: &mut S,
        ctx: &BlockContext,
        delegation: &mut Delegation,
    ) -> Result<Vec<Amount>> {
        let vault = keys::reward_vault_address(&delegation.validator_address);
        let mut paid = Vec::new();
        for currency in &self.params.reward_currencies {
            let reward = self.get_reward(&*store, &*delegation, currency)?;
            if reward.is_zero() {
                continue;
            }
            store
                .transfer_asset(&vault, &delegation.delegator_address, &reward)
                .map_err(|e| StakingError::invariant(format!("reward vault cannot cover payout: {e}")))?;
            paid.push(reward);
        }
        delegation.latest_distribute_height = ctx.height;
        store.set_delegation(delegation)?;
        if !paid.is_empty() {
            debug!(
                delegator = %delegation.delegator_address,
                validator = %delegation.validator_address,
                paid = ?paid,
                "rewards settled"
            );
        }
        Ok(paid)
    }
}
