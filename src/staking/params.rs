//! Протокольные параметры стейкинга.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StakingError};
use crate::types::Currency;

/// Дробь `numerator / denominator`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratio {
    pub numerator: u64,
    pub denominator: u64,
}

impl Ratio {
    pub const fn new(numerator: u64, denominator: u64) -> Self {
        Self { numerator, denominator }
    }

    pub fn apply(&self, raw: u128) -> Result<u128> {
        crate::types::mul_div(raw, self.numerator as u128, self.denominator as u128)
    }

    fn is_proper(&self) -> bool {
        self.denominator > 0 && self.numerator <= self.denominator
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StakingParams {
    /// Токен, который пользователи держат и делегируют.
    pub governance_token: Currency,
    /// Валюты, в которых распределяются награды.
    pub reward_currencies: Vec<Currency>,
    /// Длина периода unbonding в блоках.
    pub unbonding_period: i64,
    pub max_undelegation_entries: u32,
    pub max_redelegation_entries: u32,
    /// Минимальный self-bond оператора (raw consensus token).
    pub min_self_delegation: u64,
    /// Размер активного сета.
    pub max_validators: u32,
    pub signed_blocks_window: i64,
    pub min_signed_per_window: i64,
    pub downtime_jail_duration: i64,
    /// Блоков между изменением сета и вступлением его в силу.
    pub validator_update_delay: i64,
    /// Evidence older than this many blocks is dropped.
    pub max_evidence_age: i64,
    /// Делитель (не доля): штраф = power / factor.
    pub double_sign_slash_factor: u64,
    pub downtime_slash_factor: u64,
    pub base_proposer_reward: Ratio,
    pub bonus_proposer_reward: Ratio,
    pub commission: Ratio,
}

impl Default for StakingParams {
    fn default() -> Self {
        let gov = Currency::new("AEN", 2);
        Self {
            reward_currencies: vec![gov.clone()],
            governance_token: gov,
            unbonding_period: 50_400,
            max_undelegation_entries: 10,
            max_redelegation_entries: 10,
            min_self_delegation: 1_000_000,
            max_validators: 100,
            signed_blocks_window: 10_000,
            min_signed_per_window: 500,
            downtime_jail_duration: 600,
            validator_update_delay: 1,
            max_evidence_age: 100_800,
            double_sign_slash_factor: 20,
            downtime_slash_factor: 100,
            base_proposer_reward: Ratio::new(1, 100),
            bonus_proposer_reward: Ratio::new(4, 100),
            commission: Ratio::new(10, 100),
        }
    }
}

impl StakingParams {
    pub fn validate(&self) -> Result<()> {
        let bad = |what: &str| Err(StakingError::InvalidInput(format!("staking params: {what}")));

        if self.unbonding_period <= 0 {
            return bad("unbonding_period must be positive");
        }
        if self.max_undelegation_entries == 0 || self.max_redelegation_entries == 0 {
            return bad("entry ceilings must be non-zero");
        }
        if self.max_validators == 0 {
            return bad("max_validators must be non-zero");
        }
        if self.signed_blocks_window <= 0
            || self.min_signed_per_window < 0
            || self.min_signed_per_window > self.signed_blocks_window
        {
            return bad("min_signed_per_window must lie within the signed blocks window");
        }
        if self.downtime_jail_duration < 0 || self.validator_update_delay < 0 || self.max_evidence_age < 0 {
            return bad("durations must not be negative");
        }
        if self.double_sign_slash_factor == 0 || self.downtime_slash_factor == 0 {
            return bad("slash factors are divisors and must be non-zero");
        }
        for (name, r) in [
            ("base_proposer_reward", self.base_proposer_reward),
            ("bonus_proposer_reward", self.bonus_proposer_reward),
            ("commission", self.commission),
        ] {
            if !r.is_proper() {
                return bad(&format!("{name} must be a ratio within [0, 1]"));
            }
        }
        // base + bonus <= 1
        let lhs = self.base_proposer_reward.numerator as u128 * self.bonus_proposer_reward.denominator as u128
            + self.bonus_proposer_reward.numerator as u128 * self.base_proposer_reward.denominator as u128;
        let rhs = self.base_proposer_reward.denominator as u128 * self.bonus_proposer_reward.denominator as u128;
        if lhs > rhs {
            return bad("base and bonus proposer rewards exceed the whole pool");
        }
        if self.reward_currencies.is_empty() {
            return bad("at least one reward currency is required");
        }
        Ok(())
    }
}
