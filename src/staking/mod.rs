//! Staking state machine: validators, delegations, unbonding, rewards, slashing.
//!
//! Основано на проверяемых практиках:
//! - Цена доли пула и bootstrap 1:1 (Cosmos SDK x/staking).
//! - Slashing применим к незавершённым unbonding/redelegation-записям, созданным
//!   после проступка (Cosmos SDK x/staking, x/slashing).
//! - Ленивое начисление наград через цепочку чекпоинтов на валидатор.
//!
//! Хранилище передаётся в каждую операцию явно (`&mut S where S: StateStore`);
//! атомарность обеспечивает вызывающий слой (`LedgerTx`, см. `actions`).

pub mod allocator;
pub(crate) mod bond;
pub mod delegation;
pub mod params;
pub mod pool;
pub mod power_index;
pub mod redelegation;
pub mod rewards;
pub mod signing;
pub mod slashing;
pub mod unbonding_set;
pub mod undelegation;
pub mod validator;

use crate::error::Result;
use crate::types::{Address, PublicKey};

pub use params::{Ratio, StakingParams};

/// Флаг голоса в финализированном коммите блока.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteFlag {
    /// Validator did not vote.
    Null,
    PreVote,
    PreCommit,
    Unknown,
}

impl VoteFlag {
    /// Counts as participation for rewards.
    pub fn is_participating(&self) -> bool {
        matches!(self, VoteFlag::PreVote | VoteFlag::PreCommit)
    }
}

/// One entry of the previous block's commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteInfo {
    pub validator_public_key: PublicKey,
    pub vote_power: u128,
    pub flag: VoteFlag,
}

/// Execution context supplied by the block driver.
#[derive(Clone, Debug, Default)]
pub struct BlockContext {
    pub height: i64,
    /// Operator address of the block proposer.
    pub proposer: Option<Address>,
    /// Finalized votes of the previous block.
    pub last_commit: Vec<VoteInfo>,
}

impl BlockContext {
    pub fn at(height: i64) -> Self {
        Self { height, ..Self::default() }
    }
}

/// Движок стейкинга. Хранит только параметры; состояние всегда передаётся явно.
#[derive(Clone, Debug)]
pub struct StakingEngine {
    params: StakingParams,
}

impl StakingEngine {
    pub fn new(params: StakingParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &StakingParams {
        &self.params
    }
}
