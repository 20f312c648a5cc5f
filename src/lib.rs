//! Aethernova staking: delegation, unbonding, lump-sum rewards and slashing.
//!
//! Детерминированная машина состояний поверх `StateStore`. Действия
//! выполняются по одному внутри `LedgerTx` (см. `actions`), хуки блока
//! вызываются драйвером консенсуса в начале и в конце каждого блока.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod actions;
pub mod config;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod repository;
pub mod staking;
pub mod telemetry;
pub mod types;

pub use actions::{transact, Action};
pub use error::{Result, StakingError};
pub use ledger::{Ledger, LedgerTx, StateStore};
pub use repository::DelegationRepository;
pub use staking::{BlockContext, StakingEngine, StakingParams, VoteFlag, VoteInfo};
pub use types::{Address, Amount, Currency, PublicKey};
