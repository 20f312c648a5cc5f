//! Единый тип ошибок стейкинга.
//!
//! Любая ошибка прерывает всю операцию целиком: вызывающий слой выполняет
//! операцию внутри `LedgerTx` и просто отбрасывает его при `Err`.

use thiserror::Error;

use crate::types::{Address, Amount, Currency};

/// Staking error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StakingError {
    /// A record looked up by its derived address does not exist.
    #[error("{kind} not found at {address}")]
    NotFound {
        kind: &'static str,
        address: Address,
    },

    /// An amount tagged with the wrong currency.
    #[error("invalid currency: expected {expected}, got {actual}")]
    InvalidCurrency { expected: Currency, actual: Currency },

    /// Spendable balance or share balance too low.
    #[error("insufficient funds at {address}: required {required}, available {available}")]
    InsufficientFunds {
        address: Address,
        required: Amount,
        available: Amount,
    },

    /// Undelegation or redelegation bucket is full.
    #[error("{kind} {address} already holds the maximum of {max} entries")]
    CapacityExceeded {
        kind: &'static str,
        address: Address,
        max: u32,
    },

    #[error("validator {0} already exists")]
    DuplicatedValidator(Address),

    #[error("validator {0} is already jailed")]
    JailedValidator(Address),

    #[error("self-delegation {actual} is below the minimum of {required}")]
    BelowMinimumSelfDelegation { required: Amount, actual: Amount },

    /// Operation attempted against a record in the wrong state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Malformed caller input (future infraction height, operator key mismatch, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Pool or reward-chain corruption. Never recoverable inside a transition.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("arithmetic overflow")]
    Overflow,

    #[error("codec error: {0}")]
    Codec(String),
}

impl StakingError {
    pub(crate) fn not_found(kind: &'static str, address: Address) -> Self {
        Self::NotFound { kind, address }
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}

impl From<std::io::Error> for StakingError {
    fn from(e: std::io::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

/// Результат операций стейкинга.
pub type Result<T, E = StakingError> = std::result::Result<T, E>;
