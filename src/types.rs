//! Базовые типы: адреса, ключи операторов, валюты и типизированные суммы.
//!
//! Все денежные величины представлены как `Amount { currency, raw }`. Арифметика между разными
//! валютами запрещена и сразу возвращает `InvalidCurrency`.

use std::fmt::{Debug, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StakingError};

/// Размер адреса в байтах.
pub const ADDRESS_LEN: usize = 20;

/// Размер публичного ключа оператора (сжатый secp256k1).
pub const PUBLIC_KEY_LEN: usize = 33;

/// Адрес аккаунта или записи состояния (20 байт).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Reserved module account `0x00…00NN`.
    pub const fn reserved(tag: u8) -> Self {
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes[ADDRESS_LEN - 1] = tag;
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Last 20 bytes of `blake3(bytes)`.
    pub(crate) fn from_digest(bytes: &[u8]) -> Self {
        let digest = blake3::hash(bytes);
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&digest.as_bytes()[32 - ADDRESS_LEN..]);
        Self(out)
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(v: [u8; ADDRESS_LEN]) -> Self {
        Address::new(v)
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Публичный ключ оператора валидатора. Подписи здесь не проверяются.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub const fn new(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Operator account controlled by this key.
    pub fn address(&self) -> Address {
        crate::keys::operator_address(self)
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Валюта (тикер + число знаков после запятой).
#[derive(
    Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct Currency {
    pub ticker: String,
    pub decimal_places: u8,
}

impl Currency {
    pub fn new(ticker: impl Into<String>, decimal_places: u8) -> Self {
        Self { ticker: ticker.into(), decimal_places }
    }

    /// Pool-internal representation of bonded governance token.
    pub fn consensus_token() -> Self {
        Self::new("CONSENSUS", 18)
    }

    /// Abstract claim on a validator pool.
    pub fn share() -> Self {
        Self::new("SHARE", 18)
    }
}

impl Debug for Currency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.ticker, self.decimal_places)
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.ticker)
    }
}

/// Типизированная сумма в минимальных единицах.
#[derive(Clone, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct Amount {
    pub currency: Currency,
    pub raw: u128,
}

impl Amount {
    pub fn new(currency: Currency, raw: u128) -> Self {
        Self { currency, raw }
    }

    pub fn zero(currency: Currency) -> Self {
        Self { currency, raw: 0 }
    }

    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }

    pub fn ensure_currency(&self, expected: &Currency) -> Result<()> {
        if &self.currency != expected {
            return Err(StakingError::InvalidCurrency {
                expected: expected.clone(),
                actual: self.currency.clone(),
            });
        }
        Ok(())
    }

    pub fn checked_add(&self, other: &Amount) -> Result<Amount> {
        other.ensure_currency(&self.currency)?;
        let raw = self.raw.checked_add(other.raw).ok_or(StakingError::Overflow)?;
        Ok(Amount::new(self.currency.clone(), raw))
    }

    pub fn checked_sub(&self, other: &Amount) -> Result<Amount> {
        other.ensure_currency(&self.currency)?;
        let raw = self.raw.checked_sub(other.raw).ok_or(StakingError::Overflow)?;
        Ok(Amount::new(self.currency.clone(), raw))
    }

    /// Subtraction clamped at zero.
    pub fn saturating_sub(&self, other: &Amount) -> Result<Amount> {
        other.ensure_currency(&self.currency)?;
        Ok(Amount::new(self.currency.clone(), self.raw.saturating_sub(other.raw)))
    }

    pub fn min(&self, other: &Amount) -> Result<Amount> {
        other.ensure_currency(&self.currency)?;
        Ok(Amount::new(self.currency.clone(), self.raw.min(other.raw)))
    }

    /// `self * num / den`, остаток отбрасывается.
    pub fn mul_div(&self, num: u128, den: u128) -> Result<Amount> {
        Ok(Amount::new(self.currency.clone(), mul_div(self.raw, num, den)?))
    }

    /// Same raw value under another currency (governance <-> consensus token).
    pub fn convert(&self, to: &Currency) -> Amount {
        Amount::new(to.clone(), self.raw)
    }
}

impl Debug for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.raw, self.currency.ticker)
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.raw, self.currency.ticker)
    }
}

/// `a * b / div` с проверкой переполнения; деление на ноль есть нарушение инварианта.
pub fn mul_div(a: u128, b: u128, div: u128) -> Result<u128> {
    if div == 0 {
        return Err(StakingError::invariant("division by zero"));
    }
    Ok(a.checked_mul(b).ok_or(StakingError::Overflow)? / div)
}
