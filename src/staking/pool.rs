//! Арифметика пула: цена доли = delegatorShares / consensusToken.
//!
//! Все деления целочисленные, остаток отбрасывается в пользу пула.
//! Обратные функции возвращают `None`, если пул пуст: вызывающий трактует это
//! как «выводить нечего».

use crate::error::{Result, StakingError};
use crate::types::{mul_div, Amount, Currency};

/// Shares issued for `token` consensus token.
///
/// An empty pool issues shares 1:1. A pool with shares but no consensus token
/// is corrupt and yields `InvariantViolation`.
pub fn share_from_consensus_token(total_shares: &Amount, total_token: &Amount, token: &Amount) -> Result<Amount> {
    let share = Currency::share();
    let consensus = Currency::consensus_token();
    total_shares.ensure_currency(&share)?;
    total_token.ensure_currency(&consensus)?;
    token.ensure_currency(&consensus)?;

    if total_shares.is_zero() {
        return Ok(token.convert(&share));
    }
    if total_token.is_zero() {
        return Err(StakingError::invariant(format!(
            "pool holds {total_shares} but no consensus token"
        )));
    }
    Ok(Amount::new(share, mul_div(total_shares.raw, token.raw, total_token.raw)?))
}

/// Consensus token redeemable for `share`.
pub fn consensus_token_from_share(total_shares: &Amount, total_token: &Amount, share: &Amount) -> Result<Option<Amount>> {
    total_token.ensure_currency(&Currency::consensus_token())?;
    token_portion_by_share(total_token, total_shares, share)
}

/// `total_token * share / total_shares` in the currency of `total_token`.
pub fn token_portion_by_share(total_token: &Amount, total_shares: &Amount, share: &Amount) -> Result<Option<Amount>> {
    let shares = Currency::share();
    total_shares.ensure_currency(&shares)?;
    share.ensure_currency(&shares)?;

    if total_shares.is_zero() || total_token.is_zero() {
        return Ok(None);
    }
    Ok(Some(Amount::new(
        total_token.currency.clone(),
        mul_div(total_token.raw, share.raw, total_shares.raw)?,
    )))
}
