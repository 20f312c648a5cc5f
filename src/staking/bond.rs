//! Bond / cancel primitives shared by delegate, undelegate, redelegate and slashing.

use super::delegation::Delegator;
use super::pool;
use super::validator::{consensus_token_of, Delegatee};
use crate::error::{Result, StakingError};
use crate::ledger::StateStore;
use crate::types::{Amount, Currency};

/// Issue shares for `token` consensus token: mints the token to the delegatee
/// and the shares to the delegator. Returns the issued shares.
pub(crate) fn bond<S, T, D>(store: &mut S, delegatee: &mut T, delegator: &D, token: &Amount) -> Result<Amount>
where
    S: StateStore,
    T: Delegatee,
    D: Delegator,
{
    let balance = consensus_token_of(&*store, &delegatee.address());
    let issued = pool::share_from_consensus_token(delegatee.delegator_shares(), &balance, token)?;

    store.mint_asset(&delegatee.address(), token)?;
    store.mint_asset(&delegator.share_address(), &issued)?;
    let total = delegatee.delegator_shares().checked_add(&issued)?;
    delegatee.set_delegator_shares(total);
    delegatee.save(store)?;
    Ok(issued)
}

/// Burn `share` from the delegator and the matching consensus token from the
/// delegatee. An empty pool redeems to zero.
pub(crate) fn cancel<S, T, D>(store: &mut S, delegatee: &mut T, delegator: &D, share: &Amount) -> Result<Amount>
where
    S: StateStore,
    T: Delegatee,
    D: Delegator,
{
    share.ensure_currency(&Currency::share())?;
    let held = delegator.shares(&*store);
    if held.raw < share.raw {
        return Err(StakingError::InsufficientFunds {
            address: delegator.share_address(),
            required: share.clone(),
            available: held,
        });
    }

    let balance = consensus_token_of(&*store, &delegatee.address());
    let token = pool::consensus_token_from_share(delegatee.delegator_shares(), &balance, share)?
        .unwrap_or_else(|| Amount::zero(Currency::consensus_token()));

    store.burn_asset(&delegator.share_address(), share)?;
    store.burn_asset(&delegatee.address(), &token)?;
    let total = delegatee
        .delegator_shares()
        .checked_sub(share)
        .map_err(|_| StakingError::invariant(format!("delegatee {} shares underflow", delegatee.address())))?;
    delegatee.set_delegator_shares(total);
    delegatee.save(store)?;
    Ok(token)
}
