//! # Token Host
//!
//! The vault never moves tokens itself. It asks a [`TokenHost`], the token
//! transfer primitive of whatever environment embeds the vault, and it
//! never assumes the host did what it was asked:
//!
//! - `transfer` returns a success flag that is always checked; `false`
//!   becomes [`VaultError::TransferFailed`].
//! - Incoming amounts are measured as the recipient's balance delta, so
//!   fee-on-transfer and short-transfer tokens credit only what actually
//!   arrived.
//!
//! The host also stands in for the execution environment's atomicity:
//! [`begin`](TokenHost::begin), [`commit`](TokenHost::commit) and
//! [`rollback`](TokenHost::rollback) bracket every top-level vault operation.

use crate::error::VaultError;
use crate::types::{AccountId, TokenId};

/// Token transfer primitive plus per-operation atomicity.
pub trait TokenHost: Send + Sync {
    /// Balance of `holder` in `token`.
    fn balance_of(&self, token: &TokenId, holder: &AccountId) -> u64;

    /// Moves `amount` of `token` from `from` to `to`. Returns `false` on
    /// failure; some tokens signal failure this way instead of aborting.
    fn transfer(&self, token: &TokenId, from: &AccountId, to: &AccountId, amount: u64) -> bool;

    /// Opens an atomic section.
    fn begin(&self);

    /// Makes every transfer since [`begin`](TokenHost::begin) permanent.
    fn commit(&self);

    /// Undoes every transfer since [`begin`](TokenHost::begin).
    fn rollback(&self);
}

/// Performs a transfer and turns a `false` return into an error.
pub fn transfer_checked(
    host: &dyn TokenHost,
    token: &TokenId,
    from: &AccountId,
    to: &AccountId,
    amount: u64,
) -> Result<(), VaultError> {
    if host.transfer(token, from, to, amount) {
        Ok(())
    } else {
        Err(VaultError::TransferFailed {
            token: token.clone(),
            from: from.clone(),
            to: to.clone(),
            amount,
        })
    }
}

/// Transfers `amount` into `to` and returns what `to` actually received.
pub fn transfer_measured(
    host: &dyn TokenHost,
    token: &TokenId,
    from: &AccountId,
    to: &AccountId,
    amount: u64,
) -> Result<u64, VaultError> {
    let before = host.balance_of(token, to);
    transfer_checked(host, token, from, to, amount)?;
    let after = host.balance_of(token, to);
    Ok(after.saturating_sub(before))
}
