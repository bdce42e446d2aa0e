//! # Exchange Adapter
//!
//! Converts a pooled token into the vault's underlying asset through an
//! external [`ExchangeVenue`]. The adapter hardcodes nothing: the caller
//! supplies both the minimum acceptable output and the deadline, and the
//! adapter enforces them.
//!
//! Settlement is measured, not trusted. The adapter sends `amount_in` to
//! the venue, asks it to execute, and then reads how much underlying
//! actually landed in custody. A realized output below `min_amount_out`
//! fails with [`VaultError::SlippageExceeded`]; finishing after the
//! deadline fails with [`VaultError::DeadlineExpired`]. Either failure
//! aborts the enclosing vault operation before the ledger is touched, and
//! the host rolls back the token movements.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::config::BPS_DENOMINATOR;
use crate::error::VaultError;
use crate::host::{transfer_checked, TokenHost};
use crate::math::mul_div_floor;
use crate::types::{AccountId, TokenId};

/// External swap venue.
#[async_trait]
pub trait ExchangeVenue: Send + Sync {
    /// Address the venue receives input tokens at.
    fn address(&self) -> AccountId;

    /// Executes a swap of `amount_in` already delivered to
    /// [`address`](ExchangeVenue::address), paying the output in
    /// `token_out` to `recipient`.
    async fn execute(
        &self,
        token_in: &TokenId,
        amount_in: u64,
        token_out: &TokenId,
        recipient: &AccountId,
    ) -> Result<(), VaultError>;
}

/// Caller-chosen bounds for an auto-converting deposit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionBounds {
    /// Largest acceptable shortfall against the oracle-implied output, in bp.
    pub max_slippage_bps: u32,
    /// The swap must settle no later than this.
    pub deadline: DateTime<Utc>,
}

/// A fully specified swap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapRequest {
    pub token_in: TokenId,
    pub amount_in: u64,
    pub min_amount_out: u64,
    pub deadline: DateTime<Utc>,
}

/// Minimum output for a swap whose oracle-implied output is `expected_out`,
/// given a caller tolerance of `max_slippage_bps`.
pub fn min_output(expected_out: u64, max_slippage_bps: u32) -> Result<u64, VaultError> {
    if max_slippage_bps as u128 > BPS_DENOMINATOR {
        return Err(VaultError::InvalidParameter(format!(
            "slippage tolerance {} bp exceeds 100%",
            max_slippage_bps
        )));
    }
    let keep = BPS_DENOMINATOR - max_slippage_bps as u128;
    let min = mul_div_floor(expected_out as u128, keep, BPS_DENOMINATOR)?;
    u64::try_from(min).map_err(|_| VaultError::ArithmeticOverflow("min_output"))
}

/// Bounded, measured swaps into the underlying asset.
#[derive(Clone)]
pub struct ExchangeAdapter {
    venue: Arc<dyn ExchangeVenue>,
    host: Arc<dyn TokenHost>,
    clock: Arc<dyn Clock>,
    custody: AccountId,
    underlying: TokenId,
}

impl ExchangeAdapter {
    pub fn new(
        venue: Arc<dyn ExchangeVenue>,
        host: Arc<dyn TokenHost>,
        clock: Arc<dyn Clock>,
        custody: AccountId,
        underlying: TokenId,
    ) -> Self {
        Self {
            venue,
            host,
            clock,
            custody,
            underlying,
        }
    }

    /// Swaps custody-held `token_in` for the underlying. Returns the
    /// underlying amount that actually arrived in custody.
    ///
    /// # Errors
    ///
    /// - [`VaultError::DeadlineExpired`] if called, or settled, after the deadline.
    /// - [`VaultError::SlippageExceeded`] if the measured output is short.
    /// - [`VaultError::TransferFailed`] if the input could not be delivered.
    pub async fn swap(&self, request: &SwapRequest) -> Result<u64, VaultError> {
        if request.amount_in == 0 {
            return Err(VaultError::ZeroAmount);
        }
        if request.token_in == self.underlying {
            return Err(VaultError::InvalidParameter(
                "cannot swap the underlying into itself".into(),
            ));
        }
        self.check_deadline(request.deadline)?;

        let venue_address = self.venue.address();
        let before = self.host.balance_of(&self.underlying, &self.custody);

        transfer_checked(
            self.host.as_ref(),
            &request.token_in,
            &self.custody,
            &venue_address,
            request.amount_in,
        )?;
        self.venue
            .execute(&request.token_in, request.amount_in, &self.underlying, &self.custody)
            .await?;

        self.check_deadline(request.deadline)?;

        let after = self.host.balance_of(&self.underlying, &self.custody);
        let received = after.saturating_sub(before);
        if received < request.min_amount_out {
            return Err(VaultError::SlippageExceeded {
                received,
                minimum: request.min_amount_out,
            });
        }

        debug!(
            token_in = %request.token_in,
            amount_in = request.amount_in,
            received,
            min = request.min_amount_out,
            "swap settled"
        );
        Ok(received)
    }

    fn check_deadline(&self, deadline: DateTime<Utc>) -> Result<(), VaultError> {
        let now = self.clock.now();
        if now > deadline {
            return Err(VaultError::DeadlineExpired { deadline, now });
        }
        Ok(())
    }
}
