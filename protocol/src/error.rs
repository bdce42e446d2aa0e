//! # Vault Errors
//!
//! Every fallible operation in the custody engine returns a [`VaultError`].
//! The variants are precondition failures: each one is raised before any
//! irreversible state mutation or outbound value transfer, and each one
//! aborts the whole top-level operation. Nothing here is retried
//! automatically.
//!
//! The variants carry enough context for a client to tell "refresh the
//! price and try again" apart from "loan too small" apart from "funds locked
//! until timestamp X" without parsing the message string.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{AccountId, TokenId};

/// Errors that can occur during custody vault operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    /// A debit, burn or transfer asked for more than is available.
    #[error("insufficient balance of {asset}: available {available}, requested {requested}")]
    InsufficientBalance {
        /// Token symbol, or `"units"` for ownership units.
        asset: String,
        /// What is currently available.
        available: u128,
        /// What the caller asked for.
        requested: u128,
    },

    /// The oracle quote is older than the configured staleness bound.
    #[error("stale price for {token}: updated at {updated_at}, max age {max_age_secs}s")]
    StalePrice {
        /// The asset that was quoted.
        token: TokenId,
        /// When the feed last updated the price.
        updated_at: DateTime<Utc>,
        /// The configured staleness bound.
        max_age_secs: u64,
    },

    /// The oracle quote is non-positive, from the future, or outside the
    /// configured sanity band.
    #[error("invalid price for {token}: {reason}")]
    InvalidPrice {
        /// The asset that was quoted.
        token: TokenId,
        /// Why the quote was rejected.
        reason: String,
    },

    /// The realized swap output fell below the caller's minimum.
    #[error("slippage exceeded: received {received}, minimum {minimum}")]
    SlippageExceeded {
        /// Output actually received.
        received: u64,
        /// Minimum acceptable output.
        minimum: u64,
    },

    /// The swap executed (or would execute) after the caller's deadline.
    #[error("deadline expired: deadline {deadline}, now {now}")]
    DeadlineExpired {
        /// The caller-supplied deadline.
        deadline: DateTime<Utc>,
        /// Time at which the check failed.
        now: DateTime<Utc>,
    },

    /// A flash loan callback returned without repaying principal plus fee.
    #[error("flash loan not repaid: expected balance {expected}, observed {observed}")]
    FlashLoanNotRepaid {
        /// Pre-loan custody balance plus the fee due.
        expected: u64,
        /// Custody balance observed after the callback.
        observed: u64,
    },

    /// The loan amount yields a fee below the configured floor.
    #[error("loan too small: fee {fee} below minimum {min_fee}")]
    LoanTooSmall {
        /// The fee the loan would have paid.
        fee: u64,
        /// The configured minimum fee.
        min_fee: u64,
    },

    /// The account's units are still locked.
    #[error("units locked until {expiry}")]
    StillLocked {
        /// When the lock expires.
        expiry: DateTime<Utc>,
    },

    /// The account already has an active lock.
    #[error("account {0} already has an active lock")]
    AlreadyLocked(AccountId),

    /// The requested lock duration is outside the configured range.
    #[error("lock duration {requested_secs}s outside [{min_secs}s, {max_secs}s]")]
    DurationOutOfRange {
        /// Requested duration.
        requested_secs: u64,
        /// Shortest allowed duration.
        min_secs: u64,
        /// Longest allowed duration.
        max_secs: u64,
    },

    /// The reward budget cannot cover the requested promise or payout.
    #[error("insufficient reward balance: required {required}, available {available}")]
    InsufficientRewardBalance {
        /// Amount that would have to be promised or paid.
        required: u64,
        /// Amount the budget can still cover.
        available: u64,
    },

    /// The token transfer primitive reported failure.
    #[error("transfer of {amount} {token} from {from} to {to} failed")]
    TransferFailed {
        /// Token being moved.
        token: TokenId,
        /// Sender.
        from: AccountId,
        /// Recipient.
        to: AccountId,
        /// Amount requested.
        amount: u64,
    },

    /// Checked arithmetic overflowed or divided by zero.
    #[error("arithmetic overflow in {0}")]
    ArithmeticOverflow(&'static str),

    /// Zero-amount operations are rejected.
    #[error("zero-amount operations are not permitted")]
    ZeroAmount,

    /// The token is not registered with this vault.
    #[error("unknown token: {0}")]
    UnknownToken(TokenId),

    /// The first deposit must exceed the anti-inflation offset.
    #[error("first deposit of value {value} must exceed minimum units {min_units}")]
    DepositTooSmall {
        /// Value of the deposit.
        value: u128,
        /// The configured offset.
        min_units: u128,
    },

    /// The account has no active lock to release.
    #[error("account {0} has no active lock")]
    NotLocked(AccountId),

    /// A state-mutating operation was attempted while an external call of
    /// the same pool was still in flight.
    #[error("reentrant call rejected: pool is in phase {phase}")]
    ReentrantCall {
        /// The phase the pool was in.
        phase: String,
    },

    /// The account is reserved by the vault and cannot act.
    #[error("account {0} is reserved")]
    ReservedAccount(AccountId),

    /// A request parameter is malformed.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The vault configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Emergency recovery refused a token equivalent to a pooled asset.
    #[error("recovery of {token} rejected: {reason}")]
    RecoveryRejected {
        /// Token the caller asked to recover.
        token: TokenId,
        /// Why recovery is refused.
        reason: String,
    },

    /// The configured fee routing cannot accept this loan's asset.
    #[error("fee routing {routing} cannot accept fees in {token}")]
    FeeRoutingMismatch {
        /// The configured routing.
        routing: String,
        /// The loan asset.
        token: TokenId,
    },

    /// The exchange venue failed to execute.
    #[error("exchange venue error: {0}")]
    Venue(String),

    /// The price feed could not produce a quote.
    #[error("price feed error for {token}: {reason}")]
    Feed {
        /// The asset requested.
        token: TokenId,
        /// Feed-reported reason.
        reason: String,
    },

    /// An audit found the books out of balance.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl VaultError {
    /// Shorthand for an [`VaultError::InsufficientBalance`] on ownership units.
    pub fn insufficient_units(available: u128, requested: u128) -> Self {
        VaultError::InsufficientBalance {
            asset: "units".into(),
            available,
            requested,
        }
    }

    /// Returns `true` if retrying with a fresher quote might succeed.
    pub fn is_price_related(&self) -> bool {
        matches!(
            self,
            VaultError::StalePrice { .. }
                | VaultError::InvalidPrice { .. }
                | VaultError::SlippageExceeded { .. }
                | VaultError::Feed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_units_formats_asset() {
        let err = VaultError::insufficient_units(5, 10);
        assert_eq!(
            err.to_string(),
            "insufficient balance of units: available 5, requested 10"
        );
    }

    #[test]
    fn price_related_classification() {
        let stale = VaultError::StalePrice {
            token: TokenId::new("WETH"),
            updated_at: Utc::now(),
            max_age_secs: 60,
        };
        assert!(stale.is_price_related());
        assert!(!VaultError::ZeroAmount.is_price_related());
        assert!(!VaultError::LoanTooSmall { fee: 0, min_fee: 1 }.is_price_related());
    }
}
