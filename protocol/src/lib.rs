// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Custody Protocol — Core Library
//!
//! A multi-asset custody ledger: deposits of several tokens are pooled and
//! valued at validated oracle prices, depositors receive proportional
//! ownership units, units can be time-locked to earn rewards from a bounded
//! budget, and pooled assets can be flash-borrowed for a fee.
//!
//! ## Architecture
//!
//! - **ledger** — Pool balances per token and per-account flows.
//! - **shares** — Ownership units: mint and burn pricing, first-deposit offset.
//! - **oracle** — Price validation (staleness, positivity, sanity bands).
//! - **exchange** — Bounded, measured swaps into the underlying.
//! - **lock** — Per-account time locks over units.
//! - **reward** — Reward budget, promises and claims.
//! - **flash** — Flash loans with fee floor and repayment check.
//! - **vault** — The facade tying it together, with reentrancy phases and
//!   per-operation rollback.
//! - **host / clock / memory** — Seams to the outside world and in-memory
//!   stand-ins for them.
//! - **config** — Protocol constants and vault parameters.
//!
//! ## Design Philosophy
//!
//! 1. Integer arithmetic only, checked everywhere. Rounding favors the pool.
//! 2. Every check runs before any mutation; every mutation before any
//!    outbound transfer.
//! 3. Nothing the outside world reports is trusted: transfers are measured,
//!    prices are validated, swaps are bounded.
//! 4. If it touches money, it has tests. Plural.

pub mod account;
pub mod clock;
pub mod config;
pub mod error;
pub mod exchange;
pub mod flash;
pub mod host;
pub mod ledger;
pub mod lock;
pub mod math;
pub mod memory;
pub mod oracle;
pub mod reward;
pub mod shares;
pub mod types;
pub mod vault;

pub use account::AccountView;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{FeeRouting, VaultConfig};
pub use error::VaultError;
pub use exchange::{ConversionBounds, ExchangeVenue};
pub use flash::{FlashBorrower, FlashContext, FlashLoanReceipt, FlashLoanState};
pub use host::TokenHost;
pub use memory::{FixedRateVenue, MemoryTokenHost, StaticPriceFeed};
pub use oracle::{PriceFeed, PriceQuote};
pub use types::{AccountId, TokenId, TokenInfo};
pub use vault::{Collaborators, CustodyVault, DepositReceipt, DepositRequest, PoolSnapshot};
