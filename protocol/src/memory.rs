//! # In-Memory Collaborators
//!
//! Self-contained implementations of the vault's external seams, used by
//! the node simulation harness and by the test suites:
//!
//! ```text
//! MemoryTokenHost  — balances map, transactional, optional transfer fees
//!                    and tokens that signal failure by returning false
//! StaticPriceFeed  — quotes set by hand, timestamped from a ManualClock
//! FixedRateVenue   — swaps at a configured rate, optionally "slow"
//! ```
//!
//! All three are cheap to clone; clones share state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::clock::{Clock, ManualClock};
use crate::error::VaultError;
use crate::exchange::ExchangeVenue;
use crate::host::{transfer_checked, TokenHost};
use crate::math::{bps_mul, mul_div_floor};
use crate::oracle::{PriceFeed, PriceQuote};
use crate::types::{AccountId, TokenId};

// ---------------------------------------------------------------------------
// MemoryTokenHost
// ---------------------------------------------------------------------------

#[derive(Default)]
struct HostState {
    balances: HashMap<(TokenId, AccountId), u64>,
    transfer_fee_bps: HashMap<TokenId, u32>,
    failing: HashSet<TokenId>,
    checkpoint: Option<HashMap<(TokenId, AccountId), u64>>,
}

/// Token balances held in memory.
#[derive(Clone, Default)]
pub struct MemoryTokenHost {
    state: Arc<Mutex<HostState>>,
}

impl MemoryTokenHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `amount` of `token` out of thin air for `to`.
    pub fn mint(&self, token: &TokenId, to: &AccountId, amount: u64) {
        let mut state = self.state.lock();
        let balance = state
            .balances
            .entry((token.clone(), to.clone()))
            .or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    /// Skims `bps` of every transfer of `token` (fee-on-transfer).
    pub fn set_transfer_fee_bps(&self, token: &TokenId, bps: u32) {
        self.state.lock().transfer_fee_bps.insert(token.clone(), bps);
    }

    /// Makes every transfer of `token` return `false`.
    pub fn set_failing(&self, token: &TokenId, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(token.clone());
        } else {
            state.failing.remove(token);
        }
    }
}

impl TokenHost for MemoryTokenHost {
    fn balance_of(&self, token: &TokenId, holder: &AccountId) -> u64 {
        self.state
            .lock()
            .balances
            .get(&(token.clone(), holder.clone()))
            .copied()
            .unwrap_or(0)
    }

    fn transfer(&self, token: &TokenId, from: &AccountId, to: &AccountId, amount: u64) -> bool {
        let mut state = self.state.lock();
        if state.failing.contains(token) {
            return false;
        }

        let from_key = (token.clone(), from.clone());
        let available = state.balances.get(&from_key).copied().unwrap_or(0);
        if available < amount {
            return false;
        }

        let fee_bps = state.transfer_fee_bps.get(token).copied().unwrap_or(0);
        let fee = match bps_mul(amount, fee_bps) {
            Ok(fee) => fee,
            Err(_) => return false,
        };

        let Some(net) = amount.checked_sub(fee) else {
            return false;
        };
        let to_key = (token.clone(), to.clone());
        if from_key == to_key {
            state.balances.insert(from_key, available - fee);
            return true;
        }
        let credited = state.balances.get(&to_key).copied().unwrap_or(0);
        let Some(next) = credited.checked_add(net) else {
            return false;
        };

        state.balances.insert(from_key, available - amount);
        state.balances.insert(to_key, next);
        true
    }

    fn begin(&self) {
        let mut state = self.state.lock();
        state.checkpoint = Some(state.balances.clone());
    }

    fn commit(&self) {
        self.state.lock().checkpoint = None;
    }

    fn rollback(&self) {
        let mut state = self.state.lock();
        if let Some(saved) = state.checkpoint.take() {
            state.balances = saved;
        }
    }
}

// ---------------------------------------------------------------------------
// StaticPriceFeed
// ---------------------------------------------------------------------------

/// Price feed whose quotes are set by hand.
#[derive(Clone)]
pub struct StaticPriceFeed {
    clock: ManualClock,
    quotes: Arc<RwLock<HashMap<TokenId, PriceQuote>>>,
}

impl StaticPriceFeed {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            quotes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publishes `price` (with `decimals` places), stamped with the clock's now.
    pub fn set_price(&self, token: &TokenId, price: i128, decimals: u8) {
        let quote = PriceQuote {
            price,
            decimals,
            updated_at: self.clock.now(),
            source: "static".into(),
        };
        self.set_quote(token, quote);
    }

    /// Publishes a fully specified quote.
    pub fn set_quote(&self, token: &TokenId, quote: PriceQuote) {
        self.quotes.write().insert(token.clone(), quote);
    }
}

#[async_trait]
impl PriceFeed for StaticPriceFeed {
    async fn latest(&self, token: &TokenId) -> Result<PriceQuote, VaultError> {
        self.quotes
            .read()
            .get(token)
            .cloned()
            .ok_or_else(|| VaultError::Feed {
                token: token.clone(),
                reason: "no quote published".into(),
            })
    }
}

// ---------------------------------------------------------------------------
// FixedRateVenue
// ---------------------------------------------------------------------------

/// Swap venue paying `amount_in * numerator / denominator` smallest units.
#[derive(Clone)]
pub struct FixedRateVenue {
    host: MemoryTokenHost,
    clock: ManualClock,
    address: AccountId,
    rates: Arc<RwLock<HashMap<TokenId, (u64, u64)>>>,
    latency_secs: Arc<RwLock<i64>>,
}

impl FixedRateVenue {
    pub fn new(host: MemoryTokenHost, clock: ManualClock, address: AccountId) -> Self {
        Self {
            host,
            clock,
            address,
            rates: Arc::new(RwLock::new(HashMap::new())),
            latency_secs: Arc::new(RwLock::new(0)),
        }
    }

    /// Sets the output rate for swaps out of `token_in`.
    pub fn set_rate(&self, token_in: &TokenId, numerator: u64, denominator: u64) {
        self.rates
            .write()
            .insert(token_in.clone(), (numerator, denominator));
    }

    /// Every execution advances the clock by `secs`.
    pub fn set_latency_secs(&self, secs: i64) {
        *self.latency_secs.write() = secs;
    }
}

#[async_trait]
impl ExchangeVenue for FixedRateVenue {
    fn address(&self) -> AccountId {
        self.address.clone()
    }

    async fn execute(
        &self,
        token_in: &TokenId,
        amount_in: u64,
        token_out: &TokenId,
        recipient: &AccountId,
    ) -> Result<(), VaultError> {
        let (numerator, denominator) = self
            .rates
            .read()
            .get(token_in)
            .copied()
            .ok_or_else(|| VaultError::Venue(format!("no market for {}", token_in)))?;

        let out = mul_div_floor(amount_in as u128, numerator as u128, denominator as u128)?;
        let out = u64::try_from(out).map_err(|_| VaultError::ArithmeticOverflow("venue output"))?;

        let latency = *self.latency_secs.read();
        if latency > 0 {
            self.clock.advance(latency);
        }

        transfer_checked(&self.host, token_out, &self.address, recipient, out)
            .map_err(|e| VaultError::Venue(e.to_string()))
    }
}
