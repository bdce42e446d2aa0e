//! # Oracle Gateway
//!
//! Fetches asset prices from an external [`PriceFeed`] and refuses to pass
//! on anything it cannot vouch for. A quote is rejected when it is:
//!
//! - non-positive, or zero once normalized to [`PRICE_DECIMALS`];
//! - timestamped in the future;
//! - older than the configured staleness bound;
//! - outside the asset's configured sanity band.
//!
//! Validated quotes are collected into a [`PriceBook`] that lives for
//! exactly one top-level vault operation. Nothing is cached across calls.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::{OracleConfig, VaultConfig, PRICE_DECIMALS};
use crate::error::VaultError;
use crate::math::{amount_to_value, normalize_price, pow10, value_to_amount};
use crate::types::TokenId;

// ---------------------------------------------------------------------------
// Feed seam
// ---------------------------------------------------------------------------

/// A raw quote as reported by a price feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Price of one whole token in whole underlying units, scaled by
    /// `10^decimals`. Signed because feeds can and do report garbage.
    pub price: i128,
    /// Decimal places in `price`.
    pub decimals: u8,
    /// When the feed last updated this price.
    pub updated_at: DateTime<Utc>,
    /// Feed identifier, for logs.
    pub source: String,
}

/// External price oracle service.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Latest quote for `token`.
    async fn latest(&self, token: &TokenId) -> Result<PriceQuote, VaultError>;
}

/// A quote that passed every check, normalized to [`PRICE_DECIMALS`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedPrice {
    pub token: TokenId,
    pub price: u128,
    pub updated_at: DateTime<Utc>,
    pub source: String,
}

// ---------------------------------------------------------------------------
// OracleGateway
// ---------------------------------------------------------------------------

/// Validating front for a [`PriceFeed`].
#[derive(Clone)]
pub struct OracleGateway {
    feed: Arc<dyn PriceFeed>,
    config: OracleConfig,
    clock: Arc<dyn Clock>,
}

impl OracleGateway {
    pub fn new(feed: Arc<dyn PriceFeed>, config: OracleConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            feed,
            config,
            clock,
        }
    }

    /// Fetches and validates a fresh price for `token`.
    ///
    /// # Errors
    ///
    /// [`VaultError::StalePrice`] if the quote is too old,
    /// [`VaultError::InvalidPrice`] if it is non-positive, from the future
    /// or outside the sanity band, and whatever the feed itself reports.
    pub async fn get_price(&self, token: &TokenId) -> Result<ValidatedPrice, VaultError> {
        let quote = self.feed.latest(token).await?;
        let now = self.clock.now();
        self.validate(token, &quote, now).map_err(|e| {
            warn!(%token, error = %e, "oracle quote rejected");
            e
        })
    }

    /// Applies the validation rules to a quote observed at `now`.
    pub fn validate(
        &self,
        token: &TokenId,
        quote: &PriceQuote,
        now: DateTime<Utc>,
    ) -> Result<ValidatedPrice, VaultError> {
        let invalid = |reason: String| VaultError::InvalidPrice {
            token: token.clone(),
            reason,
        };

        if quote.price <= 0 {
            return Err(invalid(format!("non-positive price {}", quote.price)));
        }
        if quote.updated_at > now {
            return Err(invalid(format!(
                "quote timestamp {} is in the future",
                quote.updated_at
            )));
        }

        let age_secs = (now - quote.updated_at).num_seconds();
        if age_secs as u64 > self.config.max_staleness_secs {
            return Err(VaultError::StalePrice {
                token: token.clone(),
                updated_at: quote.updated_at,
                max_age_secs: self.config.max_staleness_secs,
            });
        }

        let price = normalize_price(quote.price as u128, quote.decimals)?;
        if price == 0 {
            return Err(invalid("price rounds to zero at vault precision".into()));
        }

        if let Some(band) = self.config.band(token) {
            if price < band.min || price > band.max {
                return Err(invalid(format!(
                    "price {} outside sanity band [{}, {}]",
                    price, band.min, band.max
                )));
            }
        }

        Ok(ValidatedPrice {
            token: token.clone(),
            price,
            updated_at: quote.updated_at,
            source: quote.source.clone(),
        })
    }

    /// Builds a one-operation price book for `tokens`. The underlying never
    /// needs a quote and is skipped.
    pub async fn price_book<'a, I>(&self, underlying: &TokenId, tokens: I) -> Result<PriceBook, VaultError>
    where
        I: IntoIterator<Item = &'a TokenId>,
    {
        let mut book = PriceBook::new(underlying.clone());
        for token in tokens {
            if token == underlying || book.prices.contains_key(token) {
                continue;
            }
            let price = self.get_price(token).await?;
            debug!(%token, price = price.price, source = %price.source, "price validated");
            book.prices.insert(token.clone(), price);
        }
        Ok(book)
    }
}

// ---------------------------------------------------------------------------
// PriceBook
// ---------------------------------------------------------------------------

/// Validated prices for the duration of a single vault operation.
#[derive(Clone, Debug)]
pub struct PriceBook {
    underlying: TokenId,
    prices: HashMap<TokenId, ValidatedPrice>,
}

impl PriceBook {
    /// An empty book. The underlying is always priced at 1.
    pub fn new(underlying: TokenId) -> Self {
        Self {
            underlying,
            prices: HashMap::new(),
        }
    }

    /// Adds an already-validated price.
    pub fn insert(&mut self, price: ValidatedPrice) {
        self.prices.insert(price.token.clone(), price);
    }

    /// Normalized price of `token`, in underlying per whole token.
    ///
    /// For the underlying this is exactly `10^PRICE_DECIMALS`.
    pub fn price(&self, token: &TokenId) -> Result<u128, VaultError> {
        if token == &self.underlying {
            return pow10(PRICE_DECIMALS as u32);
        }
        self.prices
            .get(token)
            .map(|p| p.price)
            .ok_or_else(|| VaultError::InvalidPrice {
                token: token.clone(),
                reason: "no validated quote in this operation".into(),
            })
    }

    /// Value of `amount` of `token`, in smallest underlying units.
    pub fn value_of(&self, config: &VaultConfig, token: &TokenId, amount: u64) -> Result<u128, VaultError> {
        let decimals = config.token(token)?.decimals;
        amount_to_value(amount, self.price(token)?, decimals, config.underlying_decimals()?)
    }

    /// Amount of `token` that `value` buys, floored.
    pub fn amount_for(&self, config: &VaultConfig, token: &TokenId, value: u128) -> Result<u64, VaultError> {
        let decimals = config.token(token)?.decimals;
        value_to_amount(value, self.price(token)?, decimals, config.underlying_decimals()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::PriceBand;
    use crate::memory::StaticPriceFeed;

    fn gateway(feed: StaticPriceFeed, clock: ManualClock, bands: Vec<PriceBand>) -> OracleGateway {
        let config = OracleConfig {
            max_staleness_secs: 60,
            bands,
        };
        OracleGateway::new(Arc::new(feed), config, Arc::new(clock))
    }

    #[tokio::test]
    async fn fresh_quote_is_normalized() {
        let clock = ManualClock::default();
        let feed = StaticPriceFeed::new(clock.clone());
        let weth = TokenId::new("WETH");
        feed.set_price(&weth, 2_000_000_000, 6); // 2000.000000

        let price = gateway(feed, clock, vec![]).get_price(&weth).await.unwrap();
        assert_eq!(price.price, 200_000_000_000);
    }

    #[tokio::test]
    async fn stale_quote_rejected() {
        let clock = ManualClock::default();
        let feed = StaticPriceFeed::new(clock.clone());
        let weth = TokenId::new("WETH");
        feed.set_price(&weth, 2_000, 0);
        clock.advance(61);

        let err = gateway(feed, clock, vec![]).get_price(&weth).await.unwrap_err();
        assert!(matches!(err, VaultError::StalePrice { max_age_secs: 60, .. }));
    }

    #[tokio::test]
    async fn quote_exactly_at_bound_is_fresh() {
        let clock = ManualClock::default();
        let feed = StaticPriceFeed::new(clock.clone());
        let weth = TokenId::new("WETH");
        feed.set_price(&weth, 2_000, 0);
        clock.advance(60);

        assert!(gateway(feed, clock, vec![]).get_price(&weth).await.is_ok());
    }

    #[tokio::test]
    async fn non_positive_and_out_of_band_rejected() {
        let clock = ManualClock::default();
        let feed = StaticPriceFeed::new(clock.clone());
        let weth = TokenId::new("WETH");
        let band = PriceBand {
            token: weth.clone(),
            min: 100 * 100_000_000,
            max: 10_000 * 100_000_000,
        };
        let gw = gateway(feed.clone(), clock, vec![band]);

        feed.set_price(&weth, 0, 8);
        assert!(matches!(gw.get_price(&weth).await, Err(VaultError::InvalidPrice { .. })));

        feed.set_price(&weth, -5, 8);
        assert!(matches!(gw.get_price(&weth).await, Err(VaultError::InvalidPrice { .. })));

        feed.set_price(&weth, 50_000, 0);
        assert!(matches!(gw.get_price(&weth).await, Err(VaultError::InvalidPrice { .. })));

        feed.set_price(&weth, 2_500, 0);
        assert!(gw.get_price(&weth).await.is_ok());
    }

    #[test]
    fn future_timestamp_rejected() {
        let clock = ManualClock::default();
        let now = clock.now();
        let gw = gateway(StaticPriceFeed::new(clock.clone()), clock, vec![]);
        let quote = PriceQuote {
            price: 1,
            decimals: 0,
            updated_at: now + chrono::Duration::seconds(5),
            source: "test".into(),
        };
        assert!(matches!(
            gw.validate(&TokenId::new("X"), &quote, now),
            Err(VaultError::InvalidPrice { .. })
        ));
    }

    #[test]
    fn price_book_prices_underlying_at_one() {
        let book = PriceBook::new(TokenId::new("USDC"));
        assert_eq!(book.price(&TokenId::new("USDC")).unwrap(), 100_000_000);
        assert!(book.price(&TokenId::new("WETH")).is_err());
    }
}
