//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;

use custody_protocol::config::{FeeRouting, VaultConfig};
use custody_protocol::{
    AccountId, Collaborators, CustodyVault, FixedRateVenue, ManualClock, MemoryTokenHost,
    StaticPriceFeed, TokenId, TokenInfo,
};

/// 1 USDC in smallest units.
pub const USDC: u64 = 1_000_000;
/// 1 WETH in smallest units.
pub const WETH: u64 = 1_000_000_000_000_000_000;

pub fn usdc() -> TokenId {
    TokenId::new("USDC")
}

pub fn weth() -> TokenId {
    TokenId::new("WETH")
}

pub fn alice() -> AccountId {
    AccountId::new("alice")
}

pub fn bob() -> AccountId {
    AccountId::new("bob")
}

pub fn dex() -> AccountId {
    AccountId::new("dex")
}

/// USDC underlying, WETH pooled, a bridged USDC alias and an unrelated token.
pub fn base_config() -> VaultConfig {
    let mut config = VaultConfig::default();
    config.tokens = vec![
        TokenInfo::pooled("USDC", 6),
        TokenInfo::pooled("WETH", 18),
        TokenInfo::foreign("USDC.e", 6, Some("USDC")),
        TokenInfo::foreign("JUNK", 18, None),
    ];
    config.lock.min_duration_secs = 60;
    config.lock.max_duration_secs = 365 * 86_400;
    config.reward.rate_per_unit_second = 1_000_000;
    config.flash.fee_routing = FeeRouting::Pool;
    config
}

pub struct Harness {
    pub vault: CustodyVault,
    pub host: MemoryTokenHost,
    pub feed: StaticPriceFeed,
    pub venue: FixedRateVenue,
    pub clock: ManualClock,
}

impl Harness {
    pub fn new(config: VaultConfig) -> Self {
        let clock = ManualClock::default();
        let host = MemoryTokenHost::new();
        let feed = StaticPriceFeed::new(clock.clone());
        let venue = FixedRateVenue::new(host.clone(), clock.clone(), dex());
        host.mint(&usdc(), &dex(), 1_000_000_000 * USDC);

        let vault = CustodyVault::new(
            config,
            Collaborators {
                host: Arc::new(host.clone()),
                feed: Arc::new(feed.clone()),
                venue: Some(Arc::new(venue.clone())),
                clock: Arc::new(clock.clone()),
            },
        )
        .expect("valid config");

        let harness = Self {
            vault,
            host,
            feed,
            venue,
            clock,
        };
        harness.set_weth_price(2_000);
        harness
    }

    /// Publishes a fresh WETH quote of `usd` whole dollars.
    pub fn set_weth_price(&self, usd: i128) {
        self.feed.set_price(&weth(), usd * 100_000_000, 8);
    }

    /// Gives `who` `amount` of `token` and deposits all of it.
    pub async fn fund_and_deposit(&self, who: &AccountId, token: &TokenId, amount: u64) -> u128 {
        self.host.mint(token, who, amount);
        let receipt = self
            .vault
            .deposit(custody_protocol::DepositRequest {
                account: who.clone(),
                token: token.clone(),
                amount,
                conversion: None,
            })
            .await
            .expect("deposit");
        receipt.mint.units_minted
    }
}

pub fn harness() -> Harness {
    Harness::new(base_config())
}

/// Routes library logs to the test writer. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
