//! # Vault Configuration & Constants
//!
//! Every tunable number in the custody engine lives here: the
//! anti-inflation offset, price precision, lock bounds, flash-loan fee
//! policy, reward rate, oracle sanity bands. A [`VaultConfig`] is built
//! once, validated, and shared read-only by every component of a vault.
//!
//! Configuration is plain serde data so it can be loaded from a JSON file
//! by the node harness or constructed in code by an embedding host.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::VaultError;
use crate::types::{AccountId, TokenId, TokenInfo};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Basis-point denominator. 10_000 bp = 100%.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Precision of every validated oracle price: 8 decimal places, the
/// common denominator of most price feeds.
pub const PRICE_DECIMALS: u8 = 8;

/// Largest token precision the value arithmetic is sized for. With
/// [`PRICE_DECIMALS`] on top this keeps `10^(decimals + 8)` well inside `u128`.
pub const MAX_TOKEN_DECIMALS: u8 = 24;

/// Default anti-inflation offset minted to the sink on the first deposit.
pub const DEFAULT_MIN_UNITS: u128 = 1_000;

/// Default maximum oracle quote age: 5 minutes.
pub const DEFAULT_MAX_STALENESS_SECS: u64 = 300;

/// Default flash-loan fee: 9 bp (0.09%).
pub const DEFAULT_FLASH_FEE_BPS: u32 = 9;

/// Default minimum flash-loan fee in smallest units of the loaned asset.
pub const DEFAULT_MIN_FLASH_FEE: u64 = 1;

/// Shortest lock we accept by default: one hour.
pub const DEFAULT_MIN_LOCK_SECS: u64 = 3_600;

/// Longest lock we accept by default: four years.
pub const DEFAULT_MAX_LOCK_SECS: u64 = 4 * 365 * 86_400;

/// Hard ceiling on any configured lock duration: 100 years.
///
/// Expiry timestamps are `DateTime<Utc>` (valid to year 262,142), so
/// `now + MAX_LOCK_HORIZON_SECS` cannot overflow for any `now` the system
/// will ever see. The addition is still checked.
pub const MAX_LOCK_HORIZON_SECS: u64 = 100 * 365 * 86_400;

/// Reward rates are expressed per unit-second, scaled by this factor.
pub const REWARD_RATE_SCALE: u128 = 1_000_000_000;

/// Default reward rate. At 1 / 1e9 per unit-second a lock earns roughly
/// 3.15% of its unit count per year.
pub const DEFAULT_REWARD_RATE: u64 = 1;

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Sanity band for one asset's normalized price (at [`PRICE_DECIMALS`]).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBand {
    /// Asset the band applies to.
    pub token: TokenId,
    /// Lowest plausible price.
    pub min: u128,
    /// Highest plausible price.
    pub max: u128,
}

/// Oracle validation settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Quotes older than this are rejected with `StalePrice`.
    pub max_staleness_secs: u64,
    /// Per-asset sanity bands. Assets without a band only get the
    /// positivity check.
    #[serde(default)]
    pub bands: Vec<PriceBand>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            max_staleness_secs: DEFAULT_MAX_STALENESS_SECS,
            bands: Vec::new(),
        }
    }
}

impl OracleConfig {
    /// The configured band for `token`, if any.
    pub fn band(&self, token: &TokenId) -> Option<&PriceBand> {
        self.bands.iter().find(|b| &b.token == token)
    }
}

/// Where flash-loan fee revenue goes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum FeeRouting {
    /// Credit the fee to the pool, raising the value of every unit.
    Pool,
    /// Credit the fee to the reward budget (loans of the reward asset only).
    RewardBudget,
    /// Pay the fee out to a treasury account.
    Treasury {
        /// Recipient of fee revenue.
        account: AccountId,
    },
}

impl std::fmt::Display for FeeRouting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeeRouting::Pool => write!(f, "pool"),
            FeeRouting::RewardBudget => write!(f, "reward_budget"),
            FeeRouting::Treasury { account } => write!(f, "treasury({})", account),
        }
    }
}

/// Flash-loan policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Fee rate in basis points of the principal.
    pub fee_bps: u32,
    /// Loans whose fee would fall below this are rejected.
    pub min_fee: u64,
    /// Fee revenue destination.
    pub fee_routing: FeeRouting,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            fee_bps: DEFAULT_FLASH_FEE_BPS,
            min_fee: DEFAULT_MIN_FLASH_FEE,
            fee_routing: FeeRouting::RewardBudget,
        }
    }
}

/// Lock duration bounds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Shortest accepted lock.
    pub min_duration_secs: u64,
    /// Longest accepted lock.
    pub max_duration_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            min_duration_secs: DEFAULT_MIN_LOCK_SECS,
            max_duration_secs: DEFAULT_MAX_LOCK_SECS,
        }
    }
}

/// Reward accrual settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Reward in smallest underlying units per locked unit per second,
    /// multiplied by [`REWARD_RATE_SCALE`].
    pub rate_per_unit_second: u64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            rate_per_unit_second: DEFAULT_REWARD_RATE,
        }
    }
}

// ---------------------------------------------------------------------------
// VaultConfig
// ---------------------------------------------------------------------------

/// Complete configuration of one custody vault.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// The asset value is accounted in. Also the reward asset.
    pub underlying: TokenId,

    /// Every token the vault knows: pooled assets plus foreign tokens
    /// whose equivalence class matters for emergency recovery.
    pub tokens: Vec<TokenInfo>,

    /// Token-host address holding pooled assets. Also the sink that
    /// receives the first-deposit offset units.
    pub custody_account: AccountId,

    /// Token-host address holding the reward budget.
    pub reward_account: AccountId,

    /// Anti-inflation offset minted to the sink on the first deposit.
    pub min_units: u128,

    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub flash: FlashConfig,

    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub reward: RewardConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            underlying: TokenId::new("USDC"),
            tokens: vec![TokenInfo::pooled("USDC", 6)],
            custody_account: AccountId::new("vault.custody"),
            reward_account: AccountId::new("vault.rewards"),
            min_units: DEFAULT_MIN_UNITS,
            oracle: OracleConfig::default(),
            flash: FlashConfig::default(),
            lock: LockConfig::default(),
            reward: RewardConfig::default(),
        }
    }
}

impl VaultConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, VaultError> {
        let config: VaultConfig =
            serde_json::from_str(json).map_err(|e| VaultError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Looks up a registered token.
    pub fn token(&self, id: &TokenId) -> Result<&TokenInfo, VaultError> {
        self.tokens
            .iter()
            .find(|t| &t.id == id)
            .ok_or_else(|| VaultError::UnknownToken(id.clone()))
    }

    /// Looks up a token the pool accepts.
    pub fn pooled_token(&self, id: &TokenId) -> Result<&TokenInfo, VaultError> {
        let info = self.token(id)?;
        if !info.pooled {
            return Err(VaultError::UnknownToken(id.clone()));
        }
        Ok(info)
    }

    /// Decimal precision of the underlying asset.
    pub fn underlying_decimals(&self) -> Result<u8, VaultError> {
        Ok(self.token(&self.underlying)?.decimals)
    }

    /// Treasury account, when fees are routed to one.
    pub fn treasury_account(&self) -> Option<&AccountId> {
        match &self.flash.fee_routing {
            FeeRouting::Treasury { account } => Some(account),
            _ => None,
        }
    }

    /// Returns `true` for addresses the vault itself controls.
    pub fn is_reserved(&self, account: &AccountId) -> bool {
        account == &self.custody_account
            || account == &self.reward_account
            || self.treasury_account() == Some(account)
    }

    /// Checks the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<(), VaultError> {
        let bad = |msg: String| Err(VaultError::InvalidConfig(msg));

        let mut seen = HashSet::new();
        for info in &self.tokens {
            if !seen.insert(&info.id) {
                return bad(format!("token {} registered twice", info.id));
            }
            if info.decimals > MAX_TOKEN_DECIMALS {
                return bad(format!(
                    "token {} has {} decimals, max {}",
                    info.id, info.decimals, MAX_TOKEN_DECIMALS
                ));
            }
        }

        match self.token(&self.underlying) {
            Ok(info) if info.pooled => {}
            _ => return bad(format!("underlying {} must be a pooled token", self.underlying)),
        }

        if self.custody_account == self.reward_account {
            return bad("custody and reward accounts must differ".into());
        }
        if let Some(treasury) = self.treasury_account() {
            if treasury == &self.custody_account || treasury == &self.reward_account {
                return bad("treasury must differ from custody and reward accounts".into());
            }
        }

        if self.oracle.max_staleness_secs == 0 {
            return bad("oracle max_staleness_secs must be positive".into());
        }
        for band in &self.oracle.bands {
            self.token(&band.token)
                .map_err(|_| VaultError::InvalidConfig(format!("band for unknown token {}", band.token)))?;
            if band.min == 0 || band.min > band.max {
                return bad(format!("price band for {} is empty or non-positive", band.token));
            }
        }

        if self.min_units == 0 {
            return bad("min_units must be positive".into());
        }

        if self.flash.fee_bps as u128 > BPS_DENOMINATOR {
            return bad(format!("flash fee {} bp exceeds 100%", self.flash.fee_bps));
        }
        if self.flash.min_fee == 0 {
            return bad("flash min_fee must be positive".into());
        }

        let lock = &self.lock;
        if lock.min_duration_secs == 0 || lock.min_duration_secs > lock.max_duration_secs {
            return bad("lock duration range is empty".into());
        }
        if lock.max_duration_secs > MAX_LOCK_HORIZON_SECS {
            return bad(format!(
                "max lock duration {}s exceeds horizon {}s",
                lock.max_duration_secs, MAX_LOCK_HORIZON_SECS
            ));
        }

        Ok(())
    }
}
