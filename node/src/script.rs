//! # Operation Scripts
//!
//! A script is a JSON list of steps replayed in order against one vault
//! wired to in-memory collaborators. Steps either drive the environment
//! (mint tokens, publish prices, move the clock) or call a vault
//! operation. Each step's result or error is recorded; a failed vault
//! operation leaves no trace in the pool, exactly as it would on a real
//! host, so replay can continue past it.
//!
//! ```json
//! {
//!   "start_unix": 1767225600,
//!   "steps": [
//!     { "mint": { "token": "USDC", "to": "alice", "amount": 1000000000 } },
//!     { "deposit": { "account": "alice", "token": "USDC", "amount": 1000000000 } },
//!     { "advance": { "secs": 3600 } },
//!     "audit"
//!   ]
//! }
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use custody_protocol::account::AccountView;
use custody_protocol::vault::AuditReport;
use custody_protocol::{
    AccountId, Collaborators, CustodyVault, DepositRequest, FixedRateVenue, FlashBorrower,
    FlashContext, ManualClock, MemoryTokenHost, PoolSnapshot, StaticPriceFeed, TokenId,
    VaultConfig, VaultError,
};

/// Default start of simulated time: 2026-01-01T00:00:00Z.
pub const DEFAULT_START_UNIX: i64 = 1_767_225_600;

fn default_start() -> i64 {
    DEFAULT_START_UNIX
}

fn default_venue() -> AccountId {
    AccountId::new("venue")
}

fn default_true() -> bool {
    true
}

/// A replayable scenario.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Script {
    /// Simulated wall-clock time at the first step.
    #[serde(default = "default_start")]
    pub start_unix: i64,
    /// Address the exchange venue pays conversions from.
    #[serde(default = "default_venue")]
    pub venue: AccountId,
    pub steps: Vec<Step>,
}

impl Script {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("malformed script")
    }
}

/// One scripted action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    // -- environment --------------------------------------------------------
    Mint {
        token: TokenId,
        to: AccountId,
        amount: u64,
    },
    /// Publishes a quote stamped with the current simulated time.
    SetPrice {
        token: TokenId,
        price: i128,
        decimals: u8,
    },
    /// Venue output per input, as `numerator / denominator`.
    SetRate {
        token: TokenId,
        numerator: u64,
        denominator: u64,
    },
    SetTransferFee {
        token: TokenId,
        bps: u32,
    },
    /// Makes the venue settle `secs` after the request.
    SetVenueLatency {
        secs: i64,
    },
    Advance {
        secs: i64,
    },

    // -- vault operations ---------------------------------------------------
    Deposit(DepositRequest),
    Withdraw {
        account: AccountId,
        units: u128,
        token: TokenId,
    },
    TransferUnits {
        from: AccountId,
        to: AccountId,
        units: u128,
    },
    Lock {
        account: AccountId,
        units: u128,
        duration_secs: u64,
    },
    Unlock {
        account: AccountId,
    },
    Claim {
        account: AccountId,
    },
    FundRewards {
        funder: AccountId,
        amount: u64,
    },
    /// The borrower repays principal plus fee plus `tip`, or nothing at
    /// all when `repay` is false.
    FlashLoan {
        borrower: AccountId,
        asset: TokenId,
        amount: u64,
        #[serde(default)]
        tip: u64,
        #[serde(default = "default_true")]
        repay: bool,
    },
    EnableAutoConvert {
        account: AccountId,
    },
    RecoverStray {
        token: TokenId,
        to: AccountId,
    },

    // -- views --------------------------------------------------------------
    Inspect {
        account: AccountId,
    },
    Audit,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Mint { .. } => "mint",
            Step::SetPrice { .. } => "set_price",
            Step::SetRate { .. } => "set_rate",
            Step::SetTransferFee { .. } => "set_transfer_fee",
            Step::SetVenueLatency { .. } => "set_venue_latency",
            Step::Advance { .. } => "advance",
            Step::Deposit(_) => "deposit",
            Step::Withdraw { .. } => "withdraw",
            Step::TransferUnits { .. } => "transfer_units",
            Step::Lock { .. } => "lock",
            Step::Unlock { .. } => "unlock",
            Step::Claim { .. } => "claim",
            Step::FundRewards { .. } => "fund_rewards",
            Step::FlashLoan { .. } => "flash_loan",
            Step::EnableAutoConvert { .. } => "enable_auto_convert",
            Step::RecoverStray { .. } => "recover_stray",
            Step::Inspect { .. } => "inspect",
            Step::Audit => "audit",
        }
    }
}

/// Result of one replayed step.
#[derive(Clone, Debug, Serialize)]
pub struct StepOutcome {
    pub index: usize,
    pub op: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything `simulate` prints.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationReport {
    pub steps: Vec<StepOutcome>,
    pub failures: usize,
    pub pool: PoolSnapshot,
    /// Every non-reserved unit holder.
    pub accounts: Vec<AccountView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_error: Option<String>,
}

/// Flash-loan callback driven by a [`Step::FlashLoan`].
struct ScriptedBorrower {
    tip: u64,
    repay: bool,
}

impl FlashBorrower for ScriptedBorrower {
    fn on_flash_loan(&mut self, ctx: &mut FlashContext<'_>) -> Result<(), VaultError> {
        if !self.repay {
            return Ok(());
        }
        let owed = ctx
            .loan()
            .amount_owed()?
            .checked_add(self.tip)
            .ok_or(VaultError::ArithmeticOverflow("scripted repayment"))?;
        ctx.repay(owed)
    }
}

/// A vault plus handles on its in-memory collaborators.
pub struct Simulation {
    vault: CustodyVault,
    host: MemoryTokenHost,
    feed: StaticPriceFeed,
    venue: FixedRateVenue,
    clock: ManualClock,
}

impl Simulation {
    pub fn new(config: VaultConfig, start_unix: i64, venue: AccountId) -> Result<Self> {
        let clock = ManualClock::at_unix(start_unix);
        let host = MemoryTokenHost::new();
        let feed = StaticPriceFeed::new(clock.clone());
        let fixed_venue = FixedRateVenue::new(host.clone(), clock.clone(), venue);

        let vault = CustodyVault::new(
            config,
            Collaborators {
                host: Arc::new(host.clone()),
                feed: Arc::new(feed.clone()),
                venue: Some(Arc::new(fixed_venue.clone())),
                clock: Arc::new(clock.clone()),
            },
        )
        .context("vault configuration rejected")?;

        Ok(Self {
            vault,
            host,
            feed,
            venue: fixed_venue,
            clock,
        })
    }

    /// Replays every step of `script` and collects the final state.
    ///
    /// With `strict`, the first failing step aborts the replay with an
    /// error naming the step.
    pub async fn run(&self, script: &Script, strict: bool) -> Result<SimulationReport> {
        let mut steps = Vec::with_capacity(script.steps.len());

        for (index, step) in script.steps.iter().enumerate() {
            let op = step.name();
            match self.apply(step).await {
                Ok(output) => {
                    debug!(index, op, "step applied");
                    steps.push(StepOutcome {
                        index,
                        op,
                        ok: true,
                        output: Some(output),
                        error: None,
                    });
                }
                Err(e) if strict => {
                    return Err(e.context(format!("step {} ({}) failed", index, op)));
                }
                Err(e) => {
                    warn!(index, op, error = %e, "step failed");
                    steps.push(StepOutcome {
                        index,
                        op,
                        ok: false,
                        output: None,
                        error: Some(format!("{:#}", e)),
                    });
                }
            }
        }

        let failures = steps.iter().filter(|s| !s.ok).count();
        let pool = self.vault.snapshot().await;
        let mut accounts = Vec::new();
        for account in pool.holdings.keys() {
            if self.vault.config().is_reserved(account) {
                continue;
            }
            accounts.push(self.vault.account_view(account).await?);
        }
        let (audit, audit_error) = match self.vault.audit().await {
            Ok(report) => (Some(report), None),
            Err(e) => (None, Some(e.to_string())),
        };

        info!(
            steps = steps.len(),
            failures,
            total_units = pool.total_units,
            "simulation finished"
        );
        Ok(SimulationReport {
            steps,
            failures,
            pool,
            accounts,
            audit,
            audit_error,
        })
    }

    /// Applies one step and returns its JSON-rendered result.
    pub async fn apply(&self, step: &Step) -> Result<Value> {
        let vault = &self.vault;
        let output = match step {
            Step::Mint { token, to, amount } => {
                self.host.mint(token, to, *amount);
                Value::Null
            }
            Step::SetPrice {
                token,
                price,
                decimals,
            } => {
                self.feed.set_price(token, *price, *decimals);
                Value::Null
            }
            Step::SetRate {
                token,
                numerator,
                denominator,
            } => {
                self.venue.set_rate(token, *numerator, *denominator);
                Value::Null
            }
            Step::SetTransferFee { token, bps } => {
                self.host.set_transfer_fee_bps(token, *bps);
                Value::Null
            }
            Step::SetVenueLatency { secs } => {
                self.venue.set_latency_secs(*secs);
                Value::Null
            }
            Step::Advance { secs } => {
                self.clock.advance(*secs);
                Value::Null
            }
            Step::Deposit(request) => serde_json::to_value(vault.deposit(request.clone()).await?)?,
            Step::Withdraw {
                account,
                units,
                token,
            } => serde_json::to_value(vault.withdraw(account, *units, token).await?)?,
            Step::TransferUnits { from, to, units } => {
                vault.transfer_units(from, to, *units).await?;
                Value::Null
            }
            Step::Lock {
                account,
                units,
                duration_secs,
            } => serde_json::to_value(vault.lock(account, *units, *duration_secs).await?)?,
            Step::Unlock { account } => serde_json::to_value(vault.unlock(account).await?)?,
            Step::Claim { account } => Value::from(vault.claim_rewards(account).await?),
            Step::FundRewards { funder, amount } => {
                Value::from(vault.fund_rewards(funder, *amount).await?)
            }
            Step::FlashLoan {
                borrower,
                asset,
                amount,
                tip,
                repay,
            } => {
                let mut callback = ScriptedBorrower {
                    tip: *tip,
                    repay: *repay,
                };
                serde_json::to_value(vault.flash_loan(borrower, asset, *amount, &mut callback).await?)?
            }
            Step::EnableAutoConvert { account } => {
                Value::from(vault.enable_auto_convert(account).await?)
            }
            Step::RecoverStray { token, to } => Value::from(vault.recover_stray(token, to).await?),
            Step::Inspect { account } => serde_json::to_value(vault.account_view(account).await?)?,
            Step::Audit => serde_json::to_value(vault.audit().await?)?,
        };
        Ok(output)
    }
}

/// The scenario `init` writes next to the default configuration: a
/// deposit, a funded month-long lock, a flash loan and a full exit.
pub fn sample_script() -> Script {
    let usdc = TokenId::new("USDC");
    let alice = AccountId::new("alice");
    let bob = AccountId::new("bob");
    let sponsor = AccountId::new("sponsor");

    Script {
        start_unix: DEFAULT_START_UNIX,
        venue: default_venue(),
        steps: vec![
            Step::Mint {
                token: usdc.clone(),
                to: alice.clone(),
                amount: 1_000_000_000,
            },
            Step::Mint {
                token: usdc.clone(),
                to: sponsor.clone(),
                amount: 5_000_000,
            },
            Step::Mint {
                token: usdc.clone(),
                to: bob.clone(),
                amount: 1_000_000,
            },
            Step::Deposit(DepositRequest {
                account: alice.clone(),
                token: usdc.clone(),
                amount: 1_000_000_000,
                conversion: None,
            }),
            Step::FundRewards {
                funder: sponsor,
                amount: 5_000_000,
            },
            Step::Lock {
                account: alice.clone(),
                units: 500_000_000,
                duration_secs: 30 * 86_400,
            },
            Step::FlashLoan {
                borrower: bob,
                asset: usdc.clone(),
                amount: 100_000_000,
                tip: 0,
                repay: true,
            },
            Step::Advance { secs: 31 * 86_400 },
            Step::Unlock {
                account: alice.clone(),
            },
            Step::Inspect {
                account: alice.clone(),
            },
            Step::Withdraw {
                account: alice,
                units: 999_999_000,
                token: usdc,
            },
            Step::Audit,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simulation() -> Simulation {
        Simulation::new(VaultConfig::default(), DEFAULT_START_UNIX, default_venue()).unwrap()
    }

    #[tokio::test]
    async fn sample_script_runs_clean() {
        let script = sample_script();
        let sim = simulation();

        let report = sim.run(&script, true).await.unwrap();

        assert_eq!(report.failures, 0);
        assert!(report.audit.is_some(), "audit failed: {:?}", report.audit_error);
        // Only the offset held by the sink remains.
        assert_eq!(report.pool.total_units, 1_000);
        assert!(report.accounts.is_empty());
        // 500_000_000 units for 30 days at the default rate.
        assert_eq!(report.pool.reward_paid, 1_296_000);
    }

    #[tokio::test]
    async fn failed_step_is_recorded_and_replay_continues() {
        let script = Script::from_json(
            r#"{
                "steps": [
                    { "mint": { "token": "USDC", "to": "alice", "amount": 5000 } },
                    { "deposit": { "account": "alice", "token": "USDC", "amount": 9000 } },
                    { "deposit": { "account": "alice", "token": "USDC", "amount": 5000 } },
                    "audit"
                ]
            }"#,
        )
        .unwrap();
        let sim = simulation();

        let report = sim.run(&script, false).await.unwrap();

        assert_eq!(report.failures, 1);
        assert!(!report.steps[1].ok);
        assert!(report.steps[2].ok);
        assert_eq!(report.pool.total_units, 5_000);
        assert_eq!(report.accounts.len(), 1);
        assert_eq!(report.accounts[0].units, 4_000);
    }

    #[tokio::test]
    async fn strict_mode_names_the_failing_step() {
        let script = Script {
            start_unix: DEFAULT_START_UNIX,
            venue: default_venue(),
            steps: vec![Step::Unlock {
                account: AccountId::new("nobody"),
            }],
        };
        let sim = simulation();

        let err = sim.run(&script, true).await.unwrap_err();

        assert!(format!("{:#}", err).contains("step 0 (unlock) failed"));
        assert_eq!(
            err.downcast_ref::<VaultError>(),
            Some(&VaultError::NotLocked(AccountId::new("nobody")))
        );
    }

    #[test]
    fn unit_steps_parse_from_bare_strings() {
        let script = Script::from_json(r#"{ "steps": ["audit"] }"#).unwrap();
        assert_eq!(script.steps, vec![Step::Audit]);
        assert_eq!(script.start_unix, DEFAULT_START_UNIX);
        assert_eq!(script.venue, AccountId::new("venue"));
    }

    #[test]
    fn sample_script_survives_json() {
        let json = serde_json::to_string_pretty(&sample_script()).unwrap();
        assert_eq!(Script::from_json(&json).unwrap(), sample_script());
    }
}
