//! # Vault Module — Custody Facade
//!
//! [`CustodyVault`] is the public face of a pool. It owns the
//! [`VaultCore`] behind a `tokio::sync::Mutex`, so top-level operations on
//! one pool run strictly one after another, each holding the lock across
//! its oracle and exchange awaits.
//!
//! ## Architecture
//!
//! ```text
//! mod.rs   — CustodyVault: async facade, price books, auto-conversion
//! core.rs  — VaultCore: state, Phase, synchronous operations, audit
//! ```
//!
//! ## Atomicity
//!
//! Every mutating operation is bracketed by `begin` / `finish` on the core:
//!
//! 1. Save the pool state and open a host transaction.
//! 2. Run the operation.
//! 3. On success commit; on any error roll the host back and restore the
//!    saved state.
//!
//! A caller therefore sees either the whole effect of an operation or none
//! of it, including token movements that happened before the failing step.

pub mod core;

pub use self::core::{
    AuditReport, LockReceipt, MintReceipt, Phase, PoolSnapshot, UnlockReceipt, VaultCore,
    VaultState, WithdrawReceipt,
};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::account::AccountView;
use crate::clock::Clock;
use crate::config::VaultConfig;
use crate::error::VaultError;
use crate::exchange::{min_output, ConversionBounds, ExchangeAdapter, ExchangeVenue, SwapRequest};
use crate::flash::{FlashBorrower, FlashLoanReceipt};
use crate::host::TokenHost;
use crate::oracle::{OracleGateway, PriceBook, PriceFeed};
use crate::types::{AccountId, TokenId};

/// External services a vault is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub host: Arc<dyn TokenHost>,
    pub feed: Arc<dyn PriceFeed>,
    /// Needed only for auto-converting deposits.
    pub venue: Option<Arc<dyn ExchangeVenue>>,
    pub clock: Arc<dyn Clock>,
}

/// A deposit as submitted by a caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRequest {
    pub account: AccountId,
    pub token: TokenId,
    pub amount: u64,
    /// Required when the account has auto-convert on and `token` is not
    /// the underlying.
    #[serde(default)]
    pub conversion: Option<ConversionBounds>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositReceipt {
    /// Token the caller sent.
    pub deposited_token: TokenId,
    /// What custody actually received of it.
    pub received: u64,
    /// Underlying obtained by auto-conversion, if any.
    pub converted: Option<u64>,
    pub mint: MintReceipt,
}

/// Pool value at fresh prices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolValuation {
    pub underlying: TokenId,
    pub total_units: u128,
    pub total_value: u128,
}

/// A custody pool with its collaborators.
pub struct CustodyVault {
    config: Arc<VaultConfig>,
    core: Mutex<VaultCore>,
    oracle: OracleGateway,
    exchange: Option<ExchangeAdapter>,
}

impl CustodyVault {
    /// Validates `config` and wires up an empty pool.
    pub fn new(config: VaultConfig, collaborators: Collaborators) -> Result<Self, VaultError> {
        config.validate()?;
        let config = Arc::new(config);
        let Collaborators {
            host,
            feed,
            venue,
            clock,
        } = collaborators;

        let oracle = OracleGateway::new(feed, config.oracle.clone(), Arc::clone(&clock));
        let exchange = venue.map(|venue| {
            ExchangeAdapter::new(
                venue,
                Arc::clone(&host),
                Arc::clone(&clock),
                config.custody_account.clone(),
                config.underlying.clone(),
            )
        });
        let core = VaultCore::new(Arc::clone(&config), host, clock);

        info!(
            underlying = %config.underlying,
            tokens = config.tokens.len(),
            routing = %config.flash.fee_routing,
            "custody vault created"
        );
        Ok(Self {
            config,
            core: Mutex::new(core),
            oracle,
            exchange,
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Runs a synchronous core operation as one atomic unit.
    async fn atomic<T, F>(&self, operation: &'static str, op: F) -> Result<T, VaultError>
    where
        F: FnOnce(&mut VaultCore) -> Result<T, VaultError>,
    {
        let mut core = self.core.lock().await;
        core.begin(operation)?;
        let result = op(&mut core);
        core.finish(&result);
        result
    }

    /// Validated prices for every held token plus `extra`.
    async fn price_book(&self, core: &mut VaultCore, extra: &[&TokenId]) -> Result<PriceBook, VaultError> {
        let mut tokens = core.held_tokens();
        tokens.extend(extra.iter().map(|t| (*t).clone()));

        core.set_phase(Phase::ExternalCallPending { operation: "oracle" });
        let book = self
            .oracle
            .price_book(&self.config.underlying, tokens.iter())
            .await;
        core.set_phase(Phase::Idle);
        book
    }

    // -- deposits & withdrawals ---------------------------------------------

    /// Deposits `request.amount` of `request.token` and mints units for
    /// what actually arrived.
    ///
    /// With auto-convert on, a non-underlying deposit is swapped to the
    /// underlying first; the swap must beat the caller's slippage bound
    /// against the oracle price and settle before the deadline.
    pub async fn deposit(&self, request: DepositRequest) -> Result<DepositReceipt, VaultError> {
        let mut core = self.core.lock().await;
        core.begin("deposit")?;
        let result = self.deposit_inner(&mut core, &request).await;
        core.finish(&result);

        if let Ok(receipt) = &result {
            info!(
                account = %request.account,
                token = %request.token,
                received = receipt.received,
                value = receipt.mint.value_in,
                units = receipt.mint.units_minted,
                "deposit settled"
            );
        }
        result
    }

    async fn deposit_inner(&self, core: &mut VaultCore, request: &DepositRequest) -> Result<DepositReceipt, VaultError> {
        let underlying = &self.config.underlying;
        let foreign = &request.token != underlying;
        let convert = foreign && core.state().accounts.auto_convert(&request.account);

        let bounds = match (&request.conversion, convert) {
            (Some(bounds), true) => Some(bounds.clone()),
            (None, true) => {
                return Err(VaultError::InvalidParameter(
                    "auto-convert deposits need slippage and deadline bounds".into(),
                ))
            }
            (Some(_), false) if foreign => {
                return Err(VaultError::InvalidParameter(
                    "conversion bounds given but auto-convert is off".into(),
                ))
            }
            _ => None,
        };

        let prices = self.price_book(core, &[&request.token]).await?;
        let received = core.intake(&request.account, &request.token, request.amount)?;

        let Some(bounds) = bounds else {
            let mint = core.settle_deposit(&request.account, &request.token, received, &prices)?;
            return Ok(DepositReceipt {
                deposited_token: request.token.clone(),
                received,
                converted: None,
                mint,
            });
        };

        let exchange = self.exchange.as_ref().ok_or_else(|| {
            VaultError::InvalidConfig("auto-convert requires an exchange venue".into())
        })?;
        let expected = prices.value_of(&self.config, &request.token, received)?;
        let expected =
            u64::try_from(expected).map_err(|_| VaultError::ArithmeticOverflow("expected swap output"))?;
        let swap = SwapRequest {
            token_in: request.token.clone(),
            amount_in: received,
            min_amount_out: min_output(expected, bounds.max_slippage_bps)?,
            deadline: bounds.deadline,
        };

        core.set_phase(Phase::ExternalCallPending { operation: "exchange" });
        let swapped = exchange.swap(&swap).await;
        core.set_phase(Phase::Idle);
        let swapped = swapped?;

        let mint = core.settle_deposit(&request.account, underlying, swapped, &prices)?;
        Ok(DepositReceipt {
            deposited_token: request.token.clone(),
            received,
            converted: Some(swapped),
            mint,
        })
    }

    /// Burns `units` of `account` and pays their value in `token`.
    pub async fn withdraw(
        &self,
        account: &AccountId,
        units: u128,
        token: &TokenId,
    ) -> Result<WithdrawReceipt, VaultError> {
        let mut core = self.core.lock().await;
        core.begin("withdraw")?;
        let result = match self.price_book(&mut core, &[token]).await {
            Ok(prices) => core.withdraw(account, units, token, &prices),
            Err(e) => Err(e),
        };
        core.finish(&result);

        if let Ok(receipt) = &result {
            info!(
                %account,
                %token,
                units,
                value = receipt.value_out,
                amount = receipt.amount_out,
                "withdrawal paid"
            );
        }
        result
    }

    pub async fn transfer_units(&self, from: &AccountId, to: &AccountId, units: u128) -> Result<(), VaultError> {
        self.atomic("transfer_units", |core| core.transfer_units(from, to, units))
            .await
    }

    // -- locks & rewards ----------------------------------------------------

    pub async fn lock(&self, account: &AccountId, units: u128, duration_secs: u64) -> Result<LockReceipt, VaultError> {
        self.atomic("lock", |core| core.lock(account, units, duration_secs))
            .await
    }

    /// Releases a matured lock.
    pub async fn unlock(&self, account: &AccountId) -> Result<UnlockReceipt, VaultError> {
        self.atomic("unlock", |core| core.unlock(account)).await
    }

    pub async fn claim_rewards(&self, account: &AccountId) -> Result<u64, VaultError> {
        self.atomic("claim_rewards", |core| core.claim_rewards(account))
            .await
    }

    pub async fn calculate_reward(&self, account: &AccountId) -> Result<u64, VaultError> {
        self.core.lock().await.calculate_reward(account)
    }

    pub async fn fund_rewards(&self, funder: &AccountId, amount: u64) -> Result<u64, VaultError> {
        self.atomic("fund_rewards", |core| core.fund_rewards(funder, amount))
            .await
    }

    // -- flash loans --------------------------------------------------------

    /// Lends `amount` of `asset` to `borrower` for one callback.
    pub async fn flash_loan(
        &self,
        borrower: &AccountId,
        asset: &TokenId,
        amount: u64,
        callback: &mut (dyn FlashBorrower + Send),
    ) -> Result<FlashLoanReceipt, VaultError> {
        self.atomic("flash_loan", |core| core.flash_loan(borrower, asset, amount, callback))
            .await
    }

    // -- accounts & recovery ------------------------------------------------

    pub async fn enable_auto_convert(&self, account: &AccountId) -> Result<bool, VaultError> {
        self.atomic("enable_auto_convert", |core| core.enable_auto_convert(account))
            .await
    }

    pub async fn recover_stray(&self, token: &TokenId, to: &AccountId) -> Result<u64, VaultError> {
        self.atomic("recover_stray", |core| core.recover_stray(token, to))
            .await
    }

    // -- views --------------------------------------------------------------

    pub async fn account_view(&self, account: &AccountId) -> Result<AccountView, VaultError> {
        self.core.lock().await.account_view(account)
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        self.core.lock().await.snapshot()
    }

    /// A copy of the full pool state.
    pub async fn state(&self) -> VaultState {
        self.core.lock().await.state().clone()
    }

    /// Pool value at prices fetched now.
    pub async fn pool_value(&self) -> Result<PoolValuation, VaultError> {
        let mut core = self.core.lock().await;
        let prices = self.price_book(&mut core, &[]).await?;
        Ok(PoolValuation {
            underlying: self.config.underlying.clone(),
            total_units: core.state().shares.total_units(),
            total_value: core.total_value(&prices)?,
        })
    }

    /// Audits the pool at prices fetched now.
    pub async fn audit(&self) -> Result<AuditReport, VaultError> {
        let mut core = self.core.lock().await;
        let prices = self.price_book(&mut core, &[]).await?;
        core.audit(&prices)
    }
}
