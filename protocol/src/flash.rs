//! # Flash Loans
//!
//! Uncollateralized, single-operation loans of pooled assets. The borrower
//! receives the principal, runs arbitrary logic in a callback, and must
//! leave the custody account holding at least its pre-loan balance plus the
//! fee by the time the callback returns. Anything less aborts the whole
//! operation and the host rolls the transfers back.
//!
//! ## Flow
//!
//! ```text
//!  fee check ─► snapshot custody balance ─► send principal
//!       │                                        │
//!       │            phase = ExternalCallPending │
//!       │                                        ▼
//!       │                             borrower.on_flash_loan(ctx)
//!       │                                        │
//!       │                          phase = Idle  ▼
//!       └──────────► balance >= snapshot + fee ? ─► route fee
//! ```
//!
//! Only the share of a balance backed by unlocked units can be lent. Every
//! other balance the vault controls (other pooled assets, the reward
//! budget) is snapshotted before the principal leaves and must be intact
//! when the callback returns.
//!
//! While the callback runs, every state-mutating operation on the same
//! vault fails with [`VaultError::ReentrantCall`]. The callback gets the
//! vault through [`FlashContext::vault`] so the guard is observable, not
//! just promised.
//!
//! ## Fee
//!
//! ```text
//! fee = floor(amount * fee_bps / 10_000)
//! ```
//!
//! A loan whose fee would fall below the configured floor is rejected with
//! [`VaultError::LoanTooSmall`] instead of being served for free.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::FeeRouting;
use crate::error::VaultError;
use crate::host::{transfer_checked, transfer_measured, TokenHost};
use crate::math::{bps_mul, mul_div_floor};
use crate::types::{AccountId, TokenId};
use crate::vault::core::{Phase, VaultCore};

/// Fee for a loan of `amount` at `fee_bps`.
///
/// # Errors
///
/// [`VaultError::LoanTooSmall`] if the fee is below `min_fee`.
pub fn compute_fee(amount: u64, fee_bps: u32, min_fee: u64) -> Result<u64, VaultError> {
    let fee = bps_mul(amount, fee_bps)?;
    if fee < min_fee {
        return Err(VaultError::LoanTooSmall { fee, min_fee });
    }
    Ok(fee)
}

/// Portion of `balance` backed by units that are not locked, floored.
pub fn lendable_amount(balance: u64, total_units: u128, locked_units: u128) -> Result<u64, VaultError> {
    if total_units == 0 {
        return Ok(0);
    }
    let free_units = total_units.checked_sub(locked_units).ok_or_else(|| {
        VaultError::InvariantViolation(format!(
            "{} units locked but only {} exist",
            locked_units, total_units
        ))
    })?;
    let lendable = mul_div_floor(balance as u128, free_units, total_units)?;
    u64::try_from(lendable).map_err(|_| VaultError::ArithmeticOverflow("lendable amount"))
}

/// A balance the borrower must not touch.
struct GuardedBalance {
    token: TokenId,
    holder: AccountId,
    before: u64,
}

/// Custody balances of every held token except `asset`, plus the reward
/// account's underlying.
fn guarded_balances(core: &VaultCore, asset: &TokenId) -> Vec<GuardedBalance> {
    let config = core.config();
    let host = core.host_arc();
    let mut guarded: Vec<GuardedBalance> = core
        .held_tokens()
        .into_iter()
        .filter(|token| token != asset)
        .map(|token| GuardedBalance {
            before: host.balance_of(&token, &config.custody_account),
            holder: config.custody_account.clone(),
            token,
        })
        .collect();
    guarded.push(GuardedBalance {
        token: config.underlying.clone(),
        holder: config.reward_account.clone(),
        before: host.balance_of(&config.underlying, &config.reward_account),
    });
    guarded
}

/// The loan in flight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLoanState {
    pub loan_id: Uuid,
    pub borrower: AccountId,
    pub asset: TokenId,
    pub principal: u64,
    pub fee_due: u64,
    /// Custody balance of `asset` before the principal left.
    pub balance_before: u64,
}

impl FlashLoanState {
    /// Custody balance the callback must leave behind.
    pub fn repayment_target(&self) -> Result<u64, VaultError> {
        self.balance_before
            .checked_add(self.fee_due)
            .ok_or(VaultError::ArithmeticOverflow("flash repayment"))
    }

    /// Principal plus fee.
    pub fn amount_owed(&self) -> Result<u64, VaultError> {
        self.principal
            .checked_add(self.fee_due)
            .ok_or(VaultError::ArithmeticOverflow("flash repayment"))
    }
}

/// Outcome of a repaid loan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLoanReceipt {
    pub loan_id: Uuid,
    pub asset: TokenId,
    pub principal: u64,
    /// Fee charged.
    pub fee: u64,
    /// What actually came back above the pre-loan balance. At least `fee`.
    pub fee_received: u64,
    pub routing: FeeRouting,
}

/// What the borrower's callback can see and do.
pub struct FlashContext<'a> {
    loan: &'a FlashLoanState,
    custody: AccountId,
    host: &'a dyn TokenHost,
    vault: &'a mut VaultCore,
}

impl<'a> FlashContext<'a> {
    pub fn loan(&self) -> &FlashLoanState {
        self.loan
    }

    /// The token host, for moving the borrowed funds around. Anything taken
    /// from a vault-controlled balance other than the loan fails the loan.
    pub fn host(&self) -> &dyn TokenHost {
        self.host
    }

    /// Where repayment has to land.
    pub fn custody_account(&self) -> &AccountId {
        &self.custody
    }

    /// Sends `amount` of the loaned asset from the borrower back to custody.
    pub fn repay(&self, amount: u64) -> Result<(), VaultError> {
        transfer_checked(
            self.host,
            &self.loan.asset,
            &self.loan.borrower,
            &self.custody,
            amount,
        )
    }

    /// The lending vault. Every state-mutating call fails with
    /// [`VaultError::ReentrantCall`] until the callback returns.
    pub fn vault(&mut self) -> &mut VaultCore {
        self.vault
    }
}

/// Borrower-side callback.
pub trait FlashBorrower {
    /// Called with the principal already in the borrower's account.
    fn on_flash_loan(&mut self, ctx: &mut FlashContext<'_>) -> Result<(), VaultError>;
}

/// Lends `amount` of `asset` to `borrower` for the duration of `callback`.
///
/// Must run inside an open host transaction; any error leaves it to the
/// caller to roll back both the host and the vault state.
pub(crate) fn execute(
    core: &mut VaultCore,
    borrower: &AccountId,
    asset: &TokenId,
    amount: u64,
    callback: &mut (dyn FlashBorrower + Send),
) -> Result<FlashLoanReceipt, VaultError> {
    core.ensure_idle()?;
    core.ensure_actor(borrower)?;
    if amount == 0 {
        return Err(VaultError::ZeroAmount);
    }

    let config = core.config_arc();
    config.pooled_token(asset)?;
    let fee = compute_fee(amount, config.flash.fee_bps, config.flash.min_fee)?;

    let routing = config.flash.fee_routing.clone();
    if routing == FeeRouting::RewardBudget && asset != &config.underlying {
        return Err(VaultError::FeeRoutingMismatch {
            routing: routing.to_string(),
            token: asset.clone(),
        });
    }

    let state = core.state();
    let lendable = lendable_amount(
        state.ledger.balance(asset),
        state.shares.total_units(),
        state.locks.total_locked(),
    )?;
    if amount > lendable {
        return Err(VaultError::InsufficientBalance {
            asset: asset.to_string(),
            available: lendable as u128,
            requested: amount as u128,
        });
    }

    let host = core.host_arc();
    let custody = config.custody_account.clone();
    let loan = FlashLoanState {
        loan_id: Uuid::new_v4(),
        borrower: borrower.clone(),
        asset: asset.clone(),
        principal: amount,
        fee_due: fee,
        balance_before: host.balance_of(asset, &custody),
    };
    let version_before = core.state().version;
    let guarded = guarded_balances(core, asset);

    transfer_checked(host.as_ref(), asset, &custody, borrower, amount)?;
    debug!(loan_id = %loan.loan_id, %borrower, %asset, amount, fee, "flash loan sent");

    core.set_phase(Phase::ExternalCallPending {
        operation: "flash_loan",
    });
    let outcome = {
        let mut ctx = FlashContext {
            loan: &loan,
            custody: custody.clone(),
            host: host.as_ref(),
            vault: &mut *core,
        };
        callback.on_flash_loan(&mut ctx)
    };
    core.set_phase(Phase::Idle);
    outcome?;

    let expected = loan.repayment_target()?;
    let observed = host.balance_of(asset, &custody);
    if observed < expected {
        return Err(VaultError::FlashLoanNotRepaid { expected, observed });
    }
    for balance in &guarded {
        let after = host.balance_of(&balance.token, &balance.holder);
        if after < balance.before {
            return Err(VaultError::InvariantViolation(format!(
                "{} lost {} {} during flash loan",
                balance.holder,
                balance.before - after,
                balance.token
            )));
        }
    }
    if core.state().version != version_before {
        return Err(VaultError::InvariantViolation(
            "vault state changed during flash loan callback".into(),
        ));
    }

    let fee_received = observed - loan.balance_before;
    route_fee(core, &routing, asset, fee_received)?;

    info!(
        loan_id = %loan.loan_id,
        %borrower,
        %asset,
        amount,
        fee_received,
        routing = %routing,
        "flash loan repaid"
    );
    Ok(FlashLoanReceipt {
        loan_id: loan.loan_id,
        asset: asset.clone(),
        principal: amount,
        fee,
        fee_received,
        routing,
    })
}

fn route_fee(
    core: &mut VaultCore,
    routing: &FeeRouting,
    asset: &TokenId,
    fee_received: u64,
) -> Result<(), VaultError> {
    let config = core.config_arc();
    let host = core.host_arc();
    match routing {
        FeeRouting::Pool => {
            core.state_mut().ledger.credit(asset, fee_received)?;
        }
        FeeRouting::RewardBudget => {
            let funded = transfer_measured(
                host.as_ref(),
                asset,
                &config.custody_account,
                &config.reward_account,
                fee_received,
            )?;
            core.state_mut().rewards.fund(funded)?;
        }
        FeeRouting::Treasury { account } => {
            transfer_checked(
                host.as_ref(),
                asset,
                &config.custody_account,
                account,
                fee_received,
            )?;
        }
    }
    core.bump_version();
    Ok(())
}
