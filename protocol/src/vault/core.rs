//! # Vault Core
//!
//! The synchronous heart of a custody vault: pool state, the reentrancy
//! phase, and every state-mutating operation.
//!
//! ## Reentrancy
//!
//! ```text
//!   Idle ──(oracle / exchange / flash callback)──► ExternalCallPending
//!    ▲                                                     │
//!    └──────────────────── call returns ◄──────────────────┘
//! ```
//!
//! Every mutating operation starts with [`VaultCore::ensure_idle`]. A
//! borrower that reaches back into the vault from a flash-loan callback
//! gets [`VaultError::ReentrantCall`] and nothing else.
//!
//! ## Ordering
//!
//! Each operation runs all of its checks first, then applies its ledger
//! and unit mutations, then performs outbound transfers. Operations are
//! not individually atomic: [`CustodyVault`](super::CustodyVault) wraps
//! each one in a checkpoint and a host transaction and undoes both on
//! error.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::account::{AccountRegistry, AccountView};
use crate::clock::Clock;
use crate::config::VaultConfig;
use crate::error::VaultError;
use crate::flash::{self, FlashBorrower, FlashLoanReceipt};
use crate::host::{transfer_checked, transfer_measured, TokenHost};
use crate::ledger::AssetLedger;
use crate::lock::{LockRecord, LockSchedule};
use crate::oracle::PriceBook;
use crate::reward::{full_reward, RewardPool};
use crate::shares::ShareLedger;
use crate::types::{AccountId, TokenId};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Where the pool is relative to outbound calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    /// Control is with an oracle, exchange or borrower.
    ExternalCallPending { operation: &'static str },
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::ExternalCallPending { operation } => {
                write!(f, "external call pending ({})", operation)
            }
        }
    }
}

/// Everything a vault remembers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultState {
    pub ledger: AssetLedger,
    pub shares: ShareLedger,
    pub locks: LockSchedule,
    pub rewards: RewardPool,
    pub accounts: AccountRegistry,
    /// Bumped by every mutation.
    pub version: u64,
}

/// State saved at the start of a top-level operation.
struct Checkpoint {
    operation: &'static str,
    state: VaultState,
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

/// Result of a settled deposit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintReceipt {
    pub account: AccountId,
    /// Token credited to the pool.
    pub token: TokenId,
    /// Amount credited to the pool.
    pub amount: u64,
    pub value_in: u128,
    pub units_minted: u128,
    /// First-deposit offset minted to the sink.
    pub sink_units: u128,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawReceipt {
    pub account: AccountId,
    pub token: TokenId,
    pub units_burned: u128,
    /// Value the burned units redeemed.
    pub value_out: u128,
    /// Amount of `token` paid out.
    pub amount_out: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockReceipt {
    pub account: AccountId,
    pub record: LockRecord,
    /// Reward reserved for the full duration.
    pub promised_reward: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockReceipt {
    pub account: AccountId,
    pub units_released: u128,
    pub reward_paid: u64,
}

/// Point-in-time view of the whole pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub total_units: u128,
    pub holdings: BTreeMap<AccountId, u128>,
    pub balances: BTreeMap<TokenId, u64>,
    pub reward_available: u64,
    pub reward_outstanding: u64,
    pub reward_paid: u64,
    pub active_locks: usize,
    pub version: u64,
    pub phase: String,
}

/// Outcome of a clean audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub total_units: u128,
    pub total_value: u128,
    pub tokens_checked: usize,
    pub locks_checked: usize,
}

// ---------------------------------------------------------------------------
// VaultCore
// ---------------------------------------------------------------------------

/// Pool state plus the collaborators every synchronous operation needs.
pub struct VaultCore {
    config: Arc<VaultConfig>,
    host: Arc<dyn TokenHost>,
    clock: Arc<dyn Clock>,
    state: VaultState,
    phase: Phase,
    open: Option<Checkpoint>,
}

impl VaultCore {
    pub fn new(config: Arc<VaultConfig>, host: Arc<dyn TokenHost>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            host,
            clock,
            state: VaultState::default(),
            phase: Phase::Idle,
            open: None,
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub(crate) fn config_arc(&self) -> Arc<VaultConfig> {
        Arc::clone(&self.config)
    }

    pub(crate) fn host_arc(&self) -> Arc<dyn TokenHost> {
        Arc::clone(&self.host)
    }

    pub fn state(&self) -> &VaultState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut VaultState {
        &mut self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        debug!(from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
    }

    pub(crate) fn bump_version(&mut self) {
        self.state.version = self.state.version.wrapping_add(1);
    }

    /// Fails unless no external call is in flight.
    pub fn ensure_idle(&self) -> Result<(), VaultError> {
        match self.phase {
            Phase::Idle => Ok(()),
            phase => {
                warn!(%phase, "reentrant call rejected");
                Err(VaultError::ReentrantCall {
                    phase: phase.to_string(),
                })
            }
        }
    }

    /// Fails for addresses the vault itself controls.
    pub fn ensure_actor(&self, account: &AccountId) -> Result<(), VaultError> {
        if self.config.is_reserved(account) {
            return Err(VaultError::ReservedAccount(account.clone()));
        }
        Ok(())
    }

    /// Units of `account` not under lock.
    pub fn free_units(&self, account: &AccountId) -> u128 {
        self.state
            .shares
            .units_of(account)
            .saturating_sub(self.state.locks.locked_units(account))
    }

    /// Every token the pool holds a balance in.
    pub fn held_tokens(&self) -> Vec<TokenId> {
        self.state.ledger.held_tokens().cloned().collect()
    }

    /// Pool value at the book's prices.
    pub fn total_value(&self, prices: &PriceBook) -> Result<u128, VaultError> {
        self.state.ledger.total_value(&self.config, prices)
    }

    // -- atomic sections ----------------------------------------------------

    /// Opens a top-level operation: saves the state and opens a host
    /// transaction. An operation abandoned mid-flight (its future dropped)
    /// is rolled back here first.
    ///
    /// Only the facade calls this, while holding the pool lock, so no
    /// external call of this pool can be in flight.
    pub(crate) fn begin(&mut self, operation: &'static str) -> Result<(), VaultError> {
        if let Some(stale) = self.open.take() {
            warn!(operation = stale.operation, "rolling back abandoned operation");
            self.host.rollback();
            self.state = stale.state;
        }
        if self.phase != Phase::Idle {
            warn!(phase = %self.phase, "clearing phase left by abandoned call");
            self.phase = Phase::Idle;
        }
        self.host.begin();
        self.open = Some(Checkpoint {
            operation,
            state: self.state.clone(),
        });
        Ok(())
    }

    /// Closes the operation opened by [`begin`](Self::begin): commits on
    /// success, restores the saved state and rolls the host back on error.
    pub(crate) fn finish<T>(&mut self, result: &Result<T, VaultError>) {
        self.phase = Phase::Idle;
        let Some(checkpoint) = self.open.take() else {
            return;
        };
        match result {
            Ok(_) => {
                self.host.commit();
                info!(
                    operation = checkpoint.operation,
                    version = self.state.version,
                    "operation committed"
                );
            }
            Err(error) => {
                self.host.rollback();
                self.state = checkpoint.state;
                warn!(operation = checkpoint.operation, %error, "operation rolled back");
            }
        }
    }

    // -- deposits & withdrawals ---------------------------------------------

    /// Pulls `amount` of `token` from `account` into custody. Returns what
    /// actually arrived. The ledger is not touched.
    pub fn intake(&mut self, account: &AccountId, token: &TokenId, amount: u64) -> Result<u64, VaultError> {
        self.ensure_idle()?;
        self.ensure_actor(account)?;
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        self.config.pooled_token(token)?;

        let received = transfer_measured(
            self.host.as_ref(),
            token,
            account,
            &self.config.custody_account,
            amount,
        )?;
        if received == 0 {
            return Err(VaultError::ZeroAmount);
        }
        debug!(%account, %token, requested = amount, received, "deposit received");
        Ok(received)
    }

    /// Credits `amount` of custody-held `token` to the pool and mints units
    /// against the pool value before the credit.
    pub fn settle_deposit(
        &mut self,
        account: &AccountId,
        token: &TokenId,
        amount: u64,
        prices: &PriceBook,
    ) -> Result<MintReceipt, VaultError> {
        self.ensure_idle()?;
        self.ensure_actor(account)?;
        self.config.pooled_token(token)?;

        let value_before = self.total_value(prices)?;
        let value_in = prices.value_of(&self.config, token, amount)?;
        let preview = self
            .state
            .shares
            .preview_mint(value_in, value_before, self.config.min_units)?;
        debug!(
            %account,
            %token,
            value = value_in,
            value_before,
            units = preview.units_out,
            "mint previewed"
        );

        let now = self.clock.now();
        self.state.ledger.record_deposit(account, token, amount)?;
        self.state
            .shares
            .apply_mint(account, &self.config.custody_account, preview)?;
        self.state.accounts.touch(account, now);
        self.bump_version();

        Ok(MintReceipt {
            account: account.clone(),
            token: token.clone(),
            amount,
            value_in,
            units_minted: preview.units_out,
            sink_units: preview.sink_units,
        })
    }

    /// Burns `units` of `account` and pays their value out in `token`.
    pub fn withdraw(
        &mut self,
        account: &AccountId,
        units: u128,
        token: &TokenId,
        prices: &PriceBook,
    ) -> Result<WithdrawReceipt, VaultError> {
        self.ensure_idle()?;
        self.ensure_actor(account)?;
        self.config.pooled_token(token)?;

        let free = self.free_units(account);
        let value_before = self.total_value(prices)?;
        let value_out = self.state.shares.preview_burn(units, free, value_before)?;
        let amount_out = prices.amount_for(&self.config, token, value_out)?;
        if amount_out == 0 {
            return Err(VaultError::ZeroAmount);
        }
        debug!(%account, %token, units, value = value_out, amount_out, "burn previewed");

        self.state.ledger.record_withdrawal(account, token, amount_out)?;
        self.state.shares.apply_burn(account, units)?;
        self.bump_version();

        transfer_checked(
            self.host.as_ref(),
            token,
            &self.config.custody_account,
            account,
            amount_out,
        )?;

        Ok(WithdrawReceipt {
            account: account.clone(),
            token: token.clone(),
            units_burned: units,
            value_out,
            amount_out,
        })
    }

    /// Moves free units between accounts.
    pub fn transfer_units(&mut self, from: &AccountId, to: &AccountId, units: u128) -> Result<(), VaultError> {
        self.ensure_idle()?;
        self.ensure_actor(from)?;
        self.ensure_actor(to)?;
        if units == 0 {
            return Err(VaultError::ZeroAmount);
        }
        if from == to {
            return Err(VaultError::InvalidParameter("cannot transfer units to self".into()));
        }
        let free = self.free_units(from);
        if units > free {
            return Err(VaultError::insufficient_units(free, units));
        }

        let now = self.clock.now();
        self.state.shares.transfer(from, to, units)?;
        self.state.accounts.touch(to, now);
        self.bump_version();
        debug!(%from, %to, units, "units transferred");
        Ok(())
    }

    // -- locks & rewards ----------------------------------------------------

    /// Locks `units` of `account` for `duration_secs` and reserves the full
    /// reward for the lock.
    pub fn lock(&mut self, account: &AccountId, units: u128, duration_secs: u64) -> Result<LockReceipt, VaultError> {
        self.ensure_idle()?;
        self.ensure_actor(account)?;

        let free = self.free_units(account);
        self.state
            .locks
            .check_lock(account, units, duration_secs, free, &self.config.lock)?;
        let rate = self.config.reward.rate_per_unit_second;
        let promised = full_reward(units, duration_secs, rate)?;
        let unreserved = self.state.rewards.unreserved();
        if promised > unreserved {
            return Err(VaultError::InsufficientRewardBalance {
                required: promised,
                available: unreserved,
            });
        }

        let now = self.clock.now();
        let record = self
            .state
            .locks
            .lock(account, units, duration_secs, free, now, &self.config.lock)?;
        self.state
            .rewards
            .promise(account, units, duration_secs, rate, now)?;
        self.bump_version();
        debug!(%account, units, expiry = %record.expiry, promised, "units locked");

        Ok(LockReceipt {
            account: account.clone(),
            record,
            promised_reward: promised,
        })
    }

    /// Releases a matured lock and pays whatever reward is left on it.
    pub fn unlock(&mut self, account: &AccountId) -> Result<UnlockReceipt, VaultError> {
        self.ensure_idle()?;
        self.ensure_actor(account)?;

        let now = self.clock.now();
        let record = self.state.locks.withdraw(account, now)?;
        let reward_paid = self.state.rewards.settle(account, now)?;
        self.bump_version();

        if reward_paid > 0 {
            transfer_checked(
                self.host.as_ref(),
                &self.config.underlying,
                &self.config.reward_account,
                account,
                reward_paid,
            )?;
        }
        debug!(%account, units = record.units, reward_paid, "lock released");

        Ok(UnlockReceipt {
            account: account.clone(),
            units_released: record.units,
            reward_paid,
        })
    }

    /// Reward `account` could claim right now.
    pub fn calculate_reward(&self, account: &AccountId) -> Result<u64, VaultError> {
        self.state.rewards.calculate_reward(account, self.clock.now())
    }

    /// Pays out everything accrued on the active lock so far.
    pub fn claim_rewards(&mut self, account: &AccountId) -> Result<u64, VaultError> {
        self.ensure_idle()?;
        self.ensure_actor(account)?;
        if self.state.rewards.entitlement(account).is_none() {
            return Err(VaultError::NotLocked(account.clone()));
        }

        let amount = self.state.rewards.claim(account, self.clock.now())?;
        if amount == 0 {
            return Ok(0);
        }
        self.bump_version();
        transfer_checked(
            self.host.as_ref(),
            &self.config.underlying,
            &self.config.reward_account,
            account,
            amount,
        )?;
        debug!(%account, amount, "reward claimed");
        Ok(amount)
    }

    /// Tops up the reward budget from `funder`. Returns the measured amount.
    pub fn fund_rewards(&mut self, funder: &AccountId, amount: u64) -> Result<u64, VaultError> {
        self.ensure_idle()?;
        self.ensure_actor(funder)?;
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }

        let received = transfer_measured(
            self.host.as_ref(),
            &self.config.underlying,
            funder,
            &self.config.reward_account,
            amount,
        )?;
        self.state.rewards.fund(received)?;
        self.bump_version();
        debug!(%funder, received, "reward budget funded");
        Ok(received)
    }

    // -- flash loans --------------------------------------------------------

    /// Lends `amount` of `asset` to `borrower` for the duration of the
    /// callback. See [`crate::flash`].
    pub fn flash_loan(
        &mut self,
        borrower: &AccountId,
        asset: &TokenId,
        amount: u64,
        callback: &mut (dyn FlashBorrower + Send),
    ) -> Result<FlashLoanReceipt, VaultError> {
        flash::execute(self, borrower, asset, amount, callback)
    }

    // -- accounts & recovery ------------------------------------------------

    /// Turns on auto-convert for `account`. There is no way back.
    pub fn enable_auto_convert(&mut self, account: &AccountId) -> Result<bool, VaultError> {
        self.ensure_idle()?;
        self.ensure_actor(account)?;
        let changed = self
            .state
            .accounts
            .enable_auto_convert(account, self.clock.now());
        if changed {
            self.bump_version();
        }
        Ok(changed)
    }

    /// Sends custody's whole balance of an untracked `token` to `to`.
    ///
    /// # Errors
    ///
    /// [`VaultError::RecoveryRejected`] for pooled tokens and for any token
    /// registered as equivalent to one.
    pub fn recover_stray(&mut self, token: &TokenId, to: &AccountId) -> Result<u64, VaultError> {
        self.ensure_idle()?;
        self.ensure_actor(to)?;

        let reject = |reason: String| VaultError::RecoveryRejected {
            token: token.clone(),
            reason,
        };
        let class = match self.config.token(token) {
            Ok(info) if info.pooled => return Err(reject("token is pooled".into())),
            Ok(info) => info.class().clone(),
            Err(_) => token.clone(),
        };
        if class == self.config.underlying {
            return Err(reject(format!("equivalent to reward asset {}", class)));
        }
        if let Some(pooled) = self
            .config
            .tokens
            .iter()
            .find(|t| t.pooled && t.class() == &class)
        {
            return Err(reject(format!("equivalent to pooled asset {}", pooled.id)));
        }

        let amount = self.host.balance_of(token, &self.config.custody_account);
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        transfer_checked(
            self.host.as_ref(),
            token,
            &self.config.custody_account,
            to,
            amount,
        )?;
        info!(%token, %to, amount, "stray tokens recovered");
        Ok(amount)
    }

    // -- views --------------------------------------------------------------

    pub fn account_view(&self, account: &AccountId) -> Result<AccountView, VaultError> {
        let now = self.clock.now();
        let reward_debt = self
            .state
            .rewards
            .entitlement(account)
            .map(|e| e.paid)
            .unwrap_or(0);
        Ok(AccountView {
            account: account.clone(),
            units: self.free_units(account),
            locked_units: self.state.locks.locked_units(account),
            lock: self.state.locks.status(account, now),
            auto_convert: self.state.accounts.auto_convert(account),
            reward_debt,
            claimable_reward: self.state.rewards.calculate_reward(account, now)?,
            flows: self.state.ledger.account_flows(account),
        })
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let rewards = &self.state.rewards;
        PoolSnapshot {
            total_units: self.state.shares.total_units(),
            holdings: self.state.shares.holdings().clone(),
            balances: self.state.ledger.balances().clone(),
            reward_available: rewards.available_balance(),
            reward_outstanding: rewards.outstanding(),
            reward_paid: rewards.paid_total(),
            active_locks: self.state.locks.iter().count(),
            version: self.state.version,
            phase: self.phase.to_string(),
        }
    }

    /// Cross-checks the books against each other and against custody.
    ///
    /// # Errors
    ///
    /// [`VaultError::InvariantViolation`] naming the first broken invariant.
    pub fn audit(&self, prices: &PriceBook) -> Result<AuditReport, VaultError> {
        self.ensure_idle()?;
        let violation = |msg: String| Err(VaultError::InvariantViolation(msg));
        let shares = &self.state.shares;

        let held: u128 = shares
            .holdings()
            .values()
            .try_fold(0u128, |acc, units| acc.checked_add(*units))
            .ok_or(VaultError::ArithmeticOverflow("holdings sum"))?;
        if held != shares.total_units() {
            return violation(format!(
                "holdings sum {} != total units {}",
                held,
                shares.total_units()
            ));
        }

        let mut locks_checked = 0;
        for (account, lock) in self.state.locks.iter() {
            let owned = shares.units_of(account);
            if lock.units > owned {
                return violation(format!(
                    "{} locks {} units but owns {}",
                    account, lock.units, owned
                ));
            }
            match self.state.rewards.entitlement(account) {
                Some(e) if e.units == lock.units => {}
                _ => return violation(format!("lock of {} has no matching reward entitlement", account)),
            }
            locks_checked += 1;
        }

        let rewards = &self.state.rewards;
        if rewards.paid_total() > rewards.promised_total() {
            return violation("rewards paid exceed rewards promised".into());
        }
        if rewards.outstanding() > rewards.available_balance() {
            return violation(format!(
                "outstanding rewards {} exceed budget {}",
                rewards.outstanding(),
                rewards.available_balance()
            ));
        }
        let reward_held = self
            .host
            .balance_of(&self.config.underlying, &self.config.reward_account);
        if reward_held < rewards.available_balance() {
            return violation(format!(
                "reward account holds {} but budget says {}",
                reward_held,
                rewards.available_balance()
            ));
        }

        let mut tokens_checked = 0;
        for (token, booked) in self.state.ledger.balances() {
            let custody = self.host.balance_of(token, &self.config.custody_account);
            if custody < *booked {
                return violation(format!(
                    "custody holds {} {} but ledger says {}",
                    custody, token, booked
                ));
            }
            tokens_checked += 1;
        }

        let total_value = self.total_value(prices)?;
        if (shares.total_units() == 0) != (total_value == 0) {
            return violation(format!(
                "{} units outstanding against value {}",
                shares.total_units(),
                total_value
            ));
        }

        Ok(AuditReport {
            total_units: shares.total_units(),
            total_value,
            tokens_checked,
            locks_checked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryTokenHost;

    struct Fixture {
        host: MemoryTokenHost,
        clock: ManualClock,
        core: VaultCore,
        prices: PriceBook,
    }

    fn fixture() -> Fixture {
        let config = VaultConfig::default();
        let host = MemoryTokenHost::new();
        let clock = ManualClock::default();
        let prices = PriceBook::new(config.underlying.clone());
        let core = VaultCore::new(
            Arc::new(config),
            Arc::new(host.clone()),
            Arc::new(clock.clone()),
        );
        Fixture {
            host,
            clock,
            core,
            prices,
        }
    }

    fn usdc() -> TokenId {
        TokenId::new("USDC")
    }

    fn deposit(f: &mut Fixture, who: &AccountId, amount: u64) -> MintReceipt {
        f.host.mint(&usdc(), who, amount);
        let received = f.core.intake(who, &usdc(), amount).unwrap();
        f.core.settle_deposit(who, &usdc(), received, &f.prices).unwrap()
    }

    #[test]
    fn first_deposit_then_proportional_mint() {
        let mut f = fixture();
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");

        let first = deposit(&mut f, &alice, 10_000);
        assert_eq!(first.units_minted, 9_000);
        assert_eq!(first.sink_units, 1_000);

        let second = deposit(&mut f, &bob, 5_000);
        assert_eq!(second.units_minted, 5_000);
        assert_eq!(f.core.state().shares.total_units(), 15_000);
        assert_eq!(f.core.total_value(&f.prices).unwrap(), 15_000);
    }

    #[test]
    fn withdraw_pays_proportional_value() {
        let mut f = fixture();
        let alice = AccountId::new("alice");
        deposit(&mut f, &alice, 10_000);

        let receipt = f.core.withdraw(&alice, 4_500, &usdc(), &f.prices).unwrap();
        assert_eq!(receipt.amount_out, 4_500);
        assert_eq!(f.host.balance_of(&usdc(), &alice), 4_500);
        assert_eq!(f.core.state().shares.units_of(&alice), 4_500);
        assert_eq!(f.core.audit(&f.prices).unwrap().total_value, 5_500);
    }

    #[test]
    fn locked_units_cannot_leave() {
        let mut f = fixture();
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");
        deposit(&mut f, &alice, 10_000);
        f.core.lock(&alice, 9_000, 3_600).unwrap();

        assert!(matches!(
            f.core.transfer_units(&alice, &bob, 1),
            Err(VaultError::InsufficientBalance { .. })
        ));
        assert!(matches!(
            f.core.withdraw(&alice, 1, &usdc(), &f.prices),
            Err(VaultError::InsufficientBalance { .. })
        ));

        f.clock.advance(3_600);
        let receipt = f.core.unlock(&alice).unwrap();
        assert_eq!(receipt.units_released, 9_000);
        f.core.transfer_units(&alice, &bob, 9_000).unwrap();
        assert_eq!(f.core.free_units(&bob), 9_000);
    }

    #[test]
    fn reserved_accounts_cannot_act() {
        let mut f = fixture();
        let custody = f.core.config().custody_account.clone();
        assert!(matches!(
            f.core.enable_auto_convert(&custody),
            Err(VaultError::ReservedAccount(_))
        ));
    }

    #[test]
    fn non_idle_phase_rejects_mutations() {
        let mut f = fixture();
        f.core.set_phase(Phase::ExternalCallPending { operation: "test" });
        let alice = AccountId::new("alice");
        assert!(matches!(
            f.core.enable_auto_convert(&alice),
            Err(VaultError::ReentrantCall { .. })
        ));
        f.core.set_phase(Phase::Idle);
        assert!(f.core.enable_auto_convert(&alice).unwrap());
    }

    #[test]
    fn failed_operation_restores_checkpoint() {
        let mut f = fixture();
        let alice = AccountId::new("alice");
        deposit(&mut f, &alice, 10_000);
        let before = f.core.state().clone();

        f.core.begin("withdraw").unwrap();
        f.host.set_failing(&usdc(), true);
        let result = f.core.withdraw(&alice, 1_000, &usdc(), &f.prices);
        assert!(matches!(result, Err(VaultError::TransferFailed { .. })));
        f.core.finish(&result);

        assert_eq!(f.core.state(), &before);
        assert_eq!(f.core.phase(), Phase::Idle);
    }

    #[test]
    fn abandoned_operation_rolled_back_on_next_begin() {
        let mut f = fixture();
        let alice = AccountId::new("alice");
        f.host.mint(&usdc(), &alice, 5_000);

        f.core.begin("deposit").unwrap();
        f.core.intake(&alice, &usdc(), 5_000).unwrap();
        f.core.set_phase(Phase::ExternalCallPending { operation: "exchange" });
        // Dropped here without finish.

        f.core.begin("snapshot").unwrap();
        assert_eq!(f.host.balance_of(&usdc(), &alice), 5_000);
        assert_eq!(f.core.phase(), Phase::Idle);
        f.core.finish(&Ok::<(), VaultError>(()));
    }
}
