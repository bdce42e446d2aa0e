//! # Reward Pool
//!
//! A bounded reward budget paid out to accounts that lock units. Rewards
//! scale with both stake and time:
//!
//! ```text
//! full_reward(units, secs) = floor(units * secs * rate / REWARD_RATE_SCALE)
//! ```
//!
//! ## Solvency
//!
//! The whole reward for a lock is promised, and reserved against the
//! budget, at the moment the lock is created. A lock whose promise the
//! unreserved budget cannot cover is refused. From then on:
//!
//! ```text
//! paid_total            <= promised_total
//! promised_total - paid_total  (outstanding)  <= available_balance
//! ```
//!
//! so every currently-eligible claim can always be paid in full. Claims
//! are still checked against `available_balance` at claim time, and a
//! claim that cannot be covered is rejected outright rather than paid in
//! part.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::REWARD_RATE_SCALE;
use crate::error::VaultError;
use crate::types::AccountId;

/// Reward owed to one account for its active lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardEntitlement {
    /// Units under lock.
    pub units: u128,
    /// Lock start.
    pub started_at: DateTime<Utc>,
    /// Lock duration.
    pub duration_secs: u64,
    /// Rate in force when the lock was created.
    pub rate_per_unit_second: u64,
    /// Total reward promised for the full duration.
    pub promised: u64,
    /// Reward already paid out (the account's reward debt).
    pub paid: u64,
}

impl RewardEntitlement {
    /// Reward accrued by `now`, never more than the promise.
    pub fn accrued(&self, now: DateTime<Utc>) -> Result<u64, VaultError> {
        let elapsed = (now - self.started_at).num_seconds().max(0) as u64;
        let secs = elapsed.min(self.duration_secs);
        let accrued = full_reward(self.units, secs, self.rate_per_unit_second)?;
        Ok(accrued.min(self.promised))
    }

    /// Accrued but not yet paid.
    pub fn claimable(&self, now: DateTime<Utc>) -> Result<u64, VaultError> {
        Ok(self.accrued(now)?.saturating_sub(self.paid))
    }
}

/// Reward for `units` locked for `secs` at `rate` (scaled by
/// [`REWARD_RATE_SCALE`]), floored.
pub fn full_reward(units: u128, secs: u64, rate: u64) -> Result<u64, VaultError> {
    let reward = units
        .checked_mul(secs as u128)
        .and_then(|v| v.checked_mul(rate as u128))
        .ok_or(VaultError::ArithmeticOverflow("reward"))?
        / REWARD_RATE_SCALE;
    u64::try_from(reward).map_err(|_| VaultError::ArithmeticOverflow("reward"))
}

/// Budget accounting and per-account entitlements.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPool {
    available_balance: u64,
    promised_total: u64,
    paid_total: u64,
    entitlements: BTreeMap<AccountId, RewardEntitlement>,
}

impl RewardPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens held by the reward account.
    pub fn available_balance(&self) -> u64 {
        self.available_balance
    }

    /// Every reward ever promised.
    pub fn promised_total(&self) -> u64 {
        self.promised_total
    }

    /// Every reward ever paid.
    pub fn paid_total(&self) -> u64 {
        self.paid_total
    }

    /// Promised but not yet paid.
    pub fn outstanding(&self) -> u64 {
        self.promised_total.saturating_sub(self.paid_total)
    }

    /// Budget not reserved by any promise.
    pub fn unreserved(&self) -> u64 {
        self.available_balance.saturating_sub(self.outstanding())
    }

    pub fn entitlement(&self, account: &AccountId) -> Option<&RewardEntitlement> {
        self.entitlements.get(account)
    }

    pub fn entitlements(&self) -> impl Iterator<Item = (&AccountId, &RewardEntitlement)> {
        self.entitlements.iter()
    }

    /// Adds `amount` to the budget.
    pub fn fund(&mut self, amount: u64) -> Result<u64, VaultError> {
        self.available_balance = self
            .available_balance
            .checked_add(amount)
            .ok_or(VaultError::ArithmeticOverflow("reward budget"))?;
        Ok(self.available_balance)
    }

    /// Reserves the full reward for a new lock.
    ///
    /// # Errors
    ///
    /// [`VaultError::InsufficientRewardBalance`] if the unreserved budget
    /// cannot cover the promise.
    pub fn promise(
        &mut self,
        account: &AccountId,
        units: u128,
        duration_secs: u64,
        rate: u64,
        now: DateTime<Utc>,
    ) -> Result<u64, VaultError> {
        if self.entitlements.contains_key(account) {
            return Err(VaultError::AlreadyLocked(account.clone()));
        }
        let promised = full_reward(units, duration_secs, rate)?;
        let unreserved = self.unreserved();
        if promised > unreserved {
            return Err(VaultError::InsufficientRewardBalance {
                required: promised,
                available: unreserved,
            });
        }
        let promised_total = self
            .promised_total
            .checked_add(promised)
            .ok_or(VaultError::ArithmeticOverflow("promised total"))?;

        self.promised_total = promised_total;
        self.entitlements.insert(
            account.clone(),
            RewardEntitlement {
                units,
                started_at: now,
                duration_secs,
                rate_per_unit_second: rate,
                promised,
                paid: 0,
            },
        );
        Ok(promised)
    }

    /// Claimable reward of `account` at `now`. Zero without a lock.
    pub fn calculate_reward(&self, account: &AccountId, now: DateTime<Utc>) -> Result<u64, VaultError> {
        match self.entitlements.get(account) {
            Some(entitlement) => entitlement.claimable(now),
            None => Ok(0),
        }
    }

    /// Books a payout of everything claimable. Returns the amount the
    /// caller must transfer out of the reward account.
    ///
    /// # Errors
    ///
    /// [`VaultError::InsufficientRewardBalance`] if the budget cannot cover
    /// the claim. Nothing is booked in that case.
    pub fn claim(&mut self, account: &AccountId, now: DateTime<Utc>) -> Result<u64, VaultError> {
        let amount = self.calculate_reward(account, now)?;
        if amount == 0 {
            return Ok(0);
        }
        if amount > self.available_balance {
            return Err(VaultError::InsufficientRewardBalance {
                required: amount,
                available: self.available_balance,
            });
        }
        let paid_total = self
            .paid_total
            .checked_add(amount)
            .ok_or(VaultError::ArithmeticOverflow("paid total"))?;

        if let Some(entitlement) = self.entitlements.get_mut(account) {
            entitlement.paid += amount;
        }
        self.paid_total = paid_total;
        self.available_balance -= amount;
        Ok(amount)
    }

    /// Pays out the remainder of a matured lock and closes the entitlement.
    pub fn settle(&mut self, account: &AccountId, now: DateTime<Utc>) -> Result<u64, VaultError> {
        let paid = self.claim(account, now)?;
        if let Some(entitlement) = self.entitlements.remove(account) {
            // A matured entitlement is paid in full; anything left over is
            // released back to the unreserved budget.
            let shortfall = entitlement.promised.saturating_sub(entitlement.paid);
            self.promised_total = self.promised_total.saturating_sub(shortfall);
        }
        Ok(paid)
    }
}
