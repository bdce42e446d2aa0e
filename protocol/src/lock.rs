//! # Lock Schedule
//!
//! Per-account time locks on ownership units.
//!
//! ## State Machine
//!
//! ```text
//!    ┌──────────┐  lock(units, duration)   ┌──────────┐
//!    │ Unlocked │ ───────────────────────► │  Locked  │
//!    └──────────┘ ◄─────────────────────── └──────────┘
//!                   withdraw(), now >= expiry
//! ```
//!
//! One active lock per account. This is a capacity limit: a second lock
//! while one is active fails with `AlreadyLocked`.
//!
//! A lock record is a view onto units held in the share ledger. It never
//! owns units and it can never reference more than the account holds; the
//! vault rejects any transfer or burn that would dip into locked units.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::LockConfig;
use crate::error::VaultError;
use crate::types::AccountId;

/// An active lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Units held back from transfer and withdrawal.
    pub units: u128,
    /// When the lock was created.
    pub started_at: DateTime<Utc>,
    /// Requested duration.
    pub duration_secs: u64,
    /// `started_at + duration_secs`.
    pub expiry: DateTime<Utc>,
}

impl LockRecord {
    /// Returns `true` once the lock may be released.
    pub fn is_matured(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}

/// Observable lock state of an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockStatus {
    /// No active lock.
    Unlocked,
    /// Locked until `expiry`.
    Locked { expiry: DateTime<Utc> },
    /// Past expiry, waiting to be released.
    Matured { expiry: DateTime<Utc> },
}

/// Every active lock, keyed by account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSchedule {
    locks: BTreeMap<AccountId, LockRecord>,
}

impl LockSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Units currently locked by `account`.
    pub fn locked_units(&self, account: &AccountId) -> u128 {
        self.locks.get(account).map(|l| l.units).unwrap_or(0)
    }

    /// Units locked across every account.
    pub fn total_locked(&self) -> u128 {
        self.locks.values().map(|l| l.units).sum()
    }

    /// The active lock of `account`, if any.
    pub fn get(&self, account: &AccountId) -> Option<&LockRecord> {
        self.locks.get(account)
    }

    /// Every active lock.
    pub fn iter(&self) -> impl Iterator<Item = (&AccountId, &LockRecord)> {
        self.locks.iter()
    }

    pub fn status(&self, account: &AccountId, now: DateTime<Utc>) -> LockStatus {
        match self.locks.get(account) {
            None => LockStatus::Unlocked,
            Some(lock) if lock.is_matured(now) => LockStatus::Matured {
                expiry: lock.expiry,
            },
            Some(lock) => LockStatus::Locked {
                expiry: lock.expiry,
            },
        }
    }

    /// Locks `units` of `account` for `duration_secs`, given that the
    /// account has `free_units` not already locked.
    ///
    /// # Errors
    ///
    /// - [`VaultError::DurationOutOfRange`] outside the configured bounds.
    /// - [`VaultError::AlreadyLocked`] if a lock is active.
    /// - [`VaultError::InsufficientBalance`] if `units > free_units`.
    /// - [`VaultError::ArithmeticOverflow`] if the expiry is unrepresentable.
    pub fn lock(
        &mut self,
        account: &AccountId,
        units: u128,
        duration_secs: u64,
        free_units: u128,
        now: DateTime<Utc>,
        config: &LockConfig,
    ) -> Result<LockRecord, VaultError> {
        self.check_lock(account, units, duration_secs, free_units, config)?;
        let record = LockRecord {
            units,
            started_at: now,
            duration_secs,
            expiry: expiry_after(now, duration_secs)?,
        };
        self.locks.insert(account.clone(), record.clone());
        Ok(record)
    }

    /// Runs every precondition of [`lock`](Self::lock) without mutating.
    pub fn check_lock(
        &self,
        account: &AccountId,
        units: u128,
        duration_secs: u64,
        free_units: u128,
        config: &LockConfig,
    ) -> Result<(), VaultError> {
        if units == 0 {
            return Err(VaultError::ZeroAmount);
        }
        if duration_secs < config.min_duration_secs || duration_secs > config.max_duration_secs {
            return Err(VaultError::DurationOutOfRange {
                requested_secs: duration_secs,
                min_secs: config.min_duration_secs,
                max_secs: config.max_duration_secs,
            });
        }
        if self.locks.contains_key(account) {
            return Err(VaultError::AlreadyLocked(account.clone()));
        }
        if units > free_units {
            return Err(VaultError::insufficient_units(free_units, units));
        }
        Ok(())
    }

    /// Releases the lock of `account`. Succeeds at or after expiry, once.
    ///
    /// # Errors
    ///
    /// - [`VaultError::NotLocked`] if there is no active lock.
    /// - [`VaultError::StillLocked`] before expiry.
    pub fn withdraw(&mut self, account: &AccountId, now: DateTime<Utc>) -> Result<LockRecord, VaultError> {
        let lock = self
            .locks
            .get(account)
            .ok_or_else(|| VaultError::NotLocked(account.clone()))?;
        if !lock.is_matured(now) {
            return Err(VaultError::StillLocked {
                expiry: lock.expiry,
            });
        }
        self.locks
            .remove(account)
            .ok_or_else(|| VaultError::NotLocked(account.clone()))
    }
}

/// `now + duration_secs`, checked end to end.
fn expiry_after(now: DateTime<Utc>, duration_secs: u64) -> Result<DateTime<Utc>, VaultError> {
    let secs = i64::try_from(duration_secs).map_err(|_| VaultError::ArithmeticOverflow("lock duration"))?;
    let delta = Duration::try_seconds(secs).ok_or(VaultError::ArithmeticOverflow("lock duration"))?;
    now.checked_add_signed(delta)
        .ok_or(VaultError::ArithmeticOverflow("lock expiry"))
}
