//! # Account Registry
//!
//! Per-account settings that are observable state in their own right and
//! therefore outlive the account's balances. Unit holdings, locks and
//! reward entitlements are pruned once they reach zero; the records here
//! are not, so an account that empties out and comes back later still has
//! the flags it set.
//!
//! `auto_convert` is one-way: once enabled it stays enabled.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::AssetFlows;
use crate::lock::LockStatus;
use crate::types::{AccountId, TokenId};

/// Persistent per-account settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Deposits of non-underlying tokens are swapped to the underlying.
    pub auto_convert: bool,
    /// First time the vault saw this account.
    pub first_seen: DateTime<Utc>,
}

/// Every account the vault has seen.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRegistry {
    records: BTreeMap<AccountId, AccountRecord>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `account` on first contact. Existing records are untouched.
    pub fn touch(&mut self, account: &AccountId, now: DateTime<Utc>) -> &AccountRecord {
        self.records
            .entry(account.clone())
            .or_insert_with(|| AccountRecord {
                auto_convert: false,
                first_seen: now,
            })
    }

    pub fn get(&self, account: &AccountId) -> Option<&AccountRecord> {
        self.records.get(account)
    }

    pub fn auto_convert(&self, account: &AccountId) -> bool {
        self.records
            .get(account)
            .map(|r| r.auto_convert)
            .unwrap_or(false)
    }

    /// Turns auto-convert on. Returns `true` if the flag changed.
    pub fn enable_auto_convert(&mut self, account: &AccountId, now: DateTime<Utc>) -> bool {
        self.touch(account, now);
        match self.records.get_mut(account) {
            Some(record) if !record.auto_convert => {
                record.auto_convert = true;
                true
            }
            _ => false,
        }
    }
}

/// Everything the vault knows about one account, for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub account: AccountId,
    /// Units free to transfer or withdraw.
    pub units: u128,
    /// Units under lock.
    pub locked_units: u128,
    pub lock: LockStatus,
    pub auto_convert: bool,
    /// Reward already paid for the active lock.
    pub reward_debt: u64,
    /// Reward claimable right now.
    pub claimable_reward: u64,
    pub flows: BTreeMap<TokenId, AssetFlows>,
}
