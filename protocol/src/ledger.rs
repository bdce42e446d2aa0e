//! # Asset Ledger
//!
//! The authoritative record of what the pool holds, per token, and of what
//! each account has put in and taken out, per token. Pool balances are the
//! only input to the pool's total value:
//!
//! ```text
//! total_value = Σ balance[t] * price(t)      (prices from one PriceBook)
//! ```
//!
//! Debits check the balance before mutating anything; a failed debit
//! leaves the ledger untouched. Credits and debits are only ever applied
//! after every other precondition of the enclosing operation has passed,
//! so the ledger never shows a half-applied deposit or withdrawal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::VaultConfig;
use crate::error::VaultError;
use crate::oracle::PriceBook;
use crate::types::{AccountId, TokenId};

/// Cumulative per-token flows for one account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFlows {
    /// Total measured amount deposited.
    pub deposited: u64,
    /// Total amount paid out on withdrawal.
    pub withdrawn: u64,
}

/// Pool balances plus per-account flow history.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLedger {
    pool: BTreeMap<TokenId, u64>,
    flows: BTreeMap<AccountId, BTreeMap<TokenId, AssetFlows>>,
}

impl AssetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool balance of `token`.
    pub fn balance(&self, token: &TokenId) -> u64 {
        self.pool.get(token).copied().unwrap_or(0)
    }

    /// Tokens with a non-zero pool balance.
    pub fn held_tokens(&self) -> impl Iterator<Item = &TokenId> {
        self.pool
            .iter()
            .filter(|(_, amount)| **amount > 0)
            .map(|(token, _)| token)
    }

    /// Every pool balance, including zeros left behind by withdrawals.
    pub fn balances(&self) -> &BTreeMap<TokenId, u64> {
        &self.pool
    }

    /// Adds `amount` to the pool balance of `token`. Returns the new balance.
    ///
    /// # Errors
    ///
    /// [`VaultError::ArithmeticOverflow`] if the balance would exceed `u64::MAX`.
    pub fn credit(&mut self, token: &TokenId, amount: u64) -> Result<u64, VaultError> {
        let current = self.balance(token);
        let next = current
            .checked_add(amount)
            .ok_or(VaultError::ArithmeticOverflow("ledger credit"))?;
        self.pool.insert(token.clone(), next);
        Ok(next)
    }

    /// Removes `amount` from the pool balance of `token`. Returns the new balance.
    ///
    /// # Errors
    ///
    /// [`VaultError::InsufficientBalance`] if the pool holds less than
    /// `amount`; nothing is mutated in that case.
    pub fn debit(&mut self, token: &TokenId, amount: u64) -> Result<u64, VaultError> {
        let current = self.balance(token);
        if current < amount {
            return Err(VaultError::InsufficientBalance {
                asset: token.to_string(),
                available: current as u128,
                requested: amount as u128,
            });
        }
        let next = current - amount;
        self.pool.insert(token.clone(), next);
        Ok(next)
    }

    /// Records a deposit of `amount` of `token` by `account` and credits the pool.
    pub fn record_deposit(
        &mut self,
        account: &AccountId,
        token: &TokenId,
        amount: u64,
    ) -> Result<(), VaultError> {
        let flows = self.flows_of(account, token);
        let deposited = flows
            .deposited
            .checked_add(amount)
            .ok_or(VaultError::ArithmeticOverflow("deposit flows"))?;
        self.credit(token, amount)?;
        self.flows_entry(account, token).deposited = deposited;
        Ok(())
    }

    /// Records a withdrawal of `amount` of `token` by `account` and debits the pool.
    pub fn record_withdrawal(
        &mut self,
        account: &AccountId,
        token: &TokenId,
        amount: u64,
    ) -> Result<(), VaultError> {
        let flows = self.flows_of(account, token);
        let withdrawn = flows
            .withdrawn
            .checked_add(amount)
            .ok_or(VaultError::ArithmeticOverflow("withdrawal flows"))?;
        self.debit(token, amount)?;
        self.flows_entry(account, token).withdrawn = withdrawn;
        Ok(())
    }

    /// Flow history of `account` in `token`.
    pub fn flows_of(&self, account: &AccountId, token: &TokenId) -> AssetFlows {
        self.flows
            .get(account)
            .and_then(|per_token| per_token.get(token))
            .copied()
            .unwrap_or_default()
    }

    /// All per-token flows of `account`.
    pub fn account_flows(&self, account: &AccountId) -> BTreeMap<TokenId, AssetFlows> {
        self.flows.get(account).cloned().unwrap_or_default()
    }

    fn flows_entry(&mut self, account: &AccountId, token: &TokenId) -> &mut AssetFlows {
        self.flows
            .entry(account.clone())
            .or_default()
            .entry(token.clone())
            .or_default()
    }

    /// Total pool value in smallest underlying units at the book's prices.
    pub fn total_value(&self, config: &VaultConfig, prices: &PriceBook) -> Result<u128, VaultError> {
        self.held_tokens().try_fold(0u128, |acc, token| {
            let value = prices.value_of(config, token, self.balance(token))?;
            acc.checked_add(value)
                .ok_or(VaultError::ArithmeticOverflow("total value"))
        })
    }
}
