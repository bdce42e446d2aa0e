//! # Share Accounting
//!
//! Ownership units are proportional claims on pool value. The
//! [`ShareLedger`] is the single source of truth for who owns how many
//! units; lock records elsewhere are views onto these holdings and can
//! never exceed them.
//!
//! ## Pricing
//!
//! ```text
//! first deposit:  units_out = value_in - MIN_UNITS,  MIN_UNITS -> sink
//! later deposit:  units_out = floor(value_in * total_units / value_before)
//! burn:           value_out = floor(units_in * value_before / total_units)
//! ```
//!
//! `value_before` is always the pool value strictly before the operation's
//! own credit or debit. Both directions floor, so rounding dust stays in the
//! pool and the value per unit can only move up from rounding.
//!
//! The first-deposit offset is minted to a sink account owned by the vault
//! rather than destroyed, so every unit of value has a holder and the
//! inflation attack (donate, then round a victim's mint to zero) costs the
//! attacker the offset.
//!
//! Previews are pure; `apply_*` performs the mutation. The vault computes
//! every preview and check before applying anything.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::math::mul_div_floor;
use crate::types::AccountId;

/// Units a deposit will mint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MintPreview {
    /// Units credited to the depositor.
    pub units_out: u128,
    /// Units credited to the sink (non-zero on the first deposit only).
    pub sink_units: u128,
}

/// Outstanding units and who holds them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLedger {
    total_units: u128,
    holdings: BTreeMap<AccountId, u128>,
}

impl ShareLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ledger from existing holdings. The total is derived.
    pub fn with_holdings<I>(holdings: I) -> Result<Self, VaultError>
    where
        I: IntoIterator<Item = (AccountId, u128)>,
    {
        let mut ledger = Self::new();
        for (account, units) in holdings {
            ledger.credit(&account, units)?;
        }
        Ok(ledger)
    }

    /// Total units outstanding.
    pub fn total_units(&self) -> u128 {
        self.total_units
    }

    /// Units owned by `account`, locked or not.
    pub fn units_of(&self, account: &AccountId) -> u128 {
        self.holdings.get(account).copied().unwrap_or(0)
    }

    /// Every non-zero holding.
    pub fn holdings(&self) -> &BTreeMap<AccountId, u128> {
        &self.holdings
    }

    /// Units a deposit worth `value_in` mints against a pool worth
    /// `value_before`.
    ///
    /// # Errors
    ///
    /// - [`VaultError::DepositTooSmall`] if a first deposit does not exceed `min_units`.
    /// - [`VaultError::ZeroAmount`] if the deposit would mint nothing.
    /// - [`VaultError::InvariantViolation`] if units and value disagree about
    ///   whether the pool is empty.
    pub fn preview_mint(
        &self,
        value_in: u128,
        value_before: u128,
        min_units: u128,
    ) -> Result<MintPreview, VaultError> {
        if value_in == 0 {
            return Err(VaultError::ZeroAmount);
        }

        if self.total_units == 0 {
            if value_before != 0 {
                return Err(VaultError::InvariantViolation(format!(
                    "pool holds value {} with no units outstanding",
                    value_before
                )));
            }
            if value_in <= min_units {
                return Err(VaultError::DepositTooSmall {
                    value: value_in,
                    min_units,
                });
            }
            return Ok(MintPreview {
                units_out: value_in - min_units,
                sink_units: min_units,
            });
        }

        if value_before == 0 {
            return Err(VaultError::InvariantViolation(format!(
                "{} units outstanding against zero value",
                self.total_units
            )));
        }

        let units_out = mul_div_floor(value_in, self.total_units, value_before)?;
        if units_out == 0 {
            return Err(VaultError::ZeroAmount);
        }
        Ok(MintPreview {
            units_out,
            sink_units: 0,
        })
    }

    /// Value `units_in` redeems from a pool worth `value_before`, given
    /// that the burner has `available` free units.
    ///
    /// # Errors
    ///
    /// [`VaultError::InsufficientBalance`] if `units_in > available`.
    pub fn preview_burn(
        &self,
        units_in: u128,
        available: u128,
        value_before: u128,
    ) -> Result<u128, VaultError> {
        if units_in == 0 {
            return Err(VaultError::ZeroAmount);
        }
        if units_in > available {
            return Err(VaultError::insufficient_units(available, units_in));
        }
        if units_in > self.total_units {
            return Err(VaultError::InvariantViolation(format!(
                "burn of {} exceeds {} units outstanding",
                units_in, self.total_units
            )));
        }
        mul_div_floor(units_in, value_before, self.total_units)
    }

    /// Credits a previewed mint.
    pub fn apply_mint(
        &mut self,
        account: &AccountId,
        sink: &AccountId,
        preview: MintPreview,
    ) -> Result<(), VaultError> {
        self.credit(account, preview.units_out)?;
        if preview.sink_units > 0 {
            self.credit(sink, preview.sink_units)?;
        }
        Ok(())
    }

    /// Destroys `units` held by `account`.
    pub fn apply_burn(&mut self, account: &AccountId, units: u128) -> Result<(), VaultError> {
        let held = self.units_of(account);
        let remaining = held
            .checked_sub(units)
            .ok_or_else(|| VaultError::insufficient_units(held, units))?;
        let total = self
            .total_units
            .checked_sub(units)
            .ok_or(VaultError::ArithmeticOverflow("total units"))?;
        self.set_holding(account, remaining);
        self.total_units = total;
        Ok(())
    }

    /// Moves `units` between holders. Lock checks are the caller's job.
    pub fn transfer(&mut self, from: &AccountId, to: &AccountId, units: u128) -> Result<(), VaultError> {
        let held = self.units_of(from);
        let remaining = held
            .checked_sub(units)
            .ok_or_else(|| VaultError::insufficient_units(held, units))?;
        let received = self
            .units_of(to)
            .checked_add(units)
            .ok_or(VaultError::ArithmeticOverflow("unit transfer"))?;
        self.set_holding(from, remaining);
        self.set_holding(to, received);
        Ok(())
    }

    fn credit(&mut self, account: &AccountId, units: u128) -> Result<(), VaultError> {
        let held = self
            .units_of(account)
            .checked_add(units)
            .ok_or(VaultError::ArithmeticOverflow("holding"))?;
        let total = self
            .total_units
            .checked_add(units)
            .ok_or(VaultError::ArithmeticOverflow("total units"))?;
        self.set_holding(account, held);
        self.total_units = total;
        Ok(())
    }

    fn set_holding(&mut self, account: &AccountId, units: u128) {
        if units == 0 {
            self.holdings.remove(account);
        } else {
            self.holdings.insert(account.clone(), units);
        }
    }
}
