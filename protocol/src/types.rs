//! # Identifiers and Token Metadata
//!
//! Accounts and tokens are identified by plain strings: an account is
//! whatever address the token host uses, and a token is its symbol as
//! registered in the vault configuration. Both are newtypes so that a
//! token can never be passed where an account is expected.
//!
//! [`TokenInfo`] carries the decimal precision used by every
//! price-to-amount conversion, plus an optional canonical token that
//! groups fungible-equivalent assets (a bridged or wrapped copy of a
//! pooled asset shares its canonical class).

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TokenId
// ---------------------------------------------------------------------------

/// Symbol-based token identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    /// Creates a token identifier from its symbol.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// Returns the symbol.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenId({})", self.0)
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TokenId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// AccountId
// ---------------------------------------------------------------------------

/// Owner identity as known to the token host.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Creates an account identifier.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Returns the raw address.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// TokenInfo
// ---------------------------------------------------------------------------

/// Registration record for a token the vault knows about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Token symbol.
    pub id: TokenId,

    /// Number of decimal places in the token's smallest unit.
    pub decimals: u8,

    /// Canonical asset this token is fungible-equivalent to, if any.
    ///
    /// `None` means the token is its own class.
    #[serde(default)]
    pub canonical: Option<TokenId>,

    /// Whether the pool accepts deposits of this token.
    #[serde(default = "default_true")]
    pub pooled: bool,
}

fn default_true() -> bool {
    true
}

impl TokenInfo {
    /// A pooled token with no equivalence alias.
    pub fn pooled(symbol: &str, decimals: u8) -> Self {
        Self {
            id: TokenId::new(symbol),
            decimals,
            canonical: None,
            pooled: true,
        }
    }

    /// A token known to the vault but not accepted for deposit.
    pub fn foreign(symbol: &str, decimals: u8, canonical: Option<&str>) -> Self {
        Self {
            id: TokenId::new(symbol),
            decimals,
            canonical: canonical.map(TokenId::new),
            pooled: false,
        }
    }

    /// The equivalence class this token belongs to.
    pub fn class(&self) -> &TokenId {
        self.canonical.as_ref().unwrap_or(&self.id)
    }
}
