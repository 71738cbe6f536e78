//! Player identity derived from a stored game-account id.
//!
//! Owners store their game-account id in whichever notation they copied it
//! from. Ban lookups are keyed by one canonical form, `U:1:<account>`, so the
//! three common notations are normalised here.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const INDIVIDUAL_BASE: u64 = 76_561_197_960_265_728;

/// Canonical account identity (`U:1:<account>`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PlayerIdentity {
    account: u32,
}

/// Raised when an account id cannot be normalised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("'{input}' is not a recognised account id")]
pub struct InvalidAccountId {
    /// Text that failed to parse.
    pub input: String,
}

impl PlayerIdentity {
    /// Builds an identity from the 32-bit account number.
    #[must_use]
    pub const fn from_account(account: u32) -> Self {
        Self { account }
    }

    /// Returns the 32-bit account number.
    #[must_use]
    pub const fn account(self) -> u32 {
        self.account
    }

    /// Returns the 64-bit notation.
    #[must_use]
    pub const fn to_steam64(self) -> u64 {
        INDIVIDUAL_BASE + self.account as u64
    }

    fn parse_steam64(text: &str) -> Option<Self> {
        let value = text.parse::<u64>().ok()?;
        let account = value.checked_sub(INDIVIDUAL_BASE)?;
        u32::try_from(account).ok().map(Self::from_account)
    }

    fn parse_steam3(text: &str) -> Option<Self> {
        let inner = text
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(text);
        let account = inner.strip_prefix("U:1:")?;
        account.parse::<u32>().ok().map(Self::from_account)
    }

    fn parse_steam2(text: &str) -> Option<Self> {
        let rest = text.strip_prefix("STEAM_")?;
        let mut parts = rest.split(':');
        let _universe = parts.next()?;
        let low_bit = parts.next()?.parse::<u32>().ok()?;
        let high = parts.next()?.parse::<u32>().ok()?;
        if parts.next().is_some() || low_bit > 1 {
            return None;
        }
        high.checked_mul(2)
            .and_then(|doubled| doubled.checked_add(low_bit))
            .map(Self::from_account)
    }
}

impl FromStr for PlayerIdentity {
    type Err = InvalidAccountId;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let text = value.trim();
        Self::parse_steam64(text)
            .or_else(|| Self::parse_steam3(text))
            .or_else(|| Self::parse_steam2(text))
            .ok_or_else(|| InvalidAccountId {
                input: value.to_owned(),
            })
    }
}

impl fmt::Display for PlayerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U:1:{}", self.account)
    }
}
