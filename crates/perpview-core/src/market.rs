//! Market identification types.
//!
//! Consumers name markets by a human-readable `Symbol` ("APT/USD"); the
//! exchange addresses them by an opaque `MarketId`. The mapping between the
//! two is owned by the registry's resolution cache.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque exchange-internal market identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketId(String);

impl MarketId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MarketId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MarketId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Human-readable trading pair name in canonical `BASE/QUOTE` form.
///
/// Input is normalised: surrounding whitespace is trimmed, letters are
/// upper-cased and `-` / `_` separators are rewritten to `/`, so
/// "apt-usd", "APT_USD" and "APT/USD" all name the same market.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalise a symbol.
    pub fn new(raw: &str) -> Result<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '-' | '_' => '/',
                c => c.to_ascii_uppercase(),
            })
            .collect();

        if normalized.is_empty() {
            return Err(CoreError::InvalidSymbol("empty symbol".to_string()));
        }

        let mut parts = normalized.split('/');
        let valid = match (parts.next(), parts.next(), parts.next()) {
            (Some(base), None, None) => !base.is_empty(),
            (Some(base), Some(quote), None) => !base.is_empty() && !quote.is_empty(),
            _ => false,
        };
        if !valid || normalized.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidSymbol(raw.to_string()));
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base asset (e.g. "APT" for "APT/USD").
    pub fn base(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// Quote asset, if the symbol carries one.
    pub fn quote(&self) -> Option<&str> {
        self.0.split_once('/').map(|(_, quote)| quote)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Symbol {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::new(&s)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}
