//! Bijective symbol/market-id table and the built-in static markets.

use crate::error::{RegistryError, RegistryResult};
use perpview_core::{MarketId, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Markets known without a listing call.
pub fn builtin_markets() -> Vec<StaticMarket> {
    [
        ("APT/USD", "APT_USD"),
        ("BTC/USD", "BTC_USD"),
        ("ETH/USD", "ETH_USD"),
        ("SOL/USD", "SOL_USD"),
        ("ARB/USD", "ARB_USD"),
        ("DOGE/USD", "DOGE_USD"),
    ]
    .into_iter()
    .map(|(symbol, market_id)| StaticMarket::new(symbol, market_id))
    .collect()
}

/// One static table entry, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticMarket {
    pub symbol: String,
    pub market_id: String,
}

impl StaticMarket {
    pub fn new(symbol: impl Into<String>, market_id: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            market_id: market_id.into(),
        }
    }
}

/// Symbol to market-id map where no id is shared by two symbols.
#[derive(Debug, Clone, Default)]
pub struct MarketTable {
    by_symbol: HashMap<Symbol, MarketId>,
    by_id: HashMap<MarketId, Symbol>,
}

impl MarketTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in markets, then `overrides` on top (an override replaces the
    /// built-in entry for the same symbol).
    pub fn with_static(overrides: &[StaticMarket]) -> Self {
        let mut table = Self::new();
        for entry in builtin_markets().iter().chain(overrides) {
            let symbol = match Symbol::new(&entry.symbol) {
                Ok(symbol) => symbol,
                Err(e) => {
                    warn!(symbol = %entry.symbol, error = %e, "Static market skipped");
                    continue;
                }
            };
            if let Err(e) = table.upsert(symbol, MarketId::new(entry.market_id.clone())) {
                warn!(error = %e, "Static market skipped");
            }
        }
        table
    }

    /// Add a pair. Re-inserting an identical pair is a no-op.
    ///
    /// Fails if either side is already bound to something else.
    pub fn insert(&mut self, symbol: Symbol, market_id: MarketId) -> RegistryResult<()> {
        if let Some(existing) = self.by_symbol.get(&symbol) {
            if *existing == market_id {
                return Ok(());
            }
            return Err(RegistryError::ListingConflict(format!(
                "{symbol} already maps to {existing}, refusing {market_id}"
            )));
        }
        if let Some(owner) = self.by_id.get(&market_id) {
            return Err(RegistryError::ListingConflict(format!(
                "{market_id} already belongs to {owner}, refusing {symbol}"
            )));
        }

        self.by_id.insert(market_id.clone(), symbol.clone());
        self.by_symbol.insert(symbol, market_id);
        Ok(())
    }

    /// Bind `symbol` to `market_id`, replacing the symbol's previous binding.
    ///
    /// Still fails if the id belongs to a different symbol.
    pub fn upsert(&mut self, symbol: Symbol, market_id: MarketId) -> RegistryResult<()> {
        if let Some(owner) = self.by_id.get(&market_id) {
            if *owner != symbol {
                return Err(RegistryError::ListingConflict(format!(
                    "{market_id} already belongs to {owner}, refusing {symbol}"
                )));
            }
        }
        if let Some(previous) = self.by_symbol.remove(&symbol) {
            self.by_id.remove(&previous);
        }
        self.insert(symbol, market_id)
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&MarketId> {
        self.by_symbol.get(symbol)
    }

    pub fn symbol_for(&self, market_id: &MarketId) -> Option<&Symbol> {
        self.by_id.get(market_id)
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}
