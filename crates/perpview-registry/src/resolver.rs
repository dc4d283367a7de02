//! Symbol to market-id resolution cache.
//!
//! The live table is filled by one bulk listing call and trusted for a
//! fixed window (5 minutes by default). The first `resolve` after expiry
//! refreshes it; concurrent callers wait on that single refresh and take
//! its outcome, success or failure.
//!
//! Lookup order is live table, then static table. A failed refresh leaves
//! the cache expired, so stale live entries are never served and the next
//! call made after the failure retries.

use crate::client::MarketListing;
use crate::error::{RegistryError, RegistryResult};
use crate::table::{MarketTable, StaticMarket};
use parking_lot::RwLock;
use perpview_core::{MarketId, Symbol};
use perpview_telemetry::Metrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

struct LiveTable {
    table: MarketTable,
    fetched_at: Instant,
}

enum Lookup {
    Hit(MarketId),
    Miss,
    Expired,
}

pub struct MarketResolver<L> {
    listing: L,
    ttl: Duration,
    static_table: MarketTable,
    live: RwLock<Option<LiveTable>>,
    refresh_gate: tokio::sync::Mutex<()>,
    /// Completed refresh attempts, successful or not.
    refresh_attempts: AtomicU64,
}

impl<L: MarketListing> MarketResolver<L> {
    /// Resolver with the built-in static table and default TTL.
    pub fn new(listing: L) -> Self {
        Self::with_config(listing, DEFAULT_CACHE_TTL, &[])
    }

    pub fn with_config(listing: L, ttl: Duration, static_markets: &[StaticMarket]) -> Self {
        Self {
            listing,
            ttl,
            static_table: MarketTable::with_static(static_markets),
            live: RwLock::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
            refresh_attempts: AtomicU64::new(0),
        }
    }

    pub fn listing(&self) -> &L {
        &self.listing
    }

    /// Parse `raw` as a symbol and resolve it.
    pub async fn resolve_str(&self, raw: &str) -> RegistryResult<MarketId> {
        let symbol = Symbol::new(raw)?;
        self.resolve(&symbol).await
    }

    pub async fn resolve(&self, symbol: &Symbol) -> RegistryResult<MarketId> {
        match self.lookup_live(symbol) {
            Lookup::Hit(id) => {
                Metrics::resolver_lookup("hit");
                return Ok(id);
            }
            Lookup::Miss => return self.resolve_static(symbol),
            Lookup::Expired => {}
        }

        {
            let seen = self.refresh_attempts.load(Ordering::Acquire);
            let _gate = self.refresh_gate.lock().await;
            // An attempt that finished while this caller waited answers for it.
            let attempted_meanwhile = self.refresh_attempts.load(Ordering::Acquire) != seen;
            if !attempted_meanwhile && matches!(self.lookup_live(symbol), Lookup::Expired) {
                self.refresh().await;
            }
        }

        match self.lookup_live(symbol) {
            Lookup::Hit(id) => {
                Metrics::resolver_lookup("hit");
                Ok(id)
            }
            Lookup::Miss | Lookup::Expired => self.resolve_static(symbol),
        }
    }

    /// Expire the live table; the next `resolve` refreshes it.
    pub fn invalidate(&self) {
        *self.live.write() = None;
        debug!("Market cache invalidated");
    }

    /// Entries in the live table, if it is fresh.
    pub fn live_len(&self) -> Option<usize> {
        let live = self.live.read();
        live.as_ref()
            .filter(|l| l.fetched_at.elapsed() < self.ttl)
            .map(|l| l.table.len())
    }

    fn lookup_live(&self, symbol: &Symbol) -> Lookup {
        let live = self.live.read();
        match live.as_ref() {
            Some(l) if l.fetched_at.elapsed() < self.ttl => match l.table.get(symbol) {
                Some(id) => Lookup::Hit(id.clone()),
                None => Lookup::Miss,
            },
            _ => Lookup::Expired,
        }
    }

    fn resolve_static(&self, symbol: &Symbol) -> RegistryResult<MarketId> {
        match self.static_table.get(symbol) {
            Some(id) => {
                Metrics::resolver_lookup("static");
                debug!(%symbol, market = %id, "Resolved from static table");
                Ok(id.clone())
            }
            None => {
                Metrics::resolver_lookup("unknown");
                Err(RegistryError::UnknownMarket(symbol.to_string()))
            }
        }
    }

    async fn refresh(&self) {
        let fetched = self.listing.fetch_markets().await;
        self.refresh_attempts.fetch_add(1, Ordering::AcqRel);
        match fetched {
            Ok(entries) => {
                let mut table = MarketTable::new();
                for entry in entries {
                    let symbol = match Symbol::new(&entry.symbol) {
                        Ok(symbol) => symbol,
                        Err(e) => {
                            warn!(symbol = %entry.symbol, error = %e, "Listing entry skipped");
                            continue;
                        }
                    };
                    if let Err(e) = table.insert(symbol, MarketId::new(entry.market_id)) {
                        warn!(error = %e, "Listing entry skipped");
                    }
                }

                info!(markets = table.len(), "Market cache refreshed");
                Metrics::resolver_refresh("ok");
                *self.live.write() = Some(LiveTable {
                    table,
                    fetched_at: Instant::now(),
                });
            }
            Err(e) => {
                warn!(error = %e, "Market listing refresh failed, using static table");
                Metrics::resolver_refresh("failed");
                *self.live.write() = None;
            }
        }
    }
}
