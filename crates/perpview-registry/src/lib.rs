//! Market discovery for perpview.
//!
//! - `MetaClient`: HTTP client for the exchange info endpoint (market
//!   listing and candle history)
//! - `MarketTable`: bijective symbol/market-id map
//! - `MarketResolver`: time-bounded resolution cache with a static fallback

pub mod client;
pub mod error;
pub mod resolver;
pub mod table;

pub use client::{CandleHistory, ListedMarket, MarketListing, MetaClient};
pub use error::{RegistryError, RegistryResult};
pub use resolver::{MarketResolver, DEFAULT_CACHE_TTL};
pub use table::{builtin_markets, MarketTable, StaticMarket};
