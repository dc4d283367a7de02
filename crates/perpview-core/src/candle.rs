//! OHLC bars and chart resolutions.

use crate::error::{CoreError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MINUTE_MS: i64 = 60_000;

/// Bar width.
///
/// 1m, 15m, 1h, 4h and 1d are served natively by the history endpoint.
/// 5m and 30m are synthetic: their history is fetched at the source
/// resolution and re-bucketed client-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Resolution {
    pub const ALL: [Resolution; 7] = [
        Self::OneMinute,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::OneHour,
        Self::FourHours,
        Self::OneDay,
    ];

    /// Bucket width in milliseconds.
    pub fn width_ms(&self) -> i64 {
        match self {
            Self::OneMinute => MINUTE_MS,
            Self::FiveMinutes => 5 * MINUTE_MS,
            Self::FifteenMinutes => 15 * MINUTE_MS,
            Self::ThirtyMinutes => 30 * MINUTE_MS,
            Self::OneHour => 60 * MINUTE_MS,
            Self::FourHours => 240 * MINUTE_MS,
            Self::OneDay => 1440 * MINUTE_MS,
        }
    }

    /// Resolution to request from the history endpoint.
    pub fn source(&self) -> Resolution {
        match self {
            Self::FiveMinutes => Self::OneMinute,
            Self::ThirtyMinutes => Self::FifteenMinutes,
            other => *other,
        }
    }

    /// Whether the history endpoint serves this resolution directly.
    pub fn is_native(&self) -> bool {
        self.source() == *self
    }

    /// Wire name used by the history endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = CoreError;

    /// Accepts both short forms ("15m", "4h", "1d") and the minute-count
    /// forms charting libraries use ("15", "240", "1D").
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1m" | "1" => Ok(Self::OneMinute),
            "5m" | "5" => Ok(Self::FiveMinutes),
            "15m" | "15" => Ok(Self::FifteenMinutes),
            "30m" | "30" => Ok(Self::ThirtyMinutes),
            "1h" | "60" => Ok(Self::OneHour),
            "4h" | "240" => Ok(Self::FourHours),
            "1d" | "1D" | "D" | "1440" => Ok(Self::OneDay),
            other => Err(CoreError::InvalidResolution(other.to_string())),
        }
    }
}

/// One OHLC bar.
///
/// `bucket_end_ms` is exclusive: a bar covers `[bucket_start_ms, bucket_end_ms)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub bucket_start_ms: i64,
    pub bucket_end_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub resolution: Resolution,
}

impl Candle {
    /// Start of the bucket containing `time_ms` for a bucket width.
    ///
    /// Floors toward negative infinity so pre-epoch timestamps land in the
    /// correct bucket.
    pub fn bucket_start(time_ms: i64, width_ms: i64) -> i64 {
        time_ms.div_euclid(width_ms) * width_ms
    }

    /// Open a fresh bar at `bucket_start_ms`.
    ///
    /// `open` is carried over from the previous bar's close; high, low and
    /// close all start at the first price seen in the bucket. When the feed
    /// gaps between buckets the open can therefore sit outside [low, high].
    pub fn opening(
        bucket_start_ms: i64,
        bucket_width_ms: i64,
        resolution: Resolution,
        open: f64,
        price: f64,
    ) -> Self {
        Self {
            bucket_start_ms,
            bucket_end_ms: bucket_start_ms + bucket_width_ms,
            open,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
            resolution,
        }
    }

    /// Fold a price into the bar: raise high, lower low, set close.
    pub fn apply_price(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }

    /// OHLC consistency: high bounds open/close from above, low from below.
    pub fn is_consistent(&self) -> bool {
        self.high >= self.open.max(self.close) && self.low <= self.open.min(self.close)
    }

    /// Whether `time_ms` falls inside this bar.
    pub fn contains(&self, time_ms: i64) -> bool {
        time_ms >= self.bucket_start_ms && time_ms < self.bucket_end_ms
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.bucket_start_ms).single()
    }
}
