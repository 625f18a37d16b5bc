//! Smart zone aggregation
//!
//! Keeps an independent raw accumulation of book activity per exact price
//! (adds, pulls, executions), then rebuilds adaptive price-bucketed zones
//! on each aggregation tick (~200ms). A volatility estimate over recent
//! trade prices widens the bucket size in discrete steps, and a per-zone
//! noise score separates structural activity from churn.
//!
//! Zones are always a fresh derived view; nothing is mutated incrementally
//! between aggregation calls.

use std::collections::{HashMap, VecDeque};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};
use tracing::debug;

use crate::config::NoiseLevel;
use crate::error::{AnalyticsError, Result};

/// Rolling window of observed last-trade prices for volatility.
pub const PRICE_WINDOW: usize = 20;

/// Percentile of bucket total volume used as the dynamic threshold.
pub const VOLUME_PERCENTILE: f64 = 80.0;

/// Fallback volume threshold when no zones exist this tick.
pub const MIN_VOLUME_THRESHOLD: f64 = 1000.0;

/// Noise score baseline; adjustments move from here and clamp to [0, 100].
pub const NOISE_BASE: f64 = 50.0;

/// Zone lifetime bounds for the noise adjustments.
pub const SHORT_LIFETIME_MS: i64 = 5_000;
pub const LONG_LIFETIME_MS: i64 = 60_000;

/// Raw per-price accumulation, keyed by exact price.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ZoneRaw {
    #[schemars(with = "String")]
    pub price: Decimal,

    /// Quantity added to the level since tracking began
    #[schemars(with = "String")]
    pub added: Decimal,

    /// Quantity pulled from the level
    #[schemars(with = "String")]
    pub removed: Decimal,

    /// Quantity executed at the level
    #[schemars(with = "String")]
    pub executed: Decimal,

    /// added − removed
    #[schemars(with = "String")]
    pub net: Decimal,

    /// Most recent visible quantity
    #[schemars(with = "String")]
    pub last_qty: Decimal,

    pub first_seen: i64,

    pub last_update: i64,
}

impl ZoneRaw {
    fn new(price: Decimal, now_ms: i64) -> Self {
        Self {
            price,
            added: Decimal::ZERO,
            removed: Decimal::ZERO,
            executed: Decimal::ZERO,
            net: Decimal::ZERO,
            last_qty: Decimal::ZERO,
            first_seen: now_ms,
            last_update: now_ms,
        }
    }
}

/// Aggregated activity zone, rebuilt per aggregation tick.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SmartZone {
    /// Bucket index (price_start / group size)
    pub id: i64,

    #[schemars(with = "String")]
    pub price_start: Decimal,

    #[schemars(with = "String")]
    pub price_end: Decimal,

    #[schemars(with = "String")]
    pub added: Decimal,

    #[schemars(with = "String")]
    pub removed: Decimal,

    #[schemars(with = "String")]
    pub executed: Decimal,

    #[schemars(with = "String")]
    pub net: Decimal,

    /// Total activity per constituent raw entry
    pub density: f64,

    /// Longest constituent lifetime (historical name, max not mean)
    pub avg_lifetime: i64,

    pub last_update: i64,

    /// 0-100, lower = more structural
    pub noise_score: f64,

    /// 0-100, forced to 100 for in-zone absorption
    pub impact_score: f64,

    pub is_significant: bool,

    /// Volatility estimate at aggregation time
    pub volatility: f64,
}

/// Adaptive price-bucketing engine with its own raw accumulation.
#[derive(Debug, Default)]
pub struct SmartGroupingEngine {
    raw: HashMap<Decimal, ZoneRaw>,
    recent_prices: VecDeque<f64>,
}

impl SmartGroupingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all internal state with fresh maps (symbol switch, flush).
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Record a last-trade price into the volatility window.
    pub fn observe_price(&mut self, price: Decimal) {
        if let Some(p) = price.to_f64() {
            self.recent_prices.push_back(p);
            while self.recent_prices.len() > PRICE_WINDOW {
                self.recent_prices.pop_front();
            }
        }
    }

    /// Population standard deviation of the recent price window.
    pub fn volatility(&self) -> f64 {
        if self.recent_prices.len() < 2 {
            return 0.0;
        }
        self.recent_prices.iter().copied().population_std_dev()
    }

    /// Widen the bucket size in discrete steps as volatility rises. Never
    /// shrinks below the caller-supplied base.
    pub fn adaptive_group_size(&self, base: Decimal) -> Decimal {
        let volatility = self.volatility();
        let floor = if volatility > 50.0 {
            dec!(100)
        } else if volatility > 20.0 {
            dec!(50)
        } else if volatility > 5.0 {
            dec!(10)
        } else {
            return base;
        };
        base.max(floor)
    }

    /// Fold a visible-quantity change at a price into the raw accumulation.
    pub fn apply_depth_update(&mut self, price: Decimal, prev_qty: Decimal, new_qty: Decimal, now_ms: i64) {
        let raw = self
            .raw
            .entry(price)
            .or_insert_with(|| ZoneRaw::new(price, now_ms));
        raw.added += (new_qty - prev_qty).max(Decimal::ZERO);
        raw.removed += (prev_qty - new_qty).max(Decimal::ZERO);
        raw.net = raw.added - raw.removed;
        raw.last_qty = new_qty;
        raw.last_update = now_ms;
    }

    /// Fold an execution at a price into the raw accumulation.
    pub fn apply_execution(&mut self, price: Decimal, qty: Decimal, now_ms: i64) {
        let raw = self
            .raw
            .entry(price)
            .or_insert_with(|| ZoneRaw::new(price, now_ms));
        raw.executed += qty;
        raw.last_update = now_ms;
    }

    /// Rebuild zones from the raw accumulation.
    ///
    /// Raw entries older than `time_window_ms` are dropped, survivors are
    /// bucketed by `floor(price / group) * group` (exact price when
    /// `group_size` is zero), scored against the 80th-percentile volume
    /// threshold, filtered by the noise cutoff, and returned sorted by
    /// descending zone start.
    ///
    /// # Errors
    /// `AnalyticsError::InvalidGroupSize` when `group_size < 0`.
    pub fn aggregate_zones(
        &mut self,
        group_size: Decimal,
        time_window_ms: i64,
        noise_level: NoiseLevel,
        last_price: Decimal,
        now_ms: i64,
    ) -> Result<Vec<SmartZone>> {
        if group_size < Decimal::ZERO {
            return Err(AnalyticsError::InvalidGroupSize(group_size));
        }

        self.raw.retain(|_, raw| now_ms - raw.last_update <= time_window_ms);

        struct Bucket {
            added: Decimal,
            removed: Decimal,
            executed: Decimal,
            net: Decimal,
            lifetime_ms: i64,
            last_update: i64,
            raw_count: u32,
        }

        let mut buckets: HashMap<Decimal, Bucket> = HashMap::new();
        for raw in self.raw.values() {
            let start = if group_size.is_zero() {
                raw.price
            } else {
                (raw.price / group_size).floor() * group_size
            };
            let bucket = buckets.entry(start).or_insert(Bucket {
                added: Decimal::ZERO,
                removed: Decimal::ZERO,
                executed: Decimal::ZERO,
                net: Decimal::ZERO,
                lifetime_ms: 0,
                last_update: 0,
                raw_count: 0,
            });
            bucket.added += raw.added;
            bucket.removed += raw.removed;
            bucket.executed += raw.executed;
            bucket.net += raw.net;
            bucket.lifetime_ms = bucket.lifetime_ms.max(raw.last_update - raw.first_seen);
            bucket.last_update = bucket.last_update.max(raw.last_update);
            bucket.raw_count += 1;
        }

        if buckets.is_empty() {
            return Ok(Vec::new());
        }

        let volumes: Vec<f64> = buckets
            .values()
            .map(|b| (b.added + b.removed + b.executed).to_f64().unwrap_or(0.0))
            .collect();
        let threshold = {
            let mut data = Data::new(volumes);
            let p = data.percentile(VOLUME_PERCENTILE as usize);
            if p > 0.0 {
                p
            } else {
                MIN_VOLUME_THRESHOLD
            }
        };

        let volatility = self.volatility();
        let cutoff = noise_level.cutoff(volatility);
        let last_price_f = last_price.to_f64().unwrap_or(0.0);
        let group_f = group_size.to_f64().unwrap_or(0.0);

        let mut zones: Vec<SmartZone> = Vec::new();
        for (start, bucket) in buckets {
            let volume = (bucket.added + bucket.removed + bucket.executed)
                .to_f64()
                .unwrap_or(0.0);

            let mut noise = NOISE_BASE;
            if volume > 2.0 * threshold {
                noise -= 30.0;
            } else if volume < 0.2 * threshold {
                noise += 30.0;
            }
            if bucket.lifetime_ms < SHORT_LIFETIME_MS {
                noise += 40.0;
            } else if bucket.lifetime_ms > LONG_LIFETIME_MS {
                noise -= 20.0;
            }

            let start_f = start.to_f64().unwrap_or(0.0);
            let distance = (last_price_f - start_f).abs();
            let price_inside = if group_f > 0.0 {
                distance < group_f
            } else {
                last_price == start
            };

            let mut impact = (volume / threshold.max(0.0001) * 50.0).min(100.0);
            if volume > threshold && price_inside {
                // Heavy activity where price currently sits: absorption.
                noise -= 30.0;
                impact = 100.0;
            } else if volume > threshold && bucket.executed > Decimal::ZERO {
                // Heavy executed activity away from price: initiation.
                noise -= 20.0;
            } else if volume < threshold && !price_inside {
                // Thin activity price already moved past: likely vacuum.
                noise += 10.0;
            }

            let noise = noise.clamp(0.0, 100.0);
            if noise >= cutoff {
                continue;
            }

            zones.push(SmartZone {
                id: if group_size.is_zero() {
                    zones.len() as i64
                } else {
                    (start / group_size).to_i64().unwrap_or(0)
                },
                price_start: start,
                price_end: start + group_size,
                added: bucket.added,
                removed: bucket.removed,
                executed: bucket.executed,
                net: bucket.net,
                density: volume / bucket.raw_count.max(1) as f64,
                avg_lifetime: bucket.lifetime_ms,
                last_update: bucket.last_update,
                noise_score: noise,
                impact_score: impact,
                is_significant: true,
                volatility,
            });
        }

        zones.sort_by(|a, b| b.price_start.cmp(&a.price_start));
        debug!(
            zones = zones.len(),
            threshold, volatility, "smart zones aggregated"
        );
        Ok(zones)
    }
}
