//! Volume profile and order-flow candle enrichment
//!
//! Builds volume-by-price histograms with POC/VAH/VAL identification,
//! enriches candle series with session-scoped delta/CVD/VWAP context,
//! tracks session levels (high/low + initial balance), and classifies the
//! recent CVD trajectory.
//!
//! Everything here is a pure function of its inputs: profiles are fully
//! recomputed per call, never patched incrementally.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{AnalyticsError, Result};
use crate::types::{Candle, Divergence, EnrichedCandle};

/// Fraction of total volume the value area must contain.
pub const VALUE_AREA_FRACTION: Decimal = dec!(0.70);

/// Backward search limit (in candles) when pairing pivots for divergence.
pub const DIVERGENCE_LOOKBACK: usize = 15;

/// Initial balance window measured from the first session candle.
pub const INITIAL_BALANCE_MS: i64 = 60 * 60_000;

/// Number of trailing candles inspected by the CVD state heuristic.
pub const CVD_WINDOW: usize = 10;

/// Absolute CVD slope below which the tape is considered flat.
pub const CVD_SLOPE_THRESHOLD: Decimal = dec!(1000);

/// CVD range separating quiet chop from two-sided absorption.
pub const CVD_RANGE_THRESHOLD: Decimal = dec!(2000);

/// Single price level of a volume profile (tick-quantized).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProfileLevel {
    #[schemars(with = "String")]
    pub price: Decimal,

    #[schemars(with = "String")]
    pub volume: Decimal,
}

/// Volume profile with value-area boundaries.
///
/// Invariant: `val <= poc <= vah`, and the inclusive [val, vah] band holds
/// at least [`VALUE_AREA_FRACTION`] of `total_volume`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProfileMetrics {
    /// Histogram levels sorted ascending by price
    pub levels: Vec<ProfileLevel>,

    /// Point of control: tick with maximum accumulated volume
    #[schemars(with = "String")]
    pub poc: Decimal,

    /// Value area high
    #[schemars(with = "String")]
    pub vah: Decimal,

    /// Value area low
    #[schemars(with = "String")]
    pub val: Decimal,

    #[schemars(with = "String")]
    pub total_volume: Decimal,

    #[schemars(with = "String")]
    pub session_high: Decimal,

    #[schemars(with = "String")]
    pub session_low: Decimal,
}

impl ProfileMetrics {
    fn zeroed() -> Self {
        Self {
            levels: Vec::new(),
            poc: Decimal::ZERO,
            vah: Decimal::ZERO,
            val: Decimal::ZERO,
            total_volume: Decimal::ZERO,
            session_high: Decimal::ZERO,
            session_low: Decimal::ZERO,
        }
    }
}

/// Session extremes and initial balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SessionLevels {
    #[schemars(with = "String")]
    pub session_high: Decimal,

    #[schemars(with = "String")]
    pub session_low: Decimal,

    /// Initial balance high; `None` until a candle exists beyond the IB window
    #[schemars(with = "Option<String>")]
    pub ib_high: Option<Decimal>,

    /// Initial balance low; `None` until a candle exists beyond the IB window
    #[schemars(with = "Option<String>")]
    pub ib_low: Option<Decimal>,
}

/// Classification of the recent cumulative-delta trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CvdState {
    Neutral,
    /// Heavy two-sided flow with no matching price progress
    Absorption,
    /// Selling pressure met by stable or rising price
    Distribution,
    ExpansionUp,
    ExpansionDown,
}

/// Build a volume-by-price histogram from a candle sequence.
///
/// Each candle's volume is distributed uniformly across every tick in the
/// inclusive [low, high] range. POC is the first-seen maximum over
/// ascending price iteration (strict comparison); the value area expands
/// greedily from the POC toward the side with the larger next-step volume,
/// moving lower only when the lower neighbor is strictly greater.
///
/// # Errors
/// `AnalyticsError::InvalidTickSize` when `tick_size <= 0`.
pub fn calculate_profile(candles: &[Candle], tick_size: Decimal) -> Result<ProfileMetrics> {
    if tick_size <= Decimal::ZERO {
        return Err(AnalyticsError::InvalidTickSize(tick_size));
    }

    if candles.is_empty() {
        return Ok(ProfileMetrics::zeroed());
    }

    // Accumulate by tick index so exact-price keys survive the division.
    let mut histogram: BTreeMap<i64, Decimal> = BTreeMap::new();
    let mut session_high = candles[0].high;
    let mut session_low = candles[0].low;

    for candle in candles {
        session_high = session_high.max(candle.high);
        session_low = session_low.min(candle.low);

        let low_idx = (candle.low / tick_size).floor().to_i64().unwrap_or(0);
        let high_idx = (candle.high / tick_size).floor().to_i64().unwrap_or(low_idx);
        let num_ticks = (high_idx - low_idx).max(0) + 1;
        let per_tick = candle.volume / Decimal::from(num_ticks);

        for idx in low_idx..=high_idx {
            *histogram.entry(idx).or_insert(Decimal::ZERO) += per_tick;
        }
    }

    let levels: Vec<ProfileLevel> = histogram
        .iter()
        .map(|(idx, volume)| ProfileLevel {
            price: Decimal::from(*idx) * tick_size,
            volume: *volume,
        })
        .collect();

    let total_volume: Decimal = levels.iter().map(|l| l.volume).sum();

    // First-seen strict max over ascending iteration.
    let mut poc_idx = 0usize;
    for (i, level) in levels.iter().enumerate() {
        if level.volume > levels[poc_idx].volume {
            poc_idx = i;
        }
    }

    let (low_idx, high_idx) = expand_value_area(&levels, poc_idx, total_volume);

    Ok(ProfileMetrics {
        poc: levels[poc_idx].price,
        vah: levels[high_idx].price,
        val: levels[low_idx].price,
        total_volume,
        session_high,
        session_low,
        levels,
    })
}

/// Greedy bidirectional expansion from the POC until the accumulated volume
/// reaches the value-area target. Ties between neighbors go to the upper
/// side.
fn expand_value_area(levels: &[ProfileLevel], poc_idx: usize, total_volume: Decimal) -> (usize, usize) {
    let target = total_volume * VALUE_AREA_FRACTION;
    let mut accumulated = levels[poc_idx].volume;
    let mut low_idx = poc_idx;
    let mut high_idx = poc_idx;

    while accumulated < target && (low_idx > 0 || high_idx < levels.len() - 1) {
        let below = if low_idx > 0 {
            levels[low_idx - 1].volume
        } else {
            Decimal::ZERO
        };
        let above = if high_idx < levels.len() - 1 {
            levels[high_idx + 1].volume
        } else {
            Decimal::ZERO
        };

        if below > above && low_idx > 0 {
            low_idx -= 1;
            accumulated += levels[low_idx].volume;
        } else if high_idx < levels.len() - 1 {
            high_idx += 1;
            accumulated += levels[high_idx].volume;
        } else if low_idx > 0 {
            low_idx -= 1;
            accumulated += levels[low_idx].volume;
        } else {
            break;
        }
    }

    (low_idx, high_idx)
}

/// Enrich a candle series with delta, session CVD, VWAP (+ volume-weighted
/// deviation), and pivot divergence flags.
///
/// Session accumulators (cvd, vwap, vwap_std) reset whenever the UTC
/// calendar date of a candle differs from its predecessor's.
pub fn enrich_candles(candles: &[Candle]) -> Vec<EnrichedCandle> {
    let mut enriched: Vec<EnrichedCandle> = Vec::with_capacity(candles.len());

    let mut prev_date: Option<NaiveDate> = None;
    let mut cvd = Decimal::ZERO;
    let mut cum_volume = Decimal::ZERO;
    let mut cum_price_volume = Decimal::ZERO;
    let mut cum_sq_dev = 0.0f64;

    for candle in candles {
        let date = utc_date(candle.timestamp);
        if prev_date.is_some() && prev_date != Some(date) {
            cvd = Decimal::ZERO;
            cum_volume = Decimal::ZERO;
            cum_price_volume = Decimal::ZERO;
            cum_sq_dev = 0.0;
        }
        prev_date = Some(date);

        let delta = candle.delta();
        cvd += delta;
        cum_volume += candle.volume;
        cum_price_volume += candle.close * candle.volume;

        let vwap = if cum_volume > Decimal::ZERO {
            (cum_price_volume / cum_volume).to_f64().unwrap_or(0.0)
        } else {
            candle.close.to_f64().unwrap_or(0.0)
        };

        let typical = candle.typical_price().to_f64().unwrap_or(vwap);
        let volume_f = candle.volume.to_f64().unwrap_or(0.0);
        cum_sq_dev += volume_f * (typical - vwap) * (typical - vwap);

        let cum_volume_f = cum_volume.to_f64().unwrap_or(0.0);
        let vwap_std = if cum_volume_f > 0.0 {
            (cum_sq_dev / cum_volume_f).sqrt()
        } else {
            0.0
        };

        enriched.push(EnrichedCandle {
            candle: candle.clone(),
            delta,
            cvd,
            vwap,
            vwap_std,
            divergence: None,
        });
    }

    mark_divergences(&mut enriched);
    enriched
}

/// Second pass: find strict local pivots and compare each with the most
/// recent prior pivot of the same kind within [`DIVERGENCE_LOOKBACK`].
fn mark_divergences(enriched: &mut [EnrichedCandle]) {
    if enriched.len() < 3 {
        return;
    }

    let is_pivot_high = |c: &[EnrichedCandle], i: usize| {
        i > 0 && i < c.len() - 1 && c[i].candle.high > c[i - 1].candle.high && c[i].candle.high > c[i + 1].candle.high
    };
    let is_pivot_low = |c: &[EnrichedCandle], i: usize| {
        i > 0 && i < c.len() - 1 && c[i].candle.low < c[i - 1].candle.low && c[i].candle.low < c[i + 1].candle.low
    };

    for i in 1..enriched.len() - 1 {
        if is_pivot_high(enriched, i) {
            let start = i.saturating_sub(DIVERGENCE_LOOKBACK);
            if let Some(j) = (start..i).rev().find(|&j| is_pivot_high(enriched, j)) {
                if enriched[i].candle.high > enriched[j].candle.high && enriched[i].delta < enriched[j].delta {
                    enriched[i].divergence = Some(Divergence::Bearish);
                }
            }
        }

        if enriched[i].divergence.is_none() && is_pivot_low(enriched, i) {
            let start = i.saturating_sub(DIVERGENCE_LOOKBACK);
            if let Some(j) = (start..i).rev().find(|&j| is_pivot_low(enriched, j)) {
                if enriched[i].candle.low < enriched[j].candle.low && enriched[i].delta > enriched[j].delta {
                    enriched[i].divergence = Some(Divergence::Bullish);
                }
            }
        }
    }
}

/// Track session high/low and the initial balance extremes.
///
/// IB fields stay `None` until at least one candle lies beyond the first
/// [`INITIAL_BALANCE_MS`] of the session, so a half-formed balance is never
/// reported as final.
pub fn calculate_session_levels(candles: &[Candle]) -> SessionLevels {
    if candles.is_empty() {
        return SessionLevels {
            session_high: Decimal::ZERO,
            session_low: Decimal::ZERO,
            ib_high: None,
            ib_low: None,
        };
    }

    let ib_end = candles[0].timestamp + INITIAL_BALANCE_MS;
    let mut session_high = candles[0].high;
    let mut session_low = candles[0].low;
    let mut ib_high = candles[0].high;
    let mut ib_low = candles[0].low;
    let mut ib_complete = false;

    for candle in candles {
        session_high = session_high.max(candle.high);
        session_low = session_low.min(candle.low);

        if candle.timestamp < ib_end {
            ib_high = ib_high.max(candle.high);
            ib_low = ib_low.min(candle.low);
        } else {
            ib_complete = true;
        }
    }

    SessionLevels {
        session_high,
        session_low,
        ib_high: ib_complete.then_some(ib_high),
        ib_low: ib_complete.then_some(ib_low),
    }
}

/// Classify the CVD trajectory over the last [`CVD_WINDOW`] candles.
///
/// Flat slope is Neutral unless the CVD range shows heavy two-sided flow
/// (Absorption). A directional slope confirmed by price is Expansion; a
/// slope fighting price is Absorption (buys into a falling tape) or
/// Distribution (sells into a rising one).
pub fn determine_cvd_state(candles: &[EnrichedCandle]) -> CvdState {
    if candles.len() < 2 {
        return CvdState::Neutral;
    }

    let window = &candles[candles.len().saturating_sub(CVD_WINDOW)..];
    let first = &window[0];
    let last = &window[window.len() - 1];

    let slope = last.cvd - first.cvd;
    let price_change = last.candle.close - first.candle.close;

    if slope.abs() < CVD_SLOPE_THRESHOLD {
        let max_cvd = window.iter().map(|c| c.cvd).max().unwrap_or(Decimal::ZERO);
        let min_cvd = window.iter().map(|c| c.cvd).min().unwrap_or(Decimal::ZERO);
        if max_cvd - min_cvd > CVD_RANGE_THRESHOLD {
            return CvdState::Absorption;
        }
        return CvdState::Neutral;
    }

    let cvd_up = slope > Decimal::ZERO;
    let price_up = price_change > Decimal::ZERO;
    let price_down = price_change < Decimal::ZERO;

    if cvd_up && price_up {
        CvdState::ExpansionUp
    } else if !cvd_up && price_down {
        CvdState::ExpansionDown
    } else if cvd_up {
        // Aggressive buying without upward progress
        CvdState::Absorption
    } else {
        CvdState::Distribution
    }
}

fn utc_date(timestamp_ms: i64) -> NaiveDate {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}
