//! Auction regime classification
//!
//! Classifies the current price-discovery regime against the volume profile
//! (failed auction, initiative, rotational, balanced), derives a scenario
//! string and directional bias for presentation, and applies temporal
//! hysteresis so the displayed mode does not flicker between ticks.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::profile::ProfileMetrics;
use crate::types::EnrichedCandle;

/// Minimum candles required before classification is attempted.
pub const MIN_CANDLES: usize = 5;

/// Candles inspected for a failed-auction push beyond the value area.
pub const BREACH_LOOKBACK: usize = 5;

/// Fraction of the value-area range treated as the rotational edge band.
pub const ROTATIONAL_BAND: Decimal = dec!(0.10);

/// Minimum time between accepted mode changes.
pub const MODE_STABILITY_MS: i64 = 2000;

/// Instant confidence that overrides the stability window.
pub const MODE_OVERRIDE_CONFIDENCE: f64 = 80.0;

/// Confidence bonus when the latest candle's delta corroborates the mode.
const DELTA_SIGN_BONUS: f64 = 25.0;

/// Confidence bonus when the recent delta sum corroborates the mode.
const DELTA_SUM_BONUS: f64 = 30.0;

/// Confidence bonus when price sits on the corroborating side of VWAP.
const VWAP_SIDE_BONUS: f64 = 20.0;

/// Current auction regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuctionMode {
    Balanced,
    Rotational,
    InitiativeBuy,
    InitiativeSell,
    FailedAuctionHigh,
    FailedAuctionLow,
}

/// Directional bias implied by the auction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

/// Classified auction context, recomputed per tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AuctionContext {
    pub mode: AuctionMode,

    /// Classification confidence (0-100)
    pub confidence: f64,

    /// Human-readable scenario for presentation surfaces
    pub scenario: String,

    pub bias: Bias,
}

impl AuctionContext {
    fn gathering() -> Self {
        Self {
            mode: AuctionMode::Balanced,
            confidence: 0.0,
            scenario: "Gathering data…".to_string(),
            bias: Bias::Neutral,
        }
    }
}

/// Classify the current auction regime from the latest price, profile and
/// recent candle flow.
///
/// Priority order: failed auction (push beyond a value-area boundary within
/// the last [`BREACH_LOOKBACK`] candles, now rejected back inside with the
/// final candle closing against the push) > initiative (price outside the
/// value area) > rotational (price within [`ROTATIONAL_BAND`] of a
/// boundary) > balanced.
pub fn calculate_auction_context(
    last_price: Decimal,
    profile: &ProfileMetrics,
    vwap: f64,
    recent_candles: &[EnrichedCandle],
) -> AuctionContext {
    if recent_candles.len() < MIN_CANDLES || profile.levels.is_empty() {
        return AuctionContext::gathering();
    }

    let window = &recent_candles[recent_candles.len() - BREACH_LOOKBACK.min(recent_candles.len())..];
    let last_candle = &window[window.len() - 1];

    let pushed_above = window.iter().any(|c| c.candle.high > profile.vah);
    let pushed_below = window.iter().any(|c| c.candle.low < profile.val);
    let closed_down = last_candle.candle.close < last_candle.candle.open;
    let closed_up = last_candle.candle.close > last_candle.candle.open;

    let mode = if pushed_above && last_price < profile.vah && closed_down {
        AuctionMode::FailedAuctionHigh
    } else if pushed_below && last_price > profile.val && closed_up {
        AuctionMode::FailedAuctionLow
    } else if last_price > profile.vah {
        AuctionMode::InitiativeBuy
    } else if last_price < profile.val {
        AuctionMode::InitiativeSell
    } else {
        let range = profile.vah - profile.val;
        let edge = range * ROTATIONAL_BAND;
        if last_price - profile.val < edge || profile.vah - last_price < edge {
            AuctionMode::Rotational
        } else {
            AuctionMode::Balanced
        }
    };

    let confidence = confidence_for(mode, last_price, vwap, window);
    let (scenario, bias) = scenario_for(mode, last_price, profile);

    AuctionContext {
        mode,
        confidence,
        scenario: scenario.to_string(),
        bias,
    }
}

/// Base 50 plus fixed bonuses when order flow corroborates the mode's
/// direction, clamped to [0, 100]. Non-directional modes stay at base.
fn confidence_for(mode: AuctionMode, last_price: Decimal, vwap: f64, window: &[EnrichedCandle]) -> f64 {
    let direction = match mode {
        AuctionMode::InitiativeBuy | AuctionMode::FailedAuctionLow => 1,
        AuctionMode::InitiativeSell | AuctionMode::FailedAuctionHigh => -1,
        AuctionMode::Balanced | AuctionMode::Rotational => 0,
    };

    let mut confidence = 50.0;
    if direction != 0 {
        let last_delta = window[window.len() - 1].delta;
        let delta_sum: Decimal = window.iter().map(|c| c.delta).sum();
        let price_f = last_price.to_f64().unwrap_or(vwap);

        if (direction > 0) == (last_delta > Decimal::ZERO) && last_delta != Decimal::ZERO {
            confidence += DELTA_SIGN_BONUS;
        }
        if (direction > 0) == (delta_sum > Decimal::ZERO) && delta_sum != Decimal::ZERO {
            confidence += DELTA_SUM_BONUS;
        }
        if (direction > 0) == (price_f > vwap) && price_f != vwap {
            confidence += VWAP_SIDE_BONUS;
        }
    }

    confidence.clamp(0.0, 100.0)
}

fn scenario_for(mode: AuctionMode, last_price: Decimal, profile: &ProfileMetrics) -> (&'static str, Bias) {
    match mode {
        AuctionMode::Balanced => ("Balanced auction: price accepted inside value", Bias::Neutral),
        AuctionMode::Rotational => {
            if last_price >= profile.poc {
                ("Rotation near value area high: responsive selling likely", Bias::Neutral)
            } else {
                ("Rotation near value area low: responsive buying likely", Bias::Neutral)
            }
        }
        AuctionMode::InitiativeBuy => ("Initiative buying: price accepted above value area", Bias::Bullish),
        AuctionMode::InitiativeSell => ("Initiative selling: price accepted below value area", Bias::Bearish),
        AuctionMode::FailedAuctionHigh => ("Failed auction above value: breakout rejected back inside", Bias::Bearish),
        AuctionMode::FailedAuctionLow => ("Failed auction below value: breakdown rejected back inside", Bias::Bullish),
    }
}

/// Temporal hysteresis over classified contexts.
///
/// A mode change is accepted only when [`MODE_STABILITY_MS`] has elapsed
/// since the last accepted change, or the instant confidence exceeds
/// [`MODE_OVERRIDE_CONFIDENCE`]. A rejected change keeps the previous
/// stable context; an unchanged mode refreshes confidence and scenario.
#[derive(Debug, Default)]
pub struct ContextTracker {
    stable: Option<AuctionContext>,
    last_change_ms: i64,
}

impl ContextTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the instant classification into the stable view.
    pub fn update(&mut self, instant: AuctionContext, now_ms: i64) -> AuctionContext {
        let accept = match &self.stable {
            None => true,
            Some(stable) if stable.mode == instant.mode => true,
            Some(stable) => {
                let elapsed = now_ms - self.last_change_ms;
                let accept = elapsed >= MODE_STABILITY_MS || instant.confidence > MODE_OVERRIDE_CONFIDENCE;
                if accept {
                    debug!(
                        from = ?stable.mode,
                        to = ?instant.mode,
                        confidence = instant.confidence,
                        elapsed_ms = elapsed,
                        "auction mode change accepted"
                    );
                }
                accept
            }
        };

        if accept {
            if self.stable.as_ref().map(|s| s.mode) != Some(instant.mode) {
                self.last_change_ms = now_ms;
            }
            self.stable = Some(instant.clone());
            instant
        } else {
            self.stable.clone().unwrap_or(instant)
        }
    }

    /// Discard tracked state (symbol switch, manual flush).
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
