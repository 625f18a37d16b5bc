//! Persistent order-book event state machine
//!
//! Tracks zones of interest keyed by (side, price) across ticks, promoting
//! them through a lifecycle (STACK/ABSORPTION → HOLDING → WEAKENING) and
//! detecting structural failures of support/resistance with a confidence
//! score. BROKEN is a quiet terminal state filtered from all output; FAIL
//! is terminal but kept visible for a fade period.
//!
//! Driven once per tick (~100ms) with both enriched sides and the last
//! trade price. Phases run in a fixed order: detection, expiry, state
//! advancement (holding/weakening/fail/retest/decay), cooldown GC.

use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PersistenceWindow;
use crate::levels::EnrichedLevel;
use crate::types::Side;

// Detection thresholds. These encode domain calibration, not incidental
// implementation detail; keep them named.

/// Absorption ratio above which a level counts as an absorption detection.
pub const ABSORPTION_RATIO_THRESHOLD: f64 = 1.5;

/// Resting notional above which a persistent level counts as a stack.
pub const STACK_NOTIONAL: Decimal = dec!(150000);

/// Minimum snapshot age for a stack detection.
pub const STACK_MIN_AGE: u64 = 5;

/// Initial strengths per detection type.
pub const ICEBERG_STRENGTH: f64 = 80.0;
pub const ABSORPTION_STRENGTH: f64 = 80.0;
pub const SPOOF_STRENGTH: f64 = 90.0;
pub const STACK_STRENGTH: f64 = 60.0;

/// Strength added per reinforcement, capped at 100.
pub const REINFORCE_STRENGTH_STEP: f64 = 2.0;

// Lifecycle thresholds.

/// Age and confirmation gates for promotion to HOLDING.
pub const HOLDING_MIN_AGE_MS: i64 = 120_000;
pub const HOLDING_MIN_CONFIRMATIONS: u32 = 10;

/// Reconfirmation window within which an event counts as active.
pub const ACTIVE_WINDOW_MS: i64 = 500;

/// Volume fraction of peak below which an active HOLDING event weakens.
pub const WEAKENING_VOLUME_RATIO: Decimal = dec!(0.30);

/// Relative price breach tolerance for fail detection (0.03%).
pub const FAIL_BREACH_TOLERANCE: Decimal = dec!(0.0003);

/// Minimum event age before a breach can produce FAIL instead of BROKEN.
pub const FAIL_MIN_AGE_MS: i64 = 60_000;

/// Confidence score at or above which a breach promotes to FAIL.
pub const FAIL_CONFIDENCE_THRESHOLD: f64 = 70.0;

/// How long a FAIL event stays visible after failing.
pub const FAIL_FADE_MS: i64 = 120_000;

/// Price bucket width for fail cooldowns.
pub const FAIL_BUCKET_SIZE: Decimal = dec!(10);

/// Cooldown armed per price bucket after a FAIL, suppressing cascades.
pub const FAIL_COOLDOWN_MS: i64 = 300_000;

/// Relative distance treated as a retest of an aged, unconfirmed level.
pub const RETEST_TOLERANCE: Decimal = dec!(0.0005);

/// Failed-push gates: event older than this, stale for longer than this.
pub const FAILED_PUSH_MIN_AGE_MS: i64 = 60_000;
pub const FAILED_PUSH_STALE_MS: i64 = 10_000;

/// Strength never decays below this floor.
pub const STRENGTH_FLOOR: f64 = 10.0;

/// Per-tick probability of purging expired cooldown buckets.
pub const COOLDOWN_GC_PROBABILITY: f64 = 0.05;

/// Detected event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Ice,
    Absorption,
    Stack,
    Pull,
    Fail,
}

/// Lifecycle state of a tracked zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventState {
    Neutral,
    Stack,
    Absorption,
    Holding,
    Weakening,
    Fail,
    Broken,
}

impl EventState {
    /// States eligible for fail detection.
    fn is_significant(self) -> bool {
        matches!(self, Self::Stack | Self::Absorption | Self::Holding | Self::Weakening)
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Fail | Self::Broken)
    }
}

/// A persistent zone of interest tracked across ticks.
///
/// Identity is the (side, price) bucket; owned exclusively by the engine's
/// internal map, cloned into output snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PersistentEvent {
    pub event_type: EventType,

    #[schemars(with = "String")]
    pub price: Decimal,

    pub side: Side,

    pub state: EventState,

    /// First detection time (ms since epoch)
    pub first_detected: i64,

    /// Most recent reinforcement time
    pub last_confirmed: i64,

    /// Set when the event transitions to FAIL
    pub fail_time: Option<i64>,

    /// Current resting notional at the level
    #[schemars(with = "String")]
    pub volume: Decimal,

    /// Largest notional observed at the level
    #[schemars(with = "String")]
    pub peak_volume: Decimal,

    /// Decaying significance score (0-100, floored at 10)
    pub strength: f64,

    pub confirmations: u32,

    /// Touches that failed to clear the level before liquidity returned
    pub failed_pushes: u32,

    /// Confidence score recorded at FAIL time
    pub fail_confidence: f64,

    /// Remaining-liquidity drop ratio recorded at FAIL time
    pub rem_drop_ratio: Option<f64>,

    /// Reconfirmed within [`ACTIVE_WINDOW_MS`]
    pub is_active: bool,

    /// Price returned within [`RETEST_TOLERANCE`] of an aged level (sticky)
    pub is_retest: bool,

    pub is_failed: bool,
}

type EventKey = (Side, Decimal);

/// Stateful engine over enriched book sides.
#[derive(Debug)]
pub struct EventEngine {
    window: PersistenceWindow,
    events: HashMap<EventKey, PersistentEvent>,
    /// Price bucket → time the fail cooldown was armed
    fail_cooldowns: HashMap<i64, i64>,
    last_tick_ms: Option<i64>,
}

impl EventEngine {
    pub fn new(window: PersistenceWindow) -> Self {
        Self {
            window,
            events: HashMap::new(),
            fail_cooldowns: HashMap::new(),
            last_tick_ms: None,
        }
    }

    /// Replace all internal state with fresh maps (symbol switch, flush).
    pub fn reset(&mut self) {
        *self = Self::new(self.window);
    }

    /// Run one tick. Returns a snapshot of all tracked events except those
    /// in BROKEN state, sorted by descending price.
    pub fn process(
        &mut self,
        bids: &[EnrichedLevel],
        asks: &[EnrichedLevel],
        last_price: Decimal,
        now_ms: i64,
    ) -> Vec<PersistentEvent> {
        let dt_ms = self
            .last_tick_ms
            .map(|t| (now_ms - t).max(0))
            .unwrap_or(0);
        self.last_tick_ms = Some(now_ms);

        self.process_levels(bids, Side::Bid, last_price, now_ms);
        self.process_levels(asks, Side::Ask, last_price, now_ms);
        self.expire(now_ms);
        self.advance_states(last_price, now_ms, dt_ms);
        self.gc_cooldowns(now_ms);

        let mut out: Vec<PersistentEvent> = self
            .events
            .values()
            .filter(|ev| ev.state != EventState::Broken)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.price.cmp(&a.price));
        out
    }

    /// Detection pass for one side: classify levels, create or reinforce
    /// events.
    fn process_levels(&mut self, levels: &[EnrichedLevel], side: Side, last_price: Decimal, now_ms: i64) {
        for level in levels {
            let Some((detected_type, strength)) = classify_level(level) else {
                continue;
            };
            let key = (side, level.price);
            let notional = level.total;

            match self.events.get_mut(&key) {
                Some(event) => {
                    if event.state.is_terminal() {
                        continue;
                    }

                    // A touch that went stale on a mature level counts as a
                    // failed push once liquidity shows up again.
                    if now_ms - event.first_detected > FAILED_PUSH_MIN_AGE_MS
                        && now_ms - event.last_confirmed > FAILED_PUSH_STALE_MS
                    {
                        event.failed_pushes += 1;
                    }

                    event.confirmations += 1;
                    event.strength = (event.strength + REINFORCE_STRENGTH_STEP).min(100.0);
                    event.volume = notional;
                    event.peak_volume = event.peak_volume.max(notional);
                    event.last_confirmed = now_ms;

                    if detected_type == EventType::Ice && event.event_type != EventType::Ice {
                        debug!(price = %event.price, side = ?side, "event upgraded to iceberg");
                        event.event_type = EventType::Ice;
                        event.state = EventState::Stack;
                    }
                }
                None => {
                    // Never spawn a zone the market has already passed.
                    let behind = match side {
                        Side::Bid => last_price < level.price,
                        Side::Ask => last_price > level.price,
                    };
                    if behind {
                        continue;
                    }

                    let state = if detected_type == EventType::Absorption {
                        EventState::Absorption
                    } else {
                        EventState::Stack
                    };

                    debug!(price = %level.price, side = ?side, event_type = ?detected_type, "new persistent event");
                    self.events.insert(
                        key,
                        PersistentEvent {
                            event_type: detected_type,
                            price: level.price,
                            side,
                            state,
                            first_detected: now_ms,
                            last_confirmed: now_ms,
                            fail_time: None,
                            volume: notional,
                            peak_volume: notional,
                            strength,
                            confirmations: 1,
                            failed_pushes: 0,
                            fail_confidence: 0.0,
                            rem_drop_ratio: None,
                            is_active: true,
                            is_retest: false,
                            is_failed: false,
                        },
                    );
                }
            }
        }
    }

    /// Remove faded FAIL events and anything beyond the persistence window.
    fn expire(&mut self, now_ms: i64) {
        let window_ms = self.window.as_millis();
        self.events.retain(|_, event| {
            if event.state == EventState::Fail {
                now_ms - event.fail_time.unwrap_or(now_ms) <= FAIL_FADE_MS
            } else {
                now_ms - event.first_detected <= window_ms
            }
        });
    }

    /// State transitions for every tracked event: promotion, weakening,
    /// fail/broken resolution, retest flagging, and strength decay.
    fn advance_states(&mut self, last_price: Decimal, now_ms: i64, dt_ms: i64) {
        let window_ms = self.window.as_millis();
        let Self {
            events,
            fail_cooldowns,
            ..
        } = self;

        for event in events.values_mut() {
            let age_ms = now_ms - event.first_detected;
            let reconfirmed_this_tick = event.last_confirmed == now_ms;
            event.is_active = now_ms - event.last_confirmed <= ACTIVE_WINDOW_MS;

            if matches!(event.state, EventState::Stack | EventState::Absorption)
                && age_ms > HOLDING_MIN_AGE_MS
                && event.confirmations > HOLDING_MIN_CONFIRMATIONS
            {
                info!(price = %event.price, side = ?event.side, "event promoted to HOLDING");
                event.state = EventState::Holding;
            }

            if event.state == EventState::Holding
                && event.is_active
                && event.volume < event.peak_volume * WEAKENING_VOLUME_RATIO
            {
                debug!(price = %event.price, side = ?event.side, "event WEAKENING: liquidity thinning");
                event.state = EventState::Weakening;
            }

            if !event.state.is_terminal() {
                let tolerance = last_price * FAIL_BREACH_TOLERANCE;
                let breached = match event.side {
                    Side::Bid => last_price < event.price - tolerance,
                    Side::Ask => last_price > event.price + tolerance,
                };

                if breached {
                    let bucket = fail_bucket(event.price);
                    let in_cooldown = fail_cooldowns
                        .get(&bucket)
                        .map(|armed| now_ms - armed < FAIL_COOLDOWN_MS)
                        .unwrap_or(false);

                    if event.state.is_significant() && age_ms > FAIL_MIN_AGE_MS && !in_cooldown {
                        let drop_ratio = if event.peak_volume > Decimal::ZERO {
                            ((event.peak_volume - event.volume) / event.peak_volume)
                                .to_f64()
                                .unwrap_or(0.0)
                        } else {
                            0.0
                        };
                        let confidence = fail_confidence(event, drop_ratio, age_ms);

                        if confidence >= FAIL_CONFIDENCE_THRESHOLD {
                            info!(
                                price = %event.price,
                                side = ?event.side,
                                confidence,
                                drop_ratio,
                                "support/resistance FAIL"
                            );
                            event.state = EventState::Fail;
                            event.event_type = EventType::Fail;
                            event.fail_time = Some(now_ms);
                            event.fail_confidence = confidence;
                            event.rem_drop_ratio = Some(drop_ratio);
                            event.is_failed = true;
                            event.is_active = false;
                            fail_cooldowns.insert(bucket, now_ms);
                        } else {
                            debug!(price = %event.price, confidence, "breach below confidence, event BROKEN");
                            event.state = EventState::Broken;
                        }
                    } else {
                        event.state = EventState::Broken;
                    }
                    continue;
                }
            }

            if !event.is_failed
                && event.state != EventState::Broken
                && age_ms > FAIL_MIN_AGE_MS
                && !reconfirmed_this_tick
                && (last_price - event.price).abs() <= event.price * RETEST_TOLERANCE
            {
                event.is_retest = true;
            }

            if event.state != EventState::Fail && dt_ms > 0 {
                let life_spent = dt_ms as f64 / window_ms as f64;
                event.strength =
                    (event.strength - (event.strength - STRENGTH_FLOOR) * life_spent).max(STRENGTH_FLOOR);
            }
        }
    }

    /// Probabilistic purge of expired cooldown buckets.
    fn gc_cooldowns(&mut self, now_ms: i64) {
        if rand::random::<f64>() < COOLDOWN_GC_PROBABILITY {
            self.fail_cooldowns.retain(|_, armed| now_ms - *armed < FAIL_COOLDOWN_MS);
        }
    }
}

/// Classify an enriched level into at most one detection, by priority.
fn classify_level(level: &EnrichedLevel) -> Option<(EventType, f64)> {
    if level.is_iceberg {
        Some((EventType::Ice, ICEBERG_STRENGTH))
    } else if level.absorption > ABSORPTION_RATIO_THRESHOLD {
        Some((EventType::Absorption, ABSORPTION_STRENGTH))
    } else if level.is_spoof {
        Some((EventType::Pull, SPOOF_STRENGTH))
    } else if level.total > STACK_NOTIONAL && level.age > STACK_MIN_AGE {
        Some((EventType::Stack, STACK_STRENGTH))
    } else {
        None
    }
}

/// Confidence that a breach was a genuine failed defense rather than
/// momentum chewing through the level.
fn fail_confidence(event: &PersistentEvent, drop_ratio: f64, age_ms: i64) -> f64 {
    let mut confidence: f64 = 50.0;

    if event.state == EventState::Holding {
        confidence += 20.0;
    }
    if matches!(event.event_type, EventType::Absorption | EventType::Ice) {
        confidence += 15.0;
    }

    if age_ms > 300_000 {
        confidence += 15.0;
    } else if age_ms < 120_000 {
        confidence -= 10.0;
    }

    if drop_ratio > 0.5 {
        confidence += 25.0;
    } else if drop_ratio < 0.1 {
        // Low drop means the level was eaten by real volume, not pulled.
        confidence -= 20.0;
    }

    if event.failed_pushes > 2 {
        confidence += 20.0;
    } else if event.failed_pushes == 0 {
        // First-touch breaks are usually momentum, not a failed defense.
        confidence -= 15.0;
    }

    confidence.clamp(0.0, 100.0)
}

fn fail_bucket(price: Decimal) -> i64 {
    (price / FAIL_BUCKET_SIZE).floor().to_i64().unwrap_or(0)
}
