//! End-to-end scenarios wiring the analytics engines together the way a
//! live feed would: candles into profile/context, depth snapshots and
//! trades into level enrichment, enriched levels into the event engine,
//! and raw activity into zone aggregation.

use orderflow_analytics::config::{NoiseLevel, PersistenceWindow};
use orderflow_analytics::context::{calculate_auction_context, AuctionContext, AuctionMode, Bias, ContextTracker};
use orderflow_analytics::events::{EventEngine, EventState, EventType};
use orderflow_analytics::grouping::SmartGroupingEngine;
use orderflow_analytics::levels::{analyze_dom, enriched_map};
use orderflow_analytics::profile::{calculate_profile, enrich_candles};
use orderflow_analytics::types::{BookLevel, Candle, Side, Trade};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const DAY_MS: i64 = 86_400_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn candle(
    timestamp: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    taker_buy_volume: Decimal,
) -> Candle {
    Candle {
        timestamp,
        open,
        high,
        low,
        close,
        volume,
        taker_buy_volume,
        is_closed: true,
    }
}

fn book(levels: &[(Decimal, Decimal)]) -> Vec<BookLevel> {
    levels
        .iter()
        .map(|(price, qty)| BookLevel {
            price: *price,
            qty: *qty,
        })
        .collect()
}

fn trade(price: Decimal, qty: Decimal, time: i64, is_buyer_maker: bool) -> Trade {
    Trade {
        price,
        qty,
        time,
        is_buyer_maker,
    }
}

/// Rising session with a fat middle: the value area must bracket the POC
/// and hold at least 70% of total volume.
#[test]
fn test_profile_value_area_invariants() {
    let candles = vec![
        candle(0, dec!(100), dec!(101), dec!(100), dec!(101), dec!(50), dec!(30)),
        candle(60_000, dec!(101), dec!(103), dec!(100), dec!(102), dec!(200), dec!(120)),
        candle(120_000, dec!(102), dec!(103), dec!(101), dec!(102), dec!(180), dec!(90)),
        candle(180_000, dec!(102), dec!(105), dec!(102), dec!(104), dec!(60), dec!(40)),
        candle(240_000, dec!(104), dec!(105), dec!(103), dec!(104), dec!(40), dec!(10)),
    ];

    let profile = calculate_profile(&candles, dec!(1)).unwrap();

    assert!(profile.val <= profile.poc);
    assert!(profile.poc <= profile.vah);
    assert_eq!(profile.session_high, dec!(105));
    assert_eq!(profile.session_low, dec!(100));

    let value_area_volume: Decimal = profile
        .levels
        .iter()
        .filter(|l| l.price >= profile.val && l.price <= profile.vah)
        .map(|l| l.volume)
        .sum();
    assert!(value_area_volume >= profile.total_volume * dec!(0.70));

    let poc_volume = profile
        .levels
        .iter()
        .find(|l| l.price == profile.poc)
        .map(|l| l.volume)
        .unwrap();
    assert!(profile.levels.iter().all(|l| l.volume <= poc_volume));
}

/// Profiles are pure recomputations: the same candles give the same result.
#[test]
fn test_profile_recompute_is_deterministic() {
    let candles = vec![
        candle(0, dec!(100), dec!(102), dec!(99), dec!(101), dec!(75), dec!(40)),
        candle(60_000, dec!(101), dec!(104), dec!(100), dec!(103), dec!(125), dec!(60)),
    ];
    let first = calculate_profile(&candles, dec!(0.5)).unwrap();
    let second = calculate_profile(&candles, dec!(0.5)).unwrap();
    assert_eq!(first, second);
}

/// Session accumulators restart at the UTC midnight boundary: the first
/// candle of the new day carries only its own delta, and VWAP restarts
/// from its own typical price.
#[test]
fn test_session_accumulators_reset_at_utc_midnight() {
    let candles = vec![
        candle(DAY_MS - 60_000, dec!(100), dec!(101), dec!(99), dec!(100), dec!(10), dec!(10)),
        candle(DAY_MS, dec!(100), dec!(101), dec!(99), dec!(100), dec!(10), dec!(0)),
    ];

    let enriched = enrich_candles(&candles);

    assert_eq!(enriched[0].cvd, dec!(10));
    // Not 0: the reset re-seeds with the candle's own delta.
    assert_eq!(enriched[1].cvd, dec!(-10));
    // VWAP of a one-candle session is its typical price, (101+99+100)/3.
    assert!((enriched[1].vwap - 100.0).abs() < 1e-9);
    assert!(enriched[1].vwap_std.abs() < 1e-9);
}

/// Price accepted above value with buy-side flow behind it classifies as
/// initiative buying with corroborated confidence.
#[test]
fn test_initiative_buy_with_supporting_flow() {
    let mut candles = Vec::new();
    for i in 0..6 {
        let base = dec!(100) + Decimal::from(i) / dec!(4);
        candles.push(candle(
            i * 60_000,
            base,
            base + dec!(1),
            base - dec!(1),
            base + dec!(0.5),
            dec!(100),
            dec!(90),
        ));
    }

    let profile = calculate_profile(&candles, dec!(1)).unwrap();
    let enriched = enrich_candles(&candles);
    let vwap = enriched[enriched.len() - 1].vwap;

    let context = calculate_auction_context(dec!(105), &profile, vwap, &enriched);

    assert_eq!(context.mode, AuctionMode::InitiativeBuy);
    assert_eq!(context.bias, Bias::Bullish);
    // Base 50 plus all three directional corroborations, clamped.
    assert_eq!(context.confidence, 100.0);
}

/// A low-confidence mode flip inside the stability window is suppressed;
/// the same flip is accepted once the window has elapsed, and a
/// high-confidence flip is accepted immediately.
#[test]
fn test_context_tracker_hysteresis() {
    let balanced = AuctionContext {
        mode: AuctionMode::Balanced,
        confidence: 50.0,
        scenario: "Balanced auction: price accepted inside value".to_string(),
        bias: Bias::Neutral,
    };
    let rotational = AuctionContext {
        mode: AuctionMode::Rotational,
        confidence: 50.0,
        scenario: "Rotation near value area high: responsive selling likely".to_string(),
        bias: Bias::Neutral,
    };
    let initiative = AuctionContext {
        mode: AuctionMode::InitiativeBuy,
        confidence: 95.0,
        scenario: "Initiative buying: price accepted above value area".to_string(),
        bias: Bias::Bullish,
    };

    let mut tracker = ContextTracker::new();
    assert_eq!(tracker.update(balanced.clone(), 0).mode, AuctionMode::Balanced);
    assert_eq!(tracker.update(rotational.clone(), 1_000).mode, AuctionMode::Balanced);
    assert_eq!(tracker.update(rotational, 3_000).mode, AuctionMode::Rotational);

    let mut tracker = ContextTracker::new();
    tracker.update(balanced, 0);
    assert_eq!(tracker.update(initiative, 500).mode, AuctionMode::InitiativeBuy);
}

/// Snapshots cross to presentation surfaces as JSON: enum casing and
/// Decimal-as-string are part of the wire contract.
#[test]
fn test_snapshot_wire_format() {
    let context = AuctionContext {
        mode: AuctionMode::FailedAuctionHigh,
        confidence: 75.0,
        scenario: "Failed auction above value: breakout rejected back inside".to_string(),
        bias: Bias::Bearish,
    };
    let json = serde_json::to_value(&context).unwrap();
    assert_eq!(json["mode"], "FAILED_AUCTION_HIGH");
    assert_eq!(json["bias"], "bearish");

    let enriched = enrich_candles(&[candle(0, dec!(100), dec!(101), dec!(99), dec!(100), dec!(10), dec!(7))]);
    let json = serde_json::to_value(&enriched[0]).unwrap();
    // Candle fields are flattened into the enriched shape.
    assert_eq!(json["close"], "100");
    assert_eq!(json["cvd"], "4");
    assert!(json["divergence"].is_null());
}

/// A persistent bid wall matures into a STACK event once it has survived
/// enough snapshots, and a breach while the zone is still young resolves
/// to BROKEN without emitting a FAIL.
#[test]
fn test_stack_lifecycle_from_depth_snapshots() {
    let mut engine = EventEngine::new(PersistenceWindow::Min30);
    let bids = book(&[(dec!(100), dec!(2000))]);
    let mut prev = Default::default();

    for tick in 0..7 {
        let enriched = analyze_dom(&bids, &prev, &[], Side::Bid);
        engine.process(&enriched, &[], dec!(100.5), tick * 1_000);
        prev = enriched_map(&enriched);
    }
    let enriched = analyze_dom(&bids, &prev, &[], Side::Bid);
    let snapshot = engine.process(&enriched, &[], dec!(100.5), 7_000);

    assert_eq!(snapshot.len(), 1);
    let event = &snapshot[0];
    assert_eq!(event.event_type, EventType::Stack);
    assert_eq!(event.state, EventState::Stack);
    assert_eq!(event.side, Side::Bid);
    assert_eq!(event.price, dec!(100));
    assert!(event.confirmations >= 2);

    // Price trades through a seconds-old zone: momentum, not a failed
    // defense. The zone dies silently.
    let after_breach = engine.process(&[], &[], dec!(90), 8_000);
    assert!(after_breach.is_empty());
}

/// A large resting ask pulled without any executions is flagged as a
/// spoof and surfaces as a PULL event.
#[test]
fn test_spoof_pull_detection_through_pipeline() {
    let mut engine = EventEngine::new(PersistenceWindow::Min30);

    let first = analyze_dom(&book(&[(dec!(110), dec!(60))]), &Default::default(), &[], Side::Ask);
    engine.process(&[], &first, dec!(109), 0);

    let second = analyze_dom(&book(&[(dec!(110), dec!(1))]), &enriched_map(&first), &[], Side::Ask);
    assert!(second[0].is_spoof);

    let snapshot = engine.process(&[], &second, dec!(109), 1_000);
    let pull = snapshot.iter().find(|e| e.price == dec!(110)).unwrap();
    assert_eq!(pull.event_type, EventType::Pull);
    assert_eq!(pull.side, Side::Ask);
}

/// Full tick loop: trades hitting a replenishing bid wall drive iceberg
/// detection in level enrichment, an ICE event in the event engine, and a
/// structural zone in the aggregation layer.
#[test]
fn test_iceberg_defense_full_pipeline() {
    init_tracing();
    let mut events = EventEngine::new(PersistenceWindow::Min30);
    let mut zones = SmartGroupingEngine::new();
    let bids = book(&[(dec!(50000), dec!(4))]);
    let mut prev = Default::default();

    let mut run_tick = |now_ms: i64, prev: &_| {
        let trades = vec![trade(dec!(50000), dec!(2), now_ms, true)];
        let enriched = analyze_dom(&bids, prev, &trades, Side::Bid);
        assert!(enriched[0].is_iceberg);

        let snapshot = events.process(&enriched, &[], dec!(50000.5), now_ms);
        zones.observe_price(dec!(50000.5));
        zones.apply_depth_update(dec!(50000), dec!(4), dec!(4), now_ms);
        zones.apply_execution(dec!(50000), dec!(2), now_ms);
        (snapshot, enriched_map(&enriched))
    };

    for tick in 0..7 {
        prev = run_tick(tick * 10_000, &prev).1;
    }
    let (snapshot, prev) = run_tick(70_000, &prev);

    assert_eq!(snapshot.len(), 1);
    let event = &snapshot[0];
    assert_eq!(event.event_type, EventType::Ice);
    assert_eq!(event.confirmations, 8);

    // 8 ticks x qty 2, all attributed to the refilling level.
    let last = analyze_dom(&bids, &prev, &[], Side::Bid);
    assert_eq!(last[0].iceberg_vol, dec!(16));

    let smart = zones
        .aggregate_zones(dec!(10), 600_000, NoiseLevel::Auto, dec!(50000.5), 70_000)
        .unwrap();
    assert_eq!(smart.len(), 1);
    assert_eq!(smart[0].price_start, dec!(50000));
    assert_eq!(smart[0].executed, dec!(16));
    assert!(smart[0].is_significant);
}
