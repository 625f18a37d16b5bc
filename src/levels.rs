//! Per-level order book enrichment
//!
//! Compares each depth snapshot against the previous enriched state for the
//! same side and attributes recent executions to levels, producing the
//! delta/iceberg/spoof/absorption flags the event engine consumes.
//!
//! Levels are ephemeral: a snapshot replaces the previous one wholesale
//! (typically every 100ms), and only `age`/`iceberg_vol` carry across via
//! the previous enriched map.

use std::collections::HashMap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::{BookLevel, Side, Trade};

/// Removed notional (quote currency) above which an unexecuted pull is
/// flagged as a spoof.
pub const SPOOF_NOTIONAL: Decimal = dec!(5000);

/// Depth level enriched with flow attribution and persistence tracking.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EnrichedLevel {
    pub side: Side,

    #[schemars(with = "String")]
    pub price: Decimal,

    #[schemars(with = "String")]
    pub qty: Decimal,

    /// Notional value at this level (price × qty)
    #[schemars(with = "String")]
    pub total: Decimal,

    /// Share of this side's visible quantity held at this level
    pub depth_ratio: f64,

    /// Running depth from best price through this level
    #[schemars(with = "String")]
    pub cumulative_qty: Decimal,

    /// (qty − prev qty) + executed volume; `qty` for a brand-new level
    #[schemars(with = "String")]
    pub delta_qty: Decimal,

    /// Volume executed at this price this tick, aggressor-attributed
    #[schemars(with = "String")]
    pub trade_vol: Decimal,

    /// executed / remaining qty (uncapped ratio, 0 when either is 0)
    pub absorption: f64,

    /// Liquidity replenished despite being hit
    pub is_iceberg: bool,

    /// Running executed volume accumulated under iceberg conditions
    #[schemars(with = "String")]
    pub iceberg_vol: Decimal,

    /// Liquidity pulled without execution beyond [`SPOOF_NOTIONAL`]
    pub is_spoof: bool,

    /// Consecutive snapshots this price has persisted (0 = new)
    pub age: u64,
}

/// Enrich one side of a depth snapshot.
///
/// `levels` must be ranked from best price outward, as delivered by the
/// feed. `prev` is the enriched map from the previous snapshot of the same
/// side (empty on the first tick). Trade attribution follows the aggressor
/// flag: sell aggressors (`is_buyer_maker`) hit bids, buy aggressors lift
/// asks.
pub fn analyze_dom(
    levels: &[BookLevel],
    prev: &HashMap<Decimal, EnrichedLevel>,
    recent_trades: &[Trade],
    side: Side,
) -> Vec<EnrichedLevel> {
    let side_total: Decimal = levels.iter().map(|l| l.qty).sum();
    let side_total_f = side_total.to_f64().unwrap_or(0.0).max(f64::MIN_POSITIVE);

    let mut enriched = Vec::with_capacity(levels.len());
    let mut cumulative_qty = Decimal::ZERO;

    for level in levels {
        let executed: Decimal = recent_trades
            .iter()
            .filter(|t| t.price == level.price && trade_hits_side(t, side))
            .map(|t| t.qty)
            .sum();

        let previous = prev.get(&level.price);

        let delta_qty = match previous {
            Some(p) => (level.qty - p.qty) + executed,
            None => level.qty,
        };

        let removed_notional = previous
            .map(|p| (p.qty - level.qty).max(Decimal::ZERO) * level.price)
            .unwrap_or(Decimal::ZERO);
        let is_spoof = removed_notional > SPOOF_NOTIONAL && executed == Decimal::ZERO;

        let is_iceberg = executed > Decimal::ZERO && delta_qty >= Decimal::ZERO;
        let mut iceberg_vol = previous.map(|p| p.iceberg_vol).unwrap_or(Decimal::ZERO);
        if is_iceberg {
            iceberg_vol += executed;
        }

        let absorption = if executed > Decimal::ZERO && level.qty > Decimal::ZERO {
            (executed / level.qty).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };

        let age = previous.map(|p| p.age + 1).unwrap_or(0);

        cumulative_qty += level.qty;

        enriched.push(EnrichedLevel {
            side,
            price: level.price,
            qty: level.qty,
            total: level.price * level.qty,
            depth_ratio: level.qty.to_f64().unwrap_or(0.0) / side_total_f,
            cumulative_qty,
            delta_qty,
            trade_vol: executed,
            absorption,
            is_iceberg,
            iceberg_vol,
            is_spoof,
            age,
        });
    }

    enriched
}

/// Index an enriched side by price, for use as the next tick's `prev`.
pub fn enriched_map(levels: &[EnrichedLevel]) -> HashMap<Decimal, EnrichedLevel> {
    levels.iter().map(|l| (l.price, l.clone())).collect()
}

fn trade_hits_side(trade: &Trade, side: Side) -> bool {
    match side {
        Side::Bid => trade.is_buyer_maker,
        Side::Ask => !trade.is_buyer_maker,
    }
}

/// Aggregated side-pair metrics for presentation surfaces.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BookSummary {
    /// Spread in basis points of the best bid
    pub spread_bps: f64,

    /// Quantity-weighted fair price at the touch
    pub microprice: f64,

    /// Total visible bid quantity
    #[schemars(with = "String")]
    pub bid_volume: Decimal,

    /// Total visible ask quantity
    #[schemars(with = "String")]
    pub ask_volume: Decimal,

    /// bid_volume / ask_volume, >1 = buy-side pressure
    pub imbalance_ratio: f64,
}

/// Summarize both enriched sides. Returns `None` when either side is empty.
pub fn summarize_book(bids: &[EnrichedLevel], asks: &[EnrichedLevel]) -> Option<BookSummary> {
    let best_bid = bids.first()?;
    let best_ask = asks.first()?;

    let bid_price = best_bid.price.to_f64()?;
    let ask_price = best_ask.price.to_f64()?;
    let bid_qty = best_bid.qty.to_f64()?;
    let ask_qty = best_ask.qty.to_f64()?;

    let spread_bps = (ask_price - bid_price) / bid_price.max(f64::MIN_POSITIVE) * 10_000.0;
    let microprice = (bid_price * ask_qty + ask_price * bid_qty) / (bid_qty + ask_qty).max(f64::MIN_POSITIVE);

    let bid_volume: Decimal = bids.iter().map(|l| l.qty).sum();
    let ask_volume: Decimal = asks.iter().map(|l| l.qty).sum();
    let imbalance_ratio =
        bid_volume.to_f64().unwrap_or(0.0) / ask_volume.to_f64().unwrap_or(0.0).max(f64::MIN_POSITIVE);

    Some(BookSummary {
        spread_bps,
        microprice,
        bid_volume,
        ask_volume,
        imbalance_ratio,
    })
}
