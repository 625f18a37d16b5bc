//! Normalized feed types consumed by the analytics engines
//!
//! The core is protocol-agnostic: transport delivers candles, trade
//! executions and ranked depth snapshots already parsed into these shapes.
//! Prices and quantities are `Decimal` (exact map keys, no float identity
//! bugs); derived scores and ratios are `f64`.

use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Side of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

/// OHLCV candle with taker-buy attribution, as delivered by the feed.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Candle {
    /// Open time (milliseconds since Unix epoch)
    pub timestamp: i64,

    #[schemars(with = "String")]
    pub open: Decimal,

    #[schemars(with = "String")]
    pub high: Decimal,

    #[schemars(with = "String")]
    pub low: Decimal,

    #[schemars(with = "String")]
    pub close: Decimal,

    /// Total base-asset volume
    #[schemars(with = "String")]
    pub volume: Decimal,

    /// Portion of `volume` where the buyer was the aggressor
    #[schemars(with = "String")]
    pub taker_buy_volume: Decimal,

    /// Immutable once closed; open candles are replaced wholesale per tick
    pub is_closed: bool,
}

impl Candle {
    /// Typical price (HLC/3), used by the VWAP deviation accumulator.
    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }

    /// Aggressor imbalance: taker buys minus taker sells.
    pub fn delta(&self) -> Decimal {
        self.taker_buy_volume * Decimal::from(2) - self.volume
    }
}

/// Candle enriched with session-scoped order-flow context.
///
/// `cvd`, `vwap` and `vwap_std` are accumulators that reset at each UTC
/// calendar-day boundary.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EnrichedCandle {
    #[serde(flatten)]
    pub candle: Candle,

    /// takerBuy − takerSell for this candle
    #[schemars(with = "String")]
    pub delta: Decimal,

    /// Running sum of delta within the UTC day
    #[schemars(with = "String")]
    pub cvd: Decimal,

    /// Session volume-weighted average price
    pub vwap: f64,

    /// Volume-weighted stdev of typical price around the VWAP
    pub vwap_std: f64,

    /// Pivot-based price/delta divergence, if any
    pub divergence: Option<Divergence>,
}

/// Price/delta divergence at a pivot candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Divergence {
    /// Lower low in price with higher delta
    Bullish,
    /// Higher high in price with lower delta
    Bearish,
}

/// Single trade execution from the feed.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Trade {
    #[schemars(with = "String")]
    pub price: Decimal,

    #[schemars(with = "String")]
    pub qty: Decimal,

    /// Execution time (milliseconds since Unix epoch)
    pub time: i64,

    /// True when the buyer was the passive side (sell aggressor)
    pub is_buyer_maker: bool,
}

/// Raw depth level from a book snapshot, ranked from best price outward.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BookLevel {
    #[schemars(with = "String")]
    pub price: Decimal,

    #[schemars(with = "String")]
    pub qty: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(volume: Decimal, taker_buy: Decimal) -> Candle {
        Candle {
            timestamp: 0,
            open: dec!(100),
            high: dec!(101),
            low: dec!(99),
            close: dec!(100),
            volume,
            taker_buy_volume: taker_buy,
            is_closed: true,
        }
    }

    #[test]
    fn test_delta_is_buy_minus_sell() {
        // 7 bought, 3 sold -> delta 4
        assert_eq!(candle(dec!(10), dec!(7)).delta(), dec!(4));
        // all sold -> fully negative
        assert_eq!(candle(dec!(10), dec!(0)).delta(), dec!(-10));
    }

    #[test]
    fn test_typical_price() {
        assert_eq!(candle(dec!(1), dec!(1)).typical_price(), dec!(100));
    }
}
