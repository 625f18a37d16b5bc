// Library exports for orderflow-analytics

pub mod config; // Engine configuration and tuned constants
pub mod error;
pub mod types; // Normalized feed types (candles, trades, book levels)

pub mod profile; // Volume profile, candle enrichment, session levels, CVD state
pub mod context; // Auction regime classification with temporal hysteresis
pub mod levels; // Per-level order book enrichment (delta/iceberg/spoof/absorption)
pub mod events; // Persistent event state machine over enriched levels
pub mod grouping; // Adaptive zone aggregation with noise scoring

pub use config::{NoiseLevel, PersistenceWindow};
pub use error::{AnalyticsError, Result};
