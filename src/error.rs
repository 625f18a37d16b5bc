use rust_decimal::Decimal;
use thiserror::Error;

/// Error taxonomy for the analytics core.
///
/// Insufficient data never raises: engines return neutral/zeroed snapshots
/// instead. Only invalid configuration fails fast, at the call boundary.
#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Invalid tick size: {0} (must be positive)")]
    InvalidTickSize(Decimal),

    #[error("Invalid group size: {0} (must be non-negative)")]
    InvalidGroupSize(Decimal),
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
