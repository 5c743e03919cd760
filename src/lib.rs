//! Synheart Trends - Weekly aggregation and forecasting engine for wearable metrics
//!
//! Trends turns heterogeneous daily and activity records from several upstream
//! sources into ISO-week aggregates through a deterministic pipeline: field
//! normalization → per-day source merge → weekly fold → trend annotation →
//! forecasting and correlation → report encoding.
//!
//! ## Modules
//!
//! - **Normalizer**: Resolve source-specific keys and units through a versioned field table
//! - **Aggregator**: Weekly buckets, source merge, streaks and week-over-week trends
//! - **Circular**: Clock-time statistics for sleep onset and wake times
//! - **Forecast / Correlation**: Next-week forecasts and cross-metric correlation

pub mod aggregator;
pub mod calendar;
pub mod circular;
pub mod config;
pub mod correlation;
pub mod encoder;
pub mod error;
pub mod forecast;
pub mod normalizer;
pub mod pipeline;
pub mod schema;
pub mod types;

pub use aggregator::{merge_sources, Aggregator};
pub use config::{SortOrder, TrendConfig};
pub use correlation::correlation_matrix;
pub use error::ComputeError;
pub use forecast::{ForecastBounds, ForecastOptions, Forecaster};
pub use normalizer::FieldNormalizer;
pub use pipeline::{weekly_trends_json, TrendProcessor, TrendRequest};

// Schema exports
pub use schema::{NormalizedSeriesSource, RawRecord, FIELD_TABLE_VERSION};

pub use types::{FieldId, TrendReport};

/// Trends version embedded in every report
pub const TRENDS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "synheart-trends";
