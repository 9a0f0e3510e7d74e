//! Metrics aggregation and power estimation.

pub mod aggregator;
pub mod error;
pub mod power;

pub use aggregator::{
    average_pace, format_pace, AggregatorConfig, ChannelStats, MetricsAggregator, MetricsSummary,
};
pub use error::{MetricsError, MetricsResult};
pub use power::{PowerEstimator, PowerModelConfig};
