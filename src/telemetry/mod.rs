//! Telemetry: log output setup and engine counters.

mod logging;
mod metrics;

pub use logging::{init_logging, LogConfig, LogFormat};
pub(crate) use logging::is_valid_level;
pub use metrics::{Counter, InterfaceStats, MetricsRegistry};
