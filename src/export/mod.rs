//! Outward-facing views: Prometheus exposition and health reports.

pub mod health;
pub mod prometheus;

pub use self::health::{HealthReport, HealthStatus, SamplingHealth, StorageHealth};
pub use self::prometheus::PrometheusRecorder;
