//! Observability configuration.
//!
//! Configuration is resolved once at startup: pick the environment defaults
//! with [`ObservabilityConfig::for_environment`], optionally overlay a TOML
//! document ([`ObservabilityConfig::from_toml_str`]) and `WORKFLOW_*`
//! environment variables ([`ObservabilityConfig::apply_env`]), then
//! [`validate`](ObservabilityConfig::validate). Nothing is hot-reloaded.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metrics::OverflowStrategy;
use crate::sampling::AdaptiveSettings;
use crate::{Error, Result};

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Local development: everything sampled, short retention.
    #[default]
    Development,
    /// Pre-production.
    Staging,
    /// Production.
    Production,
}

impl Environment {
    /// Lower-case name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" | "local" => Ok(Environment::Development),
            "stage" | "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Production),
            other => Err(Error::Config(format!("unknown environment '{other}'"))),
        }
    }
}

/// Head sampling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Fixed-rate consistent-hash sampling.
    Probabilistic,
    /// Rate adjusted to measured overhead.
    Adaptive,
}

/// Where sampled spans go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracerKind {
    /// Discard spans.
    Noop,
    /// Emit spans as `tracing` events.
    Log,
}

/// Sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Head strategy.
    pub strategy: SamplingStrategy,
    /// Head rate, or initial rate for the adaptive strategy.
    pub rate: f64,
    /// Keep every failed execution.
    pub always_sample_errors: bool,
    /// Keep every execution at or above `slow_threshold_ms`.
    pub always_sample_slow: bool,
    /// Slow threshold in milliseconds.
    pub slow_threshold_ms: u64,
    /// Adaptive bounds, used by the adaptive strategy.
    pub adaptive: AdaptiveSettings,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            strategy: SamplingStrategy::Probabilistic,
            rate: 1.0,
            always_sample_errors: true,
            always_sample_slow: true,
            slow_threshold_ms: 1000,
            adaptive: AdaptiveSettings::default(),
        }
    }
}

impl SamplingConfig {
    /// Slow threshold as a [`Duration`].
    #[must_use]
    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }
}

/// Label cardinality settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardinalityConfig {
    /// Distinct values admitted per label key.
    pub max_label_values: usize,
    /// Replacement for values past the cap.
    pub overflow: OverflowStrategy,
}

impl Default for CardinalityConfig {
    fn default() -> Self {
        Self {
            max_label_values: 100,
            overflow: OverflowStrategy::Hash,
        }
    }
}

/// Retention settings reported to storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Trace retention in hours.
    pub trace_ttl_hours: u64,
    /// Metric retention in hours.
    pub metric_ttl_hours: u64,
    /// Compress stored traces.
    pub compress_traces: bool,
    /// Compress stored metrics.
    pub compress_metrics: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            trace_ttl_hours: 1,
            metric_ttl_hours: 24,
            compress_traces: false,
            compress_metrics: false,
        }
    }
}

/// Complete observability configuration.
///
/// # Example
///
/// ```rust
/// use workflow_primitives::config::{Environment, ObservabilityConfig, SamplingStrategy};
///
/// let config = ObservabilityConfig::from_toml_str(r#"
///     environment = "production"
///
///     [sampling]
///     rate = 0.1
/// "#).unwrap();
///
/// assert_eq!(config.environment, Environment::Production);
/// assert_eq!(config.sampling.rate, 0.1);
/// // untouched keys keep the production defaults
/// assert_eq!(config.sampling.strategy, SamplingStrategy::Adaptive);
/// assert_eq!(config.retention.metric_ttl_hours, 720);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Deployment environment.
    pub environment: Environment,
    /// First segment of span names.
    pub domain: String,
    /// Span destination.
    pub tracer: TracerKind,
    /// Register the Prometheus exporter.
    pub prometheus_enabled: bool,
    /// Samples kept per primitive for percentiles.
    pub percentile_window: usize,
    /// Sampling settings.
    pub sampling: SamplingConfig,
    /// Label cardinality settings.
    pub cardinality: CardinalityConfig,
    /// Retention settings.
    pub retention: RetentionConfig,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self::for_environment(Environment::Development)
    }
}

impl ObservabilityConfig {
    /// Defaults for `environment`.
    #[must_use]
    pub fn for_environment(environment: Environment) -> Self {
        let (sampling, retention) = match environment {
            Environment::Development => (SamplingConfig::default(), RetentionConfig::default()),
            Environment::Staging => (
                SamplingConfig {
                    strategy: SamplingStrategy::Adaptive,
                    rate: 0.2,
                    slow_threshold_ms: 2000,
                    adaptive: AdaptiveSettings {
                        min_rate: 0.05,
                        max_rate: 0.5,
                        ..AdaptiveSettings::default()
                    },
                    ..SamplingConfig::default()
                },
                RetentionConfig {
                    trace_ttl_hours: 72,
                    metric_ttl_hours: 168,
                    compress_traces: false,
                    compress_metrics: false,
                },
            ),
            Environment::Production => (
                SamplingConfig {
                    strategy: SamplingStrategy::Adaptive,
                    rate: 0.05,
                    slow_threshold_ms: 5000,
                    adaptive: AdaptiveSettings {
                        min_rate: 0.01,
                        max_rate: 0.2,
                        ..AdaptiveSettings::default()
                    },
                    ..SamplingConfig::default()
                },
                RetentionConfig {
                    trace_ttl_hours: 168,
                    metric_ttl_hours: 720,
                    compress_traces: true,
                    compress_metrics: true,
                },
            ),
        };
        Self {
            environment,
            domain: "workflow".to_string(),
            tracer: TracerKind::Log,
            prometheus_enabled: true,
            percentile_window: 1000,
            sampling,
            cardinality: CardinalityConfig::default(),
            retention,
        }
    }

    /// Parse a TOML document on top of the defaults of the environment it names.
    ///
    /// Keys absent from the document keep those defaults. The result is validated.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let overlay: toml::Table = toml::from_str(content)?;
        let environment = match overlay.get("environment") {
            Some(toml::Value::String(name)) => name.parse()?,
            Some(other) => {
                return Err(Error::Config(format!(
                    "environment must be a string, got {}",
                    other.type_str()
                )))
            }
            None => Environment::default(),
        };

        let toml::Value::Table(mut merged) = toml::Value::try_from(Self::for_environment(environment))
            .map_err(|e| Error::Config(format!("cannot encode defaults: {e}")))?
        else {
            return Err(Error::Config("defaults did not encode as a table".into()));
        };
        merge_tables(&mut merged, overlay);
        let mut config: Self = toml::Value::Table(merged).try_into()?;
        config.environment = environment;
        config.validate()?;
        Ok(config)
    }

    /// Defaults for `WORKFLOW_ENV` (development when unset) with the other
    /// `WORKFLOW_*` overrides applied from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup("WORKFLOW_ENV") {
            Some(name) => name.parse()?,
            None => Environment::default(),
        };
        let mut config = Self::for_environment(environment);
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `WORKFLOW_SAMPLING_RATE`, `WORKFLOW_SLOW_THRESHOLD_MS` and
    /// `WORKFLOW_MAX_LABEL_VALUES` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(rate) = lookup("WORKFLOW_SAMPLING_RATE") {
            self.sampling.rate = parse_var("WORKFLOW_SAMPLING_RATE", &rate)?;
        }
        if let Some(ms) = lookup("WORKFLOW_SLOW_THRESHOLD_MS") {
            self.sampling.slow_threshold_ms = parse_var("WORKFLOW_SLOW_THRESHOLD_MS", &ms)?;
        }
        if let Some(max) = lookup("WORKFLOW_MAX_LABEL_VALUES") {
            self.cardinality.max_label_values = parse_var("WORKFLOW_MAX_LABEL_VALUES", &max)?;
        }
        Ok(())
    }

    /// Check ranges and required values.
    pub fn validate(&self) -> Result<()> {
        let sampling = &self.sampling;
        if !(0.0..=1.0).contains(&sampling.rate) {
            return Err(Error::Config(format!(
                "sampling rate {} is outside [0, 1]",
                sampling.rate
            )));
        }
        if sampling.slow_threshold_ms == 0 {
            return Err(Error::Config("slow threshold must be positive".into()));
        }
        let adaptive = &sampling.adaptive;
        if !(adaptive.target_overhead > 0.0 && adaptive.target_overhead < 1.0) {
            return Err(Error::Config(format!(
                "adaptive target overhead {} is outside (0, 1)",
                adaptive.target_overhead
            )));
        }
        if !(0.0..=1.0).contains(&adaptive.min_rate)
            || !(0.0..=1.0).contains(&adaptive.max_rate)
            || adaptive.min_rate > adaptive.max_rate
        {
            return Err(Error::Config(format!(
                "adaptive rate bounds [{}, {}] are invalid",
                adaptive.min_rate, adaptive.max_rate
            )));
        }
        if adaptive.adjustment_interval_secs == 0 {
            return Err(Error::Config("adaptive adjustment interval must be positive".into()));
        }
        if self.cardinality.max_label_values == 0 {
            return Err(Error::Config("max_label_values must be at least 1".into()));
        }
        if self.percentile_window == 0 {
            return Err(Error::Config("percentile_window must be at least 1".into()));
        }
        if self.domain.is_empty() || self.domain.contains(char::is_whitespace) {
            return Err(Error::Config(format!("invalid span domain '{}'", self.domain)));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("{name}='{raw}': {e}")))
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn environment_defaults() {
        let dev = ObservabilityConfig::for_environment(Environment::Development);
        assert_eq!(dev.sampling.rate, 1.0);
        assert_eq!(dev.sampling.strategy, SamplingStrategy::Probabilistic);
        assert_eq!((dev.retention.trace_ttl_hours, dev.retention.metric_ttl_hours), (1, 24));

        let staging = ObservabilityConfig::for_environment(Environment::Staging);
        assert_eq!(staging.sampling.rate, 0.2);
        assert_eq!(staging.sampling.strategy, SamplingStrategy::Adaptive);
        assert_eq!((staging.retention.trace_ttl_hours, staging.retention.metric_ttl_hours), (72, 168));

        let prod = ObservabilityConfig::for_environment(Environment::Production);
        assert_eq!(prod.sampling.rate, 0.05);
        assert!(prod.retention.compress_traces && prod.retention.compress_metrics);
        assert_eq!((prod.retention.trace_ttl_hours, prod.retention.metric_ttl_hours), (168, 720));

        for config in [dev, staging, prod] {
            config.validate().unwrap();
        }
    }

    #[test]
    fn toml_overlays_nested_tables() {
        let config = ObservabilityConfig::from_toml_str(
            r#"
            environment = "staging"
            domain = "game"

            [sampling.adaptive]
            max_rate = 0.8

            [cardinality]
            overflow = "other"
            "#,
        )
        .unwrap();
        assert_eq!(config.domain, "game");
        assert_eq!(config.sampling.adaptive.max_rate, 0.8);
        assert_eq!(config.sampling.adaptive.min_rate, 0.05);
        assert_eq!(config.cardinality.overflow, OverflowStrategy::Other);
        assert_eq!(config.cardinality.max_label_values, 100);
    }

    #[test]
    fn toml_defaults_to_development() {
        let config = ObservabilityConfig::from_toml_str("").unwrap();
        assert_eq!(config, ObservabilityConfig::default());
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        assert!(ObservabilityConfig::from_toml_str("environment = ").unwrap_err().is_config());
        assert!(ObservabilityConfig::from_toml_str("environment = \"moon\"").unwrap_err().is_config());
        assert!(ObservabilityConfig::from_toml_str("[sampling]\nrate = 3.0").unwrap_err().is_config());
    }

    #[test]
    fn env_overrides_apply() {
        let vars = HashMap::from([
            ("WORKFLOW_ENV", "prod"),
            ("WORKFLOW_SAMPLING_RATE", "0.15"),
            ("WORKFLOW_SLOW_THRESHOLD_MS", "250"),
            ("WORKFLOW_MAX_LABEL_VALUES", "7"),
        ]);
        let config =
            ObservabilityConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.sampling.rate, 0.15);
        assert_eq!(config.sampling.slow_threshold(), Duration::from_millis(250));
        assert_eq!(config.cardinality.max_label_values, 7);
    }

    #[test]
    fn malformed_env_value_is_rejected() {
        let err = ObservabilityConfig::from_lookup(|k| {
            (k == "WORKFLOW_SAMPLING_RATE").then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("WORKFLOW_SAMPLING_RATE"));
    }

    #[test]
    fn validation_catches_bad_bounds() {
        let mut config = ObservabilityConfig::default();
        config.sampling.adaptive.min_rate = 0.9;
        config.sampling.adaptive.max_rate = 0.1;
        assert!(config.validate().is_err());

        let mut config = ObservabilityConfig::default();
        config.domain = "my domain".into();
        assert!(config.validate().is_err());

        let mut config = ObservabilityConfig::default();
        config.cardinality.max_label_values = 0;
        assert!(config.validate().is_err());
    }
}
