//! Error types for primitive execution.

use std::time::Duration;

use thiserror::Error;

/// The main error type for workflow primitives.
///
/// Wrapped-primitive failures (`Execution`, `Validation`, `Json`, `Message`)
/// are propagated verbatim through composition primitives. `Timeout` is raised
/// only by [`Timeout`](crate::Timeout), and `Config` only at construction time.
#[derive(Error, Debug)]
pub enum Error {
    /// A primitive exceeded its deadline plus grace period.
    #[error("Primitive '{primitive}' timed out after {limit:?}")]
    Timeout {
        /// Name of the primitive that timed out.
        primitive: String,
        /// Total time allowed (timeout + grace).
        limit: Duration,
    },

    /// Invalid construction parameters or configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error occurred during execution.
    #[error("Execution error: {0}")]
    Execution(String),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The metrics exporter failed to register or encode metrics.
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// A generic error with a message.
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Returns `true` if this is the timeout kind.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Returns `true` if this is a configuration error.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Short machine-friendly label for the error kind, used as a metric label.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self {
            Error::Timeout { .. } => "timeout",
            Error::Config(_) => "config",
            Error::Validation(_) => "validation",
            Error::Execution(_) => "execution",
            Error::Json(_) => "json",
            Error::Metrics(_) => "metrics",
            Error::Message(_) => "message",
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(format!("invalid TOML: {err}"))
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Message(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Message(msg.to_string())
    }
}

/// A specialized `Result` type for workflow operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_error_names_primitive_and_limit() {
        let err = Error::Timeout {
            primitive: "llm".to_string(),
            limit: Duration::from_millis(600),
        };
        assert!(err.is_timeout());
        assert!(!err.is_config());
        assert_eq!(err.kind_label(), "timeout");
        assert_eq!(err.to_string(), "Primitive 'llm' timed out after 600ms");
    }

    #[test]
    fn invalid_toml_becomes_config_error() {
        let err: Error = toml::from_str::<toml::Table>("rate = ").unwrap_err().into();
        assert!(err.is_config());
        assert!(err.to_string().contains("invalid TOML"));
    }

    #[test]
    fn string_conversions_produce_messages() {
        assert_eq!(Error::from("boom").kind_label(), "message");
        assert_eq!(Error::from("boom".to_string()).to_string(), "boom");
    }
}
