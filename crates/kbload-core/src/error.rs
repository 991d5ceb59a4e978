use std::path::PathBuf;

use thiserror::Error;

/// Canonical error type for harness operations.
///
/// Only configuration problems and output I/O failures travel through this
/// type; individual task failures are recorded as [`crate::TaskOutcome`]s.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Run configuration is invalid. Raised before any task is scheduled.
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable description of the offending setting.
        message: String,
    },

    /// Dataset or query file could not be turned into a workload.
    #[error("workload error in `{path}`: {message}")]
    Workload {
        /// File that failed to load.
        path: PathBuf,
        /// Human-readable details.
        message: String,
    },

    /// Operation violates the current state machine rules.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable explanation of the invalid state.
        message: String,
    },

    /// I/O error occurred while reading inputs or writing artifacts.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error occurred.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Time-series file could not be written.
    #[error("csv error: {0}")]
    Csv(String),
}

impl HarnessError {
    /// Creates a `Config` variant.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a `Workload` variant.
    #[must_use]
    pub fn workload(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Workload {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an `InvalidState` variant.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Whether this error was raised by configuration validation.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_eof() || err.is_syntax() || err.is_data() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

impl From<config::ConfigError> for HarnessError {
    fn from(err: config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}

impl From<csv::Error> for HarnessError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err.to_string())
    }
}

/// Convenient result alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = HarnessError::config("load.spawn_rate must be > 0");
        assert!(err.is_config());
        assert_eq!(
            err.to_string(),
            "configuration error: load.spawn_rate must be > 0"
        );
    }

    #[test]
    fn test_json_syntax_error_maps_to_deserialization() {
        let err: HarnessError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, HarnessError::Deserialization(_)));
    }
}
