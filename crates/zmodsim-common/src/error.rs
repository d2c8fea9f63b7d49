//! Error types for configuration loading and the register store.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, parsing, or validating a simulator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file's JSON could not be parsed.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Serializing a configuration record (e.g. for `--generate-config`) failed.
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),

    /// A register-list expression (e.g. `"0,2-4"`) was malformed.
    #[error("invalid register list {0:?}: {1}")]
    InvalidRegisterList(String, String),

    /// A validated field was outside its legal range.
    #[error("{field} must be in {range}, got {value}")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable legal range.
        range: &'static str,
        /// The value that was rejected.
        value: String,
    },

    /// An auto-increment bank was enabled but `interval_ms` was zero.
    #[error("{bank} auto-increment is enabled but interval_ms must be > 0")]
    ZeroInterval {
        /// Which bank ("holding" or "input").
        bank: &'static str,
    },

    /// An auto-increment bank's `increment` exceeded its `max`.
    ///
    /// Rejected here rather than left for the store: unsigned `max - increment`
    /// arithmetic wraps silently when `increment > max`.
    #[error("{bank} auto-increment: increment ({increment}) must be <= max ({max})")]
    IncrementExceedsMax {
        /// Which bank ("holding" or "input").
        bank: &'static str,
        /// The configured step.
        increment: u16,
        /// The configured wrap threshold.
        max: u16,
    },
}

/// Convenience alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Out-of-range signal from the register store.
///
/// Mapped to Modbus exception `0x02` (Illegal Data Address) at the protocol
/// engine boundary; never surfaced past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("address range out of bank bounds")]
pub struct OutOfRange;
