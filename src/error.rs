//! Custom error types for the scan engine.
//!
//! `ScanError` is the single error type returned by the engine and its data
//! model. It is built with `thiserror` so that underlying errors (figment,
//! storage) convert with `?`.
//!
//! ## Error Hierarchy
//!
//! - **`InvalidAxis`** / **`InvalidTiming`**: bad sweep bounds or timing values.
//!   Detected while building a configuration, before any motion.
//! - **`AmbiguousSweepAxis`**: both axes vary, or neither does. Aborts the whole
//!   run at the repetition boundary.
//! - **`HardwareFault`**: a move or read failed. Fatal for a stage whose policy is
//!   `Propagate`, absorbed for a stage whose policy is `RecordAndContinue`.
//! - **`AlreadyRunning`**: re-entrancy guard on `ScanEngine::run`.
//! - **`Persist`**: the result sink could not store a repetition. Reported, never
//!   fatal to the run.
//! - **`Config`**: configuration file or environment could not be parsed.

use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type AppResult<T> = std::result::Result<T, ScanError>;

/// Errors produced by the scan engine and its data model.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Sweep bounds, step or velocity are unusable.
    #[error("Invalid axis: {0}")]
    InvalidAxis(String),

    /// Time constant, dwell multiplier, stride or repeat count are unusable.
    #[error("Invalid scan timing: {0}")]
    InvalidTiming(String),

    /// Exactly one axis must be swept per run.
    #[error("Ambiguous sweep axis: primary has {primary} points, secondary has {secondary} points")]
    AmbiguousSweepAxis {
        /// Point count of the primary axis
        primary: usize,
        /// Point count of the secondary axis
        secondary: usize,
    },

    /// A port operation failed.
    #[error("Hardware fault on {device} during {operation}: {source}")]
    HardwareFault {
        /// Device name reported by the port
        device: String,
        /// Operation that failed, including its target
        operation: String,
        /// Underlying driver error
        #[source]
        source: anyhow::Error,
    },

    /// `run` was called while a scan is active.
    #[error("A scan is already running on this engine")]
    AlreadyRunning,

    /// Storing a result failed.
    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Semantic error in an otherwise parseable configuration.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The background scan task ended abnormally.
    #[error("Scan worker failed: {0}")]
    Worker(String),
}

impl From<figment::Error> for ScanError {
    fn from(err: figment::Error) -> Self {
        ScanError::Config(Box::new(err))
    }
}

impl ScanError {
    /// Short, stable identifier of the error kind (used in `Error` events).
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::InvalidAxis(_) => "InvalidAxis",
            ScanError::InvalidTiming(_) => "InvalidTiming",
            ScanError::AmbiguousSweepAxis { .. } => "AmbiguousSweepAxis",
            ScanError::HardwareFault { .. } => "HardwareFault",
            ScanError::AlreadyRunning => "AlreadyRunning",
            ScanError::Persist(_) => "PersistError",
            ScanError::Config(_) | ScanError::Configuration(_) => "ConfigError",
            ScanError::Worker(_) => "WorkerError",
        }
    }

    pub(crate) fn hardware(
        device: impl Into<String>,
        operation: impl Into<String>,
        source: anyhow::Error,
    ) -> Self {
        ScanError::HardwareFault {
            device: device.into(),
            operation: operation.into(),
            source,
        }
    }
}

/// Errors raised by a `ResultSink` while storing a scan result.
#[derive(Error, Debug)]
pub enum PersistError {
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding error
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Metadata serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Sink-specific failure
    #[error("Storage error: {0}")]
    Storage(String),
}
