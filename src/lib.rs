//! # THz-TDS Scan Control Library
//!
//! Core library of the `thz_daq` application: it moves motorized optical
//! delay lines through a position sweep, samples a lock-in amplifier at each
//! position and hands the assembled trace to a result sink. The CLI in
//! `main.rs` is one frontend; anything that can provide the hardware ports can
//! drive the engine.
//!
//! ## Crate Structure
//!
//! - **`scan`**: the scan engine. `Axis` and `ScanConfiguration` describe a
//!   scan, `ScanEngine` runs it on a background task, publishes `ScanEvent`s and
//!   honours a `CancellationToken`.
//! - **`hardware`**: `InstrumentPort` / `SamplingPort` capability traits and mock
//!   devices.
//! - **`storage`**: the `ResultSink` trait with in-memory and CSV sinks.
//! - **`config`**: figment-based `AppConfig` (TOML + `THZ_DAQ_*` environment).
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`error`**: the `ScanError` taxonomy.
//! - **`units`**: millimetre ↔ picosecond conversion.

pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod scan;
pub mod storage;
pub mod units;

pub use error::{AppResult, ScanError};
pub use scan::{ScanConfiguration, ScanEngine, ScanEvent};
