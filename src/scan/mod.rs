//! Scan orchestration.
//!
//! - `axis`, `configuration`: declarative scan description
//! - `series`: samples of the sweep in progress and the finished result
//! - `cancel`, `events`: cross-task plumbing
//! - `sweep`, `engine`: the executor and its state machine

pub mod axis;
pub mod cancel;
pub mod configuration;
pub mod engine;
pub mod events;
pub mod series;
mod sweep;

pub use axis::{Axis, AxisId, FaultPolicy};
pub use cancel::CancellationToken;
pub use configuration::ScanConfiguration;
pub use engine::{EngineState, RunReport, ScanEngine, ScanHandle};
pub use events::{EventPublisher, ProgressSnapshot, RunOutcome, ScanEvent};
pub use series::{SampleSeries, ScanResult};
