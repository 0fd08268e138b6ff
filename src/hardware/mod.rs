//! Hardware abstraction for the scan engine.
//!
//! - `capabilities`: the `InstrumentPort` / `SamplingPort` traits
//! - `mock`: simulated delay lines and lock-in for tests and dry runs

pub mod capabilities;
pub mod mock;

pub use capabilities::{InstrumentPort, SamplingPort, HOMING_VELOCITY};
