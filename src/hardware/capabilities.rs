//! Hardware Capabilities for Delay-Line Scans
//!
//! The scan engine talks to hardware through two small capability traits:
//!
//! - `InstrumentPort` - a motorized delay line (home, arm velocity, move)
//! - `SamplingPort` - a scalar detector, typically the lock-in X output
//!
//! Driver-level command translation (VISA queries, Kinesis calls, serial
//! framing) lives behind these traits and is not the engine's concern.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//! - Does not retry; retries, if any, belong to the implementation
//!
//! # Example
//!
//! ```rust,ignore
//! async fn park<S: InstrumentPort + ?Sized>(stage: &S, position: f64) -> Result<()> {
//!     stage.return_to(position, HOMING_VELOCITY).await?;
//!     stage.set_velocity(1.0).await
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;

/// Velocity used when returning a line to its start position (mm/s).
///
/// Homing always runs at this speed, independent of the configured sweep
/// velocity.
pub const HOMING_VELOCITY: f64 = 100.0;

/// Capability: Delay-Line Motion
///
/// # Contract
/// - Positions are in millimetres, velocities in mm/s
/// - `move_to` returns once the stage reports the move done (or failed)
/// - `return_to` moves at the given velocity; it does not restore the previous
///   sweep velocity, callers arm it again with `set_velocity`
#[async_trait]
pub trait InstrumentPort: Send + Sync {
    /// Human-readable device name used in logs and errors.
    fn name(&self) -> &str;

    /// Move to `position` at `velocity`.
    ///
    /// # Returns
    /// - Ok(()) when the position is reached
    /// - Err on communication failure or out-of-range target
    async fn return_to(&self, position: f64, velocity: f64) -> Result<()>;

    /// Set the velocity used by subsequent `move_to` calls.
    async fn set_velocity(&self, velocity: f64) -> Result<()>;

    /// Move to an absolute position at the armed velocity.
    async fn move_to(&self, position: f64) -> Result<()>;
}

/// Capability: Scalar Readout
///
/// # Contract
/// - `read_scalar()` returns the current detector value
/// - Units are device-specific (lock-in X in V or A)
#[async_trait]
pub trait SamplingPort: Send + Sync {
    /// Human-readable device name used in logs and errors.
    fn name(&self) -> &str;

    /// Read one sample.
    ///
    /// # Returns
    /// - Ok(value) on successful read
    /// - Err on hardware error or timeout
    async fn read_scalar(&self) -> Result<f64>;
}
