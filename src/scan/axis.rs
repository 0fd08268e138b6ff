//! Sweep axes.
//!
//! An [`Axis`] describes one delay line's position range: start, end, step and
//! sweep velocity. The number of points and the position list are derived once,
//! at construction, and never change afterwards.
//!
//! ```rust
//! use thz_daq::scan::Axis;
//!
//! let axis = Axis::new(0.0, 10.0, 2.0, 50.0)?;
//! assert_eq!(axis.count(), 6);
//! assert_eq!(axis.positions(), &[0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
//! # Ok::<(), thz_daq::error::ScanError>(())
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ScanError};

/// Decimal places kept for every planned position.
pub const POSITION_DECIMALS: i32 = 4;

/// Upper bound on points per axis.
pub const MAX_POINTS: usize = 1_000_000;

/// Which delay line an axis belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisId {
    /// THz (reference) delay line
    Primary,
    /// Pump delay line
    Secondary,
}

impl std::fmt::Display for AxisId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AxisId::Primary => write!(f, "primary"),
            AxisId::Secondary => write!(f, "secondary"),
        }
    }
}

/// What the sweep does when a move or read on a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// Abort the sweep and the run.
    Propagate,
    /// Log the failure, leave the sample as NaN, go on with the next index.
    RecordAndContinue,
}

impl FaultPolicy {
    /// Policy used when none is configured explicitly.
    ///
    /// The primary line sets the time base of the whole trace, so a missing
    /// point there is fatal. The pump line is the one prone to serial and
    /// mechanical hiccups and tolerates them.
    pub fn default_for(axis: AxisId) -> Self {
        match axis {
            AxisId::Primary => FaultPolicy::Propagate,
            AxisId::Secondary => FaultPolicy::RecordAndContinue,
        }
    }
}

/// One sweep dimension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Axis {
    start: f64,
    end: f64,
    step: f64,
    velocity: f64,
    #[serde(skip_serializing)]
    positions: Vec<f64>,
}

impl Axis {
    /// Build an axis and derive its positions.
    ///
    /// # Errors
    /// `ScanError::InvalidAxis` if a value is not finite, `step <= 0`,
    /// `velocity <= 0`, or the range would need more than [`MAX_POINTS`].
    pub fn new(start: f64, end: f64, step: f64, velocity: f64) -> AppResult<Self> {
        if !start.is_finite() || !end.is_finite() {
            return Err(ScanError::InvalidAxis(format!(
                "bounds must be finite (start={start}, end={end})"
            )));
        }
        if !step.is_finite() || step <= 0.0 {
            return Err(ScanError::InvalidAxis(format!(
                "step must be a positive number, got {step}"
            )));
        }
        if !velocity.is_finite() || velocity <= 0.0 {
            return Err(ScanError::InvalidAxis(format!(
                "velocity must be a positive number, got {velocity}"
            )));
        }

        let span = (end - start).abs() / step;
        if span >= MAX_POINTS as f64 {
            return Err(ScanError::InvalidAxis(format!(
                "range {start}..{end} with step {step} exceeds {MAX_POINTS} points"
            )));
        }
        let count = span.floor() as usize + 1;

        Ok(Self {
            start,
            end,
            step,
            velocity,
            positions: plan_positions(start, end, count),
        })
    }

    /// Axis held at a single position.
    pub fn fixed(position: f64, velocity: f64) -> AppResult<Self> {
        Self::new(position, position, 1.0, velocity)
    }

    /// First position.
    pub fn start(&self) -> f64 {
        self.start
    }

    /// Last position.
    pub fn end(&self) -> f64 {
        self.end
    }

    /// Step size.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Sweep velocity.
    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    /// Number of sampled positions, `floor(|end - start| / step) + 1`.
    pub fn count(&self) -> usize {
        self.positions.len()
    }

    /// Planned positions, rounded to [`POSITION_DECIMALS`].
    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    /// True when the axis varies (more than one point).
    pub fn is_swept(&self) -> bool {
        self.count() > 1
    }
}

/// Round to the canonical position precision.
pub fn round_position(value: f64) -> f64 {
    let scale = 10f64.powi(POSITION_DECIMALS);
    (value * scale).round() / scale
}

/// Evenly spaced points from `start` to `end` inclusive.
fn plan_positions(start: f64, end: f64, count: usize) -> Vec<f64> {
    if count == 1 {
        return vec![round_position(start)];
    }
    let delta = (end - start) / (count - 1) as f64;
    (0..count)
        .map(|i| {
            if i == count - 1 {
                round_position(end)
            } else {
                round_position(start + delta * i as f64)
            }
        })
        .collect()
}
