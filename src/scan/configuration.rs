//! Scan configuration: two axes plus timing.

use std::time::Duration;

use serde::Serialize;

use super::axis::{Axis, AxisId};
use crate::error::{AppResult, ScanError};

/// Settling time after homing, in multiples of the time constant.
pub const SETTLE_TIME_CONSTANTS: f64 = 10.0;

/// Declarative description of one scan (all repetitions).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanConfiguration {
    /// THz (reference) line
    pub primary: Axis,
    /// Pump line
    pub secondary: Axis,
    /// Lock-in time constant in seconds
    pub time_constant_s: f64,
    /// Dwell before each read, in multiples of the time constant
    pub dwell_multiplier: f64,
    /// Publish progress every Nth sample
    pub update_stride: usize,
    /// Number of repetitions
    pub repeat_count: usize,
}

impl ScanConfiguration {
    /// Configuration with a 100 ms time constant, dwell of one time constant,
    /// progress on every sample and a single repetition.
    pub fn new(primary: Axis, secondary: Axis) -> Self {
        Self {
            primary,
            secondary,
            time_constant_s: 0.1,
            dwell_multiplier: 1.0,
            update_stride: 1,
            repeat_count: 1,
        }
    }

    /// Set the lock-in time constant (seconds).
    pub fn with_time_constant(mut self, seconds: f64) -> Self {
        self.time_constant_s = seconds;
        self
    }

    /// Set the dwell multiplier.
    pub fn with_dwell_multiplier(mut self, multiplier: f64) -> Self {
        self.dwell_multiplier = multiplier;
        self
    }

    /// Set the progress stride.
    pub fn with_update_stride(mut self, stride: usize) -> Self {
        self.update_stride = stride;
        self
    }

    /// Set the number of repetitions.
    pub fn with_repeat_count(mut self, count: usize) -> Self {
        self.repeat_count = count;
        self
    }

    /// Identify the swept axis.
    ///
    /// Succeeds iff exactly one axis has more than one point. Timing values are
    /// checked here as well so a bad configuration never reaches the hardware.
    ///
    /// # Errors
    /// - `ScanError::InvalidTiming` for a non-positive time constant, negative
    ///   dwell, or zero stride / repeat count
    /// - `ScanError::AmbiguousSweepAxis` when both or neither axis varies
    pub fn validate(&self) -> AppResult<AxisId> {
        self.validate_timing()?;

        match (self.primary.is_swept(), self.secondary.is_swept()) {
            (true, false) => Ok(AxisId::Primary),
            (false, true) => Ok(AxisId::Secondary),
            _ => Err(ScanError::AmbiguousSweepAxis {
                primary: self.primary.count(),
                secondary: self.secondary.count(),
            }),
        }
    }

    fn validate_timing(&self) -> AppResult<()> {
        if !self.time_constant_s.is_finite() || self.time_constant_s <= 0.0 {
            return Err(ScanError::InvalidTiming(format!(
                "time constant must be positive, got {}",
                self.time_constant_s
            )));
        }
        if !self.dwell_multiplier.is_finite() || self.dwell_multiplier < 0.0 {
            return Err(ScanError::InvalidTiming(format!(
                "dwell multiplier must be non-negative, got {}",
                self.dwell_multiplier
            )));
        }
        self.checked_duration("dwell", self.dwell_multiplier * self.time_constant_s)?;
        self.checked_duration("settle time", SETTLE_TIME_CONSTANTS * self.time_constant_s)?;
        if self.update_stride == 0 {
            return Err(ScanError::InvalidTiming(
                "update stride must be at least 1".to_string(),
            ));
        }
        if self.repeat_count == 0 {
            return Err(ScanError::InvalidTiming(
                "repeat count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn checked_duration(&self, what: &str, seconds: f64) -> AppResult<Duration> {
        Duration::try_from_secs_f64(seconds).map_err(|_| {
            ScanError::InvalidTiming(format!("{what} of {seconds} s is out of range"))
        })
    }

    /// Axis by identity.
    pub fn axis(&self, id: AxisId) -> &Axis {
        match id {
            AxisId::Primary => &self.primary,
            AxisId::Secondary => &self.secondary,
        }
    }

    /// Wait before each read. Saturates for timings `validate()` rejects.
    pub fn dwell(&self) -> Duration {
        self.checked_duration("dwell", self.dwell_multiplier * self.time_constant_s)
            .unwrap_or(Duration::MAX)
    }

    /// Wait after homing and velocity arming. Saturates like [`Self::dwell`].
    pub fn settle(&self) -> Duration {
        self.checked_duration("settle time", SETTLE_TIME_CONSTANTS * self.time_constant_s)
            .unwrap_or(Duration::MAX)
    }
}
