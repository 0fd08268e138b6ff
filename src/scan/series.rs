//! Sample storage for one sweep.

use std::sync::Arc;

use serde::Serialize;

use super::axis::AxisId;

/// Positions and readings of the sweep in progress.
///
/// Readings start as NaN ("no value") and are filled index by index. Only the
/// sweep executor writes to a series.
#[derive(Debug, Clone)]
pub struct SampleSeries {
    positions: Arc<[f64]>,
    readings: Vec<f64>,
}

impl SampleSeries {
    /// Empty series over the given positions.
    pub fn new(positions: &[f64]) -> Self {
        Self {
            positions: Arc::from(positions),
            readings: vec![f64::NAN; positions.len()],
        }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// True when the series has no points.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Planned positions.
    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    /// Readings so far.
    pub fn readings(&self) -> &[f64] {
        &self.readings
    }

    pub(crate) fn record(&mut self, index: usize, value: f64) {
        if let Some(slot) = self.readings.get_mut(index) {
            *slot = value;
        }
    }

    /// Immutable copy of `positions[0..=index]` and `readings[0..=index]`.
    ///
    /// O(index); see [`EVENT_CHANNEL_CAPACITY`](super::events::EVENT_CHANNEL_CAPACITY).
    pub(crate) fn snapshot(&self, index: usize) -> (Arc<[f64]>, Arc<[f64]>) {
        let end = (index + 1).min(self.len());
        (
            Arc::from(&self.positions[..end]),
            Arc::from(&self.readings[..end]),
        )
    }

    /// Freeze the series into a result.
    pub fn into_result(self, repetition: usize, axis: AxisId, completed: bool) -> ScanResult {
        ScanResult {
            repetition,
            axis,
            positions: self.positions.to_vec(),
            readings: self.readings,
            completed,
        }
    }
}

/// A finished (or cancelled) sweep, handed read-only to the result sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    /// Zero-based repetition index
    pub repetition: usize,
    /// Swept axis
    pub axis: AxisId,
    /// Planned positions
    pub positions: Vec<f64>,
    /// Readings, NaN where no value was taken
    pub readings: Vec<f64>,
    /// False when the sweep stopped before its last index
    pub completed: bool,
}

impl ScanResult {
    /// Number of points.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// True when there are no points.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Number of NaN readings.
    pub fn missing_count(&self) -> usize {
        self.readings.iter().filter(|r| r.is_nan()).count()
    }

    /// `(position, reading)` pairs.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.positions
            .iter()
            .copied()
            .zip(self.readings.iter().copied())
    }
}
