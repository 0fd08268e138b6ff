//! Sweep executor: one pass of the moving stage over the swept axis.
//!
//! For every planned position the executor moves the stage, waits the dwell
//! time, reads one sample and stores it. A failed move or read is handled by
//! the stage's [`FaultPolicy`]: either the whole sweep unwinds with a
//! `HardwareFault`, or the sample is left as NaN and the sweep goes on.
//!
//! Progress is published at indices `0, stride, 2*stride, ...`, plus one final
//! snapshot for the last index reached when that index was not already
//! published. The cancellation token is checked after every index.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::axis::{Axis, AxisId, FaultPolicy};
use super::cancel::CancellationToken;
use super::events::{EventPublisher, ProgressSnapshot, ScanEvent};
use super::series::{SampleSeries, ScanResult};
use crate::error::{AppResult, ScanError};
use crate::hardware::{InstrumentPort, SamplingPort};

/// Everything a sweep needs, borrowed from the running worker.
pub(crate) struct Sweep<'a> {
    pub axis_id: AxisId,
    pub axis: &'a Axis,
    pub stage: &'a dyn InstrumentPort,
    pub policy: FaultPolicy,
    pub sampler: &'a dyn SamplingPort,
    pub dwell: Duration,
    pub stride: usize,
    pub repetition: usize,
    pub cancel: &'a CancellationToken,
    pub events: &'a EventPublisher,
}

/// Result of a sweep that was not aborted by a fault.
#[derive(Debug)]
pub(crate) struct SweepOutcome {
    pub result: ScanResult,
    /// Stopped early by the cancellation token
    pub cancelled: bool,
    /// Samples lost to tolerated faults
    pub faults: usize,
}

impl Sweep<'_> {
    pub(crate) async fn execute(self) -> AppResult<SweepOutcome> {
        let total = self.axis.count();
        let stride = self.stride.max(1);
        let mut series = SampleSeries::new(self.axis.positions());
        let mut last_index = None;
        let mut last_published = None;
        let mut cancelled = false;
        let mut faults = 0;

        debug!(
            repetition = self.repetition,
            axis = %self.axis_id,
            device = self.stage.name(),
            points = total,
            "Sweep started"
        );

        for (index, &position) in self.axis.positions().iter().enumerate() {
            match self.sample_at(position).await {
                Ok(value) => {
                    debug!(index, position, value, "Sample acquired");
                    series.record(index, value);
                }
                Err(err) => match self.policy {
                    FaultPolicy::Propagate => {
                        error!(
                            repetition = self.repetition,
                            index,
                            position,
                            error = %err,
                            "Fault on {} delay-line, aborting sweep",
                            self.axis_id
                        );
                        return Err(err);
                    }
                    FaultPolicy::RecordAndContinue => {
                        warn!(
                            repetition = self.repetition,
                            index,
                            position,
                            error = %err,
                            "{} error at {position}, sample left empty",
                            self.stage.name()
                        );
                        faults += 1;
                    }
                },
            }
            last_index = Some(index);

            if index % stride == 0 {
                self.publish(&series, index, total);
                last_published = Some(index);
            }

            if self.cancel.is_cancelled() {
                info!(
                    repetition = self.repetition,
                    index, "Cancellation observed, stopping sweep"
                );
                cancelled = true;
                break;
            }
        }

        if let Some(index) = last_index {
            if last_published != Some(index) {
                self.publish(&series, index, total);
            }
        }

        let completed = last_index == Some(total.saturating_sub(1));
        Ok(SweepOutcome {
            result: series.into_result(self.repetition, self.axis_id, completed),
            cancelled,
            faults,
        })
    }

    /// Move, dwell, read. A failed move skips the dwell and the read.
    async fn sample_at(&self, position: f64) -> AppResult<f64> {
        self.stage
            .move_to(position)
            .await
            .map_err(|e| ScanError::hardware(self.stage.name(), format!("move_to({position})"), e))?;

        if !self.dwell.is_zero() {
            sleep(self.dwell).await;
        }

        self.sampler
            .read_scalar()
            .await
            .map_err(|e| ScanError::hardware(self.sampler.name(), "read_scalar", e))
    }

    fn publish(&self, series: &SampleSeries, index: usize, total: usize) {
        let (positions, readings) = series.snapshot(index);
        self.events.publish(ScanEvent::Progress(ProgressSnapshot {
            repetition: self.repetition,
            axis: self.axis_id,
            index,
            total,
            positions,
            readings,
        }));
    }
}
