//! ScanEngine - state machine for delay-line scans
//!
//! The engine turns a [`ScanConfiguration`] into a timed sequence of stage
//! moves and lock-in reads, on a background tokio task, and reports what
//! happens as [`ScanEvent`]s.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐   run()   ┌─────────┐   all repetitions   ┌───────────┐
//! │ Idle │──────────▶│ Running │────────────────────▶│ Completed │──┐
//! └──────┘           └────┬────┘                     └───────────┘  │
//!    ▲                    │ cancel / fault / bad config              │
//!    │                    ▼                                          │
//!    │               ┌─────────┐                                     │
//!    │◀──────────────│ Aborted │                                     │
//!    │               └─────────┘                                     │
//!    └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Repetition
//!
//! 1. check the cancellation token
//! 2. validate the configuration (timing and swept axis)
//! 3. home both stages at [`HOMING_VELOCITY`]
//! 4. arm the sweep velocities
//! 5. settle for `10 × time constant`
//! 6. sweep the swept axis
//! 7. hand the result to the [`ResultSink`]
//! 8. check the cancellation token
//!
//! The configuration is also validated once before the first repetition, so
//! a run that would do nothing still ends `Aborted`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = ScanEngine::new(thz, pump, lockin, sink);
//! let mut events = engine.subscribe();
//!
//! let handle = engine.run(config).await?;
//! while let Ok(event) = events.recv().await {
//!     if let ScanEvent::Finished { outcome, .. } = event {
//!         println!("scan {outcome}");
//!         break;
//!     }
//! }
//! let report = handle.join().await?;
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::axis::{AxisId, FaultPolicy};
use super::cancel::CancellationToken;
use super::configuration::ScanConfiguration;
use super::events::{EventPublisher, RunOutcome, ScanEvent};
use super::series::ScanResult;
use super::sweep::Sweep;
use crate::error::{AppResult, ScanError};
use crate::hardware::{InstrumentPort, SamplingPort, HOMING_VELOCITY};
use crate::storage::ResultSink;

/// `Finished` reason when the worker task dies without closing the run.
const WORKER_FAILED: &str = "scan worker failed";

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Ready to accept a run
    Idle,
    /// A run is in progress
    Running,
    /// The last run finished all repetitions (transient, returns to Idle)
    Completed,
    /// The last run was cancelled or failed (transient, returns to Idle)
    Aborted,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Completed => write!(f, "completed"),
            EngineState::Aborted => write!(f, "aborted"),
        }
    }
}

impl From<RunOutcome> for EngineState {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed => EngineState::Completed,
            RunOutcome::Aborted => EngineState::Aborted,
        }
    }
}

/// Summary of a run that was not ended by an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Run identifier
    pub run_uid: String,
    /// Terminal state
    pub outcome: RunOutcome,
    /// Repetitions whose sweep ran (a cancelled sweep counts)
    pub repetitions: usize,
    /// Names successfully handed to the sink
    pub persisted: Vec<String>,
    /// Samples lost to tolerated faults, over all repetitions
    pub faults: usize,
    /// Why the run stopped early
    pub reason: Option<String>,
}

/// Handle to a spawned run.
#[derive(Debug)]
pub struct ScanHandle {
    run_uid: String,
    task: JoinHandle<AppResult<RunReport>>,
}

impl ScanHandle {
    /// Run identifier
    pub fn run_uid(&self) -> &str {
        &self.run_uid
    }

    /// True once the worker task has returned.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to end.
    ///
    /// `Ok` for completed and cancelled runs; the error that aborted the run
    /// otherwise. A worker that panicked yields `ScanError::Worker`, after
    /// its `Finished { Aborted }` event has been published.
    pub async fn join(self) -> AppResult<RunReport> {
        self.task
            .await
            .map_err(|e| ScanError::Worker(e.to_string()))?
    }
}

/// A stage together with its fault policy.
#[derive(Clone)]
struct Stage {
    port: Arc<dyn InstrumentPort>,
    policy: FaultPolicy,
}

/// The ScanEngine orchestrates delay-line scans
pub struct ScanEngine {
    primary: Stage,
    secondary: Stage,
    sampler: Arc<dyn SamplingPort>,
    sink: Arc<dyn ResultSink>,
    state: Arc<RwLock<EngineState>>,
    last_outcome: Arc<RwLock<Option<RunOutcome>>>,
    cancel: CancellationToken,
    events: EventPublisher,
}

impl ScanEngine {
    /// Engine over a primary (THz) line, a secondary (pump) line, a sampler
    /// and a result sink, with the default fault policy per line.
    pub fn new(
        primary: Arc<dyn InstrumentPort>,
        secondary: Arc<dyn InstrumentPort>,
        sampler: Arc<dyn SamplingPort>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            primary: Stage {
                port: primary,
                policy: FaultPolicy::default_for(AxisId::Primary),
            },
            secondary: Stage {
                port: secondary,
                policy: FaultPolicy::default_for(AxisId::Secondary),
            },
            sampler,
            sink,
            state: Arc::new(RwLock::new(EngineState::Idle)),
            last_outcome: Arc::new(RwLock::new(None)),
            cancel: CancellationToken::new(),
            events: EventPublisher::default(),
        }
    }

    /// Override the fault policy of one line.
    pub fn with_fault_policy(mut self, axis: AxisId, policy: FaultPolicy) -> Self {
        match axis {
            AxisId::Primary => self.primary.policy = policy,
            AxisId::Secondary => self.secondary.policy = policy,
        }
        self
    }

    /// Fault policy of one line.
    pub fn fault_policy(&self, axis: AxisId) -> FaultPolicy {
        match axis {
            AxisId::Primary => self.primary.policy,
            AxisId::Secondary => self.secondary.policy,
        }
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    /// Current engine state
    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// Outcome of the most recent finished run.
    pub async fn last_outcome(&self) -> Option<RunOutcome> {
        *self.last_outcome.read().await
    }

    /// Request cancellation of the current run.
    ///
    /// Observed at the next checkpoint. The flag stays set until the next
    /// `run()`.
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.cancel.cancel();
    }

    /// Token that cancels this engine's runs; may be handed to other threads.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start a run on a background task.
    ///
    /// # Errors
    /// `ScanError::AlreadyRunning` unless the engine is idle. The running
    /// scan is not affected.
    #[instrument(skip(self, config), err)]
    pub async fn run(&self, config: ScanConfiguration) -> AppResult<ScanHandle> {
        {
            let mut state = self.state.write().await;
            if *state != EngineState::Idle {
                warn!(state = %*state, "Run rejected");
                return Err(ScanError::AlreadyRunning);
            }
            *state = EngineState::Running;
        }

        self.cancel.reset();
        let run_uid = Uuid::new_v4().to_string();
        info!(
            run_uid = %run_uid,
            repetitions = config.repeat_count,
            "Engine started"
        );
        self.events.publish(ScanEvent::Started {
            run_uid: run_uid.clone(),
            repeat_count: config.repeat_count,
        });

        let worker = RunWorker {
            run_uid: run_uid.clone(),
            config,
            primary: self.primary.clone(),
            secondary: self.secondary.clone(),
            sampler: self.sampler.clone(),
            sink: self.sink.clone(),
            state: self.state.clone(),
            last_outcome: self.last_outcome.clone(),
            cancel: self.cancel.clone(),
            events: self.events.clone(),
        };
        let task = tokio::spawn(worker.run());

        Ok(ScanHandle { run_uid, task })
    }

    /// Start a run and wait for it.
    pub async fn run_to_completion(&self, config: ScanConfiguration) -> AppResult<RunReport> {
        self.run(config).await?.join().await
    }
}

/// Closes the run as `Aborted` if the worker unwinds before finishing.
struct IdleGuard {
    run_uid: String,
    state: Arc<RwLock<EngineState>>,
    last_outcome: Arc<RwLock<Option<RunOutcome>>>,
    events: EventPublisher,
    armed: bool,
}

impl Drop for IdleGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        error!(run_uid = %self.run_uid, "Scan worker stopped unexpectedly, engine reset to idle");
        if let Ok(mut outcome) = self.last_outcome.try_write() {
            *outcome = Some(RunOutcome::Aborted);
        }
        // Publish under the state lock, as `RunWorker::finish` does
        let mut state = self.state.try_write().ok();
        if let Some(state) = state.as_deref_mut() {
            *state = EngineState::Idle;
        }
        self.events.publish(ScanEvent::Finished {
            run_uid: self.run_uid.clone(),
            outcome: RunOutcome::Aborted,
            reason: Some(WORKER_FAILED.to_string()),
        });
        drop(state);
    }
}

/// Everything the background task owns for one run.
struct RunWorker {
    run_uid: String,
    config: ScanConfiguration,
    primary: Stage,
    secondary: Stage,
    sampler: Arc<dyn SamplingPort>,
    sink: Arc<dyn ResultSink>,
    state: Arc<RwLock<EngineState>>,
    last_outcome: Arc<RwLock<Option<RunOutcome>>>,
    cancel: CancellationToken,
    events: EventPublisher,
}

impl RunWorker {
    async fn run(self) -> AppResult<RunReport> {
        let mut guard = IdleGuard {
            run_uid: self.run_uid.clone(),
            state: self.state.clone(),
            last_outcome: self.last_outcome.clone(),
            events: self.events.clone(),
            armed: true,
        };

        let mut report = RunReport {
            run_uid: self.run_uid.clone(),
            outcome: RunOutcome::Completed,
            repetitions: 0,
            persisted: Vec::new(),
            faults: 0,
            reason: None,
        };

        let result = self.run_repetitions(&mut report).await;
        if let Err(err) = &result {
            error!(run_uid = %self.run_uid, error = %err, "Run aborted");
            self.events.publish(ScanEvent::Error {
                kind: err.kind().to_string(),
                message: err.to_string(),
            });
            report.outcome = RunOutcome::Aborted;
            report.reason = Some(err.to_string());
        }

        self.finish(&report).await;
        guard.armed = false;
        result.map(|()| report)
    }

    /// Terminal state, then `Idle`, then `Finished`, all before a new run can
    /// take the state lock.
    async fn finish(&self, report: &RunReport) {
        let terminal = EngineState::from(report.outcome);
        *self.state.write().await = terminal;
        *self.last_outcome.write().await = Some(report.outcome);
        info!(
            run_uid = %self.run_uid,
            state = %terminal,
            repetitions = report.repetitions,
            faults = report.faults,
            "Engine finished"
        );

        let mut state = self.state.write().await;
        *state = EngineState::Idle;
        self.events.publish(ScanEvent::Finished {
            run_uid: self.run_uid.clone(),
            outcome: report.outcome,
            reason: report.reason.clone(),
        });
    }

    async fn run_repetitions(&self, report: &mut RunReport) -> AppResult<()> {
        self.config.validate()?;
        for repetition in 0..self.config.repeat_count {
            if self.cancelled(report, "before repetition", repetition) {
                return Ok(());
            }

            let swept = self.config.validate()?;
            let axis = self.config.axis(swept);
            info!(
                run_uid = %self.run_uid,
                repetition,
                axis = %swept,
                points = axis.count(),
                "Starting repetition"
            );

            self.prepare_stages().await?;
            sleep(self.config.settle()).await;

            let stage = self.stage(swept);
            let outcome = Sweep {
                axis_id: swept,
                axis,
                stage: stage.port.as_ref(),
                policy: stage.policy,
                sampler: self.sampler.as_ref(),
                dwell: self.config.dwell(),
                stride: self.config.update_stride,
                repetition,
                cancel: &self.cancel,
                events: &self.events,
            }
            .execute()
            .await?;

            report.repetitions += 1;
            report.faults += outcome.faults;
            self.persist(repetition, &outcome.result, report).await;

            if outcome.cancelled || self.cancelled(report, "after repetition", repetition) {
                report.outcome = RunOutcome::Aborted;
                report.reason = Some("cancelled".to_string());
                return Ok(());
            }
        }
        Ok(())
    }

    fn cancelled(&self, report: &mut RunReport, checkpoint: &str, repetition: usize) -> bool {
        if !self.cancel.is_cancelled() {
            return false;
        }
        info!(run_uid = %self.run_uid, repetition, checkpoint, "Cancellation observed");
        report.outcome = RunOutcome::Aborted;
        report.reason = Some("cancelled".to_string());
        true
    }

    /// Home both lines, then arm both sweep velocities.
    async fn prepare_stages(&self) -> AppResult<()> {
        for id in [AxisId::Primary, AxisId::Secondary] {
            let stage = self.stage(id);
            let start = self.config.axis(id).start();
            if let Err(e) = stage.port.return_to(start, HOMING_VELOCITY).await {
                let err = ScanError::hardware(
                    stage.port.name(),
                    format!("return_to({start}, {HOMING_VELOCITY})"),
                    e,
                );
                Self::tolerate(id, stage.policy, err)?;
            }
        }

        for id in [AxisId::Primary, AxisId::Secondary] {
            let stage = self.stage(id);
            let velocity = self.config.axis(id).velocity();
            if let Err(e) = stage.port.set_velocity(velocity).await {
                let err = ScanError::hardware(
                    stage.port.name(),
                    format!("set_velocity({velocity})"),
                    e,
                );
                Self::tolerate(id, stage.policy, err)?;
            }
        }
        Ok(())
    }

    fn tolerate(axis: AxisId, policy: FaultPolicy, err: ScanError) -> AppResult<()> {
        match policy {
            FaultPolicy::Propagate => Err(err),
            FaultPolicy::RecordAndContinue => {
                warn!(axis = %axis, error = %err, "Stage preparation failed, continuing");
                Ok(())
            }
        }
    }

    async fn persist(&self, repetition: usize, result: &ScanResult, report: &mut RunReport) {
        let name = self.sink.name_for(repetition);
        match self.sink.persist(&name, result).await {
            Ok(()) => report.persisted.push(name),
            Err(e) => {
                let err = ScanError::from(e);
                warn!(run_uid = %self.run_uid, repetition, name = %name, error = %err, "Could not save result");
                self.events.publish(ScanEvent::Error {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                });
            }
        }
    }

    fn stage(&self, id: AxisId) -> &Stage {
        match id {
            AxisId::Primary => &self.primary,
            AxisId::Secondary => &self.secondary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::{MockDelayLine, MockLockIn, StageCommand};
    use crate::scan::Axis;
    use crate::storage::MemorySink;

    struct Rig {
        thz: Arc<MockDelayLine>,
        pump: Arc<MockDelayLine>,
        sink: Arc<MemorySink>,
        engine: ScanEngine,
    }

    fn rig(lockin: MockLockIn, pump: MockDelayLine) -> Rig {
        let thz = Arc::new(MockDelayLine::new("thz delay-line"));
        let pump = Arc::new(pump);
        let sink = Arc::new(MemorySink::new());
        let engine = ScanEngine::new(thz.clone(), pump.clone(), Arc::new(lockin), sink.clone());
        Rig {
            thz,
            pump,
            sink,
            engine,
        }
    }

    fn thz_sweep() -> ScanConfiguration {
        ScanConfiguration::new(
            Axis::new(0.0, 10.0, 2.0, 50.0).unwrap(),
            Axis::fixed(20.0, 5.0).unwrap(),
        )
    }

    #[test]
    fn test_state_display() {
        assert_eq!(EngineState::Idle.to_string(), "idle");
        assert_eq!(EngineState::from(RunOutcome::Aborted), EngineState::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_and_returns_to_idle() {
        let rig = rig(MockLockIn::constant(1.0), MockDelayLine::new("pump delay-line"));
        let report = rig.engine.run_to_completion(thz_sweep()).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.repetitions, 1);
        assert_eq!(report.persisted, vec!["memory_000".to_string()]);
        assert_eq!(rig.engine.state().await, EngineState::Idle);
        assert_eq!(rig.engine.last_outcome().await, Some(RunOutcome::Completed));
        assert_eq!(rig.sink.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stages_homed_fast_then_armed() {
        let rig = rig(MockLockIn::constant(1.0), MockDelayLine::new("pump delay-line"));
        rig.engine.run_to_completion(thz_sweep()).await.unwrap();

        let thz = rig.thz.commands().await;
        assert_eq!(
            &thz[..2],
            &[
                StageCommand::ReturnTo {
                    position: 0.0,
                    velocity: HOMING_VELOCITY
                },
                StageCommand::SetVelocity(50.0),
            ]
        );
        assert_eq!(thz.len(), 2 + 6);

        // The fixed line never moves during the sweep
        assert_eq!(
            rig.pump.commands().await,
            vec![
                StageCommand::ReturnTo {
                    position: 20.0,
                    velocity: HOMING_VELOCITY
                },
                StageCommand::SetVelocity(5.0),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tolerated_homing_fault_on_pump() {
        let pump = MockDelayLine::new("pump delay-line").failing_at(20.0);
        let rig = rig(MockLockIn::constant(1.0), pump);
        let report = rig.engine.run_to_completion(thz_sweep()).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagated_homing_fault_on_pump() {
        let pump = MockDelayLine::new("pump delay-line").failing_at(20.0);
        let rig = rig(MockLockIn::constant(1.0), pump);
        let engine = rig
            .engine
            .with_fault_policy(AxisId::Secondary, FaultPolicy::Propagate);
        assert_eq!(engine.fault_policy(AxisId::Secondary), FaultPolicy::Propagate);

        let err = engine.run_to_completion(thz_sweep()).await.unwrap_err();
        assert!(matches!(err, ScanError::HardwareFault { .. }));
        assert_eq!(engine.last_outcome().await, Some(RunOutcome::Aborted));
        assert_eq!(rig.sink.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_run_is_cleared_by_run() {
        let rig = rig(MockLockIn::constant(1.0), MockDelayLine::new("pump delay-line"));
        rig.engine.cancel();
        assert!(rig.engine.cancellation_token().is_cancelled());

        let report = rig.engine.run_to_completion(thz_sweep()).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
    }

    struct PanickingLockIn;

    #[async_trait::async_trait]
    impl SamplingPort for PanickingLockIn {
        fn name(&self) -> &str {
            "panicking lock-in"
        }

        async fn read_scalar(&self) -> anyhow::Result<f64> {
            panic!("lock-in driver bug");
        }
    }

    fn finished(events: &[ScanEvent]) -> Vec<(RunOutcome, Option<String>)> {
        events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::Finished {
                    outcome, reason, ..
                } => Some((*outcome, reason.clone())),
                _ => None,
            })
            .collect()
    }

    fn drain(rx: &mut broadcast::Receiver<ScanEvent>) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_panic_still_finishes_run() {
        let thz = Arc::new(MockDelayLine::new("thz delay-line"));
        let pump = Arc::new(MockDelayLine::new("pump delay-line"));
        let sink = Arc::new(MemorySink::new());
        let engine = ScanEngine::new(thz, pump, Arc::new(PanickingLockIn), sink.clone());
        let mut rx = engine.subscribe();

        let err = engine.run_to_completion(thz_sweep()).await.unwrap_err();
        assert!(matches!(err, ScanError::Worker(_)));

        let events = drain(&mut rx);
        assert!(matches!(events.first(), Some(ScanEvent::Started { .. })));
        assert!(matches!(events.last(), Some(ScanEvent::Finished { .. })));
        assert_eq!(
            finished(&events),
            vec![(RunOutcome::Aborted, Some(WORKER_FAILED.to_string()))]
        );
        assert_eq!(engine.state().await, EngineState::Idle);
        assert_eq!(engine.last_outcome().await, Some(RunOutcome::Aborted));
        assert!(sink.is_empty().await);

        // Still usable afterwards
        assert!(engine.run(thz_sweep()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_time_constant_aborts_cleanly() {
        let rig = rig(MockLockIn::constant(1.0), MockDelayLine::new("pump delay-line"));
        let mut rx = rig.engine.subscribe();

        let err = rig
            .engine
            .run_to_completion(thz_sweep().with_time_constant(1e20))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidTiming(_)));

        let events = drain(&mut rx);
        assert_eq!(finished(&events).len(), 1);
        assert_eq!(finished(&events)[0].0, RunOutcome::Aborted);
        assert!(rig.thz.commands().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_repetitions_rejected() {
        let rig = rig(MockLockIn::constant(1.0), MockDelayLine::new("pump delay-line"));
        let mut rx = rig.engine.subscribe();

        let err = rig
            .engine
            .run_to_completion(thz_sweep().with_repeat_count(0))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidTiming(_)));
        assert_eq!(rig.engine.last_outcome().await, Some(RunOutcome::Aborted));

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ScanEvent::Error { kind, .. } if kind == "InvalidTiming")));
        assert_eq!(finished(&events).len(), 1);
        assert!(rig.sink.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_can_run_again() {
        let rig = rig(MockLockIn::constant(1.0), MockDelayLine::new("pump delay-line"));
        let first = rig.engine.run_to_completion(thz_sweep()).await.unwrap();
        let second = rig.engine.run_to_completion(thz_sweep()).await.unwrap();
        assert_ne!(first.run_uid, second.run_uid);
        assert_eq!(rig.sink.len().await, 2);
    }
}
