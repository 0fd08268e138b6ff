//! Scan lifecycle and progress events.
//!
//! Events are delivered over a `tokio::sync::broadcast` channel, in the order
//! the engine emits them. `Finished` is always the last event of a run.
//!
//! ```rust,ignore
//! let mut events = engine.subscribe();
//! engine.run(config).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         ScanEvent::Progress(p) => plot.update(&p.positions, &p.readings),
//!         ScanEvent::Finished { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use super::axis::AxisId;

/// Broadcast buffer size per subscriber.
///
/// Every `Progress` event carries a copy of the trace so far, so a sweep of
/// `n` points with stride `s` copies about `n² / 2s` values in total, and a
/// subscriber that stops reading can pin up to this many snapshots. Use a
/// larger `update_stride` for long sweeps; a lagging receiver gets
/// `RecvError::Lagged` and loses the oldest snapshots.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// All repetitions ran to the end
    Completed,
    /// Cancelled, or stopped by a configuration or hardware error
    Aborted,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => write!(f, "completed"),
            RunOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

/// Partial trace published during a sweep.
///
/// The arrays are copies taken at publication time; the sweep keeps writing
/// to its own buffer.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    /// Zero-based repetition
    pub repetition: usize,
    /// Swept axis
    pub axis: AxisId,
    /// Index of the last sample included
    pub index: usize,
    /// Total points in the sweep
    pub total: usize,
    /// `positions[0..=index]`
    pub positions: Arc<[f64]>,
    /// `readings[0..=index]`
    pub readings: Arc<[f64]>,
}

/// Events published by a scan engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    /// A run began.
    Started {
        /// Run identifier
        run_uid: String,
        /// Number of repetitions requested
        repeat_count: usize,
    },
    /// Partial trace.
    Progress(ProgressSnapshot),
    /// Something went wrong; the run may or may not continue.
    Error {
        /// Error kind, e.g. `AmbiguousSweepAxis`
        kind: String,
        /// Human-readable message
        message: String,
    },
    /// The run reached a terminal state. Always the last event of a run.
    Finished {
        /// Run identifier
        run_uid: String,
        /// Terminal state
        outcome: RunOutcome,
        /// Why the run was aborted, if it was
        reason: Option<String>,
    },
}

/// Fan-out of scan events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<ScanEvent>,
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}

impl EventPublisher {
    /// Publisher with the given per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New receiver; sees events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ScanEvent) {
        trace!(?event, "Publishing scan event");
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order_for_every_subscriber() {
        let publisher = EventPublisher::default();
        let mut a = publisher.subscribe();
        let mut b = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 2);

        publisher.publish(ScanEvent::Started {
            run_uid: "r1".into(),
            repeat_count: 1,
        });
        publisher.publish(ScanEvent::Finished {
            run_uid: "r1".into(),
            outcome: RunOutcome::Completed,
            reason: None,
        });

        for rx in [&mut a, &mut b] {
            assert!(matches!(rx.recv().await, Ok(ScanEvent::Started { .. })));
            assert!(matches!(
                rx.recv().await,
                Ok(ScanEvent::Finished {
                    outcome: RunOutcome::Completed,
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let publisher = EventPublisher::new(4);
        publisher.publish(ScanEvent::Error {
            kind: "PersistError".into(),
            message: "disk full".into(),
        });
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ScanEvent::Finished {
            run_uid: "abc".into(),
            outcome: RunOutcome::Aborted,
            reason: Some("cancelled".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "finished");
        assert_eq!(json["outcome"], "aborted");
    }
}
