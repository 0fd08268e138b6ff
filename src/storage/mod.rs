//! Result persistence.
//!
//! The engine hands every finished (or cancelled) sweep to a [`ResultSink`].
//! The sink owns the naming scheme and the storage format; a failure to
//! persist is reported by the engine but never stops the run.
//!
//! - [`MemorySink`]: keeps results in memory (tests, dry runs)
//! - [`CsvResultSink`]: CSV data file plus a JSON info sidecar (feature
//!   `storage_csv`)

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::PersistError;
use crate::scan::ScanResult;

#[cfg(feature = "storage_csv")]
mod csv_sink;
#[cfg(feature = "storage_csv")]
pub use csv_sink::CsvResultSink;

/// Destination for scan results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Name under which repetition `repetition` is stored.
    fn name_for(&self, repetition: usize) -> String;

    /// Store one result.
    async fn persist(&self, name: &str, result: &ScanResult) -> Result<(), PersistError>;
}

/// In-memory sink.
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<(String, ScanResult)>>,
    fail: bool,
}

impl MemorySink {
    /// Sink that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose every `persist` call fails.
    pub fn failing() -> Self {
        Self {
            results: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Stored `(name, result)` pairs in persist order.
    pub async fn results(&self) -> Vec<(String, ScanResult)> {
        self.results.lock().await.clone()
    }

    /// Number of stored results.
    pub async fn len(&self) -> usize {
        self.results.lock().await.len()
    }

    /// True when nothing was stored.
    pub async fn is_empty(&self) -> bool {
        self.results.lock().await.is_empty()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    fn name_for(&self, repetition: usize) -> String {
        format!("memory_{repetition:03}")
    }

    async fn persist(&self, name: &str, result: &ScanResult) -> Result<(), PersistError> {
        if self.fail {
            return Err(PersistError::Storage(format!(
                "memory sink refused to store '{name}'"
            )));
        }
        debug!(name, points = result.len(), "Storing result in memory");
        self.results
            .lock()
            .await
            .push((name.to_string(), result.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{AxisId, SampleSeries};

    fn result() -> ScanResult {
        let mut series = SampleSeries::new(&[0.0, 1.0]);
        series.record(0, 3.0);
        series.into_result(0, AxisId::Primary, false)
    }

    #[tokio::test]
    async fn test_memory_sink_stores_in_order() {
        let sink = MemorySink::new();
        assert!(sink.is_empty().await);

        sink.persist(&sink.name_for(0), &result()).await.unwrap();
        sink.persist(&sink.name_for(1), &result()).await.unwrap();

        let stored = sink.results().await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].0, "memory_000");
        assert_eq!(stored[1].0, "memory_001");
        assert_eq!(stored[0].1.readings[0], 3.0);
    }

    #[tokio::test]
    async fn test_failing_sink() {
        let sink = MemorySink::failing();
        let err = sink.persist("x", &result()).await.unwrap_err();
        assert!(matches!(err, PersistError::Storage(_)));
        assert_eq!(sink.len().await, 0);
    }
}
