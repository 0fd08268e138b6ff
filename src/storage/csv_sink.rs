//! CSV result sink.
//!
//! Layout below the output directory:
//!
//! ```text
//! <output_dir>/data/<prefix>_<YYYYmmdd_HHMMSS>_<rep>.csv    position_mm,delay_ps,X
//! <output_dir>/info/<prefix>_<YYYYmmdd_HHMMSS>_<rep>.json   measurement info + run metadata
//! ```
//!
//! The timestamp is taken when the name is chosen. A name whose files already
//! exist gets a `_<n>` suffix, and existing files are never overwritten: a
//! clash at write time is reported as a [`PersistError`].

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::info;

use super::ResultSink;
use crate::config::{AppConfig, MeasurementInfo};
use crate::error::PersistError;
use crate::scan::{AxisId, ScanConfiguration, ScanResult};
use crate::units::mm_to_ps;

const DATA_FOLDER: &str = "data";
const INFO_FOLDER: &str = "info";

/// Writes each result as CSV with a JSON sidecar.
#[derive(Debug, Clone)]
pub struct CsvResultSink {
    data_dir: PathBuf,
    info_dir: PathBuf,
    prefix: String,
    session_start: DateTime<Local>,
    info: MeasurementInfo,
    scan: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct InfoRecord<'a> {
    name: &'a str,
    saved_at: String,
    session_start: String,
    repetition: usize,
    axis: AxisId,
    points: usize,
    missing: usize,
    completed: bool,
    info: &'a MeasurementInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    scan: Option<&'a serde_json::Value>,
}

impl CsvResultSink {
    /// Create the `data/` and `info/` folders below `output_dir`.
    pub fn new(
        output_dir: impl AsRef<Path>,
        prefix: impl Into<String>,
        info: MeasurementInfo,
    ) -> Result<Self, PersistError> {
        let output_dir = output_dir.as_ref();
        let data_dir = output_dir.join(DATA_FOLDER);
        let info_dir = output_dir.join(INFO_FOLDER);
        for dir in [&data_dir, &info_dir] {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
                info!("Created {} folder", dir.display());
            }
        }

        Ok(Self {
            data_dir,
            info_dir,
            prefix: prefix.into(),
            session_start: Local::now(),
            info,
            scan: None,
        })
    }

    /// Sink configured from the `[storage]` and `[info]` sections.
    pub fn from_config(config: &AppConfig) -> Result<Self, PersistError> {
        Self::new(
            &config.storage.output_dir,
            config.storage.file_prefix.clone(),
            config.info.clone(),
        )
    }

    /// Record the scan parameters in every sidecar.
    pub fn with_scan_configuration(
        mut self,
        config: &ScanConfiguration,
    ) -> Result<Self, PersistError> {
        self.scan = Some(serde_json::to_value(config)?);
        Ok(self)
    }

    /// Path of the CSV file for `name`.
    pub fn data_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.csv"))
    }

    /// Path of the JSON sidecar for `name`.
    pub fn info_path(&self, name: &str) -> PathBuf {
        self.info_dir.join(format!("{name}.json"))
    }

    fn is_taken(&self, name: &str) -> bool {
        self.data_path(name).exists() || self.info_path(name).exists()
    }

    fn write_data(&self, path: &Path, result: &ScanResult) -> Result<(), PersistError> {
        let mut writer = csv::Writer::from_writer(create_new(path)?);
        writer.write_record(["position_mm", "delay_ps", "X"])?;
        for (position, reading) in result.points() {
            writer.write_record(&[
                position.to_string(),
                mm_to_ps(position).to_string(),
                format_reading(reading),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_info(&self, path: &Path, name: &str, result: &ScanResult) -> Result<(), PersistError> {
        let record = InfoRecord {
            name,
            saved_at: Local::now().to_rfc3339(),
            session_start: self.session_start.to_rfc3339(),
            repetition: result.repetition,
            axis: result.axis,
            points: result.len(),
            missing: result.missing_count(),
            completed: result.completed,
            info: &self.info,
            scan: self.scan.as_ref(),
        };
        create_new(path)?.write_all(serde_json::to_string_pretty(&record)?.as_bytes())?;
        Ok(())
    }
}

fn create_new(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

fn format_reading(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else {
        value.to_string()
    }
}

#[async_trait]
impl ResultSink for CsvResultSink {
    fn name_for(&self, repetition: usize) -> String {
        let base = format!(
            "{}_{}_{repetition:03}",
            self.prefix,
            Local::now().format("%Y%m%d_%H%M%S")
        );
        let mut name = base.clone();
        let mut n = 1;
        while self.is_taken(&name) {
            name = format!("{base}_{n}");
            n += 1;
        }
        name
    }

    async fn persist(&self, name: &str, result: &ScanResult) -> Result<(), PersistError> {
        let data_path = self.data_path(name);
        self.write_data(&data_path, result)?;
        self.write_info(&self.info_path(name), name, result)?;
        info!(
            file = %data_path.display(),
            points = result.len(),
            missing = result.missing_count(),
            "Scan result saved"
        );
        Ok(())
    }
}
