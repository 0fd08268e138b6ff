//! Configuration System using Figment
//!
//! Strongly-typed configuration for a THz-TDS measurement session.
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. Environment variables prefixed with `THZ_DAQ_`, nested keys separated by
//!    `__` (e.g. `THZ_DAQ_SCAN__REPEAT_COUNT=3`)
//!
//! # Example
//! ```no_run
//! use thz_daq::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load_from("config/thz_daq.toml")?;
//! config.validate()?;
//! let scan = config.scan.to_configuration()?;
//! println!("{} points per sweep", scan.primary.count().max(scan.secondary.count()));
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ScanError};
use crate::scan::{Axis, ScanConfiguration};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/thz_daq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "THZ_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Scan parameters
    pub scan: ScanSettings,
    /// Output settings
    pub storage: StorageConfig,
    /// Free-text measurement metadata
    #[serde(default)]
    pub info: MeasurementInfo,
    /// Mock hardware used by the CLI
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Mandatory scan parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// THz (reference) delay line
    pub thz: AxisSettings,
    /// Pump delay line
    pub pump: AxisSettings,
    /// Lock-in time constant in seconds
    pub time_constant_s: f64,
    /// Wait before each read, in time constants
    #[serde(default = "default_dwell_multiplier")]
    pub dwell_multiplier: f64,
    /// Publish progress every N samples
    #[serde(default = "default_one")]
    pub update_stride: usize,
    /// Number of repetitions
    #[serde(default = "default_one")]
    pub repeat_count: usize,
}

/// One delay line's sweep parameters (mm, mm/s).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSettings {
    /// Start position
    pub start: f64,
    /// End position (ignored when `fixed`)
    pub end: f64,
    /// Step size
    pub step: f64,
    /// Sweep velocity
    pub velocity: f64,
    /// Hold the line at `start`
    #[serde(default)]
    pub fixed: bool,
}

/// Output locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root output directory (`data/` and `info/` are created below it)
    pub output_dir: PathBuf,
    /// File name prefix
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

/// Measurement metadata written next to every data file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementInfo {
    /// Setup number
    pub setup: String,
    /// Relative humidity (%)
    pub humidity: String,
    /// Emitter
    pub emitter: String,
    /// Detector
    pub detector: String,
    /// Polarizers
    pub polarizers: String,
    /// Sample
    pub sample: String,
    /// Observations
    pub observations: String,
}

/// Parameters of the simulated devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Pulse amplitude
    pub signal_amplitude: f64,
    /// Pulse centre on the THz line (mm)
    pub pulse_center_mm: f64,
    /// Pulse width (mm)
    pub pulse_width_mm: f64,
    /// Uniform noise amplitude
    pub noise: f64,
    /// Pump-line positions where moves fail
    pub faulty_pump_positions: Vec<f64>,
    /// Make moves take `distance / velocity`
    pub realistic_timing: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            signal_amplitude: 1.0,
            pulse_center_mm: 5.0,
            pulse_width_mm: 0.3,
            noise: 0.01,
            faulty_pump_positions: Vec::new(),
            realistic_timing: false,
        }
    }
}

// Default value functions
fn default_dwell_multiplier() -> f64 {
    1.0
}

fn default_one() -> usize {
    1
}

fn default_file_prefix() -> String {
    "thz".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig {
                name: "THz-TDS Control".to_string(),
                log_level: "info".to_string(),
            },
            scan: ScanSettings {
                thz: AxisSettings {
                    start: 0.0,
                    end: 10.0,
                    step: 0.05,
                    velocity: 5.0,
                    fixed: false,
                },
                pump: AxisSettings {
                    start: 20.0,
                    end: 20.0,
                    step: 0.05,
                    velocity: 5.0,
                    fixed: true,
                },
                time_constant_s: 0.03,
                dwell_multiplier: 3.0,
                update_stride: 10,
                repeat_count: 1,
            },
            storage: StorageConfig {
                output_dir: PathBuf::from("output"),
                file_prefix: default_file_prefix(),
            },
            info: MeasurementInfo::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// Environment variables override file values, e.g.
    /// `THZ_DAQ_APPLICATION__LOG_LEVEL=debug`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ScanError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.storage.file_prefix.trim().is_empty() {
            return Err(ScanError::Configuration(
                "storage.file_prefix must not be empty".to_string(),
            ));
        }

        self.scan.to_configuration()?;
        Ok(())
    }
}

impl AxisSettings {
    /// Build the axis; a fixed line ends where it starts.
    pub fn to_axis(&self, label: &str) -> AppResult<Axis> {
        let end = if self.fixed { self.start } else { self.end };
        Axis::new(self.start, end, self.step, self.velocity).map_err(|e| match e {
            ScanError::InvalidAxis(msg) => ScanError::InvalidAxis(format!("{label}: {msg}")),
            other => other,
        })
    }
}

impl ScanSettings {
    /// Convert into a validated [`ScanConfiguration`].
    ///
    /// This is the "all mandatory fields are usable" check that must pass
    /// before a run is started.
    pub fn to_configuration(&self) -> AppResult<ScanConfiguration> {
        let config = ScanConfiguration::new(self.thz.to_axis("thz")?, self.pump.to_axis("pump")?)
            .with_time_constant(self.time_constant_s)
            .with_dwell_multiplier(self.dwell_multiplier)
            .with_update_stride(self.update_stride)
            .with_repeat_count(self.repeat_count);
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::AxisId;
    use std::io::Write;

    const SAMPLE: &str = r#"
[application]
name = "Lab 2"
log_level = "debug"

[scan]
time_constant_s = 0.1
dwell_multiplier = 2.0
update_stride = 5

[scan.thz]
start = 10.0
end = 10.0
step = 0.1
velocity = 5.0
fixed = true

[scan.pump]
start = 0.0
end = 4.0
step = 0.5
velocity = 2.0

[storage]
output_dir = "out"

[info]
sample = "GaAs wafer"
"#;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.name, "Lab 2");
        assert_eq!(config.scan.repeat_count, 1);
        assert_eq!(config.scan.update_stride, 5);
        assert_eq!(config.storage.file_prefix, "thz");
        assert_eq!(config.info.sample, "GaAs wafer");
        assert_eq!(config.simulation, SimulationConfig::default());
        assert!(config.validate().is_ok());

        let scan = config.scan.to_configuration().unwrap();
        assert_eq!(scan.validate().unwrap(), AxisId::Secondary);
        assert_eq!(scan.secondary.count(), 9);
        assert_eq!(scan.primary.count(), 1);
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let config = AppConfig::load_from(path).unwrap();
        assert!(config.validate().is_ok());
        assert!(config.scan.pump.fixed);
    }

    #[test]
    fn test_missing_mandatory_field_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.replace("time_constant_s = 0.1", "").as_bytes())
            .unwrap();
        assert!(AppConfig::load_from(file.path()).is_err());
    }

    #[test]
    fn test_fixed_flag_collapses_axis() {
        let settings = AxisSettings {
            start: 3.0,
            end: 9.0,
            step: 1.0,
            velocity: 1.0,
            fixed: true,
        };
        let axis = settings.to_axis("thz").unwrap();
        assert_eq!(axis.count(), 1);
        assert_eq!(axis.positions(), &[3.0]);
    }

    #[test]
    fn test_invalid_axis_names_the_line() {
        let settings = AxisSettings {
            start: 0.0,
            end: 1.0,
            step: 0.0,
            velocity: 1.0,
            fixed: false,
        };
        let err = settings.to_axis("pump").unwrap_err();
        assert!(err.to_string().contains("pump"));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.scan.to_configuration().unwrap().validate().unwrap(),
            AxisId::Primary
        );
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_both_axes_swept_is_rejected() {
        let mut config = AppConfig::default();
        config.scan.pump.fixed = false;
        config.scan.pump.end = 21.0;
        assert!(matches!(
            config.validate(),
            Err(ScanError::AmbiguousSweepAxis { .. })
        ));
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = AppConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
