//! CLI Entry Point for thz_daq
//!
//! Provides command-line interface for:
//! - Running a scan against simulated delay lines and lock-in
//! - Printing the planned positions of a configuration
//! - Printing a default configuration file
//!
//! # Usage
//!
//! ```bash
//! thz_daq default-config > config/thz_daq.toml
//! thz_daq plan --config config/thz_daq.toml
//! thz_daq run --config config/thz_daq.toml --log-format compact
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use thz_daq::config::{AppConfig, DEFAULT_CONFIG_PATH};
use thz_daq::hardware::mock::{MockDelayLine, MockLockIn};
use thz_daq::logging::{self, OutputFormat, TracingConfig};
use thz_daq::scan::{AxisId, ScanConfiguration, ScanEngine, ScanEvent};
use thz_daq::storage::CsvResultSink;
use thz_daq::units::mm_to_ps;

/// Travel of the THz (reference) line.
const THZ_TRAVEL_MM: (f64, f64) = (0.0, 100.0);
/// Travel of the pump line.
const PUMP_TRAVEL_MM: (f64, f64) = (0.0, 200.0);

#[derive(Parser)]
#[command(name = "thz_daq")]
#[command(about = "THz time-domain spectroscopy scan control", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scan on simulated hardware and save the results
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Log output format (pretty, compact, json)
        #[arg(long, default_value = "pretty")]
        log_format: OutputFormat,

        /// Override the number of repetitions
        #[arg(long)]
        repeat: Option<usize>,
    },

    /// Print the positions a configuration would sample
    Plan {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Print a default configuration file
    DefaultConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            log_format,
            repeat,
        } => run_scan(&config, log_format, repeat).await,
        Commands::Plan { config } => print_plan(&config),
        Commands::DefaultConfig => {
            print!("{}", toml::to_string_pretty(&AppConfig::default())?);
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    let config = AppConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn print_plan(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let scan = config.scan.to_configuration()?;
    let swept = scan.validate()?;
    let axis = scan.axis(swept);
    let fixed = match swept {
        AxisId::Primary => &scan.secondary,
        AxisId::Secondary => &scan.primary,
    };

    println!(
        "Swept: {swept} line, {} points at {} mm/s; fixed line at {} mm",
        axis.count(),
        axis.velocity(),
        fixed.start()
    );
    println!(
        "Dwell {:.3} s, settle {:.3} s, {} repetition(s)",
        scan.dwell().as_secs_f64(),
        scan.settle().as_secs_f64(),
        scan.repeat_count
    );
    println!("position_mm\tdelay_ps");
    for position in axis.positions() {
        println!("{position}\t{:.4}", mm_to_ps(*position));
    }
    Ok(())
}

fn build_engine(config: &AppConfig, scan: &ScanConfiguration) -> Result<ScanEngine> {
    let sim = &config.simulation;

    let mut thz = MockDelayLine::new("THz delay-line").with_travel(THZ_TRAVEL_MM.0, THZ_TRAVEL_MM.1);
    let mut pump =
        MockDelayLine::new("Pump delay-line").with_travel(PUMP_TRAVEL_MM.0, PUMP_TRAVEL_MM.1);
    if sim.realistic_timing {
        thz = thz.with_realistic_timing();
        pump = pump.with_realistic_timing();
    }
    for position in &sim.faulty_pump_positions {
        pump = pump.failing_at(*position);
    }
    let thz = Arc::new(thz);
    let pump = Arc::new(pump);

    // The simulated pulse follows whichever line is swept.
    let follower = match scan.validate()? {
        AxisId::Primary => thz.clone(),
        AxisId::Secondary => pump.clone(),
    };
    let lockin = MockLockIn::pulse(
        follower,
        sim.pulse_center_mm,
        sim.pulse_width_mm,
        sim.signal_amplitude,
    )
    .with_noise(sim.noise);

    let sink = CsvResultSink::from_config(config)?.with_scan_configuration(scan)?;
    Ok(ScanEngine::new(thz, pump, Arc::new(lockin), Arc::new(sink)))
}

async fn run_scan(path: &Path, log_format: OutputFormat, repeat: Option<usize>) -> Result<()> {
    let mut config = load_config(path)?;
    if let Some(repeat) = repeat {
        config.scan.repeat_count = repeat;
    }
    logging::init(TracingConfig::from_app_config(&config)?.with_format(log_format))?;

    let scan = config.scan.to_configuration()?;
    info!(
        name = %config.application.name,
        sample = %config.info.sample,
        output = %config.storage.output_dir.display(),
        "Starting scan"
    );

    let engine = build_engine(&config, &scan)?;
    let mut events = engine.subscribe();

    let token = engine.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling scan");
            token.cancel();
        }
    });

    let handle = engine.run(scan).await?;

    loop {
        match events.recv().await {
            Ok(ScanEvent::Progress(p)) => info!(
                repetition = p.repetition,
                index = p.index,
                total = p.total,
                reading = ?p.readings.last(),
                "Progress"
            ),
            Ok(ScanEvent::Error { kind, message }) => warn!(kind = %kind, "{message}"),
            Ok(ScanEvent::Finished { .. }) => break,
            Ok(ScanEvent::Started { .. }) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Progress display fell behind"),
            Err(RecvError::Closed) => break,
        }
    }

    let report = handle.join().await?;
    println!(
        "Scan {}: {} repetition(s), {} missing sample(s)",
        report.outcome, report.repetitions, report.faults
    );
    for name in &report.persisted {
        println!("  saved {name}");
    }
    Ok(())
}
