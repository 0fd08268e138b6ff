//! Mock Hardware Implementations
//!
//! Simulated delay lines and lock-in amplifier for tests and dry runs.
//! All mock devices use async-safe operations (tokio::time::sleep, not
//! std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockDelayLine` - motorized delay line with travel limits, a command log and
//!   injectable move failures
//! - `MockLockIn` - scalar detector returning a constant or a simulated THz
//!   pulse that follows a delay line, with injectable read failures

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::hardware::capabilities::{InstrumentPort, SamplingPort};

/// Travel range of the longest physical line (mm).
pub const DEFAULT_TRAVEL_MM: (f64, f64) = (0.0, 200.0);

const POSITION_TOLERANCE: f64 = 1e-9;

// =============================================================================
// MockDelayLine
// =============================================================================

/// Command received by a `MockDelayLine`, in call order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageCommand {
    /// `return_to(position, velocity)`
    ReturnTo {
        /// Target position
        position: f64,
        /// Velocity used for the move
        velocity: f64,
    },
    /// `set_velocity(velocity)`
    SetVelocity(f64),
    /// `move_to(position)`
    MoveTo(f64),
}

/// Simulated delay line.
///
/// Moves are instantaneous unless [`MockDelayLine::with_realistic_timing`] is
/// used, in which case each move sleeps for `distance / velocity`.
///
/// # Example
///
/// ```rust,ignore
/// let stage = MockDelayLine::new("pump delay-line").failing_at(4.0);
/// stage.move_to(2.0).await?;
/// assert!(stage.move_to(4.0).await.is_err());
/// ```
pub struct MockDelayLine {
    name: String,
    position: RwLock<f64>,
    velocity: RwLock<f64>,
    travel: (f64, f64),
    realistic_timing: bool,
    faulty_positions: Vec<f64>,
    commands: Mutex<Vec<StageCommand>>,
}

impl MockDelayLine {
    /// Line at 0 mm with the default travel range.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: RwLock::new(0.0),
            velocity: RwLock::new(10.0),
            travel: DEFAULT_TRAVEL_MM,
            realistic_timing: false,
            faulty_positions: Vec::new(),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Restrict the travel range; targets outside it fail.
    pub fn with_travel(mut self, min: f64, max: f64) -> Self {
        self.travel = (min, max);
        self
    }

    /// Sleep for `distance / velocity` on every move.
    pub fn with_realistic_timing(mut self) -> Self {
        self.realistic_timing = true;
        self
    }

    /// Every move targeting `position` fails.
    pub fn failing_at(mut self, position: f64) -> Self {
        self.faulty_positions.push(position);
        self
    }

    /// Current position.
    pub async fn position(&self) -> f64 {
        *self.position.read().await
    }

    /// Armed velocity.
    pub async fn velocity(&self) -> f64 {
        *self.velocity.read().await
    }

    /// All commands received so far.
    pub async fn commands(&self) -> Vec<StageCommand> {
        self.commands.lock().await.clone()
    }

    async fn travel_to(&self, target: f64, velocity: f64) -> Result<()> {
        let (min, max) = self.travel;
        if !(min..=max).contains(&target) {
            bail!(
                "{}: target {target} mm outside travel range {min}..{max} mm",
                self.name
            );
        }
        if self
            .faulty_positions
            .iter()
            .any(|p| (p - target).abs() < POSITION_TOLERANCE)
        {
            bail!("{}: simulated motor fault at {target} mm", self.name);
        }

        if self.realistic_timing && velocity > 0.0 {
            let distance = (target - *self.position.read().await).abs();
            // CRITICAL: Use tokio::time::sleep, NOT std::thread::sleep
            sleep(Duration::from_secs_f64(distance / velocity)).await;
        }

        *self.position.write().await = target;
        debug!(device = %self.name, position = target, "MockDelayLine reached target");
        Ok(())
    }
}

#[async_trait]
impl InstrumentPort for MockDelayLine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn return_to(&self, position: f64, velocity: f64) -> Result<()> {
        self.commands
            .lock()
            .await
            .push(StageCommand::ReturnTo { position, velocity });
        if !velocity.is_finite() || velocity <= 0.0 {
            bail!("{}: invalid homing velocity {velocity}", self.name);
        }
        *self.velocity.write().await = velocity;
        self.travel_to(position, velocity).await
    }

    async fn set_velocity(&self, velocity: f64) -> Result<()> {
        self.commands
            .lock()
            .await
            .push(StageCommand::SetVelocity(velocity));
        if !velocity.is_finite() || velocity <= 0.0 {
            bail!("{}: invalid velocity {velocity}", self.name);
        }
        *self.velocity.write().await = velocity;
        Ok(())
    }

    async fn move_to(&self, position: f64) -> Result<()> {
        self.commands.lock().await.push(StageCommand::MoveTo(position));
        let velocity = *self.velocity.read().await;
        self.travel_to(position, velocity).await
    }
}

// =============================================================================
// MockLockIn
// =============================================================================

/// Signal produced by a `MockLockIn`.
pub enum MockSignal {
    /// Same value on every read.
    Constant(f64),
    /// Single-cycle THz transient centred on a delay-line position: the first
    /// derivative of a Gaussian, `-A * x * exp(-x²)` with `x = (p - center) / width`.
    Pulse {
        /// Line whose position sets the delay
        stage: Arc<MockDelayLine>,
        /// Peak position (mm)
        center_mm: f64,
        /// Pulse width (mm)
        width_mm: f64,
        /// Peak-to-peak scale
        amplitude: f64,
    },
}

/// Simulated lock-in amplifier (X output).
pub struct MockLockIn {
    name: String,
    signal: MockSignal,
    noise: f64,
    reads: AtomicUsize,
    failing_reads: HashSet<usize>,
}

impl MockLockIn {
    /// Lock-in that always returns `value`.
    pub fn constant(value: f64) -> Self {
        Self::with_signal(MockSignal::Constant(value))
    }

    /// Lock-in producing a THz pulse that follows `stage`.
    pub fn pulse(stage: Arc<MockDelayLine>, center_mm: f64, width_mm: f64, amplitude: f64) -> Self {
        Self::with_signal(MockSignal::Pulse {
            stage,
            center_mm,
            width_mm,
            amplitude,
        })
    }

    fn with_signal(signal: MockSignal) -> Self {
        Self {
            name: "Lock-in".to_string(),
            signal,
            noise: 0.0,
            reads: AtomicUsize::new(0),
            failing_reads: HashSet::new(),
        }
    }

    /// Add uniform noise in `[-noise, noise]`.
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise.abs();
        self
    }

    /// The `ordinal`-th read (zero-based, counted over the device lifetime) fails.
    pub fn failing_on_read(mut self, ordinal: usize) -> Self {
        self.failing_reads.insert(ordinal);
        self
    }

    /// Number of reads attempted so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    async fn clean_value(&self) -> f64 {
        match &self.signal {
            MockSignal::Constant(v) => *v,
            MockSignal::Pulse {
                stage,
                center_mm,
                width_mm,
                amplitude,
            } => {
                let x = (stage.position().await - center_mm) / width_mm.max(f64::EPSILON);
                -amplitude * x * (-x * x).exp()
            }
        }
    }
}

#[async_trait]
impl SamplingPort for MockLockIn {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_scalar(&self) -> Result<f64> {
        let ordinal = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing_reads.contains(&ordinal) {
            return Err(anyhow!("{}: simulated read timeout (read #{ordinal})", self.name));
        }

        let mut value = self.clean_value().await;
        if self.noise > 0.0 {
            value += rand::thread_rng().gen_range(-self.noise..=self.noise);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delay_line_logs_commands_in_order() {
        let stage = MockDelayLine::new("thz");
        stage.return_to(5.0, 100.0).await.unwrap();
        stage.set_velocity(2.0).await.unwrap();
        stage.move_to(6.0).await.unwrap();

        assert_eq!(
            stage.commands().await,
            vec![
                StageCommand::ReturnTo {
                    position: 5.0,
                    velocity: 100.0
                },
                StageCommand::SetVelocity(2.0),
                StageCommand::MoveTo(6.0),
            ]
        );
        assert_eq!(stage.position().await, 6.0);
        assert_eq!(stage.velocity().await, 2.0);
    }

    #[tokio::test]
    async fn test_delay_line_rejects_out_of_travel() {
        let stage = MockDelayLine::new("thz").with_travel(0.0, 100.0);
        assert!(stage.move_to(150.0).await.is_err());
        assert_eq!(stage.position().await, 0.0);
    }

    #[tokio::test]
    async fn test_delay_line_injected_fault() {
        let stage = MockDelayLine::new("pump").failing_at(4.0);
        stage.move_to(2.0).await.unwrap();
        assert!(stage.move_to(4.0).await.is_err());
        assert_eq!(stage.position().await, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_realistic_timing_uses_velocity() {
        let stage = MockDelayLine::new("thz").with_realistic_timing();
        stage.set_velocity(10.0).await.unwrap();

        let start = tokio::time::Instant::now();
        stage.move_to(20.0).await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2100));
    }

    #[tokio::test]
    async fn test_lockin_constant_and_failures() {
        let lockin = MockLockIn::constant(1.23).failing_on_read(1);
        assert_eq!(lockin.read_scalar().await.unwrap(), 1.23);
        assert!(lockin.read_scalar().await.is_err());
        assert_eq!(lockin.read_scalar().await.unwrap(), 1.23);
        assert_eq!(lockin.read_count(), 3);
    }

    #[tokio::test]
    async fn test_lockin_noise_is_bounded() {
        let lockin = MockLockIn::constant(1.0).with_noise(0.1);
        for _ in 0..50 {
            let v = lockin.read_scalar().await.unwrap();
            assert!((0.9..=1.1).contains(&v));
        }
    }

    #[tokio::test]
    async fn test_pulse_follows_stage() {
        let stage = Arc::new(MockDelayLine::new("thz"));
        let lockin = MockLockIn::pulse(stage.clone(), 10.0, 1.0, 2.0);

        stage.move_to(10.0).await.unwrap();
        assert!(lockin.read_scalar().await.unwrap().abs() < 1e-12);

        stage.move_to(9.0).await.unwrap();
        let before = lockin.read_scalar().await.unwrap();
        stage.move_to(11.0).await.unwrap();
        let after = lockin.read_scalar().await.unwrap();
        assert!(before > 0.0);
        assert!(after < 0.0);
        assert!((before + after).abs() < 1e-12);
    }
}
