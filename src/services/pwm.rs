//! Software PWM for the door servo
//!
//! The servo line has no hardware PWM, so positions are commanded with
//! software-timed pulse trains: high for a short phase, low for the rest of a
//! ~20 ms period, repeated for ~300 ms. Phases are timed with busy-waits on a
//! microsecond clock because sleep granularity is far coarser than the pulse
//! widths involved.
//!
//! Each train runs on its own named OS thread, raised to the highest priority
//! the process is allowed, and holds the pin lock for its whole duration, so
//! two trains on one pin queue instead of interleaving.

use crate::infra::config::PwmConfig;
use embedded_hal::digital::OutputPin;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thread_priority::{set_current_thread_priority, ThreadPriority};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Clock ticks per second (1 tick = 1 µs)
pub const TICKS_PER_SECOND: u64 = 1_000_000;

/// Which busy-wait comparison ends the high phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighPhase {
    /// Spin until the time elapsed since the pulse started exceeds `high_ticks`
    ElapsedSinceStart,
    /// Spin until the time remaining to the period target drops to `low_ticks`
    RemainingUntilTarget,
}

/// One servo command: pulses of fixed high/low timing repeated over a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseSpec {
    pub high_ticks: u64,
    pub low_ticks: u64,
    pub window_ticks: u64,
    pub high_phase: HighPhase,
}

impl PulseSpec {
    /// ~2 ms high in a 20 ms period
    pub const OPEN: PulseSpec = PulseSpec {
        high_ticks: 2_000,
        low_ticks: 18_000,
        window_ticks: 300_000,
        high_phase: HighPhase::ElapsedSinceStart,
    };

    /// ~1 ms high in a 20 ms period
    pub const CLOSED: PulseSpec = PulseSpec {
        high_ticks: 1_000,
        low_ticks: 19_000,
        window_ticks: 300_000,
        high_phase: HighPhase::RemainingUntilTarget,
    };

    pub fn open_from(config: &PwmConfig) -> Self {
        Self {
            high_ticks: config.open_high_us,
            low_ticks: config.open_low_us,
            window_ticks: config.window_ms * 1_000,
            high_phase: HighPhase::ElapsedSinceStart,
        }
    }

    pub fn closed_from(config: &PwmConfig) -> Self {
        Self {
            high_ticks: config.closed_high_us,
            low_ticks: config.closed_low_us,
            window_ticks: config.window_ms * 1_000,
            high_phase: HighPhase::RemainingUntilTarget,
        }
    }

    #[inline]
    pub const fn period_ticks(&self) -> u64 {
        self.high_ticks + self.low_ticks
    }

    pub fn high(&self) -> Duration {
        ticks_to_duration(self.high_ticks)
    }

    pub fn window(&self) -> Duration {
        ticks_to_duration(self.window_ticks)
    }

    pub fn name(&self) -> &'static str {
        match self.high_phase {
            HighPhase::ElapsedSinceStart => "open",
            HighPhase::RemainingUntilTarget => "closed",
        }
    }
}

#[inline]
fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_micros(ticks * 1_000_000 / TICKS_PER_SECOND)
}

/// Free-running monotonic microsecond clock
struct TickClock {
    origin: Instant,
}

impl TickClock {
    fn start() -> Self {
        Self { origin: Instant::now() }
    }

    #[inline]
    fn ticks(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }
}

/// Spin without yielding while `pending` holds
#[inline]
fn busy_wait_while(mut pending: impl FnMut() -> bool) {
    while pending() {
        std::hint::spin_loop();
    }
}

/// Timing measured over one pulse train
#[derive(Debug, Clone, PartialEq)]
pub struct PulseReport {
    pub spec: PulseSpec,
    pub pulses: u32,
    pub min_high: Duration,
    pub max_high: Duration,
    pub mean_high: Duration,
    pub elapsed: Duration,
    /// The train stopped early because a pin write failed
    pub aborted: bool,
    /// The worker thread ran at raised scheduling priority
    pub priority_raised: bool,
}

/// Generate one pulse train on `pin`, blocking the calling thread
pub fn run_pulse_train<P: OutputPin>(pin: &mut P, spec: PulseSpec) -> PulseReport {
    let clock = TickClock::start();
    let mut pulses = 0u32;
    let mut min_high = u64::MAX;
    let mut max_high = 0u64;
    let mut sum_high = 0u64;
    let mut aborted = false;

    while clock.ticks() < spec.window_ticks {
        let pulse_start = clock.ticks();
        let period_target = pulse_start + spec.period_ticks();

        if let Err(e) = pin.set_high() {
            warn!(error = ?e, spec = spec.name(), "pwm_pin_write_failed");
            aborted = true;
            break;
        }

        match spec.high_phase {
            HighPhase::ElapsedSinceStart => busy_wait_while(|| {
                clock.ticks().saturating_sub(pulse_start) <= spec.high_ticks
            }),
            HighPhase::RemainingUntilTarget => busy_wait_while(|| {
                period_target.saturating_sub(clock.ticks()) > spec.low_ticks
            }),
        }
        let high_ticks = clock.ticks() - pulse_start;

        if let Err(e) = pin.set_low() {
            warn!(error = ?e, spec = spec.name(), "pwm_pin_write_failed");
            aborted = true;
            break;
        }

        busy_wait_while(|| clock.ticks() < period_target);

        pulses += 1;
        min_high = min_high.min(high_ticks);
        max_high = max_high.max(high_ticks);
        sum_high += high_ticks;
    }

    let mean_high = if pulses > 0 { sum_high / u64::from(pulses) } else { 0 };
    PulseReport {
        spec,
        pulses,
        min_high: ticks_to_duration(if pulses > 0 { min_high } else { 0 }),
        max_high: ticks_to_duration(max_high),
        mean_high: ticks_to_duration(mean_high),
        elapsed: ticks_to_duration(clock.ticks()),
        aborted,
        priority_raised: false,
    }
}

/// Set once the missing-privilege warning has been logged
static PRIORITY_WARNED: AtomicBool = AtomicBool::new(false);

/// Raise the calling thread to maximum priority. Needs CAP_SYS_NICE; without
/// it the train still runs, only with more jitter.
fn raise_thread_priority(spec: PulseSpec) -> bool {
    match set_current_thread_priority(ThreadPriority::Max) {
        Ok(()) => true,
        Err(e) => {
            if !PRIORITY_WARNED.swap(true, Ordering::Relaxed) {
                warn!(spec = spec.name(), error = ?e, "pwm_priority_not_raised");
            } else {
                debug!(spec = spec.name(), error = ?e, "pwm_priority_not_raised");
            }
            false
        }
    }
}

/// Handle to an in-flight pulse train. Dropping it does not stop the train.
pub struct PulseTrain {
    spec: PulseSpec,
    done: oneshot::Receiver<PulseReport>,
}

impl PulseTrain {
    pub fn spec(&self) -> PulseSpec {
        self.spec
    }

    /// Wait for the train to finish. None if the worker thread panicked.
    pub async fn finished(self) -> Option<PulseReport> {
        self.done.await.ok()
    }
}

/// Software PWM driver owning the servo pin
pub struct SoftPwm<P> {
    pin: Arc<Mutex<P>>,
    settle: Duration,
}

impl<P> SoftPwm<P>
where
    P: OutputPin + Send + 'static,
{
    pub fn new(pin: P, settle: Duration) -> Self {
        Self { pin: Arc::new(Mutex::new(pin)), settle }
    }

    /// Start a pulse train on a dedicated thread and return immediately
    pub fn drive_pulse_train(&self, spec: PulseSpec) -> std::io::Result<PulseTrain> {
        let (done_tx, done_rx) = oneshot::channel();
        let pin = self.pin.clone();
        let settle = self.settle;

        std::thread::Builder::new().name(format!("soft-pwm-{}", spec.name())).spawn(move || {
            let priority_raised = raise_thread_priority(spec);
            if !settle.is_zero() {
                std::thread::sleep(settle);
            }

            let mut report = {
                let mut pin = pin.lock();
                run_pulse_train(&mut *pin, spec)
            };
            report.priority_raised = priority_raised;

            debug!(
                spec = spec.name(),
                pulses = %report.pulses,
                mean_high_us = %report.mean_high.as_micros(),
                max_high_us = %report.max_high.as_micros(),
                elapsed_ms = %report.elapsed.as_millis(),
                priority_raised = %report.priority_raised,
                "pwm_train_finished"
            );
            let _ = done_tx.send(report);
        })?;

        Ok(PulseTrain { spec, done: done_rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Level;
    use crate::io::gpio::mock::RecordingPin;

    /// High-phase durations (µs) from recorded high->low write pairs
    fn high_phases(pin: &RecordingPin) -> Vec<u64> {
        let writes = pin.writes();
        writes
            .windows(2)
            .filter(|w| w[0].1 == Level::High && w[1].1 == Level::Low)
            .map(|w| w[1].0.duration_since(w[0].0).as_micros() as u64)
            .collect()
    }

    #[test]
    fn test_canonical_specs_share_period() {
        assert_eq!(PulseSpec::OPEN.period_ticks(), 20_000);
        assert_eq!(PulseSpec::CLOSED.period_ticks(), 20_000);
        assert!(PulseSpec::OPEN.high_ticks > PulseSpec::CLOSED.high_ticks);
        assert_eq!(PulseSpec::OPEN.window(), Duration::from_millis(300));
    }

    #[test]
    fn test_specs_from_config_match_canonical() {
        let config = PwmConfig::default();
        assert_eq!(PulseSpec::open_from(&config), PulseSpec::OPEN);
        assert_eq!(PulseSpec::closed_from(&config), PulseSpec::CLOSED);
    }

    #[test]
    fn test_open_train_high_phase_stable_over_window() {
        let pin = RecordingPin::new();
        let mut driver_pin = pin.clone();
        let spec = PulseSpec::OPEN;

        let report = run_pulse_train(&mut driver_pin, spec);

        assert!(!report.aborted);
        assert!(report.elapsed >= Duration::from_millis(300));
        assert_eq!(report.pulses, 15);
        // Busy-wait never ends a high phase early
        assert!(report.min_high >= spec.high());

        let expected = spec.high_ticks as f64;
        let highs = high_phases(&pin);
        assert_eq!(highs.len(), report.pulses as usize);

        let mean = highs.iter().sum::<u64>() as f64 / highs.len() as f64;
        assert!((mean - expected).abs() <= expected * 0.10, "mean high {mean}µs");

        let within =
            highs.iter().filter(|&&h| (h as f64 - expected).abs() <= expected * 0.10).count();
        assert!(within * 100 >= highs.len() * 95, "only {within}/{} pulses in tolerance", highs.len());

        // Line always rests low after the train
        assert_eq!(pin.level(), Some(Level::Low));
    }

    #[test]
    fn test_closed_train_shorter_high_same_period() {
        let pin = RecordingPin::new();
        let mut driver_pin = pin.clone();

        let report = run_pulse_train(&mut driver_pin, PulseSpec::CLOSED);

        assert_eq!(report.pulses, 15);
        assert!(report.min_high >= PulseSpec::CLOSED.high());
        assert!(report.mean_high < PulseSpec::OPEN.high());

        let writes = pin.writes();
        let rises: Vec<_> = writes.iter().filter(|w| w.1 == Level::High).map(|w| w.0).collect();
        let periods: Vec<u64> =
            rises.windows(2).map(|w| w[1].duration_since(w[0]).as_micros() as u64).collect();
        let mean_period = periods.iter().sum::<u64>() as f64 / periods.len() as f64;
        assert!((mean_period - 20_000.0).abs() <= 2_000.0, "mean period {mean_period}µs");
    }

    #[tokio::test]
    async fn test_drive_returns_before_train_completes() {
        let pin = RecordingPin::new();
        let pwm = SoftPwm::new(pin.clone(), Duration::ZERO);

        let started = Instant::now();
        let train = pwm.drive_pulse_train(PulseSpec::OPEN).unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(train.spec(), PulseSpec::OPEN);

        let report = train.finished().await.expect("train should report");
        assert_eq!(report.pulses, 15);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_train_thread_requests_raised_priority() {
        // Same process, same privileges: a plain thread gets the same answer
        let allowed = std::thread::spawn(|| raise_thread_priority(PulseSpec::CLOSED))
            .join()
            .unwrap();

        let pwm = SoftPwm::new(RecordingPin::new(), Duration::ZERO);
        let report = pwm.drive_pulse_train(PulseSpec::CLOSED).unwrap().finished().await.unwrap();

        assert_eq!(report.priority_raised, allowed);
        // Unprivileged runs still produce a full train
        assert_eq!(report.pulses, 15);
        assert!(!report.aborted);
    }

    #[tokio::test]
    async fn test_overlapping_trains_do_not_interleave() {
        let pin = RecordingPin::new();
        let pwm = SoftPwm::new(pin.clone(), Duration::ZERO);

        let first = pwm.drive_pulse_train(PulseSpec::OPEN).unwrap();
        let second = pwm.drive_pulse_train(PulseSpec::CLOSED).unwrap();
        let a = first.finished().await.unwrap();
        let b = second.finished().await.unwrap();

        // Strict high/low alternation means no two trains wrote concurrently
        let writes = pin.writes();
        assert_eq!(writes.len() as u32, (a.pulses + b.pulses) * 2);
        for pair in writes.chunks(2) {
            assert_eq!(pair[0].1, Level::High);
            assert_eq!(pair[1].1, Level::Low);
        }
    }
}
