//! Doorbell button monitoring
//!
//! The button is polled rather than interrupt-driven. Raw samples go through a
//! `Debouncer`; a transition onto the active level is one logical press.
//!
//! While a session is in flight the gate is Busy: raw edges still update the
//! debouncer, but no press is emitted.

use crate::domain::error::HardwareError;
use crate::domain::types::{Level, PressEvent, PressSource};
use crate::infra::config::Config;
use crate::io::gpio::{read_level, GpioController, Pull, SysfsPin};
use crate::services::session::SessionGate;
use embedded_hal::digital::InputPin;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Collapses contact bounce into single logical transitions
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    active: Level,
    stable: Option<Level>,
    last_accepted: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration, active: Level) -> Self {
        Self { window, active, stable: None, last_accepted: None }
    }

    /// Last accepted level, None before the first sample
    pub fn stable(&self) -> Option<Level> {
        self.stable
    }

    /// Feed one raw sample. Returns true when it completes a press.
    ///
    /// A change is accepted only if no change was accepted within the
    /// preceding window. The first sample sets the baseline and never counts.
    pub fn sample(&mut self, level: Level, now: Instant) -> bool {
        let Some(stable) = self.stable else {
            self.stable = Some(level);
            return false;
        };
        if level == stable {
            return false;
        }
        if let Some(last) = self.last_accepted {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }

        self.stable = Some(level);
        self.last_accepted = Some(now);
        level == self.active
    }
}

pub type PressCallback = Box<dyn Fn(PressEvent) + Send + Sync>;

pub struct DoorbellMonitor<P> {
    pin: P,
    pin_number: u32,
    debouncer: Debouncer,
    poll_interval: Duration,
    gate: SessionGate,
    callbacks: Vec<PressCallback>,
}

impl DoorbellMonitor<SysfsPin> {
    /// Claim the configured button pin, with pull-up when the platform has it.
    /// Any failure to open the pin is reported as `Unavailable`.
    pub fn initialize(
        controller: &GpioController,
        config: &Config,
        gate: SessionGate,
    ) -> Result<Self, HardwareError> {
        let pull = if controller.supports_pull_up() { Pull::Up } else { Pull::None };
        let pin = controller.open_input(config.button_pin(), pull).map_err(|e| match e {
            HardwareError::Unavailable(_) => e,
            other => HardwareError::Unavailable(format!(
                "button pin {}: {other}",
                config.button_pin()
            )),
        })?;
        Ok(Self::new(pin, config, gate))
    }
}

impl<P> DoorbellMonitor<P>
where
    P: InputPin + Send,
{
    pub fn new(pin: P, config: &Config, gate: SessionGate) -> Self {
        let active = if config.button_active_low() { Level::Low } else { Level::High };
        Self {
            pin,
            pin_number: config.button_pin(),
            debouncer: Debouncer::new(Duration::from_millis(config.debounce_ms()), active),
            poll_interval: Duration::from_millis(config.button_poll_interval_ms().max(1)),
            gate,
            callbacks: Vec::new(),
        }
    }

    /// Register a handler, invoked at most once per physical press
    pub fn on_press(&mut self, callback: impl Fn(PressEvent) + Send + Sync + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    /// Poll the button until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            pin = %self.pin_number,
            poll_interval_ms = %self.poll_interval.as_millis(),
            debounce_ms = %self.debouncer.window.as_millis(),
            "doorbell_monitor_started"
        );

        let mut poll_timer = interval(self.poll_interval);
        poll_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut read_failing = false;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("doorbell_monitor_shutdown");
                        return;
                    }
                }
                _ = poll_timer.tick() => {}
            }

            let level = match read_level(&mut self.pin) {
                Ok(level) => {
                    if read_failing {
                        info!(pin = %self.pin_number, "doorbell_read_recovered");
                        read_failing = false;
                    }
                    level
                }
                Err(e) => {
                    if !read_failing {
                        warn!(pin = %self.pin_number, error = ?e, "doorbell_read_failed");
                        read_failing = true;
                    }
                    continue;
                }
            };

            self.poll(level, Instant::now());
        }
    }

    /// Handle one sample; returns the emitted press, if any
    fn poll(&mut self, level: Level, now: Instant) -> Option<PressEvent> {
        if !self.debouncer.sample(level, now) {
            return None;
        }
        if self.gate.is_busy() {
            debug!(pin = %self.pin_number, "doorbell_press_ignored_busy");
            return None;
        }

        let event = PressEvent { at: now, source: PressSource::Button };
        info!(pin = %self.pin_number, "doorbell_pressed");
        for callback in &self.callbacks {
            callback(event);
        }
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::gpio::mock::RecordingPin;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_millis(25);

    fn ms(base: Instant, offset: u64) -> Instant {
        base + Duration::from_millis(offset)
    }

    #[test]
    fn test_bounce_collapses_to_one_press() {
        let mut d = Debouncer::new(WINDOW, Level::Low);
        let t = Instant::now();

        assert!(!d.sample(Level::High, t));
        assert!(d.sample(Level::Low, ms(t, 100)));
        // Contact bounce inside the window
        assert!(!d.sample(Level::High, ms(t, 102)));
        assert!(!d.sample(Level::Low, ms(t, 104)));
        assert!(!d.sample(Level::High, ms(t, 110)));
        assert!(!d.sample(Level::Low, ms(t, 120)));
        assert_eq!(d.stable(), Some(Level::Low));

        // Release, then a second real press
        assert!(!d.sample(Level::High, ms(t, 300)));
        assert!(d.sample(Level::Low, ms(t, 600)));
    }

    #[test]
    fn test_only_active_edge_counts() {
        let mut d = Debouncer::new(WINDOW, Level::High);
        let t = Instant::now();
        assert!(!d.sample(Level::High, t));
        assert!(!d.sample(Level::Low, ms(t, 50)));
        assert!(d.sample(Level::High, ms(t, 100)));
    }

    #[test]
    fn test_first_sample_is_baseline() {
        let mut d = Debouncer::new(WINDOW, Level::Low);
        // Button held at boot is not a press
        assert!(!d.sample(Level::Low, Instant::now()));
        assert_eq!(d.stable(), Some(Level::Low));
    }

    proptest! {
        #[test]
        fn prop_at_most_one_press_per_window(
            steps in prop::collection::vec((0u64..40_000, any::<bool>()), 1..300)
        ) {
            let mut d = Debouncer::new(WINDOW, Level::Low);
            let start = Instant::now();
            let mut now = start;
            let mut presses: Vec<Instant> = Vec::new();

            for (delta_us, high) in steps {
                now += Duration::from_micros(delta_us);
                let level = if high { Level::High } else { Level::Low };
                if d.sample(level, now) {
                    presses.push(now);
                }
            }

            for pair in presses.windows(2) {
                prop_assert!(pair[1].duration_since(pair[0]) >= WINDOW);
            }
        }
    }

    fn monitor(pin: &RecordingPin, gate: SessionGate) -> (DoorbellMonitor<RecordingPin>, Arc<AtomicUsize>) {
        let config = Config::default();
        let mut monitor = DoorbellMonitor::new(pin.clone(), &config, gate);
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        monitor.on_press(move |event| {
            assert_eq!(event.source, PressSource::Button);
            seen.fetch_add(1, Ordering::Relaxed);
        });
        (monitor, count)
    }

    #[test]
    fn test_busy_gate_suppresses_press() {
        let pin = RecordingPin::new();
        let gate = SessionGate::new();
        let (mut monitor, count) = monitor(&pin, gate.clone());
        let t = Instant::now();

        monitor.poll(Level::High, t);
        let permit = gate.try_begin().unwrap();
        assert!(monitor.poll(Level::Low, ms(t, 100)).is_none());
        monitor.poll(Level::High, ms(t, 300));
        drop(permit);

        assert!(monitor.poll(Level::Low, ms(t, 500)).is_some());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_unopenable_button_pin_is_unavailable() {
        let sysfs = tempfile::tempdir().unwrap();
        std::fs::write(sysfs.path().join("export"), "").unwrap();
        let pin_dir = sysfs.path().join("gpio5");
        std::fs::create_dir(&pin_dir).unwrap();
        std::fs::write(pin_dir.join("value"), "1").unwrap();

        let controller = GpioController::open(sysfs.path()).unwrap();
        let config = Config::default();
        // Another owner already holds the button pin
        let _held = controller.open_output(config.button_pin(), Level::High).unwrap();

        let result = DoorbellMonitor::initialize(&controller, &config, SessionGate::new());
        match result {
            Err(HardwareError::Unavailable(reason)) => assert!(reason.contains("button pin 5")),
            Err(other) => panic!("expected Unavailable, got {other}"),
            Ok(_) => panic!("pin opened twice"),
        }
    }

    #[tokio::test]
    async fn test_run_emits_press_and_stops() {
        let pin = RecordingPin::new();
        pin.set_input(Level::High);
        let (monitor, count) = monitor(&pin, SessionGate::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(monitor.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        pin.set_input(Level::Low);
        tokio::time::sleep(Duration::from_millis(60)).await;
        pin.set_input(Level::High);
        tokio::time::sleep(Duration::from_millis(60)).await;

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
