//! Door actuator: electric lock pin plus servo
//!
//! One unlock cycle releases the lock, swings the servo open, holds, swings it
//! closed and re-engages the lock. The relock step runs even when an earlier
//! step failed, so the door never stays released after a cycle.

use crate::domain::types::Level;
use crate::io::gpio::write_level;
use crate::services::pwm::{PulseReport, PulseSpec, SoftPwm};
use async_trait::async_trait;
use embedded_hal::digital::OutputPin;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// What one unlock cycle actually drove
#[derive(Debug, Clone, Default)]
pub struct UnlockReport {
    pub open: Option<PulseReport>,
    pub closed: Option<PulseReport>,
    pub lock_errors: u32,
    pub elapsed: Duration,
}

#[async_trait]
pub trait DoorActuation: Send + Sync {
    /// Run a full unlock -> open -> hold -> close -> lock cycle
    async fn unlock(&self) -> UnlockReport;
}

pub struct DoorActuator<L, P> {
    lock_pin: Mutex<L>,
    pwm: SoftPwm<P>,
    unlocked_level: Level,
    hold: Duration,
    open_spec: PulseSpec,
    closed_spec: PulseSpec,
}

impl<L, P> DoorActuator<L, P>
where
    L: OutputPin + Send + 'static,
    P: OutputPin + Send + 'static,
{
    /// Take ownership of the pins, lock the door and park the servo closed
    pub fn new(
        lock_pin: L,
        pwm: SoftPwm<P>,
        unlocked_level: Level,
        hold: Duration,
        open_spec: PulseSpec,
        closed_spec: PulseSpec,
    ) -> Self {
        let actuator = Self {
            lock_pin: Mutex::new(lock_pin),
            pwm,
            unlocked_level,
            hold,
            open_spec,
            closed_spec,
        };

        actuator.set_lock(actuator.locked_level());
        match actuator.pwm.drive_pulse_train(closed_spec) {
            Ok(_train) => info!("door_servo_parking_closed"),
            Err(e) => error!(error = %e, "door_servo_park_failed"),
        }

        actuator
    }

    pub fn locked_level(&self) -> Level {
        self.unlocked_level.inverted()
    }

    fn set_lock(&self, level: Level) -> bool {
        let state = if level == self.unlocked_level { "unlocked" } else { "locked" };
        match write_level(&mut *self.lock_pin.lock(), level) {
            Ok(()) => {
                info!(state = state, level = %level.as_str(), "door_lock_set");
                true
            }
            Err(e) => {
                warn!(state = state, error = ?e, "door_lock_write_failed");
                false
            }
        }
    }

    async fn swing(&self, spec: PulseSpec) -> Option<PulseReport> {
        let train = match self.pwm.drive_pulse_train(spec) {
            Ok(train) => train,
            Err(e) => {
                error!(spec = spec.name(), error = %e, "door_servo_spawn_failed");
                return None;
            }
        };

        let report = train.finished().await;
        if report.is_none() {
            error!(spec = spec.name(), "door_servo_train_lost");
        }
        report
    }
}

#[async_trait]
impl<L, P> DoorActuation for DoorActuator<L, P>
where
    L: OutputPin + Send + 'static,
    P: OutputPin + Send + 'static,
{
    async fn unlock(&self) -> UnlockReport {
        let started = Instant::now();
        let mut report = UnlockReport::default();

        if !self.set_lock(self.unlocked_level) {
            report.lock_errors += 1;
        }
        report.open = self.swing(self.open_spec).await;

        tokio::time::sleep(self.hold).await;

        report.closed = self.swing(self.closed_spec).await;
        if !self.set_lock(self.locked_level()) {
            report.lock_errors += 1;
        }

        report.elapsed = started.elapsed();
        info!(
            elapsed_ms = %report.elapsed.as_millis(),
            hold_ms = %self.hold.as_millis(),
            lock_errors = %report.lock_errors,
            "door_cycle_complete"
        );
        report
    }
}
