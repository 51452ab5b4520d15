//! Linux sysfs GPIO backend
//!
//! Pins are exported through `<root>/export` and driven through
//! `<root>/gpioN/value`. Each pin implements the `embedded-hal` digital traits
//! so drivers stay generic over the pin type.
//!
//! The controller keeps a claim registry: a pin number can be opened once per
//! process lifetime.

use crate::domain::error::HardwareError;
use crate::domain::types::Level;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Attempts while waiting for udev to expose a freshly exported pin
const EXPORT_WAIT_ATTEMPTS: usize = 50;
const EXPORT_WAIT_STEP: Duration = Duration::from_millis(10);

/// Input bias requested for a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    None,
    Up,
}

/// Handle to the GPIO controller
pub struct GpioController {
    root: PathBuf,
    claimed: Mutex<HashSet<u32>>,
}

impl GpioController {
    /// Open the controller rooted at `root` (normally `/sys/class/gpio`)
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, HardwareError> {
        let root = root.into();
        if !root.join("export").exists() {
            return Err(HardwareError::Unavailable(format!(
                "no gpio controller at {}",
                root.display()
            )));
        }
        info!(root = %root.display(), "gpio_controller_opened");
        Ok(Self { root, claimed: Mutex::new(HashSet::new()) })
    }

    /// sysfs cannot configure bias; pull-ups must be external or set by the device tree
    pub fn supports_pull_up(&self) -> bool {
        false
    }

    /// Claim `pin` as an input
    pub fn open_input(&self, pin: u32, pull: Pull) -> Result<SysfsPin, HardwareError> {
        let pull = if pull == Pull::Up && !self.supports_pull_up() {
            warn!(pin = %pin, "gpio_pull_up_unsupported_using_input");
            Pull::None
        } else {
            pull
        };

        let dir = self.claim_and_export(pin)?;
        write_attr(pin, &dir.join("direction"), "in")?;
        // Edge interrupts are not used; the monitor polls the value file.
        let _ = write_attr(pin, &dir.join("edge"), "none");

        let value = open_value(pin, &dir)?;
        info!(pin = %pin, pull = ?pull, "gpio_input_opened");
        Ok(SysfsPin { pin, value, level: Level::Low })
    }

    /// Claim `pin` as an output, driven to `initial` without a glitch
    pub fn open_output(&self, pin: u32, initial: Level) -> Result<SysfsPin, HardwareError> {
        let dir = self.claim_and_export(pin)?;
        // "high"/"low" set direction and initial value in one write
        write_attr(pin, &dir.join("direction"), initial.as_str())?;

        let value = open_value(pin, &dir)?;
        info!(pin = %pin, initial = %initial.as_str(), "gpio_output_opened");
        Ok(SysfsPin { pin, value, level: initial })
    }

    fn claim_and_export(&self, pin: u32) -> Result<PathBuf, HardwareError> {
        if !self.claimed.lock().insert(pin) {
            return Err(HardwareError::PinClaimed(pin));
        }

        let dir = self.root.join(format!("gpio{pin}"));
        if !dir.exists() {
            match write_attr(pin, &self.root.join("export"), &pin.to_string()) {
                Ok(()) => {}
                // Already exported by someone else
                Err(HardwareError::Io { ref source, .. })
                    if source.raw_os_error() == Some(16) => {}
                Err(e) => {
                    self.claimed.lock().remove(&pin);
                    return Err(e);
                }
            }
        }

        // udev may need a moment to expose the attribute files
        for _ in 0..EXPORT_WAIT_ATTEMPTS {
            if dir.join("value").exists() {
                debug!(pin = %pin, "gpio_exported");
                return Ok(dir);
            }
            std::thread::sleep(EXPORT_WAIT_STEP);
        }

        self.claimed.lock().remove(&pin);
        Err(HardwareError::Unavailable(format!("pin {pin} did not appear after export")))
    }
}

fn write_attr(pin: u32, path: &Path, value: &str) -> Result<(), HardwareError> {
    std::fs::write(path, value).map_err(|source| HardwareError::Io { pin, source })
}

fn open_value(pin: u32, dir: &Path) -> Result<File, HardwareError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(dir.join("value"))
        .map_err(|source| HardwareError::Io { pin, source })
}

/// One exported sysfs pin
pub struct SysfsPin {
    pin: u32,
    value: File,
    /// Last level written (outputs) or read (inputs)
    level: Level,
}

impl SysfsPin {
    fn write_level(&mut self, level: Level) -> Result<(), HardwareError> {
        let byte: &[u8] = if level == Level::High { b"1" } else { b"0" };
        self.value.write_at(byte, 0).map_err(|source| HardwareError::Io { pin: self.pin, source })?;
        self.level = level;
        Ok(())
    }

    fn read_level(&mut self) -> Result<Level, HardwareError> {
        let mut buf = [0u8; 1];
        let n = self
            .value
            .read_at(&mut buf, 0)
            .map_err(|source| HardwareError::Io { pin: self.pin, source })?;
        if n == 0 {
            return Err(HardwareError::Io {
                pin: self.pin,
                source: std::io::Error::new(ErrorKind::UnexpectedEof, "empty value file"),
            });
        }
        self.level = if buf[0] == b'1' { Level::High } else { Level::Low };
        Ok(self.level)
    }
}

impl ErrorType for SysfsPin {
    type Error = HardwareError;
}

impl OutputPin for SysfsPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write_level(Level::Low)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write_level(Level::High)
    }
}

impl InputPin for SysfsPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.read_level()? == Level::High)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.read_level()? == Level::Low)
    }
}

/// Drive an output to a logical level
pub fn write_level<P: OutputPin>(pin: &mut P, level: Level) -> Result<(), P::Error> {
    match level {
        Level::High => pin.set_high(),
        Level::Low => pin.set_low(),
    }
}

/// Read an input as a logical level
pub fn read_level<P: InputPin>(pin: &mut P) -> Result<Level, P::Error> {
    Ok(if pin.is_high()? { Level::High } else { Level::Low })
}
