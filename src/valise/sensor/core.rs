// Valise - Weight and climate readings for an instrumented bag
//
// Copyright 2026 The Valise Authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use std::error::Error;
use std::fmt::{self, Formatter};
use std::thread;
use std::time::{Duration, Instant};

use rppal::gpio::{Gpio, IoPin, Level, Mode, PullUpDown};

/// Temperature, in degrees celsius
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct TemperatureCelsius(f64);

impl From<TemperatureCelsius> for f64 {
    fn from(v: TemperatureCelsius) -> Self {
        v.0
    }
}

impl From<f64> for TemperatureCelsius {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for TemperatureCelsius {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}c", self.0)
    }
}

/// Relative humidity (from 0 to 100)
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct Humidity(f64);

impl From<Humidity> for f64 {
    fn from(v: Humidity) -> Self {
        v.0
    }
}

impl From<f64> for Humidity {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for Humidity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Weight, in grams (or whatever unit the load-cell was calibrated against)
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct Grams(f64);

impl From<Grams> for f64 {
    fn from(v: Grams) -> Self {
        v.0
    }
}

impl From<f64> for Grams {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for Grams {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}g", self.0)
    }
}

/// Potential kinds of errors that can be encountered reading from the sensors
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum SensorErrorKind {
    /// Setup didn't happen or didn't work: GPIO pin acquisition failed or an
    /// operation that requires prior calibration was attempted without it.
    NotInitialized,
    /// An expected edge or ready condition didn't occur within the protocol's
    /// fixed timing budget.
    Timeout,
    /// A frame was captured but its integrity check failed.
    Checksum,
    /// A frame passed its integrity check but decoded to a physically
    /// impossible value.
    InvalidData,
}

impl SensorErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            SensorErrorKind::NotInitialized => "not_initialized",
            SensorErrorKind::Timeout => "timeout",
            SensorErrorKind::Checksum => "checksum",
            SensorErrorKind::InvalidData => "invalid_data",
        }
    }
}

/// Error initializing or reading one of the sensors via a GPIO pin
#[derive(Debug)]
pub enum SensorError {
    CheckSum(u8, u8),
    KindMsg(SensorErrorKind, &'static str),
    KindMsgCause(SensorErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl SensorError {
    pub fn kind(&self) -> SensorErrorKind {
        match self {
            SensorError::CheckSum(_, _) => SensorErrorKind::Checksum,
            SensorError::KindMsg(kind, _) => *kind,
            SensorError::KindMsgCause(kind, _, _) => *kind,
        }
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::CheckSum(expected, got) => {
                write!(f, "checksum error: expected {}, got {}", expected, got)
            }
            SensorError::KindMsg(_, msg) => msg.fmt(f),
            SensorError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for SensorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SensorError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Create a new `IoPin` based on the BCM GPIO pin number of one of the sensor
/// wires (DHT22 data, HX711 DOUT, or HX711 SCK).
///
/// Note that the BCM GPIO pin number is NOT the same as the physical pin number.
/// See [pinout] for more information.
///
/// [pinout]: https://www.raspberrypi.com/documentation/computers/os.html#gpio-and-the-40-pin-header
pub fn open_pin(bcm_gpio_pin: u8) -> Result<IoPin, SensorError> {
    let controller = Gpio::new().map_err(|e| {
        SensorError::KindMsgCause(
            SensorErrorKind::NotInitialized,
            "unable to create GPIO controller",
            Box::new(e),
        )
    })?;

    let pin = controller.get(bcm_gpio_pin).map_err(|e| {
        SensorError::KindMsgCause(
            SensorErrorKind::NotInitialized,
            "unable to acquire pin from controller",
            Box::new(e),
        )
    })?;

    let io_pin = pin.into_io(Mode::Input);
    Ok(io_pin)
}

/// Create a new `IoPin` with the internal pull-up resistor enabled, as required
/// by the DHT22 data line which idles high between transactions.
pub fn open_pin_pullup(bcm_gpio_pin: u8) -> Result<IoPin, SensorError> {
    let mut io_pin = open_pin(bcm_gpio_pin)?;
    io_pin.set_pullupdown(PullUpDown::PullUp);
    Ok(io_pin)
}

/// Abstraction around an `rppal::gpio::IoPin` to allow for easier testing.
pub trait DataPin {
    fn is_low(&self) -> bool;
    fn is_high(&self) -> bool;
    fn pin(&self) -> u8;
    fn set_high(&mut self);
    fn set_low(&mut self);
    fn set_mode(&mut self, mode: Mode);
}

impl DataPin for IoPin {
    fn is_low(&self) -> bool {
        IoPin::is_low(self)
    }

    fn is_high(&self) -> bool {
        IoPin::is_high(self)
    }

    fn pin(&self) -> u8 {
        IoPin::pin(self)
    }

    fn set_high(&mut self) {
        IoPin::set_high(self);
    }

    fn set_low(&mut self) {
        IoPin::set_low(self);
    }

    fn set_mode(&mut self, mode: Mode) {
        IoPin::set_mode(self, mode);
    }
}

/// Monotonic time source and busy-sleep used by the protocol drivers.
///
/// Both sensor protocols are decoded by timing edges with microsecond
/// resolution, so the drivers never touch `SystemTime` or tokio timers; they
/// take one of these instead, which also lets tests drive the protocols
/// against a deterministic virtual clock.
pub trait Clock {
    /// Microseconds since some fixed, arbitrary point in the past.
    fn now_micros(&self) -> u64;
    /// Milliseconds since the same point as `now_micros`.
    fn now_millis(&self) -> u64;
    fn sleep_micros(&self, micros: u64);
    fn sleep_millis(&self, millis: u64);
}

/// `Clock` implementation over `std::time::Instant` and `thread::sleep`.
#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn sleep_micros(&self, micros: u64) {
        thread::sleep(Duration::from_micros(micros));
    }

    fn sleep_millis(&self, millis: u64) {
        thread::sleep(Duration::from_millis(millis));
    }
}

/// Busy-poll `pin` until it reads `level`, or until `timeout_us` microseconds
/// elapse on `clock`, in which case a `Timeout` error carrying `msg` is
/// returned.
///
/// This is the single primitive both protocol drivers are built on. It holds
/// no state and is reentrant; its only side effect is consuming wall-clock
/// time. The pin is checked before the deadline so a timeout of zero still
/// performs one read.
pub fn wait_for_level(
    pin: &dyn DataPin,
    clock: &dyn Clock,
    level: Level,
    timeout_us: u64,
    msg: &'static str,
) -> Result<(), SensorError> {
    let start = clock.now_micros();
    loop {
        let at_level = match level {
            Level::Low => pin.is_low(),
            Level::High => pin.is_high(),
        };

        if at_level {
            return Ok(());
        }

        if clock.now_micros().saturating_sub(start) > timeout_us {
            return Err(SensorError::KindMsg(SensorErrorKind::Timeout, msg));
        }
    }
}

#[cfg(test)]
mod test {
    use super::{wait_for_level, SensorErrorKind};
    use crate::sensor::test::{SimClock, StuckPin};
    use rppal::gpio::Level;
    use std::sync::Arc;

    #[test]
    fn test_wait_for_level_already_at_level() {
        let clock = Arc::new(SimClock::new());
        let pin = StuckPin::new(Level::High);

        let before = clock.micros();
        let res = wait_for_level(&pin, clock.as_ref(), Level::High, 200, "unused");

        assert!(res.is_ok());
        // One deadline computation, no polling iterations
        assert!(clock.micros() - before <= 1);
    }

    #[test]
    fn test_wait_for_level_timeout() {
        let clock = Arc::new(SimClock::new());
        let pin = StuckPin::new(Level::High);

        let before = clock.micros();
        let res = wait_for_level(&pin, clock.as_ref(), Level::Low, 200, "edge never came");

        assert_eq!(SensorErrorKind::Timeout, res.unwrap_err().kind());
        // The watcher must give up shortly after the budget, not spin forever
        let elapsed = clock.micros() - before;
        assert!(elapsed > 200 && elapsed < 250, "elapsed: {}", elapsed);
    }
}
