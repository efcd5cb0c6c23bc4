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

use crate::sensor::core::{
    wait_for_level, Clock, DataPin, Humidity, SensorError, SensorErrorKind, SystemClock, TemperatureCelsius,
};
use rppal::gpio::{Level, Mode};
use std::fmt::{Debug, Formatter};

pub(crate) const DATA_SIZE: usize = 5;
pub(crate) const DATA_BITS: usize = DATA_SIZE * 8;

/// Protocol timing for the DHT22 one-wire-style data line.
///
/// The defaults are the datasheet values. They are injected at construction
/// rather than hardcoded in the protocol logic so tests can shrink the
/// timeouts and drive the decoder from a simulated pin.
#[derive(Debug, Clone, Copy)]
pub struct DHT22Timing {
    /// How long the host holds the line low to wake the sensor, in microseconds
    pub start_signal_low_us: u64,
    /// How long the host drives the line high before releasing it, in microseconds
    pub start_signal_high_us: u64,
    /// Budget for each edge of the response handshake and of every data bit,
    /// in microseconds
    pub response_timeout_us: u64,
    /// High pulses strictly longer than this are decoded as a 1 bit, in microseconds
    pub bit_threshold_us: u64,
    /// Datasheet-mandated floor between reads, in milliseconds
    pub min_read_interval_ms: u64,
}

impl Default for DHT22Timing {
    fn default() -> Self {
        Self {
            start_signal_low_us: 18_000,
            start_signal_high_us: 30,
            response_timeout_us: 200,
            bit_threshold_us: 50,
            min_read_interval_ms: 2_000,
        }
    }
}

/// Durations, in microseconds, that the sensor held the data line high for
/// each of the 40 bits of a transmission.
///
/// The sensor precedes every bit with a fixed-length low period, then encodes
/// the bit's value in how long it holds the line high. Capturing only the high
/// durations is therefore enough to recover the payload.
#[derive(Debug)]
struct Pulses {
    highs: [u64; DATA_BITS],
}

impl Pulses {
    /// Time the high pulse of each of the 40 data bits on the wire.
    ///
    /// An error is returned if any rising or falling edge fails to arrive
    /// within the per-edge budget. The read will have to be retried in this
    /// case.
    ///
    /// NOTE: This method assumes the start signal has been sent and the
    /// sensor's response handshake has been consumed, leaving the line in the
    /// low preamble of the first bit.
    fn capture(pin: &dyn DataPin, clock: &dyn Clock, timing: &DHT22Timing) -> Result<Self, SensorError> {
        let mut highs = [0u64; DATA_BITS];

        for slot in highs.iter_mut() {
            wait_for_level(
                pin,
                clock,
                Level::High,
                timing.response_timeout_us,
                "timeout waiting for bit start",
            )?;
            let rise = clock.now_micros();

            wait_for_level(
                pin,
                clock,
                Level::Low,
                timing.response_timeout_us,
                "timeout waiting for bit end",
            )?;
            *slot = clock.now_micros().saturating_sub(rise);
        }

        tracing::trace!(message = "captured high pulse durations", highs = ?highs);
        Ok(Self { highs })
    }
}

/// The 5 bytes transmitted by the sensor per read: humidity high/low,
/// temperature high/low, checksum.
#[derive(Debug)]
struct Frame {
    bytes: [u8; DATA_SIZE],
}

impl Frame {
    /// Classify each high pulse against the threshold and pack the bits
    /// most-significant-bit first, byte-major.
    fn from_pulses(pulses: &Pulses, threshold_us: u64) -> Self {
        let mut bytes = [0u8; DATA_SIZE];

        for (i, &high_us) in pulses.highs.iter().enumerate() {
            let index = i / 8;
            bytes[index] <<= 1;

            if high_us > threshold_us {
                bytes[index] |= 1;
            }
        }

        Self { bytes }
    }

    fn verify_checksum(&self) -> Result<(), SensorError> {
        // From the DHT22 datasheet:
        // > If the data transmission is right, check-sum should be the last 8 bit of
        // > "8 bit integral RH data+8 bit decimal RH data+8 bit integral T data+8 bit
        // > decimal T data".
        let expected = self.bytes[4];
        let computed =
            ((self.bytes[0] as u16 + self.bytes[1] as u16 + self.bytes[2] as u16 + self.bytes[3] as u16) & 0xFF) as u8;

        tracing::debug!(
            message = "computing checksum for sensor data",
            computed = computed,
            expected = expected
        );

        if computed != expected {
            Err(SensorError::CheckSum(expected, computed))
        } else {
            Ok(())
        }
    }

    /// Convert the frame into temperature and humidity measurements.
    ///
    /// A frame that passes its checksum can still carry garbage (a marginal
    /// pulse misread as the wrong bit in both the payload and the checksum),
    /// so values outside the sensor's physical range are rejected rather than
    /// reported.
    fn decode(&self) -> Result<(TemperatureCelsius, Humidity), SensorError> {
        // See https://cdn-shop.adafruit.com/datasheets/Digital+humidity+and+temperature+sensor+AM2302.pdf
        // first two bytes are humidity as a big-endian u16 * 10
        let humidity_raw = u16::from_be_bytes([self.bytes[0], self.bytes[1]]);
        // second two bytes are temperature as a big-endian 15 bit magnitude * 10,
        // with the highest bit indicating sign
        let temp_raw = u16::from_be_bytes([self.bytes[2] & 0b0111_1111, self.bytes[3]]);

        let humidity = humidity_raw as f64 / 10.0;
        let mut temperature = temp_raw as f64 / 10.0;
        if self.bytes[2] & 0b1000_0000 > 0 {
            temperature = -temperature;
        }

        tracing::debug!(
            message = "parsed sensor data",
            raw_temperature = temp_raw,
            raw_humidity = humidity_raw,
            temperature = temperature,
            humidity = humidity
        );

        if !(0.0..=100.0).contains(&humidity) || !(-40.0..=80.0).contains(&temperature) {
            return Err(SensorError::KindMsg(
                SensorErrorKind::InvalidData,
                "decoded values outside sensor's physical range",
            ));
        }

        Ok((TemperatureCelsius::from(temperature), Humidity::from(humidity)))
    }
}

/// Read temperature in degrees celsius and relative humidity from a DHT22
/// sensor.
///
/// The driver owns its data pin and timing configuration; constructing it is
/// what the underlying protocol thinks of as "init", so a read on a driver
/// that doesn't exist yet is not representable. Any failed read leaves the
/// driver ready for another attempt.
pub struct DHT22Sensor {
    pin: Box<dyn DataPin + Send + Sync + 'static>,
    clock: Box<dyn Clock + Send + Sync + 'static>,
    timing: DHT22Timing,
    last_read_ms: Option<u64>,
}

impl DHT22Sensor {
    /// Create a driver using the system monotonic clock and datasheet timing.
    ///
    /// The pin should have its pull-up enabled (see `open_pin_pullup`) since
    /// the data line idles high between transactions.
    pub fn from_pin<T>(pin: T) -> Self
    where
        T: DataPin + Send + Sync + 'static,
    {
        Self::with_clock(pin, SystemClock::new(), DHT22Timing::default())
    }

    pub fn with_clock<T, C>(pin: T, clock: C, timing: DHT22Timing) -> Self
    where
        T: DataPin + Send + Sync + 'static,
        C: Clock + Send + Sync + 'static,
    {
        Self {
            pin: Box::new(pin),
            clock: Box::new(clock),
            timing,
            last_read_ms: None,
        }
    }

    /// Block until the datasheet's minimum interval since the previous
    /// transaction has elapsed.
    ///
    /// Reading the sensor more often than every 2 seconds yields stale or
    /// corrupt data, so this floor is a protocol requirement and is honored
    /// even though it can stall the caller for most of those 2 seconds.
    fn enforce_read_interval(&self) {
        if let Some(last_ms) = self.last_read_ms {
            let elapsed = self.clock.now_millis().saturating_sub(last_ms);
            if elapsed < self.timing.min_read_interval_ms {
                let remaining = self.timing.min_read_interval_ms - elapsed;
                tracing::debug!(message = "enforcing minimum read interval", wait_ms = remaining);
                self.clock.sleep_millis(remaining);
            }
        }
    }

    fn send_start_signal(&mut self) {
        // Host-initiated handshake: drive the line low long enough for the
        // sensor to notice, pull it high briefly, then release it back to
        // input so the sensor can answer.
        self.pin.set_mode(Mode::Output);
        self.pin.set_low();
        self.clock.sleep_micros(self.timing.start_signal_low_us);
        self.pin.set_high();
        self.clock.sleep_micros(self.timing.start_signal_high_us);
        self.pin.set_mode(Mode::Input);
    }

    fn await_response(&self) -> Result<(), SensorError> {
        let pin = self.pin.as_ref();
        let clock = self.clock.as_ref();
        let budget = self.timing.response_timeout_us;

        // The sensor acknowledges the start signal by pulling the line low,
        // then high, then low again. The final low is the preamble of the
        // first data bit.
        wait_for_level(pin, clock, Level::Low, budget, "timeout waiting for response low")?;
        wait_for_level(pin, clock, Level::High, budget, "timeout waiting for response high")?;
        wait_for_level(pin, clock, Level::Low, budget, "timeout waiting for response end")?;
        Ok(())
    }

    /// Read temperature and humidity from the sensor or return an error if the
    /// read failed with details about what caused the read to fail.
    ///
    /// Blocks until at least 2 seconds have passed since the previous
    /// transaction before touching the wire.
    pub fn read(&mut self) -> Result<(TemperatureCelsius, Humidity), SensorError> {
        self.enforce_read_interval();
        self.send_start_signal();
        self.await_response()?;

        let pulses = Pulses::capture(self.pin.as_ref(), self.clock.as_ref(), &self.timing)?;

        // The interval floor is measured from the last transaction that got as
        // far as transferring bits, whether or not those bits turn out valid,
        // so the timestamp is recorded before checksum and range validation.
        self.last_read_ms = Some(self.clock.now_millis());

        let frame = Frame::from_pulses(&pulses, self.timing.bit_threshold_us);
        frame.verify_checksum()?;
        frame.decode()
    }
}

impl Debug for DHT22Sensor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DHT22Sensor")
            .field("pin", &self.pin.pin())
            .field("timing", &self.timing)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::{DHT22Sensor, DHT22Timing, Frame, Pulses, DATA_BITS, DATA_SIZE};
    use crate::sensor::core::{Humidity, SensorErrorKind, TemperatureCelsius};
    use crate::sensor::test::{SimClock, SimDhtPin};
    use std::sync::Arc;

    // 50.0% relative humidity, 20.0 degrees, valid checksum
    const VALID_FRAME: [u8; DATA_SIZE] = [0x01, 0xF4, 0x00, 0xC8, 0xBD];

    fn frame(bytes: [u8; DATA_SIZE]) -> Frame {
        Frame { bytes }
    }

    fn checksummed(mut bytes: [u8; DATA_SIZE]) -> [u8; DATA_SIZE] {
        bytes[4] = bytes[0].wrapping_add(bytes[1]).wrapping_add(bytes[2]).wrapping_add(bytes[3]);
        bytes
    }

    #[test]
    fn test_frame_from_pulses_threshold_boundary() {
        // 49us is a 0 bit, 51us is a 1 bit, and exactly 50us stays a 0 bit
        let mut highs = [0u64; DATA_BITS];
        highs[0] = 51;
        highs[1] = 49;
        highs[2] = 50;
        highs[3] = 51;

        let frame = Frame::from_pulses(&Pulses { highs }, 50);
        assert_eq!(0b1001_0000, frame.bytes[0]);
        assert_eq!(&[0u8; 4], &frame.bytes[1..]);
    }

    #[test]
    fn test_frame_checksum_valid() {
        assert!(frame(VALID_FRAME).verify_checksum().is_ok());

        // The sum is truncated mod 256
        let overflowing = checksummed([0xFF, 0xFF, 0xFF, 0xFF, 0x00]);
        assert_eq!(0xFC, overflowing[4]);
        assert!(frame(overflowing).verify_checksum().is_ok());
    }

    #[test]
    fn test_frame_checksum_invalid() {
        let mut bytes = VALID_FRAME;
        bytes[4] = bytes[4].wrapping_add(1);

        let res = frame(bytes).verify_checksum();
        assert_eq!(SensorErrorKind::Checksum, res.unwrap_err().kind());
    }

    #[test]
    fn test_frame_decode_positive_temp() {
        let (t, h) = frame(VALID_FRAME).decode().unwrap();
        assert_eq!(TemperatureCelsius::from(20.0), t);
        assert_eq!(Humidity::from(50.0), h);
    }

    #[test]
    fn test_frame_decode_negative_temp() {
        // Same magnitude as the positive case but with the sign bit set
        let (t, h) = frame([0x01, 0xF4, 0x80, 0xC8, 0x3D]).decode().unwrap();
        assert_eq!(TemperatureCelsius::from(-20.0), t);
        assert_eq!(Humidity::from(50.0), h);
    }

    #[test]
    fn test_frame_decode_humidity_out_of_range() {
        // 150.0% humidity with a correct checksum
        let bytes = checksummed([0x05, 0xDC, 0x00, 0xC8, 0x00]);
        let res = frame(bytes).decode();
        assert_eq!(SensorErrorKind::InvalidData, res.unwrap_err().kind());
    }

    #[test]
    fn test_frame_decode_temperature_out_of_range() {
        // 90.0 degrees with a correct checksum
        let bytes = checksummed([0x01, 0xF4, 0x03, 0x84, 0x00]);
        let res = frame(bytes).decode();
        assert_eq!(SensorErrorKind::InvalidData, res.unwrap_err().kind());
    }

    #[test]
    fn test_dht22_sensor_read_valid() {
        let clock = Arc::new(SimClock::new());
        let pin = SimDhtPin::new(clock.clone(), VALID_FRAME);
        let mut sensor = DHT22Sensor::with_clock(pin, clock, DHT22Timing::default());

        let (t, h) = sensor.read().unwrap();
        assert_eq!(TemperatureCelsius::from(20.0), t);
        assert_eq!(Humidity::from(50.0), h);
    }

    #[test]
    fn test_dht22_sensor_read_checksum_error() {
        let mut bytes = VALID_FRAME;
        bytes[4] = bytes[4].wrapping_add(1);

        let clock = Arc::new(SimClock::new());
        let pin = SimDhtPin::new(clock.clone(), bytes);
        let mut sensor = DHT22Sensor::with_clock(pin, clock, DHT22Timing::default());

        let res = sensor.read();
        assert_eq!(SensorErrorKind::Checksum, res.unwrap_err().kind());
    }

    #[test]
    fn test_dht22_sensor_timeout_then_retry() {
        let clock = Arc::new(SimClock::new());
        // The sensor stays silent for the first transaction and answers the second
        let pin = SimDhtPin::silent(clock.clone(), VALID_FRAME, 1);
        let mut sensor = DHT22Sensor::with_clock(pin, clock, DHT22Timing::default());

        let res = sensor.read();
        assert_eq!(SensorErrorKind::Timeout, res.unwrap_err().kind());

        // A timed-out read never transferred bits, so the retry is not rate
        // limited and the driver is still usable.
        let (t, h) = sensor.read().unwrap();
        assert_eq!(TemperatureCelsius::from(20.0), t);
        assert_eq!(Humidity::from(50.0), h);
    }

    #[test]
    fn test_dht22_sensor_read_interval_enforced() {
        let clock = Arc::new(SimClock::new());
        let pin = SimDhtPin::new(clock.clone(), VALID_FRAME);
        let mut sensor = DHT22Sensor::with_clock(pin, clock.clone(), DHT22Timing::default());

        sensor.read().unwrap();
        let after_first = clock.micros();

        // A second read issued immediately must wait out the rest of the
        // 2000ms floor before starting its transaction.
        sensor.read().unwrap();
        let after_second = clock.micros();

        assert!(
            after_second - after_first >= 2_000_000,
            "only {}us between reads",
            after_second - after_first
        );
    }

    #[test]
    fn test_dht22_sensor_checksum_failure_still_rate_limited() {
        let mut bytes = VALID_FRAME;
        bytes[4] = bytes[4].wrapping_add(1);

        let clock = Arc::new(SimClock::new());
        let pin = SimDhtPin::new(clock.clone(), bytes);
        let mut sensor = DHT22Sensor::with_clock(pin, clock.clone(), DHT22Timing::default());

        assert_eq!(SensorErrorKind::Checksum, sensor.read().unwrap_err().kind());
        let after_first = clock.micros();

        // Bits were transferred even though they didn't validate, so the
        // interval floor applies to the next attempt.
        assert_eq!(SensorErrorKind::Checksum, sensor.read().unwrap_err().kind());
        let after_second = clock.micros();

        assert!(
            after_second - after_first >= 2_000_000,
            "only {}us between reads",
            after_second - after_first
        );
    }
}
