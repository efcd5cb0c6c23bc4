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

use crate::sensor::core::{wait_for_level, Clock, DataPin, Grams, SensorError, SensorErrorKind, SystemClock};
use rppal::gpio::{Level, Mode};
use std::fmt::{Debug, Formatter};

const SAMPLE_BITS: u32 = 24;

/// Gain and input channel selection for the amplifier.
///
/// The HX711 has no configuration registers; the number of clock pulses sent
/// beyond the 24 data bits selects the gain and channel of the *next*
/// conversion (25 total pulses for channel A at gain 128, 26 for channel B at
/// gain 32, 27 for channel A at gain 64).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HX711Gain {
    #[default]
    Gain128,
    Gain32ChannelB,
    Gain64,
}

impl HX711Gain {
    fn extra_pulses(&self) -> u32 {
        match self {
            HX711Gain::Gain128 => 1,
            HX711Gain::Gain32ChannelB => 2,
            HX711Gain::Gain64 => 3,
        }
    }
}

/// Protocol timing for the amplifier's clocked serial interface.
#[derive(Debug, Clone, Copy)]
pub struct HX711Timing {
    /// Budget for DOUT to signal conversion-ready, in microseconds. The chip
    /// produces 10 samples per second in its slow rate mode, so the default
    /// covers several conversion periods before declaring the sensor
    /// unresponsive or disconnected.
    pub ready_timeout_us: u64,
    /// Half of the shift-clock period, in microseconds
    pub clock_half_period_us: u64,
}

impl Default for HX711Timing {
    fn default() -> Self {
        Self {
            ready_timeout_us: 500_000,
            clock_half_period_us: 1,
        }
    }
}

/// Read raw 24 bit samples from an HX711 load-cell amplifier and convert them
/// to weights through a linear calibration.
///
/// The driver owns both wires of the serial interface: DOUT (input) and SCK
/// (output). The scale factor is per-instance state, set by `calibrate` or
/// `set_scale_factor` and required by `weight`; it is volatile, so a caller
/// that wants calibration to survive restarts must store the factor itself.
pub struct HX711Scale {
    data_pin: Box<dyn DataPin + Send + Sync + 'static>,
    clock_pin: Box<dyn DataPin + Send + Sync + 'static>,
    clock: Box<dyn Clock + Send + Sync + 'static>,
    timing: HX711Timing,
    gain: HX711Gain,
    scale_factor: f64,
}

impl HX711Scale {
    /// Create a driver from the DOUT and SCK pins, using the system monotonic
    /// clock, datasheet timing, and channel A at gain 128.
    pub fn from_pins<D, S>(data_pin: D, clock_pin: S) -> Self
    where
        D: DataPin + Send + Sync + 'static,
        S: DataPin + Send + Sync + 'static,
    {
        Self::with_clock(data_pin, clock_pin, SystemClock::new(), HX711Timing::default(), HX711Gain::default())
    }

    pub fn with_clock<D, S, C>(
        mut data_pin: D,
        mut clock_pin: S,
        clock: C,
        timing: HX711Timing,
        gain: HX711Gain,
    ) -> Self
    where
        D: DataPin + Send + Sync + 'static,
        S: DataPin + Send + Sync + 'static,
        C: Clock + Send + Sync + 'static,
    {
        data_pin.set_mode(Mode::Input);
        clock_pin.set_mode(Mode::Output);
        // SCK idles low; holding it high for more than 60us powers the chip down
        clock_pin.set_low();

        Self {
            data_pin: Box::new(data_pin),
            clock_pin: Box::new(clock_pin),
            clock: Box::new(clock),
            timing,
            gain,
            scale_factor: 0.0,
        }
    }

    /// Shift one raw sample out of the amplifier, sign-extended from 24 bits.
    ///
    /// Blocks until DOUT drops low to signal that a conversion is ready, then
    /// toggles SCK 24 times, sampling DOUT on each high half-period to
    /// assemble the value most-significant-bit first, and finally sends the
    /// gain/channel-select pulses for the next conversion. A `Timeout` error
    /// means the amplifier never signalled ready (unresponsive or
    /// disconnected); the driver remains usable for another attempt.
    pub fn read_raw(&mut self) -> Result<i32, SensorError> {
        wait_for_level(
            self.data_pin.as_ref(),
            self.clock.as_ref(),
            Level::Low,
            self.timing.ready_timeout_us,
            "timeout waiting for conversion ready",
        )?;

        let mut raw: i32 = 0;
        for _ in 0..SAMPLE_BITS {
            self.clock_pin.set_high();
            self.clock.sleep_micros(self.timing.clock_half_period_us);
            raw = (raw << 1) | i32::from(self.data_pin.is_high());
            self.clock_pin.set_low();
            self.clock.sleep_micros(self.timing.clock_half_period_us);
        }

        for _ in 0..self.gain.extra_pulses() {
            self.clock_pin.set_high();
            self.clock.sleep_micros(self.timing.clock_half_period_us);
            self.clock_pin.set_low();
            self.clock.sleep_micros(self.timing.clock_half_period_us);
        }

        // The sample is 24 bit two's complement
        if raw & 0x0080_0000 != 0 {
            raw |= !0x00FF_FFFF;
        }

        tracing::debug!(message = "read raw load-cell sample", raw = raw);
        Ok(raw)
    }

    /// Derive and store the scale factor from a raw reading taken with a known
    /// weight applied: raw counts per unit of weight.
    ///
    /// A zero or negative reference weight would produce a nonsense factor and
    /// a silent divide-by-zero downstream, so it is rejected here at the
    /// boundary.
    pub fn calibrate(&mut self, known_weight_reading: i32, actual_weight: f64) -> Result<(), SensorError> {
        if !actual_weight.is_finite() || actual_weight <= 0.0 {
            return Err(SensorError::KindMsg(
                SensorErrorKind::InvalidData,
                "calibration weight must be positive",
            ));
        }

        self.scale_factor = known_weight_reading as f64 / actual_weight;
        tracing::debug!(
            message = "calibrated scale",
            reading = known_weight_reading,
            weight = actual_weight,
            scale_factor = self.scale_factor
        );
        Ok(())
    }

    /// Restore a scale factor computed by a previous calibration.
    pub fn set_scale_factor(&mut self, scale_factor: f64) -> Result<(), SensorError> {
        if !scale_factor.is_finite() || scale_factor <= 0.0 {
            return Err(SensorError::KindMsg(
                SensorErrorKind::InvalidData,
                "scale factor must be positive",
            ));
        }

        self.scale_factor = scale_factor;
        Ok(())
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale_factor
    }

    /// Convert a raw reading to a weight using the stored scale factor.
    pub fn weight(&self, reading: i32) -> Result<Grams, SensorError> {
        if self.scale_factor == 0.0 {
            return Err(SensorError::KindMsg(
                SensorErrorKind::NotInitialized,
                "scale factor not set, calibrate first",
            ));
        }

        Ok(Grams::from(reading as f64 / self.scale_factor))
    }
}

impl Debug for HX711Scale {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HX711Scale")
            .field("data_pin", &self.data_pin.pin())
            .field("clock_pin", &self.clock_pin.pin())
            .field("gain", &self.gain)
            .field("scale_factor", &self.scale_factor)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::{HX711Gain, HX711Scale, HX711Timing};
    use crate::sensor::core::{Grams, SensorErrorKind};
    use crate::sensor::test::{sim_adc_pins, SimClock};
    use std::sync::Arc;

    fn scale_at(clock: Arc<SimClock>, ready_at_us: u64, sample: u32) -> HX711Scale {
        let (data, sck) = sim_adc_pins(clock.clone(), ready_at_us, sample);
        HX711Scale::with_clock(data, sck, clock, HX711Timing::default(), HX711Gain::default())
    }

    #[test]
    fn test_read_raw_positive() {
        let clock = Arc::new(SimClock::new());
        let mut scale = scale_at(clock, 100, 0x00_0064);

        assert_eq!(100, scale.read_raw().unwrap());
    }

    #[test]
    fn test_read_raw_sign_extension() {
        let clock = Arc::new(SimClock::new());
        let mut scale = scale_at(clock, 100, 0xFF_FFFF);

        assert_eq!(-1, scale.read_raw().unwrap());
    }

    #[test]
    fn test_read_raw_most_negative() {
        let clock = Arc::new(SimClock::new());
        let mut scale = scale_at(clock, 100, 0x80_0000);

        assert_eq!(-8_388_608, scale.read_raw().unwrap());
    }

    #[test]
    fn test_read_raw_timeout_then_retry() {
        let clock = Arc::new(SimClock::new());
        let (data, sck) = sim_adc_pins(clock.clone(), 900, 0x00_0064);
        let timing = HX711Timing {
            ready_timeout_us: 500,
            clock_half_period_us: 1,
        };
        let mut scale = HX711Scale::with_clock(data, sck, clock, timing, HX711Gain::default());

        // The conversion isn't ready within the budget for the first attempt
        let res = scale.read_raw();
        assert_eq!(SensorErrorKind::Timeout, res.unwrap_err().kind());

        // By the second attempt enough virtual time has passed for DOUT to
        // have dropped, so the same driver instance recovers.
        assert_eq!(100, scale.read_raw().unwrap());
    }

    #[test]
    fn test_gain_pulses_sent() {
        let clock = Arc::new(SimClock::new());
        let (data, sck) = sim_adc_pins(clock.clone(), 0, 0x00_0064);
        let pulses = sck.pulse_counter();
        let mut scale = HX711Scale::with_clock(data, sck, clock, HX711Timing::default(), HX711Gain::Gain128);

        scale.read_raw().unwrap();

        // 24 data pulses plus one gain/channel-select pulse for gain 128
        assert_eq!(25, pulses.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_calibrate_and_weight() {
        let clock = Arc::new(SimClock::new());
        let mut scale = scale_at(clock, 0, 0);

        scale.calibrate(1000, 5.0).unwrap();
        assert_eq!(200.0, scale.scale_factor());
        assert_eq!(Grams::from(2.0), scale.weight(400).unwrap());
    }

    #[test]
    fn test_calibrate_rejects_non_positive_weight() {
        let clock = Arc::new(SimClock::new());
        let mut scale = scale_at(clock, 0, 0);

        let res = scale.calibrate(1000, 0.0);
        assert_eq!(SensorErrorKind::InvalidData, res.unwrap_err().kind());

        let res = scale.calibrate(1000, -2.5);
        assert_eq!(SensorErrorKind::InvalidData, res.unwrap_err().kind());
    }

    #[test]
    fn test_weight_requires_calibration() {
        let clock = Arc::new(SimClock::new());
        let scale = scale_at(clock, 0, 0);

        let res = scale.weight(400);
        assert_eq!(SensorErrorKind::NotInitialized, res.unwrap_err().kind());
    }

    #[test]
    fn test_set_scale_factor() {
        let clock = Arc::new(SimClock::new());
        let mut scale = scale_at(clock, 0, 0);

        assert!(scale.set_scale_factor(0.0).is_err());
        scale.set_scale_factor(200.0).unwrap();
        assert_eq!(Grams::from(2.0), scale.weight(400).unwrap());
    }
}
