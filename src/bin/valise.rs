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

use clap::Parser;
use std::time::Duration;
use std::{process, thread};
use tracing::Level;
use valise::sensor::{open_pin, open_pin_pullup, DHT22Sensor, HX711Scale};

const DEFAULT_REFRESH_SECS: u64 = 30;
const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const CALIBRATION_SAMPLES: u32 = 5;

/// Log weight and climate readings from a smart bag's sensors
///
/// Read ambient temperature and humidity from a DHT22 sensor and weight from
/// an HX711 load-cell amplifier, both connected to GPIO pins of a local
/// machine, usually a Raspberry PI, and log the readings periodically.
///
/// The sensors must be connected to General Purpose IO pins (GPIO). The
/// numbering of these pins (and how the pin numbers are provided to valise) is
/// based on the Broadcom SOC channel.
#[derive(Debug, Parser)]
#[clap(name = "valise", version = clap::crate_version ! ())]
struct ValiseApplication {
    /// BCM GPIO pin number the DHT22 sensor data line is connected to
    #[arg(long)]
    climate_pin: u8,

    /// BCM GPIO pin number the HX711 DOUT line is connected to
    #[arg(long)]
    weight_data_pin: u8,

    /// BCM GPIO pin number the HX711 SCK line is connected to
    #[arg(long)]
    weight_clock_pin: u8,

    /// Read the sensors at this interval, in seconds
    #[arg(long, default_value_t = DEFAULT_REFRESH_SECS)]
    refresh_secs: u64,

    /// Scale factor (raw counts per gram) from a previous --calibrate-grams
    /// run. Without it, load-cell readings are logged raw and unconverted
    #[arg(long)]
    scale_factor: Option<f64>,

    /// Calibration mode: average a few readings taken with this known weight,
    /// in grams, on the bag, log the resulting scale factor, and exit
    #[arg(long)]
    calibrate_grams: Option<f64>,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[arg(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let opts = ValiseApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let climate_pin = open_pin_pullup(opts.climate_pin).unwrap_or_else(|e| {
        tracing::error!(message = "failed to initialize climate data pin", bcm_pin = opts.climate_pin, error = %e);
        process::exit(1)
    });
    let weight_data_pin = open_pin(opts.weight_data_pin).unwrap_or_else(|e| {
        tracing::error!(message = "failed to initialize load-cell data pin", bcm_pin = opts.weight_data_pin, error = %e);
        process::exit(1)
    });
    let weight_clock_pin = open_pin(opts.weight_clock_pin).unwrap_or_else(|e| {
        tracing::error!(message = "failed to initialize load-cell clock pin", bcm_pin = opts.weight_clock_pin, error = %e);
        process::exit(1)
    });

    let mut climate = DHT22Sensor::from_pin(climate_pin);
    let mut scale = HX711Scale::from_pins(weight_data_pin, weight_clock_pin);

    if let Some(grams) = opts.calibrate_grams {
        return calibrate(&mut scale, grams);
    }

    if let Some(factor) = opts.scale_factor {
        scale.set_scale_factor(factor)?;
    }

    loop {
        match climate.read() {
            Ok((temperature, humidity)) => {
                tracing::info!(message = "climate reading", temperature = %temperature, humidity = %humidity)
            }
            Err(e) => {
                tracing::warn!(message = "failed to read climate sensor", kind = e.kind().as_label(), error = %e)
            }
        }

        match scale.read_raw() {
            Ok(raw) => match scale.weight(raw) {
                Ok(weight) => tracing::info!(message = "weight reading", raw = raw, weight = %weight),
                Err(_) => tracing::info!(message = "weight reading (uncalibrated)", raw = raw),
            },
            Err(e) => {
                tracing::warn!(message = "failed to read load cell", kind = e.kind().as_label(), error = %e)
            }
        }

        thread::sleep(Duration::from_secs(opts.refresh_secs));
    }
}

/// Derive the scale factor from readings taken with a known weight applied and
/// log it so it can be passed via `--scale-factor` on subsequent runs.
fn calibrate(scale: &mut HX711Scale, grams: f64) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut total: i64 = 0;
    for _ in 0..CALIBRATION_SAMPLES {
        total += i64::from(scale.read_raw()?);
    }

    let reading = (total / i64::from(CALIBRATION_SAMPLES)) as i32;
    scale.calibrate(reading, grams)?;

    tracing::info!(
        message = "calibration complete",
        reading = reading,
        grams = grams,
        scale_factor = scale.scale_factor()
    );
    Ok(())
}
