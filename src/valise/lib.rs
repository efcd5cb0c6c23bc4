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

//! Weight and climate readings for an instrumented bag ("smart bag").
//!
//! ## Features
//!
//! Valise bit-bangs two sensor protocols over GPIO:
//!
//! * a [DHT22 sensor](https://learn.adafruit.com/dht) for ambient temperature
//!   and relative humidity, decoded by timing the high pulses of its one-wire
//!   style data line, and
//! * an HX711 load-cell amplifier for weight, read by clocking 24 bit two's
//!   complement samples out of its serial interface and applying a linear
//!   calibration.
//!
//! Both drivers are built on a single busy-polling primitive
//! ([`sensor::wait_for_level`]) and on small pin/clock capability traits, so
//! the protocol logic runs unchanged against real `rppal` GPIO pins or against
//! the simulated hardware used by the test suite. It is best run on a
//! Raspberry PI (3 or 4).
//!
//! ## Build
//!
//! `valise` is a Rust program and must be built from source using a
//! [Rust toolchain](https://rustup.rs/). Since it's meant to be run on a
//! Raspberry PI, you will also likely need to cross-compile it. If you are on
//! Ubuntu GNU/Linux, you'll need the following packages installed for this.
//!
//! ```text
//! apt-get install gcc-arm-linux-gnueabihf musl-tools
//! ```
//!
//! Next, make sure you have a Rust toolchain for ARMv7, assuming you are using
//! the `rustup` tool.
//!
//! ```text
//! rustup target add armv7-unknown-linux-musleabihf
//! cargo build --release --target armv7-unknown-linux-musleabihf
//! ```
//!
//! ## Wiring
//!
//! Three GPIO pins are used, identified by their Broadcom SOC channel (BCM)
//! numbers, NOT physical pin numbers: the DHT22 data line, the HX711 DOUT
//! line, and the HX711 SCK line. See the [Raspberry PI documentation](https://www.raspberrypi.com/documentation/computers/os.html#gpio-and-the-40-pin-header)
//! for the pinout.
//!
//! ## Run
//!
//! In order to read and write the device `/dev/gpiomem`, `valise` must run as
//! `root`.
//!
//! ```text
//! valise --climate-pin 17 --weight-data-pin 5 --weight-clock-pin 6
//! ```
//!
//! The DHT22 can only be read every two seconds at most; the driver enforces
//! this floor itself, so refresh intervals below two seconds just block.
//!
//! The HX711 scale factor (raw counts per gram) is derived once with a known
//! reference weight on the bag and passed on subsequent runs:
//!
//! ```text
//! valise --climate-pin 17 --weight-data-pin 5 --weight-clock-pin 6 --calibrate-grams 500
//! valise --climate-pin 17 --weight-data-pin 5 --weight-clock-pin 6 --scale-factor 201.7
//! ```

pub mod sensor;
