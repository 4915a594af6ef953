// Nasmon - NAS enclosure and disk statistics agent
//
// Copyright 2022 Nick Pillitteri
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

//! Serve and publish NAS enclosure sensor readings and disk statistics.
//!
//! ## Features
//!
//! Nasmon reads the sensors of a small Raspberry PI based NAS enclosure and combines
//! them with filesystem and disk information into a single JSON snapshot. The snapshot
//! includes:
//!
//! * Enclosure temperature and relative humidity from a [Si7021 sensor](https://www.silabs.com/sensors/humidity/si7006-13-20-21-34).
//! * Enclosure temperature, relative humidity, and barometric pressure from a
//!   [BME280 sensor](https://www.bosch-sensortec.com/products/environmental-sensors/humidity-sensors-bme280/).
//! * Bus voltage, shunt voltage, and current used by the Raspberry PI and two drives
//!   from an [INA3221 power monitor](https://www.ti.com/product/INA3221).
//! * Space used, bytes read and written, and recent activity for each mounted filesystem.
//! * Drive temperatures via S.M.A.R.T., only for drives that were active since the last
//!   poll. Reading S.M.A.R.T. information from an idle drive would spin it up.
//! * CPU, memory, and uptime information about the OS.
//!
//! Polling every sensor takes a couple of seconds, mostly waiting for the power monitor
//! to finish averaging its samples. Snapshots are cached for `10s` and only a single poll
//! runs at a time no matter how many clients are asking.
//!
//! ## Endpoints
//!
//! * `GET /v1/nasStats` and `GET /v1/data` - The latest snapshot as JSON. If the Si7021
//!   sensor could not be initialized, an HTTP 503 with an empty JSON object is returned.
//! * `GET /metrics` - Prometheus metrics updated from each periodic poll.
//!
//! ## Build
//!
//! `nasmon` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/).
//! Since it's meant to be run on a Raspberry PI, you will also likely need to cross-compile it.
//!
//! ```text
//! rustup target add armv7-unknown-linux-musleabihf
//! cargo build --release --target armv7-unknown-linux-musleabihf
//! ```
//!
//! ## Install
//!
//! The sensors must be connected to the I2C bus of the Raspberry PI (bus `1` on header pins
//! 3 and 5) and I2C must be enabled. `smartctl` (from smartmontools) and `lsblk` must be
//! installed. Since `smartctl` requires access to raw devices, `nasmon` must run as `root`.
//!
//! ```text
//! sudo cp target/armv7-unknown-linux-musleabihf/release/nasmon /usr/local/bin/nasmon
//! sudo /usr/local/bin/nasmon --log-level debug
//! ```
//!

pub mod collector;
pub mod disk;
pub mod http;
pub mod metrics;
pub mod publish;
pub mod sensor;
pub mod snapshot;
pub mod system;
