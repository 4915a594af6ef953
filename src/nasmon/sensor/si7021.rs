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

use crate::sensor::core::{I2cBus, Humidity, SensorError, SensorErrorKind, TemperatureCelsius, TemperatureHumidity};
use std::fmt::{Debug, Formatter};
use std::thread;
use std::time::Duration;

pub const DEFAULT_ADDRESS: u16 = 0x40;

const CMD_MEASURE_RH_NO_HOLD: u8 = 0xF5;
const CMD_TEMP_FROM_PREVIOUS_RH: u8 = 0xE0;
const CMD_RESET: u8 = 0xFE;
const CMD_READ_USER1: u8 = 0xE7;
const USER1_DEFAULT: u8 = 0x3A;

// A 12-bit RH conversion plus the temperature conversion it triggers takes
// about 23ms. The sensor NACKs reads until the measurement is done.
const MEASURE_DELAY: Duration = Duration::from_millis(25);
const MEASURE_POLL: Duration = Duration::from_millis(10);
const MEASURE_ATTEMPTS: u32 = 10;

/// Compute the CRC-8 (polynomial `x^8 + x^5 + x^4 + 1`, init `0x00`) the
/// Si7021 appends to measurements.
fn crc8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |crc, &b| {
        (0..8).fold(crc ^ b, |c, _| if c & 0x80 != 0 { (c << 1) ^ 0x31 } else { c << 1 })
    })
}

/// Convert a raw relative humidity code into percent, clamped to 0 - 100 since the
/// conversion formula can produce slightly out of range values at the extremes.
fn humidity_from_raw(raw: u16) -> Humidity {
    let rh = (raw as f64 * 125.0 / 65536.0) - 6.0;
    Humidity::from(rh.clamp(0.0, 100.0))
}

fn temperature_from_raw(raw: u16) -> TemperatureCelsius {
    TemperatureCelsius::from((raw as f64 * 175.72 / 65536.0) - 46.85)
}

/// Read temperature in degrees celsius and relative humidity from a Si7021 sensor
pub struct Si7021 {
    bus: Box<dyn I2cBus + Send + 'static>,
}

impl Si7021 {
    pub fn from_bus<T>(bus: T) -> Self
    where
        T: I2cBus + Send + 'static,
    {
        Self { bus: Box::new(bus) }
    }

    /// Create a sensor from the given bus and initialize it, retrying up to `attempts`
    /// times with `delay` between attempts.
    ///
    /// Right after power up the sensor sometimes reports a garbage user register
    /// value. It settles down after a few tries.
    pub fn initialize<T>(bus: T, attempts: u32, delay: Duration) -> Result<Self, SensorError>
    where
        T: I2cBus + Send + 'static,
    {
        let mut sensor = Self::from_bus(bus);
        let attempts = attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match sensor.init() {
                Ok(_) => return Ok(sensor),
                Err(e) if attempt < attempts => {
                    tracing::warn!(message = "unable to initialize Si7021, retrying", attempt = attempt, error = %e);
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reset the sensor and verify that it reports the expected user register contents.
    pub fn init(&mut self) -> Result<(), SensorError> {
        self.bus.write(&[CMD_RESET])?;
        thread::sleep(Duration::from_millis(50));

        let mut user1 = [0u8; 1];
        self.bus.write_read(&[CMD_READ_USER1], &mut user1)?;
        if user1[0] != USER1_DEFAULT {
            tracing::debug!(message = "unexpected Si7021 user register", expected = USER1_DEFAULT, got = user1[0]);
            return Err(SensorError::KindMsg(
                SensorErrorKind::Initialization,
                "bad USER1 register",
            ));
        }

        Ok(())
    }

    fn read_humidity_raw(&mut self) -> Result<u16, SensorError> {
        self.bus.write(&[CMD_MEASURE_RH_NO_HOLD])?;
        thread::sleep(MEASURE_DELAY);

        let mut buf = [0u8; 3];
        let mut attempt = 0;
        while let Err(e) = self.bus.read(&mut buf) {
            attempt += 1;
            if attempt >= MEASURE_ATTEMPTS {
                tracing::debug!(message = "humidity measurement never completed", error = %e);
                return Err(SensorError::KindMsg(
                    SensorErrorKind::Timeout,
                    "timeout waiting for humidity measurement",
                ));
            }

            thread::sleep(MEASURE_POLL);
        }

        let computed = crc8(&buf[..2]);
        if computed != buf[2] {
            return Err(SensorError::CheckSum(buf[2], computed));
        }

        Ok(u16::from_be_bytes([buf[0], buf[1]]))
    }

    fn read_temperature_raw(&mut self) -> Result<u16, SensorError> {
        // Each humidity measurement also measures temperature, which can be read
        // back without starting another conversion. This read has no checksum.
        let mut buf = [0u8; 2];
        self.bus.write_read(&[CMD_TEMP_FROM_PREVIOUS_RH], &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }
}

impl TemperatureHumidity for Si7021 {
    fn read_temperature_humidity(&mut self) -> Result<(TemperatureCelsius, Humidity), SensorError> {
        let humidity_raw = self.read_humidity_raw()?;
        let temp_raw = self.read_temperature_raw()?;

        let humidity = humidity_from_raw(humidity_raw);
        let temperature = temperature_from_raw(temp_raw);

        tracing::debug!(
            message = "parsed Si7021 data",
            raw_temperature = temp_raw,
            raw_humidity = humidity_raw,
            temperature = %temperature,
            humidity = %humidity
        );

        Ok((temperature, humidity))
    }
}

impl Debug for Si7021 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Si7021").finish_non_exhaustive()
    }
}
