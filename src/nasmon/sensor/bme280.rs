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

use crate::sensor::core::{
    I2cBus, Humidity, Pressure, SensorError, SensorErrorKind, TemperatureCelsius, TemperatureHumidityPressure,
};
use std::fmt::{Debug, Formatter};
use std::thread;
use std::time::Duration;

pub const DEFAULT_ADDRESS: u16 = 0x76;

const REG_CHIP_ID: u8 = 0xD0;
const REG_RESET: u8 = 0xE0;
const REG_CALIBRATION_TP: u8 = 0x88;
const REG_CALIBRATION_H: u8 = 0xE1;
const REG_CTRL_HUM: u8 = 0xF2;
const REG_STATUS: u8 = 0xF3;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_DATA: u8 = 0xF7;

const CHIP_ID: u8 = 0x60;
const RESET_WORD: u8 = 0xB6;
const STATUS_MEASURING: u8 = 0b0000_1000;

// 1x oversampling for every measurement, forced mode
const CTRL_HUM_VALUE: u8 = 0b0000_0001;
const CTRL_MEAS_FORCED: u8 = 0b0010_0101;

const CALIBRATION_TP_SIZE: usize = 26;
const CALIBRATION_H_SIZE: usize = 7;
const DATA_SIZE: usize = 8;

const MEASURE_POLL: Duration = Duration::from_millis(2);
const MEASURE_ATTEMPTS: u32 = 50;

/// Trimming parameters burned into each sensor at the factory.
///
/// These are needed to convert raw ADC values into temperature, pressure, and
/// humidity. See section 4.2.2 of the BME280 datasheet for the register layout.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Calibration {
    t1: u16,
    t2: i16,
    t3: i16,
    p1: u16,
    p2: i16,
    p3: i16,
    p4: i16,
    p5: i16,
    p6: i16,
    p7: i16,
    p8: i16,
    p9: i16,
    h1: u8,
    h2: i16,
    h3: u8,
    h4: i16,
    h5: i16,
    h6: i8,
}

impl Calibration {
    fn from_bytes(tp: &[u8; CALIBRATION_TP_SIZE], h: &[u8; CALIBRATION_H_SIZE]) -> Self {
        let u = |i: usize| u16::from_le_bytes([tp[i], tp[i + 1]]);
        let s = |i: usize| i16::from_le_bytes([tp[i], tp[i + 1]]);

        // h4 and h5 are 12-bit signed values that share the nibbles of 0xE5
        let h4 = ((h[3] as i8 as i16) << 4) | (h[4] & 0x0F) as i16;
        let h5 = ((h[5] as i8 as i16) << 4) | (h[4] >> 4) as i16;

        Calibration {
            t1: u(0),
            t2: s(2),
            t3: s(4),
            p1: u(6),
            p2: s(8),
            p3: s(10),
            p4: s(12),
            p5: s(14),
            p6: s(16),
            p7: s(18),
            p8: s(20),
            p9: s(22),
            // byte 24 (0xA0) is unused
            h1: tp[25],
            h2: i16::from_le_bytes([h[0], h[1]]),
            h3: h[2],
            h4,
            h5,
            h6: h[6] as i8,
        }
    }

    /// Return the compensated temperature and the "fine" temperature value that
    /// the pressure and humidity compensation depend on.
    fn temperature(&self, adc_t: i32) -> (TemperatureCelsius, f64) {
        let adc_t = adc_t as f64;
        let var1 = (adc_t / 16384.0 - self.t1 as f64 / 1024.0) * self.t2 as f64;
        let var2 = (adc_t / 131072.0 - self.t1 as f64 / 8192.0).powi(2) * self.t3 as f64;
        let t_fine = var1 + var2;

        (TemperatureCelsius::from(t_fine / 5120.0), t_fine)
    }

    fn pressure(&self, adc_p: i32, t_fine: f64) -> Pressure {
        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * self.p6 as f64 / 32768.0;
        var2 += var1 * self.p5 as f64 * 2.0;
        var2 = var2 / 4.0 + self.p4 as f64 * 65536.0;
        var1 = (self.p3 as f64 * var1 * var1 / 524288.0 + self.p2 as f64 * var1) / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * self.p1 as f64;

        // Avoid a division by zero if the calibration data is garbage
        if var1 == 0.0 {
            return Pressure::from(0.0);
        }

        let mut p = 1048576.0 - adc_p as f64;
        p = (p - var2 / 4096.0) * 6250.0 / var1;
        var1 = self.p9 as f64 * p * p / 2147483648.0;
        var2 = p * self.p8 as f64 / 32768.0;
        p += (var1 + var2 + self.p7 as f64) / 16.0;

        // Compensation yields pascals
        Pressure::from(p / 100.0)
    }

    fn humidity(&self, adc_h: i32, t_fine: f64) -> Humidity {
        let mut h = t_fine - 76800.0;
        h = (adc_h as f64 - (self.h4 as f64 * 64.0 + self.h5 as f64 / 16384.0 * h))
            * (self.h2 as f64 / 65536.0
                * (1.0 + self.h6 as f64 / 67108864.0 * h * (1.0 + self.h3 as f64 / 67108864.0 * h)));
        h *= 1.0 - self.h1 as f64 * h / 524288.0;

        Humidity::from(h.clamp(0.0, 100.0))
    }
}

/// Raw ADC values from a single forced measurement.
#[derive(Debug)]
struct Reading {
    adc_p: i32,
    adc_t: i32,
    adc_h: i32,
}

impl Reading {
    fn from_bytes(b: &[u8; DATA_SIZE]) -> Self {
        // Pressure and temperature are 20-bit values split over msb, lsb, and the
        // top nibble of xlsb. Humidity is a plain 16-bit big endian value.
        let adc_p = ((b[0] as i32) << 12) | ((b[1] as i32) << 4) | ((b[2] as i32) >> 4);
        let adc_t = ((b[3] as i32) << 12) | ((b[4] as i32) << 4) | ((b[5] as i32) >> 4);
        let adc_h = ((b[6] as i32) << 8) | b[7] as i32;

        Reading { adc_p, adc_t, adc_h }
    }
}

/// Read temperature, relative humidity, and pressure from a BME280 sensor
pub struct Bme280 {
    bus: Box<dyn I2cBus + Send + 'static>,
    calibration: Calibration,
}

impl Bme280 {
    /// Verify the chip ID of the sensor, reset it, and load its calibration data.
    pub fn initialize<T>(bus: T) -> Result<Self, SensorError>
    where
        T: I2cBus + Send + 'static,
    {
        let mut bus: Box<dyn I2cBus + Send + 'static> = Box::new(bus);

        let mut id = [0u8; 1];
        bus.write_read(&[REG_CHIP_ID], &mut id)?;
        if id[0] != CHIP_ID {
            tracing::debug!(message = "unexpected BME280 chip id", expected = CHIP_ID, got = id[0]);
            return Err(SensorError::KindMsg(
                SensorErrorKind::Initialization,
                "unexpected chip id for BME280",
            ));
        }

        bus.write(&[REG_RESET, RESET_WORD])?;
        thread::sleep(Duration::from_millis(10));

        let mut tp = [0u8; CALIBRATION_TP_SIZE];
        let mut h = [0u8; CALIBRATION_H_SIZE];
        bus.write_read(&[REG_CALIBRATION_TP], &mut tp)?;
        bus.write_read(&[REG_CALIBRATION_H], &mut h)?;
        let calibration = Calibration::from_bytes(&tp, &h);

        tracing::debug!(message = "loaded BME280 calibration", calibration = ?calibration);
        Ok(Self { bus, calibration })
    }

    fn measure(&mut self) -> Result<Reading, SensorError> {
        // The humidity control register only takes effect after a write to ctrl_meas
        self.bus.write(&[REG_CTRL_HUM, CTRL_HUM_VALUE])?;
        self.bus.write(&[REG_CTRL_MEAS, CTRL_MEAS_FORCED])?;

        let mut status = [0u8; 1];
        let mut attempt = 0;
        loop {
            self.bus.write_read(&[REG_STATUS], &mut status)?;
            if status[0] & STATUS_MEASURING == 0 {
                break;
            }

            attempt += 1;
            if attempt >= MEASURE_ATTEMPTS {
                return Err(SensorError::KindMsg(
                    SensorErrorKind::Timeout,
                    "timeout waiting for BME280 measurement",
                ));
            }

            thread::sleep(MEASURE_POLL);
        }

        let mut data = [0u8; DATA_SIZE];
        self.bus.write_read(&[REG_DATA], &mut data)?;
        Ok(Reading::from_bytes(&data))
    }
}

impl TemperatureHumidityPressure for Bme280 {
    fn read_temperature_humidity_pressure(&mut self) -> Result<(TemperatureCelsius, Humidity, Pressure), SensorError> {
        let reading = self.measure()?;
        let (temperature, t_fine) = self.calibration.temperature(reading.adc_t);
        let pressure = self.calibration.pressure(reading.adc_p, t_fine);
        let humidity = self.calibration.humidity(reading.adc_h, t_fine);

        tracing::debug!(
            message = "parsed BME280 data",
            reading = ?reading,
            temperature = %temperature,
            humidity = %humidity,
            pressure = %pressure
        );

        Ok((temperature, humidity, pressure))
    }
}

impl Debug for Bme280 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bme280").field("calibration", &self.calibration).finish()
    }
}
