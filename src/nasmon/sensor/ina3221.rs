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

use crate::sensor::core::{Amps, Channel, I2cBus, PowerMonitor, SensorError, SensorErrorKind, Volts};
use std::fmt::{Debug, Formatter};
use std::time::Duration;

pub const DEFAULT_ADDRESS: u16 = 0x41;
pub const DEFAULT_SHUNT_OHMS: f64 = 0.1;

const REG_CONFIG: u8 = 0x00;
const REG_MASK_ENABLE: u8 = 0x0F;
const REG_MANUFACTURER_ID: u8 = 0xFE;

const MANUFACTURER_ID: u16 = 0x5449;
const CONVERSION_READY: u16 = 0x0001;

const CONFIG_CHANNELS_ENABLED: u16 = 0b0111_0000_0000_0000;
const CONFIG_AVERAGING_128: u16 = 0b100 << 9;
const CONFIG_BUS_CONVERSION_8MS: u16 = 0b111 << 6;
const CONFIG_SHUNT_CONVERSION_8MS: u16 = 0b111 << 3;
const CONFIG_MODE_SHUNT_BUS_CONTINUOUS: u16 = 0b111;

const SHUNT_LSB_VOLTS: f64 = 40e-6;
const BUS_LSB_VOLTS: f64 = 8e-3;

/// Configuration written at startup.
///
/// Slow conversions and heavy averaging improve accuracy at the cost of
/// latency. Each conversion takes 128 * 8.244ms, roughly one second per bus
/// or shunt value. A full cycle of bus and shunt across all three channels
/// takes about 6.3 seconds.
pub(crate) const CONFIG_VALUE: u16 = CONFIG_CHANNELS_ENABLED
    | CONFIG_AVERAGING_128
    | CONFIG_BUS_CONVERSION_8MS
    | CONFIG_SHUNT_CONVERSION_8MS
    | CONFIG_MODE_SHUNT_BUS_CONTINUOUS;

const AVERAGES: u64 = 128;
const CONVERSION_MICROS: u64 = 8244;

/// Time for one conversion cycle of bus and shunt voltage on all three channels
/// with the configuration written at startup.
pub const CYCLE_TIME: Duration = Duration::from_micros(AVERAGES * CONVERSION_MICROS * 2 * 3);

fn shunt_register(channel: Channel) -> u8 {
    0x01 + (channel.number() - 1) * 2
}

fn bus_register(channel: Channel) -> u8 {
    0x02 + (channel.number() - 1) * 2
}

/// Convert a shunt or bus voltage register value to volts. Both registers keep
/// a signed value in the upper 13 bits.
fn register_volts(raw: u16, lsb: f64) -> Volts {
    let value = (raw as i16) >> 3;
    Volts::from(value as f64 * lsb)
}

/// Read bus voltage, shunt voltage, and current from the three channels of an INA3221
pub struct Ina3221 {
    bus: Box<dyn I2cBus + Send + 'static>,
    shunt_ohms: f64,
}

impl Ina3221 {
    /// Verify the manufacturer ID of the chip and configure all channels for
    /// continuous, averaged conversions.
    pub fn initialize<T>(bus: T, shunt_ohms: f64) -> Result<Self, SensorError>
    where
        T: I2cBus + Send + 'static,
    {
        if !(shunt_ohms > 0.0) {
            return Err(SensorError::KindMsg(
                SensorErrorKind::Initialization,
                "shunt resistance must be positive",
            ));
        }

        let mut sensor = Self {
            bus: Box::new(bus),
            shunt_ohms,
        };

        let id = sensor.read_register(REG_MANUFACTURER_ID)?;
        if id != MANUFACTURER_ID {
            tracing::debug!(message = "unexpected INA3221 manufacturer id", expected = MANUFACTURER_ID, got = id);
            return Err(SensorError::KindMsg(
                SensorErrorKind::Initialization,
                "unexpected manufacturer id for INA3221",
            ));
        }

        sensor.write_register(REG_CONFIG, CONFIG_VALUE)?;
        Ok(sensor)
    }

    fn read_register(&mut self, register: u8) -> Result<u16, SensorError> {
        let mut buf = [0u8; 2];
        self.bus.write_read(&[register], &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn write_register(&mut self, register: u8, value: u16) -> Result<(), SensorError> {
        let [hi, lo] = value.to_be_bytes();
        self.bus.write(&[register, hi, lo])
    }
}

impl PowerMonitor for Ina3221 {
    /// Note that reading the mask/enable register clears the conversion ready flag.
    fn is_ready(&mut self) -> Result<bool, SensorError> {
        let mask = self.read_register(REG_MASK_ENABLE)?;
        Ok(mask & CONVERSION_READY != 0)
    }

    fn bus_voltage(&mut self, channel: Channel) -> Result<Volts, SensorError> {
        let raw = self.read_register(bus_register(channel))?;
        Ok(register_volts(raw, BUS_LSB_VOLTS))
    }

    fn shunt_voltage(&mut self, channel: Channel) -> Result<Volts, SensorError> {
        let raw = self.read_register(shunt_register(channel))?;
        Ok(register_volts(raw, SHUNT_LSB_VOLTS))
    }

    fn current(&mut self, channel: Channel) -> Result<Amps, SensorError> {
        let shunt = self.shunt_voltage(channel)?;
        Ok(Amps::from(f64::from(shunt) / self.shunt_ohms))
    }
}

impl Debug for Ina3221 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ina3221").field("shunt_ohms", &self.shunt_ohms).finish()
    }
}
