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

mod bme280;
mod core;
mod ina3221;
mod si7021;
mod test;

pub use crate::sensor::bme280::{Bme280, DEFAULT_ADDRESS as BME280_DEFAULT_ADDRESS};
pub use crate::sensor::core::{
    open_bus, Amps, Channel, Humidity, I2cBus, PowerMonitor, Pressure, SensorError, SensorErrorKind,
    TemperatureCelsius, TemperatureFahrenheit, TemperatureHumidity, TemperatureHumidityPressure, Volts,
};
pub use crate::sensor::ina3221::{
    Ina3221, CYCLE_TIME as INA3221_CYCLE_TIME, DEFAULT_ADDRESS as INA3221_DEFAULT_ADDRESS, DEFAULT_SHUNT_OHMS,
};
pub use crate::sensor::si7021::{Si7021, DEFAULT_ADDRESS as SI7021_DEFAULT_ADDRESS};
