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

use std::error::Error;
use std::fmt::{self, Formatter};

use rppal::i2c::I2c;

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

/// Temperature, in degrees fahrenheit
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct TemperatureFahrenheit(f64);

impl From<TemperatureCelsius> for TemperatureFahrenheit {
    fn from(c: TemperatureCelsius) -> Self {
        TemperatureFahrenheit(c.0 * 1.8 + 32.0)
    }
}

impl From<TemperatureFahrenheit> for f64 {
    fn from(v: TemperatureFahrenheit) -> Self {
        v.0
    }
}

impl fmt::Display for TemperatureFahrenheit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}f", self.0)
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

/// Barometric pressure, in hectopascals
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct Pressure(f64);

impl From<Pressure> for f64 {
    fn from(v: Pressure) -> Self {
        v.0
    }
}

impl From<f64> for Pressure {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for Pressure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}hPa", self.0)
    }
}

/// Electric potential, in volts
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct Volts(f64);

impl From<Volts> for f64 {
    fn from(v: Volts) -> Self {
        v.0
    }
}

impl From<f64> for Volts {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for Volts {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}V", self.0)
    }
}

/// Electric current, in amperes
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(transparent)]
pub struct Amps(f64);

impl From<Amps> for f64 {
    fn from(v: Amps) -> Self {
        v.0
    }
}

impl From<f64> for Amps {
    fn from(v: f64) -> Self {
        Self(v)
    }
}

impl fmt::Display for Amps {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}A", self.0)
    }
}

/// Potential kinds of errors that can be encountered initializing or reading an I2C sensor
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum SensorErrorKind {
    Initialization,
    Read,
    Timeout,
    Checksum,
}

impl SensorErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            SensorErrorKind::Initialization => "initialization",
            SensorErrorKind::Read => "read",
            SensorErrorKind::Timeout => "timeout",
            SensorErrorKind::Checksum => "checksum",
        }
    }
}

/// Error initializing or reading a sensor via the I2C bus
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

/// Create a new `I2c` handle on the given bus number addressing the device at
/// `address`. Each sensor gets its own handle since `rppal` binds a handle to a
/// single slave address.
///
/// On a Raspberry Pi the header pins 3 (SDA) and 5 (SCL) belong to bus `1`.
pub fn open_bus(bus: u8, address: u16) -> Result<I2c, SensorError> {
    let mut i2c = I2c::with_bus(bus).map_err(|e| {
        SensorError::KindMsgCause(
            SensorErrorKind::Initialization,
            "unable to open I2C bus",
            Box::new(e),
        )
    })?;

    i2c.set_slave_address(address).map_err(|e| {
        SensorError::KindMsgCause(
            SensorErrorKind::Initialization,
            "unable to set I2C slave address",
            Box::new(e),
        )
    })?;

    Ok(i2c)
}

/// Abstraction around an `rppal::i2c::I2c` handle to allow for easier testing.
pub trait I2cBus {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SensorError>;
    fn read(&mut self, buffer: &mut [u8]) -> Result<(), SensorError>;
    fn write_read(&mut self, bytes: &[u8], buffer: &mut [u8]) -> Result<(), SensorError>;
}

impl I2cBus for I2c {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SensorError> {
        I2c::write(self, bytes)
            .map(|_| ())
            .map_err(|e| SensorError::KindMsgCause(SensorErrorKind::Read, "unable to write to I2C device", Box::new(e)))
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<(), SensorError> {
        I2c::read(self, buffer)
            .map(|_| ())
            .map_err(|e| SensorError::KindMsgCause(SensorErrorKind::Read, "unable to read from I2C device", Box::new(e)))
    }

    fn write_read(&mut self, bytes: &[u8], buffer: &mut [u8]) -> Result<(), SensorError> {
        I2c::write_read(self, bytes, buffer).map_err(|e| {
            SensorError::KindMsgCause(SensorErrorKind::Read, "unable to read I2C register", Box::new(e))
        })
    }
}

/// Sensor that measures temperature and relative humidity.
pub trait TemperatureHumidity: Send {
    fn read_temperature_humidity(&mut self) -> Result<(TemperatureCelsius, Humidity), SensorError>;
}

/// Sensor that measures temperature, relative humidity, and barometric pressure.
pub trait TemperatureHumidityPressure: Send {
    fn read_temperature_humidity_pressure(&mut self) -> Result<(TemperatureCelsius, Humidity, Pressure), SensorError>;
}

/// Channels of the power monitor and what each one is wired to.
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum Channel {
    Rpi,
    Drive1,
    Drive2,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Rpi, Channel::Drive1, Channel::Drive2];

    /// One-based channel number as printed on the board.
    pub fn number(&self) -> u8 {
        match self {
            Channel::Rpi => 1,
            Channel::Drive1 => 2,
            Channel::Drive2 => 3,
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            Channel::Rpi => "rpi",
            Channel::Drive1 => "drive1",
            Channel::Drive2 => "drive2",
        }
    }
}

/// Multi-channel voltage and current monitor.
///
/// Conversions are paced by the hardware so callers must wait for `is_ready`
/// before reading channels to get values from a complete conversion cycle.
pub trait PowerMonitor: Send {
    fn is_ready(&mut self) -> Result<bool, SensorError>;
    fn bus_voltage(&mut self, channel: Channel) -> Result<Volts, SensorError>;
    fn shunt_voltage(&mut self, channel: Channel) -> Result<Volts, SensorError>;
    fn current(&mut self, channel: Channel) -> Result<Amps, SensorError>;
}

#[cfg(test)]
mod test {
    use super::{Channel, SensorError, SensorErrorKind, TemperatureCelsius, TemperatureFahrenheit};

    #[test]
    fn test_celsius_to_fahrenheit() {
        let f = TemperatureFahrenheit::from(TemperatureCelsius::from(100.0));
        assert_eq!(212.0, f64::from(f));
    }

    #[test]
    fn test_error_kind_labels() {
        let err = SensorError::KindMsg(SensorErrorKind::Timeout, "no conversion");
        assert_eq!("timeout", err.kind().as_label());
        assert_eq!("no conversion", err.to_string());

        let err = SensorError::CheckSum(1, 2);
        assert_eq!(SensorErrorKind::Checksum, err.kind());
    }

    #[test]
    fn test_channel_numbers() {
        let numbers: Vec<u8> = Channel::ALL.iter().map(|c| c.number()).collect();
        assert_eq!(vec![1, 2, 3], numbers);
        assert_eq!("drive2", Channel::Drive2.as_label());
    }
}
