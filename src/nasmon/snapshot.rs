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

use crate::disk::Filesystems;
use crate::sensor::{Amps, Channel, Humidity, Pressure, TemperatureCelsius, TemperatureFahrenheit, Volts};
use crate::system::OsStats;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f%z";

/// Round `value` to `places` decimal places.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub(crate) fn fahrenheit(c: TemperatureCelsius) -> f64 {
    round_to(TemperatureFahrenheit::from(c).into(), 1)
}

/// Seconds since the UNIX epoch with sub-second precision.
pub(crate) fn epoch_seconds(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

/// Enclosure temperature, humidity, and pressure. Temperatures are in
/// degrees fahrenheit.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
}

impl Environment {
    pub fn new(
        primary: (TemperatureCelsius, Humidity),
        secondary: Option<(TemperatureCelsius, Humidity, Pressure)>,
    ) -> Self {
        let (temperature1, humidity1) = primary;

        let mut env = Environment {
            temperature1: Some(fahrenheit(temperature1)),
            humidity1: Some(round_to(humidity1.into(), 1)),
            ..Default::default()
        };

        if let Some((temperature2, humidity2, pressure)) = secondary {
            env.temperature2 = Some(fahrenheit(temperature2));
            env.humidity2 = Some(round_to(humidity2.into(), 1));
            env.pressure = Some(round_to(pressure.into(), 2));
        }

        env
    }
}

/// Raw values read from a single channel of the power monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelReading {
    pub bus_voltage: Volts,
    pub shunt_voltage: Volts,
    pub current: Amps,
}

/// Rounded values of a single power channel. The supply voltage is the voltage
/// on the supply side of the shunt resistor, bus plus shunt voltage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPower {
    pub bus_voltage: f64,
    pub shunt_voltage: f64,
    pub current: f64,
    pub psu_voltage: f64,
}

impl ChannelPower {
    pub fn from_reading(reading: ChannelReading) -> Self {
        let bus_voltage = round_to(reading.bus_voltage.into(), 2);
        let shunt_voltage = round_to(reading.shunt_voltage.into(), 2);

        ChannelPower {
            bus_voltage,
            shunt_voltage,
            current: round_to(reading.current.into(), 3),
            psu_voltage: round_to(bus_voltage + shunt_voltage, 2),
        }
    }

    fn watts(&self) -> f64 {
        self.current * self.bus_voltage
    }
}

/// Power used by the Raspberry Pi and each of the drives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Power {
    pub rpi: ChannelPower,
    pub drive1: ChannelPower,
    pub drive2: ChannelPower,
    pub watts: f64,
}

impl Power {
    pub fn new(rpi: ChannelReading, drive1: ChannelReading, drive2: ChannelReading) -> Self {
        let rpi = ChannelPower::from_reading(rpi);
        let drive1 = ChannelPower::from_reading(drive1);
        let drive2 = ChannelPower::from_reading(drive2);

        Power {
            rpi,
            drive1,
            drive2,
            watts: round_to(rpi.watts() + drive1.watts() + drive2.watts(), 1),
        }
    }

    pub fn channel(&self, channel: Channel) -> &ChannelPower {
        match channel {
            Channel::Rpi => &self.rpi,
            Channel::Drive1 => &self.drive1,
            Channel::Drive2 => &self.drive2,
        }
    }
}

/// Everything read during a single poll. Never modified after being built,
/// a later poll builds a new one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub timestamp_epoch: f64,
    pub timestamp_formatted: String,
    pub collect_duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<OsStats>,
    pub environment: Environment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<Power>,
    pub filesystems: Filesystems,
}

impl Snapshot {
    pub fn new(
        started: SystemTime,
        duration: Duration,
        os: Option<OsStats>,
        environment: Environment,
        power: Option<Power>,
        filesystems: Filesystems,
    ) -> Self {
        let local: DateTime<Local> = DateTime::from(started);

        Snapshot {
            timestamp_epoch: epoch_seconds(started),
            timestamp_formatted: local.format(TIMESTAMP_FORMAT).to_string(),
            collect_duration: round_to(duration.as_secs_f64(), 3),
            os,
            environment,
            power,
            filesystems,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{round_to, ChannelPower, ChannelReading, Environment, Power, Snapshot};
    use crate::disk::Filesystems;
    use crate::sensor::{Amps, Channel, Humidity, Pressure, TemperatureCelsius, Volts};
    use std::time::{Duration, UNIX_EPOCH};

    fn reading(bus: f64, shunt: f64, current: f64) -> ChannelReading {
        ChannelReading {
            bus_voltage: Volts::from(bus),
            shunt_voltage: Volts::from(shunt),
            current: Amps::from(current),
        }
    }

    #[test]
    fn test_round_to() {
        assert_eq!(1.235, round_to(1.23456, 3));
        assert_eq!(24.7, round_to(24.66, 1));
        assert_eq!(-3.1, round_to(-3.14, 1));
    }

    #[test]
    fn test_channel_power() {
        let ch = ChannelPower::from_reading(reading(5.1, 0.02, 1.2));

        assert_eq!(5.1, ch.bus_voltage);
        assert_eq!(0.02, ch.shunt_voltage);
        assert_eq!(1.2, ch.current);
        assert_eq!(5.12, ch.psu_voltage);
    }

    #[test]
    fn test_aggregate_watts() {
        let power = Power::new(reading(5.1, 0.02, 1.2), reading(0.0, 0.0, 0.0), reading(0.0, 0.0, 0.0));
        assert_eq!(6.1, power.watts);

        let power = Power::new(reading(5.1, 0.02, 1.2), reading(12.04, 0.01, 0.451), reading(5.08, 0.0, 0.5));
        // 6.12 + 5.43004 + 2.54
        assert_eq!(14.1, power.watts);
    }

    #[test]
    fn test_power_channel() {
        let power = Power::new(reading(5.1, 0.02, 1.2), reading(12.04, 0.01, 0.451), reading(5.08, 0.0, 0.5));

        assert_eq!(5.12, power.channel(Channel::Rpi).psu_voltage);
        assert_eq!(0.451, power.channel(Channel::Drive1).current);
        assert_eq!(5.08, power.channel(Channel::Drive2).bus_voltage);
    }

    #[test]
    fn test_environment_fahrenheit() {
        let env = Environment::new(
            (TemperatureCelsius::from(23.36), Humidity::from(54.79)),
            Some((TemperatureCelsius::from(25.0), Humidity::from(43.86), Pressure::from(1006.5327))),
        );

        assert_eq!(Some(74.0), env.temperature1);
        assert_eq!(Some(54.8), env.humidity1);
        assert_eq!(Some(77.0), env.temperature2);
        assert_eq!(Some(43.9), env.humidity2);
        assert_eq!(Some(1006.53), env.pressure);
    }

    #[test]
    fn test_environment_secondary_absent() {
        let env = Environment::new((TemperatureCelsius::from(20.0), Humidity::from(40.0)), None);
        let json = serde_json::to_value(&env).unwrap();

        assert_eq!(68.0, json["temperature1"].as_f64().unwrap());
        assert!(json.get("temperature2").is_none());
        assert!(json.get("pressure").is_none());
    }

    #[test]
    fn test_snapshot_json_keys() {
        let snapshot = Snapshot::new(
            UNIX_EPOCH + Duration::from_millis(1_700_000_000_123),
            Duration::from_millis(2114),
            None,
            Environment::default(),
            Some(Power::new(reading(5.1, 0.02, 1.2), reading(0.0, 0.0, 0.0), reading(0.0, 0.0, 0.0))),
            Filesystems::new(),
        );
        let json = serde_json::to_value(&snapshot).unwrap();

        assert!((json["timestampEpoch"].as_f64().unwrap() - 1_700_000_000.123).abs() < 1e-6);
        assert!(json["timestampFormatted"].as_str().unwrap().contains(".123000"));
        assert_eq!(2.114, json["collectDuration"].as_f64().unwrap());
        assert_eq!(5.12, json["power"]["rpi"]["psuVoltage"].as_f64().unwrap());
        assert!(json["filesystems"].as_object().unwrap().is_empty());
        assert!(json.get("os").is_none());
    }
}
