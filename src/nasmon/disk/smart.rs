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

use crate::disk::command;
use crate::disk::core::{DiskError, DiskErrorKind, DriveTemperature, SmartProbe};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_PROGRAM: &str = "smartctl";

const CURRENT_TEMPERATURE: &str = "Current Temperature";
const HIGHEST_TEMPERATURE: &str = "Highest Temperature";
const LOWEST_TEMPERATURE: &str = "Lowest Temperature";

// Low bits of the smartctl exit status: bad command line or device open failed.
// Higher bits report drive health and don't mean the output is unusable.
const EXIT_FATAL_MASK: i32 = 0b11;

/// Depth-first search for an object with the given `name` and an integer `value`,
/// the shape of each statistic in the smartctl device statistics log.
fn find_statistic(value: &Value, name: &str) -> Option<i64> {
    match value {
        Value::Object(map) => {
            if map.get("name").and_then(Value::as_str) == Some(name) {
                if let Some(v) = map.get("value").and_then(Value::as_i64) {
                    return Some(v);
                }
            }

            map.values().find_map(|v| find_statistic(v, name))
        }
        Value::Array(values) => values.iter().find_map(|v| find_statistic(v, name)),
        _ => None,
    }
}

/// Extract drive temperatures from `smartctl -l devstat,0x05 --json` output.
fn parse_temperature(output: &str) -> Result<DriveTemperature, DiskError> {
    let doc: Value = serde_json::from_str(output)
        .map_err(|e| DiskError::KindMsgCause(DiskErrorKind::Parse, "unable to parse smartctl output", Box::new(e)))?;

    let current = find_statistic(&doc, CURRENT_TEMPERATURE).ok_or(DiskError::KindMsg(
        DiskErrorKind::Missing,
        "no current temperature in smartctl output",
    ))?;

    Ok(DriveTemperature {
        current,
        max: find_statistic(&doc, HIGHEST_TEMPERATURE),
        min: find_statistic(&doc, LOWEST_TEMPERATURE),
    })
}

/// Query drives with the `smartctl` utility from smartmontools.
#[derive(Debug, Clone)]
pub struct SmartCtl {
    program: String,
    timeout: Duration,
}

impl SmartCtl {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl SmartProbe for SmartCtl {
    fn is_capable(&mut self, device: &str) -> Result<bool, DiskError> {
        let out = command::run(&self.program, &["-i", device], self.timeout)?;
        tracing::debug!(message = "probed SMART capability", device = device, status = %out.status);
        Ok(out.status.success())
    }

    fn read_temperature(&mut self, device: &str) -> Result<DriveTemperature, DiskError> {
        let out = command::run(&self.program, &["-l", "devstat,0x05", device, "--json"], self.timeout)?;

        match out.status.code() {
            Some(code) if code & EXIT_FATAL_MASK == 0 => parse_temperature(&out.stdout),
            _ => Err(DiskError::KindMsgDetail(
                DiskErrorKind::Command,
                "smartctl unable to read device statistics",
                format!("{}: {}", device, out.status),
            )),
        }
    }
}

#[cfg(test)]
mod test {
    use super::parse_temperature;
    use crate::disk::core::DiskErrorKind;

    const OUTPUT: &str = r#"{
  "json_format_version": [1, 0],
  "device": {"name": "/dev/sda", "type": "sat"},
  "ata_device_statistics": {
    "pages": [
      {
        "number": 5,
        "name": "Temperature Statistics",
        "table": [
          {"offset": 8, "name": "Current Temperature", "size": 1, "value": 34},
          {"offset": 16, "name": "Average Short Term Temperature", "size": 1, "value": 31},
          {"offset": 32, "name": "Highest Temperature", "size": 1, "value": 51},
          {"offset": 40, "name": "Lowest Temperature", "size": 1, "value": 17}
        ]
      }
    ]
  }
}"#;

    #[test]
    fn test_parse_temperature() {
        let temp = parse_temperature(OUTPUT).unwrap();

        assert_eq!(34, temp.current);
        assert_eq!(Some(51), temp.max);
        assert_eq!(Some(17), temp.min);
    }

    #[test]
    fn test_parse_temperature_no_extremes() {
        let temp = parse_temperature(
            r#"{"ata_device_statistics": {"pages": [{"table": [{"name": "Current Temperature", "value": 40}]}]}}"#,
        )
        .unwrap();

        assert_eq!(40, temp.current);
        assert_eq!(None, temp.max);
        assert_eq!(None, temp.min);
    }

    #[test]
    fn test_parse_temperature_missing() {
        let res = parse_temperature(r#"{"smartctl": {"exit_status": 4}}"#);
        assert_eq!(DiskErrorKind::Missing, res.unwrap_err().kind());
    }

    #[test]
    fn test_parse_temperature_invalid() {
        let res = parse_temperature("Smartctl open device: /dev/sdz failed");
        assert_eq!(DiskErrorKind::Parse, res.unwrap_err().kind());
    }
}
