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

use crate::sensor::TemperatureCelsius;
use crate::snapshot::{fahrenheit, round_to};
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sysinfo::{Components, CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

/// Operating system and agent process information.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OsStats {
    pub cpu_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_frequency: Option<u64>,
    /// Degrees fahrenheit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_temperature: Option<f64>,
    pub memory_used_percent: f64,
    pub boot_timestamp_epoch: u64,
    pub uptime: f64,
    pub uptime_formatted: String,
    pub monitor_uptime: f64,
    pub monitor_uptime_formatted: String,
}

/// Source of operating system statistics. Readings that aren't available on a
/// particular system are left empty rather than failing.
pub trait OsStatsSource: Send {
    fn os_stats(&mut self, now: SystemTime) -> OsStats;
}

/// Format a number of seconds as `H:MM:SS`, prefixed by a number of days when
/// longer than a day, e.g. `3 days, 4:05:06`.
pub fn format_uptime(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    match days {
        0 => format!("{}:{:02}:{:02}", hours, minutes, secs),
        1 => format!("1 day, {}:{:02}:{:02}", hours, minutes, secs),
        _ => format!("{} days, {}:{:02}:{:02}", days, hours, minutes, secs),
    }
}

fn seconds_between(earlier: SystemTime, later: SystemTime) -> f64 {
    later.duration_since(earlier).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

/// Operating system statistics via `sysinfo`.
pub struct SystemOsStats {
    sys: System,
    components: Components,
    started: SystemTime,
}

impl SystemOsStats {
    pub fn new(started: SystemTime) -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );

        // CPU usage is computed between refreshes so take a baseline now
        sys.refresh_cpu_usage();

        Self {
            sys,
            components: Components::new_with_refreshed_list(),
            started,
        }
    }

    /// Temperature of the SoC, preferring a component labeled as the CPU.
    fn cpu_temperature(&mut self) -> Option<TemperatureCelsius> {
        self.components.refresh();

        let components = self.components.list();
        components
            .iter()
            .find(|c| c.label().to_lowercase().contains("cpu"))
            .or_else(|| components.first())
            .map(|c| c.temperature())
            .filter(|t| t.is_finite())
            .map(|t| TemperatureCelsius::from(t as f64))
    }
}

impl OsStatsSource for SystemOsStats {
    fn os_stats(&mut self, now: SystemTime) -> OsStats {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_cpu_frequency();
        self.sys.refresh_memory();

        let total_memory = self.sys.total_memory();
        let memory_used_percent = if total_memory == 0 {
            0.0
        } else {
            round_to(self.sys.used_memory() as f64 / total_memory as f64 * 100.0, 1)
        };

        let boot = System::boot_time();
        let uptime = seconds_between(UNIX_EPOCH + Duration::from_secs(boot), now);
        let monitor_uptime = seconds_between(self.started, now);

        OsStats {
            cpu_percent: round_to(self.sys.global_cpu_usage() as f64, 1),
            cpu_frequency: self.sys.cpus().first().map(|c| c.frequency()),
            cpu_temperature: self.cpu_temperature().map(fahrenheit),
            memory_used_percent,
            boot_timestamp_epoch: boot,
            uptime: round_to(uptime, 3),
            uptime_formatted: format_uptime(uptime),
            monitor_uptime: round_to(monitor_uptime, 3),
            monitor_uptime_formatted: format_uptime(monitor_uptime),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{format_uptime, OsStatsSource, SystemOsStats};
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_format_uptime() {
        assert_eq!("0:00:00", format_uptime(0.0));
        assert_eq!("0:01:05", format_uptime(64.6));
        assert_eq!("23:59:59", format_uptime(86_399.0));
        assert_eq!("1 day, 0:00:00", format_uptime(86_400.0));
        assert_eq!("3 days, 4:05:06", format_uptime(3.0 * 86_400.0 + 4.0 * 3600.0 + 5.0 * 60.0 + 6.0));
    }

    #[test]
    fn test_format_uptime_negative() {
        assert_eq!("0:00:00", format_uptime(-5.0));
    }

    #[test]
    fn test_monitor_uptime() {
        let started = SystemTime::now();
        let mut os = SystemOsStats::new(started);
        let stats = os.os_stats(started + Duration::from_secs(90));

        assert_eq!(90.0, stats.monitor_uptime);
        assert_eq!("0:01:30", stats.monitor_uptime_formatted);
        assert!(stats.cpu_percent.is_finite());
        assert!(stats.memory_used_percent >= 0.0 && stats.memory_used_percent <= 100.0);
    }
}
