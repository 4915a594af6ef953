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

use crate::disk::core::{BlockDevice, DeviceEnumerator, DiskError, DiskErrorKind, DiskStats, DriveTemperature, SmartProbe};
use crate::snapshot::round_to;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Debug, Formatter};
use std::time::{Duration, SystemTime};

/// Filesystems of a single poll keyed by label.
pub type Filesystems = BTreeMap<String, FilesystemEntry>;

/// Usage, I/O activity, and (sometimes) drive temperature of a mounted filesystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemEntry {
    pub label: String,
    pub kernel_name: String,
    pub path: String,
    pub mountpoint: String,
    pub parent_kernel_name: String,
    pub space_total: u64,
    pub space_used: u64,
    pub space_available: u64,
    pub space_used_percent: f64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub activity_read: bool,
    pub activity_write: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_current: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_min: Option<i64>,
}

impl FilesystemEntry {
    fn set_temperature(&mut self, temperature: DriveTemperature) {
        self.temperature_current = Some(temperature.current);
        self.temperature_max = temperature.max;
        self.temperature_min = temperature.min;
    }
}

fn used_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round_to(used as f64 / total as f64 * 100.0, 3)
    }
}

/// When, if ever, a device found not to support SMART should be probed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmartRetry {
    Never,
    After(Duration),
}

/// Remembers which physical devices support SMART so the capability probe
/// runs once per device rather than once per poll.
#[derive(Debug)]
pub struct SmartCapabilityCache {
    retry: SmartRetry,
    verdicts: HashMap<String, (bool, SystemTime)>,
}

impl SmartCapabilityCache {
    pub fn new(retry: SmartRetry) -> Self {
        Self {
            retry,
            verdicts: HashMap::new(),
        }
    }

    /// Cached verdict for `device`, or `None` if it has never been probed or a
    /// negative verdict is old enough to probe again.
    pub fn get(&self, device: &str, now: SystemTime) -> Option<bool> {
        let (capable, probed_at) = self.verdicts.get(device)?;
        if *capable {
            return Some(true);
        }

        match self.retry {
            SmartRetry::Never => Some(false),
            SmartRetry::After(after) => match now.duration_since(*probed_at) {
                Ok(elapsed) if elapsed >= after => None,
                // Clock moved backwards, keep the verdict until it catches up
                _ => Some(false),
            },
        }
    }

    pub fn record(&mut self, device: &str, capable: bool, now: SystemTime) {
        self.verdicts.insert(device.to_owned(), (capable, now));
    }
}

/// Builds the filesystem section of a snapshot.
///
/// Querying SMART can spin up an idle drive so it is only done for filesystems
/// that have been read or written since the previous poll, in which case the
/// drive is already spinning.
pub struct FilesystemSnapshotBuilder {
    enumerator: Box<dyn DeviceEnumerator>,
    stats: Box<dyn DiskStats>,
    smart: Box<dyn SmartProbe>,
    capabilities: SmartCapabilityCache,
}

impl FilesystemSnapshotBuilder {
    pub fn new<E, S, P>(enumerator: E, stats: S, smart: P, retry: SmartRetry) -> Self
    where
        E: DeviceEnumerator + 'static,
        S: DiskStats + 'static,
        P: SmartProbe + 'static,
    {
        Self {
            enumerator: Box::new(enumerator),
            stats: Box::new(stats),
            smart: Box::new(smart),
            capabilities: SmartCapabilityCache::new(retry),
        }
    }

    /// Build entries for all mounted filesystems, comparing I/O counters against
    /// those of `previous` to decide if each filesystem has been active.
    pub fn build(&mut self, previous: &Filesystems, now: SystemTime) -> Result<Filesystems, DiskError> {
        let devices = self.enumerator.mounted_filesystems()?;
        let counters = self.stats.io_counters()?;
        let mut out = Filesystems::new();

        for device in devices {
            let io = counters.get(&device.kernel_name).copied().ok_or_else(|| {
                DiskError::KindMsgDetail(
                    DiskErrorKind::Missing,
                    "no I/O counters for device",
                    device.kernel_name.clone(),
                )
            })?;
            let usage = self.stats.disk_usage(&device.mountpoint)?;

            // Filesystems seen for the first time are never considered active
            let (activity_read, activity_write) = match previous.get(&device.label) {
                Some(prev) => (io.read_bytes > prev.read_bytes, io.write_bytes > prev.write_bytes),
                None => (false, false),
            };

            let mut entry = FilesystemEntry {
                label: device.label.clone(),
                kernel_name: device.kernel_name.clone(),
                path: device.path.clone(),
                mountpoint: device.mountpoint.clone(),
                parent_kernel_name: device.parent_kernel_name.clone(),
                space_total: usage.total,
                space_used: usage.used,
                space_available: usage.available,
                space_used_percent: used_percent(usage.used, usage.total),
                read_bytes: io.read_bytes,
                write_bytes: io.write_bytes,
                activity_read,
                activity_write,
                temperature_current: None,
                temperature_max: None,
                temperature_min: None,
            };

            if activity_read || activity_write {
                if let Some(temperature) = self.drive_temperature(&device, now) {
                    entry.set_temperature(temperature);
                }
            }

            out.insert(device.label, entry);
        }

        Ok(out)
    }

    /// Temperature of the drive backing `device` if it supports SMART. A drive
    /// that fails either probe is recorded as not capable.
    fn drive_temperature(&mut self, device: &BlockDevice, now: SystemTime) -> Option<DriveTemperature> {
        let path = device.parent_device_path();
        let capable = match self.capabilities.get(&path, now) {
            Some(capable) => capable,
            None => {
                let capable = self.smart.is_capable(&path).unwrap_or_else(|e| {
                    tracing::warn!(message = "SMART capability probe failed", device = %path, error = %e);
                    false
                });

                tracing::info!(message = "recorded SMART capability", device = %path, capable = capable);
                self.capabilities.record(&path, capable, now);
                capable
            }
        };

        if !capable {
            return None;
        }

        match self.smart.read_temperature(&path) {
            Ok(temperature) => Some(temperature),
            Err(e) => {
                tracing::warn!(message = "unable to read drive temperature", device = %path, error = %e);
                self.capabilities.record(&path, false, now);
                None
            }
        }
    }
}

impl Debug for FilesystemSnapshotBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilesystemSnapshotBuilder")
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::{FilesystemSnapshotBuilder, Filesystems, SmartCapabilityCache, SmartRetry};
    use crate::disk::core::{DiskErrorKind, DriveTemperature, IoCounters};
    use crate::test::{FakeDiskStats, FakeEnumerator, FakeSmartProbe};
    use std::time::{Duration, SystemTime};

    const TEMPERATURE: DriveTemperature = DriveTemperature {
        current: 35,
        max: Some(52),
        min: Some(18),
    };

    struct Harness {
        builder: FilesystemSnapshotBuilder,
        stats: FakeDiskStats,
        smart: FakeSmartProbe,
    }

    fn harness(retry: SmartRetry) -> Harness {
        let enumerator = FakeEnumerator::new().with_device("data1", "sda1", "/srv/data1", "sda");
        let stats = FakeDiskStats::new()
            .with_usage("/srv/data1", 1000, 250, 750)
            .with_counters("sda1", 100, 50);
        let smart = FakeSmartProbe::new().with_capable("/dev/sda", TEMPERATURE);

        Harness {
            builder: FilesystemSnapshotBuilder::new(enumerator, stats.clone(), smart.clone(), retry),
            stats,
            smart,
        }
    }

    #[test]
    fn test_first_observation_inactive() {
        let mut h = harness(SmartRetry::Never);
        let fs = h.builder.build(&Filesystems::new(), SystemTime::now()).unwrap();
        let entry = fs.get("data1").unwrap();

        assert!(!entry.activity_read);
        assert!(!entry.activity_write);
        assert_eq!(None, entry.temperature_current);
        assert_eq!(0, h.smart.capability_probes());
    }

    #[test]
    fn test_usage_fields() {
        let mut h = harness(SmartRetry::Never);
        let fs = h.builder.build(&Filesystems::new(), SystemTime::now()).unwrap();
        let entry = fs.get("data1").unwrap();

        assert_eq!("sda1", entry.kernel_name);
        assert_eq!("sda", entry.parent_kernel_name);
        assert_eq!(1000, entry.space_total);
        assert_eq!(250, entry.space_used);
        assert_eq!(750, entry.space_available);
        assert_eq!(25.0, entry.space_used_percent);
        assert_eq!(100, entry.read_bytes);
        assert_eq!(50, entry.write_bytes);
    }

    #[test]
    fn test_activity_from_counter_delta() {
        let mut h = harness(SmartRetry::Never);
        let now = SystemTime::now();
        let first = h.builder.build(&Filesystems::new(), now).unwrap();

        h.stats.set_counters("sda1", IoCounters {
            read_bytes: 150,
            write_bytes: 50,
        });
        let second = h.builder.build(&first, now).unwrap();
        let entry = second.get("data1").unwrap();

        assert!(entry.activity_read);
        assert!(!entry.activity_write);
        assert_eq!(Some(35), entry.temperature_current);
        assert_eq!(Some(52), entry.temperature_max);
        assert_eq!(Some(18), entry.temperature_min);
    }

    #[test]
    fn test_no_activity_no_smart() {
        let mut h = harness(SmartRetry::Never);
        let now = SystemTime::now();
        let first = h.builder.build(&Filesystems::new(), now).unwrap();
        let second = h.builder.build(&first, now).unwrap();
        let entry = second.get("data1").unwrap();

        assert!(!entry.activity_read);
        assert!(!entry.activity_write);
        assert_eq!(None, entry.temperature_current);
        assert_eq!(0, h.smart.capability_probes());
        assert_eq!(0, h.smart.temperature_reads());

        let json = serde_json::to_value(entry).unwrap();
        assert!(json.get("temperatureCurrent").is_none());
        assert!(json.get("activityRead").is_some());
    }

    #[test]
    fn test_capability_probed_once() {
        let mut h = harness(SmartRetry::Never);
        let now = SystemTime::now();
        let mut previous = h.builder.build(&Filesystems::new(), now).unwrap();

        for i in 1..=5 {
            h.stats.set_counters("sda1", IoCounters {
                read_bytes: 100 + i,
                write_bytes: 50 + i,
            });
            previous = h.builder.build(&previous, now).unwrap();
        }

        assert_eq!(1, h.smart.capability_probes());
        assert_eq!(5, h.smart.temperature_reads());
    }

    #[test]
    fn test_failed_temperature_marks_not_capable() {
        let enumerator = FakeEnumerator::new().with_device("data1", "sda1", "/srv/data1", "sda");
        let stats = FakeDiskStats::new()
            .with_usage("/srv/data1", 1000, 250, 750)
            .with_counters("sda1", 100, 50);
        let smart = FakeSmartProbe::new().with_capable_no_temperature("/dev/sda");
        let mut builder = FilesystemSnapshotBuilder::new(enumerator, stats.clone(), smart.clone(), SmartRetry::Never);
        let now = SystemTime::now();

        let mut previous = builder.build(&Filesystems::new(), now).unwrap();
        for i in 1..=3 {
            stats.set_counters("sda1", IoCounters {
                read_bytes: 100 + i,
                write_bytes: 50,
            });
            previous = builder.build(&previous, now).unwrap();
        }

        assert_eq!(None, previous.get("data1").unwrap().temperature_current);
        assert_eq!(1, smart.capability_probes());
        assert_eq!(1, smart.temperature_reads());
    }

    #[test]
    fn test_not_capable_probed_again_after_retry() {
        let enumerator = FakeEnumerator::new().with_device("data1", "sda1", "/srv/data1", "sda");
        let stats = FakeDiskStats::new()
            .with_usage("/srv/data1", 1000, 250, 750)
            .with_counters("sda1", 100, 50);
        let smart = FakeSmartProbe::new().with_capable_no_temperature("/dev/sda");
        let retry = SmartRetry::After(Duration::from_secs(600));
        let mut builder = FilesystemSnapshotBuilder::new(enumerator, stats.clone(), smart.clone(), retry);
        let start = SystemTime::now();

        let mut previous = builder.build(&Filesystems::new(), start).unwrap();
        for (i, secs) in [1, 600, 601].iter().enumerate() {
            stats.set_counters("sda1", IoCounters {
                read_bytes: 101 + i as u64,
                write_bytes: 50,
            });
            previous = builder.build(&previous, start + Duration::from_secs(*secs)).unwrap();
        }

        assert!(previous.get("data1").unwrap().activity_read);
        assert_eq!(2, smart.capability_probes());
        assert_eq!(2, smart.temperature_reads());
    }

    #[test]
    fn test_missing_counters_fail() {
        let enumerator = FakeEnumerator::new().with_device("data1", "sda1", "/srv/data1", "sda");
        let stats = FakeDiskStats::new().with_usage("/srv/data1", 1000, 250, 750);
        let mut builder =
            FilesystemSnapshotBuilder::new(enumerator, stats, FakeSmartProbe::new(), SmartRetry::Never);

        let res = builder.build(&Filesystems::new(), SystemTime::now());
        assert_eq!(DiskErrorKind::Missing, res.unwrap_err().kind());
    }

    #[test]
    fn test_zero_size_filesystem() {
        let enumerator = FakeEnumerator::new().with_device("empty", "loop0", "/mnt/empty", "loop0");
        let stats = FakeDiskStats::new()
            .with_usage("/mnt/empty", 0, 0, 0)
            .with_counters("loop0", 0, 0);
        let mut builder =
            FilesystemSnapshotBuilder::new(enumerator, stats, FakeSmartProbe::new(), SmartRetry::Never);

        let fs = builder.build(&Filesystems::new(), SystemTime::now()).unwrap();
        assert_eq!(0.0, fs.get("empty").unwrap().space_used_percent);
    }

    #[test]
    fn test_capability_cache_never_retry() {
        let mut cache = SmartCapabilityCache::new(SmartRetry::Never);
        let now = SystemTime::now();

        assert_eq!(None, cache.get("/dev/sda", now));
        cache.record("/dev/sda", false, now);
        assert_eq!(Some(false), cache.get("/dev/sda", now + Duration::from_secs(86400)));
    }

    #[test]
    fn test_capability_cache_retry_after() {
        let mut cache = SmartCapabilityCache::new(SmartRetry::After(Duration::from_secs(600)));
        let now = SystemTime::now();

        cache.record("/dev/sda", false, now);
        cache.record("/dev/sdb", true, now);

        assert_eq!(Some(false), cache.get("/dev/sda", now + Duration::from_secs(599)));
        assert_eq!(None, cache.get("/dev/sda", now + Duration::from_secs(600)));
        assert_eq!(Some(true), cache.get("/dev/sdb", now + Duration::from_secs(86400)));
    }
}
