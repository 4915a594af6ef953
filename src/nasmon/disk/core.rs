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

use std::collections::HashMap;
use std::error::Error;
use std::fmt::{self, Formatter};

/// Mounted filesystem as reported by the device enumerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub label: String,
    pub kernel_name: String,
    pub path: String,
    pub mountpoint: String,
    /// Kernel name of the physical disk backing this filesystem. Filesystems created
    /// directly on a disk without a partition table use their own kernel name.
    pub parent_kernel_name: String,
}

impl BlockDevice {
    /// Path of the underlying physical disk, the target of SMART queries.
    pub fn parent_device_path(&self) -> String {
        format!("/dev/{}", self.parent_kernel_name)
    }
}

/// Space usage of a filesystem, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

/// Cumulative bytes read and written since boot for a block device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoCounters {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Drive temperatures in degrees celsius as tracked by the drive itself. Not
/// every drive keeps lifetime extremes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveTemperature {
    pub current: i64,
    pub max: Option<i64>,
    pub min: Option<i64>,
}

/// Potential kinds of errors that can be encountered gathering filesystem and disk information
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy)]
pub enum DiskErrorKind {
    Command,
    Parse,
    Io,
    Missing,
    Timeout,
}

impl DiskErrorKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            DiskErrorKind::Command => "command",
            DiskErrorKind::Parse => "parse",
            DiskErrorKind::Io => "io",
            DiskErrorKind::Missing => "missing",
            DiskErrorKind::Timeout => "timeout",
        }
    }
}

/// Error running external disk tools or reading disk statistics from the OS
#[derive(Debug)]
pub enum DiskError {
    KindMsg(DiskErrorKind, &'static str),
    KindMsgDetail(DiskErrorKind, &'static str, String),
    KindMsgCause(DiskErrorKind, &'static str, Box<dyn Error + Send + Sync>),
}

impl DiskError {
    pub fn kind(&self) -> DiskErrorKind {
        match self {
            DiskError::KindMsg(kind, _) => *kind,
            DiskError::KindMsgDetail(kind, _, _) => *kind,
            DiskError::KindMsgCause(kind, _, _) => *kind,
        }
    }
}

impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DiskError::KindMsg(_, msg) => msg.fmt(f),
            DiskError::KindMsgDetail(_, msg, detail) => write!(f, "{}: {}", msg, detail),
            DiskError::KindMsgCause(_, msg, ref e) => write!(f, "{}: {}", msg, e),
        }
    }
}

impl Error for DiskError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DiskError::KindMsgCause(_, _, ref e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Source of currently mounted filesystems.
pub trait DeviceEnumerator: Send {
    fn mounted_filesystems(&mut self) -> Result<Vec<BlockDevice>, DiskError>;
}

/// Source of space usage and I/O counters from the operating system.
pub trait DiskStats: Send {
    fn disk_usage(&mut self, mountpoint: &str) -> Result<DiskUsage, DiskError>;

    /// I/O counters for every block device, keyed by kernel name.
    fn io_counters(&mut self) -> Result<HashMap<String, IoCounters>, DiskError>;
}

/// Source of S.M.A.R.T. information for physical disks.
///
/// Querying a drive can wake it up if it is spun down so callers should
/// avoid doing so unless the drive is known to be active.
pub trait SmartProbe: Send {
    fn is_capable(&mut self, device: &str) -> Result<bool, DiskError>;
    fn read_temperature(&mut self, device: &str) -> Result<DriveTemperature, DiskError>;
}
