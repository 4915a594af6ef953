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

use crate::disk::core::{DiskError, DiskErrorKind, DiskStats, DiskUsage, IoCounters};
use nix::sys::statvfs::statvfs;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const DISKSTATS_PATH: &str = "/proc/diskstats";

// The kernel always reports I/O in 512 byte sectors, regardless of the sector
// size of the device.
const SECTOR_SIZE: u64 = 512;

/// Parse the contents of `/proc/diskstats` into I/O counters keyed by kernel name.
///
/// Lines look like `major minor name reads merged sectors_read ms writes merged
/// sectors_written ...`. Lines with too few fields are skipped.
fn parse_diskstats(contents: &str) -> HashMap<String, IoCounters> {
    contents
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                return None;
            }

            let sectors_read = fields[5].parse::<u64>().ok()?;
            let sectors_written = fields[9].parse::<u64>().ok()?;
            Some((
                fields[2].to_owned(),
                IoCounters {
                    read_bytes: sectors_read * SECTOR_SIZE,
                    write_bytes: sectors_written * SECTOR_SIZE,
                },
            ))
        })
        .collect()
}

/// Space usage of a filesystem from the fields of `statvfs`. Used space counts
/// every block that isn't free, so blocks reserved for root are not counted as
/// used but are also not available.
fn usage_from_blocks(fragment_size: u64, blocks: u64, blocks_free: u64, blocks_available: u64) -> DiskUsage {
    DiskUsage {
        total: blocks * fragment_size,
        used: blocks.saturating_sub(blocks_free) * fragment_size,
        available: blocks_available * fragment_size,
    }
}

/// Space usage via `statvfs` and I/O counters from `/proc/diskstats`.
#[derive(Debug, Clone)]
pub struct SystemDiskStats {
    diskstats: PathBuf,
}

impl SystemDiskStats {
    pub fn new() -> Self {
        Self::with_diskstats(DISKSTATS_PATH)
    }

    /// Read I/O counters from a file in the format of `/proc/diskstats` at `path`.
    pub fn with_diskstats<P: AsRef<Path>>(path: P) -> Self {
        Self {
            diskstats: path.as_ref().to_path_buf(),
        }
    }
}

impl Default for SystemDiskStats {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskStats for SystemDiskStats {
    fn disk_usage(&mut self, mountpoint: &str) -> Result<DiskUsage, DiskError> {
        let stat = statvfs(mountpoint).map_err(|e| {
            DiskError::KindMsgCause(
                DiskErrorKind::Io,
                "unable to get filesystem usage",
                format!("{}: {}", mountpoint, e).into(),
            )
        })?;

        Ok(usage_from_blocks(
            u64::from(stat.fragment_size()),
            u64::from(stat.blocks()),
            u64::from(stat.blocks_free()),
            u64::from(stat.blocks_available()),
        ))
    }

    fn io_counters(&mut self) -> Result<HashMap<String, IoCounters>, DiskError> {
        let contents = fs::read_to_string(&self.diskstats)
            .map_err(|e| DiskError::KindMsgCause(DiskErrorKind::Io, "unable to read disk statistics", Box::new(e)))?;

        Ok(parse_diskstats(&contents))
    }
}
