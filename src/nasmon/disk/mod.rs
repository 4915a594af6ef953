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

mod command;
mod core;
mod filesystem;
mod lsblk;
mod os;
mod smart;

pub use crate::disk::core::{
    BlockDevice, DeviceEnumerator, DiskError, DiskErrorKind, DiskStats, DiskUsage, DriveTemperature, IoCounters,
    SmartProbe,
};
pub use crate::disk::filesystem::{
    FilesystemEntry, FilesystemSnapshotBuilder, Filesystems, SmartCapabilityCache, SmartRetry,
};
pub use crate::disk::lsblk::{Lsblk, DEFAULT_PROGRAM as LSBLK_DEFAULT_PROGRAM};
pub use crate::disk::os::SystemDiskStats;
pub use crate::disk::smart::{SmartCtl, DEFAULT_PROGRAM as SMARTCTL_DEFAULT_PROGRAM};
