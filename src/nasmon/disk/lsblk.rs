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
use crate::disk::core::{BlockDevice, DeviceEnumerator, DiskError, DiskErrorKind};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_PROGRAM: &str = "lsblk";

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    label: Option<String>,
    kname: String,
    path: Option<String>,
    mountpoint: Option<String>,
    pkname: Option<String>,
}

/// Parse the output of `lsblk --json --list`, keeping only mounted devices.
fn parse_devices(output: &str) -> Result<Vec<BlockDevice>, DiskError> {
    let parsed: LsblkOutput = serde_json::from_str(output)
        .map_err(|e| DiskError::KindMsgCause(DiskErrorKind::Parse, "unable to parse lsblk output", Box::new(e)))?;

    Ok(parsed
        .blockdevices
        .into_iter()
        .filter_map(|d| {
            let mountpoint = d.mountpoint?;
            Some(BlockDevice {
                // Unlabeled filesystems are keyed by kernel name instead
                label: d.label.unwrap_or_else(|| d.kname.clone()),
                path: d.path.unwrap_or_else(|| format!("/dev/{}", d.kname)),
                parent_kernel_name: d.pkname.unwrap_or_else(|| d.kname.clone()),
                kernel_name: d.kname,
                mountpoint,
            })
        })
        .collect())
}

/// Enumerate mounted filesystems using the `lsblk` utility.
#[derive(Debug, Clone)]
pub struct Lsblk {
    program: String,
    timeout: Duration,
}

impl Lsblk {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl DeviceEnumerator for Lsblk {
    fn mounted_filesystems(&mut self) -> Result<Vec<BlockDevice>, DiskError> {
        let out = command::run(
            &self.program,
            &["--json", "--list", "--output", "LABEL,KNAME,PATH,MOUNTPOINT,PKNAME"],
            self.timeout,
        )?;

        if !out.status.success() {
            return Err(DiskError::KindMsgDetail(
                DiskErrorKind::Command,
                "lsblk exited unsuccessfully",
                out.status.to_string(),
            ));
        }

        let devices = parse_devices(&out.stdout)?;
        tracing::debug!(message = "enumerated mounted filesystems", count = devices.len());
        Ok(devices)
    }
}

#[cfg(test)]
mod test {
    use super::parse_devices;
    use crate::disk::core::DiskErrorKind;

    const OUTPUT: &str = r#"{
   "blockdevices": [
      {"label":null, "kname":"sda", "path":"/dev/sda", "mountpoint":null, "pkname":null},
      {"label":"data1", "kname":"sda1", "path":"/dev/sda1", "mountpoint":"/srv/data1", "pkname":"sda"},
      {"label":"rootfs", "kname":"mmcblk0p2", "path":"/dev/mmcblk0p2", "mountpoint":"/", "pkname":"mmcblk0"},
      {"label":null, "kname":"sdb", "path":"/dev/sdb", "mountpoint":"/srv/data2", "pkname":null}
   ]
}"#;

    #[test]
    fn test_parse_filters_unmounted() {
        let devices = parse_devices(OUTPUT).unwrap();
        let labels: Vec<&str> = devices.iter().map(|d| d.label.as_str()).collect();

        assert_eq!(vec!["data1", "rootfs", "sdb"], labels);
    }

    #[test]
    fn test_parse_fields() {
        let devices = parse_devices(OUTPUT).unwrap();
        let data1 = &devices[0];

        assert_eq!("sda1", data1.kernel_name);
        assert_eq!("/dev/sda1", data1.path);
        assert_eq!("/srv/data1", data1.mountpoint);
        assert_eq!("sda", data1.parent_kernel_name);
        assert_eq!("/dev/sda", data1.parent_device_path());
    }

    #[test]
    fn test_parse_whole_disk_filesystem() {
        let devices = parse_devices(OUTPUT).unwrap();
        let sdb = &devices[2];

        assert_eq!("sdb", sdb.label);
        assert_eq!("sdb", sdb.parent_kernel_name);
    }

    #[test]
    fn test_parse_invalid() {
        let res = parse_devices("not json");
        assert_eq!(DiskErrorKind::Parse, res.unwrap_err().kind());
    }
}
