// SPDX-License-Identifier: GPL-3.0-only

//! Mount table inspection

use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use crate::error::{Result, SysError};

const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// One line of `/proc/self/mountinfo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub source: String,
}

impl MountEntry {
    pub fn is_fuse(&self) -> bool {
        self.fs_type == "fuse" || self.fs_type.starts_with("fuse.")
    }
}

pub fn read_mount_table() -> Result<Vec<MountEntry>> {
    let mount_info = fs::read_to_string(MOUNTINFO_PATH)?;
    parse_mountinfo(&mount_info)
}

pub fn parse_mountinfo(input: &str) -> Result<Vec<MountEntry>> {
    let mut entries = Vec::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let (left, right) = line
            .split_once(" - ")
            .ok_or_else(|| SysError::InvalidMountInfoLine(line.to_string()))?;

        let mount_point = left
            .split_whitespace()
            .nth(4)
            .ok_or_else(|| SysError::InvalidMountInfoLine(line.to_string()))?;

        let mut right_fields = right.split_whitespace();
        let fs_type = right_fields
            .next()
            .ok_or_else(|| SysError::InvalidMountInfoLine(line.to_string()))?;
        let source = right_fields.next().unwrap_or_default();

        entries.push(MountEntry {
            mount_point: PathBuf::from(OsString::from_vec(unescape_mount_field(mount_point))),
            fs_type: fs_type.to_string(),
            source: String::from_utf8_lossy(&unescape_mount_field(source)).into_owned(),
        });
    }

    Ok(entries)
}

/// Mount points where `device` is currently mounted.
///
/// Both sides are canonicalized when possible so `/dev/disk/by-*` links and
/// `/dev/sdX` compare equal.
pub fn mount_points_of(table: &[MountEntry], device: &Path) -> Vec<PathBuf> {
    let wanted = device
        .canonicalize()
        .unwrap_or_else(|_| device.to_path_buf());

    table
        .iter()
        .filter(|entry| {
            let source = Path::new(&entry.source);
            source == wanted
                || source
                    .canonicalize()
                    .map(|resolved| resolved == wanted)
                    .unwrap_or(false)
        })
        .map(|entry| entry.mount_point.clone())
        .collect()
}

/// The entry mounted exactly at `path`, if any. Later mounts shadow earlier ones.
pub fn entry_at<'a>(table: &'a [MountEntry], path: &Path) -> Option<&'a MountEntry> {
    table.iter().rev().find(|entry| entry.mount_point == path)
}

/// Undo the kernel's `\ooo` octal escaping. Works on raw bytes so multibyte
/// names survive intact.
fn unescape_mount_field(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 4 <= bytes.len()
            && bytes[index + 1..index + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let byte = bytes[index + 1..index + 4]
                .iter()
                .fold(0u16, |acc, digit| acc * 8 + u16::from(digit - b'0'));
            if let Ok(byte) = u8::try_from(byte) {
                output.push(byte);
                index += 4;
                continue;
            }
        }

        output.push(bytes[index]);
        index += 1;
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "36 25 8:2 / / rw,relatime - ext4 /dev/nvme0n1p2 rw\n\
37 25 0:5 / /proc rw,nosuid,nodev,noexec,relatime - proc proc rw\n\
52 25 8:17 / /Live/Temp/system/sdb1 rw,relatime - ext4 /dev/sdb1 rw\n\
53 25 8:17 / /Mount/Roaming/Ab3dEf7hIj9kLm0p rw,relatime - ext4 /dev/sdb1 rw\n\
60 25 0:61 / /Users rw,nosuid - fuse.zenfs zenfs rw\n\
61 25 0:62 / /mnt/My\\040Disk rw - vfat /dev/sdc1 rw\n";

    #[test]
    fn parses_mount_points_types_and_sources() {
        let table = parse_mountinfo(SAMPLE).expect("parse should succeed");
        assert_eq!(table.len(), 6);
        assert_eq!(table[0].mount_point, PathBuf::from("/"));
        assert_eq!(table[0].source, "/dev/nvme0n1p2");
        assert_eq!(table[5].mount_point, PathBuf::from("/mnt/My Disk"));
    }

    #[test]
    fn finds_every_mount_of_a_device() {
        let table = parse_mountinfo(SAMPLE).unwrap();
        let mounts = mount_points_of(&table, Path::new("/dev/sdb1"));
        assert_eq!(
            mounts,
            vec![
                PathBuf::from("/Live/Temp/system/sdb1"),
                PathBuf::from("/Mount/Roaming/Ab3dEf7hIj9kLm0p"),
            ]
        );
    }

    #[test]
    fn detects_fuse_mount_at_path() {
        let table = parse_mountinfo(SAMPLE).unwrap();
        assert!(entry_at(&table, Path::new("/Users")).unwrap().is_fuse());
        assert!(entry_at(&table, Path::new("/home")).is_none());
    }

    #[test]
    fn keeps_multibyte_mount_points() {
        let line = "36 35 98:0 / /media/Músic rw,relatime - ext4 /dev/sdb1 rw\n";
        let table = parse_mountinfo(line).unwrap();
        assert_eq!(table[0].mount_point, PathBuf::from("/media/Músic"));
        assert_eq!(
            mount_points_of(&table, Path::new("/dev/sdb1")),
            vec![PathBuf::from("/media/Músic")]
        );
        assert!(entry_at(&table, Path::new("/media/Músic")).is_some());
    }

    #[test]
    fn decodes_escape_at_end_of_field() {
        let line = "40 25 8:33 / /mnt/trailing\\040 rw - ext4 /dev/sdc1 rw\n";
        let table = parse_mountinfo(line).unwrap();
        assert_eq!(table[0].mount_point, PathBuf::from("/mnt/trailing "));
    }

    #[test]
    fn rejects_lines_without_separator() {
        assert!(parse_mountinfo("36 25 8:2 / / rw\n").is_err());
    }
}
