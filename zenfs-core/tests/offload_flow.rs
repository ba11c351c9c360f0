// SPDX-License-Identifier: GPL-3.0-only

mod common;

use common::{FakeUsage, Host};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use zenfs_core::ghost::read_ghost;
use zenfs_core::{OffloadMover, OffloadOutcome, identity};
use zenfs_types::{DrivePaths, DriveRecord, DriveType, OffloadConfig};

const ROOMY: &str = "Ab3dEf7hIj9kLm0p";
const CROWDED: &str = "Zx9Yw8Vu7Ts6Rq5P";

fn bind_drive(host: &Host, uuid: &str) {
    let record = DriveRecord {
        uuid: uuid.to_string(),
        label: uuid.to_string(),
        drive_type: DriveType::Roaming,
        created_at: 0,
    };
    identity::write(&host.layout().roaming_mount(uuid), &record).unwrap();
}

fn config() -> OffloadConfig {
    OffloadConfig {
        offload_threshold: 80.0,
        roaming_safe_limit: 90.0,
        main_drive: None,
        min_file_size: 1024,
    }
}

fn big_file(host: &Host, rel: &str, size: usize) {
    let path = host.home("alice").join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, vec![7u8; size]).unwrap();
}

#[test]
fn largest_file_goes_to_least_used_safe_drive() {
    let host = Host::new();
    bind_drive(&host, ROOMY);
    bind_drive(&host, CROWDED);
    big_file(&host, "Videos/film.mkv", 8192);
    big_file(&host, "Downloads/disk.iso", 4096);

    let film = host.layout().real_home("alice").join("Videos/film.mkv");
    let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
    fs::File::options()
        .write(true)
        .open(&film)
        .unwrap()
        .set_modified(mtime)
        .unwrap();

    let usage = FakeUsage::default();
    usage.home_readings(&[95.0, 95.0, 70.0]);
    usage.set(&host.layout().roaming_mount(ROOMY), 50.0);
    usage.set(&host.layout().roaming_mount(CROWDED), 92.0);

    let report = OffloadMover::new(&host.ctx, &usage, config()).run();
    assert_eq!(report.outcome, OffloadOutcome::TargetReached);
    assert_eq!(report.moved, 1);
    assert_eq!(report.bytes, 8192);

    let drive = DrivePaths::new(host.layout().roaming_mount(ROOMY));
    let moved = drive.user_file("alice", Path::new("Videos/film.mkv"));
    assert_eq!(fs::metadata(&moved).unwrap().len(), 8192);
    assert_eq!(fs::metadata(&moved).unwrap().modified().unwrap(), mtime);
    assert!(!film.exists());

    let rel = Path::new("Videos/film.mkv");
    assert_eq!(read_ghost(&drive.ghost_entry("alice", rel)).unwrap().owner, ROOMY);
    assert_eq!(
        read_ghost(&host.layout().system_entry("alice", rel)).unwrap().owner,
        ROOMY
    );
    assert!(host.layout().real_home("alice").join("Downloads/disk.iso").exists());
}

#[test]
fn over_safe_limit_picks_least_used_under_ceiling() {
    let host = Host::new();
    bind_drive(&host, ROOMY);
    bind_drive(&host, CROWDED);
    big_file(&host, "archive.tar", 2048);

    let usage = FakeUsage::default();
    usage.home_readings(&[95.0]);
    usage.set(&host.layout().roaming_mount(ROOMY), 93.0);
    usage.set(&host.layout().roaming_mount(CROWDED), 97.0);

    let report = OffloadMover::new(&host.ctx, &usage, config()).run();
    assert_eq!(report.outcome, OffloadOutcome::Exhausted);
    assert_eq!(report.moved, 1);
    let target = DrivePaths::new(host.layout().roaming_mount(ROOMY))
        .user_file("alice", Path::new("archive.tar"));
    assert!(target.is_file());
}

#[test]
fn saturated_drives_abort_the_pass() {
    let host = Host::new();
    bind_drive(&host, ROOMY);
    big_file(&host, "archive.tar", 2048);

    let usage = FakeUsage::default();
    usage.home_readings(&[95.0]);
    usage.set(&host.layout().roaming_mount(ROOMY), 99.5);

    let report = OffloadMover::new(&host.ctx, &usage, config()).run();
    assert_eq!(report.outcome, OffloadOutcome::Saturated);
    assert_eq!(report.moved, 0);
    assert!(host.layout().real_home("alice").join("archive.tar").exists());
}

#[test]
fn below_threshold_is_a_no_op() {
    let host = Host::new();
    bind_drive(&host, ROOMY);
    big_file(&host, "archive.tar", 2048);

    let usage = FakeUsage::default();
    usage.home_readings(&[40.0]);

    let report = OffloadMover::new(&host.ctx, &usage, config()).run();
    assert_eq!(report.outcome, OffloadOutcome::BelowThreshold);
    assert!(host.layout().real_home("alice").join("archive.tar").exists());
}
