//! End-to-end BFS scenarios against a sparse file standing in for a block
//! device, covering the lifecycle walkthroughs from spec.md §8.

use bfstools::device::{BlockDevice, RawDevice};
use bfstools::geometry::{Status, NONCE_SIZE};
use bfstools::plotname::PlotName;
use bfstools::{alloc, bfs, toc};
use tempfile::tempdir;

const GIB: u64 = 1 << 30;

fn make_device(path: &std::path::Path, size: u64) -> RawDevice {
    let dev = RawDevice::create(path, size).unwrap();
    bfs::init(&dev).unwrap();
    dev
}

fn write_host_plot(dir: &std::path::Path, key: u64, start_nonce: u64, nonces: u32) -> std::path::PathBuf {
    let name = PlotName {
        key,
        start_nonce,
        nonces,
        stagger: 0,
    };
    let path = dir.join(name.canonical_name());
    let data = vec![0x42u8; name.file_size() as usize];
    std::fs::write(&path, data).unwrap();
    path
}

#[test]
fn init_write_list_read_round_trip() {
    let dir = tempdir().unwrap();
    let device_path = dir.path().join("disk.img");
    let dev = make_device(&device_path, 4 * GIB);

    let plot_path = write_host_plot(dir.path(), 1, 0, 4096);
    let results = bfs::write_files(&dev, &[plot_path.clone()], false);
    assert!(results.into_iter().all(|r| r.is_ok()));

    let listing = bfs::list(&dev).unwrap();
    assert_eq!(listing.slots.len(), 1);
    let slot = &listing.slots[0];
    assert!(slot.overlay.is_none());
    assert_eq!(slot.slot.plot_name().canonical_name(), "1_0_4096");

    let read_back = dir.path().join("1_0_4096");
    let results = bfs::read_files(&dev, &[read_back.clone()]);
    assert!(results.into_iter().all(|r| r.is_ok()));
    let original = std::fs::read(&plot_path).unwrap();
    let copied = std::fs::read(&read_back).unwrap();
    assert_eq!(original, copied);
}

#[test]
fn write_conflict_is_reported_and_skips_that_file() {
    let dir = tempdir().unwrap();
    let device_path = dir.path().join("disk.img");
    let dev = make_device(&device_path, 4 * GIB);

    let a = write_host_plot(dir.path(), 1, 0, 4096);
    bfs::write_files(&dev, &[a], false);

    let dup = write_host_plot(dir.path(), 1, 0, 4096);
    let results = bfs::write_files(&dev, &[dup], false);
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(bfstools::PlotError::Conflict(_))));
}

#[test]
fn toc_fills_at_31_slots_then_refuses() {
    let dir = tempdir().unwrap();
    let device_path = dir.path().join("disk.img");
    // 31 plots of 4096 nonces each comfortably fit; size generously.
    let one_plot = 4096u64 * NONCE_SIZE;
    let dev = make_device(&device_path, 1024 + 32 * one_plot);

    for i in 0..31u64 {
        let path = write_host_plot(dir.path(), i + 1, 0, 4096);
        let results = bfs::write_files(&dev, &[path], false);
        assert!(results[0].is_ok(), "slot {i} should succeed");
    }

    let extra = write_host_plot(dir.path(), 999, 0, 4096);
    let results = bfs::write_files(&dev, &[extra], false);
    assert!(matches!(results[0], Err(bfstools::PlotError::Capacity(_))));
}

#[test]
fn delete_compacts_toc_and_frees_the_extent_for_reuse() {
    let dir = tempdir().unwrap();
    let device_path = dir.path().join("disk.img");
    let dev = make_device(&device_path, 4 * GIB);

    let a = write_host_plot(dir.path(), 1, 0, 4096);
    let b = write_host_plot(dir.path(), 2, 0, 4096);
    bfs::write_files(&dev, &[a], false);
    bfs::write_files(&dev, &[b], false);

    let results = bfs::delete_files(&dev, &["1_0_4096".to_string()]);
    assert!(results.into_iter().all(|r| r.is_ok()));

    let listing = bfs::list(&dev).unwrap();
    assert_eq!(listing.slots.len(), 1);
    assert_eq!(listing.slots[0].slot.plot_name().canonical_name(), "2_0_4096");

    // The gap left by the deleted plot is large enough to reuse.
    let c = write_host_plot(dir.path(), 3, 0, 2048);
    let results = bfs::write_files(&dev, &[c], false);
    assert!(results[0].is_ok());
    let (usable_start, usable_end) = bfs::usable_range(&dev).unwrap();
    let toc = bfs::read_toc(&dev).unwrap();
    let c_slot = toc.slot_by_name("3_0_2048").unwrap();
    assert_eq!(c_slot.start_pos, usable_start);
    let free = alloc::FreeExtents::compute(&toc, usable_start, usable_end);
    assert!(free.total_free() > 0);
}

#[test]
fn write_with_convert_flag_leaves_a_poc2_slot() {
    let dir = tempdir().unwrap();
    let device_path = dir.path().join("disk.img");
    let dev = make_device(&device_path, 4 * GIB);

    // A staggered POC1 source: 8 nonces in 2 groups of 4.
    let name = PlotName {
        key: 1,
        start_nonce: 0,
        nonces: 8,
        stagger: 4,
    };
    let path = dir.path().join(name.canonical_name());
    let mut data = vec![0u8; name.file_size() as usize];
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = (i % 256) as u8;
    }
    std::fs::write(&path, &data).unwrap();

    let results = bfs::write_files(&dev, &[path], true);
    assert!(results.into_iter().all(|r| r.is_ok()));

    let toc = bfs::read_toc(&dev).unwrap();
    let slot = toc.slots().next().unwrap();
    assert_eq!(slot.status, Status::Ok);
    assert_eq!(slot.stagger, 0);
}

#[test]
fn fresh_device_rejects_garbage_toc() {
    let dir = tempdir().unwrap();
    let device_path = dir.path().join("disk.img");
    let dev = RawDevice::create(&device_path, 4 * GIB).unwrap();
    // Never initialized: first 4 bytes are zero, not "BFS0".
    let mut raw = [0u8; bfstools::geometry::TOC_SIZE];
    dev.read_at(0, &mut raw).unwrap();
    assert!(toc::Toc::decode(&raw).is_err());
}
