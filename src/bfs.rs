//! BFS operations: init / list / write / read / delete / check, per
//! spec.md §4.6. Each function reports errors for the file it touches and
//! otherwise continues with the rest of a multi-file sweep (spec.md §7).

use crate::device::{BlockDevice, RawDevice};
use crate::error::PlotError;
use crate::geometry::{self, Status, SECTOR_SIZE, TOC_SIZE};
use crate::pipeline::Pipeline;
use crate::plotname::PlotName;
use crate::toc::{Slot, Toc};
use log::info;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

const MB: u64 = 1024 * 1024;

/// Writes exactly `BFS0` followed by 1020 zero bytes at offset 0. Callers
/// at the CLI layer are responsible for the interactive confirmation
/// prompt (spec.md §4.6/§6); this function is the destructive act itself.
pub fn init(dev: &RawDevice) -> Result<(), PlotError> {
    let toc = Toc::empty();
    dev.write_at(0, toc.raw())?;
    dev.sync()?;
    Ok(())
}

pub fn usable_range(dev: &dyn BlockDevice) -> Result<(u64, u64), PlotError> {
    let size = dev.size()?;
    if size < 2 * SECTOR_SIZE {
        return Err(PlotError::Format("device is smaller than the BFS overhead".into()));
    }
    Ok((TOC_SIZE as u64, size - 2 * SECTOR_SIZE))
}

pub fn read_toc(dev: &dyn BlockDevice) -> Result<Toc, PlotError> {
    let mut raw = [0u8; TOC_SIZE];
    dev.read_at(0, &mut raw)?;
    Toc::decode(&raw)
}

fn write_toc(dev: &dyn BlockDevice, toc: &Toc) -> Result<(), PlotError> {
    dev.write_at(0, toc.raw())?;
    dev.sync()
}

/// One line of `list` output: the slot plus a human overlay describing any
/// in-progress state (spec.md §4.6: `.plotting`, `.converting (scoop/2048)`).
pub struct ListedSlot {
    pub slot: Slot,
    pub overlay: Option<String>,
}

pub struct ListResult {
    pub slots: Vec<ListedSlot>,
    pub free_bytes: u64,
}

pub fn list(dev: &dyn BlockDevice) -> Result<ListResult, PlotError> {
    let (usable_start, usable_end) = usable_range(dev)?;
    let toc = read_toc(dev)?;
    let mut free = usable_end - usable_start;
    let mut slots = Vec::new();
    for slot in toc.slots() {
        free -= geometry::nonces_to_bytes(slot.nonces);
        let overlay = match slot.status {
            Status::Ok => None,
            Status::Incomplete => Some(".plotting".to_string()),
            Status::Converting => Some(format!(".converting ({}/2048)", slot.last_completed_scoop)),
        };
        slots.push(ListedSlot { slot: *slot, overlay });
    }
    slots.sort_by_key(|s| s.slot.start_pos);
    Ok(ListResult { slots, free_bytes: free })
}

/// Writes each source host file onto the device. `convert_to_poc2` runs
/// the POC1→POC2 shuffle immediately after the bulk copy when the source
/// is POC1 (spec.md §4.6).
pub fn write_files(
    dev: &dyn BlockDevice,
    files: &[std::path::PathBuf],
    convert_to_poc2: bool,
) -> Vec<Result<(), PlotError>> {
    let mut results = Vec::new();
    for path in files {
        results.push(write_one(dev, path, convert_to_poc2));
    }
    results
}

fn write_one(
    dev: &dyn BlockDevice,
    path: &Path,
    convert_to_poc2: bool,
) -> Result<(), PlotError> {
    let name = PlotName::parse_path(path)?;
    let mut toc = read_toc(dev)?;
    if let Some(existing) = toc.find_conflict(&name) {
        return Err(PlotError::Conflict(format!(
            "{} already exists on device (startPos {})",
            existing.plot_name().canonical_name(),
            existing.start_pos
        )));
    }
    let plot_size = std::fs::metadata(path)
        .map_err(|e| PlotError::Io(format!("stat {}: {e}", path.display())))?
        .len();
    if plot_size != name.file_size() {
        return Err(PlotError::Format(format!(
            "{}: declared size {} does not match file size {plot_size}",
            path.display(),
            name.file_size()
        )));
    }

    let (usable_start, usable_end) = usable_range(dev)?;
    let mut free = crate::alloc::FreeExtents::compute(&toc, usable_start, usable_end);
    let start_pos = free.place(plot_size)?;

    // Reserve the slot as INCOMPLETE before the bulk copy (spec.md §3
    // lifecycle), then rewrite the TOC so a crash mid-copy is visible.
    toc.insert(Slot {
        key: name.key,
        start_nonce: name.start_nonce,
        nonces: name.nonces,
        stagger: name.stagger,
        status: Status::Incomplete,
        start_pos,
        last_completed_scoop: 0,
    })?;
    write_toc(dev, &toc)?;

    info!("writing {} to device at offset {start_pos}", path.display());
    copy_file_to_device(path, dev, start_pos, plot_size)?;

    toc.update_status(start_pos, Status::Ok, 0)?;
    write_toc(dev, &toc)?;

    if convert_to_poc2 && !name.is_poc2() {
        let slot = *toc.slot_at(start_pos).unwrap();
        crate::shuffle::shuffle_bfs_slot(dev, &mut toc, &slot)?;
    }
    Ok(())
}

/// Streams `size` bytes from a host file to a positioned region of `dev`
/// through the §4.2 pipeline, with the original's 2-second throughput
/// printout.
fn copy_file_to_device(
    src: &Path,
    dev: &dyn BlockDevice,
    start_pos: u64,
    size: u64,
) -> Result<(), PlotError> {
    let pipeline = Pipeline::new(64);
    let producer = pipeline.producer();
    let consumer = pipeline.consumer();
    let src_path = src.to_path_buf();

    let reader = std::thread::scope(|scope| {
        let handle = scope.spawn(move || -> Result<(), PlotError> {
            let mut file = File::open(&src_path)
                .map_err(|e| PlotError::Io(format!("opening {}: {e}", src_path.display())))?;
            let mut remaining = size;
            while remaining > 0 {
                let chunk = remaining.min(MB) as usize;
                let mut buf = vec![0u8; chunk];
                file.read_exact(&mut buf)
                    .map_err(|e| PlotError::Io(format!("reading {}: {e}", src_path.display())))?;
                remaining -= chunk as u64;
                if !producer.send(buf) {
                    break;
                }
            }
            producer.finish();
            Ok(())
        });

        let mut offset = start_pos;
        let mut last_report = std::time::Instant::now();
        while let Some(buf) = consumer.recv() {
            dev.write_at(offset, &buf)?;
            offset += buf.len() as u64;
            if let Some((delta, secs)) = pipeline.progress.maybe_tick() {
                let speed = (delta as f64 / secs) / MB as f64;
                print!(
                    "\rCopied {:.1} GB ({speed:.0} MB/s).     ",
                    pipeline.progress.total() as f64 / (1024.0 * MB as f64)
                );
                let _ = std::io::stdout().flush();
            }
        }
        println!();
        handle.join().expect("copy reader thread panicked")
    });
    dev.sync()?;
    reader
}

/// Copies matching plot files from the device to host files, per
/// spec.md §4.6.
pub fn read_files(
    dev: &dyn BlockDevice,
    files: &[std::path::PathBuf],
) -> Vec<Result<(), PlotError>> {
    let toc = match read_toc(dev) {
        Ok(toc) => toc,
        Err(e) => return vec![Err(e)],
    };
    files
        .iter()
        .map(|dest| read_one(dev, &toc, dest))
        .collect()
}

fn read_one(dev: &dyn BlockDevice, toc: &Toc, dest: &Path) -> Result<(), PlotError> {
    let requested = dest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PlotError::Format(format!("not a valid filename: {}", dest.display())))?;
    let slot = toc
        .slot_by_name(requested)
        .ok_or_else(|| PlotError::Format(format!("{requested} not found on device")))?;
    let size = geometry::nonces_to_bytes(slot.nonces);
    info!("reading {requested} from device offset {}", slot.start_pos);
    copy_device_to_file(dev, slot.start_pos, size, dest)
}

fn copy_device_to_file(
    dev: &dyn BlockDevice,
    start_pos: u64,
    size: u64,
    dest: &Path,
) -> Result<(), PlotError> {
    let mut file =
        File::create(dest).map_err(|e| PlotError::Io(format!("creating {}: {e}", dest.display())))?;
    let mut remaining = size;
    let mut offset = start_pos;
    while remaining > 0 {
        let chunk = remaining.min(MB);
        let mut buf = vec![0u8; chunk as usize];
        dev.read_at(offset, &mut buf)?;
        file.write_all(&buf)
            .map_err(|e| PlotError::Io(format!("writing {}: {e}", dest.display())))?;
        offset += chunk;
        remaining -= chunk;
    }
    Ok(())
}

/// Removes matching slots and rewrites the compacted TOC. Data blocks on
/// disk are never touched (spec.md §3).
pub fn delete_files(dev: &dyn BlockDevice, names: &[String]) -> Vec<Result<(), PlotError>> {
    let mut toc = match read_toc(dev) {
        Ok(toc) => toc,
        Err(e) => return vec![Err(e)],
    };
    let mut results = Vec::new();
    for name in names {
        let found = toc.slot_by_name(name).map(|s| s.start_pos);
        match found {
            Some(start_pos) => {
                toc.remove(start_pos);
                results.push(Ok(()));
            }
            None => results.push(Err(PlotError::Format(format!("{name} not found on device")))),
        }
    }
    if let Err(e) = write_toc(dev, &toc) {
        results.push(Err(e));
    }
    results
}

/// Structural validator over a plot file's declared name vs. actual size
/// (supplemented from `plotChecker.py`; no cryptographic verification).
pub fn check(path: &Path) -> Result<(), PlotError> {
    let name = PlotName::parse_path(path)?;
    let size = std::fs::metadata(path)
        .map_err(|e| PlotError::Io(format!("stat {}: {e}", path.display())))?
        .len();
    if size != name.file_size() {
        return Err(PlotError::Format(format!(
            "{}: expected {} bytes for {} nonces, found {size}",
            path.display(),
            name.file_size(),
            name.nonces
        )));
    }
    if name.stagger != 0 && name.nonces % name.stagger != 0 {
        return Err(PlotError::Format(format!(
            "{}: stagger {} does not divide nonces {}",
            path.display(),
            name.stagger,
            name.nonces
        )));
    }
    Ok(())
}

/// Sets Unix permissions on a resolved device path (spec.md §6's `p`
/// command), e.g. to grant a freshly-created loop device group access.
pub fn set_permissions(path: &Path, mode: u32) -> Result<(), PlotError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| PlotError::Io(format!("setting permissions on {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::NamedTempFile;

    #[test]
    fn set_permissions_applies_requested_mode() {
        let tmp = NamedTempFile::new().unwrap();
        set_permissions(tmp.path(), 0o640).unwrap();
        let mode = std::fs::metadata(tmp.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn check_rejects_size_mismatch() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), vec![0u8; 10]).unwrap();
        let named = tmp.path().with_file_name("1_0_1");
        std::fs::rename(tmp.path(), &named).unwrap();
        let result = check(&named);
        std::fs::remove_file(&named).ok();
        assert!(matches!(result, Err(PlotError::Format(_))));
    }
}
