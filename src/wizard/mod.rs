//! Plot wizard orchestrator: plan / create / move / miner activities, per
//! spec.md §4.9. Three worker threads (create, move, miner) coordinate
//! over bounded queues; a shared cancel flag propagates from `SIGINT` to
//! all of them, matching the teacher's own `nix::sys::signal` use for its
//! FUSE unmount handler (`src/main.rs`), repurposed here for cooperative
//! shutdown instead of an unmount.

pub mod config;
pub mod miner;
pub mod plan;
pub mod plotter;

use crate::error::PlotError;
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{info, warn};
use plan::PlannedChunk;
use plotter::{run_plotter, PlotterArgs};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A plotted file ready to be moved from scratch space to its final
/// directory.
struct CreatedFile {
    scratch_path: PathBuf,
    final_dir: PathBuf,
}

/// Shared cancellation flag; all three worker loops check it at the top
/// of every iteration (spec.md §5).
#[derive(Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CancelFlag {
    fn default() -> CancelFlag {
        CancelFlag::new()
    }
}

/// Polls `path`'s free space at a 1s interval until at least `needed`
/// bytes are available or cancellation is observed.
fn wait_for_free_space(path: &std::path::Path, needed: u64, cancel: &CancelFlag) -> bool {
    loop {
        if cancel.is_set() {
            return false;
        }
        if free_space(path) >= needed {
            return true;
        }
        thread::sleep(Duration::from_secs(1));
    }
}

fn free_space(path: &std::path::Path) -> u64 {
    match nix::sys::statvfs::statvfs(path) {
        Ok(stat) => stat.blocks_available() as u64 * stat.fragment_size(),
        Err(_) => 0,
    }
}

/// Runs the `create` activity for one planned chunk: wait for scratch
/// space, spawn the plotter, hand the result to the `move` worker.
fn create_worker(
    chunks: Receiver<PlannedChunk>,
    created_tx: Sender<CreatedFile>,
    config: config::WizardConfig,
    tmp_dir: Option<PathBuf>,
    cancel: CancelFlag,
) {
    while let Ok(chunk) = chunks.recv() {
        if cancel.is_set() {
            break;
        }
        let scratch_dir = tmp_dir.clone().unwrap_or_else(|| chunk.target_dir.clone());
        let nonce_size = crate::geometry::NONCE_SIZE;
        let chunk_size = chunk.nonces * nonce_size;
        if !wait_for_free_space(&scratch_dir, chunk_size, &cancel) {
            break;
        }
        let args = PlotterArgs {
            key: config.key,
            out_dir: scratch_dir.clone(),
            threads: 1,
            plot_core: config.plot_core,
            start_nonce: chunk.start_nonce,
            nonces: chunk.nonces,
            mem_in_nonces: None,
        };
        match run_plotter(&config.plotter_path_name, &args) {
            Ok(path) => {
                info!("plotted {}", path.display());
                if created_tx
                    .send(CreatedFile {
                        scratch_path: path,
                        final_dir: chunk.target_dir.clone(),
                    })
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                warn!("plotter failed for chunk starting at {}: {e}", chunk.start_nonce);
                cancel.set();
                break;
            }
        }
    }
}

/// Runs the `move` activity: if plotting used a scratch directory, copy
/// the completed file to its final directory and remove the source
/// (spec.md §4.9).
fn move_worker(created: Receiver<CreatedFile>, moved_tx: Sender<PathBuf>, cancel: CancelFlag) {
    while let Ok(file) = created.recv() {
        if cancel.is_set() {
            break;
        }
        let dest = file.final_dir.join(file.scratch_path.file_name().unwrap());
        if file.scratch_path != dest {
            if let Err(e) = std::fs::copy(&file.scratch_path, &dest) {
                warn!("moving {} to {}: {e}", file.scratch_path.display(), dest.display());
                cancel.set();
                break;
            }
            let _ = std::fs::remove_file(&file.scratch_path);
        }
        if moved_tx.send(dest).is_err() {
            break;
        }
    }
}

/// Runs the `miner` activity: restarts the external miner after every
/// successful move, if configured to do so (spec.md §4.9).
fn miner_worker(moved: Receiver<PathBuf>, miner_path: Option<PathBuf>, mining_conf: Option<PathBuf>, cancel: CancelFlag) {
    let Some(miner_path) = miner_path else {
        // Drain so the channel doesn't back up; no restarts configured.
        while moved.recv().is_ok() {}
        return;
    };
    let mut supervisor = miner::MinerSupervisor::new(miner_path, mining_conf);
    while let Ok(path) = moved.recv() {
        if cancel.is_set() {
            break;
        }
        info!("restarting miner after moving {}", path.display());
        if let Err(e) = supervisor.restart() {
            warn!("miner restart failed: {e}");
        }
    }
}

/// Runs the full pipeline (plan → create → move → miner) over `chunks`
/// until they're exhausted or `cancel` is set.
pub fn run(
    config: config::WizardConfig,
    chunks: Vec<PlannedChunk>,
    cancel: CancelFlag,
) -> Result<(), PlotError> {
    let (chunk_tx, chunk_rx) = bounded::<PlannedChunk>(chunks.len().max(1));
    let (created_tx, created_rx) = bounded::<CreatedFile>(4);
    let (moved_tx, moved_rx) = bounded::<PathBuf>(4);

    for chunk in chunks {
        let _ = chunk_tx.send(chunk);
    }
    drop(chunk_tx);

    let create_cfg = config.clone();
    let tmp_dir = config.tmp_dir_name.clone();
    let create_cancel = cancel.clone();
    let create_handle =
        thread::spawn(move || create_worker(chunk_rx, created_tx, create_cfg, tmp_dir, create_cancel));

    let move_cancel = cancel.clone();
    let move_handle = thread::spawn(move || move_worker(created_rx, moved_tx, move_cancel));

    let restart_miner = config.b_restart_miner;
    let miner_path = if restart_miner { config.miner_path_name.clone() } else { None };
    let mining_conf = config.mining_conf_path_name.clone();
    let miner_cancel = cancel.clone();
    let miner_handle = thread::spawn(move || miner_worker(moved_rx, miner_path, mining_conf, miner_cancel));

    create_handle.join().expect("create worker panicked");
    move_handle.join().expect("move worker panicked");
    miner_handle.join().expect("miner worker panicked");

    if cancel.is_set() {
        return Err(PlotError::External("wizard run was cancelled after a worker error".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_is_shared_across_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        clone.set();
        assert!(flag.is_set());
    }
}
