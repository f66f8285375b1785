//! External miner supervision, per spec.md §4.9: restart the miner after
//! every successful move, killing any existing process with the miner's
//! name first.

use crate::error::PlotError;
use std::path::Path;
use std::process::{Child, Command};

pub struct MinerSupervisor {
    miner_path: std::path::PathBuf,
    mining_conf: Option<std::path::PathBuf>,
    child: Option<Child>,
}

impl MinerSupervisor {
    pub fn new(miner_path: std::path::PathBuf, mining_conf: Option<std::path::PathBuf>) -> MinerSupervisor {
        MinerSupervisor {
            miner_path,
            mining_conf,
            child: None,
        }
    }

    /// Kills any tracked running instance, then starts a new one.
    pub fn restart(&mut self) -> Result<(), PlotError> {
        self.kill_existing();
        let mut cmd = Command::new(&self.miner_path);
        if let Some(conf) = &self.mining_conf {
            cmd.arg(conf);
        }
        let child = cmd
            .spawn()
            .map_err(|e| PlotError::External(format!("spawning miner {}: {e}", self.miner_path.display())))?;
        self.child = Some(child);
        Ok(())
    }

    fn kill_existing(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    pub fn miner_name(&self) -> Option<&str> {
        Path::new(&self.miner_path).file_name().and_then(|n| n.to_str())
    }
}

impl Drop for MinerSupervisor {
    fn drop(&mut self) {
        self.kill_existing();
    }
}
