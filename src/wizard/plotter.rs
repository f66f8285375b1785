//! External plotter subprocess invocation, per spec.md §6.

use crate::error::PlotError;
use std::path::{Path, PathBuf};
use std::process::Command;

pub struct PlotterArgs {
    pub key: u64,
    pub out_dir: PathBuf,
    pub threads: u32,
    pub plot_core: u8,
    pub start_nonce: u64,
    pub nonces: u64,
    pub mem_in_nonces: Option<u64>,
}

impl PlotterArgs {
    /// The plotter's documented output filename, per spec.md §6.
    pub fn output_file_name(&self) -> String {
        format!("{}_{}_{}_{}", self.key, self.start_nonce, self.nonces, self.nonces)
    }
}

/// Spawns the external plotter with its documented CLI and waits for it to
/// finish. A nonzero exit is fatal to the wizard (spec.md §4.9/§7).
pub fn run_plotter(plotter_path: &Path, args: &PlotterArgs) -> Result<PathBuf, PlotError> {
    let mut cmd = Command::new(plotter_path);
    cmd.arg("-k")
        .arg(args.key.to_string())
        .arg("-d")
        .arg(&args.out_dir)
        .arg("-t")
        .arg(args.threads.to_string())
        .arg("-x")
        .arg(args.plot_core.to_string())
        .arg("-s")
        .arg(args.start_nonce.to_string())
        .arg("-n")
        .arg(args.nonces.to_string());
    if let Some(mem) = args.mem_in_nonces {
        cmd.arg("-m").arg(mem.to_string());
    }
    let status = cmd
        .status()
        .map_err(|e| PlotError::External(format!("spawning plotter {}: {e}", plotter_path.display())))?;
    if !status.success() {
        return Err(PlotError::External(format!(
            "plotter exited with {status}"
        )));
    }
    Ok(args.out_dir.join(args.output_file_name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_file_name_matches_spec_convention() {
        let args = PlotterArgs {
            key: 1,
            out_dir: PathBuf::from("/out"),
            threads: 4,
            plot_core: 0,
            start_nonce: 100,
            nonces: 200,
            mem_in_nonces: None,
        };
        assert_eq!(args.output_file_name(), "1_100_200_200");
    }
}
