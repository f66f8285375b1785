//! `plotwizard` CLI: plan/create/move/miner orchestration driven by
//! `wizard.conf`, per spec.md §4.9/§6. `SIGINT` sets the shared
//! [`CancelFlag`](bfstools::wizard::CancelFlag) so every worker thread
//! winds down cooperatively instead of being torn down mid-write.

use anyhow::{anyhow, Context, Result};
use bfstools::wizard::config::WizardConfig;
use bfstools::wizard::plan::{plan_directory, round_robin, PlannedChunk};
use bfstools::wizard::{run, CancelFlag};
use clap::{Parser, Subcommand};
use nix::sys::signal::{self, SigHandler, Signal};
use std::path::PathBuf;
use std::sync::OnceLock;

#[derive(Parser)]
#[command(name = "plotwizard", about = "Plan, create, move and restart-mine BURST plot files")]
struct Cli {
    /// Path to the wizard's JSON configuration.
    #[arg(short = 'c', long, default_value = "wizard.conf")]
    config: PathBuf,
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the chunk plan without creating anything.
    Plan,
    /// Run the full plan -> create -> move -> miner pipeline.
    Run,
}

static CANCEL: OnceLock<CancelFlag> = OnceLock::new();

extern "C" fn handle_sigint(_: i32) {
    if let Some(flag) = CANCEL.get() {
        flag.set();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    bfstools::logs::init_logs(cli.verbose);

    let mut config =
        WizardConfig::load(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?;
    config
        .merge_mining_conf_plots()
        .map_err(|e| anyhow!(e))
        .context("merging mining.conf plot directories")?;

    let chunks = build_plan(&config)?;

    match cli.command {
        Commands::Plan => {
            for chunk in &chunks {
                println!(
                    "{} nonces starting at {} -> {}",
                    chunk.nonces,
                    chunk.start_nonce,
                    chunk.target_dir.display()
                );
            }
        }
        Commands::Run => {
            let cancel = CancelFlag::new();
            CANCEL.set(cancel.clone()).ok();
            unsafe {
                signal::signal(Signal::SIGINT, SigHandler::Handler(handle_sigint))
                    .context("installing SIGINT handler")?;
            }
            run(config, chunks, cancel).map_err(|e| anyhow!(e))?;
        }
    }
    Ok(())
}

/// Builds the round-robin chunk plan across every configured plot
/// directory, per spec.md §4.9's "plan" activity.
fn build_plan(config: &WizardConfig) -> Result<Vec<PlannedChunk>> {
    let nonce_alignment = 8u64; // threadCount * 8, single-threaded plotter assumed per disk
    let mut per_dir = Vec::new();
    let mut next_start_nonce = 0u64;
    for dir in &config.plot_dir_names {
        let usable = free_bytes(dir)?.saturating_sub(config.min_disk_free_for(dir));
        let chunks = plan_directory(
            usable,
            bfstools::geometry::NONCE_SIZE,
            nonce_alignment,
            config.max_plot_size,
            next_start_nonce,
            dir.clone(),
        );
        if let Some(last) = chunks.last() {
            next_start_nonce = last.start_nonce + last.nonces;
        }
        per_dir.push(chunks);
    }
    Ok(round_robin(per_dir))
}

fn free_bytes(dir: &std::path::Path) -> Result<u64> {
    let stat = nix::sys::statvfs::statvfs(dir).with_context(|| format!("statvfs {}", dir.display()))?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size())
}
