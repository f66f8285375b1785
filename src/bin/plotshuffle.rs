//! `plotshuffle` CLI: POC1 -> POC2 conversion for standalone host plot
//! files, per spec.md §4.8/§6. Converting a plot already written to a BFS
//! device is the `bfs c` subcommand instead, which shares this crate's
//! `shuffle` module but updates the device's table of contents as it goes.

use anyhow::{anyhow, bail, Context, Result};
use bfstools::device::FileBackedDevice;
use bfstools::geometry::SCOOPS_PER_NONCE;
use bfstools::plotname::PlotName;
use bfstools::shuffle::shuffle;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "plotshuffle", about = "Convert standalone POC1 plot files to POC2")]
struct Cli {
    /// Plot files to convert in place.
    #[arg(short = 'f', required = true)]
    files: Vec<PathBuf>,
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    bfstools::logs::init_logs(cli.verbose);

    let mut had_error = false;
    for path in &cli.files {
        if let Err(e) = convert_one(path) {
            eprintln!("{}: {e}", path.display().to_string().red());
            had_error = true;
        }
    }
    std::process::exit(if had_error { 1 } else { 0 });
}

fn convert_one(path: &PathBuf) -> Result<()> {
    let name = PlotName::parse_path(path)?;
    if name.is_poc2() {
        bail!("{} is already POC2", path.display());
    }
    let dev = FileBackedDevice::open_rw(path)?;
    let size = name.file_size();

    let half_scoops = SCOOPS_PER_NONCE / 2;
    print!("Converting {}...", path.display());
    shuffle(&dev, 0, name.nonces, size, 0, |s| {
        if s as u64 % 256 == 0 {
            print!("\rConverting {}: scoop {s}/{half_scoops}", path.display());
            let _ = std::io::Write::flush(&mut std::io::stdout());
        }
        Ok(())
    })
    .map_err(|e| anyhow!(e))?;
    println!();

    let poc2_name = PlotName {
        key: name.key,
        start_nonce: name.start_nonce,
        nonces: name.nonces,
        stagger: 0,
    };
    let new_path = path
        .parent()
        .ok_or_else(|| anyhow!("cannot determine parent directory of {}", path.display()))?
        .join(poc2_name.canonical_name());
    std::fs::rename(path, &new_path).with_context(|| format!("renaming to {}", new_path.display()))?;
    println!("{}", new_path.display().to_string().green());
    Ok(())
}
