//! `plotreorder` CLI: optimizer/merger/splitter, per spec.md §4.7/§6.
//! The verb is inferred from the argument shape, mirroring how
//! `plotOptimizer.py`/`plotMerger.py`/`plotSplitter.py` were three
//! separate entry points sharing one core loop — here unified behind one
//! binary and one engine module (`bfstools::reorder`).

use anyhow::{anyhow, bail, Context, Result};
use bfstools::reorder::{self, parse_size};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "plotreorder", about = "Optimize, merge or split BURST plot files")]
struct Cli {
    /// Output directory; defaults to beside the first input.
    #[arg(short = 'o')]
    out_dir: Option<PathBuf>,
    /// Scratch directory for intermediate `.merging` files.
    #[arg(short = 't')]
    tmp_dir: Option<PathBuf>,
    /// Path to the external plotter binary, used to fill merger gaps.
    #[arg(short = 'p')]
    plotter_path: Option<PathBuf>,
    /// CPU core selection passed through to the gap-filling plotter.
    #[arg(short = 'x', default_value_t = 0)]
    plot_core: u8,
    /// Remove source files after a successful run.
    #[arg(short = 'r')]
    remove_sources: bool,
    /// Dry run: print the plan without writing anything.
    #[arg(short = 'd')]
    dry_run: bool,
    /// Split size (accepts k/m/g/t suffixes); presence selects split mode.
    #[arg(short = 's')]
    split_size: Option<String>,
    #[arg(short, long)]
    verbose: bool,
    /// Plot files or directories to read plot files from.
    inputs: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    bfstools::logs::init_logs(cli.verbose);

    let inputs = enumerate_inputs(&cli.inputs)?;
    if inputs.is_empty() {
        bail!("no plot files given");
    }
    let out_dir = cli
        .out_dir
        .clone()
        .or_else(|| inputs[0].parent().map(|p| p.to_path_buf()))
        .ok_or_else(|| anyhow!("cannot determine output directory"))?;

    if let Some(size_str) = &cli.split_size {
        if inputs.len() != 1 {
            bail!("split mode takes exactly one input file");
        }
        let split_nonces_bytes = parse_size(size_str).map_err(|e| anyhow!(e))?;
        let split_nonces = (split_nonces_bytes / bfstools::geometry::NONCE_SIZE) as u32;
        if cli.dry_run {
            println!("Would split {} into {split_nonces}-nonce chunks in {}", inputs[0].display(), out_dir.display());
            return Ok(());
        }
        let outputs = reorder::split(&inputs[0], &out_dir, split_nonces).map_err(|e| anyhow!(e))?;
        for path in &outputs {
            println!("{}", path.display().to_string().green());
        }
        if cli.remove_sources {
            std::fs::remove_file(&inputs[0]).ok();
        }
        return Ok(());
    }

    if inputs.len() == 1 {
        if cli.dry_run {
            println!("Would optimize {} into {}", inputs[0].display(), out_dir.display());
            return Ok(());
        }
        let out = reorder::optimize(&inputs[0], &out_dir).map_err(|e| anyhow!(e))?;
        println!("{}", out.display().to_string().green());
    } else {
        if cli.dry_run {
            println!("Would merge {} files into {}", inputs.len(), out_dir.display());
            return Ok(());
        }
        let scratch_dir = cli.tmp_dir.clone().unwrap_or_else(|| out_dir.clone());
        let (out, gaps) = reorder::merge(
            &inputs,
            &out_dir,
            &scratch_dir,
            cli.plotter_path.as_deref(),
            cli.plot_core,
        )
        .map_err(|e| anyhow!(e))?;
        println!("{}", out.display().to_string().green());
        for (after_nonce, missing) in &gaps {
            println!(
                "{}",
                format!("Filled gap of {missing} nonces after nonce {after_nonce} via external plotter.").yellow()
            );
        }
        if cli.remove_sources {
            for input in &inputs {
                std::fs::remove_file(input).ok();
            }
        }
    }
    Ok(())
}

/// Directory inputs enumerate only filenames matching the plot-filename
/// regex, per spec.md §6.
fn enumerate_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in std::fs::read_dir(path).with_context(|| format!("reading {}", path.display()))? {
                let entry = entry?;
                let candidate = entry.path();
                if bfstools::plotname::PlotName::parse_path(&candidate).is_ok() {
                    out.push(candidate);
                }
            }
        } else {
            out.push(path.clone());
        }
    }
    Ok(out)
}
