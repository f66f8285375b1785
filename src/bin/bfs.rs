//! `bfs` CLI: init / list / write / read / delete / convert / check over a
//! BFS raw-device, per spec.md §6.

use anyhow::{anyhow, Context, Result};
use bfstools::device::{resolve_device_path, RawDevice};
use bfstools::logs::init_logs;
use clap::{Parser, Subcommand};
use colored::Colorize;
use glob::glob;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bfs", about = "Raw-device filesystem for BURST plot files")]
struct Cli {
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// i: destructively (re)initialize a device's table of contents.
    Init { device: String },
    /// l: list plot files on one or more devices.
    List { devices: Vec<String> },
    /// L: list plot files, expanding `*`/`?` glob wildcards.
    ListGlob { pattern: String },
    /// w: write host plot files onto a device.
    Write {
        device: String,
        files: Vec<PathBuf>,
        /// Convert POC1 sources to POC2 during the write.
        #[arg(short = 'c', long)]
        convert: bool,
    },
    /// r: read plot files off a device into host files.
    Read { device: String, files: Vec<PathBuf> },
    /// d: delete named plot files from a device.
    Delete { device: String, names: Vec<String> },
    /// c: convert (shuffle POC1->POC2) a named plot already on a device.
    Convert { device: String, name: String },
    /// p: set Unix permissions on one or more resolved device paths.
    Perm { pattern: String, mode: String },
    /// Structural check of a host plot file (supplemented, no crypto).
    Check { file: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logs(cli.verbose);

    let had_error = match cli.command {
        Commands::Init { device } => cmd_init(&device)?,
        Commands::List { devices } => cmd_list(&devices)?,
        Commands::ListGlob { pattern } => {
            let devices = expand_glob(&pattern)?;
            cmd_list(&devices)?
        }
        Commands::Write { device, files, convert } => cmd_write(&device, &files, convert)?,
        Commands::Read { device, files } => cmd_read(&device, &files)?,
        Commands::Delete { device, names } => cmd_delete(&device, &names)?,
        Commands::Convert { device, name } => cmd_convert(&device, &name)?,
        Commands::Perm { pattern, mode } => cmd_perm(&pattern, &mode)?,
        Commands::Check { file } => {
            bfstools::bfs::check(&file).map_err(|e| anyhow!(e))?;
            println!("{}", "OK".green());
            false
        }
    };

    std::process::exit(if had_error { 1 } else { 0 });
}

fn expand_glob(pattern: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for entry in glob(pattern).context("invalid glob pattern")? {
        out.push(entry?.to_string_lossy().to_string());
    }
    Ok(out)
}

fn confirm(prompt: &str) -> bool {
    print!("{prompt} (y/n)? ");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    line.trim().eq_ignore_ascii_case("y")
}

fn cmd_init(device_arg: &str) -> Result<bool> {
    if !confirm("Really want to delete all data on disk") {
        println!("Aborted.");
        return Ok(false);
    }
    let path = resolve_device_path(device_arg);
    let dev = RawDevice::open(&path).with_context(|| format!("opening {}", path.display()))?;
    bfstools::bfs::init(&dev).map_err(|e| anyhow!(e))?;
    println!("{}", "Device initialized.".green());
    Ok(false)
}

fn cmd_list(devices: &[String]) -> Result<bool> {
    let mut had_error = false;
    for device_arg in devices {
        let path = resolve_device_path(device_arg);
        match RawDevice::open(&path).map_err(|e| anyhow!(e)).and_then(|dev| {
            bfstools::bfs::list(&dev).map_err(|e| anyhow!(e))
        }) {
            Ok(result) => {
                println!("Contents of {}:", device_arg);
                for listed in &result.slots {
                    let name = listed.slot.plot_name().canonical_name();
                    let display = match &listed.overlay {
                        Some(overlay) => format!("{name}{overlay}").yellow().to_string(),
                        None => name.green().to_string(),
                    };
                    println!(
                        "  {display} ({} GB) starts at sector {}",
                        listed.slot.nonces / 4096,
                        listed.slot.start_pos >> 9
                    );
                }
                let free_nonces = result.free_bytes / bfstools::geometry::NONCE_SIZE;
                println!(
                    "{} GB ({free_nonces} nonces) free space left.",
                    result.free_bytes / (1024 * 1024 * 1024)
                );
            }
            Err(e) => {
                eprintln!("{}: {e}", device_arg.red());
                had_error = true;
            }
        }
    }
    Ok(had_error)
}

fn cmd_write(device_arg: &str, files: &[PathBuf], convert: bool) -> Result<bool> {
    let path = resolve_device_path(device_arg);
    let dev = RawDevice::open(&path)?;
    let mut had_error = false;
    for result in bfstools::bfs::write_files(&dev, files, convert) {
        if let Err(e) = result {
            eprintln!("{}: {e}", "ERROR".red());
            had_error = true;
        }
    }
    Ok(had_error)
}

fn cmd_read(device_arg: &str, files: &[PathBuf]) -> Result<bool> {
    let path = resolve_device_path(device_arg);
    let dev = RawDevice::open(&path)?;
    let mut had_error = false;
    for result in bfstools::bfs::read_files(&dev, files) {
        if let Err(e) = result {
            eprintln!("{}: {e}", "ERROR".red());
            had_error = true;
        }
    }
    Ok(had_error)
}

fn cmd_delete(device_arg: &str, names: &[String]) -> Result<bool> {
    let path = resolve_device_path(device_arg);
    let dev = RawDevice::open(&path)?;
    let mut had_error = false;
    for result in bfstools::bfs::delete_files(&dev, names) {
        if let Err(e) = result {
            eprintln!("{}: {e}", "ERROR".red());
            had_error = true;
        }
    }
    Ok(had_error)
}

fn cmd_convert(device_arg: &str, name: &str) -> Result<bool> {
    let path = resolve_device_path(device_arg);
    let dev = RawDevice::open(&path)?;
    let mut toc = bfstools::bfs::read_toc(&dev).map_err(|e| anyhow!(e))?;
    let slot = *toc
        .slot_by_name(name)
        .ok_or_else(|| anyhow!("{name} not found on device"))?;
    bfstools::shuffle::shuffle_bfs_slot(&dev, &mut toc, &slot).map_err(|e| anyhow!(e))?;
    println!("{}", format!("{name} converted to POC2.").green());
    Ok(false)
}

fn cmd_perm(pattern: &str, mode: &str) -> Result<bool> {
    let mode = u32::from_str_radix(mode, 8).context("mode must be octal, e.g. 660")?;
    let mut had_error = false;
    for device_arg in expand_glob(pattern)? {
        let path = resolve_device_path(&device_arg);
        if let Err(e) = bfstools::bfs::set_permissions(&path, mode) {
            eprintln!("{}: {e}", path.display());
            had_error = true;
        }
    }
    Ok(had_error)
}
