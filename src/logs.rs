//! Logging bootstrap shared by every binary in this workspace.
//!
//! Mirrors the teacher's `-v/--verbose` convention: pass `true` to force
//! `RUST_LOG=debug` before the logger is installed, otherwise whatever the
//! environment already has (or nothing) wins.

use std::env::set_var;

pub fn init_logs(verbose: bool) {
    if verbose {
        set_var("RUST_LOG", "debug");
    }
    let _ = env_logger::builder().format_timestamp_millis().try_init();
}
