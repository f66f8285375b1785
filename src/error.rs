//! Error kinds per spec.md §7. Each top-level command decides, per kind,
//! whether to abort the whole operation or just skip the offending file;
//! the enum only carries the classification, callers keep the control flow.

use std::fmt;

#[derive(Debug)]
pub enum PlotError {
    /// Missing `BFS0` magic, unparsable filename, size/nonce mismatch.
    /// Fatal to the current operation, not to a multi-device sweep.
    Format(String),
    /// TOC full, no free extent large enough, disk free below threshold.
    /// Reported per file; the caller continues with the next one.
    Capacity(String),
    /// Duplicate (key, startNonce, nonces) slot, destination already exists.
    /// Reported; that file is skipped.
    Conflict(String),
    /// Positioned read/write short or failed, device open failure.
    /// Fatal to the current operation.
    Io(String),
    /// Attempt to convert an INCOMPLETE plot. Refused.
    State(String),
    /// Plotter or miner subprocess exited nonzero. Fatal to the wizard.
    External(String),
}

impl fmt::Display for PlotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlotError::Format(msg) => write!(f, "format error: {msg}"),
            PlotError::Capacity(msg) => write!(f, "capacity error: {msg}"),
            PlotError::Conflict(msg) => write!(f, "conflict: {msg}"),
            PlotError::Io(msg) => write!(f, "I/O error: {msg}"),
            PlotError::State(msg) => write!(f, "invalid state: {msg}"),
            PlotError::External(msg) => write!(f, "external process error: {msg}"),
        }
    }
}

impl std::error::Error for PlotError {}

impl PlotError {
    /// Kinds that should abort a whole multi-file command rather than
    /// letting it continue with the next file.
    pub fn is_fatal_to_sweep(&self) -> bool {
        matches!(self, PlotError::Io(_) | PlotError::External(_))
    }
}
