//! Plot planning: round-robin chunk assignment across target directories,
//! per spec.md §4.9.

use std::path::PathBuf;

/// One planned plotter invocation: `nonces` starting at `start_nonce`,
/// destined for `target_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedChunk {
    pub start_nonce: u64,
    pub nonces: u64,
    pub target_dir: PathBuf,
}

/// Rounds `usable_bytes` down to a multiple of `nonce_alignment` nonces
/// (`threadCount * 8` per spec.md §4.9), then splits it into chunks of at
/// most `max_plot_size` bytes.
pub fn plan_directory(
    usable_bytes: u64,
    nonce_size: u64,
    nonce_alignment: u64,
    max_plot_size: u64,
    start_nonce: u64,
    target_dir: PathBuf,
) -> Vec<PlannedChunk> {
    let mut usable_nonces = usable_bytes / nonce_size;
    usable_nonces -= usable_nonces % nonce_alignment.max(1);
    if usable_nonces == 0 {
        return Vec::new();
    }

    let max_nonces_per_chunk = (max_plot_size / nonce_size).max(nonce_alignment);
    let mut chunks = Vec::new();
    let mut remaining = usable_nonces;
    let mut cursor = start_nonce;
    while remaining > 0 {
        let mut chunk_nonces = remaining.min(max_nonces_per_chunk);
        chunk_nonces -= chunk_nonces % nonce_alignment.max(1);
        if chunk_nonces == 0 {
            chunk_nonces = remaining;
        }
        chunks.push(PlannedChunk {
            start_nonce: cursor,
            nonces: chunk_nonces,
            target_dir: target_dir.clone(),
        });
        cursor += chunk_nonces;
        remaining -= chunk_nonces;
    }
    chunks
}

/// Assigns consecutive `startNonce` ranges round-robin across `dirs`
/// (spec.md §4.9's "plan" activity), given each directory's pre-planned
/// per-directory chunks (already split by [`plan_directory`]).
pub fn round_robin(per_dir: Vec<Vec<PlannedChunk>>) -> Vec<PlannedChunk> {
    let mut iters: Vec<std::vec::IntoIter<PlannedChunk>> =
        per_dir.into_iter().map(|v| v.into_iter()).collect();
    let mut out = Vec::new();
    loop {
        let mut progressed = false;
        for it in &mut iters {
            if let Some(chunk) = it.next() {
                out.push(chunk);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_bounded_chunks() {
        let chunks = plan_directory(10_000_000, 1000, 8, 3_000_000, 0, PathBuf::from("/mnt/a"));
        assert!(chunks.iter().all(|c| c.nonces * 1000 <= 3_000_000));
        let total: u64 = chunks.iter().map(|c| c.nonces).sum();
        assert_eq!(total, 10_000);
    }

    #[test]
    fn round_robins_across_directories() {
        let a = vec![PlannedChunk { start_nonce: 0, nonces: 10, target_dir: PathBuf::from("a") }];
        let b = vec![
            PlannedChunk { start_nonce: 0, nonces: 10, target_dir: PathBuf::from("b") },
            PlannedChunk { start_nonce: 10, nonces: 10, target_dir: PathBuf::from("b") },
        ];
        let out = round_robin(vec![a, b]);
        assert_eq!(out[0].target_dir, PathBuf::from("a"));
        assert_eq!(out[1].target_dir, PathBuf::from("b"));
        assert_eq!(out[2].target_dir, PathBuf::from("b"));
    }
}
