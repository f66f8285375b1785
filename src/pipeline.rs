//! Bounded single-producer/single-consumer buffer handoff, per spec.md
//! §4.2.
//!
//! Grounded on the reader/writer thread pair wired through a bounded
//! channel in `examples/other_examples/...engraver__src-plotter.rs.rs`
//! (`chan::bounded` feeding a hasher thread and a writer thread). That
//! crate used the unmaintained `chan` crate; this module uses
//! `crossbeam-channel`, its direct, maintained successor, for the same
//! bounded rendezvous shape. Unlike the original Python tooling's
//! `collections.deque` + `time.sleep(0.01)` busy-wait (flagged in spec.md
//! §9), the channel blocks the producer when full and the consumer when
//! empty with no polling.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Byte-throughput counters exposed for periodic printing at >= 2s
/// intervals (spec.md §4.2).
pub struct Progress {
    total: AtomicU64,
    last_tick_total: AtomicU64,
    last_tick_at: std::sync::Mutex<Instant>,
}

impl Progress {
    pub fn new() -> Arc<Progress> {
        Arc::new(Progress {
            total: AtomicU64::new(0),
            last_tick_total: AtomicU64::new(0),
            last_tick_at: std::sync::Mutex::new(Instant::now()),
        })
    }

    pub fn add(&self, bytes: u64) {
        self.total.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Returns `Some((bytes_since_last_tick, elapsed_secs))` iff at least 2
    /// seconds have passed since the previous tick, and resets the tick
    /// baseline. Callers use this to gate a throughput print without
    /// hand-rolling their own timer.
    pub fn maybe_tick(&self) -> Option<(u64, f64)> {
        let mut last_at = self.last_tick_at.lock().unwrap();
        let elapsed = last_at.elapsed().as_secs_f64();
        if elapsed < 2.0 {
            return None;
        }
        let now_total = self.total();
        let last_total = self.last_tick_total.swap(now_total, Ordering::Relaxed);
        *last_at = Instant::now();
        Some((now_total.saturating_sub(last_total), elapsed))
    }
}

/// One buffer in flight, or the end-of-stream sentinel.
type Item = Option<Vec<u8>>;

/// Owns the channel pair, cancel flag and progress counters for one
/// producer/consumer run. Replaces the global mutable flags and queues the
/// original Python tooling threads through closures (spec.md §9) with a
/// struct that owns all of it.
pub struct Pipeline {
    tx: Sender<Item>,
    rx: Receiver<Item>,
    cancel: Arc<AtomicBool>,
    pub progress: Arc<Progress>,
}

impl Pipeline {
    /// `capacity` buffers in flight before the producer blocks.
    pub fn new(capacity: usize) -> Pipeline {
        let (tx, rx) = bounded(capacity);
        Pipeline {
            tx,
            rx,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: Progress::new(),
        }
    }

    pub fn producer(&self) -> Producer {
        Producer {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
            progress: self.progress.clone(),
        }
    }

    pub fn consumer(&self) -> Consumer {
        Consumer {
            rx: self.rx.clone(),
        }
    }

    /// Monotonically sets the cancel flag; the producer checks it at the
    /// top of every loop iteration and stops feeding new buffers.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct Producer {
    tx: Sender<Item>,
    cancel: Arc<AtomicBool>,
    progress: Arc<Progress>,
}

impl Producer {
    /// Sends one buffer. Returns `false` if cancellation was observed first
    /// and nothing was sent; callers should stop producing in that case.
    pub fn send(&self, data: Vec<u8>) -> bool {
        if self.cancel.load(Ordering::SeqCst) {
            return false;
        }
        self.progress.add(data.len() as u64);
        self.tx.send(Some(data)).is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Signals end-of-stream; the consumer drains whatever is already
    /// buffered, then observes the sentinel and exits.
    pub fn finish(self) {
        let _ = self.tx.send(None);
    }
}

pub struct Consumer {
    rx: Receiver<Item>,
}

impl Consumer {
    /// Blocks for the next buffer. Channel FIFO ordering guarantees the
    /// consumer observes buffers in exactly the order the producer sent
    /// them (spec.md §4.2's "no ordering reordering" requirement needs no
    /// extra bookkeeping beyond using a channel).
    pub fn recv(&self) -> Option<Vec<u8>> {
        self.rx.recv().ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn producer_consumer_preserves_order() {
        let pipeline = Pipeline::new(4);
        let producer = pipeline.producer();
        let consumer = pipeline.consumer();
        let handle = thread::spawn(move || {
            for i in 0u8..20 {
                producer.send(vec![i; 8]);
            }
            producer.finish();
        });
        let mut seen = Vec::new();
        while let Some(buf) = consumer.recv() {
            seen.push(buf[0]);
        }
        handle.join().unwrap();
        assert_eq!(seen, (0u8..20).collect::<Vec<_>>());
    }

    #[test]
    fn cancel_stops_producer() {
        let pipeline = Pipeline::new(2);
        pipeline.cancel();
        let producer = pipeline.producer();
        assert!(!producer.send(vec![1, 2, 3]));
    }

    #[test]
    fn progress_accumulates() {
        let pipeline = Pipeline::new(2);
        let producer = pipeline.producer();
        producer.send(vec![0u8; 100]);
        producer.send(vec![0u8; 50]);
        assert_eq!(pipeline.progress.total(), 150);
    }
}
