//! Work batch bookkeeping
//!
//! [`BatchTracker`] owns the remaining count, the running count and the
//! transferred-bytes total behind one lock. The completion sender lives in
//! the same state and is consumed by the record that takes `remaining` to
//! zero.

use crate::image::ImageRef;
use crate::ledger::MigrationOutcome;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, oneshot};

/// Images selected for one run
#[derive(Debug, Clone, Default)]
pub struct WorkBatch {
    pub images: Vec<ImageRef>,
}

impl WorkBatch {
    pub fn new(images: Vec<ImageRef>) -> Self {
        Self { images }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Totals reported once the batch has completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub transferred_bytes: u64,
    pub elapsed: Duration,
    /// Highest number of images observed running at once
    pub peak_running: usize,
}

/// Position of the batch right after one image completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub remaining: usize,
    pub transferred_bytes: u64,
    /// Time since the batch started
    pub elapsed: Duration,
}

#[derive(Debug)]
struct BatchState {
    total: usize,
    remaining: usize,
    running: usize,
    peak_running: usize,
    succeeded: usize,
    failed: usize,
    transferred_bytes: u64,
    done: Option<oneshot::Sender<()>>,
}

#[derive(Debug)]
pub struct BatchTracker {
    started: Instant,
    state: Mutex<BatchState>,
}

impl BatchTracker {
    /// New tracker for `total` images. For an empty batch the returned
    /// receiver is already resolved.
    pub fn new(total: usize) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let done = if total == 0 {
            let _ = tx.send(());
            None
        } else {
            Some(tx)
        };

        let tracker = Self {
            started: Instant::now(),
            state: Mutex::new(BatchState {
                total,
                remaining: total,
                running: 0,
                peak_running: 0,
                succeeded: 0,
                failed: 0,
                transferred_bytes: 0,
                done,
            }),
        };
        (tracker, rx)
    }

    /// An admitted image started running
    pub async fn admit(&self) -> usize {
        let mut state = self.state.lock().await;
        state.running += 1;
        state.peak_running = state.peak_running.max(state.running);
        state.running
    }

    /// Count one terminal outcome. The call that takes `remaining` to zero
    /// fires the completion signal.
    pub async fn record(&self, outcome: &MigrationOutcome) -> BatchProgress {
        let mut state = self.state.lock().await;
        state.running = state.running.saturating_sub(1);
        if outcome.is_success() {
            state.succeeded += 1;
            state.transferred_bytes += outcome.image_size.unwrap_or_default();
        } else {
            state.failed += 1;
        }

        match state.remaining.checked_sub(1) {
            Some(remaining) => {
                state.remaining = remaining;
                if remaining == 0 {
                    if let Some(done) = state.done.take() {
                        let _ = done.send(());
                    }
                }
            }
            None => {
                tracing::error!(image = %outcome.image_name, "outcome recorded after batch completion");
            }
        }

        BatchProgress {
            completed: state.total - state.remaining,
            total: state.total,
            remaining: state.remaining,
            transferred_bytes: state.transferred_bytes,
            elapsed: self.started.elapsed(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub async fn summary(&self) -> BatchSummary {
        let elapsed = self.started.elapsed();
        let state = self.state.lock().await;
        BatchSummary {
            total: state.total,
            succeeded: state.succeeded,
            failed: state.failed,
            transferred_bytes: state.transferred_bytes,
            elapsed,
            peak_running: state.peak_running,
        }
    }
}
