//! Handoff of discovered result files from the stdout relay to the decoder.
//!
//! meep announces a file when it starts writing it, not when it is done, so
//! a file is only released once the next one is announced or the producer
//! has gone away.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// Tokens that must be pending before the head is considered stable.
pub const LOOKAHEAD: usize = 2;

/// Whether the head of the queue may be taken now.
pub fn release_ready(pending: usize, producer_active: bool) -> bool {
    !producer_active || pending >= LOOKAHEAD
}

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<PathBuf>,
    producer_active: bool,
}

/// Single-producer, single-consumer file queue. The mutex guards both the
/// tokens and the producer flag; `ready` is signalled on every change.
#[derive(Debug)]
pub struct FrameQueue {
    state: Mutex<QueueState>,
    ready: Notify,
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                producer_active: true,
            }),
            ready: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn offer(&self, token: PathBuf) {
        self.lock().pending.push_back(token);
        self.ready.notify_one();
    }

    /// Producer is done. Releases whatever is still pending.
    pub fn finish(&self) {
        self.lock().producer_active = false;
        self.ready.notify_one();
    }

    pub fn is_producer_active(&self) -> bool {
        self.lock().producer_active
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Non-blocking take. `None` means "not ready yet", `Some(None)` means
    /// the producer finished and nothing is left.
    pub fn try_take(&self) -> Option<Option<PathBuf>> {
        let mut state = self.lock();
        if release_ready(state.pending.len(), state.producer_active) {
            Some(state.pending.pop_front())
        } else {
            None
        }
    }

    /// Next stable token in FIFO order, or `None` once the producer finished
    /// and the queue drained.
    pub async fn take_next(&self) -> Option<PathBuf> {
        loop {
            if let Some(next) = self.try_take() {
                return next;
            }
            // notify_one stores a permit when nobody is waiting, so a signal
            // sent between try_take and here is not lost.
            self.ready.notified().await;
        }
    }
}

/// Marks the producer finished when dropped, whichever way the producer
/// exits.
pub struct ProducerGuard<'a> {
    queue: &'a FrameQueue,
}

impl<'a> ProducerGuard<'a> {
    pub fn new(queue: &'a FrameQueue) -> Self {
        Self { queue }
    }
}

impl Drop for ProducerGuard<'_> {
    fn drop(&mut self) {
        self.queue.finish();
    }
}
