//! Player-side consumer of a live source
//!
//! The source keeps an `Arc<ConsumerQueue>` per attached player and pushes
//! into it during fan-out. The player owns the `Consumer` handle; dropping
//! it detaches the queue from the source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::live::config::VhostSettings;
use crate::live::jitter::Jitter;
use crate::live::message::SharedMessage;
use crate::live::queue::MessageQueue;
use crate::live::source::LiveSource;

/// How long `wait` sleeps while the consumer is paused
pub const PAUSE_PULSE: Duration = Duration::from_millis(500);

struct ConsumerState {
    queue: MessageQueue,
    jitter: Jitter,
    paused: bool,
}

/// Queue shared between a source (producer) and one player (consumer)
pub(crate) struct ConsumerQueue {
    id: u64,
    state: Mutex<ConsumerState>,
    notify: Notify,
    woken: AtomicBool,
}

impl ConsumerQueue {
    pub(crate) fn new(id: u64, settings: &VhostSettings) -> Self {
        Self {
            id,
            state: Mutex::new(ConsumerState {
                queue: MessageQueue::new(settings.queue_max_length, settings.queue_overflow),
                jitter: Jitter::new(settings.jitter_algorithm, settings.jitter_max_jump_ms),
                paused: false,
            }),
            notify: Notify::new(),
            woken: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Never blocks; overflow is absorbed by the queue policy
    pub(crate) fn enqueue(&self, msg: SharedMessage) {
        let dropped = self.state.lock().queue.push(msg);
        if dropped > 0 {
            tracing::warn!(consumer = self.id, dropped = dropped, "Consumer queue overflow");
        }
        self.notify.notify_one();
    }

    pub(crate) fn wakeup(&self) {
        self.woken.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// A player's view of a live source
pub struct Consumer {
    queue: Arc<ConsumerQueue>,
    source: Arc<LiveSource>,
}

impl Consumer {
    pub(crate) fn new(queue: Arc<ConsumerQueue>, source: Arc<LiveSource>) -> Self {
        Self { queue, source }
    }

    pub fn id(&self) -> u64 {
        self.queue.id
    }

    pub fn source(&self) -> &Arc<LiveSource> {
        &self.source
    }

    /// Push a message directly to this consumer only
    pub fn enqueue(&self, msg: SharedMessage) {
        self.queue.enqueue(msg);
    }

    /// Drain up to `max_count` messages in FIFO order with jitter applied.
    ///
    /// Returns nothing while paused. Never blocks.
    pub fn dump_packets(&self, max_count: usize) -> Vec<SharedMessage> {
        let mut state = self.queue.state.lock();
        if state.paused {
            return Vec::new();
        }

        let mut batch = state.queue.pop_batch(max_count);
        for msg in &mut batch {
            state.jitter.correct(msg);
        }
        batch
    }

    /// Wait until at least `min_msgs` messages are queued or `timeout` elapses.
    ///
    /// Returns whether the threshold was reached. `wakeup()` and pausing end
    /// the wait early with `false`.
    pub async fn wait(&self, min_msgs: usize, timeout: Duration) -> bool {
        if self.is_paused() {
            tokio::time::sleep(timeout.min(PAUSE_PULSE)).await;
            return false;
        }

        let deadline = Instant::now() + timeout;
        loop {
            if self.queue.woken.swap(false, Ordering::AcqRel) {
                return false;
            }
            {
                let state = self.queue.state.lock();
                if state.paused {
                    return false;
                }
                if state.queue.len() >= min_msgs {
                    return true;
                }
            }

            if tokio::time::timeout_at(deadline, self.queue.notify.notified())
                .await
                .is_err()
            {
                return self.queue_len() >= min_msgs;
            }
        }
    }

    pub fn pause(&self, paused: bool) {
        let previous = std::mem::replace(&mut self.queue.state.lock().paused, paused);
        if previous != paused {
            tracing::debug!(consumer = self.queue.id, paused = paused, "Consumer pause state changed");
        }
        self.queue.notify.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.queue.state.lock().paused
    }

    /// Release a pending `wait`
    pub fn wakeup(&self) {
        self.queue.wakeup();
    }

    pub fn queue_len(&self) -> usize {
        self.queue.state.lock().queue.len()
    }

    /// Messages lost to queue overflow
    pub fn dropped(&self) -> u64 {
        self.queue.state.lock().queue.dropped()
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.source.on_consumer_destroy(self.queue.id);
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.queue.id)
            .field("source", self.source.key())
            .finish()
    }
}
