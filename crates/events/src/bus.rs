//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`JobChanged`]
//! notifications. It is shared via `Arc` between the job store (the only
//! publisher) and any number of consumers.

use cadenza_core::job::{GenerationJob, UpdateSource};
use cadenza_core::types::{JobId, Timestamp};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// JobChanged
// ---------------------------------------------------------------------------

/// A job record changed in the store.
///
/// Carries the full record after the change, so consumers never need a
/// follow-up read.
#[derive(Debug, Clone, Serialize)]
pub struct JobChanged {
    pub id: JobId,
    pub job: GenerationJob,
    /// Producer of the change, `None` for local deletions.
    pub source: Option<UpdateSource>,
    pub timestamp: Timestamp,
}

impl JobChanged {
    pub fn new(job: GenerationJob, source: Option<UpdateSource>) -> Self {
        Self {
            id: job.id.clone(),
            job,
            source,
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of [`JobChanged`] to any number of receivers.
///
/// Receivers only see changes published after they subscribed; a
/// receiver that falls more than `capacity` changes behind skips ahead
/// and should re-read the store.
///
/// ```rust
/// use cadenza_events::EventBus;
///
/// let bus = EventBus::new(16);
/// let mut changes = bus.subscribe();
/// assert!(changes.try_recv().is_err());
/// ```
pub struct EventBus {
    sender: broadcast::Sender<JobChanged>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a change to all current subscribers.
    ///
    /// If there are no active subscribers the change is silently dropped.
    pub fn publish(&self, event: JobChanged) {
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
    }

    /// Subscribe to every change published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<JobChanged> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
