//! # Time-Bounded Message De-duplication
//!
//! Drops redelivered messages at the dispatch layer.
//!
//! - A message is identified by (message ID, sender, method); responses reuse
//!   the request's ID, so the ID alone is not unique
//! - Entries expire after the validity window and are garbage-collected
//!   lazily, which bounds memory

use shared_types::{MessageMethod, PeerId, RemoteMessage};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

/// Errors from de-duplication checks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DedupError {
    /// The message was already seen inside the window.
    #[error("message {message_id} from {sender} already delivered")]
    Duplicate { message_id: Uuid, sender: PeerId },
}

type DedupKey = (Uuid, PeerId, MessageMethod);

/// Time-bounded cache of recently delivered messages.
pub struct MessageDedupCache {
    /// Key -> instant first seen.
    seen: HashMap<DedupKey, Instant>,

    /// How long a key is remembered.
    window: Duration,

    /// Last garbage collection.
    last_gc: Instant,

    /// Garbage collection interval.
    gc_interval: Duration,
}

impl MessageDedupCache {
    /// Default validity window.
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(120);

    /// Default garbage collection interval.
    pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(10);

    /// Create a cache with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_window(Self::DEFAULT_WINDOW)
    }

    /// Create a cache with a custom window.
    #[must_use]
    pub fn with_window(window: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            window,
            last_gc: Instant::now(),
            gc_interval: Self::DEFAULT_GC_INTERVAL.min(window),
        }
    }

    /// Record the message, failing if it was already recorded inside the window.
    pub fn check_and_record(&mut self, message: &RemoteMessage) -> Result<(), DedupError> {
        let now = Instant::now();

        if now.duration_since(self.last_gc) > self.gc_interval {
            self.garbage_collect(now);
            self.last_gc = now;
        }

        let key = (message.message_id, message.sender, message.method);
        if let Some(first_seen) = self.seen.get(&key) {
            if now.duration_since(*first_seen) <= self.window {
                return Err(DedupError::Duplicate {
                    message_id: message.message_id,
                    sender: message.sender,
                });
            }
        }

        self.seen.insert(key, now);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn garbage_collect(&mut self, now: Instant) {
        let window = self.window;
        self.seen
            .retain(|_, first_seen| now.duration_since(*first_seen) <= window);
    }
}

impl Default for MessageDedupCache {
    fn default() -> Self {
        Self::new()
    }
}
