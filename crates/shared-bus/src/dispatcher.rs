//! # Dispatcher
//!
//! Routes [`RemoteMessage`]s to the wiring object registered for a
//! (capability ID, DON ID) pair, and sends messages to other peers.
//!
//! ```text
//!  node A                                   node B
//! ┌──────────────────────┐   send(B, msg)  ┌──────────────────────┐
//! │ TargetClient         │ ──────────────→ │ InMemoryDispatcher   │
//! │   (cap@1, DON "2")   │                 │  receivers[(cap@1,"2")]
//! └──────────────────────┘                 │        │ receive()   │
//!                                          │        ▼             │
//!                                          │  TargetServer        │
//!                                          └──────────────────────┘
//! ```

use crate::dedup_cache::MessageDedupCache;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_types::{PeerId, RemoteMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by the dispatch layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// A receiver is already bound to this key.
    #[error("receiver already registered for {capability_id} on DON {don_id}")]
    ReceiverExists {
        capability_id: String,
        don_id: String,
    },

    /// The registration was refused.
    #[error("receiver registration rejected for {capability_id} on DON {don_id}: {reason}")]
    Rejected {
        capability_id: String,
        don_id: String,
        reason: String,
    },

    /// The destination peer is not connected.
    #[error("peer {0} is unreachable")]
    PeerUnreachable(PeerId),
}

/// Inbound side of a wiring object. Must not block; implementations queue the
/// message for their own receive loop.
pub trait MessageReceiver: Send + Sync {
    fn receive(&self, message: RemoteMessage);

    /// Short label for logs and diagnostics.
    fn kind(&self) -> &'static str {
        "receiver"
    }
}

/// Message dispatch substrate.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Bind `receiver` to (capability ID, decimal DON ID).
    fn set_receiver(
        &self,
        capability_id: &str,
        don_id: &str,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Result<(), DispatchError>;

    /// Unbind whatever receiver holds the key. No-op if none.
    fn remove_receiver(&self, capability_id: &str, don_id: &str);

    /// Send a message to `peer`.
    async fn send(&self, peer: PeerId, message: RemoteMessage) -> Result<(), DispatchError>;
}

/// In-process network connecting the dispatchers of several nodes.
#[derive(Default)]
pub struct InMemoryNetwork {
    peers: RwLock<HashMap<PeerId, Weak<InMemoryDispatcher>>>,
}

impl InMemoryNetwork {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn attach(&self, peer: PeerId, dispatcher: &Arc<InMemoryDispatcher>) {
        self.peers.write().insert(peer, Arc::downgrade(dispatcher));
    }

    fn lookup(&self, peer: &PeerId) -> Option<Arc<InMemoryDispatcher>> {
        self.peers.read().get(peer).and_then(Weak::upgrade)
    }

    /// Whether `peer` has a live dispatcher on this network.
    #[must_use]
    pub fn is_attached(&self, peer: &PeerId) -> bool {
        self.lookup(peer).is_some()
    }

    /// Number of live dispatchers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers
            .read()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

/// Per-node dispatcher on an [`InMemoryNetwork`].
pub struct InMemoryDispatcher {
    local_peer: PeerId,
    network: Arc<InMemoryNetwork>,
    receivers: RwLock<HashMap<(String, String), Arc<dyn MessageReceiver>>>,
    dedup: Mutex<MessageDedupCache>,
    messages_sent: AtomicU64,
    messages_delivered: AtomicU64,
    dead_lettered: AtomicU64,
}

impl InMemoryDispatcher {
    /// Create a dispatcher for `local_peer` and attach it to `network`.
    #[must_use]
    pub fn join(network: &Arc<InMemoryNetwork>, local_peer: PeerId) -> Arc<Self> {
        Self::join_with_window(network, local_peer, MessageDedupCache::DEFAULT_WINDOW)
    }

    /// Same as [`Self::join`] with a custom de-duplication window.
    #[must_use]
    pub fn join_with_window(
        network: &Arc<InMemoryNetwork>,
        local_peer: PeerId,
        dedup_window: Duration,
    ) -> Arc<Self> {
        let dispatcher = Arc::new(Self {
            local_peer,
            network: Arc::clone(network),
            receivers: RwLock::new(HashMap::new()),
            dedup: Mutex::new(MessageDedupCache::with_window(dedup_window)),
            messages_sent: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        });
        network.attach(local_peer, &dispatcher);
        dispatcher
    }

    #[must_use]
    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    /// Hand an inbound message to the receiver registered for its route.
    pub fn deliver(&self, message: RemoteMessage) {
        if let Err(e) = self.dedup.lock().check_and_record(&message) {
            debug!(error = %e, "[Dispatcher] Dropping duplicate message");
            return;
        }

        let key = message.route_key();
        let receiver = self.receivers.read().get(&key).cloned();
        match receiver {
            Some(receiver) => {
                debug!(
                    capability_id = %key.0,
                    don_id = %key.1,
                    method = %message.method,
                    "[Dispatcher] Delivering message"
                );
                self.messages_delivered.fetch_add(1, Ordering::Relaxed);
                receiver.receive(message);
            }
            None => {
                warn!(
                    capability_id = %key.0,
                    don_id = %key.1,
                    method = %message.method,
                    sender = %message.sender,
                    "[Dispatcher] No receiver for message, dead-lettered"
                );
                self.dead_lettered.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Whether a receiver is bound to the key.
    #[must_use]
    pub fn has_receiver(&self, capability_id: &str, don_id: &str) -> bool {
        self.receivers
            .read()
            .contains_key(&(capability_id.to_string(), don_id.to_string()))
    }

    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.receivers.read().len()
    }

    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_delivered(&self) -> u64 {
        self.messages_delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn dead_lettered(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Dispatcher for InMemoryDispatcher {
    fn set_receiver(
        &self,
        capability_id: &str,
        don_id: &str,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Result<(), DispatchError> {
        let key = (capability_id.to_string(), don_id.to_string());
        let mut receivers = self.receivers.write();
        if receivers.contains_key(&key) {
            return Err(DispatchError::ReceiverExists {
                capability_id: key.0,
                don_id: key.1,
            });
        }

        debug!(capability_id, don_id, "[Dispatcher] Receiver registered");
        receivers.insert(key, receiver);
        Ok(())
    }

    fn remove_receiver(&self, capability_id: &str, don_id: &str) {
        let key = (capability_id.to_string(), don_id.to_string());
        if self.receivers.write().remove(&key).is_some() {
            debug!(capability_id, don_id, "[Dispatcher] Receiver removed");
        }
    }

    async fn send(&self, peer: PeerId, message: RemoteMessage) -> Result<(), DispatchError> {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);

        let Some(target) = self.network.lookup(&peer) else {
            warn!(peer = %peer, method = %message.method, "[Dispatcher] Peer unreachable");
            return Err(DispatchError::PeerUnreachable(peer));
        };

        target.deliver(message);
        Ok(())
    }
}
