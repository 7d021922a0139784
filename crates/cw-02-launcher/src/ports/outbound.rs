//! # Outbound Ports
//!
//! Collaborators the launcher drives: the peer layer and the dispatch layer.

use async_trait::async_trait;
use shared_types::PeerId;
use std::collections::BTreeSet;
use thiserror::Error;

pub use shared_bus::{Dispatcher, MessageReceiver};

/// Peer layer errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    #[error("failed to update peer connections: {0}")]
    UpdateFailed(String),
}

/// Peer identity and connection management - outbound port.
#[async_trait]
pub trait PeerConnectivity: Send + Sync {
    /// Identity of the local peer.
    fn id(&self) -> PeerId;

    /// Maintain connections to exactly `peers`.
    async fn update_connections(&self, peers: BTreeSet<PeerId>) -> Result<(), ConnectivityError>;
}
