//! Peer layer adapter over the in-process network.

use async_trait::async_trait;
use cw_02_launcher::{ConnectivityError, PeerConnectivity};
use parking_lot::RwLock;
use shared_bus::InMemoryNetwork;
use shared_types::PeerId;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Tracks the desired connection set; peers are reachable once they attach
/// to the shared [`InMemoryNetwork`].
pub struct LoopbackPeer {
    id: PeerId,
    network: Arc<InMemoryNetwork>,
    connections: RwLock<BTreeSet<PeerId>>,
}

impl LoopbackPeer {
    #[must_use]
    pub fn new(id: PeerId, network: Arc<InMemoryNetwork>) -> Self {
        Self {
            id,
            network,
            connections: RwLock::new(BTreeSet::new()),
        }
    }

    /// The last connection set requested by the launcher.
    #[must_use]
    pub fn connections(&self) -> BTreeSet<PeerId> {
        self.connections.read().clone()
    }

    /// Requested peers currently attached to the network.
    #[must_use]
    pub fn reachable(&self) -> usize {
        self.connections
            .read()
            .iter()
            .filter(|p| self.network.is_attached(p))
            .count()
    }
}

#[async_trait]
impl PeerConnectivity for LoopbackPeer {
    fn id(&self) -> PeerId {
        self.id
    }

    async fn update_connections(&self, peers: BTreeSet<PeerId>) -> Result<(), ConnectivityError> {
        let mut connections = self.connections.write();
        let added = peers.difference(&connections).count();
        let removed = connections.difference(&peers).count();

        for peer in peers.iter().filter(|p| **p != self.id) {
            if !self.network.is_attached(peer) {
                debug!(peer = %peer, "[Peer] Requested peer not yet reachable");
            }
        }

        info!(
            total = peers.len(),
            added,
            removed,
            "[Peer] Connection set updated"
        );
        *connections = peers;
        Ok(())
    }
}
