//! # Node View
//!
//! What the local node reports about itself after a successful reconciliation.

use crate::ids::{DonId, PeerId};
use crate::topology::DonInfo;
use serde::{Deserialize, Serialize};

/// A DON as seen by capability callers: ID, members and fault tolerance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Don {
    pub id: DonId,
    pub members: Vec<PeerId>,
    pub f: u8,
}

impl Don {
    /// Dispatch-layer form of the DON ID (decimal string).
    #[must_use]
    pub fn dispatch_id(&self) -> String {
        self.id.to_string()
    }
}

impl From<&DonInfo> for Don {
    fn from(info: &DonInfo) -> Self {
        Self {
            id: info.id,
            members: info.node_p2p_ids.clone(),
            f: info.f,
        }
    }
}

/// The local node's position in the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub peer_id: PeerId,
    /// Lowest-ID public workflow DON the node belongs to, if any.
    pub workflow_don: Option<Don>,
    /// Every public DON the node belongs to, sorted by ID.
    pub capability_dons: Vec<Don>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_don_from_info() {
        let info = DonInfo {
            id: 12,
            f: 2,
            node_p2p_ids: vec![PeerId::new([1; 32])],
            ..Default::default()
        };
        let don = Don::from(&info);
        assert_eq!(don.id, 12);
        assert_eq!(don.f, 2);
        assert_eq!(don.members.len(), 1);
        assert_eq!(don.dispatch_id(), "12");
    }
}
