//! # Topology Snapshot
//!
//! The decoded view of on-chain capability ownership consumed by the launcher.
//! A snapshot is always a complete replacement of prior knowledge, never a diff.

use crate::ids::{DonId, HashedCapabilityId, PeerId, SignerKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Unknown capability type code.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unknown capability type code: {0}")]
pub struct UnknownCapabilityType(pub u8);

/// Declared type of a capability, using the on-chain numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CapabilityType {
    /// Event source; subscription based.
    Trigger = 0,
    /// Request/response action.
    Action = 1,
    /// Consensus over observations.
    Consensus = 2,
    /// Request/response write target.
    Target = 3,
}

impl CapabilityType {
    /// Lowercase label used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Action => "action",
            Self::Consensus => "consensus",
            Self::Target => "target",
        }
    }

    /// Whether a capability of this type is trigger-shaped.
    #[must_use]
    pub fn is_trigger(&self) -> bool {
        matches!(self, Self::Trigger)
    }
}

impl TryFrom<u8> for CapabilityType {
    type Error = UnknownCapabilityType;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Trigger),
            1 => Ok(Self::Action),
            2 => Ok(Self::Consensus),
            3 => Ok(Self::Target),
            other => Err(UnknownCapabilityType(other)),
        }
    }
}

impl From<CapabilityType> for u8 {
    fn from(t: CapabilityType) -> Self {
        t as u8
    }
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capability hosted by a DON, with its opaque per-DON configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityConfiguration {
    /// Hashed capability identifier.
    pub capability_id: HashedCapabilityId,
    /// Opaque configuration bytes.
    #[serde(default)]
    pub config: Vec<u8>,
}

/// A DON as recorded in the topology snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonInfo {
    /// Numeric DON ID.
    pub id: DonId,
    /// Number of configuration updates the DON has seen.
    #[serde(default)]
    pub config_count: u32,
    /// Fault-tolerance bound.
    pub f: u8,
    /// Visibility. Private DONs are never acted upon.
    pub is_public: bool,
    /// Whether members of this DON execute workflows.
    pub accepts_workflows: bool,
    /// Member peers.
    pub node_p2p_ids: Vec<PeerId>,
    /// Capabilities hosted by this DON.
    #[serde(default)]
    pub capability_configurations: Vec<CapabilityConfiguration>,
}

impl DonInfo {
    /// Whether `peer` is a member of this DON.
    #[must_use]
    pub fn has_member(&self, peer: &PeerId) -> bool {
        self.node_p2p_ids.contains(peer)
    }

    /// Whether this DON declares at least one capability.
    #[must_use]
    pub fn hosts_capabilities(&self) -> bool {
        !self.capability_configurations.is_empty()
    }
}

/// Descriptor of a capability, keyed by its hashed ID in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Display name.
    pub labelled_name: String,
    /// Version string.
    pub version: String,
    /// Declared type.
    pub capability_type: CapabilityType,
}

impl CapabilityDescriptor {
    /// Full capability ID, `"<name>@<version>"`.
    #[must_use]
    pub fn full_id(&self) -> String {
        format!("{}@{}", self.labelled_name, self.version)
    }
}

/// A node as recorded in the topology snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Operator that runs the node.
    pub node_operator_id: u32,
    /// On-chain signer.
    pub signer: SignerKey,
    /// Peer identity.
    pub p2p_id: PeerId,
    /// Capabilities the node hosts locally.
    #[serde(default)]
    pub hashed_capability_ids: Vec<HashedCapabilityId>,
}

/// Complete, immutable view of network topology and capability ownership.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    /// DONs by ID.
    #[serde(default)]
    pub dons: HashMap<DonId, DonInfo>,
    /// Capability descriptors by hashed ID.
    #[serde(default)]
    pub capabilities: HashMap<HashedCapabilityId, CapabilityDescriptor>,
    /// Nodes by peer ID.
    #[serde(default)]
    pub nodes: HashMap<PeerId, NodeInfo>,
}

impl TopologySnapshot {
    /// Resolve a hashed capability ID to its descriptor.
    #[must_use]
    pub fn descriptor(&self, id: &HashedCapabilityId) -> Option<&CapabilityDescriptor> {
        self.capabilities.get(id)
    }

    /// DONs sorted by ID.
    #[must_use]
    pub fn dons_by_id(&self) -> Vec<&DonInfo> {
        let mut dons: Vec<&DonInfo> = self.dons.values().collect();
        dons.sort_by_key(|d| d.id);
        dons
    }
}
