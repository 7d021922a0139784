//! # Reconciliation Planning
//!
//! Turns a topology snapshot into an ordered list of wiring objects to
//! build, without side effects.
//!
//! ```text
//! snapshot ──→ classify(P) ──→ DonRoles { member public DONs, workflow DON }
//!                   │
//!                   ├──→ plan_providers ──→ TriggerPublisher / TargetServer
//!                   ├──→ plan_consumers ──→ TriggerSubscriber / TargetClient
//!                   └──→ connection_set ──→ BTreeSet<PeerId>
//! ```

use crate::config::CapabilityOverrides;
use crate::domain::errors::LaunchError;
use cw_01_capability_registry::{CapabilityRegistry, RegistryError};
use shared_types::{
    Capability, CapabilityConfiguration, CapabilityDescriptor, CapabilityType, Don, DonId,
    DonInfo, ExecutableCapability, Node, PeerId, TopologySnapshot, TriggerCapability,
};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Which of the four remote shapes a wiring object takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WiringKind {
    TriggerPublisher,
    TargetServer,
    TriggerSubscriber,
    TargetClient,
}

impl WiringKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TriggerPublisher => "trigger_publisher",
            Self::TargetServer => "target_server",
            Self::TriggerSubscriber => "trigger_subscriber",
            Self::TargetClient => "target_client",
        }
    }

    /// Consumer shapes stand in for a remote capability and get a Registry entry.
    #[must_use]
    pub fn is_consumer(&self) -> bool {
        matches!(self, Self::TriggerSubscriber | Self::TargetClient)
    }
}

impl fmt::Display for WiringKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a planned wiring object fronts.
#[derive(Clone)]
pub enum Wiring {
    /// Serve a local trigger to members of the `callers` DONs.
    Publish {
        trigger: Arc<dyn TriggerCapability>,
        callers: Vec<Don>,
    },
    /// Serve a local executable to members of the `callers` DONs.
    Serve {
        executable: Arc<dyn ExecutableCapability>,
        callers: Vec<Don>,
    },
    /// Subscribe to a remote trigger on behalf of the workflow DON.
    Subscribe { capability_type: CapabilityType },
    /// Call a remote executable on behalf of the workflow DON.
    Call { capability_type: CapabilityType },
}

impl Wiring {
    #[must_use]
    pub fn kind(&self) -> WiringKind {
        match self {
            Self::Publish { .. } => WiringKind::TriggerPublisher,
            Self::Serve { .. } => WiringKind::TargetServer,
            Self::Subscribe { .. } => WiringKind::TriggerSubscriber,
            Self::Call { .. } => WiringKind::TargetClient,
        }
    }
}

impl fmt::Debug for Wiring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().as_str())
    }
}

/// One wiring object to build, bound to (full capability ID, DON).
#[derive(Debug, Clone)]
pub struct PlannedWiring {
    pub capability_id: String,
    /// The DON hosting the capability.
    pub don: Don,
    /// The local workflow DON for consumers; the hosting DON for providers.
    pub caller_don_id: DonId,
    pub wiring: Wiring,
    pub overrides: CapabilityOverrides,
}

impl PlannedWiring {
    #[must_use]
    pub fn kind(&self) -> WiringKind {
        self.wiring.kind()
    }
}

/// The local node's DON memberships after visibility filtering.
#[derive(Debug, Clone)]
pub struct DonRoles<'a> {
    pub local_peer: PeerId,
    /// Public DONs containing the local peer, sorted by ID.
    pub member_dons: Vec<&'a DonInfo>,
    /// Lowest-ID member DON that accepts workflows.
    pub workflow_don: Option<&'a DonInfo>,
}

impl<'a> DonRoles<'a> {
    /// Classify the snapshot's DONs relative to `local_peer`.
    ///
    /// Private DONs are dropped whether or not the peer is a member.
    #[must_use]
    pub fn classify(snapshot: &'a TopologySnapshot, local_peer: PeerId) -> Self {
        let mut member_dons = Vec::new();
        for don in snapshot.dons_by_id() {
            if !don.has_member(&local_peer) {
                continue;
            }
            if !don.is_public {
                debug!(don_id = don.id, "[Launcher] Ignoring private DON");
                continue;
            }
            member_dons.push(don);
        }

        let workflow_don = member_dons.iter().copied().find(|d| d.accepts_workflows);

        Self {
            local_peer,
            member_dons,
            workflow_don,
        }
    }

    /// Node view reported by `local_node`.
    #[must_use]
    pub fn to_node(&self) -> Node {
        Node {
            peer_id: self.local_peer,
            workflow_don: self.workflow_don.map(Don::from),
            capability_dons: self.member_dons.iter().map(|d| Don::from(*d)).collect(),
        }
    }
}

/// Every public workflow DON in the snapshot: the DONs allowed to call a
/// provider.
#[must_use]
pub fn workflow_dons(snapshot: &TopologySnapshot) -> Vec<Don> {
    snapshot
        .dons_by_id()
        .into_iter()
        .filter(|d| d.is_public && d.accepts_workflows)
        .map(Don::from)
        .collect()
}

fn resolve<'s>(
    snapshot: &'s TopologySnapshot,
    don: &DonInfo,
    configuration: &CapabilityConfiguration,
) -> Result<&'s CapabilityDescriptor, LaunchError> {
    snapshot
        .descriptor(&configuration.capability_id)
        .ok_or(LaunchError::Resolution {
            hashed_id: configuration.capability_id,
            don_id: don.id,
        })
}

fn overrides(
    capability_id: &str,
    don: &DonInfo,
    configuration: &CapabilityConfiguration,
) -> Result<CapabilityOverrides, LaunchError> {
    CapabilityOverrides::from_bytes(&configuration.config).map_err(|e| {
        LaunchError::InvalidCapability {
            capability_id: capability_id.to_string(),
            don_id: don.id,
            reason: format!("bad capability config: {e}"),
        }
    })
}

/// Provider wiring for every capability the local node's workflow-accepting
/// DONs declare.
///
/// # Errors
///
/// `Resolution` for a hash with no descriptor, `Configuration` when the
/// Registry has no implementation for the resolved ID.
pub fn plan_providers(
    snapshot: &TopologySnapshot,
    roles: &DonRoles<'_>,
    registry: &CapabilityRegistry,
) -> Result<Vec<PlannedWiring>, LaunchError> {
    let mut planned = Vec::new();
    let callers = workflow_dons(snapshot);

    for don in roles
        .member_dons
        .iter()
        .filter(|d| d.accepts_workflows && d.hosts_capabilities())
    {
        for configuration in &don.capability_configurations {
            let capability_id = resolve(snapshot, don, configuration)?.full_id();

            let wiring = match registry.get(&capability_id) {
                Ok(Capability::Trigger(trigger)) => Wiring::Publish {
                    trigger,
                    callers: callers.clone(),
                },
                Ok(Capability::Executable(executable)) => Wiring::Serve {
                    executable,
                    callers: callers.clone(),
                },
                Err(RegistryError::NotFound(_)) => {
                    return Err(LaunchError::Configuration {
                        capability_id,
                        don_id: don.id,
                    })
                }
                Err(e) => return Err(e.into()),
            };

            debug!(
                capability_id = %capability_id,
                don_id = don.id,
                kind = %wiring.kind(),
                "[Launcher] Planned provider wiring"
            );
            planned.push(PlannedWiring {
                overrides: overrides(&capability_id, don, configuration)?,
                capability_id,
                don: Don::from(*don),
                caller_don_id: don.id,
                wiring,
            });
        }
    }

    Ok(planned)
}

/// Consumer wiring for every public capability DON in the snapshot.
///
/// Empty when the local node has no workflow DON.
///
/// # Errors
///
/// `Resolution` for a hash with no descriptor.
pub fn plan_consumers(
    snapshot: &TopologySnapshot,
    roles: &DonRoles<'_>,
) -> Result<Vec<PlannedWiring>, LaunchError> {
    let Some(workflow_don) = roles.workflow_don else {
        debug!("[Launcher] No workflow DON, skipping consumer wiring");
        return Ok(Vec::new());
    };

    let mut planned = Vec::new();

    for don in snapshot
        .dons_by_id()
        .into_iter()
        .filter(|d| d.is_public && !d.accepts_workflows && d.hosts_capabilities())
    {
        for configuration in &don.capability_configurations {
            let descriptor = resolve(snapshot, don, configuration)?;
            let capability_id = descriptor.full_id();
            let capability_type = descriptor.capability_type;

            let wiring = if capability_type.is_trigger() {
                Wiring::Subscribe { capability_type }
            } else {
                Wiring::Call { capability_type }
            };

            debug!(
                capability_id = %capability_id,
                don_id = don.id,
                kind = %wiring.kind(),
                "[Launcher] Planned consumer wiring"
            );
            planned.push(PlannedWiring {
                overrides: overrides(&capability_id, don, configuration)?,
                capability_id,
                don: Don::from(don),
                caller_don_id: workflow_don.id,
                wiring,
            });
        }
    }

    Ok(planned)
}

/// Peers to stay connected to: members of every public DON the local node
/// belongs to, plus members of every DON it consumes from.
#[must_use]
pub fn connection_set(roles: &DonRoles<'_>, planned: &[PlannedWiring]) -> BTreeSet<PeerId> {
    let mut peers: BTreeSet<PeerId> = roles
        .member_dons
        .iter()
        .flat_map(|d| d.node_p2p_ids.iter().copied())
        .collect();

    peers.extend(
        planned
            .iter()
            .filter(|p| p.kind().is_consumer())
            .flat_map(|p| p.don.members.iter().copied()),
    );

    peers
}
