//! # Inbound Ports
//!
//! API the launcher exposes to the topology syncer and workflow engine.

use crate::domain::LaunchError;
use async_trait::async_trait;
use shared_types::{Node, TopologySnapshot};

/// Capability launcher API - inbound port.
#[async_trait]
pub trait CapabilityLauncherApi: Send + Sync {
    /// Reconcile wiring against a complete topology snapshot.
    async fn launch(&self, snapshot: &TopologySnapshot) -> Result<(), LaunchError>;

    /// Stop every active wiring object. Idempotent.
    async fn close(&self) -> Result<(), LaunchError>;

    /// The local node view from the most recent successful launch.
    fn local_node(&self) -> Result<Node, LaunchError>;
}
