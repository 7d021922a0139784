//! # CW-02 Capability Launcher
//!
//! Reconciles a node's capability wiring against the topology snapshot it is
//! handed. For each snapshot the launcher works out which DONs the local
//! peer belongs to, exposes local capabilities to remote workflow DONs, and
//! wires proxies for capabilities hosted by remote capability DONs.
//!
//! ## Architecture
//!
//! - **Domain Layer:** pure planning (membership, roles, wiring plan, peer set)
//! - **Ports Layer:** `CapabilityLauncherApi` inbound; `PeerConnectivity` and
//!   the `shared-bus` dispatcher outbound
//! - **Remote Layer:** the four wiring shapes and their shared message pump
//! - **Service Layer:** `Launcher`, which commits plans and owns wiring objects
//!
//! ## Reconciliation
//!
//! ```text
//! launch(snapshot)
//!   0. stop previous wiring (reverse order)
//!   1. membership       DONs containing the local peer
//!   2. visibility       drop private DONs
//!   3. roles            workflow DON = lowest-ID public member DON accepting workflows
//!   4. providers        TriggerPublisher / TargetServer per declared capability
//!   5. consumers        TriggerSubscriber / TargetClient per remote capability DON
//!   6. connectivity     update_connections(peer set)
//!   7. commit           start -> set_receiver -> registry insert, unwinding on failure
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let launcher = Launcher::new(config, peer, dispatcher, registry);
//! launcher.launch(&snapshot).await?;
//! let node = launcher.local_node()?;
//! launcher.close().await?;
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod domain;
pub mod ports;
pub mod remote;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{CapabilityOverrides, LauncherConfig};
pub use domain::{LaunchError, SubServiceError, WiringKind};
pub use ports::{CapabilityLauncherApi, ConnectivityError, PeerConnectivity};
pub use remote::{
    Binding, SubService, TargetClient, TargetServer, TriggerEventPayload, TriggerPublisher,
    TriggerSubscriber,
};
pub use service::Launcher;
