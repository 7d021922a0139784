//! # Ports
//!
//! - Inbound: `CapabilityLauncherApi` - what the launcher offers
//! - Outbound: `PeerConnectivity` plus the dispatch ports from `shared-bus`

pub mod inbound;
pub mod outbound;

pub use inbound::CapabilityLauncherApi;
pub use outbound::{ConnectivityError, Dispatcher, MessageReceiver, PeerConnectivity};
