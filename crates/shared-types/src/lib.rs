//! # Shared Types Crate
//!
//! Types shared by every crate in the capability-wiring workspace.
//!
//! ## Contents
//!
//! - `ids` - 32-byte peer / capability identifiers, `DonId`
//! - `topology` - the decoded topology snapshot (`TopologySnapshot`)
//! - `capabilities` - `CapabilityInfo`, request/response types, the
//!   `Capability` tagged variant and its two shape traits
//! - `node` - the local node view reported after reconciliation
//! - `message` - the `RemoteMessage` envelope carried by the dispatch layer

pub mod capabilities;
pub mod ids;
pub mod message;
pub mod node;
pub mod topology;

pub use capabilities::*;
pub use ids::*;
pub use message::{MessageMethod, RemoteMessage};
pub use node::{Don, Node};
pub use topology::*;
