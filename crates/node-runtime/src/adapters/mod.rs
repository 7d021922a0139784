//! # Adapters
//!
//! Concrete implementations of the launcher's outbound ports for a
//! single-process node.

pub mod peer;
pub mod snapshot_source;

pub use peer::LoopbackPeer;
pub use snapshot_source::{FileSnapshotSource, SnapshotError, SnapshotRead};
