//! # Domain Errors
//!
//! Any error raised while reconciling aborts the whole launch; already-started
//! wiring from that call is unwound before the error surfaces.

use cw_01_capability_registry::RegistryError;
use shared_bus::DispatchError;
use shared_types::{DonId, HashedCapabilityId};
use thiserror::Error;

use crate::ports::outbound::ConnectivityError;

/// Launcher error types.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// A DON asserts the local node provides a capability that is not registered.
    #[error("DON {don_id} expects capability {capability_id} to be provided locally, but it is not registered")]
    Configuration { capability_id: String, don_id: DonId },

    /// A hashed capability ID has no descriptor in the snapshot.
    #[error("DON {don_id} declares capability {hashed_id} which has no descriptor")]
    Resolution {
        hashed_id: HashedCapabilityId,
        don_id: DonId,
    },

    /// A descriptor or its per-DON config is unusable.
    #[error("invalid capability {capability_id} on DON {don_id}: {reason}")]
    InvalidCapability {
        capability_id: String,
        don_id: DonId,
        reason: String,
    },

    /// Receiver registration with the dispatch layer failed.
    #[error("dispatch registration failed: {0}")]
    Dispatch(#[from] DispatchError),

    /// Registry insert of a remote proxy failed.
    #[error("registry update failed: {0}")]
    Registry(#[from] RegistryError),

    /// The peer layer refused the connection set.
    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    /// A wiring object failed to start or stop.
    #[error(transparent)]
    SubService(#[from] SubServiceError),

    /// The caller cancelled before the commit phase.
    #[error("reconciliation cancelled")]
    Cancelled,

    /// `local_node` was called before any launch succeeded.
    #[error("no successful launch yet")]
    NotLaunched,
}

/// Wiring object lifecycle errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubServiceError {
    /// `start` called on a running or stopped object.
    #[error("{0} was already started")]
    AlreadyStarted(String),

    /// The receive loop could not be spawned.
    #[error("{name} failed to start: {reason}")]
    StartFailed { name: String, reason: String },

    /// Resources held on behalf of remote peers could not be released.
    #[error("{name} failed to stop cleanly: {reason}")]
    StopFailed { name: String, reason: String },
}
