//! # Domain Layer
//!
//! Pure reconciliation planning plus the launcher's error types. Nothing in
//! here starts tasks or touches the network.

pub mod errors;
pub mod plan;

pub use errors::{LaunchError, SubServiceError};
pub use plan::{
    connection_set, plan_consumers, plan_providers, workflow_dons, DonRoles, PlannedWiring, Wiring,
    WiringKind,
};
