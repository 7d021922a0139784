//! # CW-01 Capability Registry
//!
//! Directory of capability implementations addressable by full ID
//! (`"<name>@<version>"`). Holds both implementations hosted by this process
//! and remote proxies inserted by the launcher.
//!
//! ## Invariants
//!
//! | Invariant | Enforcement |
//! |-----------|-------------|
//! | Full IDs are unique | `add()` rejects a different implementation under a bound ID |
//! | Identical re-add is a no-op | `add()` compares implementation identity |
//! | Own synchronization | internal `RwLock`, independent of any caller lock |
//!
//! The registry is an explicit object shared by `Arc`; there is no global
//! instance.

pub mod errors;
pub mod registry;

pub use errors::RegistryError;
pub use registry::CapabilityRegistry;
