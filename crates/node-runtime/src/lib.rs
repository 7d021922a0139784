//! # Node Runtime Library
//!
//! Building blocks of the `node-runtime` binary, exposed for tests and for
//! embedding several nodes in one process.
//!
//! - `config` - TOML + `CW_*` environment configuration
//! - `logging` - `tracing-subscriber` initialisation
//! - `adapters` - peer layer and snapshot file source
//! - `runtime` - the reconcile loop

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod config;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, NodeConfig, CONFIG_PATH_ENV};
pub use logging::init_logging;
pub use runtime::{NodeRuntime, ReconcileOutcome, RuntimeError};
