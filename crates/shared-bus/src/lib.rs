//! # Shared Bus - Capability Message Dispatch
//!
//! The dispatch substrate used by capability wiring objects.
//!
//! ## Rules
//!
//! - Every wiring object is reachable under exactly one key:
//!   (full capability ID, decimal DON ID)
//! - A key holds at most one receiver; re-registration must be preceded by
//!   removal
//! - Messages for unbound keys are dead-lettered, never queued
//!
//! ## Components
//!
//! - [`Dispatcher`] / [`MessageReceiver`] - the ports wiring objects use
//! - [`InMemoryNetwork`] / [`InMemoryDispatcher`] - in-process transport
//!   connecting the dispatchers of several nodes
//! - [`MessageDedupCache`] - time-bounded drop of redelivered messages

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod dedup_cache;
pub mod dispatcher;

pub use dedup_cache::{DedupError, MessageDedupCache};
pub use dispatcher::{
    DispatchError, Dispatcher, InMemoryDispatcher, InMemoryNetwork, MessageReceiver,
};

/// Default capacity of a wiring object's inbound queue.
pub const DEFAULT_INBOUND_CAPACITY: usize = 1000;
