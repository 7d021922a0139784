//! # Integration Tests
//!
//! - `launcher_flows`: one launcher, recorded dispatch, scripted snapshots
//! - `remote_e2e`: workflow and capability DON nodes exchanging messages

pub mod launcher_flows;
pub mod remote_e2e;
