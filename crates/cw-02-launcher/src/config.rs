//! Configuration for the capability launcher.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Launcher configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Capacity of each wiring object's inbound message queue
    pub inbound_buffer: usize,
    /// Upper bound on waiting for a wiring object's receive loop to exit
    pub stop_timeout_ms: u64,
    /// How long a remote execute waits for a quorum of responses
    pub execute_timeout_ms: u64,
}

impl LauncherConfig {
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    #[must_use]
    pub fn execute_timeout(&self) -> Duration {
        Duration::from_millis(self.execute_timeout_ms)
    }
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            inbound_buffer: shared_bus::DEFAULT_INBOUND_CAPACITY,
            stop_timeout_ms: 5_000,
            execute_timeout_ms: 30_000,
        }
    }
}

/// Per-DON overrides carried in a capability's opaque config bytes.
///
/// Empty bytes mean no overrides; otherwise the bytes must be a JSON object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CapabilityOverrides {
    /// Remote execute timeout for this capability on this DON
    pub execute_timeout_ms: Option<u64>,
}

impl CapabilityOverrides {
    /// Decode overrides from the snapshot's config bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(bytes)
    }

    /// Effective execute timeout given the launcher default.
    #[must_use]
    pub fn execute_timeout(&self, config: &LauncherConfig) -> Duration {
        self.execute_timeout_ms
            .map_or_else(|| config.execute_timeout(), Duration::from_millis)
    }
}
