//! Wire payloads that are not plain `CapabilityRequest` / `CapabilityResponse`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared_types::CapabilityResponse;

/// Body of a `TriggerEvent` message.
///
/// `event_id` is derived from the event content, so every member that
/// observed the event names it the same way regardless of when the workflow
/// registered with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEventPayload {
    pub workflow_id: String,
    pub event_id: String,
    pub response: CapabilityResponse,
}

impl TriggerEventPayload {
    pub fn new(
        workflow_id: impl Into<String>,
        response: CapabilityResponse,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            workflow_id: workflow_id.into(),
            event_id: event_digest(&response)?,
            response,
        })
    }
}

/// Hex SHA-256 of the JSON encoding of `response`.
pub fn event_digest(response: &CapabilityResponse) -> Result<String, serde_json::Error> {
    let encoded = serde_json::to_vec(response)?;
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    Ok(hex::encode(hasher.finalize()))
}
