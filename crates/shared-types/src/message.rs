//! # Remote Message Envelope
//!
//! The unit exchanged between wiring objects on different nodes. Payloads are
//! JSON-encoded; routing is by (capability ID, capability DON ID).

use crate::ids::{DonId, PeerId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Operation carried by a [`RemoteMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageMethod {
    RegisterTrigger,
    UnregisterTrigger,
    TriggerEvent,
    Execute,
    ExecuteResponse,
}

impl fmt::Display for MessageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Envelope for capability traffic between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMessage {
    /// Unique per message; responses reuse the request's ID.
    pub message_id: Uuid,
    pub capability_id: String,
    pub capability_don_id: DonId,
    pub caller_don_id: DonId,
    pub sender: PeerId,
    pub receiver: PeerId,
    pub method: MessageMethod,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub error: Option<String>,
}

impl RemoteMessage {
    /// New message with a fresh ID and an empty payload.
    #[must_use]
    pub fn new(
        method: MessageMethod,
        capability_id: impl Into<String>,
        capability_don_id: DonId,
        caller_don_id: DonId,
        sender: PeerId,
        receiver: PeerId,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            capability_id: capability_id.into(),
            capability_don_id,
            caller_don_id,
            sender,
            receiver,
            method,
            payload: Vec::new(),
            error: None,
        }
    }

    /// Attach a JSON-encoded payload.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = serde_json::to_vec(payload)?;
        Ok(self)
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn with_message_id(mut self, message_id: Uuid) -> Self {
        self.message_id = message_id;
        self
    }

    /// Decode the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Dispatch key of the receiver this message is addressed to.
    #[must_use]
    pub fn route_key(&self) -> (String, String) {
        (self.capability_id.clone(), self.capability_don_id.to_string())
    }

    /// Build a reply addressed back to the sender, keeping the message ID.
    #[must_use]
    pub fn reply(&self, method: MessageMethod, from: PeerId) -> Self {
        Self {
            message_id: self.message_id,
            capability_id: self.capability_id.clone(),
            capability_don_id: self.capability_don_id,
            caller_don_id: self.caller_don_id,
            sender: from,
            receiver: self.sender,
            method,
            payload: Vec::new(),
            error: None,
        }
    }
}
