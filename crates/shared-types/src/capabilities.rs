//! # Capabilities
//!
//! Capability metadata, request/response types and the two capability shapes.
//!
//! Every capability implements exactly one shape:
//!
//! | Shape | Operations |
//! |-------|------------|
//! | Trigger | `register_trigger`, `unregister_trigger` |
//! | Executable | `register_to_workflow`, `unregister_from_workflow`, `execute` |
//!
//! The shape is carried as a closed tagged variant ([`Capability`]) so callers
//! switch on the tag instead of probing for behaviour.

use crate::ids::DonId;
use crate::topology::CapabilityType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio_stream::Stream;

/// Maximum length of a full capability ID in bytes.
pub const MAX_CAPABILITY_ID_LENGTH: usize = 128;

/// Errors constructing capability metadata.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InfoError {
    /// ID is not of the form `name@version`.
    #[error("capability id must be of the form <name>@<version>, got {0:?}")]
    MalformedId(String),

    /// ID exceeds the length limit.
    #[error("capability id is {len} bytes, limit is {max}")]
    IdTooLong {
        /// Actual length
        len: usize,
        /// Limit
        max: usize,
    },
}

/// Self-declared metadata of a capability implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    id: String,
    capability_type: CapabilityType,
    description: String,
}

impl CapabilityInfo {
    /// Build metadata, validating the full ID.
    pub fn new(
        id: impl Into<String>,
        capability_type: CapabilityType,
        description: impl Into<String>,
    ) -> Result<Self, InfoError> {
        let id = id.into();
        if id.len() > MAX_CAPABILITY_ID_LENGTH {
            return Err(InfoError::IdTooLong {
                len: id.len(),
                max: MAX_CAPABILITY_ID_LENGTH,
            });
        }

        match id.split_once('@') {
            Some((name, version))
                if !name.is_empty() && !version.is_empty() && !version.contains('@') => {}
            _ => return Err(InfoError::MalformedId(id)),
        }

        Ok(Self {
            id,
            capability_type,
            description: description.into(),
        })
    }

    /// Full ID, `"<name>@<version>"`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name part of the ID.
    #[must_use]
    pub fn name(&self) -> &str {
        self.id.split_once('@').map_or(&self.id, |(name, _)| name)
    }

    /// Version part of the ID.
    #[must_use]
    pub fn version(&self) -> &str {
        self.id.split_once('@').map_or("", |(_, version)| version)
    }

    #[must_use]
    pub fn capability_type(&self) -> CapabilityType {
        self.capability_type
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Metadata attached to every capability request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Workflow that issued the request.
    pub workflow_id: String,
    /// Execution of that workflow.
    #[serde(default)]
    pub workflow_execution_id: String,
    /// DON the workflow runs on.
    #[serde(default)]
    pub workflow_don_id: DonId,
    /// Step reference within the workflow.
    #[serde(default)]
    pub reference_id: String,
}

/// A request to a capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRequest {
    pub metadata: RequestMetadata,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub inputs: serde_json::Value,
}

/// Registration (or unregistration) of a workflow with an executable capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRegistrationRequest {
    pub workflow_id: String,
    #[serde(default)]
    pub workflow_don_id: DonId,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A single response produced by a capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResponse {
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

impl CapabilityResponse {
    /// Successful response.
    #[must_use]
    pub fn ok(value: serde_json::Value) -> Self {
        Self { value, error: None }
    }

    /// Error response.
    #[must_use]
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            value: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Lazy, unbounded sequence of responses. Dropping it cancels the subscription.
pub type ResponseStream = Pin<Box<dyn Stream<Item = CapabilityResponse> + Send>>;

/// Errors raised by capability operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// Request was rejected as malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Capability cannot serve the request right now.
    #[error("capability unavailable: {0}")]
    Unavailable(String),

    /// No quorum of responses arrived in time.
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Remote side reported an error.
    #[error("remote error: {0}")]
    Remote(String),

    /// Messages could not be sent.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Subscription-based event source.
#[async_trait]
pub trait TriggerCapability: Send + Sync {
    fn info(&self) -> &CapabilityInfo;

    /// Subscribe; the returned stream yields events until unregistered or dropped.
    async fn register_trigger(
        &self,
        request: CapabilityRequest,
    ) -> Result<ResponseStream, CapabilityError>;

    async fn unregister_trigger(&self, request: CapabilityRequest) -> Result<(), CapabilityError>;
}

/// Request/response capability (actions, consensus, targets).
#[async_trait]
pub trait ExecutableCapability: Send + Sync {
    fn info(&self) -> &CapabilityInfo;

    async fn register_to_workflow(
        &self,
        request: WorkflowRegistrationRequest,
    ) -> Result<(), CapabilityError>;

    async fn unregister_from_workflow(
        &self,
        request: WorkflowRegistrationRequest,
    ) -> Result<(), CapabilityError>;

    /// Execute once for this request.
    async fn execute(&self, request: CapabilityRequest) -> Result<ResponseStream, CapabilityError>;
}

/// Which operation set a capability exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityShape {
    Trigger,
    Executable,
}

impl fmt::Display for CapabilityShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trigger => f.write_str("trigger"),
            Self::Executable => f.write_str("executable"),
        }
    }
}

/// A capability implementation, tagged by shape.
#[derive(Clone)]
pub enum Capability {
    Trigger(Arc<dyn TriggerCapability>),
    Executable(Arc<dyn ExecutableCapability>),
}

impl Capability {
    /// Wrap a trigger implementation.
    pub fn trigger(capability: impl TriggerCapability + 'static) -> Self {
        Self::Trigger(Arc::new(capability))
    }

    /// Wrap an executable implementation.
    pub fn executable(capability: impl ExecutableCapability + 'static) -> Self {
        Self::Executable(Arc::new(capability))
    }

    #[must_use]
    pub fn info(&self) -> &CapabilityInfo {
        match self {
            Self::Trigger(t) => t.info(),
            Self::Executable(e) => e.info(),
        }
    }

    /// Full ID the implementation declares for itself.
    #[must_use]
    pub fn id(&self) -> &str {
        self.info().id()
    }

    #[must_use]
    pub fn shape(&self) -> CapabilityShape {
        match self {
            Self::Trigger(_) => CapabilityShape::Trigger,
            Self::Executable(_) => CapabilityShape::Executable,
        }
    }

    /// Whether both handles point at the same implementation object.
    #[must_use]
    pub fn same_implementation(&self, other: &Capability) -> bool {
        match (self, other) {
            (Self::Trigger(a), Self::Trigger(b)) => {
                Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
            }
            (Self::Executable(a), Self::Executable(b)) => {
                Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("id", &self.id())
            .field("shape", &self.shape())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopTrigger(CapabilityInfo);

    #[async_trait]
    impl TriggerCapability for NoopTrigger {
        fn info(&self) -> &CapabilityInfo {
            &self.0
        }

        async fn register_trigger(
            &self,
            _request: CapabilityRequest,
        ) -> Result<ResponseStream, CapabilityError> {
            Ok(Box::pin(tokio_stream::empty()))
        }

        async fn unregister_trigger(
            &self,
            _request: CapabilityRequest,
        ) -> Result<(), CapabilityError> {
            Ok(())
        }
    }

    fn trigger_info() -> CapabilityInfo {
        CapabilityInfo::new("streams-trigger@1.0.0", CapabilityType::Trigger, "streams").unwrap()
    }

    #[test]
    fn test_info_splits_name_and_version() {
        let info = trigger_info();
        assert_eq!(info.name(), "streams-trigger");
        assert_eq!(info.version(), "1.0.0");
        assert_eq!(info.capability_type(), CapabilityType::Trigger);
    }

    #[test]
    fn test_info_rejects_malformed_ids() {
        for bad in ["streams-trigger", "@1.0.0", "streams@", "a@b@c"] {
            assert!(
                matches!(
                    CapabilityInfo::new(bad, CapabilityType::Target, ""),
                    Err(InfoError::MalformedId(_))
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_info_rejects_long_ids() {
        let id = format!("{}@1.0.0", "x".repeat(MAX_CAPABILITY_ID_LENGTH));
        assert!(matches!(
            CapabilityInfo::new(id, CapabilityType::Target, ""),
            Err(InfoError::IdTooLong { .. })
        ));
    }

    #[test]
    fn test_same_implementation_uses_identity() {
        let a = Capability::trigger(NoopTrigger(trigger_info()));
        let b = a.clone();
        let c = Capability::trigger(NoopTrigger(trigger_info()));

        assert!(a.same_implementation(&b));
        assert!(!a.same_implementation(&c));
        assert_eq!(a.shape(), CapabilityShape::Trigger);
        assert_eq!(a.id(), "streams-trigger@1.0.0");
    }

    #[test]
    fn test_response_constructors() {
        assert!(!CapabilityResponse::ok(serde_json::json!(1)).is_error());
        assert!(CapabilityResponse::err("boom").is_error());
    }
}
