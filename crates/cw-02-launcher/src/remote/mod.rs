//! # Remote Wiring
//!
//! The four wiring shapes that bridge a capability across peers. Each one is
//! a [`SubService`] (start/stop lifecycle owned by the launcher) and a
//! [`MessageReceiver`](shared_bus::MessageReceiver) bound in the dispatcher
//! under (full capability ID, decimal DON ID).
//!
//! | Shape | Side | Fronts | Inbound methods |
//! |-------|------|--------|-----------------|
//! | [`TriggerPublisher`] | provider | local trigger | `RegisterTrigger`, `UnregisterTrigger` |
//! | [`TargetServer`] | provider | local executable | `Execute` |
//! | [`TriggerSubscriber`] | consumer | remote trigger | `TriggerEvent` |
//! | [`TargetClient`] | consumer | remote executable | `ExecuteResponse` |

mod payloads;
mod pump;
pub mod target_client;
pub mod target_server;
pub mod trigger_publisher;
pub mod trigger_subscriber;

pub use payloads::TriggerEventPayload;
pub use target_client::TargetClient;
pub use target_server::TargetServer;
pub use trigger_publisher::TriggerPublisher;
pub use trigger_subscriber::TriggerSubscriber;

use crate::domain::{SubServiceError, WiringKind};
use async_trait::async_trait;
use shared_types::{Don, DonId, PeerId, RemoteMessage};

/// Uniform lifecycle handle over a wiring object.
#[async_trait]
pub trait SubService: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> String;

    fn kind(&self) -> WiringKind;

    /// Start the receive loop. Fails if already started.
    async fn start(&self) -> Result<(), SubServiceError>;

    /// Stop the receive loop and release resources. Idempotent.
    async fn stop(&self) -> Result<(), SubServiceError>;
}

/// The (capability, hosting DON) pair a wiring object is bound to, seen from
/// the local peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub capability_id: String,
    pub don: Don,
    pub local_peer: PeerId,
}

impl Binding {
    #[must_use]
    pub fn new(capability_id: impl Into<String>, don: Don, local_peer: PeerId) -> Self {
        Self {
            capability_id: capability_id.into(),
            don,
            local_peer,
        }
    }

    pub(crate) fn name(&self, kind: WiringKind) -> String {
        format!("{kind}({}, DON {})", self.capability_id, self.don.id)
    }

    /// Message from the local peer to `receiver` about this binding.
    pub(crate) fn message(
        &self,
        method: shared_types::MessageMethod,
        caller_don_id: DonId,
        receiver: PeerId,
    ) -> RemoteMessage {
        RemoteMessage::new(
            method,
            self.capability_id.clone(),
            self.don.id,
            caller_don_id,
            self.local_peer,
            receiver,
        )
    }

    /// Whether `sender` is a member of the hosting DON.
    pub(crate) fn is_member(&self, sender: &PeerId) -> bool {
        self.don.members.contains(sender)
    }

    /// Matching responses needed to trust a result: F + 1.
    pub(crate) fn quorum(&self) -> usize {
        usize::from(self.don.f) + 1
    }
}

/// Whether the message's sender belongs to the workflow DON it claims to
/// call from.
pub(crate) fn is_authorized_caller(callers: &[Don], message: &RemoteMessage) -> bool {
    callers
        .iter()
        .any(|d| d.id == message.caller_don_id && d.members.contains(&message.sender))
}
