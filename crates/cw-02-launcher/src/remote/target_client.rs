//! # Target Client
//!
//! Consumer side of a remote executable capability. Registered in the local
//! Registry as an `ExecutableCapability`: `execute` fans the request out to
//! every capability DON member under one message ID and resolves once F + 1
//! members returned identical responses.

use super::pump::{InboundHandler, MessagePump};
use super::{Binding, SubService};
use crate::config::LauncherConfig;
use crate::domain::{SubServiceError, WiringKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_bus::{Dispatcher, MessageReceiver};
use shared_types::{
    CapabilityError, CapabilityInfo, CapabilityRequest, CapabilityResponse, DonId,
    ExecutableCapability, MessageMethod, PeerId, RemoteMessage, ResponseStream,
    WorkflowRegistrationRequest,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

type Outcome = Result<CapabilityResponse, CapabilityError>;

/// A member's answer: encoded payload plus error text.
type Vote = (Vec<u8>, Option<String>);

struct PendingCall {
    votes: HashMap<PeerId, Vote>,
    reply: Option<oneshot::Sender<Outcome>>,
}

struct ClientState {
    info: CapabilityInfo,
    binding: Binding,
    caller_don_id: DonId,
    dispatcher: Arc<dyn Dispatcher>,
    execute_timeout: Duration,
    pending: Mutex<HashMap<Uuid, PendingCall>>,
}

/// Local stand-in for an executable hosted by a remote capability DON.
pub struct TargetClient {
    name: String,
    state: Arc<ClientState>,
    pump: MessagePump,
}

impl TargetClient {
    #[must_use]
    pub fn new(
        info: CapabilityInfo,
        binding: Binding,
        caller_don_id: DonId,
        dispatcher: Arc<dyn Dispatcher>,
        execute_timeout: Duration,
        config: &LauncherConfig,
    ) -> Self {
        let name = binding.name(WiringKind::TargetClient);
        Self {
            pump: MessagePump::new(name.clone(), config.inbound_buffer, config.stop_timeout()),
            name,
            state: Arc::new(ClientState {
                info,
                binding,
                caller_don_id,
                dispatcher,
                execute_timeout,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Calls awaiting a quorum.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.pending.lock().len()
    }
}

fn outcome(vote: Vote) -> Outcome {
    match vote {
        (_, Some(error)) => Err(CapabilityError::Remote(error)),
        (payload, None) => serde_json::from_slice(&payload)
            .map_err(|e| CapabilityError::Remote(format!("undecodable response: {e}"))),
    }
}

#[async_trait]
impl InboundHandler for ClientState {
    async fn handle(&self, message: RemoteMessage) {
        if message.method != MessageMethod::ExecuteResponse {
            warn!(method = %message.method, "[TargetClient] Unexpected method");
            return;
        }
        if !self.binding.is_member(&message.sender) {
            warn!(
                capability_id = %self.binding.capability_id,
                sender = %message.sender,
                "[TargetClient] Dropping response from non-member"
            );
            return;
        }

        let mut pending = self.pending.lock();
        let Some(call) = pending.get_mut(&message.message_id) else {
            debug!(message_id = %message.message_id, "[TargetClient] Response for unknown call");
            return;
        };

        let vote: Vote = (message.payload, message.error);
        call.votes.insert(message.sender, vote.clone());
        let agreeing = call.votes.values().filter(|v| **v == vote).count();

        let result = if agreeing >= self.binding.quorum() {
            outcome(vote)
        } else if call.votes.len() == self.binding.don.members.len() {
            Err(CapabilityError::Remote(format!(
                "no {} matching responses among {} members",
                self.binding.quorum(),
                call.votes.len()
            )))
        } else {
            return;
        };

        if let Some(reply) = call.reply.take() {
            let _ = reply.send(result);
        }
        pending.remove(&message.message_id);
    }
}

#[async_trait]
impl ExecutableCapability for TargetClient {
    fn info(&self) -> &CapabilityInfo {
        &self.state.info
    }

    async fn register_to_workflow(
        &self,
        request: WorkflowRegistrationRequest,
    ) -> Result<(), CapabilityError> {
        debug!(workflow_id = %request.workflow_id, "[TargetClient] Workflow registered");
        Ok(())
    }

    async fn unregister_from_workflow(
        &self,
        request: WorkflowRegistrationRequest,
    ) -> Result<(), CapabilityError> {
        debug!(workflow_id = %request.workflow_id, "[TargetClient] Workflow unregistered");
        Ok(())
    }

    async fn execute(&self, request: CapabilityRequest) -> Result<ResponseStream, CapabilityError> {
        let state = &self.state;
        let message_id = Uuid::new_v4();
        let (reply, outcome) = oneshot::channel();
        state.pending.lock().insert(
            message_id,
            PendingCall {
                votes: HashMap::new(),
                reply: Some(reply),
            },
        );

        let mut reached = 0;
        for peer in &state.binding.don.members {
            let message = match state
                .binding
                .message(MessageMethod::Execute, state.caller_don_id, *peer)
                .with_message_id(message_id)
                .with_payload(&request)
            {
                Ok(message) => message,
                Err(e) => {
                    state.pending.lock().remove(&message_id);
                    return Err(CapabilityError::InvalidRequest(e.to_string()));
                }
            };
            match state.dispatcher.send(*peer, message).await {
                Ok(()) => reached += 1,
                Err(e) => warn!(peer = %peer, error = %e, "[TargetClient] Send failed"),
            }
        }

        if reached == 0 {
            state.pending.lock().remove(&message_id);
            return Err(CapabilityError::Transport(format!(
                "no member of DON {} reachable",
                state.binding.don.id
            )));
        }

        let result = tokio::time::timeout(state.execute_timeout, outcome).await;
        state.pending.lock().remove(&message_id);

        match result {
            Ok(Ok(Ok(response))) => Ok(Box::pin(tokio_stream::once(response))),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(CapabilityError::Unavailable(format!("{} stopped", self.name))),
            Err(_) => {
                warn!(
                    capability_id = %state.binding.capability_id,
                    message_id = %message_id,
                    "[TargetClient] No quorum before timeout"
                );
                Err(CapabilityError::Timeout(
                    state.execute_timeout.as_millis() as u64
                ))
            }
        }
    }
}

impl MessageReceiver for TargetClient {
    fn receive(&self, message: RemoteMessage) {
        self.pump.push(message);
    }

    fn kind(&self) -> &'static str {
        WiringKind::TargetClient.as_str()
    }
}

#[async_trait]
impl SubService for TargetClient {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> WiringKind {
        WiringKind::TargetClient
    }

    async fn start(&self) -> Result<(), SubServiceError> {
        self.pump.start(Arc::clone(&self.state) as Arc<dyn InboundHandler>)
    }

    async fn stop(&self) -> Result<(), SubServiceError> {
        self.pump.stop().await;
        let calls: Vec<PendingCall> = self.state.pending.lock().drain().map(|(_, c)| c).collect();
        for mut call in calls {
            if let Some(reply) = call.reply.take() {
                let _ = reply.send(Err(CapabilityError::Unavailable(format!(
                    "{} stopped",
                    self.name
                ))));
            }
        }
        Ok(())
    }
}
