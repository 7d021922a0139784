//! # Trigger Subscriber
//!
//! Consumer side of a remote trigger. Registered in the local Registry as a
//! `TriggerCapability`; a workflow registering with it causes a
//! `RegisterTrigger` to every capability DON member. Inbound `TriggerEvent`s
//! are aggregated per (workflow, event digest) and emitted once F + 1 members
//! delivered the same event.

use super::payloads::{event_digest, TriggerEventPayload};
use super::pump::{InboundHandler, MessagePump};
use super::{Binding, SubService};
use crate::config::LauncherConfig;
use crate::domain::{SubServiceError, WiringKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_bus::{Dispatcher, MessageReceiver};
use shared_types::{
    CapabilityError, CapabilityInfo, CapabilityRequest, CapabilityResponse, DonId,
    MessageMethod, PeerId, RemoteMessage, ResponseStream, TriggerCapability,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

/// Events remembered per workflow after delivery.
const DELIVERED_HISTORY: usize = 1024;
/// Undelivered events a single member may hold open per workflow.
const PENDING_PER_MEMBER: usize = 256;

struct Subscription {
    request: CapabilityRequest,
    events: mpsc::UnboundedSender<CapabilityResponse>,
    /// Members that sent each undelivered event.
    votes: HashMap<String, BTreeSet<PeerId>>,
    /// Undelivered events per member, oldest first.
    pending: HashMap<PeerId, VecDeque<String>>,
    delivered: VecDeque<String>,
}

impl Subscription {
    fn new(request: CapabilityRequest, events: mpsc::UnboundedSender<CapabilityResponse>) -> Self {
        Self {
            request,
            events,
            votes: HashMap::new(),
            pending: HashMap::new(),
            delivered: VecDeque::new(),
        }
    }

    /// Record a member's copy of an event. Returns the response once a quorum
    /// of members sent it.
    ///
    /// `payload.event_id` must already match the response digest.
    fn vote(
        &mut self,
        sender: PeerId,
        payload: TriggerEventPayload,
        quorum: usize,
    ) -> Option<CapabilityResponse> {
        let event_id = payload.event_id;
        if self.delivered.contains(&event_id) {
            return None;
        }

        let voters = self.votes.entry(event_id.clone()).or_default();
        if !voters.insert(sender) {
            return None;
        }
        if voters.len() < quorum {
            self.track(sender, event_id);
            return None;
        }

        self.votes.remove(&event_id);
        for queue in self.pending.values_mut() {
            queue.retain(|id| *id != event_id);
        }
        self.pending.retain(|_, queue| !queue.is_empty());
        self.delivered.push_back(event_id);
        if self.delivered.len() > DELIVERED_HISTORY {
            self.delivered.pop_front();
        }
        Some(payload.response)
    }

    /// Remember an open vote, dropping the member's oldest one past the cap.
    fn track(&mut self, sender: PeerId, event_id: String) {
        let queue = self.pending.entry(sender).or_default();
        queue.push_back(event_id);
        if queue.len() <= PENDING_PER_MEMBER {
            return;
        }
        let Some(evicted) = queue.pop_front() else {
            return;
        };
        if let Some(voters) = self.votes.get_mut(&evicted) {
            voters.remove(&sender);
            if voters.is_empty() {
                self.votes.remove(&evicted);
            }
        }
    }

    #[cfg(test)]
    fn pending_events(&self) -> usize {
        self.votes.len()
    }
}

struct SubscriberState {
    info: CapabilityInfo,
    binding: Binding,
    caller_don_id: DonId,
    dispatcher: Arc<dyn Dispatcher>,
    workflows: Mutex<HashMap<String, Subscription>>,
}

/// Local stand-in for a trigger hosted by a remote capability DON.
pub struct TriggerSubscriber {
    name: String,
    state: Arc<SubscriberState>,
    pump: MessagePump,
}

impl TriggerSubscriber {
    /// `caller_don_id` is the local workflow DON the subscriptions are made
    /// on behalf of.
    #[must_use]
    pub fn new(
        info: CapabilityInfo,
        binding: Binding,
        caller_don_id: DonId,
        dispatcher: Arc<dyn Dispatcher>,
        config: &LauncherConfig,
    ) -> Self {
        let name = binding.name(WiringKind::TriggerSubscriber);
        Self {
            pump: MessagePump::new(name.clone(), config.inbound_buffer, config.stop_timeout()),
            name,
            state: Arc::new(SubscriberState {
                info,
                binding,
                caller_don_id,
                dispatcher,
                workflows: Mutex::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.state.workflows.lock().len()
    }
}

impl SubscriberState {
    /// Send `method` with `request` to every capability DON member. Returns
    /// how many sends succeeded.
    async fn broadcast(
        &self,
        method: MessageMethod,
        request: &CapabilityRequest,
    ) -> Result<usize, CapabilityError> {
        let mut delivered = 0;
        for peer in &self.binding.don.members {
            let message = self
                .binding
                .message(method, self.caller_don_id, *peer)
                .with_payload(request)
                .map_err(|e| CapabilityError::InvalidRequest(e.to_string()))?;
            match self.dispatcher.send(*peer, message).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    capability_id = %self.binding.capability_id,
                    peer = %peer,
                    method = %method,
                    error = %e,
                    "[TriggerSubscriber] Send failed"
                ),
            }
        }
        Ok(delivered)
    }

    async fn cancel(&self, request: &CapabilityRequest) {
        if let Err(e) = self
            .broadcast(MessageMethod::UnregisterTrigger, request)
            .await
        {
            warn!(error = %e, "[TriggerSubscriber] Failed to unregister remotely");
        }
    }
}

#[async_trait]
impl InboundHandler for SubscriberState {
    async fn handle(&self, message: RemoteMessage) {
        if message.method != MessageMethod::TriggerEvent {
            warn!(method = %message.method, "[TriggerSubscriber] Unexpected method");
            return;
        }
        if !self.binding.is_member(&message.sender) {
            warn!(
                capability_id = %self.binding.capability_id,
                sender = %message.sender,
                "[TriggerSubscriber] Dropping event from non-member"
            );
            return;
        }
        let payload: TriggerEventPayload = match message.decode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(sender = %message.sender, error = %e, "[TriggerSubscriber] Undecodable event");
                return;
            }
        };

        match event_digest(&payload.response) {
            Ok(digest) if digest == payload.event_id => {}
            _ => {
                warn!(
                    sender = %message.sender,
                    event_id = %payload.event_id,
                    "[TriggerSubscriber] Event ID does not match its content"
                );
                return;
            }
        }

        let workflow_id = payload.workflow_id.clone();
        let event_id = payload.event_id.clone();
        let abandoned = {
            let mut workflows = self.workflows.lock();
            let Some(subscription) = workflows.get_mut(&workflow_id) else {
                debug!(workflow_id = %workflow_id, "[TriggerSubscriber] Event for unknown workflow");
                return;
            };
            match subscription.vote(message.sender, payload, self.binding.quorum()) {
                Some(response) => {
                    if subscription.events.send(response).is_err() {
                        workflows.remove(&workflow_id).map(|s| s.request)
                    } else {
                        debug!(
                            workflow_id = %workflow_id,
                            event_id = %event_id,
                            "[TriggerSubscriber] Event reached quorum"
                        );
                        None
                    }
                }
                None => None,
            }
        };

        if let Some(request) = abandoned {
            info!(workflow_id = %workflow_id, "[TriggerSubscriber] Stream dropped, unregistering");
            self.cancel(&request).await;
        }
    }
}

#[async_trait]
impl TriggerCapability for TriggerSubscriber {
    fn info(&self) -> &CapabilityInfo {
        &self.state.info
    }

    async fn register_trigger(
        &self,
        request: CapabilityRequest,
    ) -> Result<ResponseStream, CapabilityError> {
        let workflow_id = request.metadata.workflow_id.clone();
        if workflow_id.is_empty() {
            return Err(CapabilityError::InvalidRequest(
                "missing workflow id".to_string(),
            ));
        }

        let (events, stream) = mpsc::unbounded_channel();
        {
            let mut workflows = self.state.workflows.lock();
            if workflows.contains_key(&workflow_id) {
                return Err(CapabilityError::InvalidRequest(format!(
                    "workflow {workflow_id} already registered"
                )));
            }
            workflows.insert(
                workflow_id.clone(),
                Subscription::new(request.clone(), events),
            );
        }

        let delivered = match self
            .state
            .broadcast(MessageMethod::RegisterTrigger, &request)
            .await
        {
            Ok(delivered) => delivered,
            Err(e) => {
                self.state.workflows.lock().remove(&workflow_id);
                return Err(e);
            }
        };
        if delivered == 0 {
            self.state.workflows.lock().remove(&workflow_id);
            return Err(CapabilityError::Transport(format!(
                "no member of DON {} reachable",
                self.state.binding.don.id
            )));
        }

        info!(
            capability_id = %self.state.binding.capability_id,
            workflow_id = %workflow_id,
            reached = delivered,
            "[TriggerSubscriber] Registered with remote trigger"
        );
        Ok(Box::pin(UnboundedReceiverStream::new(stream)))
    }

    async fn unregister_trigger(&self, request: CapabilityRequest) -> Result<(), CapabilityError> {
        let removed = self
            .state
            .workflows
            .lock()
            .remove(&request.metadata.workflow_id);
        if removed.is_none() {
            debug!(
                workflow_id = %request.metadata.workflow_id,
                "[TriggerSubscriber] Unregister for unknown workflow"
            );
        }
        self.state
            .broadcast(MessageMethod::UnregisterTrigger, &request)
            .await
            .map(|_| ())
    }
}

impl MessageReceiver for TriggerSubscriber {
    fn receive(&self, message: RemoteMessage) {
        self.pump.push(message);
    }

    fn kind(&self) -> &'static str {
        WiringKind::TriggerSubscriber.as_str()
    }
}

#[async_trait]
impl SubService for TriggerSubscriber {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> WiringKind {
        WiringKind::TriggerSubscriber
    }

    async fn start(&self) -> Result<(), SubServiceError> {
        self.pump.start(Arc::clone(&self.state) as Arc<dyn InboundHandler>)
    }

    async fn stop(&self) -> Result<(), SubServiceError> {
        self.pump.stop().await;
        let subscriptions: Vec<Subscription> =
            self.state.workflows.lock().drain().map(|(_, s)| s).collect();
        for subscription in subscriptions {
            self.state.cancel(&subscription.request).await;
        }
        Ok(())
    }
}
