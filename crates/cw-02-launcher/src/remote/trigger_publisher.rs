//! # Trigger Publisher
//!
//! Provider side of a trigger. Workflow DON members register through
//! `RegisterTrigger`; the first registration for a workflow subscribes to the
//! local trigger and every event is then forwarded as `TriggerEvent` to each
//! registered member. When the last member unregisters, the local
//! registration is released.

use super::payloads::TriggerEventPayload;
use super::pump::{InboundHandler, MessagePump};
use super::{is_authorized_caller, Binding, SubService};
use crate::config::LauncherConfig;
use crate::domain::{SubServiceError, WiringKind};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_bus::{Dispatcher, MessageReceiver};
use shared_types::{
    CapabilityRequest, Don, DonId, MessageMethod, PeerId, RemoteMessage, ResponseStream,
    TriggerCapability,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Registered members of one workflow, with the DON each called from.
type Subscribers = Arc<RwLock<BTreeMap<PeerId, DonId>>>;

struct Registration {
    request: CapabilityRequest,
    subscribers: Subscribers,
    forwarder: JoinHandle<()>,
}

struct PublisherState {
    binding: Binding,
    callers: Vec<Don>,
    trigger: Arc<dyn TriggerCapability>,
    dispatcher: Arc<dyn Dispatcher>,
    workflows: Mutex<HashMap<String, Registration>>,
}

/// Serves a local trigger to remote workflow DONs.
pub struct TriggerPublisher {
    name: String,
    state: Arc<PublisherState>,
    pump: MessagePump,
}

impl TriggerPublisher {
    /// `callers` are the DONs whose members may register.
    #[must_use]
    pub fn new(
        binding: Binding,
        trigger: Arc<dyn TriggerCapability>,
        callers: Vec<Don>,
        dispatcher: Arc<dyn Dispatcher>,
        config: &LauncherConfig,
    ) -> Self {
        let name = binding.name(WiringKind::TriggerPublisher);
        Self {
            pump: MessagePump::new(name.clone(), config.inbound_buffer, config.stop_timeout()),
            name,
            state: Arc::new(PublisherState {
                binding,
                callers,
                trigger,
                dispatcher,
                workflows: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Workflows with at least one registered member.
    #[must_use]
    pub fn workflow_count(&self) -> usize {
        self.state.workflows.lock().len()
    }

    /// Members registered for `workflow_id`.
    #[must_use]
    pub fn subscriber_count(&self, workflow_id: &str) -> usize {
        self.state
            .workflows
            .lock()
            .get(workflow_id)
            .map_or(0, |r| r.subscribers.read().len())
    }
}

impl PublisherState {
    async fn register(&self, message: &RemoteMessage) {
        let request: CapabilityRequest = match message.decode() {
            Ok(request) => request,
            Err(e) => {
                warn!(sender = %message.sender, error = %e, "[TriggerPublisher] Undecodable registration");
                return;
            }
        };
        let workflow_id = request.metadata.workflow_id.clone();

        if let Some(registration) = self.workflows.lock().get(&workflow_id) {
            registration
                .subscribers
                .write()
                .insert(message.sender, message.caller_don_id);
            debug!(
                capability_id = %self.binding.capability_id,
                workflow_id = %workflow_id,
                sender = %message.sender,
                "[TriggerPublisher] Member joined existing registration"
            );
            return;
        }

        let stream = match self.trigger.register_trigger(request.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    capability_id = %self.binding.capability_id,
                    workflow_id = %workflow_id,
                    error = %e,
                    "[TriggerPublisher] Local trigger refused registration"
                );
                return;
            }
        };

        let subscribers: Subscribers = Arc::new(RwLock::new(BTreeMap::from([(
            message.sender,
            message.caller_don_id,
        )])));
        let forwarder = tokio::spawn(forward_events(
            stream,
            workflow_id.clone(),
            Arc::clone(&subscribers),
            self.binding.clone(),
            Arc::clone(&self.dispatcher),
        ));

        info!(
            capability_id = %self.binding.capability_id,
            don_id = self.binding.don.id,
            workflow_id = %workflow_id,
            "[TriggerPublisher] Workflow registered"
        );
        self.workflows.lock().insert(
            workflow_id,
            Registration {
                request,
                subscribers,
                forwarder,
            },
        );
    }

    async fn unregister(&self, message: &RemoteMessage) {
        let request: CapabilityRequest = match message.decode() {
            Ok(request) => request,
            Err(e) => {
                warn!(sender = %message.sender, error = %e, "[TriggerPublisher] Undecodable unregistration");
                return;
            }
        };
        let workflow_id = request.metadata.workflow_id;

        let released = {
            let mut workflows = self.workflows.lock();
            let emptied = match workflows.get(&workflow_id) {
                Some(registration) => {
                    let mut subscribers = registration.subscribers.write();
                    subscribers.remove(&message.sender);
                    subscribers.is_empty()
                }
                None => false,
            };
            if emptied {
                workflows.remove(&workflow_id)
            } else {
                None
            }
        };

        if let Some(registration) = released {
            info!(
                capability_id = %self.binding.capability_id,
                workflow_id = %workflow_id,
                "[TriggerPublisher] Last member left, releasing local registration"
            );
            if let Err(e) = self.release(registration).await {
                warn!(workflow_id = %workflow_id, error = %e, "[TriggerPublisher] Upstream unregister failed");
            }
        }
    }

    async fn release(&self, registration: Registration) -> Result<(), String> {
        registration.forwarder.abort();
        self.trigger
            .unregister_trigger(registration.request)
            .await
            .map_err(|e| e.to_string())
    }

    /// Release every registration; reports the first upstream failure.
    async fn release_all(&self) -> Result<(), String> {
        let registrations: Vec<Registration> =
            self.workflows.lock().drain().map(|(_, r)| r).collect();

        let mut first_error = None;
        for registration in registrations {
            if let Err(e) = self.release(registration).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

async fn forward_events(
    mut stream: ResponseStream,
    workflow_id: String,
    subscribers: Subscribers,
    binding: Binding,
    dispatcher: Arc<dyn Dispatcher>,
) {
    while let Some(response) = stream.next().await {
        let payload = match TriggerEventPayload::new(workflow_id.clone(), response) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "[TriggerPublisher] Failed to encode trigger event");
                continue;
            }
        };

        let targets: Vec<(PeerId, DonId)> = subscribers
            .read()
            .iter()
            .map(|(peer, don)| (*peer, *don))
            .collect();

        for (peer, caller_don_id) in targets {
            let message = match binding
                .message(MessageMethod::TriggerEvent, caller_don_id, peer)
                .with_payload(&payload)
            {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, "[TriggerPublisher] Failed to encode trigger event");
                    continue;
                }
            };
            if let Err(e) = dispatcher.send(peer, message).await {
                warn!(
                    capability_id = %binding.capability_id,
                    peer = %peer,
                    error = %e,
                    "[TriggerPublisher] Failed to forward trigger event"
                );
            }
        }
    }
    debug!(workflow_id = %workflow_id, "[TriggerPublisher] Local trigger stream ended");
}

#[async_trait]
impl InboundHandler for PublisherState {
    async fn handle(&self, message: RemoteMessage) {
        if !is_authorized_caller(&self.callers, &message) {
            warn!(
                capability_id = %self.binding.capability_id,
                sender = %message.sender,
                caller_don_id = message.caller_don_id,
                "[TriggerPublisher] Dropping message from non-member"
            );
            return;
        }

        match message.method {
            MessageMethod::RegisterTrigger => self.register(&message).await,
            MessageMethod::UnregisterTrigger => self.unregister(&message).await,
            other => warn!(method = %other, "[TriggerPublisher] Unexpected method"),
        }
    }
}

impl MessageReceiver for TriggerPublisher {
    fn receive(&self, message: RemoteMessage) {
        self.pump.push(message);
    }

    fn kind(&self) -> &'static str {
        WiringKind::TriggerPublisher.as_str()
    }
}

#[async_trait]
impl SubService for TriggerPublisher {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> WiringKind {
        WiringKind::TriggerPublisher
    }

    async fn start(&self) -> Result<(), SubServiceError> {
        self.pump.start(Arc::clone(&self.state) as Arc<dyn InboundHandler>)
    }

    async fn stop(&self) -> Result<(), SubServiceError> {
        self.pump.stop().await;
        self.state
            .release_all()
            .await
            .map_err(|reason| SubServiceError::StopFailed {
                name: self.name.clone(),
                reason,
            })
    }
}
