//! # Target Server
//!
//! Provider side of an executable capability. Runs the local implementation
//! for `Execute` requests from workflow DON members and answers with the
//! first response as `ExecuteResponse`.

use super::pump::{InboundHandler, MessagePump};
use super::{is_authorized_caller, Binding, SubService};
use crate::config::LauncherConfig;
use crate::domain::{SubServiceError, WiringKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_bus::{Dispatcher, MessageReceiver};
use shared_types::{
    CapabilityRequest, Don, ExecutableCapability, MessageMethod, PeerId, RemoteMessage,
};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Requests remembered for duplicate suppression.
const SEEN_CAPACITY: usize = 4096;

/// Bounded memory of (caller, message ID) pairs already executed.
#[derive(Default)]
struct SeenRequests {
    order: VecDeque<(PeerId, Uuid)>,
    set: HashSet<(PeerId, Uuid)>,
}

impl SeenRequests {
    /// Returns false if the pair was already recorded.
    fn record(&mut self, key: (PeerId, Uuid)) -> bool {
        if !self.set.insert(key) {
            return false;
        }
        self.order.push_back(key);
        if self.order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        true
    }
}

struct ServerState {
    binding: Binding,
    callers: Vec<Don>,
    executable: Arc<dyn ExecutableCapability>,
    dispatcher: Arc<dyn Dispatcher>,
    seen: Mutex<SeenRequests>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

/// Serves a local executable capability to remote workflow DONs.
pub struct TargetServer {
    name: String,
    state: Arc<ServerState>,
    pump: MessagePump,
}

impl TargetServer {
    /// `callers` are the DONs whose members may execute.
    #[must_use]
    pub fn new(
        binding: Binding,
        executable: Arc<dyn ExecutableCapability>,
        callers: Vec<Don>,
        dispatcher: Arc<dyn Dispatcher>,
        config: &LauncherConfig,
    ) -> Self {
        let name = binding.name(WiringKind::TargetServer);
        Self {
            pump: MessagePump::new(name.clone(), config.inbound_buffer, config.stop_timeout()),
            name,
            state: Arc::new(ServerState {
                binding,
                callers,
                executable,
                dispatcher,
                seen: Mutex::new(SeenRequests::default()),
                in_flight: Mutex::new(Vec::new()),
            }),
        }
    }
}

/// Run `request` and build the reply to `message`.
async fn execute(
    executable: &dyn ExecutableCapability,
    message: &RemoteMessage,
    local_peer: PeerId,
) -> RemoteMessage {
    let reply = || message.reply(MessageMethod::ExecuteResponse, local_peer);

    let request: CapabilityRequest = match message.decode() {
        Ok(request) => request,
        Err(e) => return reply().with_error(format!("invalid request: {e}")),
    };

    let mut stream = match executable.execute(request).await {
        Ok(stream) => stream,
        Err(e) => return reply().with_error(e.to_string()),
    };

    let Some(response) = stream.next().await else {
        return reply().with_error("capability produced no response");
    };

    let error = response.error.clone();
    match reply().with_payload(&response) {
        Ok(reply) => match error {
            Some(error) => reply.with_error(error),
            None => reply,
        },
        Err(e) => reply().with_error(format!("failed to encode response: {e}")),
    }
}

#[async_trait]
impl InboundHandler for ServerState {
    async fn handle(&self, message: RemoteMessage) {
        if message.method != MessageMethod::Execute {
            warn!(method = %message.method, "[TargetServer] Unexpected method");
            return;
        }
        if !is_authorized_caller(&self.callers, &message) {
            warn!(
                capability_id = %self.binding.capability_id,
                sender = %message.sender,
                caller_don_id = message.caller_don_id,
                "[TargetServer] Dropping request from non-member"
            );
            return;
        }
        if !self.seen.lock().record((message.sender, message.message_id)) {
            debug!(
                message_id = %message.message_id,
                sender = %message.sender,
                "[TargetServer] Duplicate request ignored"
            );
            return;
        }

        debug!(
            capability_id = %self.binding.capability_id,
            message_id = %message.message_id,
            sender = %message.sender,
            "[TargetServer] Executing request"
        );

        let executable = Arc::clone(&self.executable);
        let dispatcher = Arc::clone(&self.dispatcher);
        let local_peer = self.binding.local_peer;
        let task = tokio::spawn(async move {
            let reply = execute(executable.as_ref(), &message, local_peer).await;
            let peer = reply.receiver;
            if let Err(e) = dispatcher.send(peer, reply).await {
                warn!(peer = %peer, error = %e, "[TargetServer] Failed to send response");
            }
        });

        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|t| !t.is_finished());
        in_flight.push(task);
    }
}

impl MessageReceiver for TargetServer {
    fn receive(&self, message: RemoteMessage) {
        self.pump.push(message);
    }

    fn kind(&self) -> &'static str {
        WiringKind::TargetServer.as_str()
    }
}

#[async_trait]
impl SubService for TargetServer {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> WiringKind {
        WiringKind::TargetServer
    }

    async fn start(&self) -> Result<(), SubServiceError> {
        self.pump.start(Arc::clone(&self.state) as Arc<dyn InboundHandler>)
    }

    async fn stop(&self) -> Result<(), SubServiceError> {
        self.pump.stop().await;
        for task in self.state.in_flight.lock().drain(..) {
            task.abort();
        }
        Ok(())
    }
}
