//! Testing Utilities
//!
//! Mocks and fixtures for exercising the launcher without a real network.
//! Available with the `test-utils` feature flag.

use crate::ports::outbound::{ConnectivityError, PeerConnectivity};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_bus::{DispatchError, Dispatcher, MessageReceiver};
use shared_types::{
    CapabilityConfiguration, CapabilityDescriptor, CapabilityError, CapabilityInfo,
    CapabilityRequest, CapabilityResponse, CapabilityType, DonId, DonInfo, ExecutableCapability,
    HashedCapabilityId, PeerId, RemoteMessage, RequestMetadata, ResponseStream,
    TopologySnapshot, TriggerCapability, WorkflowRegistrationRequest,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// One `set_receiver` call seen by [`RecordingDispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverRecord {
    pub capability_id: String,
    pub don_id: String,
    /// `MessageReceiver::kind` of the bound receiver.
    pub kind: &'static str,
}

/// Dispatcher that records registrations and sent messages instead of
/// routing them.
#[derive(Default)]
pub struct RecordingDispatcher {
    registered: Mutex<Vec<ReceiverRecord>>,
    removed: Mutex<Vec<(String, String)>>,
    receivers: Mutex<HashMap<(String, String), Arc<dyn MessageReceiver>>>,
    sent: Mutex<Vec<(PeerId, RemoteMessage)>>,
    reject: Mutex<BTreeSet<String>>,
}

impl RecordingDispatcher {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuse every future `set_receiver` for `capability_id`.
    pub fn reject_capability(&self, capability_id: impl Into<String>) {
        self.reject.lock().insert(capability_id.into());
    }

    /// Every successful `set_receiver` call, in order.
    #[must_use]
    pub fn registered(&self) -> Vec<ReceiverRecord> {
        self.registered.lock().clone()
    }

    /// Every `remove_receiver` call, in order.
    #[must_use]
    pub fn removed(&self) -> Vec<(String, String)> {
        self.removed.lock().clone()
    }

    /// Receivers currently bound.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.receivers.lock().len()
    }

    #[must_use]
    pub fn is_bound(&self, capability_id: &str, don_id: &str) -> bool {
        self.receivers
            .lock()
            .contains_key(&(capability_id.to_string(), don_id.to_string()))
    }

    /// Messages passed to `send`, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<(PeerId, RemoteMessage)> {
        self.sent.lock().clone()
    }

    /// Hand `message` to the receiver bound for its route. Returns false if
    /// none is bound.
    pub fn deliver(&self, message: RemoteMessage) -> bool {
        let receiver = self.receivers.lock().get(&message.route_key()).cloned();
        match receiver {
            Some(receiver) => {
                receiver.receive(message);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    fn set_receiver(
        &self,
        capability_id: &str,
        don_id: &str,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Result<(), DispatchError> {
        if self.reject.lock().contains(capability_id) {
            return Err(DispatchError::Rejected {
                capability_id: capability_id.to_string(),
                don_id: don_id.to_string(),
                reason: "rejected by test".to_string(),
            });
        }

        let key = (capability_id.to_string(), don_id.to_string());
        let mut receivers = self.receivers.lock();
        if receivers.contains_key(&key) {
            return Err(DispatchError::ReceiverExists {
                capability_id: key.0,
                don_id: key.1,
            });
        }

        self.registered.lock().push(ReceiverRecord {
            capability_id: key.0.clone(),
            don_id: key.1.clone(),
            kind: receiver.kind(),
        });
        receivers.insert(key, receiver);
        Ok(())
    }

    fn remove_receiver(&self, capability_id: &str, don_id: &str) {
        let key = (capability_id.to_string(), don_id.to_string());
        self.receivers.lock().remove(&key);
        self.removed.lock().push(key);
    }

    async fn send(&self, peer: PeerId, message: RemoteMessage) -> Result<(), DispatchError> {
        self.sent.lock().push((peer, message));
        Ok(())
    }
}

/// Receiver that keeps every message it is handed.
#[derive(Default)]
pub struct CollectingReceiver {
    messages: Mutex<Vec<RemoteMessage>>,
}

impl CollectingReceiver {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn messages(&self) -> Vec<RemoteMessage> {
        self.messages.lock().clone()
    }
}

impl MessageReceiver for CollectingReceiver {
    fn receive(&self, message: RemoteMessage) {
        self.messages.lock().push(message);
    }

    fn kind(&self) -> &'static str {
        "collector"
    }
}

/// Peer layer with a fixed identity that records connection updates.
pub struct StaticPeer {
    id: PeerId,
    updates: Mutex<Vec<BTreeSet<PeerId>>>,
    fail: AtomicBool,
}

impl StaticPeer {
    #[must_use]
    pub fn new(id: PeerId) -> Arc<Self> {
        Arc::new(Self {
            id,
            updates: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    /// Make every future `update_connections` fail.
    pub fn fail_updates(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every connection set handed to the peer layer, in order.
    #[must_use]
    pub fn updates(&self) -> Vec<BTreeSet<PeerId>> {
        self.updates.lock().clone()
    }

    #[must_use]
    pub fn last_update(&self) -> Option<BTreeSet<PeerId>> {
        self.updates.lock().last().cloned()
    }
}

#[async_trait]
impl PeerConnectivity for StaticPeer {
    fn id(&self) -> PeerId {
        self.id
    }

    async fn update_connections(&self, peers: BTreeSet<PeerId>) -> Result<(), ConnectivityError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConnectivityError::UpdateFailed("peer layer down".to_string()));
        }
        self.updates.lock().push(peers);
        Ok(())
    }
}

/// Trigger whose events are pushed by the test through [`MockTrigger::emit`].
pub struct MockTrigger {
    info: CapabilityInfo,
    streams: Mutex<Vec<mpsc::UnboundedSender<CapabilityResponse>>>,
    registrations: AtomicUsize,
    unregistrations: AtomicUsize,
}

impl MockTrigger {
    /// # Panics
    ///
    /// If `id` is not a valid full capability ID.
    #[must_use]
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            info: CapabilityInfo::new(id, CapabilityType::Trigger, "mock trigger")
                .expect("valid capability id"),
            streams: Mutex::new(Vec::new()),
            registrations: AtomicUsize::new(0),
            unregistrations: AtomicUsize::new(0),
        })
    }

    /// Push `response` into every open registration stream.
    pub fn emit(&self, response: CapabilityResponse) {
        self.streams
            .lock()
            .retain(|stream| stream.send(response.clone()).is_ok());
    }

    #[must_use]
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn unregistrations(&self) -> usize {
        self.unregistrations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TriggerCapability for MockTrigger {
    fn info(&self) -> &CapabilityInfo {
        &self.info
    }

    async fn register_trigger(
        &self,
        _request: CapabilityRequest,
    ) -> Result<ResponseStream, CapabilityError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.streams.lock().push(sender);
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn unregister_trigger(&self, _request: CapabilityRequest) -> Result<(), CapabilityError> {
        self.unregistrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Executable that echoes the request inputs back.
pub struct MockTarget {
    info: CapabilityInfo,
    executions: AtomicUsize,
    failure: Mutex<Option<CapabilityError>>,
}

impl MockTarget {
    /// # Panics
    ///
    /// If `id` is not a valid full capability ID.
    #[must_use]
    pub fn new(id: &str) -> Arc<Self> {
        Self::with_type(id, CapabilityType::Target)
    }

    /// # Panics
    ///
    /// If `id` is not a valid full capability ID.
    #[must_use]
    pub fn with_type(id: &str, capability_type: CapabilityType) -> Arc<Self> {
        Arc::new(Self {
            info: CapabilityInfo::new(id, capability_type, "mock target")
                .expect("valid capability id"),
            executions: AtomicUsize::new(0),
            failure: Mutex::new(None),
        })
    }

    /// Make every future `execute` fail with `error`.
    pub fn fail_with(&self, error: CapabilityError) {
        *self.failure.lock() = Some(error);
    }

    #[must_use]
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExecutableCapability for MockTarget {
    fn info(&self) -> &CapabilityInfo {
        &self.info
    }

    async fn register_to_workflow(
        &self,
        _request: WorkflowRegistrationRequest,
    ) -> Result<(), CapabilityError> {
        Ok(())
    }

    async fn unregister_from_workflow(
        &self,
        _request: WorkflowRegistrationRequest,
    ) -> Result<(), CapabilityError> {
        Ok(())
    }

    async fn execute(&self, request: CapabilityRequest) -> Result<ResponseStream, CapabilityError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().clone() {
            return Err(error);
        }
        let response = CapabilityResponse::ok(serde_json::json!({ "echo": request.inputs }));
        Ok(Box::pin(tokio_stream::once(response)))
    }
}

/// Random 32-byte peer ID.
#[must_use]
pub fn random_peer() -> PeerId {
    PeerId::new(rand::random())
}

/// `n` random peer IDs.
#[must_use]
pub fn random_peers(n: usize) -> Vec<PeerId> {
    (0..n).map(|_| random_peer()).collect()
}

/// Random hashed capability ID.
#[must_use]
pub fn random_hashed_id() -> HashedCapabilityId {
    HashedCapabilityId::new(rand::random())
}

/// Request issued by `workflow_id` with the given inputs.
#[must_use]
pub fn request(workflow_id: &str, inputs: serde_json::Value) -> CapabilityRequest {
    CapabilityRequest {
        metadata: RequestMetadata {
            workflow_id: workflow_id.to_string(),
            ..Default::default()
        },
        config: serde_json::Value::Null,
        inputs,
    }
}

/// DON record with F = 1 hosting `capabilities` with empty config.
#[must_use]
pub fn don_info(
    id: DonId,
    members: &[PeerId],
    is_public: bool,
    accepts_workflows: bool,
    capabilities: &[HashedCapabilityId],
) -> DonInfo {
    DonInfo {
        id,
        config_count: 1,
        f: 1,
        is_public,
        accepts_workflows,
        node_p2p_ids: members.to_vec(),
        capability_configurations: capabilities
            .iter()
            .map(|capability_id| CapabilityConfiguration {
                capability_id: *capability_id,
                config: Vec::new(),
            })
            .collect(),
    }
}

/// Fluent builder for topology snapshots.
#[derive(Default)]
pub struct SnapshotBuilder {
    snapshot: TopologySnapshot,
}

impl SnapshotBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a capability descriptor, `name@version`.
    #[must_use]
    pub fn capability(
        mut self,
        hashed_id: HashedCapabilityId,
        name: &str,
        version: &str,
        capability_type: CapabilityType,
    ) -> Self {
        self.snapshot.capabilities.insert(
            hashed_id,
            CapabilityDescriptor {
                labelled_name: name.to_string(),
                version: version.to_string(),
                capability_type,
            },
        );
        self
    }

    /// Add a DON.
    #[must_use]
    pub fn don(mut self, don: DonInfo) -> Self {
        self.snapshot.dons.insert(don.id, don);
        self
    }

    #[must_use]
    pub fn build(self) -> TopologySnapshot {
        self.snapshot
    }
}
