//! # Capability Launcher Service
//!
//! Reconciles the node's capability wiring against each topology snapshot.
//! Every launch is a full rebuild: the previous wiring set is torn down, a
//! new plan is computed, and the plan is committed in order.

use crate::config::LauncherConfig;
use crate::domain::{
    connection_set, plan_consumers, plan_providers, DonRoles, LaunchError, PlannedWiring,
    Wiring, WiringKind,
};
use crate::ports::inbound::CapabilityLauncherApi;
use crate::ports::outbound::{Dispatcher, MessageReceiver, PeerConnectivity};
use crate::remote::{
    Binding, SubService, TargetClient, TargetServer, TriggerPublisher, TriggerSubscriber,
};
use async_trait::async_trait;
use cw_01_capability_registry::CapabilityRegistry;
use parking_lot::RwLock;
use shared_types::{Capability, CapabilityInfo, Node, TopologySnapshot};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// A committed wiring object and everything registered on its behalf.
struct ActiveWiring {
    capability_id: String,
    dispatch_id: String,
    service: Arc<dyn SubService>,
    /// Proxy inserted into the Registry, for consumer shapes.
    proxy: Option<Capability>,
}

/// A wiring object built but not yet committed.
struct BuiltWiring {
    service: Arc<dyn SubService>,
    receiver: Arc<dyn MessageReceiver>,
    proxy: Option<Capability>,
}

#[derive(Default)]
struct LauncherState {
    /// In start order.
    active: Vec<ActiveWiring>,
}

/// Capability launcher.
pub struct Launcher {
    config: LauncherConfig,
    peer: Arc<dyn PeerConnectivity>,
    dispatcher: Arc<dyn Dispatcher>,
    registry: Arc<CapabilityRegistry>,
    state: Mutex<LauncherState>,
    local_node: RwLock<Option<Node>>,
}

impl Launcher {
    #[must_use]
    pub fn new(
        config: LauncherConfig,
        peer: Arc<dyn PeerConnectivity>,
        dispatcher: Arc<dyn Dispatcher>,
        registry: Arc<CapabilityRegistry>,
    ) -> Self {
        Self {
            config,
            peer,
            dispatcher,
            registry,
            state: Mutex::new(LauncherState::default()),
            local_node: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Number of active wiring objects.
    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active.len()
    }

    /// Kinds of the active wiring objects, in start order.
    pub async fn active_kinds(&self) -> Vec<(String, String, WiringKind)> {
        self.state
            .lock()
            .await
            .active
            .iter()
            .map(|w| (w.capability_id.clone(), w.dispatch_id.clone(), w.service.kind()))
            .collect()
    }

    /// Same as [`CapabilityLauncherApi::launch`], giving up before the commit
    /// phase once `cancel` reads `true`.
    pub async fn launch_with_cancel(
        &self,
        snapshot: &TopologySnapshot,
        cancel: &watch::Receiver<bool>,
    ) -> Result<(), LaunchError> {
        self.reconcile(snapshot, Some(cancel)).await
    }

    async fn reconcile(
        &self,
        snapshot: &TopologySnapshot,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<(), LaunchError> {
        let check = || match cancel {
            Some(cancel) if *cancel.borrow() => Err(LaunchError::Cancelled),
            _ => Ok(()),
        };

        let mut state = self.state.lock().await;
        let local_peer = self.peer.id();
        info!(
            peer = %local_peer,
            dons = snapshot.dons.len(),
            capabilities = snapshot.capabilities.len(),
            "[Launcher] Reconciling topology snapshot"
        );

        if let Err(e) = self.teardown(&mut state.active).await {
            warn!(error = %e, "[Launcher] Previous wiring did not stop cleanly");
        }

        check()?;
        let roles = DonRoles::classify(snapshot, local_peer);

        check()?;
        let mut planned = plan_providers(snapshot, &roles, &self.registry)?;

        check()?;
        planned.extend(plan_consumers(snapshot, &roles)?);

        check()?;
        let peers = connection_set(&roles, &planned);
        debug!(peers = peers.len(), "[Launcher] Updating peer connections");
        self.peer.update_connections(peers).await?;

        check()?;
        state.active = self.commit(planned).await?;

        let node = roles.to_node();
        info!(
            wiring = state.active.len(),
            workflow_don = ?node.workflow_don.as_ref().map(|d| d.id),
            capability_dons = node.capability_dons.len(),
            "[Launcher] Reconciliation complete"
        );
        *self.local_node.write() = Some(node);
        Ok(())
    }

    /// Build and activate each planned wiring in order; on failure unwind
    /// what was activated.
    async fn commit(&self, planned: Vec<PlannedWiring>) -> Result<Vec<ActiveWiring>, LaunchError> {
        let mut active = Vec::with_capacity(planned.len());
        for plan in planned {
            match self.activate(plan).await {
                Ok(wiring) => active.push(wiring),
                Err(e) => {
                    error!(error = %e, "[Launcher] Commit failed, unwinding");
                    if let Err(stop_err) = self.teardown(&mut active).await {
                        warn!(error = %stop_err, "[Launcher] Unwind did not stop cleanly");
                    }
                    return Err(e);
                }
            }
        }
        Ok(active)
    }

    async fn activate(&self, plan: PlannedWiring) -> Result<ActiveWiring, LaunchError> {
        let built = self.build(&plan)?;
        let dispatch_id = plan.don.dispatch_id();

        built.service.start().await?;

        if let Err(e) =
            self.dispatcher
                .set_receiver(&plan.capability_id, &dispatch_id, built.receiver)
        {
            let _ = built.service.stop().await;
            return Err(e.into());
        }

        if let Some(proxy) = &built.proxy {
            if let Err(e) = self.registry.add(proxy.clone()) {
                self.dispatcher
                    .remove_receiver(&plan.capability_id, &dispatch_id);
                let _ = built.service.stop().await;
                return Err(e.into());
            }
        }

        info!(
            capability_id = %plan.capability_id,
            don_id = %dispatch_id,
            kind = %plan.kind(),
            "[Launcher] Wiring active"
        );
        Ok(ActiveWiring {
            capability_id: plan.capability_id,
            dispatch_id,
            service: built.service,
            proxy: built.proxy,
        })
    }

    fn build(&self, plan: &PlannedWiring) -> Result<BuiltWiring, LaunchError> {
        let binding = Binding::new(plan.capability_id.clone(), plan.don.clone(), self.peer.id());
        let dispatcher = Arc::clone(&self.dispatcher);

        let proxy_info = |capability_type| {
            CapabilityInfo::new(
                plan.capability_id.clone(),
                capability_type,
                format!("remote capability hosted by DON {}", plan.don.id),
            )
            .map_err(|e| LaunchError::InvalidCapability {
                capability_id: plan.capability_id.clone(),
                don_id: plan.don.id,
                reason: e.to_string(),
            })
        };

        Ok(match &plan.wiring {
            Wiring::Publish { trigger, callers } => {
                let publisher = Arc::new(TriggerPublisher::new(
                    binding,
                    Arc::clone(trigger),
                    callers.clone(),
                    dispatcher,
                    &self.config,
                ));
                BuiltWiring {
                    service: publisher.clone(),
                    receiver: publisher,
                    proxy: None,
                }
            }
            Wiring::Serve {
                executable,
                callers,
            } => {
                let server = Arc::new(TargetServer::new(
                    binding,
                    Arc::clone(executable),
                    callers.clone(),
                    dispatcher,
                    &self.config,
                ));
                BuiltWiring {
                    service: server.clone(),
                    receiver: server,
                    proxy: None,
                }
            }
            Wiring::Subscribe { capability_type } => {
                let subscriber = Arc::new(TriggerSubscriber::new(
                    proxy_info(*capability_type)?,
                    binding,
                    plan.caller_don_id,
                    dispatcher,
                    &self.config,
                ));
                BuiltWiring {
                    service: subscriber.clone(),
                    receiver: subscriber.clone(),
                    proxy: Some(Capability::Trigger(subscriber)),
                }
            }
            Wiring::Call { capability_type } => {
                let client = Arc::new(TargetClient::new(
                    proxy_info(*capability_type)?,
                    binding,
                    plan.caller_don_id,
                    dispatcher,
                    plan.overrides.execute_timeout(&self.config),
                    &self.config,
                ));
                BuiltWiring {
                    service: client.clone(),
                    receiver: client.clone(),
                    proxy: Some(Capability::Executable(client)),
                }
            }
        })
    }

    /// Deregister, withdraw and stop `active` in reverse start order.
    /// Continues past failures and reports the first.
    async fn teardown(&self, active: &mut Vec<ActiveWiring>) -> Result<(), LaunchError> {
        if active.is_empty() {
            return Ok(());
        }
        debug!(count = active.len(), "[Launcher] Stopping wiring");

        let mut first_error = None;
        while let Some(wiring) = active.pop() {
            self.dispatcher
                .remove_receiver(&wiring.capability_id, &wiring.dispatch_id);
            if let Some(proxy) = &wiring.proxy {
                self.registry.remove_matching(proxy);
            }
            if let Err(e) = wiring.service.stop().await {
                warn!(service = %wiring.service.name(), error = %e, "[Launcher] Stop failed");
                first_error.get_or_insert(LaunchError::SubService(e));
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl CapabilityLauncherApi for Launcher {
    async fn launch(&self, snapshot: &TopologySnapshot) -> Result<(), LaunchError> {
        self.reconcile(snapshot, None).await
    }

    async fn close(&self) -> Result<(), LaunchError> {
        let mut state = self.state.lock().await;
        info!(count = state.active.len(), "[Launcher] Closing");
        self.teardown(&mut state.active).await
    }

    fn local_node(&self) -> Result<Node, LaunchError> {
        self.local_node.read().clone().ok_or(LaunchError::NotLaunched)
    }
}
