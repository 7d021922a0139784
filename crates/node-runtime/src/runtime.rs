//! # Node Runtime
//!
//! Owns the process-wide collaborators (registry, dispatcher, peer layer,
//! launcher) and keeps the launcher reconciled against the snapshot file.
//!
//! ```text
//!   interval tick ──→ read snapshot ──→ fingerprint unchanged? ──yes──→ skip
//!                                              │ no
//!                                              ▼
//!                          launcher.launch_with_cancel(snapshot, shutdown)
//!                                              │
//!                         ok: remember fingerprint / err: retry next tick
//! ```

use crate::adapters::{FileSnapshotSource, LoopbackPeer, SnapshotError};
use crate::config::NodeConfig;
use cw_01_capability_registry::CapabilityRegistry;
use cw_02_launcher::{CapabilityLauncherApi, LaunchError, Launcher};
use parking_lot::Mutex;
use shared_bus::{InMemoryDispatcher, InMemoryNetwork};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("launch failed: {0}")]
    Launch(#[from] LaunchError),
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The snapshot changed and was applied.
    Applied,
    /// The snapshot matches the last applied one.
    Unchanged,
}

/// A capability wiring node.
pub struct NodeRuntime {
    config: NodeConfig,
    dispatcher: Arc<InMemoryDispatcher>,
    peer: Arc<LoopbackPeer>,
    registry: Arc<CapabilityRegistry>,
    launcher: Arc<Launcher>,
    source: FileSnapshotSource,
    applied: Mutex<Option<String>>,
    shutdown_tx: watch::Sender<bool>,
}

impl NodeRuntime {
    /// Node on its own private network.
    #[must_use]
    pub fn new(config: NodeConfig) -> Self {
        Self::with_network(config, InMemoryNetwork::new())
    }

    /// Node attached to `network`, shared with other nodes in this process.
    #[must_use]
    pub fn with_network(config: NodeConfig, network: Arc<InMemoryNetwork>) -> Self {
        let dispatcher =
            InMemoryDispatcher::join_with_window(&network, config.peer_id, config.dedup_window());
        let peer = Arc::new(LoopbackPeer::new(config.peer_id, Arc::clone(&network)));
        let registry = Arc::new(CapabilityRegistry::new());
        let launcher = Arc::new(Launcher::new(
            config.launcher.clone(),
            peer.clone(),
            dispatcher.clone(),
            Arc::clone(&registry),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            source: FileSnapshotSource::new(config.snapshot_path.clone()),
            config,
            dispatcher,
            peer,
            registry,
            launcher,
            applied: Mutex::new(None),
            shutdown_tx,
        }
    }

    /// Registry for hosting local capabilities.
    #[must_use]
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn launcher(&self) -> &Arc<Launcher> {
        &self.launcher
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<InMemoryDispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn peer(&self) -> &Arc<LoopbackPeer> {
        &self.peer
    }

    /// Read the snapshot and launch it if it changed since the last
    /// successful launch.
    pub async fn reconcile_once(&self) -> Result<ReconcileOutcome, RuntimeError> {
        let read = self.source.read().await?;
        if self.applied.lock().as_deref() == Some(read.fingerprint.as_str()) {
            debug!(fingerprint = %read.fingerprint, "[Runtime] Snapshot unchanged");
            return Ok(ReconcileOutcome::Unchanged);
        }

        // A launch tears down the current wiring first, so a failure below
        // leaves nothing from the previous fingerprint running.
        *self.applied.lock() = None;
        let cancel = self.shutdown_tx.subscribe();
        self.launcher
            .launch_with_cancel(&read.snapshot, &cancel)
            .await?;

        info!(fingerprint = %read.fingerprint, "[Runtime] Snapshot applied");
        *self.applied.lock() = Some(read.fingerprint);
        Ok(ReconcileOutcome::Applied)
    }

    /// Reconcile every interval until shutdown is requested.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut ticker = tokio::time::interval(self.config.reconcile_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            peer = %self.config.peer_id,
            snapshot = %self.source.path().display(),
            interval_secs = self.config.reconcile_interval_secs,
            "[Runtime] Reconcile loop started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => match self.reconcile_once().await {
                    Ok(ReconcileOutcome::Applied | ReconcileOutcome::Unchanged) => {}
                    Err(e) => warn!(error = %e, "[Runtime] Reconciliation failed, retrying next interval"),
                },
            }
        }

        info!("[Runtime] Reconcile loop stopped");
    }

    /// Stop the reconcile loop; an in-flight launch gives up before commit.
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Tear down all wiring.
    pub async fn close(&self) -> Result<(), LaunchError> {
        self.launcher.close().await?;
        *self.applied.lock() = None;
        Ok(())
    }
}
