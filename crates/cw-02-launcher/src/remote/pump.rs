//! Bounded inbound queue drained by a background task.

use crate::domain::SubServiceError;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::RemoteMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Per-message logic of a wiring object. Called sequentially.
#[async_trait]
pub(crate) trait InboundHandler: Send + Sync + 'static {
    async fn handle(&self, message: RemoteMessage);
}

pub(crate) struct MessagePump {
    name: String,
    sender: mpsc::Sender<RemoteMessage>,
    receiver: Mutex<Option<mpsc::Receiver<RemoteMessage>>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    stop_timeout: Duration,
}

impl MessagePump {
    pub(crate) fn new(name: String, capacity: usize, stop_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            name,
            sender,
            receiver: Mutex::new(Some(receiver)),
            shutdown,
            task: Mutex::new(None),
            stop_timeout,
        }
    }

    /// Queue a message without blocking. Drops it if the queue is full or
    /// the pump has stopped.
    pub(crate) fn push(&self, message: RemoteMessage) {
        match self.sender.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(
                    service = %self.name,
                    method = %message.method,
                    sender = %message.sender,
                    "[MessagePump] Inbound queue full, dropping message"
                );
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                debug!(
                    service = %self.name,
                    method = %message.method,
                    "[MessagePump] Pump stopped, dropping message"
                );
            }
        }
    }

    pub(crate) fn start(&self, handler: Arc<dyn InboundHandler>) -> Result<(), SubServiceError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| SubServiceError::StartFailed {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;

        let mut receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| SubServiceError::AlreadyStarted(self.name.clone()))?;
        let mut shutdown = self.shutdown.subscribe();
        let name = self.name.clone();

        let task = runtime.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    message = receiver.recv() => match message {
                        Some(message) => handler.handle(message).await,
                        None => break,
                    },
                }
            }
            debug!(service = %name, "[MessagePump] Receive loop exited");
        });

        *self.task.lock() = Some(task);
        debug!(service = %self.name, "[MessagePump] Receive loop started");
        Ok(())
    }

    /// Signal shutdown and wait up to `stop_timeout`, then abort.
    pub(crate) async fn stop(&self) {
        let _ = self.shutdown.send(true);
        // Never started: drop the queue so later pushes are refused.
        self.receiver.lock().take();

        let task = self.task.lock().take();
        let Some(mut task) = task else {
            return;
        };

        if tokio::time::timeout(self.stop_timeout, &mut task)
            .await
            .is_err()
        {
            warn!(
                service = %self.name,
                timeout_ms = self.stop_timeout.as_millis() as u64,
                "[MessagePump] Receive loop did not exit in time, aborting"
            );
            task.abort();
        }
    }
}
