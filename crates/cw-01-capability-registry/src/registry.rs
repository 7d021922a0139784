//! # Capability Registry
//!
//! Read-mostly map: every workflow step resolves its capability here, while
//! writes only happen on host registration and launcher reconciliation.

use crate::errors::RegistryError;
use parking_lot::RwLock;
use shared_types::{
    Capability, CapabilityInfo, CapabilityShape, ExecutableCapability, TriggerCapability,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Concurrency-safe map from full capability ID to implementation.
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: RwLock<HashMap<String, Capability>>,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `capability` under the ID it declares for itself.
    ///
    /// # Errors
    ///
    /// `DuplicateCapability` if a different implementation holds the ID.
    /// Re-adding the same implementation succeeds without change.
    pub fn add(&self, capability: Capability) -> Result<(), RegistryError> {
        let id = capability.id().to_string();
        let mut capabilities = self.capabilities.write();

        if let Some(existing) = capabilities.get(&id) {
            if existing.same_implementation(&capability) {
                debug!(capability_id = %id, "[Registry] Capability already registered");
                return Ok(());
            }
            return Err(RegistryError::DuplicateCapability(id));
        }

        info!(
            capability_id = %id,
            capability_type = %capability.info().capability_type(),
            shape = %capability.shape(),
            "[Registry] Capability added"
        );
        capabilities.insert(id, capability);
        Ok(())
    }

    /// Look up the implementation bound to `id`.
    pub fn get(&self, id: &str) -> Result<Capability, RegistryError> {
        self.capabilities
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Look up a trigger-shaped capability.
    pub fn get_trigger(&self, id: &str) -> Result<Arc<dyn TriggerCapability>, RegistryError> {
        match self.get(id)? {
            Capability::Trigger(trigger) => Ok(trigger),
            Capability::Executable(_) => Err(RegistryError::ShapeMismatch {
                id: id.to_string(),
                expected: CapabilityShape::Trigger,
                actual: CapabilityShape::Executable,
            }),
        }
    }

    /// Look up an executable-shaped capability.
    pub fn get_executable(
        &self,
        id: &str,
    ) -> Result<Arc<dyn ExecutableCapability>, RegistryError> {
        match self.get(id)? {
            Capability::Executable(executable) => Ok(executable),
            Capability::Trigger(_) => Err(RegistryError::ShapeMismatch {
                id: id.to_string(),
                expected: CapabilityShape::Executable,
                actual: CapabilityShape::Trigger,
            }),
        }
    }

    /// Unbind `id`, returning what was bound.
    pub fn remove(&self, id: &str) -> Option<Capability> {
        let removed = self.capabilities.write().remove(id);
        if removed.is_some() {
            info!(capability_id = %id, "[Registry] Capability removed");
        }
        removed
    }

    /// Unbind `capability`'s ID only if that exact implementation holds it.
    pub fn remove_matching(&self, capability: &Capability) -> bool {
        let mut capabilities = self.capabilities.write();
        let matches = capabilities
            .get(capability.id())
            .is_some_and(|existing| existing.same_implementation(capability));
        if matches {
            capabilities.remove(capability.id());
            info!(capability_id = %capability.id(), "[Registry] Capability removed");
        }
        matches
    }

    /// Metadata of every bound capability, sorted by ID.
    #[must_use]
    pub fn list(&self) -> Vec<CapabilityInfo> {
        let mut infos: Vec<CapabilityInfo> = self
            .capabilities
            .read()
            .values()
            .map(|c| c.info().clone())
            .collect();
        infos.sort_by(|a, b| a.id().cmp(b.id()));
        infos
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.capabilities.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.capabilities.read().is_empty()
    }
}
