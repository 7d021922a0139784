//! Registry error types.

use shared_types::CapabilityShape;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Nothing is bound to the ID.
    #[error("capability not found: {0}")]
    NotFound(String),

    /// A different implementation is already bound to the ID.
    #[error("capability already registered with a different implementation: {0}")]
    DuplicateCapability(String),

    /// Bound implementation has the other shape.
    #[error("capability {id} is {actual}-shaped, expected {expected}")]
    ShapeMismatch {
        id: String,
        expected: CapabilityShape,
        actual: CapabilityShape,
    },
}
