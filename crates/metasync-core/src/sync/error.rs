//! Synchronization-specific error types.

use thiserror::Error;
use uuid::Uuid;

use crate::model::ValidationError;

/// Errors raised by the synchronization pipeline.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Structural validation failed before any statement was generated.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Artifact generation was requested for a module that has pending,
    /// uncommitted graph changes. Retryable after the module is
    /// synchronized (or the artifact request is released).
    #[error("module '{namespace}' has unsynchronized changes")]
    UnsynchronizedModule {
        /// Namespace of the pending module.
        namespace: String,
    },

    /// The pipeline encountered a reference to a missing entity.
    #[error("unknown {kind}: {id}")]
    UnknownEntity {
        /// Entity kind.
        kind: &'static str,
        /// The missing identity.
        id: Uuid,
    },

    /// A property that should carry a physical binding does not.
    #[error("property {property} has no physical binding")]
    MissingBinding {
        /// The unbound property.
        property: Uuid,
    },

    /// A resource type has no discriminator where one is required.
    #[error("resource type {resource_type} has no discriminator")]
    MissingDiscriminator {
        /// The type without a discriminator.
        resource_type: Uuid,
    },

    /// Backend execution or transaction failure; the transaction has
    /// been rolled back and nothing was applied.
    #[error("backend error: {0}")]
    Backend(String),
}
