//! Resource type definitions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A typed entity definition, optionally inheriting from one base type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTypeDef {
    /// Stable identity, assigned once at creation.
    pub id: Uuid,
    /// Owning module.
    pub module: Uuid,
    /// Type name, unique within the module (case-insensitive).
    pub name: String,
    /// Base type, forming an inheritance tree with a single root.
    pub base_type: Option<Uuid>,
    /// Discriminator tag, assigned at synchronization time.
    ///
    /// Monotonically increasing across the model's lifetime and never
    /// reused. `None` until the type has been synchronized.
    pub discriminator: Option<i32>,
}

impl ResourceTypeDef {
    /// Create a new resource type with a fresh identity.
    pub fn new(module: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            module,
            name: name.into(),
            base_type: None,
            discriminator: None,
        }
    }

    /// Set the base type.
    pub fn with_base(mut self, base_type: Uuid) -> Self {
        self.base_type = Some(base_type);
        self
    }

    /// Check if this is a root type (no base).
    pub fn is_root(&self) -> bool {
        self.base_type.is_none()
    }
}
