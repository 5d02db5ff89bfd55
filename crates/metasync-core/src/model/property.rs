//! Scalar and navigation property definitions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::layout::ColumnBinding;
use super::types::{DataType, Direction};

/// A typed value slot on a resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarPropertyDef {
    /// Stable identity, assigned once at creation.
    pub id: Uuid,
    /// Owning resource type.
    pub resource_type: Uuid,
    /// Property name, unique within the owning type across scalar and
    /// navigation properties (case-insensitive).
    pub name: String,
    /// Data type.
    pub data_type: DataType,
    /// Whether the value may be absent.
    pub nullable: bool,
    /// Maximum length for string and binary types; `None` means unbounded.
    pub length: Option<u32>,
    /// Total digits for decimal types.
    pub precision: Option<u8>,
    /// Fractional digits for decimal types.
    pub scale: Option<u8>,
    /// Physical table and column, assigned by the storage allocator.
    pub binding: Option<ColumnBinding>,
}

impl ScalarPropertyDef {
    /// Create a new required property with a fresh identity.
    pub fn new(resource_type: Uuid, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_type,
            name: name.into(),
            data_type,
            nullable: false,
            length: None,
            precision: None,
            scale: None,
            binding: None,
        }
    }

    /// Create a nullable property.
    pub fn optional(resource_type: Uuid, name: impl Into<String>, data_type: DataType) -> Self {
        let mut def = Self::new(resource_type, name, data_type);
        def.nullable = true;
        def
    }

    /// Set the maximum length.
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Set decimal precision and scale.
    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }
}

/// A relationship endpoint on a resource type.
///
/// Physical binding is present only when this end materializes as a
/// foreign-key column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationPropertyDef {
    /// Stable identity, assigned once at creation.
    pub id: Uuid,
    /// Owning resource type.
    pub resource_type: Uuid,
    /// Property name, unique within the owning type across scalar and
    /// navigation properties (case-insensitive).
    pub name: String,
    /// Role within the bound association. Maintained exclusively by the
    /// graph's bind/unbind operations.
    pub direction: Direction,
    /// Association this end is bound to. Maintained exclusively by the
    /// graph's bind/unbind operations.
    pub association: Option<Uuid>,
    /// Foreign-key column, assigned by the storage allocator.
    pub binding: Option<ColumnBinding>,
}

impl NavigationPropertyDef {
    /// Create a new unbound navigation property with a fresh identity.
    pub fn new(resource_type: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_type,
            name: name.into(),
            direction: Direction::Undefined,
            association: None,
            binding: None,
        }
    }

    /// Check if this property is bound to an association.
    pub fn is_bound(&self) -> bool {
        self.association.is_some()
    }
}
