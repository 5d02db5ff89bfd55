//! Physical table layout carried inside a graph snapshot.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Column holding the entity identity in every data table.
pub const ID_COLUMN: &str = "id";

/// Column holding the owning resource type in every data table.
pub const TYPE_COLUMN: &str = "type_id";

/// Column holding the discriminator tag in every data table.
pub const DISCRIMINATOR_COLUMN: &str = "discriminator";

/// Physical location of one mapped property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnBinding {
    /// Table name.
    pub table: String,
    /// Column name within the table.
    pub column: String,
}

impl ColumnBinding {
    /// Create a binding.
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

/// One allocated property column inside a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSlot {
    /// Column name.
    pub column: String,
    /// Property mapped to this column.
    pub property: Uuid,
}

/// A physical data table and its mapped property columns.
///
/// The implicit id/type/discriminator columns do not count toward the
/// packing limit; `slots` holds property columns only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableLayout {
    /// Table name.
    pub name: String,
    /// Creation ordinal; table 0 is the root entity table.
    pub ordinal: u32,
    /// Mapped property columns in allocation order.
    pub slots: Vec<ColumnSlot>,
}

impl TableLayout {
    /// Create an empty table layout with the conventional name for its ordinal.
    pub fn new(ordinal: u32) -> Self {
        Self {
            name: format!("res_data_{:04}", ordinal + 1),
            ordinal,
            slots: Vec::new(),
        }
    }

    /// Number of mapped property columns.
    pub fn mapped_columns(&self) -> usize {
        self.slots.len()
    }

    /// Check whether this is the root entity table.
    pub fn is_root(&self) -> bool {
        self.ordinal == 0
    }

    /// Find the column mapped to a property.
    pub fn column_of(&self, property: Uuid) -> Option<&str> {
        self.slots
            .iter()
            .find(|s| s.property == property)
            .map(|s| s.column.as_str())
    }

    /// Check whether a column name is taken in this table.
    pub fn has_column(&self, column: &str) -> bool {
        column == ID_COLUMN
            || column == TYPE_COLUMN
            || column == DISCRIMINATOR_COLUMN
            || self.slots.iter().any(|s| s.column == column)
    }
}
