//! Physical column allocation and table packing.

use tracing::debug;
use uuid::Uuid;

use crate::model::{ColumnBinding, ColumnSlot, ModelGraph, TableLayout};

/// Default cap on mapped property columns per data table.
pub const DEFAULT_MAX_COLUMNS_PER_TABLE: usize = 100;

/// Layout configuration for the allocator.
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    /// Maximum number of mapped property columns per table. The implicit
    /// id/type/discriminator columns do not count.
    pub max_columns_per_table: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            max_columns_per_table: DEFAULT_MAX_COLUMNS_PER_TABLE,
        }
    }
}

/// Result of a column allocation.
#[derive(Debug, Clone)]
pub struct Allocation {
    /// Where the property landed.
    pub binding: ColumnBinding,
    /// Set when the allocation provisioned a new table; carries the new
    /// table's name so DDL can create it before adding the column.
    pub provisioned: Option<String>,
}

/// Allocates and releases property columns on a graph's table layout.
///
/// Tables are scanned in creation order and the first with spare capacity
/// wins; when every table is full a new one is provisioned. Creation
/// order makes the produced DDL deterministic.
pub struct StorageAllocator<'a> {
    config: &'a LayoutConfig,
}

impl<'a> StorageAllocator<'a> {
    /// Create an allocator with the given layout configuration.
    pub fn new(config: &'a LayoutConfig) -> Self {
        Self { config }
    }

    /// Allocate a column for a property, provisioning a table if needed.
    pub fn allocate(&self, graph: &mut ModelGraph, property: Uuid, name: &str) -> Allocation {
        let index = graph
            .tables
            .iter()
            .position(|t| t.mapped_columns() < self.config.max_columns_per_table);

        let (index, provisioned) = match index {
            Some(index) => (index, None),
            None => {
                let table = TableLayout::new(graph.tables.len() as u32);
                let table_name = table.name.clone();
                debug!(table = %table_name, "provisioning data table");
                graph.tables.push(table);
                (graph.tables.len() - 1, Some(table_name))
            }
        };

        let table = &mut graph.tables[index];
        let column = Self::column_name(table, name);
        table.slots.push(ColumnSlot {
            column: column.clone(),
            property,
        });

        Allocation {
            binding: ColumnBinding::new(table.name.clone(), column),
            provisioned,
        }
    }

    /// Release the column mapped to a property, returning its binding.
    pub fn deallocate(&self, graph: &mut ModelGraph, property: Uuid) -> Option<ColumnBinding> {
        for table in &mut graph.tables {
            if let Some(index) = table.slots.iter().position(|s| s.property == property) {
                let slot = table.slots.remove(index);
                return Some(ColumnBinding::new(table.name.clone(), slot.column));
            }
        }
        None
    }

    /// Derive a unique column name within a table from a property name.
    fn column_name(table: &TableLayout, name: &str) -> String {
        let base = Self::sanitize(name);
        if !table.has_column(&base) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !table.has_column(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn sanitize(name: &str) -> String {
        let mut out: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();
        if out.is_empty() || out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            out.insert(0, 'p');
        }
        out
    }
}
