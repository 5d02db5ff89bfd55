//! The in-memory entity-relationship model.
//!
//! Definitions for modules, resource types, properties, and associations,
//! the arena-style graph holding them, and the structural validator.

mod association;
mod graph;
mod layout;
mod module;
mod property;
mod resource;
mod types;
mod validate;

pub use association::{AssocEnd, AssociationDef};
pub use graph::{GraphError, ModelGraph};
pub use layout::{
    ColumnBinding, ColumnSlot, TableLayout, DISCRIMINATOR_COLUMN, ID_COLUMN, TYPE_COLUMN,
};
pub use module::ModuleDef;
pub use property::{NavigationPropertyDef, ScalarPropertyDef};
pub use resource::ResourceTypeDef;
pub use types::{DataType, Direction, Multiplicity};
pub use validate::{
    GraphValidator, ValidationError, MAX_DESCRIPTION_LEN, MAX_NAME_LEN, MAX_NAMESPACE_LEN,
    MAX_URI_LEN,
};
