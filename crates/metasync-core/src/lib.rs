//! Metasync core - versioned resource model and schema synchronization.
//!
//! This crate maintains an extensible entity-relationship model (typed
//! resources with inheritance, scalar and relationship properties,
//! many-sided associations) and evolves a physical relational schema to
//! match it without losing existing data.

pub mod artifact;
pub mod model;
pub mod sync;

pub use model::{
    AssocEnd, AssociationDef, ColumnBinding, DataType, Direction, GraphError, GraphValidator,
    ModelGraph, ModuleDef, Multiplicity, NavigationPropertyDef, ResourceTypeDef,
    ScalarPropertyDef, TableLayout, ValidationError,
};

pub use sync::{
    ChangeAdjuster, ChangeSet, DdlGenerator, EntityDelta, IsolationLevel, LayoutConfig,
    MetadataSynchronizer, ProcKind, SchemaOp, SqlStatement, SqlValue, StorageAllocator,
    SyncConfig, SyncConnection, SyncError, SyncReport, Synchronizer,
};

pub use artifact::{AssociationMapping, MappingBuilder, MappingDocument, TypeMapping};
