//! Schema synchronization engine.
//!
//! One run flows validate → snapshot → diff → adjust → allocate/generate
//! → persist metadata → commit. Every statement of a run executes inside
//! a single backend transaction; a failure anywhere rolls the whole run
//! back, so no partial schema evolution is ever observable.

pub mod adjust;
pub mod allocate;
pub mod ddl;
pub mod diff;
pub mod error;
pub mod executor;
pub mod metadata;
pub mod sql;

// Diff types
pub use diff::{ChangeSet, Diffable, EntityDelta};

// Adjustment
pub use adjust::ChangeAdjuster;

// Allocation types
pub use allocate::{Allocation, LayoutConfig, StorageAllocator, DEFAULT_MAX_COLUMNS_PER_TABLE};

// DDL types
pub use ddl::{strategy, widens, AssocStrategy, DdlGenerator, ProcKind, ProcParam, SchemaOp};

// Metadata persistence
pub use metadata::MetadataSynchronizer;

// SQL types
pub use sql::{sql_type, SqlStatement, SqlValue, StatementKind, FACT_TABLE};

// Error types
pub use error::SyncError;

// Orchestrator types
pub use executor::{IsolationLevel, SyncConfig, SyncConnection, SyncReport, Synchronizer};
