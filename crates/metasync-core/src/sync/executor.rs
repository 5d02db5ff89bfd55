//! Synchronization orchestrator.
//!
//! Coordinates validate, snapshot, diff, adjust, generate, and execute
//! inside a single backend transaction. A run either commits completely
//! or leaves no observable trace: the caller's graph is only touched
//! after the commit succeeds, and only its derived physical state is
//! refreshed, never the definition objects themselves.

use std::collections::HashSet;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::model::{GraphValidator, ModelGraph};

use super::adjust::ChangeAdjuster;
use super::allocate::LayoutConfig;
use super::ddl::{DdlGenerator, SchemaOp};
use super::diff::ChangeSet;
use super::error::SyncError;
use super::metadata::MetadataSynchronizer;
use super::sql::SqlStatement;

/// Transaction isolation requested from the backend.
///
/// The snapshot read runs under repeatable read so the reflected graph
/// and its physical bindings cannot diverge under a concurrent writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Read committed.
    ReadCommitted,
    /// Repeatable read.
    RepeatableRead,
    /// Serializable.
    Serializable,
}

/// The connection seam to the backing store.
///
/// Implementations own connection and transaction plumbing; the engine
/// only demands that every statement of a run executes inside the one
/// transaction opened by `begin`.
pub trait SyncConnection {
    /// Open a transaction at the given isolation level.
    fn begin(&mut self, isolation: IsolationLevel) -> Result<(), SyncError>;

    /// Load the backend-reflected graph, including physical bindings,
    /// inside the current transaction.
    fn load_graph(&mut self) -> Result<ModelGraph, SyncError>;

    /// Execute one statement inside the current transaction.
    fn execute(&mut self, statement: &SqlStatement) -> Result<u64, SyncError>;

    /// Commit the current transaction.
    fn commit(&mut self) -> Result<(), SyncError>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> Result<(), SyncError>;
}

/// Synchronizer configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Table packing configuration.
    pub layout: LayoutConfig,
    /// Isolation level for the run.
    pub isolation: IsolationLevel,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            layout: LayoutConfig::default(),
            isolation: IsolationLevel::RepeatableRead,
        }
    }
}

/// Outcome of a synchronization run.
#[derive(Debug)]
pub struct SyncReport {
    /// Total changes across all five entity kinds, after adjustment.
    pub change_count: usize,
    /// Every statement executed, in order.
    pub statements: Vec<SqlStatement>,
    /// Data tables provisioned by this run.
    pub tables_provisioned: usize,
    /// Whether a transaction was committed. `false` means the target
    /// already matched the backend and nothing was done.
    pub committed: bool,
}

/// Drives synchronization runs against a backing store.
pub struct Synchronizer {
    config: SyncConfig,
    artifact_consumers: HashSet<Uuid>,
}

impl Synchronizer {
    /// Create a synchronizer.
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            artifact_consumers: HashSet::new(),
        }
    }

    /// Record that a caller consumes generated artifacts for a module.
    ///
    /// Synchronizing changes that touch a registered module is refused
    /// until the registration is released, so consumers never hold
    /// artifacts describing a schema that shifted underneath them.
    pub fn register_artifact_consumer(&mut self, module: Uuid) {
        self.artifact_consumers.insert(module);
    }

    /// Release an artifact registration.
    pub fn release_artifact_consumer(&mut self, module: Uuid) {
        self.artifact_consumers.remove(&module);
    }

    /// Synchronize the backing store to match `target`.
    ///
    /// On success the target graph's table, column, and discriminator
    /// state is refreshed in place. On failure the transaction is rolled
    /// back and the target graph is untouched.
    #[instrument(skip_all)]
    pub fn synchronize(
        &self,
        conn: &mut dyn SyncConnection,
        target: &mut ModelGraph,
    ) -> Result<SyncReport, SyncError> {
        GraphValidator::validate(target)?;

        conn.begin(self.config.isolation)?;
        match self.run(conn, target) {
            Ok(report) => Ok(report),
            Err(e) => {
                let _ = conn.rollback();
                Err(e)
            }
        }
    }

    fn run(
        &self,
        conn: &mut dyn SyncConnection,
        target: &mut ModelGraph,
    ) -> Result<SyncReport, SyncError> {
        let snapshot = conn.load_graph()?;

        let mut changes = ChangeSet::compute(&snapshot, target);
        if changes.is_empty() {
            debug!("target matches the backend; nothing to synchronize");
            conn.rollback()?;
            return Ok(SyncReport {
                change_count: 0,
                statements: Vec::new(),
                tables_provisioned: 0,
                committed: false,
            });
        }

        if !self.artifact_consumers.is_empty() {
            let touched = changes.touched_modules(&snapshot, target);
            if let Some(module) = touched
                .iter()
                .find(|m| self.artifact_consumers.contains(m))
            {
                let namespace = target
                    .modules
                    .get(module)
                    .or_else(|| snapshot.modules.get(module))
                    .map(|m| m.namespace.clone())
                    .unwrap_or_else(|| module.to_string());
                return Err(SyncError::UnsynchronizedModule { namespace });
            }
        }

        ChangeAdjuster::adjust(&mut changes, &snapshot, target);

        // All generation happens on a working copy seeded with the
        // backend's physical state; the caller's graph stays pristine
        // until the transaction commits.
        let mut working = target.clone();
        working.adopt_physical(&snapshot);

        let ops = DdlGenerator::new(&snapshot, &self.config.layout)
            .generate(&mut working, &changes)?;
        let tables_provisioned = ops
            .iter()
            .filter(|op| matches!(op, SchemaOp::CreateTable { .. }))
            .count();

        let mut statements: Vec<SqlStatement> = ops.iter().map(SchemaOp::render).collect();
        statements.extend(MetadataSynchronizer::new(&snapshot).statements(&working, &changes)?);

        for statement in &statements {
            conn.execute(statement)?;
        }
        conn.commit()?;

        target.adopt_physical(&working);

        info!(
            changes = changes.change_count(),
            statements = statements.len(),
            tables_provisioned,
            "schema synchronized"
        );

        Ok(SyncReport {
            change_count: changes.change_count(),
            statements,
            tables_provisioned,
            committed: true,
        })
    }
}

impl Default for Synchronizer {
    fn default() -> Self {
        Self::new(SyncConfig::default())
    }
}
