//! End-to-end synchronization tests over an in-memory backing store.

use metasync_core::model::{
    AssociationDef, DataType, ModelGraph, ModuleDef, Multiplicity, NavigationPropertyDef,
    ResourceTypeDef, ScalarPropertyDef,
};
use metasync_core::sync::{
    IsolationLevel, SqlStatement, SyncConfig, SyncConnection, SyncError, Synchronizer,
};
use metasync_core::MappingBuilder;
use pretty_assertions::assert_eq;
use uuid::Uuid;

/// In-memory store: records every executed statement and mirrors the
/// synchronized graph so consecutive runs see their own history.
#[derive(Default)]
struct MemoryStore {
    graph: ModelGraph,
    executed: Vec<SqlStatement>,
    staged: Vec<SqlStatement>,
    in_transaction: bool,
    isolation: Option<IsolationLevel>,
    fail_on: Option<&'static str>,
}

impl MemoryStore {
    fn statements_matching(&self, needle: &str) -> Vec<&SqlStatement> {
        self.executed
            .iter()
            .filter(|s| s.sql.contains(needle))
            .collect()
    }

    /// Reflect a committed target back into the store, as a real backend
    /// would on its next snapshot read.
    fn reflect(&mut self, synchronized: &ModelGraph) {
        self.graph = synchronized.clone();
    }
}

impl SyncConnection for MemoryStore {
    fn begin(&mut self, isolation: IsolationLevel) -> Result<(), SyncError> {
        self.in_transaction = true;
        self.isolation = Some(isolation);
        self.staged.clear();
        Ok(())
    }

    fn load_graph(&mut self) -> Result<ModelGraph, SyncError> {
        Ok(self.graph.clone())
    }

    fn execute(&mut self, statement: &SqlStatement) -> Result<u64, SyncError> {
        if !self.in_transaction {
            return Err(SyncError::Backend("no open transaction".into()));
        }
        if let Some(needle) = self.fail_on {
            if statement.sql.contains(needle) {
                return Err(SyncError::Backend(format!(
                    "injected failure on '{}'",
                    needle
                )));
            }
        }
        self.staged.push(statement.clone());
        Ok(1)
    }

    fn commit(&mut self) -> Result<(), SyncError> {
        self.executed.append(&mut self.staged);
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SyncError> {
        self.staged.clear();
        self.in_transaction = false;
        Ok(())
    }
}

struct Model {
    graph: ModelGraph,
    module: Uuid,
    base: Uuid,
    derived: Uuid,
}

/// Module "M" with "Base" (no properties) and "Derived" (one string).
fn base_derived_model() -> Model {
    let mut graph = ModelGraph::new();
    let module = graph.add_module(ModuleDef::new("M"));
    let base = graph.add_resource_type(ResourceTypeDef::new(module, "Base"));
    let derived = graph.add_resource_type(ResourceTypeDef::new(module, "Derived").with_base(base));
    graph.add_scalar_property(
        ScalarPropertyDef::new(derived, "Name", DataType::String).with_length(256),
    );
    Model {
        graph,
        module,
        base,
        derived,
    }
}

#[test]
fn empty_backend_to_base_and_derived() {
    let mut store = MemoryStore::default();
    let synchronizer = Synchronizer::default();
    let mut model = base_derived_model();

    let report = synchronizer
        .synchronize(&mut store, &mut model.graph)
        .unwrap();
    assert!(report.committed);
    assert_eq!(store.isolation, Some(IsolationLevel::RepeatableRead));

    // Exactly one table provisioned.
    assert_eq!(report.tables_provisioned, 1);
    assert_eq!(store.statements_matching("CREATE TABLE").len(), 1);

    // Derived's discriminator directly follows Base's.
    let base_disc = model.graph.resource_types[&model.base]
        .discriminator
        .unwrap();
    let derived_disc = model.graph.resource_types[&model.derived]
        .discriminator
        .unwrap();
    assert_eq!(derived_disc, base_disc + 1);

    // A CUD triple exists for Derived, with a two-parameter insert:
    // @id and @name are declared once each in the header.
    let create = store.statements_matching("CREATE PROCEDURE m_derived_create");
    assert_eq!(create.len(), 1);
    let header = create[0].sql.split("AS").next().unwrap();
    assert_eq!(header.matches('@').count(), 2);
    assert!(header.contains("@id"));
    assert!(header.contains("@name"));
    assert_eq!(
        store
            .statements_matching("CREATE PROCEDURE m_derived_update")
            .len(),
        1
    );
    assert_eq!(
        store
            .statements_matching("CREATE PROCEDURE m_derived_delete")
            .len(),
        1
    );

    // No association of any kind was declared.
    assert!(store.statements_matching("CREATE VIEW").is_empty());
    assert!(store.statements_matching("CREATE UNIQUE INDEX").is_empty());
    assert!(store
        .statements_matching("DELETE FROM relationship_fact WHERE predicate")
        .is_empty());
    assert!(store.statements_matching("ADD CONSTRAINT fk_").is_empty());

    // The caller's property object now carries its binding.
    let prop = model.graph.scalar_properties.values().next().unwrap();
    assert_eq!(prop.binding.as_ref().unwrap().table, "res_data_0001");
}

#[test]
fn one_anchored_association_yields_fk_without_helpers() {
    let mut store = MemoryStore::default();
    let synchronizer = Synchronizer::default();
    let mut model = base_derived_model();

    // Subject=Many, Object=One: the subject end hosts the nullable
    // foreign key on its declaring type's table.
    let subject = model
        .graph
        .add_navigation_property(NavigationPropertyDef::new(model.derived, "owner"));
    let object = model
        .graph
        .add_navigation_property(NavigationPropertyDef::new(model.base, "items"));
    model
        .graph
        .add_association(AssociationDef::new(
            "owned_by",
            subject,
            object,
            Multiplicity::Many,
            Multiplicity::One,
        ))
        .unwrap();

    synchronizer
        .synchronize(&mut store, &mut model.graph)
        .unwrap();

    // One nullable FK column, zero helper procedures, zero views.
    let fk_adds = store.statements_matching("ADD owner UNIQUEIDENTIFIER NULL");
    assert_eq!(fk_adds.len(), 1);
    assert_eq!(store.statements_matching("ADD CONSTRAINT fk_").len(), 1);
    assert!(store.statements_matching("CREATE VIEW").is_empty());
    assert!(store.statements_matching("owned_by_insert").is_empty());
    assert!(store.statements_matching("owned_by_delete").is_empty());

    let binding = model.graph.navigation_properties[&subject]
        .binding
        .clone()
        .unwrap();
    assert_eq!(binding.column, "owner");
    assert!(model.graph.navigation_properties[&object].binding.is_none());
}

#[test]
fn many_to_many_association_yields_view_and_helpers() {
    let mut store = MemoryStore::default();
    let synchronizer = Synchronizer::default();
    let mut model = base_derived_model();

    let subject = model
        .graph
        .add_navigation_property(NavigationPropertyDef::new(model.base, "tagged"));
    let object = model
        .graph
        .add_navigation_property(NavigationPropertyDef::new(model.derived, "tags"));
    model
        .graph
        .add_association(AssociationDef::new(
            "tagged_with",
            subject,
            object,
            Multiplicity::Many,
            Multiplicity::Many,
        ))
        .unwrap();

    synchronizer
        .synchronize(&mut store, &mut model.graph)
        .unwrap();

    assert_eq!(store.statements_matching("CREATE VIEW tagged_with_view").len(), 1);
    assert_eq!(
        store
            .statements_matching("CREATE PROCEDURE tagged_with_insert")
            .len(),
        1
    );
    assert_eq!(
        store
            .statements_matching("CREATE PROCEDURE tagged_with_delete")
            .len(),
        1
    );
    // No uniqueness on either side of a many-to-many.
    assert!(store.statements_matching("CREATE UNIQUE INDEX").is_empty());
}

#[test]
fn discriminators_survive_deletion_and_are_never_recycled() {
    let mut store = MemoryStore::default();
    let synchronizer = Synchronizer::default();
    let mut model = base_derived_model();

    synchronizer
        .synchronize(&mut store, &mut model.graph)
        .unwrap();
    store.reflect(&model.graph);

    // Pretend a long history: the highest discriminator ever handed out
    // was 5, on a type that has since been deleted.
    store.graph.discriminator_floor = 5;
    model.graph.discriminator_floor = 5;

    let mut target = model.graph.clone();
    let first = target.add_resource_type(
        ResourceTypeDef::new(model.module, "Alpha").with_base(model.base),
    );
    let second = target.add_resource_type(
        ResourceTypeDef::new(model.module, "Beta").with_base(model.base),
    );

    synchronizer.synchronize(&mut store, &mut target).unwrap();

    assert_eq!(target.resource_types[&first].discriminator, Some(6));
    assert_eq!(target.resource_types[&second].discriminator, Some(7));
    assert_eq!(target.discriminator_floor, 7);
}

#[test]
fn noop_synchronization_commits_nothing() {
    let mut store = MemoryStore::default();
    let synchronizer = Synchronizer::default();
    let mut model = base_derived_model();

    synchronizer
        .synchronize(&mut store, &mut model.graph)
        .unwrap();
    store.reflect(&model.graph);
    let executed_before = store.executed.len();

    let report = synchronizer
        .synchronize(&mut store, &mut model.graph)
        .unwrap();
    assert!(!report.committed);
    assert_eq!(report.change_count, 0);
    assert_eq!(store.executed.len(), executed_before);
}

#[test]
fn execution_failure_rolls_back_everything() {
    let mut store = MemoryStore::default();
    let synchronizer = Synchronizer::default();
    let mut model = base_derived_model();

    store.fail_on = Some("meta_scalar_property");
    let before = model.graph.clone();

    let result = synchronizer.synchronize(&mut store, &mut model.graph);
    assert!(matches!(result, Err(SyncError::Backend(_))));

    // Nothing was applied and the caller's graph is untouched.
    assert!(store.executed.is_empty());
    assert!(store.staged.is_empty());
    assert!(!store.in_transaction);
    assert_eq!(before, model.graph);
    assert!(model.graph.tables.is_empty());
}

#[test]
fn validation_failure_aborts_before_any_backend_work() {
    let mut store = MemoryStore::default();
    let synchronizer = Synchronizer::default();

    let mut graph = ModelGraph::new();
    let module = graph.add_module(ModuleDef::new("M"));
    // Two roots: structurally invalid.
    graph.add_resource_type(ResourceTypeDef::new(module, "A"));
    graph.add_resource_type(ResourceTypeDef::new(module, "B"));

    let result = synchronizer.synchronize(&mut store, &mut graph);
    assert!(matches!(result, Err(SyncError::Validation(_))));
    assert!(store.isolation.is_none(), "no transaction was opened");
}

#[test]
fn unsynchronized_module_guard_refuses_and_is_retryable() {
    let mut store = MemoryStore::default();
    let mut synchronizer = Synchronizer::new(SyncConfig::default());
    let mut model = base_derived_model();

    synchronizer.register_artifact_consumer(model.module);
    let result = synchronizer.synchronize(&mut store, &mut model.graph);
    assert!(matches!(
        result,
        Err(SyncError::UnsynchronizedModule { ref namespace }) if namespace == "M"
    ));

    // Releasing the consumer makes the same run succeed.
    synchronizer.release_artifact_consumer(model.module);
    let report = synchronizer
        .synchronize(&mut store, &mut model.graph)
        .unwrap();
    assert!(report.committed);
}

#[test]
fn mapping_documents_follow_synchronization() {
    let mut store = MemoryStore::default();
    let synchronizer = Synchronizer::default();
    let mut model = base_derived_model();

    // Before synchronization the module is unsynchronized.
    assert!(matches!(
        MappingBuilder::build(&model.graph, model.module),
        Err(SyncError::UnsynchronizedModule { .. })
    ));

    synchronizer
        .synchronize(&mut store, &mut model.graph)
        .unwrap();

    let document = MappingBuilder::build(&model.graph, model.module).unwrap();
    assert_eq!(document.namespace, "M");
    assert_eq!(document.types.len(), 2);
    let derived = document
        .types
        .iter()
        .find(|t| t.qualified_name == "M.Derived")
        .unwrap();
    assert_eq!(derived.base_type.as_deref(), Some("M.Base"));
    assert_eq!(derived.properties.len(), 1);
    assert_eq!(derived.properties[0].column, "name");
}

#[test]
fn incompatible_multiplicity_change_recreates_association() {
    let mut store = MemoryStore::default();
    let synchronizer = Synchronizer::default();
    let mut model = base_derived_model();

    let subject = model
        .graph
        .add_navigation_property(NavigationPropertyDef::new(model.base, "left"));
    let object = model
        .graph
        .add_navigation_property(NavigationPropertyDef::new(model.derived, "right"));
    let assoc = model
        .graph
        .add_association(AssociationDef::new(
            "linked",
            subject,
            object,
            Multiplicity::Many,
            Multiplicity::ZeroOrOne,
        ))
        .unwrap();

    synchronizer
        .synchronize(&mut store, &mut model.graph)
        .unwrap();
    store.reflect(&model.graph);
    store.executed.clear();

    // ZeroOrOne -> One is not expressible in place.
    let mut target = model.graph.clone();
    target
        .associations
        .get_mut(&assoc)
        .unwrap()
        .object_multiplicity = Multiplicity::One;

    synchronizer.synchronize(&mut store, &mut target).unwrap();

    // The old view world is torn down and a foreign key appears.
    assert_eq!(store.statements_matching("DELETE FROM relationship_fact WHERE predicate").len(), 1);
    assert_eq!(store.statements_matching("DROP VIEW IF EXISTS linked_view").len(), 1);
    assert_eq!(store.statements_matching("ADD CONSTRAINT fk_").len(), 1);
    // The subject end now hosts the FK column.
    assert!(target.navigation_properties[&subject].binding.is_some());
}

#[test]
fn compatible_multiplicity_change_stays_in_place() {
    let mut store = MemoryStore::default();
    let synchronizer = Synchronizer::default();
    let mut model = base_derived_model();

    let subject = model
        .graph
        .add_navigation_property(NavigationPropertyDef::new(model.base, "left"));
    let object = model
        .graph
        .add_navigation_property(NavigationPropertyDef::new(model.derived, "right"));
    let assoc = model
        .graph
        .add_association(AssociationDef::new(
            "linked",
            subject,
            object,
            Multiplicity::ZeroOrOne,
            Multiplicity::Many,
        ))
        .unwrap();

    synchronizer
        .synchronize(&mut store, &mut model.graph)
        .unwrap();
    store.reflect(&model.graph);
    store.executed.clear();

    // ZeroOrOne -> Many relaxes in place; only the unique index moves.
    let mut target = model.graph.clone();
    target
        .associations
        .get_mut(&assoc)
        .unwrap()
        .subject_multiplicity = Multiplicity::Many;

    synchronizer.synchronize(&mut store, &mut target).unwrap();

    assert_eq!(
        store
            .statements_matching("DROP INDEX IF EXISTS ux_linked_subject")
            .len(),
        1
    );
    assert!(store.statements_matching("DROP VIEW").is_empty());
    assert!(store
        .statements_matching("DELETE FROM relationship_fact WHERE predicate")
        .is_empty());
    // Metadata reflects the new multiplicity.
    let updates = store.statements_matching("UPDATE meta_association");
    assert_eq!(updates.len(), 1);
}

#[test]
fn deleting_a_property_drops_its_column_and_frees_the_slot() {
    let mut store = MemoryStore::default();
    let synchronizer = Synchronizer::default();
    let mut model = base_derived_model();

    synchronizer
        .synchronize(&mut store, &mut model.graph)
        .unwrap();
    store.reflect(&model.graph);
    store.executed.clear();

    let mut target = model.graph.clone();
    let prop = *target.scalar_properties.keys().next().unwrap();
    target.remove_scalar_property(prop);

    synchronizer.synchronize(&mut store, &mut target).unwrap();

    assert_eq!(
        store.statements_matching("DROP COLUMN name").len(),
        1
    );
    assert_eq!(
        store
            .statements_matching("DELETE FROM meta_scalar_property")
            .len(),
        1
    );
    assert!(target.tables[0].slots.is_empty());
}
