//! Metadata persistence.
//!
//! Emits parameterized DML against the model's own metadata store, which
//! mirrors the in-memory graph 1:1 by identity and is the reload-time
//! source of truth. Additions and updates run module-first in referential
//! order; deletions run in exact reverse, with derived types removed
//! before their base.

use std::collections::BTreeSet;

use uuid::Uuid;

use crate::model::{
    AssociationDef, ColumnBinding, ModelGraph, ModuleDef, NavigationPropertyDef,
    ResourceTypeDef, ScalarPropertyDef,
};

use super::diff::{ChangeSet, Diffable};
use super::error::SyncError;
use super::sql::{
    SqlStatement, SqlValue, META_ASSOCIATION, META_MODULE, META_NAVIGATION_PROPERTY,
    META_RESOURCE_TYPE, META_SCALAR_PROPERTY,
};

/// Generates the metadata DML for one synchronization run.
pub struct MetadataSynchronizer<'a> {
    original: &'a ModelGraph,
}

impl<'a> MetadataSynchronizer<'a> {
    /// Create a synchronizer over the backend-reflected graph.
    pub fn new(original: &'a ModelGraph) -> Self {
        Self { original }
    }

    /// Produce the ordered metadata statements. `working` carries the
    /// freshly assigned discriminators and bindings.
    pub fn statements(
        &self,
        working: &ModelGraph,
        changes: &ChangeSet,
    ) -> Result<Vec<SqlStatement>, SyncError> {
        let mut statements = Vec::new();

        // The adjuster schedules promoted entities into both Deleted and
        // Added under one identity. Their metadata row persists across
        // the physical rebuild, so they are re-persisted as updates and
        // skipped by the delete pass.
        let recreated_navs: BTreeSet<Uuid> = changes
            .navigations
            .added
            .iter()
            .map(|p| p.id)
            .filter(|id| changes.navigations.contains_deleted(*id))
            .collect();
        let recreated_assocs: BTreeSet<Uuid> = changes
            .associations
            .added
            .iter()
            .map(|a| a.id)
            .filter(|id| changes.associations.contains_deleted(*id))
            .collect();

        for module in &changes.modules.added {
            statements.push(Self::insert_module(module));
        }
        for (_, module) in &changes.modules.updated {
            statements.push(Self::update_module(module));
        }

        for ty in Self::types_base_first(working, &changes.types.added) {
            statements.push(Self::insert_type(working, &ty)?);
        }
        for (_, ty) in &changes.types.updated {
            let current = working
                .resource_types
                .get(&ty.id)
                .ok_or(SyncError::UnknownEntity {
                    kind: "resource type",
                    id: ty.id,
                })?;
            statements.push(Self::update_type(current));
        }

        for prop in &changes.scalars.added {
            statements.push(Self::insert_scalar(working, prop)?);
        }
        for (_, prop) in &changes.scalars.updated {
            let current = working
                .scalar_properties
                .get(&prop.id)
                .ok_or(SyncError::UnknownEntity {
                    kind: "scalar property",
                    id: prop.id,
                })?;
            statements.push(Self::update_scalar(current));
        }

        let mut written_navs: BTreeSet<Uuid> = BTreeSet::new();
        for prop in &changes.navigations.added {
            let current = working
                .navigation_properties
                .get(&prop.id)
                .ok_or(SyncError::UnknownEntity {
                    kind: "navigation property",
                    id: prop.id,
                })?;
            written_navs.insert(prop.id);
            if recreated_navs.contains(&prop.id) {
                statements.push(Self::update_navigation(current));
            } else {
                statements.push(Self::insert_navigation(current));
            }
        }
        for (_, prop) in &changes.navigations.updated {
            let current = working
                .navigation_properties
                .get(&prop.id)
                .ok_or(SyncError::UnknownEntity {
                    kind: "navigation property",
                    id: prop.id,
                })?;
            written_navs.insert(prop.id);
            statements.push(Self::update_navigation(current));
        }

        for assoc in &changes.associations.added {
            if recreated_assocs.contains(&assoc.id) {
                statements.push(Self::update_association(assoc));
            } else {
                statements.push(Self::insert_association(assoc));
            }
        }
        for (_, assoc) in &changes.associations.updated {
            statements.push(Self::update_association(assoc));
        }

        // Deletions in reverse referential order.
        for assoc in &changes.associations.deleted {
            if recreated_assocs.contains(&assoc.id) {
                continue;
            }
            statements.push(Self::delete_row(META_ASSOCIATION, assoc.identity()));
        }
        for prop in &changes.navigations.deleted {
            written_navs.insert(prop.id);
            if recreated_navs.contains(&prop.id) {
                continue;
            }
            statements.push(Self::delete_row(META_NAVIGATION_PROPERTY, prop.id));
        }
        for prop in &changes.scalars.deleted {
            statements.push(Self::delete_row(META_SCALAR_PROPERTY, prop.id));
        }
        for ty in Self::types_base_first(self.original, &changes.types.deleted)
            .into_iter()
            .rev()
        {
            statements.push(Self::delete_row(META_RESOURCE_TYPE, ty.id));
        }
        for module in &changes.modules.deleted {
            statements.push(Self::delete_row(META_MODULE, module.id));
        }

        // Bindings can move as a side effect of a multiplicity change
        // without the property itself being updated; re-persist those,
        // skipping anything already written above.
        for (id, prop) in &working.navigation_properties {
            if written_navs.contains(id) {
                continue;
            }
            let old_binding = self
                .original
                .navigation_properties
                .get(id)
                .and_then(|p| p.binding.as_ref());
            if old_binding != prop.binding.as_ref() {
                statements.push(Self::update_navigation_binding(*id, prop.binding.as_ref()));
            }
        }

        Ok(statements)
    }

    /// Sort types so every base precedes its derived types.
    fn types_base_first(graph: &ModelGraph, types: &[ResourceTypeDef]) -> Vec<ResourceTypeDef> {
        let mut sorted: Vec<ResourceTypeDef> = types.to_vec();
        sorted.sort_by_key(|ty| {
            (
                graph.inheritance_depth(ty.id),
                ty.name.clone(),
                ty.id,
            )
        });
        sorted
    }

    fn insert_module(module: &ModuleDef) -> SqlStatement {
        SqlStatement::dml(
            format!(
                "INSERT INTO {} (id, namespace, uri, description, builtin) VALUES (?, ?, ?, ?, ?)",
                META_MODULE
            ),
            vec![
                SqlValue::Uuid(module.id),
                SqlValue::Str(module.namespace.clone()),
                SqlValue::Str(module.uri.clone()),
                SqlValue::Str(module.description.clone()),
                SqlValue::Bool(module.builtin),
            ],
        )
    }

    fn update_module(module: &ModuleDef) -> SqlStatement {
        SqlStatement::dml(
            format!(
                "UPDATE {} SET namespace = ?, uri = ?, description = ?, builtin = ? WHERE id = ?",
                META_MODULE
            ),
            vec![
                SqlValue::Str(module.namespace.clone()),
                SqlValue::Str(module.uri.clone()),
                SqlValue::Str(module.description.clone()),
                SqlValue::Bool(module.builtin),
                SqlValue::Uuid(module.id),
            ],
        )
    }

    fn insert_type(working: &ModelGraph, ty: &ResourceTypeDef) -> Result<SqlStatement, SyncError> {
        let current = working
            .resource_types
            .get(&ty.id)
            .ok_or(SyncError::UnknownEntity {
                kind: "resource type",
                id: ty.id,
            })?;
        let discriminator = current
            .discriminator
            .ok_or(SyncError::MissingDiscriminator {
                resource_type: ty.id,
            })?;
        Ok(SqlStatement::dml(
            format!(
                "INSERT INTO {} (id, module_id, name, base_type_id, discriminator) VALUES (?, ?, ?, ?, ?)",
                META_RESOURCE_TYPE
            ),
            vec![
                SqlValue::Uuid(current.id),
                SqlValue::Uuid(current.module),
                SqlValue::Str(current.name.clone()),
                SqlValue::opt(current.base_type),
                SqlValue::I32(discriminator),
            ],
        ))
    }

    fn update_type(ty: &ResourceTypeDef) -> SqlStatement {
        // Discriminators are immutable once assigned; updates carry the
        // tracked fields only.
        SqlStatement::dml(
            format!(
                "UPDATE {} SET module_id = ?, name = ?, base_type_id = ? WHERE id = ?",
                META_RESOURCE_TYPE
            ),
            vec![
                SqlValue::Uuid(ty.module),
                SqlValue::Str(ty.name.clone()),
                SqlValue::opt(ty.base_type),
                SqlValue::Uuid(ty.id),
            ],
        )
    }

    fn binding_params(binding: Option<&ColumnBinding>) -> [SqlValue; 2] {
        match binding {
            Some(b) => [
                SqlValue::Str(b.table.clone()),
                SqlValue::Str(b.column.clone()),
            ],
            None => [SqlValue::Null, SqlValue::Null],
        }
    }

    fn insert_scalar(
        working: &ModelGraph,
        prop: &ScalarPropertyDef,
    ) -> Result<SqlStatement, SyncError> {
        let current = working
            .scalar_properties
            .get(&prop.id)
            .ok_or(SyncError::UnknownEntity {
                kind: "scalar property",
                id: prop.id,
            })?;
        let binding = current
            .binding
            .as_ref()
            .ok_or(SyncError::MissingBinding { property: prop.id })?;
        let mut params = vec![
            SqlValue::Uuid(current.id),
            SqlValue::Uuid(current.resource_type),
            SqlValue::Str(current.name.clone()),
            SqlValue::Str(current.data_type.to_string()),
            SqlValue::Bool(current.nullable),
            SqlValue::opt(current.length.map(|l| l as i64)),
            SqlValue::opt(current.precision.map(|p| p as i32)),
            SqlValue::opt(current.scale.map(|s| s as i32)),
        ];
        params.extend(Self::binding_params(Some(binding)));
        Ok(SqlStatement::dml(
            format!(
                "INSERT INTO {} (id, resource_type_id, name, data_type, nullable, length, precision, scale, table_name, column_name) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                META_SCALAR_PROPERTY
            ),
            params,
        ))
    }

    fn update_scalar(prop: &ScalarPropertyDef) -> SqlStatement {
        let mut params = vec![
            SqlValue::Str(prop.name.clone()),
            SqlValue::Str(prop.data_type.to_string()),
            SqlValue::Bool(prop.nullable),
            SqlValue::opt(prop.length.map(|l| l as i64)),
            SqlValue::opt(prop.precision.map(|p| p as i32)),
            SqlValue::opt(prop.scale.map(|s| s as i32)),
        ];
        params.extend(Self::binding_params(prop.binding.as_ref()));
        params.push(SqlValue::Uuid(prop.id));
        SqlStatement::dml(
            format!(
                "UPDATE {} SET name = ?, data_type = ?, nullable = ?, length = ?, precision = ?, scale = ?, table_name = ?, column_name = ? WHERE id = ?",
                META_SCALAR_PROPERTY
            ),
            params,
        )
    }

    fn insert_navigation(prop: &NavigationPropertyDef) -> SqlStatement {
        let mut params = vec![
            SqlValue::Uuid(prop.id),
            SqlValue::Uuid(prop.resource_type),
            SqlValue::Str(prop.name.clone()),
            SqlValue::Str(prop.direction.to_string()),
            SqlValue::opt(prop.association),
        ];
        params.extend(Self::binding_params(prop.binding.as_ref()));
        SqlStatement::dml(
            format!(
                "INSERT INTO {} (id, resource_type_id, name, direction, association_id, table_name, column_name) VALUES (?, ?, ?, ?, ?, ?, ?)",
                META_NAVIGATION_PROPERTY
            ),
            params,
        )
    }

    fn update_navigation(prop: &NavigationPropertyDef) -> SqlStatement {
        let mut params = vec![
            SqlValue::Str(prop.name.clone()),
            SqlValue::Str(prop.direction.to_string()),
            SqlValue::opt(prop.association),
        ];
        params.extend(Self::binding_params(prop.binding.as_ref()));
        params.push(SqlValue::Uuid(prop.id));
        SqlStatement::dml(
            format!(
                "UPDATE {} SET name = ?, direction = ?, association_id = ?, table_name = ?, column_name = ? WHERE id = ?",
                META_NAVIGATION_PROPERTY
            ),
            params,
        )
    }

    fn update_navigation_binding(id: Uuid, binding: Option<&ColumnBinding>) -> SqlStatement {
        let mut params: Vec<SqlValue> = Self::binding_params(binding).into();
        params.push(SqlValue::Uuid(id));
        SqlStatement::dml(
            format!(
                "UPDATE {} SET table_name = ?, column_name = ? WHERE id = ?",
                META_NAVIGATION_PROPERTY
            ),
            params,
        )
    }

    fn insert_association(assoc: &AssociationDef) -> SqlStatement {
        SqlStatement::dml(
            format!(
                "INSERT INTO {} (id, name, predicate, subject_property_id, object_property_id, subject_multiplicity, object_multiplicity) VALUES (?, ?, ?, ?, ?, ?, ?)",
                META_ASSOCIATION
            ),
            vec![
                SqlValue::Uuid(assoc.id),
                SqlValue::Str(assoc.name.clone()),
                SqlValue::Uuid(assoc.predicate),
                SqlValue::Uuid(assoc.subject),
                SqlValue::Uuid(assoc.object),
                SqlValue::Str(assoc.subject_multiplicity.to_string()),
                SqlValue::Str(assoc.object_multiplicity.to_string()),
            ],
        )
    }

    fn update_association(assoc: &AssociationDef) -> SqlStatement {
        SqlStatement::dml(
            format!(
                "UPDATE {} SET name = ?, predicate = ?, subject_property_id = ?, object_property_id = ?, subject_multiplicity = ?, object_multiplicity = ? WHERE id = ?",
                META_ASSOCIATION
            ),
            vec![
                SqlValue::Str(assoc.name.clone()),
                SqlValue::Uuid(assoc.predicate),
                SqlValue::Uuid(assoc.subject),
                SqlValue::Uuid(assoc.object),
                SqlValue::Str(assoc.subject_multiplicity.to_string()),
                SqlValue::Str(assoc.object_multiplicity.to_string()),
                SqlValue::Uuid(assoc.id),
            ],
        )
    }

    fn delete_row(table: &str, id: Uuid) -> SqlStatement {
        SqlStatement::dml(
            format!("DELETE FROM {} WHERE id = ?", table),
            vec![SqlValue::Uuid(id)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataType, ModuleDef, Multiplicity};
    use crate::sync::allocate::LayoutConfig;
    use crate::sync::ddl::DdlGenerator;

    fn synchronized_pair() -> (ModelGraph, ModelGraph) {
        let mut graph = ModelGraph::new();
        let module = graph.add_module(ModuleDef::new("Library"));
        let base = graph.add_resource_type(ResourceTypeDef::new(module, "Base"));
        let derived =
            graph.add_resource_type(ResourceTypeDef::new(module, "Derived").with_base(base));
        graph.add_scalar_property(ScalarPropertyDef::new(derived, "Name", DataType::String));

        let config = LayoutConfig::default();
        let original = ModelGraph::new();
        let changes = ChangeSet::compute(&original, &graph);
        let mut working = graph.clone();
        DdlGenerator::new(&original, &config)
            .generate(&mut working, &changes)
            .unwrap();
        (original, working)
    }

    #[test]
    fn test_additions_run_in_referential_order() {
        let (original, working) = synchronized_pair();
        let changes = ChangeSet::compute(&original, &working);
        let statements = MetadataSynchronizer::new(&original)
            .statements(&working, &changes)
            .unwrap();

        let position = |table: &str| {
            statements
                .iter()
                .position(|s| s.sql.contains(table))
                .unwrap()
        };
        assert!(position(META_MODULE) < position(META_RESOURCE_TYPE));
        assert!(position(META_RESOURCE_TYPE) < position(META_SCALAR_PROPERTY));

        // Base is inserted before Derived.
        let type_inserts: Vec<&SqlStatement> = statements
            .iter()
            .filter(|s| s.sql.starts_with("INSERT") && s.sql.contains(META_RESOURCE_TYPE))
            .collect();
        assert_eq!(type_inserts.len(), 2);
        assert_eq!(type_inserts[0].params[2], SqlValue::Str("Base".into()));
        assert_eq!(type_inserts[1].params[2], SqlValue::Str("Derived".into()));
        // Discriminators ride along and are consecutive.
        assert_eq!(type_inserts[0].params[4], SqlValue::I32(1));
        assert_eq!(type_inserts[1].params[4], SqlValue::I32(2));
    }

    #[test]
    fn test_deletions_run_in_reverse_order_derived_first() {
        let (_, synchronized) = synchronized_pair();
        let target = ModelGraph::new();
        let changes = ChangeSet::compute(&synchronized, &target);
        let statements = MetadataSynchronizer::new(&synchronized)
            .statements(&target, &changes)
            .unwrap();

        let deletes: Vec<&SqlStatement> = statements
            .iter()
            .filter(|s| s.sql.starts_with("DELETE"))
            .collect();
        let position = |table: &str| {
            deletes
                .iter()
                .position(|s| s.sql.contains(table))
                .unwrap()
        };
        assert!(position(META_SCALAR_PROPERTY) < position(META_RESOURCE_TYPE));
        assert!(position(META_RESOURCE_TYPE) < position(META_MODULE));

        // Derived is removed before its base.
        let derived_id = synchronized
            .resource_types
            .values()
            .find(|t| t.name == "Derived")
            .unwrap()
            .id;
        let base_id = synchronized
            .resource_types
            .values()
            .find(|t| t.name == "Base")
            .unwrap()
            .id;
        let row_of = |id: Uuid| {
            deletes
                .iter()
                .position(|s| {
                    s.sql.contains(META_RESOURCE_TYPE) && s.params == vec![SqlValue::Uuid(id)]
                })
                .unwrap()
        };
        assert!(row_of(derived_id) < row_of(base_id));
    }

    #[test]
    fn test_side_effect_binding_change_is_repersisted_once() {
        let (_, synchronized) = synchronized_pair();
        let mut original = synchronized.clone();

        // Give the original a navigation property with a binding, then
        // clear it in the working graph without touching the diff.
        let base = original
            .resource_types
            .values()
            .find(|t| t.name == "Base")
            .unwrap()
            .id;
        let nav = original.add_navigation_property({
            let mut p = NavigationPropertyDef::new(base, "owner");
            p.binding = Some(ColumnBinding::new("res_data_0001", "owner"));
            p
        });
        let mut working = original.clone();
        working.navigation_properties.get_mut(&nav).unwrap().binding = None;

        let changes = ChangeSet::compute(&original, &working);
        assert!(changes.is_empty());

        let statements = MetadataSynchronizer::new(&original)
            .statements(&working, &changes)
            .unwrap();
        let rebinds: Vec<&SqlStatement> = statements
            .iter()
            .filter(|s| s.sql.contains("SET table_name"))
            .collect();
        assert_eq!(rebinds.len(), 1);
        assert_eq!(
            rebinds[0].params,
            vec![SqlValue::Null, SqlValue::Null, SqlValue::Uuid(nav)]
        );
    }

    #[test]
    fn test_association_add_uses_string_multiplicities() {
        let (_, mut working) = synchronized_pair();
        let original = working.clone();
        let base = working
            .resource_types
            .values()
            .find(|t| t.name == "Base")
            .unwrap()
            .id;
        let derived = working
            .resource_types
            .values()
            .find(|t| t.name == "Derived")
            .unwrap()
            .id;
        let subject = working.add_navigation_property(NavigationPropertyDef::new(base, "items"));
        let object = working.add_navigation_property(NavigationPropertyDef::new(derived, "box"));
        working
            .add_association(AssociationDef::new(
                "boxed_in",
                subject,
                object,
                Multiplicity::Many,
                Multiplicity::ZeroOrOne,
            ))
            .unwrap();

        let changes = ChangeSet::compute(&original, &working);
        let statements = MetadataSynchronizer::new(&original)
            .statements(&working, &changes)
            .unwrap();

        let assoc_insert = statements
            .iter()
            .find(|s| s.sql.starts_with("INSERT") && s.sql.contains(META_ASSOCIATION))
            .unwrap();
        assert_eq!(assoc_insert.params[5], SqlValue::Str("many".into()));
        assert_eq!(assoc_insert.params[6], SqlValue::Str("zero_or_one".into()));
    }

    #[test]
    fn test_recreated_identity_is_updated_not_deleted() {
        use crate::sync::adjust::ChangeAdjuster;

        let (_, mut original) = synchronized_pair();
        let base = original
            .resource_types
            .values()
            .find(|t| t.name == "Base")
            .unwrap()
            .id;
        let derived = original
            .resource_types
            .values()
            .find(|t| t.name == "Derived")
            .unwrap()
            .id;
        let subject =
            original.add_navigation_property(NavigationPropertyDef::new(base, "left"));
        let object =
            original.add_navigation_property(NavigationPropertyDef::new(derived, "right"));
        let assoc = original
            .add_association(AssociationDef::new(
                "linked",
                subject,
                object,
                Multiplicity::Many,
                Multiplicity::ZeroOrOne,
            ))
            .unwrap();

        // An incompatible transition promotes the association and both
        // ends into paired delete/add schedules under the same identity.
        let mut working = original.clone();
        working
            .associations
            .get_mut(&assoc)
            .unwrap()
            .object_multiplicity = Multiplicity::One;

        let mut changes = ChangeSet::compute(&original, &working);
        ChangeAdjuster::adjust(&mut changes, &original, &working);
        assert!(changes.associations.contains_deleted(assoc));
        assert!(changes.associations.contains_added(assoc));

        let statements = MetadataSynchronizer::new(&original)
            .statements(&working, &changes)
            .unwrap();

        // The surviving identity keeps its metadata row.
        assert!(!statements.iter().any(|s| {
            s.sql.starts_with("DELETE")
                && s.sql.contains(META_ASSOCIATION)
                && s.params == vec![SqlValue::Uuid(assoc)]
        }));
        assert!(statements.iter().any(|s| {
            s.sql.starts_with("UPDATE")
                && s.sql.contains(META_ASSOCIATION)
                && s.params.last() == Some(&SqlValue::Uuid(assoc))
        }));
        assert!(!statements
            .iter()
            .any(|s| s.sql.starts_with("INSERT") && s.sql.contains(META_ASSOCIATION)));
    }
}
