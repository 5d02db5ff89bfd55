//! Mapping documents for the downstream query/ORM runtime.
//!
//! For each resource type and association of a module, a document carries
//! everything the consumer needs to address the physical schema: qualified
//! names, base types, discriminators, per-property table and column, and
//! per-association view, foreign-key, and helper-procedure names. The
//! serialization dialect is JSON here; consumers are free to re-encode.

use serde::Serialize;
use uuid::Uuid;

use crate::model::{ColumnBinding, ModelGraph};
use crate::sync::ddl::{strategy, AssocStrategy};
use crate::sync::error::SyncError;
use crate::sync::sql::{cud_proc_name, link_proc_name, unlink_proc_name, view_name};

/// Physical mapping of one property.
#[derive(Debug, Clone, Serialize)]
pub struct PropertyMapping {
    /// Property name.
    pub name: String,
    /// Hosting table.
    pub table: String,
    /// Hosting column.
    pub column: String,
}

/// Physical mapping of one resource type.
#[derive(Debug, Clone, Serialize)]
pub struct TypeMapping {
    /// Namespace-qualified type name.
    pub qualified_name: String,
    /// Qualified base type name, if any.
    pub base_type: Option<String>,
    /// Discriminator value.
    pub discriminator: i32,
    /// Scalar property mappings, own properties only.
    pub properties: Vec<PropertyMapping>,
    /// Create procedure name.
    pub create_procedure: String,
    /// Update procedure name.
    pub update_procedure: String,
    /// Delete procedure name.
    pub delete_procedure: String,
}

/// How an association is reached physically.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssociationMapping {
    /// Materialized as a relation view with helper procedures.
    RelationView {
        /// Association name.
        name: String,
        /// View name.
        view: String,
        /// Insert helper procedure.
        insert_procedure: String,
        /// Delete helper procedure.
        delete_procedure: String,
    },
    /// Materialized as a foreign-key column.
    ForeignKey {
        /// Association name.
        name: String,
        /// Hosting table.
        table: String,
        /// Foreign-key column.
        column: String,
    },
}

/// The complete mapping document for one module.
#[derive(Debug, Clone, Serialize)]
pub struct MappingDocument {
    /// Module namespace.
    pub namespace: String,
    /// Module URI.
    pub uri: String,
    /// Type mappings, id-ordered.
    pub types: Vec<TypeMapping>,
    /// Association mappings for associations touching this module.
    pub associations: Vec<AssociationMapping>,
}

impl MappingDocument {
    /// Render the document as JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Builds mapping documents from a synchronized graph.
pub struct MappingBuilder;

impl MappingBuilder {
    /// Build the mapping document for a module.
    ///
    /// Fails with [`SyncError::UnsynchronizedModule`] when any touched
    /// type or property lacks the physical state a consumer needs; a
    /// graph with pending changes must be synchronized first.
    pub fn build(graph: &ModelGraph, module: Uuid) -> Result<MappingDocument, SyncError> {
        let module_def = graph
            .modules
            .get(&module)
            .ok_or(SyncError::UnknownEntity {
                kind: "module",
                id: module,
            })?;
        let stale = || SyncError::UnsynchronizedModule {
            namespace: module_def.namespace.clone(),
        };

        let qualified = |ty: Uuid| -> Option<String> {
            let ty = graph.resource_types.get(&ty)?;
            let ns = graph.modules.get(&ty.module)?;
            Some(format!("{}.{}", ns.namespace, ty.name))
        };

        let mut types = Vec::new();
        for ty in graph.resource_types_of(module) {
            let discriminator = ty.discriminator.ok_or_else(stale)?;
            let base_type = match ty.base_type {
                Some(base) => Some(qualified(base).ok_or(SyncError::UnknownEntity {
                    kind: "resource type",
                    id: base,
                })?),
                None => None,
            };

            let mut properties = Vec::new();
            for prop in graph.scalar_properties_of(ty.id) {
                let binding = prop.binding.as_ref().ok_or_else(stale)?;
                properties.push(PropertyMapping {
                    name: prop.name.clone(),
                    table: binding.table.clone(),
                    column: binding.column.clone(),
                });
            }

            types.push(TypeMapping {
                qualified_name: format!("{}.{}", module_def.namespace, ty.name),
                base_type,
                discriminator,
                properties,
                create_procedure: cud_proc_name(&module_def.namespace, &ty.name, "create"),
                update_procedure: cud_proc_name(&module_def.namespace, &ty.name, "update"),
                delete_procedure: cud_proc_name(&module_def.namespace, &ty.name, "delete"),
            });
        }

        let mut associations = Vec::new();
        for assoc in graph.associations.values() {
            let in_module = [assoc.subject, assoc.object].iter().any(|nav| {
                graph
                    .navigation_properties
                    .get(nav)
                    .and_then(|p| graph.module_of_type(p.resource_type))
                    == Some(module)
            });
            if !in_module {
                continue;
            }

            let mapping = match strategy(assoc) {
                AssocStrategy::View { .. } => AssociationMapping::RelationView {
                    name: assoc.name.clone(),
                    view: view_name(&assoc.name),
                    insert_procedure: link_proc_name(&assoc.name),
                    delete_procedure: unlink_proc_name(&assoc.name),
                },
                AssocStrategy::ForeignKey { host } => {
                    let binding = Self::host_binding(graph, assoc.end(host)).ok_or_else(stale)?;
                    AssociationMapping::ForeignKey {
                        name: assoc.name.clone(),
                        table: binding.table.clone(),
                        column: binding.column.clone(),
                    }
                }
            };
            associations.push(mapping);
        }

        Ok(MappingDocument {
            namespace: module_def.namespace.clone(),
            uri: module_def.uri.clone(),
            types,
            associations,
        })
    }

    fn host_binding(graph: &ModelGraph, nav: Uuid) -> Option<&ColumnBinding> {
        graph.navigation_properties.get(&nav)?.binding.as_ref()
    }
}
