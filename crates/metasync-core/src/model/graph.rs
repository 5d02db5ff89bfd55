//! The in-memory resource graph.
//!
//! The graph is an arena of flat tables keyed by identity; every relation
//! between entities is stored as an identity reference, so diffing and
//! persistence are set operations rather than pointer traversals. The
//! physical layout (tables, bindings, discriminator floor) travels inside
//! the snapshot, never as ambient state.

use std::collections::BTreeMap;

use thiserror::Error;
use uuid::Uuid;

use super::association::AssociationDef;
use super::layout::TableLayout;
use super::module::ModuleDef;
use super::property::{NavigationPropertyDef, ScalarPropertyDef};
use super::resource::ResourceTypeDef;
use super::types::Direction;

/// Errors raised by graph mutation operations.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Referenced entity does not exist in the graph.
    #[error("unknown {kind}: {id}")]
    UnknownEntity {
        /// Entity kind.
        kind: &'static str,
        /// The missing identity.
        id: Uuid,
    },

    /// A navigation property is already bound to an association.
    #[error("navigation property {nav} is already bound to association {association}")]
    AlreadyBound {
        /// The navigation property.
        nav: Uuid,
        /// The association holding it.
        association: Uuid,
    },

    /// A navigation property cannot be removed while bound.
    #[error("navigation property {nav} is still bound to association {association}")]
    StillBound {
        /// The navigation property.
        nav: Uuid,
        /// The association holding it.
        association: Uuid,
    },
}

/// A complete snapshot of the entity-relationship model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelGraph {
    /// Modules keyed by identity.
    pub modules: BTreeMap<Uuid, ModuleDef>,
    /// Resource types keyed by identity.
    pub resource_types: BTreeMap<Uuid, ResourceTypeDef>,
    /// Scalar properties keyed by identity.
    pub scalar_properties: BTreeMap<Uuid, ScalarPropertyDef>,
    /// Navigation properties keyed by identity.
    pub navigation_properties: BTreeMap<Uuid, NavigationPropertyDef>,
    /// Associations keyed by identity.
    pub associations: BTreeMap<Uuid, AssociationDef>,
    /// Physical data tables in creation order.
    pub tables: Vec<TableLayout>,
    /// Highest discriminator ever assigned; discriminators are never reused.
    pub discriminator_floor: i32,
}

impl ModelGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module, returning its identity.
    pub fn add_module(&mut self, module: ModuleDef) -> Uuid {
        let id = module.id;
        self.modules.insert(id, module);
        id
    }

    /// Add a resource type, returning its identity.
    pub fn add_resource_type(&mut self, ty: ResourceTypeDef) -> Uuid {
        let id = ty.id;
        self.resource_types.insert(id, ty);
        id
    }

    /// Add a scalar property, returning its identity.
    pub fn add_scalar_property(&mut self, prop: ScalarPropertyDef) -> Uuid {
        let id = prop.id;
        self.scalar_properties.insert(id, prop);
        id
    }

    /// Add a navigation property, returning its identity.
    pub fn add_navigation_property(&mut self, prop: NavigationPropertyDef) -> Uuid {
        let id = prop.id;
        self.navigation_properties.insert(id, prop);
        id
    }

    /// Add an association and atomically bind both of its ends.
    ///
    /// Both navigation properties must exist and be unbound; their
    /// direction and back-reference are set in the same call so the
    /// "owned by at most one association" invariant cannot be observed
    /// half-applied.
    pub fn add_association(&mut self, assoc: AssociationDef) -> Result<Uuid, GraphError> {
        for nav in [assoc.subject, assoc.object] {
            let prop = self
                .navigation_properties
                .get(&nav)
                .ok_or(GraphError::UnknownEntity {
                    kind: "navigation property",
                    id: nav,
                })?;
            if let Some(existing) = prop.association {
                return Err(GraphError::AlreadyBound {
                    nav,
                    association: existing,
                });
            }
        }

        let id = assoc.id;
        if let Some(subject) = self.navigation_properties.get_mut(&assoc.subject) {
            subject.association = Some(id);
            subject.direction = Direction::Subject;
        }
        if let Some(object) = self.navigation_properties.get_mut(&assoc.object) {
            object.association = Some(id);
            object.direction = Direction::Object;
        }
        self.associations.insert(id, assoc);
        Ok(id)
    }

    /// Remove an association, atomically unbinding both ends.
    pub fn remove_association(&mut self, id: Uuid) -> Option<AssociationDef> {
        let assoc = self.associations.remove(&id)?;
        for nav in [assoc.subject, assoc.object] {
            if let Some(prop) = self.navigation_properties.get_mut(&nav) {
                if prop.association == Some(id) {
                    prop.association = None;
                    prop.direction = Direction::Undefined;
                }
            }
        }
        Some(assoc)
    }

    /// Remove a module from its collection.
    pub fn remove_module(&mut self, id: Uuid) -> Option<ModuleDef> {
        self.modules.remove(&id)
    }

    /// Remove a resource type from its collection.
    pub fn remove_resource_type(&mut self, id: Uuid) -> Option<ResourceTypeDef> {
        self.resource_types.remove(&id)
    }

    /// Remove a scalar property from its collection.
    pub fn remove_scalar_property(&mut self, id: Uuid) -> Option<ScalarPropertyDef> {
        self.scalar_properties.remove(&id)
    }

    /// Remove a navigation property.
    ///
    /// Fails while the property is still bound; remove the association
    /// first so both sides stay consistent.
    pub fn remove_navigation_property(
        &mut self,
        id: Uuid,
    ) -> Result<Option<NavigationPropertyDef>, GraphError> {
        if let Some(prop) = self.navigation_properties.get(&id) {
            if let Some(association) = prop.association {
                return Err(GraphError::StillBound {
                    nav: id,
                    association,
                });
            }
        }
        Ok(self.navigation_properties.remove(&id))
    }

    /// Scalar properties owned by a resource type.
    pub fn scalar_properties_of(&self, ty: Uuid) -> impl Iterator<Item = &ScalarPropertyDef> {
        self.scalar_properties
            .values()
            .filter(move |p| p.resource_type == ty)
    }

    /// Navigation properties owned by a resource type.
    pub fn navigation_properties_of(
        &self,
        ty: Uuid,
    ) -> impl Iterator<Item = &NavigationPropertyDef> {
        self.navigation_properties
            .values()
            .filter(move |p| p.resource_type == ty)
    }

    /// Resource types owned by a module.
    pub fn resource_types_of(&self, module: Uuid) -> impl Iterator<Item = &ResourceTypeDef> {
        self.resource_types
            .values()
            .filter(move |t| t.module == module)
    }

    /// The base chain of a type, root first, ending with the type itself.
    ///
    /// Stops early on dangling or cyclic base references; the validator
    /// rejects such graphs before synchronization.
    pub fn base_chain(&self, ty: Uuid) -> Vec<Uuid> {
        let mut chain = Vec::new();
        let mut current = Some(ty);
        while let Some(id) = current {
            if chain.contains(&id) {
                break;
            }
            chain.push(id);
            current = self.resource_types.get(&id).and_then(|t| t.base_type);
        }
        chain.reverse();
        chain
    }

    /// Depth of a type in the inheritance tree (root = 0).
    pub fn inheritance_depth(&self, ty: Uuid) -> usize {
        self.base_chain(ty).len().saturating_sub(1)
    }

    /// All transitive descendants of a type.
    pub fn descendants_of(&self, ty: Uuid) -> Vec<Uuid> {
        let mut out = Vec::new();
        let mut frontier = vec![ty];
        while let Some(current) = frontier.pop() {
            for t in self.resource_types.values() {
                if t.base_type == Some(current) && !out.contains(&t.id) {
                    out.push(t.id);
                    frontier.push(t.id);
                }
            }
        }
        out
    }

    /// The module owning a property's declaring type, looked up per kind.
    pub fn module_of_type(&self, ty: Uuid) -> Option<Uuid> {
        self.resource_types.get(&ty).map(|t| t.module)
    }

    /// Find a table by name.
    pub fn table(&self, name: &str) -> Option<&TableLayout> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// The root entity table, if any table has been provisioned.
    pub fn root_table(&self) -> Option<&TableLayout> {
        self.tables.first()
    }

    /// The highest discriminator currently visible in the graph,
    /// including the floor carried from past synchronizations.
    pub fn max_discriminator(&self) -> i32 {
        self.resource_types
            .values()
            .filter_map(|t| t.discriminator)
            .fold(self.discriminator_floor, i32::max)
    }

    /// Refresh this graph's derived physical state from another graph.
    ///
    /// Copies the table layout, discriminator floor, per-type
    /// discriminators, and per-property bindings for matching identities.
    /// Entities absent from `source` have their derived state cleared.
    /// Definition objects themselves are never replaced, so references
    /// held by callers stay valid.
    pub fn adopt_physical(&mut self, source: &ModelGraph) {
        self.tables = source.tables.clone();
        self.discriminator_floor = source.discriminator_floor;
        for (id, ty) in self.resource_types.iter_mut() {
            ty.discriminator = source
                .resource_types
                .get(id)
                .and_then(|t| t.discriminator);
        }
        for (id, prop) in self.scalar_properties.iter_mut() {
            prop.binding = source
                .scalar_properties
                .get(id)
                .and_then(|p| p.binding.clone());
        }
        for (id, prop) in self.navigation_properties.iter_mut() {
            prop.binding = source
                .navigation_properties
                .get(id)
                .and_then(|p| p.binding.clone());
        }
    }
}
