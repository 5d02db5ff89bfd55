//! Identity-keyed graph diffing.
//!
//! One generic diff covers all five entity kinds: entities present only in
//! the target are additions, only in the original are deletions, and
//! entities present in both with differing tracked fields are updates.
//! Derived state (discriminators, physical bindings, association
//! back-references) is excluded from tracking so that a freshly loaded
//! backend graph and an unsynchronized in-memory clone compare equal.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use uuid::Uuid;

use crate::model::{
    AssociationDef, ModelGraph, ModuleDef, NavigationPropertyDef, ResourceTypeDef,
    ScalarPropertyDef,
};

/// An entity kind that can be diffed by identity.
pub trait Diffable {
    /// Human-readable kind name for diagnostics.
    const KIND: &'static str;

    /// The stable identity.
    fn identity(&self) -> Uuid;

    /// Compare tracked fields only, ignoring derived state.
    fn tracked_eq(&self, other: &Self) -> bool;
}

impl Diffable for ModuleDef {
    const KIND: &'static str = "module";

    fn identity(&self) -> Uuid {
        self.id
    }

    fn tracked_eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace
            && self.uri == other.uri
            && self.description == other.description
            && self.builtin == other.builtin
    }
}

impl Diffable for ResourceTypeDef {
    const KIND: &'static str = "resource type";

    fn identity(&self) -> Uuid {
        self.id
    }

    // Discriminator is assigned by the engine and not tracked.
    fn tracked_eq(&self, other: &Self) -> bool {
        self.module == other.module
            && self.name == other.name
            && self.base_type == other.base_type
    }
}

impl Diffable for ScalarPropertyDef {
    const KIND: &'static str = "scalar property";

    fn identity(&self) -> Uuid {
        self.id
    }

    // Binding is assigned by the allocator and not tracked.
    fn tracked_eq(&self, other: &Self) -> bool {
        self.resource_type == other.resource_type
            && self.name == other.name
            && self.data_type == other.data_type
            && self.nullable == other.nullable
            && self.length == other.length
            && self.precision == other.precision
            && self.scale == other.scale
    }
}

impl Diffable for NavigationPropertyDef {
    const KIND: &'static str = "navigation property";

    fn identity(&self) -> Uuid {
        self.id
    }

    // Binding and the association back-reference are derived; the
    // association's own end identities are the authoritative record.
    fn tracked_eq(&self, other: &Self) -> bool {
        self.resource_type == other.resource_type
            && self.name == other.name
            && self.direction == other.direction
    }
}

impl Diffable for AssociationDef {
    const KIND: &'static str = "association";

    fn identity(&self) -> Uuid {
        self.id
    }

    fn tracked_eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.predicate == other.predicate
            && self.subject == other.subject
            && self.object == other.object
            && self.subject_multiplicity == other.subject_multiplicity
            && self.object_multiplicity == other.object_multiplicity
    }
}

/// Added, deleted, and updated entities of one kind.
#[derive(Debug, Clone)]
pub struct EntityDelta<T> {
    /// Entities present only in the target graph.
    pub added: Vec<T>,
    /// Entities present only in the original graph.
    pub deleted: Vec<T>,
    /// Entities present in both with differing tracked fields, as
    /// (original, target) pairs.
    pub updated: Vec<(T, T)>,
}

impl<T> Default for EntityDelta<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            deleted: Vec::new(),
            updated: Vec::new(),
        }
    }
}

impl<T: Diffable + Clone> EntityDelta<T> {
    /// Diff two identity-keyed collections. Output order follows the
    /// id-sorted map iteration, so it is deterministic.
    pub fn diff(original: &BTreeMap<Uuid, T>, target: &BTreeMap<Uuid, T>) -> Self {
        let mut delta = Self::default();

        for (id, entity) in target {
            match original.get(id) {
                None => delta.added.push(entity.clone()),
                Some(old) => {
                    if !old.tracked_eq(entity) {
                        delta.updated.push((old.clone(), entity.clone()));
                    }
                }
            }
        }
        for (id, entity) in original {
            if !target.contains_key(id) {
                delta.deleted.push(entity.clone());
            }
        }

        delta
    }

    /// Check if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.updated.is_empty()
    }

    /// Total number of changes.
    pub fn len(&self) -> usize {
        self.added.len() + self.deleted.len() + self.updated.len()
    }

    /// Check whether an identity is scheduled for addition.
    pub fn contains_added(&self, id: Uuid) -> bool {
        self.added.iter().any(|e| e.identity() == id)
    }

    /// Check whether an identity is scheduled for deletion.
    pub fn contains_deleted(&self, id: Uuid) -> bool {
        self.deleted.iter().any(|e| e.identity() == id)
    }

    /// Schedule an addition unless already scheduled.
    pub fn schedule_added(&mut self, entity: T) {
        if !self.contains_added(entity.identity()) {
            self.added.push(entity);
        }
    }

    /// Schedule a deletion unless already scheduled.
    pub fn schedule_deleted(&mut self, entity: T) {
        if !self.contains_deleted(entity.identity()) {
            self.deleted.push(entity);
        }
    }

    /// Remove an identity from the updated set, returning the pair.
    pub fn remove_updated(&mut self, id: Uuid) -> Option<(T, T)> {
        let index = self.updated.iter().position(|(old, _)| old.identity() == id)?;
        Some(self.updated.remove(index))
    }
}

/// The complete change set between two graph snapshots.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// Module changes.
    pub modules: EntityDelta<ModuleDef>,
    /// Resource type changes.
    pub types: EntityDelta<ResourceTypeDef>,
    /// Scalar property changes.
    pub scalars: EntityDelta<ScalarPropertyDef>,
    /// Navigation property changes.
    pub navigations: EntityDelta<NavigationPropertyDef>,
    /// Association changes.
    pub associations: EntityDelta<AssociationDef>,
}

impl ChangeSet {
    /// Compute the change set between two graphs.
    pub fn compute(original: &ModelGraph, target: &ModelGraph) -> Self {
        Self {
            modules: EntityDelta::diff(&original.modules, &target.modules),
            types: EntityDelta::diff(&original.resource_types, &target.resource_types),
            scalars: EntityDelta::diff(&original.scalar_properties, &target.scalar_properties),
            navigations: EntityDelta::diff(
                &original.navigation_properties,
                &target.navigation_properties,
            ),
            associations: EntityDelta::diff(&original.associations, &target.associations),
        }
    }

    /// Check if nothing changed across all five kinds.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
            && self.types.is_empty()
            && self.scalars.is_empty()
            && self.navigations.is_empty()
            && self.associations.is_empty()
    }

    /// Total number of changes across all five kinds.
    pub fn change_count(&self) -> usize {
        self.modules.len()
            + self.types.len()
            + self.scalars.len()
            + self.navigations.len()
            + self.associations.len()
    }

    /// Modules touched by any change in the set.
    ///
    /// Ownership is resolved in the graph the entity belongs to:
    /// deletions in the original, additions and updates in the target.
    pub fn touched_modules(&self, original: &ModelGraph, target: &ModelGraph) -> BTreeSet<Uuid> {
        let mut touched = BTreeSet::new();

        for module in &self.modules.added {
            touched.insert(module.id);
        }
        for module in &self.modules.deleted {
            touched.insert(module.id);
        }
        for (_, module) in &self.modules.updated {
            touched.insert(module.id);
        }

        for ty in &self.types.added {
            touched.insert(ty.module);
        }
        for ty in &self.types.deleted {
            touched.insert(ty.module);
        }
        for (old, new) in &self.types.updated {
            touched.insert(old.module);
            touched.insert(new.module);
        }

        let mut touch_type = |graph: &ModelGraph, ty: Uuid| {
            if let Some(module) = graph.module_of_type(ty) {
                touched.insert(module);
            }
        };

        for prop in &self.scalars.added {
            touch_type(target, prop.resource_type);
        }
        for prop in &self.scalars.deleted {
            touch_type(original, prop.resource_type);
        }
        for (old, new) in &self.scalars.updated {
            touch_type(original, old.resource_type);
            touch_type(target, new.resource_type);
        }

        for prop in &self.navigations.added {
            touch_type(target, prop.resource_type);
        }
        for prop in &self.navigations.deleted {
            touch_type(original, prop.resource_type);
        }
        for (old, new) in &self.navigations.updated {
            touch_type(original, old.resource_type);
            touch_type(target, new.resource_type);
        }

        let mut touch_assoc = |graph: &ModelGraph, assoc: &AssociationDef| {
            for nav in [assoc.subject, assoc.object] {
                if let Some(prop) = graph.navigation_properties.get(&nav) {
                    if let Some(module) = graph.module_of_type(prop.resource_type) {
                        touched.insert(module);
                    }
                }
            }
        };

        for assoc in &self.associations.added {
            touch_assoc(target, assoc);
        }
        for assoc in &self.associations.deleted {
            touch_assoc(original, assoc);
        }
        for (old, new) in &self.associations.updated {
            touch_assoc(original, old);
            touch_assoc(target, new);
        }

        touched
    }
}
