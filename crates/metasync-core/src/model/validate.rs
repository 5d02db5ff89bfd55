//! Structural validation of a graph snapshot.
//!
//! Every check here runs before any SQL is produced; a failure aborts the
//! synchronization with no side effects.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use thiserror::Error;
use uuid::Uuid;

use super::graph::ModelGraph;
use super::types::Multiplicity;

/// Maximum length of an entity name.
pub const MAX_NAME_LEN: usize = 256;

/// Maximum length of a module namespace.
pub const MAX_NAMESPACE_LEN: usize = 256;

/// Maximum length of a module URI.
pub const MAX_URI_LEN: usize = 1024;

/// Maximum length of a description.
pub const MAX_DESCRIPTION_LEN: usize = 1024;

/// Structural validation failures.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// An entity carries the nil identity.
    #[error("{kind} has an empty id")]
    EmptyId {
        /// Entity kind.
        kind: &'static str,
    },

    /// An entity name is empty.
    #[error("{kind} {id} has an empty name")]
    EmptyName {
        /// Entity kind.
        kind: &'static str,
        /// The offending entity.
        id: Uuid,
    },

    /// A name, namespace, uri, or description exceeds its ceiling.
    #[error("{kind} {id}: {field} exceeds {limit} characters")]
    ValueTooLong {
        /// Entity kind.
        kind: &'static str,
        /// The offending entity.
        id: Uuid,
        /// The field that is too long.
        field: &'static str,
        /// The ceiling.
        limit: usize,
    },

    /// Two entities share a name within one scope (case-insensitive).
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName {
        /// Entity kind.
        kind: &'static str,
        /// The duplicated name.
        name: String,
    },

    /// Two associations share a predicate.
    #[error("predicate {predicate} is shared by more than one association")]
    DuplicatePredicate {
        /// The duplicated predicate.
        predicate: Uuid,
    },

    /// An identity reference points at a missing entity.
    #[error("{kind} {id} references unknown {target_kind} {target}")]
    DanglingReference {
        /// Referencing entity kind.
        kind: &'static str,
        /// Referencing entity.
        id: Uuid,
        /// Referenced entity kind.
        target_kind: &'static str,
        /// The missing identity.
        target: Uuid,
    },

    /// A navigation property is claimed by more than one association.
    #[error("navigation property {nav} is bound to more than one association")]
    SharedNavigationProperty {
        /// The contested navigation property.
        nav: Uuid,
    },

    /// An association declares the forbidden One–One pair.
    #[error("association '{name}' declares the illegal One\u{2013}One multiplicity pair")]
    IllegalMultiplicity {
        /// Association name.
        name: String,
    },

    /// The inheritance graph contains a cycle.
    #[error("inheritance cycle involving resource type {id}")]
    InheritanceCycle {
        /// A type on the cycle.
        id: Uuid,
    },

    /// More than one type has no base, or none does.
    #[error("expected exactly one root resource type, found {count}")]
    RootTypeCount {
        /// Number of base-less types found.
        count: usize,
    },

    /// The module dependency graph contains a cycle.
    #[error("module dependency cycle involving module {id}")]
    ModuleCycle {
        /// A module on the cycle.
        id: Uuid,
    },
}

/// Validates the structural integrity of a graph snapshot.
pub struct GraphValidator;

impl GraphValidator {
    /// Run every structural check against the graph.
    pub fn validate(graph: &ModelGraph) -> Result<(), ValidationError> {
        Self::check_identities(graph)?;
        Self::check_names(graph)?;
        Self::check_duplicates(graph)?;
        Self::check_references(graph)?;
        Self::check_associations(graph)?;
        Self::check_inheritance(graph)?;
        Self::check_module_dependencies(graph)?;
        Ok(())
    }

    fn check_identities(graph: &ModelGraph) -> Result<(), ValidationError> {
        let nil = |kind: &'static str, has_nil: bool| {
            if has_nil {
                Err(ValidationError::EmptyId { kind })
            } else {
                Ok(())
            }
        };
        nil("module", graph.modules.keys().any(Uuid::is_nil))?;
        nil(
            "resource type",
            graph.resource_types.keys().any(Uuid::is_nil),
        )?;
        nil(
            "scalar property",
            graph.scalar_properties.keys().any(Uuid::is_nil),
        )?;
        nil(
            "navigation property",
            graph.navigation_properties.keys().any(Uuid::is_nil),
        )?;
        nil("association", graph.associations.keys().any(Uuid::is_nil))?;
        Ok(())
    }

    fn check_names(graph: &ModelGraph) -> Result<(), ValidationError> {
        for module in graph.modules.values() {
            Self::check_text("module", module.id, "namespace", &module.namespace, MAX_NAMESPACE_LEN)?;
            if module.uri.len() > MAX_URI_LEN {
                return Err(ValidationError::ValueTooLong {
                    kind: "module",
                    id: module.id,
                    field: "uri",
                    limit: MAX_URI_LEN,
                });
            }
            if module.description.len() > MAX_DESCRIPTION_LEN {
                return Err(ValidationError::ValueTooLong {
                    kind: "module",
                    id: module.id,
                    field: "description",
                    limit: MAX_DESCRIPTION_LEN,
                });
            }
        }
        for ty in graph.resource_types.values() {
            Self::check_text("resource type", ty.id, "name", &ty.name, MAX_NAME_LEN)?;
        }
        for prop in graph.scalar_properties.values() {
            Self::check_text("scalar property", prop.id, "name", &prop.name, MAX_NAME_LEN)?;
        }
        for prop in graph.navigation_properties.values() {
            Self::check_text(
                "navigation property",
                prop.id,
                "name",
                &prop.name,
                MAX_NAME_LEN,
            )?;
        }
        for assoc in graph.associations.values() {
            Self::check_text("association", assoc.id, "name", &assoc.name, MAX_NAME_LEN)?;
        }
        Ok(())
    }

    fn check_text(
        kind: &'static str,
        id: Uuid,
        field: &'static str,
        value: &str,
        limit: usize,
    ) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::EmptyName { kind, id });
        }
        if value.len() > limit {
            return Err(ValidationError::ValueTooLong {
                kind,
                id,
                field,
                limit,
            });
        }
        Ok(())
    }

    fn check_duplicates(graph: &ModelGraph) -> Result<(), ValidationError> {
        let mut namespaces = HashSet::new();
        for module in graph.modules.values() {
            if !namespaces.insert(module.namespace.to_lowercase()) {
                return Err(ValidationError::DuplicateName {
                    kind: "module",
                    name: module.namespace.clone(),
                });
            }
        }

        // Type names are scoped to their module.
        let mut type_names = HashSet::new();
        for ty in graph.resource_types.values() {
            if !type_names.insert((ty.module, ty.name.to_lowercase())) {
                return Err(ValidationError::DuplicateName {
                    kind: "resource type",
                    name: ty.name.clone(),
                });
            }
        }

        // Property names are scoped to their type, across both kinds.
        let mut property_names = HashSet::new();
        for prop in graph.scalar_properties.values() {
            if !property_names.insert((prop.resource_type, prop.name.to_lowercase())) {
                return Err(ValidationError::DuplicateName {
                    kind: "property",
                    name: prop.name.clone(),
                });
            }
        }
        for prop in graph.navigation_properties.values() {
            if !property_names.insert((prop.resource_type, prop.name.to_lowercase())) {
                return Err(ValidationError::DuplicateName {
                    kind: "property",
                    name: prop.name.clone(),
                });
            }
        }

        // Association names are model-wide.
        let mut assoc_names = HashSet::new();
        let mut predicates = HashSet::new();
        for assoc in graph.associations.values() {
            if !assoc_names.insert(assoc.name.to_lowercase()) {
                return Err(ValidationError::DuplicateName {
                    kind: "association",
                    name: assoc.name.clone(),
                });
            }
            if !predicates.insert(assoc.predicate) {
                return Err(ValidationError::DuplicatePredicate {
                    predicate: assoc.predicate,
                });
            }
        }
        Ok(())
    }

    fn check_references(graph: &ModelGraph) -> Result<(), ValidationError> {
        for ty in graph.resource_types.values() {
            if !graph.modules.contains_key(&ty.module) {
                return Err(ValidationError::DanglingReference {
                    kind: "resource type",
                    id: ty.id,
                    target_kind: "module",
                    target: ty.module,
                });
            }
            if let Some(base) = ty.base_type {
                if !graph.resource_types.contains_key(&base) {
                    return Err(ValidationError::DanglingReference {
                        kind: "resource type",
                        id: ty.id,
                        target_kind: "resource type",
                        target: base,
                    });
                }
            }
        }
        for prop in graph.scalar_properties.values() {
            if !graph.resource_types.contains_key(&prop.resource_type) {
                return Err(ValidationError::DanglingReference {
                    kind: "scalar property",
                    id: prop.id,
                    target_kind: "resource type",
                    target: prop.resource_type,
                });
            }
        }
        for prop in graph.navigation_properties.values() {
            if !graph.resource_types.contains_key(&prop.resource_type) {
                return Err(ValidationError::DanglingReference {
                    kind: "navigation property",
                    id: prop.id,
                    target_kind: "resource type",
                    target: prop.resource_type,
                });
            }
        }
        for assoc in graph.associations.values() {
            for nav in [assoc.subject, assoc.object] {
                if !graph.navigation_properties.contains_key(&nav) {
                    return Err(ValidationError::DanglingReference {
                        kind: "association",
                        id: assoc.id,
                        target_kind: "navigation property",
                        target: nav,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_associations(graph: &ModelGraph) -> Result<(), ValidationError> {
        for assoc in graph.associations.values() {
            if !Multiplicity::legal_pair(assoc.subject_multiplicity, assoc.object_multiplicity) {
                return Err(ValidationError::IllegalMultiplicity {
                    name: assoc.name.clone(),
                });
            }
        }

        // Each navigation property belongs to at most one association.
        let mut claimed = HashMap::new();
        for assoc in graph.associations.values() {
            for nav in [assoc.subject, assoc.object] {
                if claimed.insert(nav, assoc.id).is_some() {
                    return Err(ValidationError::SharedNavigationProperty { nav });
                }
            }
        }
        Ok(())
    }

    fn check_inheritance(graph: &ModelGraph) -> Result<(), ValidationError> {
        // Iterative DFS with tri-state marks; a back edge is a cycle.
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks: BTreeMap<Uuid, Mark> = graph
            .resource_types
            .keys()
            .map(|id| (*id, Mark::Unvisited))
            .collect();

        for start in graph.resource_types.keys() {
            if marks[start] != Mark::Unvisited {
                continue;
            }
            let mut path = vec![*start];
            while let Some(&current) = path.last() {
                match marks[&current] {
                    Mark::Unvisited => {
                        marks.insert(current, Mark::InProgress);
                        if let Some(base) = graph
                            .resource_types
                            .get(&current)
                            .and_then(|t| t.base_type)
                        {
                            match marks.get(&base) {
                                Some(Mark::InProgress) => {
                                    return Err(ValidationError::InheritanceCycle { id: base });
                                }
                                Some(Mark::Unvisited) => path.push(base),
                                _ => {}
                            }
                        }
                    }
                    _ => {
                        marks.insert(current, Mark::Done);
                        path.pop();
                    }
                }
            }
        }

        if !graph.resource_types.is_empty() {
            let roots = graph
                .resource_types
                .values()
                .filter(|t| t.base_type.is_none())
                .count();
            if roots != 1 {
                return Err(ValidationError::RootTypeCount { count: roots });
            }
        }
        Ok(())
    }

    fn check_module_dependencies(graph: &ModelGraph) -> Result<(), ValidationError> {
        // A module depends on another when one of its types inherits from
        // a type declared there.
        let mut edge_sets: BTreeMap<Uuid, BTreeSet<Uuid>> = BTreeMap::new();
        for ty in graph.resource_types.values() {
            if let Some(base) = ty.base_type.and_then(|b| graph.resource_types.get(&b)) {
                if base.module != ty.module {
                    edge_sets.entry(ty.module).or_default().insert(base.module);
                }
            }
        }
        let edges: BTreeMap<Uuid, Vec<Uuid>> = edge_sets
            .into_iter()
            .map(|(k, v)| (k, v.into_iter().collect()))
            .collect();

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks: BTreeMap<Uuid, Mark> = graph
            .modules
            .keys()
            .map(|id| (*id, Mark::Unvisited))
            .collect();

        for start in graph.modules.keys().copied().collect::<Vec<_>>() {
            if marks[&start] != Mark::Unvisited {
                continue;
            }
            marks.insert(start, Mark::InProgress);
            let mut stack: Vec<(Uuid, usize)> = vec![(start, 0)];
            while let Some(frame) = stack.last_mut() {
                let (node, index) = *frame;
                let successors = edges.get(&node).map(Vec::as_slice).unwrap_or(&[]);
                if index < successors.len() {
                    frame.1 += 1;
                    let next = successors[index];
                    match marks.get(&next).copied() {
                        Some(Mark::InProgress) => {
                            return Err(ValidationError::ModuleCycle { id: next });
                        }
                        Some(Mark::Unvisited) => {
                            marks.insert(next, Mark::InProgress);
                            stack.push((next, 0));
                        }
                        _ => {}
                    }
                } else {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                }
            }
        }
        Ok(())
    }
}
