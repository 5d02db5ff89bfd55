//! Change promotion.
//!
//! Structural changes that cannot be expressed as a single in-place
//! alteration are re-expressed as delete-then-recreate, and the
//! recreation propagates to every entity whose physical representation
//! depends on the changed one. The rules below form a closure over the
//! dependency relation between an association and its two ends: nothing
//! may be left referencing a deleted entity without a replacement.

use tracing::debug;
use uuid::Uuid;

use crate::model::{AssociationDef, ModelGraph, Multiplicity};

use super::diff::ChangeSet;

/// Promotes incompatible updates into paired delete/add schedules.
pub struct ChangeAdjuster;

impl ChangeAdjuster {
    /// Apply the promotion rules to a change set, in order, one pass each.
    pub fn adjust(changes: &mut ChangeSet, original: &ModelGraph, target: &ModelGraph) {
        Self::promote_associations(changes, original, target);
        Self::imply_navigation_schedules(changes, original, target);
        Self::promote_reparented_navigations(changes, original, target);
    }

    /// Whether an association end may change multiplicity in place.
    ///
    /// Anything else forces the association to be dropped and recreated,
    /// because the physical storage strategy cannot be altered to match.
    fn compatible(old: Multiplicity, new: Multiplicity) -> bool {
        use Multiplicity::*;
        matches!(
            (old, new),
            (Many, Many) | (One, _) | (ZeroOrOne, Many) | (ZeroOrOne, ZeroOrOne)
        )
    }

    /// Rule 1: an updated association whose end identities changed, or
    /// whose multiplicity transition is not in the compatibility table,
    /// moves from Updated into Deleted(old) + Added(new), dragging its
    /// end properties along so their columns are rebuilt.
    fn promote_associations(changes: &mut ChangeSet, original: &ModelGraph, target: &ModelGraph) {
        let updated = std::mem::take(&mut changes.associations.updated);
        for (old, new) in updated {
            let ends_changed = old.subject != new.subject || old.object != new.object;
            let transition_ok = Self::compatible(old.subject_multiplicity, new.subject_multiplicity)
                && Self::compatible(old.object_multiplicity, new.object_multiplicity);

            if !ends_changed && transition_ok {
                changes.associations.updated.push((old, new));
                continue;
            }

            debug!(association = %old.name, "promoting association update to recreate");
            for nav in [old.subject, old.object] {
                Self::schedule_nav_deleted(changes, original, nav);
            }
            for nav in [new.subject, new.object] {
                Self::schedule_nav_added(changes, target, nav);
            }
            changes.associations.schedule_deleted(old);
            changes.associations.schedule_added(new);
        }
    }

    /// Rule 2: a deleted One-anchored association also deletes the
    /// navigation property opposite the One end, because that property
    /// hosted the dependent foreign key. Added associations schedule the
    /// dependent-side property for addition symmetrically.
    fn imply_navigation_schedules(
        changes: &mut ChangeSet,
        original: &ModelGraph,
        target: &ModelGraph,
    ) {
        let deleted: Vec<AssociationDef> = changes.associations.deleted.clone();
        for assoc in &deleted {
            if let Some(host) = assoc.fk_host() {
                Self::schedule_nav_deleted(changes, original, host);
            }
        }

        let added: Vec<AssociationDef> = changes.associations.added.clone();
        for assoc in &added {
            if let Some(host) = assoc.fk_host() {
                Self::schedule_nav_added(changes, target, host);
            }
        }
    }

    /// Rule 3: a navigation property whose owning resource type changed
    /// cannot be altered in place. It is recreated, its association (old
    /// and new versions) is recreated, and the opposite end is recreated
    /// with it even when that end did not itself change.
    fn promote_reparented_navigations(
        changes: &mut ChangeSet,
        original: &ModelGraph,
        target: &ModelGraph,
    ) {
        let updated = std::mem::take(&mut changes.navigations.updated);
        for (old, new) in updated {
            if old.resource_type == new.resource_type {
                changes.navigations.updated.push((old, new));
                continue;
            }

            debug!(nav = %old.name, "promoting reparented navigation property to recreate");
            let old_assoc = old.association;
            let new_assoc = new.association;
            let old_id = old.id;
            changes.navigations.schedule_deleted(old);
            changes.navigations.schedule_added(new);

            let mut other_end = None;
            if let Some(assoc_id) = old_assoc {
                if let Some(assoc) = original.associations.get(&assoc_id) {
                    other_end = assoc.other_end(old_id);
                    changes.associations.remove_updated(assoc_id);
                    changes.associations.schedule_deleted(assoc.clone());
                }
            }
            if let Some(assoc_id) = new_assoc {
                if let Some(assoc) = target.associations.get(&assoc_id) {
                    changes.associations.remove_updated(assoc_id);
                    changes.associations.schedule_added(assoc.clone());
                }
            }

            // The opposite end's column belongs to the recreated
            // association; drop it, and recreate it when it survives
            // into the target graph.
            if let Some(other) = other_end {
                Self::schedule_nav_deleted(changes, original, other);
                Self::schedule_nav_added(changes, target, other);
            }
        }
    }

    fn schedule_nav_deleted(changes: &mut ChangeSet, original: &ModelGraph, nav: Uuid) {
        if let Some(prop) = original.navigation_properties.get(&nav) {
            changes.navigations.schedule_deleted(prop.clone());
        }
    }

    fn schedule_nav_added(changes: &mut ChangeSet, target: &ModelGraph, nav: Uuid) {
        if let Some(prop) = target.navigation_properties.get(&nav) {
            changes.navigations.schedule_added(prop.clone());
        }
    }
}
