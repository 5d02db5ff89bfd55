//! Association definitions between navigation properties.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::Multiplicity;

/// One of the two ends of an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssocEnd {
    /// The subject end.
    Subject,
    /// The object end.
    Object,
}

impl AssocEnd {
    /// The opposite end.
    pub fn opposite(&self) -> AssocEnd {
        match self {
            AssocEnd::Subject => AssocEnd::Object,
            AssocEnd::Object => AssocEnd::Subject,
        }
    }
}

impl std::fmt::Display for AssocEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssocEnd::Subject => write!(f, "subject"),
            AssocEnd::Object => write!(f, "object"),
        }
    }
}

/// A typed, bidirectional relationship between two navigation properties.
///
/// The predicate identifies the relationship kind in the shared
/// relationship-fact table and is never shared across associations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationDef {
    /// Stable identity, assigned once at creation.
    pub id: Uuid,
    /// Association name, unique across the whole model.
    pub name: String,
    /// Relationship-kind identifier, distinct per association.
    pub predicate: Uuid,
    /// Navigation property at the subject end.
    pub subject: Uuid,
    /// Navigation property at the object end.
    pub object: Uuid,
    /// Cardinality of the subject end.
    pub subject_multiplicity: Multiplicity,
    /// Cardinality of the object end.
    pub object_multiplicity: Multiplicity,
}

impl AssociationDef {
    /// Create a new association with a fresh identity and predicate.
    pub fn new(
        name: impl Into<String>,
        subject: Uuid,
        object: Uuid,
        subject_multiplicity: Multiplicity,
        object_multiplicity: Multiplicity,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            predicate: Uuid::new_v4(),
            subject,
            object,
            subject_multiplicity,
            object_multiplicity,
        }
    }

    /// The navigation property bound at the given end.
    pub fn end(&self, end: AssocEnd) -> Uuid {
        match end {
            AssocEnd::Subject => self.subject,
            AssocEnd::Object => self.object,
        }
    }

    /// The multiplicity of the given end.
    pub fn multiplicity(&self, end: AssocEnd) -> Multiplicity {
        match end {
            AssocEnd::Subject => self.subject_multiplicity,
            AssocEnd::Object => self.object_multiplicity,
        }
    }

    /// The end a navigation property is bound at, if any.
    pub fn end_of(&self, nav: Uuid) -> Option<AssocEnd> {
        if self.subject == nav {
            Some(AssocEnd::Subject)
        } else if self.object == nav {
            Some(AssocEnd::Object)
        } else {
            None
        }
    }

    /// The navigation property at the opposite end of `nav`.
    pub fn other_end(&self, nav: Uuid) -> Option<Uuid> {
        self.end_of(nav).map(|e| self.end(e.opposite()))
    }

    /// The end whose navigation property hosts the dependent foreign key.
    ///
    /// When exactly one end has multiplicity `One`, the opposite end's
    /// navigation property materializes as a nullable foreign-key column
    /// on its declaring type's table. Pairs without a `One` end store
    /// their links in the relationship-fact table instead.
    pub fn fk_host_end(&self) -> Option<AssocEnd> {
        match (self.subject_multiplicity, self.object_multiplicity) {
            (Multiplicity::One, Multiplicity::One) => None,
            (Multiplicity::One, _) => Some(AssocEnd::Object),
            (_, Multiplicity::One) => Some(AssocEnd::Subject),
            _ => None,
        }
    }

    /// The navigation property hosting the dependent foreign key, if any.
    pub fn fk_host(&self) -> Option<Uuid> {
        self.fk_host_end().map(|e| self.end(e))
    }
}
