//! Module definitions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A module: a namespace-scoped container of resource types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDef {
    /// Stable identity, assigned once at creation.
    pub id: Uuid,
    /// Namespace, unique across the model (case-insensitive).
    pub namespace: String,
    /// Module URI.
    pub uri: String,
    /// Free-form description.
    pub description: String,
    /// Whether this module ships with the system and cannot be removed.
    pub builtin: bool,
}

impl ModuleDef {
    /// Create a new module with a fresh identity.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.into(),
            uri: String::new(),
            description: String::new(),
            builtin: false,
        }
    }

    /// Set the module URI.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = uri.into();
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark the module as built-in.
    pub fn builtin(mut self) -> Self {
        self.builtin = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_builder() {
        let module = ModuleDef::new("Core")
            .with_uri("urn:metasync:core")
            .with_description("Built-in types")
            .builtin();

        assert!(!module.id.is_nil());
        assert_eq!(module.namespace, "Core");
        assert_eq!(module.uri, "urn:metasync:core");
        assert!(module.builtin);
    }

    #[test]
    fn test_fresh_identity_per_module() {
        let a = ModuleDef::new("A");
        let b = ModuleDef::new("B");
        assert_ne!(a.id, b.id);
    }
}
