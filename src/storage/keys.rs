//! Storage key layout.

use crate::identifiers::ConfigId;

/// Namespace used by the extension.
pub const DEFAULT_NAMESPACE: &str = "usersite";

/// Derives every persisted key from a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    namespace: String,
}

impl StorageKeys {
    /// Creates a key layout for `namespace`.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Returns the namespace.
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key of the configuration table.
    #[must_use]
    pub fn configs(&self) -> String {
        format!("{}_configs", self.namespace)
    }

    /// Key of a configuration's file map.
    #[must_use]
    pub fn files(&self, config_id: &ConfigId) -> String {
        format!("{}_files_{}", self.namespace, config_id)
    }
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = StorageKeys::default();
        assert_eq!(keys.configs(), "usersite_configs");
        assert_eq!(keys.files(&ConfigId::new("demo")), "usersite_files_demo");
    }
}
