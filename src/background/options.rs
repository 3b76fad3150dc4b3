//! Coordinator options.

// ============================================================================
// Imports
// ============================================================================

use crate::config::ValidationMode;
use crate::storage::{DEFAULT_NAMESPACE, StorageKeys};

// ============================================================================
// CoordinatorOptions
// ============================================================================

/// Tunables for a [`Coordinator`](super::Coordinator).
///
/// # Example
///
/// ```
/// use usersite::background::CoordinatorOptions;
/// use usersite::config::ValidationMode;
///
/// let options = CoordinatorOptions::new()
///     .with_namespace("mysite")
///     .with_validation(ValidationMode::Strict);
/// assert_eq!(options.namespace(), "mysite");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Storage namespace; `usersite` when unset.
    namespace: Option<String>,
    /// Validation applied on add.
    validation: ValidationMode,
    /// Load the content script and retry when INJECT cannot be delivered.
    reinject_content_script: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinatorOptions {
    /// Default options.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            namespace: None,
            validation: ValidationMode::Lenient,
            reinject_content_script: true,
        }
    }

    /// Sets the storage namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sets the validation mode.
    #[must_use]
    pub const fn with_validation(mut self, validation: ValidationMode) -> Self {
        self.validation = validation;
        self
    }

    /// Enables or disables content script re-injection.
    #[must_use]
    pub const fn with_reinject_content_script(mut self, enabled: bool) -> Self {
        self.reinject_content_script = enabled;
        self
    }

    /// Storage namespace.
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Validation mode.
    #[inline]
    #[must_use]
    pub const fn validation(&self) -> ValidationMode {
        self.validation
    }

    /// Whether INJECT delivery failures load the content script and retry.
    #[inline]
    #[must_use]
    pub const fn reinject_content_script(&self) -> bool {
        self.reinject_content_script
    }

    /// Storage keys for the namespace.
    #[must_use]
    pub fn keys(&self) -> StorageKeys {
        StorageKeys::new(self.namespace())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = CoordinatorOptions::default();
        assert_eq!(options.namespace(), "usersite");
        assert_eq!(options.validation(), ValidationMode::Lenient);
        assert!(options.reinject_content_script());
        assert_eq!(options.keys().configs(), "usersite_configs");
    }

    #[test]
    fn test_overrides() {
        let options = CoordinatorOptions::new()
            .with_namespace("dev")
            .with_validation(ValidationMode::Strict)
            .with_reinject_content_script(false);
        assert_eq!(options.keys().configs(), "dev_configs");
        assert_eq!(options.validation(), ValidationMode::Strict);
        assert!(!options.reinject_content_script());
    }
}
