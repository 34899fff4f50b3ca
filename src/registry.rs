use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use crate::config::Config;
use crate::logger::ScopedLogger;

/// Collects every logger label an application declares while its
/// dependency graph is being described, then materializes one binding
/// per label once the graph is final.
///
/// Label declaration happens at module-definition time, before any
/// injection container exists; the registry bridges that gap as an
/// explicit builder threaded through application setup. Labels form a
/// set and are never removed: a later site naming an existing label
/// resolves to the binding already registered for it.
///
/// ```rust
/// use actix_web_scoped_logger::{Config, LoggerRegistry};
///
/// let registry = LoggerRegistry::new();
/// registry.register_label("AuthService");
/// registry.register_label("OrderService");
/// registry.register_label("AuthService"); // no-op
///
/// let config = Config::default();
/// for binding in registry.build_bindings() {
///     let logger = binding.resolve(&config);
///     assert_eq!(logger.label(), binding.label());
/// }
/// ```
pub struct LoggerRegistry {
    labels: Mutex<BTreeSet<String>>,
}

impl LoggerRegistry {
    pub fn new() -> Self {
        LoggerRegistry {
            labels: Mutex::new(BTreeSet::new()),
        }
    }

    /// Records `label`; repeat registrations are no-ops.
    pub fn register_label(&self, label: impl Into<String>) {
        self.labels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(label.into());
    }

    pub fn labels(&self) -> Vec<String> {
        self.labels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// One binding descriptor per known label. Each descriptor is lazy:
    /// the facade it describes is only constructed by
    /// [`LoggerBinding::resolve`].
    pub fn build_bindings(&self) -> Vec<LoggerBinding> {
        self.labels()
            .into_iter()
            .map(|label| LoggerBinding { label })
            .collect()
    }
}

impl Default for LoggerRegistry {
    fn default() -> Self {
        LoggerRegistry::new()
    }
}

/// Deferred construction recipe for one labeled [`ScopedLogger`].
pub struct LoggerBinding {
    label: String,
}

impl LoggerBinding {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn resolve(&self, config: &Config) -> ScopedLogger {
        let logger = ScopedLogger::from_config(config);
        logger.set_label(&self.label);
        logger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_idempotent() {
        let registry = LoggerRegistry::new();
        for _ in 0..3 {
            registry.register_label("AuthService");
        }
        registry.register_label("OrderService");

        let bindings = registry.build_bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(
            registry.labels(),
            vec!["AuthService".to_string(), "OrderService".to_string()],
        );
    }

    #[test]
    fn bindings_resolve_with_their_label_pre_set() {
        let registry = LoggerRegistry::new();
        registry.register_label("Billing");

        let config = Config {
            error_field: "error".to_string(),
            ..Config::default()
        };
        let bindings = registry.build_bindings();
        let logger = bindings[0].resolve(&config);
        assert_eq!(logger.label(), "Billing");
    }

    #[test]
    fn labels_accumulate_and_are_never_removed() {
        let registry = LoggerRegistry::new();
        registry.register_label("A");
        let first = registry.build_bindings().len();
        registry.register_label("B");
        let second = registry.build_bindings().len();
        assert_eq!((first, second), (1, 2));
    }
}
