use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{PageletError, Result};
use crate::plugins::Plugin;

/// Whether a CLI entrypoint argument names a plugin rather than a file.
pub fn is_plugin_argument(argument: &str) -> bool {
    argument.starts_with("plugin:")
}

type Constructor = Box<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Name-based registry backing `plugin:<name>` command line arguments.
///
/// Library users register constructors up front; resolution happens once
/// per run, before anything is bundled or launched.
#[derive(Default)]
pub struct PluginRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Resolve a `plugin:<name>` argument to a plugin instance.
    pub fn resolve(&self, argument: &str) -> Result<Arc<dyn Plugin>> {
        let name = argument.strip_prefix("plugin:").unwrap_or(argument);
        match self.constructors.get(name) {
            Some(constructor) => Ok(constructor()),
            None => Err(PageletError::PluginNotFound {
                name: name.to_string(),
                known: if self.constructors.is_empty() {
                    "(none)".to_string()
                } else {
                    self.names().join(", ")
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoopPlugin;

    #[async_trait]
    impl Plugin for NoopPlugin {
        fn name(&self) -> &str {
            "noop"
        }
    }

    #[test]
    fn recognizes_plugin_arguments() {
        assert!(is_plugin_argument("plugin:mocha"));
        assert!(!is_plugin_argument("./script.js"));
    }

    #[test]
    fn resolves_registered_names_with_or_without_prefix() {
        let mut registry = PluginRegistry::new();
        registry.register("noop", || Arc::new(NoopPlugin));

        assert_eq!(registry.resolve("plugin:noop").unwrap().name(), "noop");
        assert_eq!(registry.resolve("noop").unwrap().name(), "noop");
    }

    #[test]
    fn unknown_names_list_registered_plugins() {
        let mut registry = PluginRegistry::new();
        registry.register("noop", || Arc::new(NoopPlugin));

        let err = registry.resolve("plugin:mystery").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("mystery"));
        assert!(message.contains("noop"));
    }
}
