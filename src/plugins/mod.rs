pub mod registry;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::bridge::MessageBus;
use crate::bundle::Entrypoint;
use crate::error::Result;
use crate::sandbox::page::Page;

pub use self::registry::{is_plugin_argument, PluginRegistry};

/// An ordered, optional extension point. Every capability has a
/// default-empty implementation, so a plugin only implements the hooks it
/// cares about; the core never inspects which ones those are.
///
/// Plugins are stateless across runs from the core's perspective: hooks are
/// only ever called with monotonically updated accumulators.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable plugin name, used for `plugin:<name>` arguments and errors.
    fn name(&self) -> &str;

    /// Transform the entrypoint list. Receives the previous plugin's output
    /// and returns a new list; never mutates in place.
    async fn extend_entrypoints(
        &self,
        entrypoints: Vec<Entrypoint>,
        _script_args: &[String],
    ) -> Result<Vec<Entrypoint>> {
        Ok(entrypoints)
    }

    /// Contribute to the configuration object exposed to the sandbox as
    /// `pagelet.plugins`.
    fn extend_context(&self, prev_context: Value, _script_args: &[String]) -> Result<Value> {
        Ok(prev_context)
    }

    /// Attach subscribers to the control channel before the sandbox runs.
    fn extend_message_bus(&self, _bus: &MessageBus) -> Result<()> {
        Ok(())
    }

    /// Mutate the sandbox page before any bundle loads.
    async fn extend_page(&self, _page: &Page) -> Result<()> {
        Ok(())
    }

    /// Plugin-specific help text for `pagelet plugin:<name> --help`.
    fn help(&self, _script_args: &[String]) -> Option<String> {
        None
    }
}

impl std::fmt::Debug for dyn Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin").field("name", &self.name()).finish()
    }
}

/// The ordered plugin chain for one run, composed via left-fold: each hook
/// observes the output of every hook before it. The first hook error aborts
/// the whole pipeline; later hooks are never applied partially.
pub struct PluginSet {
    plugins: Vec<Arc<dyn Plugin>>,
    script_args: Vec<String>,
}

impl PluginSet {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>, script_args: Vec<String>) -> Self {
        Self {
            plugins,
            script_args,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Thread the entrypoint list through every entrypoint hook in order.
    pub async fn resolve_entrypoints(
        &self,
        initial: Vec<Entrypoint>,
    ) -> Result<Vec<Entrypoint>> {
        let mut entrypoints = initial;
        for plugin in &self.plugins {
            entrypoints = plugin
                .extend_entrypoints(entrypoints, &self.script_args)
                .await?;
        }
        Ok(entrypoints)
    }

    /// Accumulate the plugin context, starting from an empty object.
    pub fn extend_context(&self) -> Result<Value> {
        let mut context = Value::Object(Default::default());
        for plugin in &self.plugins {
            context = plugin.extend_context(context, &self.script_args)?;
        }
        Ok(context)
    }

    /// Give every plugin, in order, a chance to attach bus subscribers.
    pub fn extend_message_bus(&self, bus: &MessageBus) -> Result<()> {
        for plugin in &self.plugins {
            plugin.extend_message_bus(bus)?;
        }
        Ok(())
    }

    /// Let every plugin mutate the page before bundles load.
    pub async fn extend_page(&self, page: &Page) -> Result<()> {
        for plugin in &self.plugins {
            plugin.extend_page(page).await?;
        }
        Ok(())
    }

    /// Help text of the first plugin that provides one.
    pub fn help(&self) -> Option<String> {
        self.plugins
            .iter()
            .find_map(|plugin| plugin.help(&self.script_args))
    }

    /// Fallback help shown when no plugin provides its own.
    pub fn fallback_help(&self) -> String {
        let names: Vec<&str> = self.plugins.iter().map(|p| p.name()).collect();
        format!("{}\n\nNo plugin help available.", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageletError;

    struct PrefixPlugin {
        name: &'static str,
        prefix: &'static str,
    }

    #[async_trait]
    impl Plugin for PrefixPlugin {
        fn name(&self) -> &str {
            self.name
        }

        async fn extend_entrypoints(
            &self,
            entrypoints: Vec<Entrypoint>,
            _script_args: &[String],
        ) -> Result<Vec<Entrypoint>> {
            // Rewrites every source path, and appends one marker entry.
            let mut rewritten: Vec<Entrypoint> = entrypoints
                .into_iter()
                .map(|entry| Entrypoint {
                    source_path: std::path::PathBuf::from(format!(
                        "{}-{}",
                        self.prefix,
                        entry.source_path.display()
                    )),
                    serve_path: entry.serve_path,
                })
                .collect();
            rewritten.push(Entrypoint::new(format!("{}-extra", self.prefix)));
            Ok(rewritten)
        }

        fn extend_context(&self, prev_context: Value, _script_args: &[String]) -> Result<Value> {
            let mut object = prev_context.as_object().cloned().unwrap_or_default();
            object.insert(self.name.to_string(), Value::String(self.prefix.to_string()));
            object.insert("last".to_string(), Value::String(self.name.to_string()));
            Ok(Value::Object(object))
        }
    }

    struct FailingPlugin;

    #[async_trait]
    impl Plugin for FailingPlugin {
        fn name(&self) -> &str {
            "failing"
        }

        async fn extend_entrypoints(
            &self,
            _entrypoints: Vec<Entrypoint>,
            _script_args: &[String],
        ) -> Result<Vec<Entrypoint>> {
            Err(PageletError::Plugin {
                plugin: "failing".to_string(),
                message: "refused".to_string(),
            })
        }
    }

    fn plugin_set(plugins: Vec<Arc<dyn Plugin>>) -> PluginSet {
        PluginSet::new(plugins, vec![])
    }

    #[tokio::test]
    async fn entrypoint_hooks_apply_in_order() {
        let set = plugin_set(vec![
            Arc::new(PrefixPlugin { name: "a", prefix: "A" }),
            Arc::new(PrefixPlugin { name: "b", prefix: "B" }),
        ]);

        let resolved = set
            .resolve_entrypoints(vec![Entrypoint::new("main.js")])
            .await
            .unwrap();

        // B observed A's output: A's rewrite is wrapped by B's.
        let paths: Vec<String> = resolved
            .iter()
            .map(|e| e.source_path.display().to_string())
            .collect();
        assert_eq!(paths, vec!["B-A-main.js", "B-A-extra", "B-extra"]);
    }

    #[tokio::test]
    async fn context_accumulates_left_to_right() {
        let set = plugin_set(vec![
            Arc::new(PrefixPlugin { name: "a", prefix: "A" }),
            Arc::new(PrefixPlugin { name: "b", prefix: "B" }),
        ]);

        let context = set.extend_context().unwrap();
        assert_eq!(context["a"], "A");
        assert_eq!(context["b"], "B");
        // The later plugin observed (and overwrote) the earlier value.
        assert_eq!(context["last"], "b");
    }

    #[tokio::test]
    async fn hook_failure_aborts_the_pipeline() {
        let set = plugin_set(vec![
            Arc::new(FailingPlugin),
            Arc::new(PrefixPlugin { name: "after", prefix: "X" }),
        ]);

        let err = set
            .resolve_entrypoints(vec![Entrypoint::new("main.js")])
            .await
            .unwrap_err();
        assert!(matches!(err, PageletError::Plugin { .. }));
    }

    #[test]
    fn empty_set_produces_an_empty_context() {
        let set = plugin_set(vec![]);
        assert_eq!(set.extend_context().unwrap(), serde_json::json!({}));
    }
}
