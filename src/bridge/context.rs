use serde_json::Value;

use crate::bridge::bus::MAGIC_LOG_MARKER;
use crate::error::Result;

/// Name of the DevTools binding backing `pagelet.setOfflineMode`. The
/// binding is the one host-exposed capability reachable from sandbox code.
pub const OFFLINE_BINDING: &str = "__pageletSetOfflineMode";

/// Build the source of the global runtime object installed in the sandbox
/// before any bundled code runs.
///
/// The object is a serialized configuration handed across the trust
/// boundary exactly once; the host never mutates it after injection. The
/// one-tick completion barrier is deliberate: it lets code scheduled
/// immediately after `run()` register more runnables before the pending set
/// is allowed to drain to empty.
pub fn build_context_script(args: &[String], plugin_context: &Value) -> Result<String> {
    let args_json = serde_json::to_string(args)?;
    let plugins_json = serde_json::to_string(plugin_context)?;
    let marker_json = serde_json::to_string(MAGIC_LOG_MARKER)?;

    Ok(format!(
        r#";(function() {{
  let pendingRunnables = []

  // Completion barrier: one macrotask tick. Same-tick registrations must be
  // observed before the pending set may be declared empty.
  const COMPLETION_BARRIER_MS = 1

  function delay(ms) {{
    return new Promise(resolve => setTimeout(resolve, ms))
  }}

  function reportError(error) {{
    console.error(error && error.stack ? error.stack : error)
  }}

  function trackPendingRunnable(promise) {{
    pendingRunnables.push(promise)
  }}

  const createCompletionHandler = (promise) => () => {{
    pendingRunnables = pendingRunnables.filter(pending => pending !== promise)

    if (pendingRunnables.length === 0) {{
      window.pagelet.exit(0)
    }}
  }}

  const createErrorHandler = (promise) => (error) => {{
    pendingRunnables = pendingRunnables.filter(pending => pending !== promise)

    reportError(error)

    if (pendingRunnables.length === 0) {{
      delay(COMPLETION_BARRIER_MS).then(() => window.pagelet.exit(1))
    }}
  }}

  window.pagelet = {{
    args: {args},
    plugins: {plugins},
    exit (exitCode = 0) {{
      console.log({marker}, "exit", exitCode)
    }},
    run (runnable) {{
      let result
      try {{
        result = typeof runnable === "function" ? runnable(window.pagelet.args) : runnable
      }} catch (error) {{
        reportError(error)
        return window.pagelet.exit(1)
      }}

      const scriptPromise = result && typeof result.then === "function"
        ? result
        : Promise.resolve(result)

      const completion = delay(COMPLETION_BARRIER_MS).then(() => scriptPromise)

      trackPendingRunnable(completion)

      completion.then(
        createCompletionHandler(completion),
        createErrorHandler(completion)
      )
      return completion
    }},
    setOfflineMode (takeOffline = true) {{
      return window.{binding}(JSON.stringify(!!takeOffline))
    }}
  }};
}})();"#,
        args = args_json,
        plugins = plugins_json,
        marker = marker_json,
        binding = OFFLINE_BINDING,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embeds_arguments_verbatim() {
        let script = build_context_script(
            &["--exit=4".to_string(), "name with spaces".to_string()],
            &json!({}),
        )
        .unwrap();
        assert!(script.contains(r#"args: ["--exit=4","name with spaces"]"#));
    }

    #[test]
    fn embeds_plugin_context_and_marker() {
        let script =
            build_context_script(&[], &json!({"mocha": {"ui": "bdd"}})).unwrap();
        assert!(script.contains(r#"plugins: {"mocha":{"ui":"bdd"}}"#));
        assert!(script.contains(MAGIC_LOG_MARKER));
        assert!(script.contains(OFFLINE_BINDING));
    }
}
