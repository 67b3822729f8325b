use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::{PageletError, Result};
use crate::sandbox::cdp::CdpSession;

/// Page-level operations over the DevTools session.
///
/// Cheap to clone; every clone talks to the same page.
#[derive(Clone)]
pub struct Page {
    cdp: Arc<CdpSession>,
}

impl Page {
    pub fn new(cdp: Arc<CdpSession>) -> Self {
        Self { cdp }
    }

    /// Enable the protocol domains the runner observes.
    pub async fn enable_domains(&self) -> Result<()> {
        self.cdp.call("Runtime.enable", json!({})).await?;
        self.cdp.call("Page.enable", json!({})).await?;
        self.cdp.call("Network.enable", json!({})).await?;
        Ok(())
    }

    /// Navigate and wait for the document to finish loading.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        debug!(url = url, "Navigating");
        let result = self
            .cdp
            .call("Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error_text) = result.get("errorText").and_then(Value::as_str) {
            if !error_text.is_empty() {
                return Err(PageletError::Navigation(format!("{}: {}", url, error_text)));
            }
        }

        let max_attempts = 50;
        for _ in 0..max_attempts {
            let state = self
                .evaluate_value("document.readyState", false)
                .await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Err(PageletError::Navigation(format!(
            "{}: document never finished loading",
            url
        )))
    }

    /// Evaluate an expression; returns the full protocol result, including
    /// any `exceptionDetails`.
    pub async fn evaluate(&self, expression: &str, await_promise: bool) -> Result<Value> {
        self.cdp
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": await_promise,
                    "returnByValue": true,
                }),
            )
            .await
    }

    /// Evaluate an expression and return its JSON value, failing on an
    /// in-page exception.
    pub async fn evaluate_value(&self, expression: &str, await_promise: bool) -> Result<Value> {
        let result = self.evaluate(expression, await_promise).await?;
        if let Some(details) = result.get("exceptionDetails") {
            return Err(PageletError::DevTools(exception_text(details)));
        }
        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Run a script in the page, as if injected via a script tag.
    pub async fn add_script_content(&self, source: &str) -> Result<()> {
        let result = self.evaluate(source, false).await?;
        if let Some(details) = result.get("exceptionDetails") {
            return Err(PageletError::DevTools(exception_text(details)));
        }
        Ok(())
    }

    /// Append a `<script src>` tag and wait for it to load (or fail).
    pub async fn add_script_url(&self, url: &str) -> Result<()> {
        let expression = format!(
            r#"(function(url) {{
  return new Promise(function(resolve, reject) {{
    var script = document.createElement("script");
    script.src = url;
    script.onload = function() {{ resolve(true); }};
    script.onerror = function() {{ reject(new Error("Failed to load " + url)); }};
    document.head.appendChild(script);
  }});
}})({url})"#,
            url = serde_json::to_string(url)?
        );
        let result = self.evaluate(&expression, true).await?;
        if let Some(details) = result.get("exceptionDetails") {
            return Err(PageletError::Navigation(exception_text(details)));
        }
        Ok(())
    }

    /// Register a host binding callable as `window.<name>(payload)`.
    pub async fn add_binding(&self, name: &str) -> Result<()> {
        self.cdp
            .call("Runtime.addBinding", json!({ "name": name }))
            .await?;
        Ok(())
    }

    /// Toggle offline network emulation for the page.
    pub async fn set_offline_mode(&self, offline: bool) -> Result<()> {
        self.cdp
            .call(
                "Network.emulateNetworkConditions",
                json!({
                    "offline": offline,
                    "latency": 0,
                    "downloadThroughput": -1,
                    "uploadThroughput": -1,
                }),
            )
            .await?;
        Ok(())
    }

    /// Turn one console-call argument into a plain JSON value.
    ///
    /// Primitives arrive by value; anything with a remote handle is
    /// serialized in-page. The handle itself must still be released by the
    /// caller once the whole console call is processed.
    pub async fn materialize_remote_object(&self, remote: &Value) -> Value {
        if let Some(value) = remote.get("value") {
            return value.clone();
        }
        if let Some(unserializable) = remote.get("unserializableValue").and_then(Value::as_str) {
            return Value::String(unserializable.to_string());
        }
        if let Some(object_id) = remote.get("objectId").and_then(Value::as_str) {
            let serialized = self
                .cdp
                .call(
                    "Runtime.callFunctionOn",
                    json!({
                        "objectId": object_id,
                        "functionDeclaration": "function() { return this; }",
                        "returnByValue": true,
                    }),
                )
                .await;
            if let Ok(result) = serialized {
                if let Some(value) = result.pointer("/result/value") {
                    return value.clone();
                }
            }
        }
        match remote.get("description").and_then(Value::as_str) {
            Some(description) => Value::String(description.to_string()),
            None => Value::Null,
        }
    }

    /// Release a remote object handle so the page can garbage-collect it.
    pub async fn release_object(&self, object_id: &str) {
        let _ = self
            .cdp
            .call("Runtime.releaseObject", json!({ "objectId": object_id }))
            .await;
    }

    /// Remap a stack trace through the page's source-map library, when one
    /// is loaded. Identity otherwise. The mapping itself is a black box to
    /// the host.
    pub async fn map_stack_trace(&self, stack: &str) -> Result<String> {
        let expression = format!(
            r#"(function(stack) {{
  return new Promise(function(resolve) {{
    if (window.sourceMappedStackTrace && typeof window.sourceMappedStackTrace.mapStackTrace === "function") {{
      window.sourceMappedStackTrace.mapStackTrace(stack, function(frames) {{ resolve(frames.join("\n")); }});
    }} else {{
      resolve(stack);
    }}
  }});
}})({stack})"#,
            stack = serde_json::to_string(stack)?
        );
        let mapped = self.evaluate_value(&expression, true).await?;
        Ok(mapped
            .as_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|| stack.to_string()))
    }

    pub fn session(&self) -> &Arc<CdpSession> {
        &self.cdp
    }
}

fn exception_text(details: &Value) -> String {
    details
        .pointer("/exception/description")
        .and_then(Value::as_str)
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("Evaluation failed")
        .to_string()
}
