use std::path::Path;

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, ScriptError};
use crate::sandbox::page::Page;

/// Marker beginning the first stack frame inside a combined message+stack
/// string.
const STACK_FRAME_MARKER: &str = "\n    at ";

/// The stack as it arrives from the sandbox: either one raw string or a
/// pre-split sequence of frame lines.
#[derive(Debug, Clone)]
pub enum StackInput {
    Raw(String),
    Frames(Vec<String>),
}

/// An error surfaced by the sandbox before resolution.
#[derive(Debug, Clone)]
pub struct RawScriptError {
    pub message: String,
    pub stack: Option<StackInput>,
}

impl RawScriptError {
    /// Fallback conversion used when resolution itself fails: surface the
    /// original error untouched rather than masking it.
    pub fn into_unresolved(self) -> ScriptError {
        match self.stack {
            Some(StackInput::Raw(stack)) => ScriptError::with_stack(self.message, stack),
            Some(StackInput::Frames(frames)) => {
                ScriptError::with_stack(self.message, frames.join("\n"))
            }
            None => ScriptError::new(self.message),
        }
    }
}

/// Build a [`RawScriptError`] from DevTools `exceptionDetails`.
pub fn raw_error_from_exception_details(details: &Value) -> RawScriptError {
    // A thrown Error's description already carries message and stack.
    if let Some(description) = details
        .pointer("/exception/description")
        .and_then(Value::as_str)
    {
        return RawScriptError {
            message: description.to_string(),
            stack: None,
        };
    }

    let text = details
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or("Uncaught error");
    let thrown = details
        .pointer("/exception/value")
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    let message = match thrown {
        Some(thrown) => format!("{} {}", text, thrown),
        None => text.to_string(),
    };

    let frames = details
        .pointer("/stackTrace/callFrames")
        .and_then(Value::as_array)
        .map(|call_frames| {
            call_frames
                .iter()
                .map(|frame| {
                    let function = frame
                        .get("functionName")
                        .and_then(Value::as_str)
                        .filter(|name| !name.is_empty())
                        .unwrap_or("<anonymous>");
                    let url = frame.get("url").and_then(Value::as_str).unwrap_or("");
                    let line = frame.get("lineNumber").and_then(Value::as_i64).unwrap_or(0) + 1;
                    let column = frame.get("columnNumber").and_then(Value::as_i64).unwrap_or(0) + 1;
                    format!("    at {} ({}:{}:{})", function, url, line, column)
                })
                .collect::<Vec<_>>()
        })
        .filter(|frames: &Vec<String>| !frames.is_empty());

    RawScriptError {
        message,
        stack: frames.map(StackInput::Frames),
    }
}

/// Resolve one stack trace: remap it through the page's source-map library
/// (a black box to the host), then rewrite absolute source paths relative
/// to the host's working directory.
pub async fn resolve_stack_trace(page: &Page, stack: &str) -> Result<String> {
    let mapped = page.map_stack_trace(stack).await?;
    Ok(rewrite_stack_paths(&mapped, &std::env::current_dir()?))
}

/// Turn a raw sandbox error into the [`ScriptError`] propagated to the
/// host, resolving whatever stack material is available.
pub async fn resolve_to_script_error(page: &Page, raw: &RawScriptError) -> Result<ScriptError> {
    match &raw.stack {
        None => {
            // Some errors arrive as one combined message+stack string; split
            // at the first frame marker and resolve the stack portion.
            match raw.message.find(STACK_FRAME_MARKER) {
                None => Ok(ScriptError::new(raw.message.clone())),
                Some(end_of_message) => {
                    let message = raw.message[..end_of_message].to_string();
                    let stack_portion = &raw.message[end_of_message + 1..];
                    let resolved = resolve_stack_trace(page, stack_portion).await?;
                    let stack = format!("{}\n{}", message, resolved);
                    Ok(ScriptError::with_stack(message, stack))
                }
            }
        }
        Some(StackInput::Frames(frames)) => {
            let resolved = resolve_stack_trace(page, &frames.join("\n")).await?;
            let stack = format!("{}\n{}", raw.message, resolved);
            Ok(ScriptError::with_stack(raw.message.clone(), stack))
        }
        Some(StackInput::Raw(stack)) => {
            let resolved = resolve_stack_trace(page, stack).await?;
            Ok(ScriptError::with_stack(raw.message.clone(), resolved))
        }
    }
}

/// Rewrite absolute source paths in stack frames to host-cwd-relative ones.
pub fn rewrite_stack_paths(stack: &str, cwd: &Path) -> String {
    // Frame shapes: "    at fn (path:line:col)" and "    at path:line:col".
    let frame_path = Regex::new(
        r"(?m)(?P<head>\s+at\s+(?:[^(\n]*\()?)(?P<path>(?:file://)?/[^():\n]+)(?P<pos>:\d+:\d+)",
    )
    .expect("static regex");

    frame_path
        .replace_all(stack, |caps: &Captures| {
            let raw_path = &caps["path"];
            let fs_path = raw_path.strip_prefix("file://").unwrap_or(raw_path);
            let rewritten = Path::new(fs_path)
                .strip_prefix(cwd)
                .map(|relative| relative.display().to_string())
                .unwrap_or_else(|_| raw_path.to_string());
            format!("{}{}{}", &caps["head"], rewritten, &caps["pos"])
        })
        .into_owned()
}

/// Log an internal resolution failure without masking the original error.
pub fn report_resolution_failure(internal: &crate::error::PageletError) {
    debug!(error = %internal, "Stack resolution internals");
    tracing::error!("Internal error while resolving script error:");
    tracing::error!("{}", internal);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rewrites_cwd_absolute_paths() {
        let stack = "Error: boom\n    at main (/work/project/src/app.ts:3:11)\n    at /work/project/src/run.ts:9:1";
        let rewritten = rewrite_stack_paths(stack, Path::new("/work/project"));
        assert_eq!(
            rewritten,
            "Error: boom\n    at main (src/app.ts:3:11)\n    at src/run.ts:9:1"
        );
    }

    #[test]
    fn leaves_foreign_paths_alone() {
        let stack = "    at main (http://127.0.0.1:4000/bundle.js:1:100)\n    at other (/elsewhere/x.js:2:3)";
        let rewritten = rewrite_stack_paths(stack, Path::new("/work/project"));
        assert!(rewritten.contains("http://127.0.0.1:4000/bundle.js:1:100"));
        assert!(rewritten.contains("/elsewhere/x.js:2:3"));
    }

    #[test]
    fn strips_file_url_prefixes() {
        let stack = "    at main (file:///work/project/src/app.ts:3:11)";
        let rewritten = rewrite_stack_paths(stack, Path::new("/work/project"));
        assert_eq!(rewritten, "    at main (src/app.ts:3:11)");
    }

    #[test]
    fn exception_details_prefer_the_description() {
        let details = json!({
            "text": "Uncaught",
            "exception": {
                "description": "Error: boom\n    at main (bundle.js:1:1)"
            }
        });
        let raw = raw_error_from_exception_details(&details);
        assert!(raw.message.starts_with("Error: boom"));
        assert!(raw.stack.is_none());
    }

    #[test]
    fn exception_details_fall_back_to_structured_frames() {
        let details = json!({
            "text": "Uncaught",
            "exception": { "value": "boom" },
            "stackTrace": {
                "callFrames": [{
                    "functionName": "",
                    "url": "http://127.0.0.1:4000/bundle.js",
                    "lineNumber": 0,
                    "columnNumber": 10,
                }]
            }
        });
        let raw = raw_error_from_exception_details(&details);
        assert_eq!(raw.message, "Uncaught boom");
        match raw.stack {
            Some(StackInput::Frames(frames)) => {
                assert_eq!(
                    frames,
                    vec!["    at <anonymous> (http://127.0.0.1:4000/bundle.js:1:11)"]
                );
            }
            other => panic!("expected frames, got {:?}", other),
        }
    }

    #[test]
    fn unresolved_fallback_keeps_the_original_material() {
        let raw = RawScriptError {
            message: "Error: boom".to_string(),
            stack: Some(StackInput::Frames(vec![
                "    at a (x.js:1:1)".to_string(),
                "    at b (y.js:2:2)".to_string(),
            ])),
        };
        let script_error = raw.into_unresolved();
        assert_eq!(script_error.message, "Error: boom");
        assert_eq!(
            script_error.stack.as_deref(),
            Some("    at a (x.js:1:1)\n    at b (y.js:2:2)")
        );
    }
}
