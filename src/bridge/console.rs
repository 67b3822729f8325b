use serde_json::Value;
use tracing::error;

/// Render one console argument the way a developer expects to read it:
/// strings verbatim, everything else as compact JSON.
fn format_arg(arg: &Value) -> String {
    match arg {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_args(args: &[Value]) -> String {
    args.iter().map(format_arg).collect::<Vec<_>>().join(" ")
}

/// Pipe one non-control console call through to the host's own output
/// sinks, preserving argument order and routing by console kind. This is
/// the normal "console passthrough" developer experience: the sandbox's
/// console output looks like the script ran locally.
pub fn pipe_to_host_console(kind: &str, args: &[Value]) {
    let line = format_args(args);
    match kind {
        "error" | "warning" | "debug" | "assert" => eprintln!("{}", line),
        // Terminal hosts have no grouping/clear primitives; pipe as lines.
        _ => println!("{}", line),
    }
}

/// Report a network request that failed outright inside the sandbox.
pub fn report_request_failure(method: &str, url: &str, reason: &str) {
    error!(target: "pagelet::network", "Request failed: {} {}", method, url);
    error!(target: "pagelet::network", "  {}", reason);
}

/// Report a request that completed with an HTTP error status.
pub fn report_http_error(status: u16, method: &str, url: &str) {
    error!(target: "pagelet::network", "HTTP {} {} {}", status, method, url);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_are_rendered_verbatim_and_in_order() {
        let rendered = format_args(&[json!("Hello, world!"), json!(42), json!({"a": 1})]);
        assert_eq!(rendered, "Hello, world! 42 {\"a\":1}");
    }
}
