pub mod cdp;
pub mod locate;
pub mod page;
pub mod process;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bridge::{
    build_context_script, console, decode_console_args, ControlMessage, MessageBus,
    OFFLINE_BINDING,
};
use crate::completion::{CompletionEngine, ExitFuture};
use crate::error::{PageletError, Result};
use crate::plugins::PluginSet;
use crate::stack::{
    raw_error_from_exception_details, report_resolution_failure, resolve_to_script_error,
    RawScriptError,
};

use self::cdp::{CdpEvent, CdpSession};
use self::locate::locate_browser;
use self::page::Page;
use self::process::{BrowserProcess, LaunchOptions};

/// Session lifecycle, advanced strictly left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Launching,
    Ready,
    Running,
    Exited,
    Closed,
}

pub struct LaunchConfig {
    /// Browser executable override (env var still wins).
    pub executable: Option<PathBuf>,
    /// Headless unless inspect mode keeps a visible window open.
    pub headless: bool,
    pub extra_args: Vec<String>,
}

/// A bundle loaded at startup. `global_name` is the page global under
/// which the bundle exposes its entry module's exports.
pub struct StartupBundle {
    pub serve_path: String,
    pub global_name: String,
}

/// Host-side async operations attached to the session, notably in-flight
/// stack-trace resolutions. Close waits for these so a stack is never
/// resolved against an already-closed page.
#[derive(Clone, Default)]
struct PendingOps(Arc<Mutex<Vec<JoinHandle<()>>>>);

impl PendingOps {
    fn track(&self, handle: JoinHandle<()>) {
        self.0.lock().expect("pending ops poisoned").push(handle);
    }

    async fn join_all(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> =
                self.0.lock().expect("pending ops poisoned").drain(..).collect();
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }
}

/// One running sandbox: a disposable browser process bound to exactly one
/// page, created per run and destroyed at run end.
pub struct Sandbox {
    state: SessionState,
    process: BrowserProcess,
    page: Page,
    bus: Arc<MessageBus>,
    events: Option<UnboundedReceiver<CdpEvent>>,
    exit: Option<ExitFuture>,
    pending_ops: PendingOps,
    headless: bool,
}

impl Sandbox {
    /// Launch the browser, attach to its single page and enable the
    /// protocol domains. The session is `Ready` afterwards; no user content
    /// has loaded yet.
    pub async fn launch(config: &LaunchConfig) -> Result<Self> {
        let executable = locate_browser(config.executable.as_ref())?;

        let options = LaunchOptions {
            executable,
            headless: config.headless,
            devtools: !config.headless,
            extra_args: config.extra_args.clone(),
        };
        let process = BrowserProcess::spawn(&options).await?;

        let page_ws_url = process.page_ws_url().await?;
        let (session, events) = CdpSession::connect(&page_ws_url).await?;
        let page = Page::new(session);
        page.enable_domains().await?;

        info!("Sandbox ready");

        Ok(Self {
            state: SessionState::Ready,
            process,
            page,
            bus: Arc::new(MessageBus::new()),
            events: Some(events),
            exit: None,
            pending_ops: PendingOps::default(),
            headless: config.headless,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Prime the page on the trusted local-server origin. Required before
    /// any injection: the default blank page must never be treated as
    /// same-origin with the content served later.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        self.page.navigate(url).await
    }

    /// Wire the channel, inject the runtime context and load the bundles.
    ///
    /// Ordering is load-bearing: the event pump and completion listener are
    /// in place before any user code can emit a signal, and context
    /// injection completes before the first bundle loads.
    pub async fn run(
        &mut self,
        script_args: &[String],
        plugin_set: &PluginSet,
        server_url: &str,
        bundles: &[StartupBundle],
        stack_mapper: Option<&str>,
    ) -> Result<()> {
        let plugin_context = plugin_set.extend_context()?;
        plugin_set.extend_message_bus(&self.bus)?;
        plugin_set.extend_page(&self.page).await?;

        let (engine, exit_future) = CompletionEngine::new();
        self.exit = Some(exit_future);

        let exit_listener = engine.clone();
        self.bus.subscribe(move |message| {
            if let ControlMessage::Exit(code) = message {
                exit_listener.record_exit(*code);
            }
        });

        let events = self
            .events
            .take()
            .ok_or_else(|| PageletError::DevTools("Session already running".to_string()))?;
        tokio::spawn(pump_events(
            events,
            self.page.clone(),
            self.bus.clone(),
            engine,
            self.pending_ops.clone(),
        ));

        self.page.add_binding(OFFLINE_BINDING).await?;

        if let Some(mapper_source) = stack_mapper {
            self.page.add_script_content(mapper_source).await?;
        }

        let context_script = build_context_script(script_args, &plugin_context)?;
        self.page.add_script_content(&context_script).await?;

        for bundle in bundles {
            let url = format!(
                "{}{}",
                server_url,
                bundle.serve_path.trim_start_matches('/')
            );
            self.page.add_script_url(&url).await?;
            self.page
                .add_script_content(&start_bundle_script(&bundle.global_name))
                .await?;
        }

        self.state = SessionState::Running;
        Ok(())
    }

    /// Await the single terminal outcome: the exit code, or the resolved
    /// sandbox error that ended the run.
    pub async fn wait_for_exit(&mut self) -> Result<i32> {
        let exit = self
            .exit
            .take()
            .ok_or_else(|| PageletError::DevTools("Session was never run".to_string()))?;
        let outcome = exit.wait().await;
        self.state = SessionState::Exited;
        outcome
    }

    /// Tear the sandbox down: wait for outstanding host-side operations,
    /// then disconnect and terminate the process.
    ///
    /// In inspect mode this never returns; the browser stays open for
    /// manual debugging until the host process is interrupted.
    pub async fn close(&mut self) -> Result<()> {
        if !self.headless {
            info!("Inspect mode: leaving the browser open (Ctrl-C to quit)");
            futures::future::pending::<()>().await;
        }

        self.pending_ops.join_all().await;
        self.page.session().disconnect();
        self.process.kill().await?;
        self.state = SessionState::Closed;
        debug!("Sandbox closed");
        Ok(())
    }
}

/// Hand a freshly loaded bundle's entry export to `pagelet.run`.
///
/// A callable or thenable default export becomes a tracked runnable; a
/// bundle exporting neither is responsible for calling `pagelet.exit`
/// itself.
fn start_bundle_script(global_name: &str) -> String {
    format!(
        r#"(function (moduleExports) {{
  var main = moduleExports && moduleExports.default !== undefined ? moduleExports.default : moduleExports;
  if (typeof main === "function" || (main && typeof main.then === "function")) {{
    window.pagelet.run(main);
  }}
}})(window.{global_name});"#,
        global_name = global_name
    )
}

/// Consume the session's DevTools events, strictly in arrival order.
///
/// This single task is the serialization point of the control channel:
/// every console entry is fully decoded and dispatched before the next one
/// is looked at, which is what makes message delivery FIFO.
async fn pump_events(
    mut events: UnboundedReceiver<CdpEvent>,
    page: Page,
    bus: Arc<MessageBus>,
    engine: CompletionEngine,
    pending_ops: PendingOps,
) {
    // requestId -> (method, url), for failed-request reporting.
    let mut inflight_requests: HashMap<String, (String, String)> = HashMap::new();

    while let Some(event) = events.recv().await {
        match event.method.as_str() {
            "Runtime.consoleAPICalled" => {
                handle_console_call(&page, &bus, &event.params).await;
            }
            "Runtime.exceptionThrown" => {
                let raw = match event.params.get("exceptionDetails") {
                    Some(details) => raw_error_from_exception_details(details),
                    None => RawScriptError {
                        message: "Uncaught error".to_string(),
                        stack: None,
                    },
                };
                handle_script_error(&page, &engine, &pending_ops, raw);
            }
            "Inspector.targetCrashed" => {
                handle_script_error(
                    &page,
                    &engine,
                    &pending_ops,
                    RawScriptError {
                        message: "Sandbox crashed".to_string(),
                        stack: None,
                    },
                );
            }
            "Runtime.bindingCalled" => {
                handle_binding_call(&page, &event.params).await;
            }
            "Network.requestWillBeSent" => {
                if let (Some(id), Some(request)) = (
                    event.params.get("requestId").and_then(Value::as_str),
                    event.params.get("request"),
                ) {
                    let method = request
                        .get("method")
                        .and_then(Value::as_str)
                        .unwrap_or("GET")
                        .to_string();
                    let url = request
                        .get("url")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    inflight_requests.insert(id.to_string(), (method, url));
                }
            }
            "Network.responseReceived" => {
                let status = event
                    .params
                    .pointer("/response/status")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                if status >= 400 {
                    let id = event.params.get("requestId").and_then(Value::as_str);
                    let (method, url) = id
                        .and_then(|id| inflight_requests.get(id).cloned())
                        .unwrap_or_else(|| ("GET".to_string(), "<unknown>".to_string()));
                    console::report_http_error(status as u16, &method, &url);
                }
            }
            "Network.loadingFailed" => {
                let canceled = event
                    .params
                    .get("canceled")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let id = event
                    .params
                    .get("requestId")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if !canceled {
                    let (method, url) = inflight_requests
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| ("GET".to_string(), "<unknown>".to_string()));
                    let reason = event
                        .params
                        .get("errorText")
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown error");
                    console::report_request_failure(&method, &url, reason);
                }
                inflight_requests.remove(id);
            }
            "Network.loadingFinished" => {
                if let Some(id) = event.params.get("requestId").and_then(Value::as_str) {
                    inflight_requests.remove(id);
                }
            }
            _ => {}
        }
    }
    debug!("Event stream ended");
}

/// Decode one console call: control messages go to the bus, everything
/// else passes through to the host console. Remote handles are released
/// afterwards so the page can garbage-collect the log arguments.
async fn handle_console_call(page: &Page, bus: &MessageBus, params: &Value) {
    let kind = params.get("type").and_then(Value::as_str).unwrap_or("log");
    let remote_args = params
        .get("args")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut values = Vec::with_capacity(remote_args.len());
    for remote in &remote_args {
        values.push(page.materialize_remote_object(remote).await);
    }

    match decode_console_args(&values) {
        Some(message) => bus.dispatch(&message),
        None => console::pipe_to_host_console(kind, &values),
    }

    for remote in &remote_args {
        if let Some(object_id) = remote.get("objectId").and_then(Value::as_str) {
            page.release_object(object_id).await;
        }
    }
}

/// Route an uncaught sandbox error through the completion engine.
///
/// The terminal slot is claimed synchronously (first terminal wins); the
/// resolution itself runs as a tracked operation so `close` can wait for
/// it. A post-terminal error is still resolved, but only logged. An
/// internal resolution failure is logged and never masks the original
/// error.
fn handle_script_error(
    page: &Page,
    engine: &CompletionEngine,
    pending_ops: &PendingOps,
    raw: RawScriptError,
) {
    let is_terminal = engine.begin_error();
    let page = page.clone();
    let engine = engine.clone();

    pending_ops.track(tokio::spawn(async move {
        let resolved = match resolve_to_script_error(&page, &raw).await {
            Ok(script_error) => script_error,
            Err(internal) => {
                report_resolution_failure(&internal);
                raw.into_unresolved()
            }
        };
        if is_terminal {
            engine.resolve_error(resolved);
        } else {
            error!("{}", resolved);
        }
    }));
}

async fn handle_binding_call(page: &Page, params: &Value) {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    if name != OFFLINE_BINDING {
        return;
    }
    let offline = params
        .get("payload")
        .and_then(Value::as_str)
        .and_then(|payload| serde_json::from_str::<bool>(payload).ok())
        .unwrap_or(true);
    if let Err(e) = page.set_offline_mode(offline).await {
        warn!(error = %e, "Failed to toggle offline mode");
    }
}
