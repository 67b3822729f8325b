use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tempfile::TempDir;
use tracing::{debug, info, trace, warn};

use crate::error::{PageletError, Result};

/// Switches keeping the disposable browser profile quiet and hermetic.
const DEFAULT_SWITCHES: &[&str] = &[
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-networking",
    "--disable-breakpad",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-sync",
    "--metrics-recording-only",
    "--mute-audio",
    "--hide-scrollbars",
];

const ENDPOINT_WAIT: Duration = Duration::from_secs(30);

pub struct LaunchOptions {
    pub executable: PathBuf,
    pub headless: bool,
    /// Open DevTools alongside the page (inspect mode).
    pub devtools: bool,
    pub extra_args: Vec<String>,
}

/// The spawned browser process and its DevTools endpoint.
///
/// The process is launched with an isolated, throwaway user-data-dir and a
/// DevTools endpoint on an ephemeral port; the endpoint URL is read off the
/// child's stderr with a bounded wait. Killing the child and deleting the
/// profile directory is best effort on drop.
pub struct BrowserProcess {
    child: Child,
    ws_endpoint: String,
    // Held for its Drop: deletes the profile directory.
    _user_data_dir: TempDir,
}

impl BrowserProcess {
    pub async fn spawn(options: &LaunchOptions) -> Result<Self> {
        let user_data_dir = tempfile::Builder::new()
            .prefix("pagelet-profile")
            .tempdir()?;

        info!(executable = %options.executable.display(), headless = options.headless, "Spawning browser");

        let mut command = Command::new(&options.executable);
        command
            .arg("--remote-debugging-port=0")
            .arg(format!("--user-data-dir={}", user_data_dir.path().display()));
        command.args(DEFAULT_SWITCHES);
        if options.headless {
            command.arg("--headless=new");
        } else if options.devtools {
            command.arg("--auto-open-devtools-for-tabs");
        }
        command.args(&options.extra_args);
        command.arg("about:blank");

        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| PageletError::Launch(format!("{}: {}", options.executable.display(), e)))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| PageletError::Launch("Browser stderr not captured".to_string()))?;

        let ws_endpoint = tokio::time::timeout(
            ENDPOINT_WAIT,
            read_devtools_endpoint(BufReader::new(stderr)),
        )
        .await
        .map_err(|_| {
            PageletError::Launch("Timeout waiting for the DevTools endpoint".to_string())
        })??;

        debug!(endpoint = %ws_endpoint, "DevTools endpoint ready");

        Ok(Self {
            child,
            ws_endpoint,
            _user_data_dir: user_data_dir,
        })
    }

    /// The browser-level DevTools WebSocket URL.
    pub fn ws_endpoint(&self) -> &str {
        &self.ws_endpoint
    }

    /// The DevTools HTTP endpoint derived from the WebSocket URL.
    pub fn http_endpoint(&self) -> Result<String> {
        let rest = self
            .ws_endpoint
            .strip_prefix("ws://")
            .ok_or_else(|| PageletError::Launch(format!("Unexpected endpoint: {}", self.ws_endpoint)))?;
        let host = rest
            .split('/')
            .next()
            .ok_or_else(|| PageletError::Launch(format!("Unexpected endpoint: {}", self.ws_endpoint)))?;
        Ok(format!("http://{}", host))
    }

    /// Discover the WebSocket URL of the single page the browser opened.
    pub async fn page_ws_url(&self) -> Result<String> {
        let list_url = format!("{}/json/list", self.http_endpoint()?);
        let client = reqwest::Client::new();

        let max_attempts = 50;
        let delay = Duration::from_millis(100);

        for attempt in 1..=max_attempts {
            let targets: Vec<serde_json::Value> = match client.get(&list_url).send().await {
                Ok(response) => response.json().await.unwrap_or_default(),
                Err(_) => Vec::new(),
            };

            let page_target = targets.iter().find(|t| {
                t.get("type").and_then(|v| v.as_str()) == Some("page")
            });
            if let Some(target) = page_target {
                if let Some(url) = target
                    .get("webSocketDebuggerUrl")
                    .and_then(|v| v.as_str())
                {
                    debug!(attempt = attempt, "Page target ready");
                    return Ok(url.to_string());
                }
            }
            tokio::time::sleep(delay).await;
        }

        Err(PageletError::Launch(
            "Timeout waiting for a page target".to_string(),
        ))
    }

    /// Terminate the browser process.
    pub async fn kill(&mut self) -> Result<()> {
        if let Err(e) = self.child.start_kill() {
            warn!(error = %e, "Browser already gone");
        }
        let _ = self.child.wait().await;
        Ok(())
    }
}

/// Read the child's stderr until the `DevTools listening on ws://...` line
/// appears, then keep draining the pipe in the background so the browser
/// never blocks on a full stderr buffer.
async fn read_devtools_endpoint(
    mut stderr: BufReader<tokio::process::ChildStderr>,
) -> Result<String> {
    let mut line = String::new();
    loop {
        line.clear();
        let read = stderr.read_line(&mut line).await?;
        if read == 0 {
            return Err(PageletError::Launch(
                "Browser exited before publishing a DevTools endpoint".to_string(),
            ));
        }
        trace!(target: "pagelet::browser", "{}", line.trim_end());

        if let Some(endpoint) = parse_endpoint_line(&line) {
            tokio::spawn(async move {
                let mut sink = String::new();
                loop {
                    sink.clear();
                    match stderr.read_line(&mut sink).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => trace!(target: "pagelet::browser", "{}", sink.trim_end()),
                    }
                }
            });
            return Ok(endpoint);
        }
    }
}

fn parse_endpoint_line(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix("DevTools listening on ")?;
    rest.starts_with("ws://").then(|| rest.to_string())
}
