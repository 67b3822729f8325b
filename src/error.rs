use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageletError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Browser / sandbox process errors
    #[error(
        "No usable browser found. Install Chromium or Google Chrome, \
         or point PAGELET_BROWSER at an executable."
    )]
    BrowserNotFound,

    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("DevTools protocol error: {0}")]
    DevTools(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Sandbox closed before reporting a result")]
    SandboxClosed,

    // Bundling errors
    #[error(
        "Bundler executable not found: {executable}\n\n\
         Try installing it:\n\n    npm install --save-dev esbuild\n\n\
         or point PAGELET_ESBUILD at an executable."
    )]
    BundlerNotFound { executable: String },

    #[error("Bundling failed for {entrypoint}:\n{stderr}")]
    Bundling { entrypoint: String, stderr: String },

    // Plugin errors
    #[error(
        "Unknown plugin: {name}\n\nRegistered plugins: {known}\n\n\
         Register the plugin on the runner before referencing it as plugin:{name}."
    )]
    PluginNotFound { name: String, known: String },

    #[error("Plugin '{plugin}' failed: {message}")]
    Plugin { plugin: String, message: String },

    // Script outcome errors
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("Script exited with code {code}")]
    NonZeroExit { code: i32 },

    // Server errors
    #[error("Static server error: {0}")]
    Server(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PageletError>;

/// An error thrown or rejected inside the sandbox, with its stack trace
/// resolved to host-relative source positions where possible.
///
/// This is the only error type a failed script run ever surfaces.
#[derive(Debug, Clone, Error)]
pub struct ScriptError {
    pub message: String,
    pub stack: Option<String>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Some(stack.into()),
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The stack, when present, already starts with the message line.
        match &self.stack {
            Some(stack) => write!(f, "{}", stack),
            None => write!(f, "{}", self.message),
        }
    }
}
