use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PageletConfig {
    pub browser: BrowserConfig,
    pub bundler: BundlerConfig,
    pub server: ServerConfig,
    pub cache: CacheConfig,
}

/// Browser launch configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Browser executable override (same effect as PAGELET_BROWSER)
    pub executable: Option<PathBuf>,
    /// Extra command line switches appended to the launch invocation
    pub extra_args: Vec<String>,
}

/// Bundler configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BundlerConfig {
    /// esbuild executable override (same effect as PAGELET_ESBUILD)
    pub executable: Option<PathBuf>,
    /// Path to a browser build of a stack-mapping library
    /// (e.g. sourcemapped-stacktrace). Auto-discovered under
    /// ./node_modules when unset.
    pub stack_mapper: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Fixed serving port. An ephemeral port is used when unset.
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Keep the temporary bundle cache after the run instead of deleting it
    pub keep: bool,
}
