use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::bundle::{create_bundle, locate_bundler, Entrypoint};
use crate::config::PageletConfig;
use crate::error::{PageletError, Result};
use crate::fsutil::{copy_files, dedupe_source_files, resolve_directory_entrypoints};
use crate::plugins::{Plugin, PluginSet};
use crate::sandbox::{LaunchConfig, Sandbox, StartupBundle};
use crate::server::serve_directory;
use crate::temporary::{create_cache, write_blank_html_page};

/// Default location of the in-page stack-mapping library, mirroring where
/// an npm install puts it.
const DEFAULT_STACK_MAPPER: &str =
    "node_modules/sourcemapped-stacktrace/dist/sourcemapped-stacktrace.js";

pub struct RunnerOptions {
    /// Extra `src[:servepath]` entries bundled lazily next to the
    /// entrypoints.
    pub bundle: Vec<String>,
    /// Extra `src[:servepath]` files served verbatim.
    pub serve: Vec<String>,
    /// Keep a visible browser window open for debugging.
    pub inspect: bool,
    /// Keep the temporary cache after the run.
    pub keep_cache: bool,
    /// Fixed serving port; an ephemeral port is picked when unset.
    pub port: Option<u16>,
    /// Ordered plugin chain.
    pub plugins: Vec<Arc<dyn Plugin>>,
    /// Fail the run with an error naming the exit code when it is
    /// non-zero, instead of returning the code.
    pub throw_on_nonzero: bool,
    pub config: PageletConfig,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            bundle: Vec::new(),
            serve: Vec::new(),
            inspect: false,
            keep_cache: false,
            port: None,
            plugins: Vec::new(),
            throw_on_nonzero: true,
            config: PageletConfig::default(),
        }
    }
}

#[derive(Debug)]
pub struct RunnerResult {
    pub exit_code: i32,
    pub cache_dir: PathBuf,
}

/// Run entrypoints in a disposable browser page and resolve their exit
/// code.
pub async fn run(
    entrypoint_args: &[String],
    script_args: &[String],
    options: RunnerOptions,
) -> Result<RunnerResult> {
    let cache = create_cache()?;
    let cache_dir = cache.path().to_path_buf();

    let outcome = execute(entrypoint_args, script_args, &options, &cache_dir).await;

    if options.keep_cache || options.config.cache.keep {
        let kept = cache.into_path();
        info!(cache = %kept.display(), "Temporary cache kept");
    }

    let exit_code = outcome?;
    if options.throw_on_nonzero && exit_code != 0 {
        return Err(PageletError::NonZeroExit { code: exit_code });
    }

    Ok(RunnerResult {
        exit_code,
        cache_dir,
    })
}

async fn execute(
    entrypoint_args: &[String],
    script_args: &[String],
    options: &RunnerOptions,
    cache_dir: &Path,
) -> Result<i32> {
    let plugin_set = PluginSet::new(options.plugins.clone(), script_args.to_vec());

    let additional_bundle_entries = resolve_directory_entrypoints(
        options.bundle.iter().map(|arg| Entrypoint::parse(arg)).collect(),
        |names| dedupe_source_files(names, true),
    )
    .await?;
    let additional_files_to_serve = resolve_directory_entrypoints(
        options.serve.iter().map(|arg| Entrypoint::parse(arg)).collect(),
        |names| names,
    )
    .await?;

    let entrypoints = plugin_set
        .resolve_entrypoints(
            entrypoint_args
                .iter()
                .map(|arg| Entrypoint::parse(arg))
                .collect(),
        )
        .await?;

    write_blank_html_page(&cache_dir.join("index.html"))?;

    let bundler = locate_bundler(options.config.bundler.executable.as_deref())?;

    info!("Bundling code");
    let mut startup_bundles = Vec::with_capacity(entrypoints.len());
    for (index, entry) in entrypoints.iter().enumerate() {
        let global_name = format!("__pagelet_bundle_{}", index);
        let bundled = match create_bundle(entry, cache_dir, &bundler, Some(&global_name)).await {
            Ok(bundled) => bundled,
            Err(e) => {
                info!("Bundling failed");
                return Err(e);
            }
        };
        startup_bundles.push(StartupBundle {
            serve_path: bundled.serving_path(),
            global_name,
        });
    }
    let mut lazy_bundles = Vec::with_capacity(additional_bundle_entries.len());
    for entry in &additional_bundle_entries {
        let bundled = match create_bundle(entry, cache_dir, &bundler, None).await {
            Ok(bundled) => bundled,
            Err(e) => {
                info!("Bundling failed");
                return Err(e);
            }
        };
        lazy_bundles.push(bundled);
    }
    info!("Bundling done");

    // Lazy bundles are written into the cache already; only extra files
    // still need copying next to them.
    copy_files(&additional_files_to_serve, cache_dir).await?;

    let port = options.port.or(options.config.server.port).unwrap_or(0);
    let server = serve_directory(cache_dir, port).await?;
    let server_url = server.url();

    let mut sandbox = Sandbox::launch(&LaunchConfig {
        executable: options.config.browser.executable.clone(),
        headless: !options.inspect,
        extra_args: options.config.browser.extra_args.clone(),
    })
    .await?;

    // Same-origin priming: land on the trusted serving origin before any
    // injection is permitted.
    sandbox.navigate(&format!("{}index.html", server_url)).await?;

    let stack_mapper = load_stack_mapper(&options.config);
    sandbox
        .run(
            script_args,
            &plugin_set,
            &server_url,
            &startup_bundles,
            stack_mapper.as_deref(),
        )
        .await?;

    let exit_code = match sandbox.wait_for_exit().await {
        Ok(code) => code,
        Err(PageletError::Script(script_error)) => {
            // The terminal failure is reported here; the exit code carries
            // it to the caller.
            eprintln!("{}", script_error);
            1
        }
        Err(other) => return Err(other),
    };

    sandbox.close().await?;
    server.close().await;

    Ok(exit_code)
}

fn load_stack_mapper(config: &PageletConfig) -> Option<String> {
    let path = config.bundler.stack_mapper.clone().or_else(|| {
        let default = PathBuf::from(DEFAULT_STACK_MAPPER);
        default.exists().then_some(default)
    })?;
    match std::fs::read_to_string(&path) {
        Ok(source) => Some(source),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Stack mapper not readable");
            None
        }
    }
}
