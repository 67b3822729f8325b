use std::sync::Arc;

use tracing::info;

use crate::cli::args::RunArgs;
use crate::config::PageletConfig;
use crate::error::Result;
use crate::plugins::{is_plugin_argument, Plugin, PluginRegistry};
use crate::runner::{self, RunnerOptions};

/// Registry consulted for `plugin:<name>` entrypoints. Empty out of the
/// box; library users embedding the CLI register their own.
fn default_registry() -> PluginRegistry {
    PluginRegistry::new()
}

/// Run the entrypoint and return the process exit code.
pub async fn run(args: RunArgs, config: PageletConfig) -> Result<i32> {
    let mut plugins: Vec<Arc<dyn Plugin>> = Vec::new();
    let mut entrypoints: Vec<String> = Vec::new();

    if is_plugin_argument(&args.entrypoint) {
        let plugin = default_registry().resolve(&args.entrypoint)?;

        if args.script_args.iter().any(|arg| arg == "--help") {
            print_plugin_help(plugin.as_ref(), &args.script_args);
            return Ok(0);
        }
        // The plugin supplies the entrypoints through its hook.
        plugins.push(plugin);
    } else {
        entrypoints.push(args.entrypoint.clone());
    }

    info!(entrypoint = %args.entrypoint, "Starting run");

    let options = RunnerOptions {
        bundle: args.bundle,
        serve: args.serve,
        inspect: args.inspect,
        keep_cache: args.keep_cache,
        port: args.port,
        plugins,
        // The CLI reports the code itself instead of erroring on it.
        throw_on_nonzero: false,
        config,
    };

    match runner::run(&entrypoints, &args.script_args, options).await {
        Ok(result) => {
            if result.exit_code > 0 {
                println!("Script exited with exit code {}.", result.exit_code);
            }
            Ok(result.exit_code)
        }
        Err(e) if args.inspect => {
            // Inspect mode reports the failure but keeps the browser (and
            // this process) alive for debugging.
            eprintln!("{}", e);
            let _ = tokio::signal::ctrl_c().await;
            Ok(1)
        }
        Err(e) => Err(e),
    }
}

fn print_plugin_help(plugin: &dyn Plugin, script_args: &[String]) {
    match plugin.help(script_args) {
        Some(help) => println!("{}", help.trim()),
        None => println!("{}\n\nNo plugin help available.", plugin.name()),
    }
}
