use clap::Parser;

use pagelet::cli::args::Cli;
use pagelet::cli::commands;
use pagelet::config::load_config;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.global_opts.verbose);

    let exit_code = match load_config(cli.global_opts.config.as_deref()) {
        Ok(config) => match commands::run(cli.run, config).await {
            Ok(code) => code,
            Err(e) => {
                eprintln!("{}", e);
                1
            }
        },
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

fn init_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
