use clap::{Args, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "pagelet")]
#[clap(version, about = "Run scripts and test suites in a disposable headless browser page")]
#[clap(after_help = "\
Examples:
  pagelet ./sample/greet.ts newbie
  pagelet --serve ./fixtures/test.json ./fetch-test.ts
  pagelet plugin:mocha ./test/*.test.ts

Everything after the entrypoint is passed to the script verbatim and is
readable inside the sandbox as pagelet.args.")]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, env = "PAGELET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run in an actual browser window and keep it open
    #[clap(long)]
    pub inspect: bool,

    /// Serve on this port. Defaults to an ephemeral port.
    #[clap(short, long)]
    pub port: Option<u16>,

    /// Serve additional files next to the bundle (src[:servepath])
    #[clap(long = "serve")]
    pub serve: Vec<String>,

    /// Bundle additional entries lazily, without running them (src[:servepath])
    #[clap(long = "bundle")]
    pub bundle: Vec<String>,

    /// Keep the temporary bundle cache after the run
    #[clap(long, env = "PAGELET_KEEP_CACHE")]
    pub keep_cache: bool,

    /// Script file to run, or plugin:<name>
    #[clap(value_name = "ENTRYPOINT")]
    pub entrypoint: String,

    /// Arguments passed to the script verbatim
    #[clap(value_name = "SCRIPT_ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    pub script_args: Vec<String>,
}
