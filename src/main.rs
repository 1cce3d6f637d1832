mod cli;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

fn init_tracing(verbose: bool, quiet: bool) {
    let default_level = if quiet { "error" } else if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Serve(args) => cli::serve::run(args, config_path).await,
        Command::Backend(args) => cli::backend::run(args, config_path).await,
        Command::Verify(args) => cli::verify::run(args, config_path).await,
        Command::Doctor(args) => cli::doctor::run(args, config_path).await,
        Command::Clients(args) => cli::clients::run(args, config_path).await,
        Command::Memory(args) => cli::memory::run(args, config_path).await,
    }
}
