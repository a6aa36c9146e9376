mod commands;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing_subscriber::EnvFilter;

use commands::simulate::SimulateArgs;
use commands::validate::ValidateArgs;

/// Validate and simulate dynamic fan-out pipelines
#[derive(Parser, Debug)]
#[command(name = "fanout")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a pipeline file and print each block's fan-out role
    Validate(ValidateArgs),

    /// Run a pipeline against fixture outputs and print the block runs
    Simulate(SimulateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Validate(args) => commands::validate::execute(args),
        Command::Simulate(args) => commands::simulate::execute(args).await,
    }
}
