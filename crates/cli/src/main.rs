//! diagmon: runs collection rules against a target process and egresses
//! the artifacts they collect.

mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "diagmon", version, about, long_about = None)]
struct Cli {
    /// Directory containing `.diagmon/`
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Raise log verbosity (-v debug, -vv trace); `RUST_LOG` takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check every collection rule and report the invalid ones
    Validate,

    /// List the configured egress providers
    Providers,

    /// Run the collection rules against a simulated target process
    Run(commands::RunArgs),
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Validate => commands::validate(&cli.root).await,
        Command::Providers => commands::providers(&cli.root).await,
        Command::Run(args) => commands::run(&cli.root, args).await,
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
