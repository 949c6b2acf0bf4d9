mod cmd;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "relayd",
    about = "Relay state coordination engine — serialized relay control over HTTP/WebSocket",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to the relay configuration file (defaults apply if omitted)
    #[arg(long, global = true, env = "RELAYD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine and serve the HTTP/WebSocket API
    Serve {
        /// Listen address, overriding the configured one
        #[arg(long)]
        listen: Option<String>,

        /// Drive in-memory relay lines instead of real hardware
        #[arg(long)]
        simulate: bool,
    },

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Serve { listen, simulate } => {
            cmd::serve::run(cli.config.as_deref(), listen.as_deref(), simulate)
        }
        Commands::Config { subcommand } => cmd::config::run(cli.config.as_deref(), subcommand),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
