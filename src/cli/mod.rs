//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod serve;
pub mod status;
pub mod validate;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};

use labgate::config::{Config, RuntimeType};

#[derive(Parser)]
#[command(name = "labgate")]
#[command(version)]
#[command(about = "Command execution gateway for the Kafka lab terminal", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.labgate/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket gateway
    Serve {
        /// Listen port (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,
        /// Container runtime [daemon, cli]
        #[arg(long, value_name = "RUNTIME")]
        runtime: Option<RuntimeType>,
    },
    /// Check a command against the validator and print the decision as JSON
    Validate {
        /// The command, e.g. `labgate validate docker ps -a`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Show Docker engine status and running Kafka clusters
    Status,
    /// Print the canned command templates of a category
    Templates {
        /// kafka, jmx, docker or monitoring
        category: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    };
    config.with_context(|| "Failed to load configuration")
}

/// Parse arguments and run the selected command.
pub async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref())?;
    labgate::utils::logging::init_logging(&config.logging)?;

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Serve { port, runtime }) => {
            serve::cmd_serve(config, port, runtime).await?;
        }
        Some(Commands::Validate { command }) => {
            validate::cmd_validate(&config, &command.join(" "))?;
        }
        Some(Commands::Status) => {
            status::cmd_status(&config).await?;
        }
        Some(Commands::Templates { category }) => {
            status::cmd_templates(&category)?;
        }
    }

    Ok(())
}
