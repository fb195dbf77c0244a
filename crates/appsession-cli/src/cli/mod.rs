//! CLI entry and dispatch.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

mod commands;

#[derive(Parser)]
#[command(name = "appsession")]
#[command(version)]
#[command(about = "Run a script as an interactive session")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the config file (default: $APPSESSION_HOME/config.toml)
    #[arg(long, global = true, env = "APPSESSION_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run a script, streaming session messages to stdout as JSON lines
    Run {
        /// The script to run
        #[arg(value_name = "SCRIPT")]
        script: PathBuf,

        /// Query string for the first run
        #[arg(short, long, default_value = "")]
        query: String,

        /// Rerun whenever the script changes (overrides config)
        #[arg(long)]
        run_on_save: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    let result = rt.block_on(async move { dispatch(cli).await });
    // A pending stdin read would otherwise hold the runtime open.
    rt.shutdown_background();
    result
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            script,
            query,
            run_on_save,
        } => {
            commands::run::run(commands::run::RunOptions {
                script: &script,
                config_path,
                query,
                run_on_save,
            })
            .await
        }
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path(config_path);
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(config_path),
        },
    }
}
