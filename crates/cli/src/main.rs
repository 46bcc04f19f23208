mod commands;
mod logging;

use clap::{Parser, Subcommand};
use commands::*;
use logging::LoggingConfig;

#[derive(Parser)]
#[command(name = "dbmigrate")]
#[command(about = "Schema migrations for one or more PostgreSQL databases")]
#[command(version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace). RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a blank migration after the latest one
    Touch {
        /// Short description, used in the revision name
        #[arg(long, num_args = 1.., required = true)]
        name: Vec<String>,
    },

    /// Create the ledger table on every database
    Init,

    /// Apply pending migrations on every database
    Upgrade,

    /// Roll back the last applied migration on every database
    Downgrade,

    /// Write the schema of the first database to the schema file
    Dump,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(&LoggingConfig::new(cli.log_level, cli.json_logs))?;

    match cli.command {
        Commands::Touch { name } => migrate::touch(&name).await?,
        Commands::Init => migrate::init().await?,
        Commands::Upgrade => migrate::upgrade().await?,
        Commands::Downgrade => migrate::downgrade().await?,
        Commands::Dump => dump::run().await?,
    }

    Ok(())
}
