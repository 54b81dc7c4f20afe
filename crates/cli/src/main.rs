//! EC Relate CLI - Database migrations and maintenance tools.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! ec-relate-cli migrate
//!
//! # Delete unused pending registrations older than 30 days
//! ec-relate-cli pending-users prune --older-than-days 30
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "ec-relate-cli")]
#[command(author, version, about = "EC Relate bridge CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Manage pending registrations
    PendingUsers {
        #[command(subcommand)]
        action: PendingAction,
    },
}

#[derive(Subcommand)]
enum PendingAction {
    /// Delete pending registrations that were never promoted
    Prune {
        /// Minimum age in days
        #[arg(long, default_value_t = 30)]
        older_than_days: u32,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::PendingUsers { action } => match action {
            PendingAction::Prune { older_than_days } => {
                commands::pending::prune(older_than_days).await?;
            }
        },
    }
    Ok(())
}
