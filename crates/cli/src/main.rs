//! Mnemo CLI - the main entry point.
//!
//! Commands:
//! - `serve`    - Start the HTTP gateway and the background retention reaper
//! - `chat`     - Send one message through the memory lifecycle
//! - `sweep`    - Run one retention sweep now and print its statistics
//! - `inspect`  - Show the memory projection of one session
//! - `config`   - Initialize, show or validate configuration
//! - `status`   - Show system status

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "mnemo",
    about = "Mnemo - conversation memory for customer-service agents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (and the retention reaper unless disabled)
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not run the background retention reaper
        #[arg(long)]
        no_reaper: bool,
    },

    /// Send a single message as a user
    Chat {
        /// The user the conversation belongs to
        #[arg(short, long)]
        user: String,

        /// Continue an existing session instead of starting a new one
        #[arg(short, long)]
        session: Option<String>,

        /// The message to send
        message: String,
    },

    /// Run one retention sweep and print the statistics
    Sweep {
        /// Print the statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show what the memory layer knows about a session
    Inspect {
        user_id: String,
        session_id: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
    /// Check the configuration for errors
    Validate,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port, no_reaper } => commands::serve::run(port, no_reaper).await?,
        Commands::Chat {
            user,
            session,
            message,
        } => commands::chat::run(&user, session, &message).await?,
        Commands::Sweep { json } => commands::sweep::run(json).await?,
        Commands::Inspect {
            user_id,
            session_id,
        } => commands::inspect::run(&user_id, &session_id).await?,
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::config_cmd::init(force).await?,
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
        },
        Commands::Status => commands::status::run().await?,
    }

    Ok(())
}
