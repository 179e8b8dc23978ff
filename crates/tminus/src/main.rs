//! tminus: countdown reminders
//!
//! Main binary with subcommands:
//! - `daemon`: Restore countdown jobs and run the scheduler
//! - `list`: Print stored countdowns

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;
mod list;
mod telegram;

#[derive(Parser)]
#[command(name = "tminus")]
#[command(about = "Countdown reminders", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore countdown jobs and run the scheduler until Ctrl-C
    Daemon {
        /// Countdown store file
        #[arg(long, env = "TMINUS_STORE")]
        store: PathBuf,

        /// Telegram bot token; without one, notifications are only logged
        #[arg(long, env = "TMINUS_TELEGRAM_TOKEN")]
        telegram_token: Option<String>,

        /// Telegram Bot API base URL
        #[arg(long, env = "TMINUS_TELEGRAM_API_URL")]
        telegram_api_url: Option<String>,

        /// Chat id that receives startup and shutdown notices
        #[arg(long, env = "TMINUS_ADMIN_CHAT")]
        admin_chat: Option<i64>,
    },

    /// Print stored countdowns
    List {
        /// Countdown store file
        #[arg(long, env = "TMINUS_STORE")]
        store: PathBuf,

        /// Only show this owner's countdowns
        #[arg(long)]
        owner: Option<i64>,

        /// IANA timezone for target times
        #[arg(long, default_value = "UTC")]
        tz: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tminus=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            store,
            telegram_token,
            telegram_api_url,
            admin_chat,
        } => {
            daemon::run(daemon::DaemonConfig {
                store_path: store,
                telegram_token,
                telegram_api_url,
                admin_chat,
            })
            .await
        }

        Commands::List { store, owner, tz } => list::run(&store, owner, &tz).await,
    }
}
