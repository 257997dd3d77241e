use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod ui;

#[derive(Parser)]
#[command(name = "sift")]
#[command(about = "Sync a mailbox and search it by keyword or meaning.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage connected mail accounts
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },

    /// Open a fresh sync window and index it
    InitSync {
        /// Account to sync
        #[arg(value_name = "ACCOUNT")]
        account: String,
    },

    /// Fetch changes since the last sync
    Sync {
        /// Accounts to sync. If omitted, syncs every account with a cursor.
        #[arg(value_name = "ACCOUNTS")]
        accounts: Vec<String>,
    },

    /// Search an account's mail
    Search {
        #[arg(value_name = "ACCOUNT")]
        account: String,

        /// Query text
        #[arg(value_name = "QUERY", required = true)]
        query: Vec<String>,

        /// Keyword match only, without embeddings
        #[arg(long)]
        text: bool,

        /// Maximum number of hits
        #[arg(long, short = 'n')]
        limit: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run periodic incremental syncs until interrupted
    Daemon,

    /// Show the effective configuration
    Config {
        /// Write the defaults to config.toml if it doesn't exist
        #[arg(long)]
        init: bool,
    },
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Add an account or replace its token
    Add {
        #[arg(value_name = "ID")]
        id: String,

        /// Provider access token. Prompted for if omitted.
        #[arg(long, env = "SIFT_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// List accounts and their sync state
    List {
        #[arg(long)]
        json: bool,
    },
    /// Remove an account and its stored mail
    Remove {
        #[arg(value_name = "ID")]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Account { command } => match command {
            AccountCommand::Add { id, token } => commands::account::add(&id, token).await,
            AccountCommand::List { json } => commands::account::list(json).await,
            AccountCommand::Remove { id } => commands::account::remove(&id).await,
        },
        Commands::InitSync { account } => commands::sync::initial(&account).await,
        Commands::Sync { accounts } => commands::sync::run(accounts).await,
        Commands::Search {
            account,
            query,
            text,
            limit,
            json,
        } => commands::search::run(&account, &query.join(" "), text, limit, json).await,
        Commands::Daemon => commands::daemon::run().await,
        Commands::Config { init } => commands::config(init),
    }
}
