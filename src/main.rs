// ABOUTME: CLI entry point for crm-replicator
// ABOUTME: Parses commands, loads configuration and routes to the command handlers

use clap::{Parser, Subcommand};
use crm_replicator::commands::{self, CommandContext, WatermarkBackendKind};
use crm_replicator::config::SyncConfig;
use crm_replicator::sync::SyncMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "crm-replicator")]
#[command(about = "Incremental HubSpot CRM to PostgreSQL replication CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(
        long = "allow-self-signed-certs",
        global = true,
        default_value_t = false
    )]
    allow_self_signed_certs: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    /// Path to crm-replicator.toml (defaults to ./crm-replicator.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Target PostgreSQL connection string
    #[arg(long, env = "TARGET_DATABASE_URL", global = true, hide_env_values = true)]
    target: Option<String>,
    /// HubSpot private app token
    #[arg(long = "api-key", env = "HUBSPOT_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,
    /// Where to keep sync watermarks
    #[arg(long, value_enum, global = true, default_value = "postgres")]
    watermark_store: WatermarkBackendKind,
    /// SQLite watermark file (defaults to ~/.crm-replicator/watermarks.db)
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch records changed since the last sync and upsert them into the target
    Sync {
        /// Only sync these object types (repeatable; default: all configured)
        #[arg(long = "object")]
        objects: Vec<String>,
        /// Fetch every record instead of only those changed since the watermark
        #[arg(long)]
        full: bool,
    },
    /// Write CREATE TABLE scripts for object types, optionally applying them
    Provision {
        /// Only provision these object types (repeatable; default: all configured)
        #[arg(long = "object")]
        objects: Vec<String>,
        /// Execute the scripts against the target database
        #[arg(long)]
        apply: bool,
    },
    /// List the properties the source exposes for an object type
    Properties {
        #[arg(long = "object")]
        object_type: String,
    },
    /// Inspect or reset sync watermarks
    Watermark {
        #[command(flatten)]
        args: commands::watermark::WatermarkArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    // 3. Default to "info" if neither are provided
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    crm_replicator::postgres::connection::init_tls_policy(cli.allow_self_signed_certs);

    let config = SyncConfig::load_or_default(cli.config.as_deref())?;
    let ctx = CommandContext {
        config,
        api_key: cli.api_key,
        target_url: cli.target,
        watermark_backend: cli.watermark_store,
        state_file: cli.state_file,
    };

    match cli.command {
        Commands::Sync { objects, full } => {
            let mode = if full {
                SyncMode::Full
            } else {
                SyncMode::Incremental
            };
            commands::sync(&ctx, &objects, mode).await
        }
        Commands::Provision { objects, apply } => commands::provision(&ctx, &objects, apply).await,
        Commands::Properties { object_type } => commands::properties(&ctx, &object_type).await,
        Commands::Watermark { args } => commands::watermark::command(&ctx, args).await,
    }
}
