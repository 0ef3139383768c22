//! # Runbook Harness CLI (`rbh`)
//!
//! Queries every configured documentation source at once and prints
//! ranked, confidence-scored results.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rbh sources` | Health, circuit state, and document counts per source |
//! | `rbh search "<query>"` | Cross-source search |
//! | `rbh runbooks <alert_type>` | Runbooks for an alert |
//! | `rbh get <source> <id>` | Fetch one document |
//! | `rbh serve` | Start the JSON HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! rbh --config ./config/rbh.toml search "disk space" --category runbooks
//! rbh runbooks high_memory_usage --severity critical --system api-gateway
//! rbh serve --bind 0.0.0.0:7878
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use runbook_harness::models::{AlertContext, SearchFilters};
use runbook_harness::registry::SourceRegistry;
use runbook_harness::{cache, commands, config, server};

/// Runbook Harness: cross-source runbook retrieval for incident response.
#[derive(Parser)]
#[command(name = "rbh", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rbh.toml")]
    config: PathBuf,

    /// Log at debug level. `RBH_LOG` overrides either level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sources with health and circuit state.
    Sources,

    /// Search every source.
    Search {
        query: String,

        /// Only sources serving this category (repeatable).
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Drop documents older than this many days.
        #[arg(long)]
        max_age_days: Option<u32>,

        /// Minimum confidence, overriding each source's default.
        #[arg(long)]
        threshold: Option<f64>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Find runbooks for an alert.
    Runbooks {
        alert_type: String,

        #[arg(long, default_value = "high")]
        severity: String,

        /// Affected system (repeatable).
        #[arg(long = "system")]
        systems: Vec<String>,
    },

    /// Fetch one document from a named source.
    Get { source: String, id: String },

    /// Start the HTTP server.
    Serve {
        /// Overrides `[server] bind`.
        #[arg(long)]
        bind: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("RBH_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;
    let store = cache::from_config(&cfg.cache);
    let registry = SourceRegistry::from_config(&cfg, store)?;

    match cli.command {
        Commands::Sources => {
            commands::list_sources(&registry).await?;
        }
        Commands::Search {
            query,
            categories,
            max_age_days,
            threshold,
            limit,
        } => {
            let filters = SearchFilters {
                categories: (!categories.is_empty()).then_some(categories),
                max_age_days,
                confidence_threshold: threshold,
                limit,
            };
            commands::run_search(&registry, &query, filters).await?;
        }
        Commands::Runbooks {
            alert_type,
            severity,
            systems,
        } => {
            let alert = AlertContext::new(alert_type, severity).with_systems(systems);
            commands::run_runbooks(&registry, alert).await?;
        }
        Commands::Get { source, id } => {
            commands::run_get(&registry, &source, &id).await?;
        }
        Commands::Serve { bind } => {
            server::run_server(&cfg, registry, bind.as_deref()).await?;
        }
    }

    Ok(())
}
