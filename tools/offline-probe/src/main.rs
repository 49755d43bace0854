//! Command-line harness for the GymDesk offline worker.
//!
//! Drives a worker against a real origin and a file-backed cache, so the
//! caching behavior can be inspected without a browser.
//!
//! ## Usage
//!
//! ```bash
//! # Pre-cache the manifest, then drop old cache versions
//! offline-probe --config gymdesk.json activate
//!
//! # Fetch through the worker as a page navigation
//! offline-probe fetch http://localhost:3000/members --navigate
//!
//! # List cache namespaces in the database
//! offline-probe namespaces
//!
//! # Render a push payload
//! offline-probe push '{"title": "Payment due"}'
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gymdesk_cache::CacheStorage;
use gymdesk_core::{init_logging, LogConfig, LogFormat, OfflineConfig};
use gymdesk_net::{Fetcher, HttpFetcher, LoaderConfig, Request};
use gymdesk_sw::{EventReply, ExtendableEvent, OfflineWorker, PlatformEvent};
use http::Method;
use tracing::{debug, Level};

#[derive(Parser)]
#[command(name = "offline-probe")]
#[command(about = "Command-line harness for the GymDesk offline worker")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache database path (defaults to the configured storage path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log output format: pretty, compact or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log filter directives, e.g. "gymdesk_sw=trace" (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pre-cache the install manifest
    Install,

    /// Install, then delete cache namespaces from other versions
    Activate,

    /// Fetch a URL through the worker
    Fetch {
        /// Absolute URL
        url: String,
        /// Treat the request as a page navigation
        #[arg(long)]
        navigate: bool,
        /// HTTP method
        #[arg(long, default_value = "GET")]
        method: String,
    },

    /// List cache namespaces in storage
    Namespaces,

    /// Render a push payload as a notification
    Push {
        /// Raw payload, usually a JSON object
        payload: Option<String>,
    },

    /// Print the primary cache namespace
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let mut log_config = LogConfig::default()
        .with_level(level)
        .with_format(cli.log_format);
    if let Some(filter) = &cli.log_filter {
        log_config = log_config.with_filter(filter.as_str());
    }
    init_logging(log_config)?;

    let config = match &cli.config {
        Some(path) => OfflineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => OfflineConfig::default(),
    };
    let db = cli.db.clone().unwrap_or_else(|| config.storage_path());
    debug!(db = %db.display(), "Opening cache storage");
    let storage = CacheStorage::open_path(&db)
        .with_context(|| format!("opening cache database {}", db.display()))?;
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(LoaderConfig::default())?);
    let (worker, _events) = OfflineWorker::new(config, storage, Arc::clone(&fetcher));

    match cli.command {
        Commands::Install => {
            worker.handle_install().await?;
            println!("Installed {}", worker.version());
        }

        Commands::Activate => {
            worker.handle_install().await?;
            let deleted = worker.handle_activate().await?;
            println!("Activated {}", worker.version());
            for namespace in deleted {
                println!("  deleted {}", namespace);
            }
        }

        Commands::Fetch {
            url,
            navigate,
            method,
        } => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .context("invalid HTTP method")?;
            let url = url.parse().context("invalid URL")?;
            let mut request = if navigate {
                Request::navigate(url)
            } else {
                Request::get(url)
            };
            request.method = method;

            let lifetime = ExtendableEvent::new();
            let reply = worker
                .dispatch(PlatformEvent::Fetch(request.clone()), &lifetime)
                .await?;
            let response = match reply {
                EventReply::Fetch(Some(response)) => response,
                _ => {
                    println!("(not intercepted, fetched directly)");
                    fetcher.fetch(&request).await?
                }
            };
            lifetime.settled().await;

            println!("{}", response.status);
            for (name, value) in &response.headers {
                println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
            }
            println!();
            println!("{}", String::from_utf8_lossy(&response.body));
        }

        Commands::Namespaces => {
            let current = worker.namespaces();
            for namespace in worker.storage().list_namespaces().await? {
                let marker = if current.contains(&namespace) { "*" } else { " " };
                println!("{} {}", marker, namespace);
            }
        }

        Commands::Push { payload } => {
            let id = worker
                .handle_push(payload.as_deref().map(str::as_bytes))
                .await;
            let notifications = worker.notifications().read().await;
            if let Some(notification) = notifications.get(id) {
                println!("{}", serde_json::to_string_pretty(notification)?);
            }
        }

        Commands::Version => {
            println!("{}", worker.version());
        }
    }

    Ok(())
}
