//! Command-line host for the SwKit service worker.
//!
//! Each run loads the saved caches, brings the configured worker up
//! (resuming it when its precache is already stored, installing it
//! otherwise), dispatches one command and saves the caches again, even
//! when the command failed.
//!
//! ## Usage
//!
//! ```bash
//! # Fetch through the worker; the second run is served from cache
//! swkit-host --config sw.json fetch / /app.js /api/items
//!
//! # Replay the queued request once, or with the configured backoff
//! swkit-host sync --tag sync-data
//! swkit-host sync --retry
//!
//! # Show a push notification and click it
//! swkit-host push '{"title": "New mail", "url": "/inbox"}' --click
//!
//! # Inspect the stored caches
//! swkit-host -v caches
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use swkit_cache::CacheStore;
use swkit_common::{init_logging, with_timeout, LogConfig, LogFormat, RetryConfig};
use swkit_net::{Fetcher, HttpFetcher, Request};
use swkit_worker::{
    Clients, NotificationCenter, ServiceWorkerGlobalScope, ServiceWorkerId,
    ServiceWorkerRegistration, WorkerConfig,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "swkit-host")]
#[command(about = "Drive an offline-first service worker from the command line")]
struct Cli {
    /// Worker config (JSON); built-in defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File the caches are kept in between runs
    #[arg(short, long, default_value = "swkit-caches.json")]
    store: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Give up on a command after this many seconds
    #[arg(long, default_value = "60")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch paths through the worker
    Fetch {
        /// Paths or URLs, resolved against the origin
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Fire a background sync event
    Sync {
        /// Sync tag (defaults to the configured one)
        #[arg(long)]
        tag: Option<String>,
        /// Retry rejections with the configured backoff instead of firing once
        #[arg(long)]
        retry: bool,
    },

    /// Deliver a push message
    Push {
        /// JSON payload: {"title", "body", "url"}
        payload: String,
        /// Click the notification once shown
        #[arg(long)]
        click: bool,
    },

    /// List caches and their entries
    Caches,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_verbosity(cli.verbose);
    if cli.json_logs {
        log_config = log_config.with_format(LogFormat::Json);
    }
    init_logging(log_config);

    let config = match &cli.config {
        Some(path) => WorkerConfig::load(path).map_err(|e| {
            error!(category = e.category(), path = %path.display(), "Config rejected");
            e
        })?,
        None => WorkerConfig::default(),
    };
    let caches = CacheStore::load(&cli.store)
        .await
        .with_context(|| format!("loading caches from {}", cli.store.display()))?;
    let timeout = Duration::from_secs(cli.timeout);

    let network: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.network)?);
    let (registration, _events) =
        ServiceWorkerRegistration::new(config.origin.clone(), network.clone());
    let scope = ServiceWorkerGlobalScope {
        config: Arc::new(config.clone()),
        caches: caches.clone(),
        fetcher: network,
        clients: Arc::new(Clients::new(config.origin.clone())),
        notifier: Arc::new(NotificationCenter::new()),
    };
    let worker = start(&registration, scope, &config, timeout).await?;
    info!(%worker, store = %cli.store.display(), "Worker ready");

    let outcome = run(cli.command, &registration, &caches, &config, timeout).await;

    caches
        .save(&cli.store)
        .await
        .with_context(|| format!("saving caches to {}", cli.store.display()))?;
    outcome
}

/// Dispatch one command to the running worker.
async fn run(
    command: Commands,
    registration: &ServiceWorkerRegistration,
    caches: &CacheStore,
    config: &WorkerConfig,
    timeout: Duration,
) -> anyhow::Result<()> {
    match command {
        Commands::Fetch { paths } => {
            for path in paths {
                let url = config
                    .resolve(&path)
                    .with_context(|| format!("bad path {path:?}"))?;
                let response =
                    with_timeout(timeout, || registration.fetch(Request::get(url.clone())))
                        .await??;
                let source = if response.is_from_cache() {
                    "cache"
                } else {
                    "network"
                };
                let status = response.status;
                let body = response.bytes().await?;
                println!("{status} {url} ({source}, {} bytes)", body.len());
            }
        }

        Commands::Sync { tag, retry } => {
            let tag = tag.unwrap_or_else(|| config.sync.tag.clone());
            let policy = if retry {
                config.sync.retry.to_retry_config()
            } else {
                RetryConfig::none()
            };
            match with_timeout(timeout, || registration.sync_with_policy(&tag, &policy)).await?? {
                Some(value) => println!("{tag}: {value}"),
                None => println!("{tag}: ignored"),
            }
        }

        Commands::Push { payload, click } => {
            let notification = registration.push(Some(Bytes::from(payload))).await?;
            println!(
                "Showing \"{}\": {}",
                notification.title, notification.options.body
            );
            if click {
                let client = registration.notification_click(notification).await?;
                println!("Window {} at {}", client.id, client.url);
            }
        }

        Commands::Caches => {
            for name in caches.keys().await {
                let keys = caches.open(&name).await.keys().await;
                println!("{name} ({} entries)", keys.len());
                for key in keys {
                    println!("  {key}");
                }
            }
        }
    }

    Ok(())
}

/// Resume the worker if its precache survived the last run, install it
/// otherwise.
async fn start(
    registration: &ServiceWorkerRegistration,
    scope: ServiceWorkerGlobalScope,
    config: &WorkerConfig,
    timeout: Duration,
) -> anyhow::Result<ServiceWorkerId> {
    if scope.caches.has(&config.precache_name).await {
        return Ok(registration.resume(scope).await?);
    }
    let id = with_timeout(timeout, || registration.update(scope))
        .await?
        .context("installing worker")?;
    Ok(id)
}
