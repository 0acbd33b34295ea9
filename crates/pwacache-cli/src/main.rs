//! pwacache - command-line host for the pwacache core.
//!
//! Plays the hosting runtime: wires the core to a disk-backed store, a
//! `reqwest` fetcher, an in-process page registry and a log-only notifier,
//! then delivers one lifecycle event per invocation (or a stream of fetches
//! with `run`).

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use pwacache_core::config::{DEFAULT_APP_PREFIX, DEFAULT_VERSION};
use pwacache_core::{
    CacheConfig, ClientMessage, DeploymentMetadata, DiskCacheStorage, HostServices, HttpFetcher,
    Lifecycle, LogNotifier, NotificationPermission, PageRegistry, Request, ServiceWorker,
    SystemClock,
};

// ============================================================================
// Constants
// ============================================================================

/// Version baked in at build time; falls back to the stock version.
const RUNNING_VERSION: &str = match option_env!("PWACACHE_APP_VERSION") {
    Some(version) => version,
    None => DEFAULT_VERSION,
};

/// Subdirectory of the user cache dir holding the stores
const CACHE_DIR_NAME: &str = "pwacache";

const LOG_FILE_PREFIX: &str = "pwacache.log";

const USAGE: &str = "\
Usage: pwacache <command>

Commands:
  install                 Populate the current store and sweep old ones
  activate                Sweep, claim pages and run one update check
  fetch <url> [--navigate]  Route one request
  message <json>          Deliver a control message and print the reply
  maintain                Run one expiry + entry-limit pass
  info                    Print cache info (GET_CACHE_INFO)
  push [text]             Deliver a push message
  run                     Install, activate, then route URLs read from stdin

Environment:
  PWACACHE_SCOPE          Base URL of the application (required)
  PWACACHE_METADATA       Path to the deployment metadata document
  PWACACHE_CACHE_DIR      Store directory (default: user cache dir)
  PWACACHE_NOTIFICATIONS  granted | denied | prompt | unsupported
  PWACACHE_LOG_DIR        Also write a daily rolling log file here
  RUST_LOG                Log filter (default: warn)";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os("PWACACHE_LOG_DIR") {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    if matches!(command, "-h" | "--help" | "help") {
        println!("{}", USAGE);
        return Ok(());
    }

    let worker = build_worker()?;
    info!(command, version = RUNNING_VERSION, "pwacache starting");

    let result = match command {
        "install" => install(&worker).await,
        "activate" => activate(&worker).await,
        "fetch" => {
            let target = args.get(1).context("fetch needs a URL")?;
            let navigate = args.iter().skip(2).any(|a| a == "--navigate");
            fetch(&worker, target, navigate).await
        }
        "message" => {
            let raw = args.get(1).context("message needs a JSON document")?;
            let message: Value = serde_json::from_str(raw).context("Invalid message JSON")?;
            deliver(&worker, message).await
        }
        "maintain" => maintain(&worker).await,
        "info" => deliver(&worker, serde_json::json!({ "type": "GET_CACHE_INFO" })).await,
        "push" => push(&worker, args.get(1).cloned()).await,
        "run" => run(&worker).await,
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    };

    worker.shutdown().await;
    result
}

// ============================================================================
// Wiring
// ============================================================================

fn build_worker() -> Result<ServiceWorker> {
    let config = load_config()?;

    let root = cache_root()?;
    let storage = DiskCacheStorage::new(root.clone())
        .with_context(|| format!("Failed to open store directory: {}", root.display()))?;
    debug!(root = %storage.root().display(), "Using disk stores");
    let fetcher = HttpFetcher::new(config.scope()).context("Failed to build HTTP client")?;

    let host = HostServices {
        storage: Arc::new(storage),
        fetcher: Arc::new(fetcher),
        clients: Arc::new(PageRegistry::new()),
        notifier: Arc::new(LogNotifier::new(notification_permission())),
        clock: Arc::new(SystemClock),
    };

    Ok(ServiceWorker::new(config, host)?)
}

fn load_config() -> Result<CacheConfig> {
    let scope = std::env::var("PWACACHE_SCOPE")
        .context("PWACACHE_SCOPE must be set to the application's base URL")?;
    let mut config = CacheConfig::new(DEFAULT_APP_PREFIX, RUNNING_VERSION, &scope)?;

    if let Ok(path) = std::env::var("PWACACHE_METADATA") {
        let metadata = DeploymentMetadata::load(Path::new(&path))?;
        config = config.apply_metadata(&metadata);
    }
    Ok(config)
}

fn cache_root() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("PWACACHE_CACHE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    DiskCacheStorage::default_root(CACHE_DIR_NAME)
        .context("No user cache directory; set PWACACHE_CACHE_DIR")
}

fn notification_permission() -> NotificationPermission {
    match std::env::var("PWACACHE_NOTIFICATIONS").as_deref() {
        Ok("granted") => NotificationPermission::Granted,
        Ok("denied") => NotificationPermission::Denied,
        Ok("unsupported") => NotificationPermission::Unsupported,
        _ => NotificationPermission::Prompt,
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn install(worker: &ServiceWorker) -> Result<()> {
    let outcome = worker.on_install().await;
    let requested = worker.config().precache_urls().len();
    println!(
        "Installed {}: cached {}/{} resources, removed {} old stores",
        worker.config().store_name(),
        outcome.cached.len(),
        requested,
        outcome.stale_deleted
    );
    Ok(())
}

async fn activate(worker: &ServiceWorker) -> Result<()> {
    let outcome = worker.on_activate().await;
    worker.settle().await;
    println!(
        "Activated {}: removed {} old stores, {} expired entries, claimed {} pages",
        worker.config().store_name(),
        outcome.stale_deleted,
        outcome.expired,
        outcome.claimed
    );
    Ok(())
}

async fn fetch(worker: &ServiceWorker, target: &str, navigate: bool) -> Result<()> {
    let url = resolve(worker, target)?;
    let request = if navigate {
        Request::navigate(url)
    } else {
        Request::get(url)
    };
    print_fetch(worker, request).await;
    Ok(())
}

async fn print_fetch(worker: &ServiceWorker, request: Request) {
    let strategy = worker.router().classify(&request);
    let url = request.url.clone();
    let response = worker.on_fetch(request).await;
    let source = if response.from_cache { "store" } else { "network" };
    if response.is_network_error() {
        println!("{} {} network error", url, strategy);
    } else {
        println!(
            "{} {} {} {} ({} bytes, {})",
            url,
            strategy,
            response.status,
            response.status_text,
            response.body.len(),
            source
        );
    }
}

async fn deliver(worker: &ServiceWorker, message: Value) -> Result<()> {
    let expects_reply = ClientMessage::from_value(&message)
        .map(|m| m.expects_reply())
        .unwrap_or(false);

    if !expects_reply {
        worker.on_message(message, None).await;
        worker.settle().await;
        println!("Delivered (no reply)");
        return Ok(());
    }

    let (tx, rx) = oneshot::channel();
    worker.on_message(message, Some(tx)).await;
    let reply = rx.await.context("No reply received")?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

async fn maintain(worker: &ServiceWorker) -> Result<()> {
    let report = worker.on_maintenance().await;
    println!(
        "Maintenance: {} expired, {} evicted",
        report.expired, report.evicted
    );
    Ok(())
}

async fn push(worker: &ServiceWorker, payload: Option<String>) -> Result<()> {
    match worker.on_push(payload).await {
        Ok(()) => println!("Notification shown"),
        Err(e) => println!("Notification not shown: {}", e),
    }
    Ok(())
}

async fn run(worker: &ServiceWorker) -> Result<()> {
    install(worker).await?;
    activate(worker).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let target = line.trim();
        if target.is_empty() {
            continue;
        }
        match resolve(worker, target) {
            Ok(url) => print_fetch(worker, Request::get(url)).await,
            Err(e) => eprintln!("Skipping '{}': {}", target, e),
        }
    }
    Ok(())
}

/// Absolute URLs pass through; anything else is taken relative to the scope.
fn resolve(worker: &ServiceWorker, target: &str) -> Result<Url> {
    worker
        .config()
        .scope()
        .join(target)
        .with_context(|| format!("Invalid URL: {}", target))
}
