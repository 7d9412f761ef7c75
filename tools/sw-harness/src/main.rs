//! Command-line harness for the Folio offline worker.
//!
//! Runs worker events against a cache document on disk, so state carries
//! over between invocations.
//!
//! ## Usage
//!
//! ```bash
//! # Seed the current cache from the live site
//! sw-harness --seed install
//!
//! # Drop stale cache generations
//! sw-harness activate
//!
//! # Fetch a page as the worker would, pretending the network is down
//! sw-harness fetch /photography --offline
//!
//! # Show what is cached
//! sw-harness caches
//!
//! # Move two open pages from v8 to v9 and print what they are told
//! sw-harness --cache-name v9 deploy --from v8 --page / --page /photography
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use folio_common::{init_logging, LogConfig, LogFormat};
use folio_net::{Fetcher, LoaderConfig, NetError, Request, ResourceLoader, Response};
use folio_sw::{
    CacheStorage, Clients, EventOutcome, EventTable, FileStorage, ServiceWorkerRuntime,
    WorkerConfig, WorkerContext, WorkerEvent,
};
use http::Method;
use tracing::{debug, info};
use url::Url;

#[derive(Parser)]
#[command(name = "sw-harness")]
#[command(about = "Run the Folio offline worker from the command line")]
struct Cli {
    /// Worker configuration (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Origin the worker is installed on
    #[arg(long, global = true)]
    origin: Option<Url>,

    /// Override the cache generation name
    #[arg(long, global = true)]
    cache_name: Option<String>,

    /// Seed on install regardless of origin
    #[arg(long, global = true)]
    seed: bool,

    /// Cache document
    #[arg(long, global = true, default_value = ".folio-sw/cache-storage.json")]
    store: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format: pretty, compact or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the install handler
    Install,

    /// Run the activate handler
    Activate,

    /// Route one request through the fetch handler
    Fetch {
        /// Path or absolute URL
        target: String,
        /// Request method
        #[arg(short = 'X', long, default_value = "GET")]
        method: Method,
        /// Fail every network request
        #[arg(long)]
        offline: bool,
    },

    /// List caches and their entries
    Caches,

    /// Replace the previous worker version with the current one
    Deploy {
        /// Generation the pages are running under. Defaults to the first
        /// other generation found in the store.
        #[arg(long)]
        from: Option<String>,
        /// Pages connected before the new version installs
        #[arg(long = "page")]
        pages: Vec<String>,
    },
}

/// Network that is always down.
struct OfflineFetcher;

#[async_trait]
impl Fetcher for OfflineFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        Err(NetError::RequestFailed(format!(
            "offline: {} {}",
            request.method, request.url
        )))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format))
        .context("failed to initialize logging")?;

    let config = build_config(&cli)?;
    let storage: Arc<dyn CacheStorage> = Arc::new(
        FileStorage::open_at(&cli.store)
            .await
            .with_context(|| format!("failed to open {}", cli.store.display()))?,
    );
    debug!(store = %cli.store.display(), cache = %config.cache_name, "Harness ready");

    match cli.command {
        Commands::Install => {
            let ctx = context(config, storage, false)?;
            let outcome = EventTable::standard()
                .dispatch(WorkerEvent::Install, &ctx)
                .await?;
            print_effects(&outcome);
        }

        Commands::Activate => {
            let ctx = context(config, storage, false)?;
            let outcome = EventTable::standard()
                .dispatch(WorkerEvent::Activate, &ctx)
                .await?;
            print_effects(&outcome);
        }

        Commands::Fetch {
            target,
            method,
            offline,
        } => {
            let url = resolve_target(&config, &target)?;
            let ctx = context(config, storage, offline)?;
            let outcome = EventTable::standard()
                .dispatch(WorkerEvent::Fetch(Request::new(method, url)), &ctx)
                .await?;
            print_effects(&outcome);
            print_response(&outcome);
        }

        Commands::Caches => {
            let names = storage.keys().await?;
            if names.is_empty() {
                println!("No caches");
            }
            for name in names {
                let current = if name == config.cache_name { " (current)" } else { "" };
                println!("{name}{current}");
                for entry in storage.entries(&name).await? {
                    println!(
                        "  {} {} {} ({} bytes)",
                        entry.method,
                        entry.url,
                        entry.status,
                        entry.body.len()
                    );
                }
            }
        }

        Commands::Deploy { from, pages } => {
            let fetcher = fetcher(&config, false)?;
            let report = deploy(config, storage, fetcher, from, &pages).await?;
            for line in &report.received {
                println!("{line}");
            }
            match &report.active {
                Some(version) => println!("active: {version}"),
                None => println!("active: none"),
            }
            if let Some(version) = &report.waiting {
                println!("waiting: {version}");
            }
        }
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<WorkerConfig> {
    let mut config = match (&cli.config, &cli.origin) {
        (Some(path), _) => WorkerConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        (None, Some(origin)) => WorkerConfig::for_origin(origin.clone()),
        (None, None) => WorkerConfig::default(),
    };

    if let (Some(_), Some(origin)) = (&cli.config, &cli.origin) {
        config.origin = origin.clone();
    }
    if let Some(name) = &cli.cache_name {
        config.cache_name = name.clone();
    }
    if cli.seed {
        config.seed_on_install = true;
    }

    config.validate()?;
    Ok(config)
}

fn resolve_target(config: &WorkerConfig, target: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(target) {
        return Ok(url);
    }
    if !target.starts_with('/') {
        bail!("expected an absolute URL or a path starting with '/', got {target:?}");
    }
    Ok(config.resolve(target)?)
}

fn fetcher(config: &WorkerConfig, offline: bool) -> Result<Arc<dyn Fetcher>> {
    if offline {
        return Ok(Arc::new(OfflineFetcher));
    }
    let loader = ResourceLoader::new(LoaderConfig::default().with_origin(config.origin.clone()))?;
    Ok(Arc::new(loader))
}

fn context(
    config: WorkerConfig,
    storage: Arc<dyn CacheStorage>,
    offline: bool,
) -> Result<WorkerContext> {
    let fetcher = fetcher(&config, offline)?;
    Ok(WorkerContext::new(
        config,
        storage,
        fetcher,
        Arc::new(Clients::new()),
    ))
}

/// What a deploy left behind.
#[derive(Debug, Default)]
struct DeployReport {
    /// Messages the connected pages received, one line per message.
    received: Vec<String>,
    active: Option<String>,
    waiting: Option<String>,
}

async fn deploy(
    config: WorkerConfig,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    from: Option<String>,
    pages: &[String],
) -> Result<DeployReport> {
    let (runtime, mut events) = ServiceWorkerRuntime::new(config.origin.clone());

    let mut inboxes = Vec::new();
    for page in pages {
        let url = resolve_target(&config, page)?;
        inboxes.push(runtime.connect(url).await);
    }

    let previous = match from {
        Some(name) => Some(name),
        None => storage
            .keys()
            .await?
            .into_iter()
            .find(|name| *name != config.cache_name),
    };

    if let Some(name) = previous.filter(|name| *name != config.cache_name) {
        info!(from = %name, to = %config.cache_name, "Starting from the previous generation");
        // Already installed once; only its activation matters here.
        let old = WorkerConfig {
            cache_name: name,
            seed_on_install: false,
            ..config.clone()
        };
        let ctx = WorkerContext::new(old, storage.clone(), fetcher.clone(), runtime.clients());
        runtime.register(ctx).await?;
    }

    let ctx = WorkerContext::new(config, storage, fetcher, runtime.clients());
    let report = runtime.register(ctx).await?;

    print_effects(&report.install);
    if let Some(activation) = &report.activation {
        print_effects(&activation.activate);
        if let Some(change) = &activation.controller_change {
            print_effects(change);
        }
    }

    while let Ok(event) = events.try_recv() {
        info!(?event, "Runtime event");
    }

    let mut received = Vec::new();
    for (id, inbox) in &mut inboxes {
        while let Ok(message) = inbox.try_recv() {
            received.push(format!(
                "page {} <- {}",
                id.raw(),
                serde_json::to_string(&message)?
            ));
        }
    }

    Ok(DeployReport {
        received,
        active: runtime.active_version().await,
        waiting: runtime.waiting_version().await,
    })
}

fn print_effects(outcome: &EventOutcome) {
    for effect in &outcome.effects {
        println!("{effect:?}");
    }
}

fn print_response(outcome: &EventOutcome) {
    let (Some(response), Some(source)) = (&outcome.response, outcome.source) else {
        println!("(not intercepted)");
        return;
    };
    println!(
        "{} {} via {:?} ({} bytes)",
        response.status_code(),
        response.url,
        source,
        response.body().len()
    );
}
