//! CLI for running sync passes against a listing store.
//!
//! Prints pass reports as JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use listing_sync::config::{BackendKind, FetcherKind, SyncConfig};
use listing_sync::{
    DocumentStore, Extractor, HttpFetcher, ListingStore, PassKind, Pruner, Reconciler,
    RelationalStore, SelectorExtractor,
};

#[derive(Parser)]
#[command(name = "listing-sync")]
#[command(about = "Keep course discount listings in sync with their pages")]
struct Cli {
    /// Store backend (overrides STORE_BACKEND)
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh expiry and discount on every listing
    Scalars,

    /// Add categories to listings that have an expiry
    Categories,

    /// Delete listings that never got an expiry
    Prune,

    /// Register listings by URL
    Seed {
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Print a listing as JSON
    Show { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,listing_sync=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .init();

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env()?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    tracing::info!(backend = %config.backend, "Opening store");
    match config.backend {
        BackendKind::Relational => {
            let store = RelationalStore::new(&config.database_url)
                .await
                .context("Failed to open relational store")?;
            run(store, &config, cli.command).await
        }
        BackendKind::Document => {
            let store = DocumentStore::new(&config.database_url)
                .await
                .context("Failed to open document store")?;
            run(store, &config, cli.command).await
        }
    }
}

/// Execute a command and close the store whatever the outcome.
async fn run<S>(store: S, config: &SyncConfig, command: Commands) -> Result<()>
where
    S: ListingStore + 'static,
    S::Key: Serialize,
{
    let store = Arc::new(store);
    let outcome = execute(Arc::clone(&store), config, command).await;
    store.close().await;
    outcome
}

async fn execute<S>(store: Arc<S>, config: &SyncConfig, command: Commands) -> Result<()>
where
    S: ListingStore + 'static,
    S::Key: Serialize,
{
    match command {
        Commands::Scalars => run_pass(store, config, PassKind::Scalars).await,
        Commands::Categories => run_pass(store, config, PassKind::Categories).await,
        Commands::Prune => {
            let report = Pruner::new(store).run().await?;
            println!("Removed {}", report);
            Ok(())
        }
        Commands::Seed { urls } => {
            for url in urls {
                let listing = store
                    .seed(&url)
                    .await
                    .with_context(|| format!("Failed to seed {}", url))?;
                println!("{}\t{}", listing.key, listing.source_url);
            }
            Ok(())
        }
        Commands::Show { url } => {
            let listing = store
                .find_by_url(&url)
                .await?
                .with_context(|| format!("No listing for {}", url))?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
            Ok(())
        }
    }
}

async fn run_pass<S>(store: Arc<S>, config: &SyncConfig, pass: PassKind) -> Result<()>
where
    S: ListingStore + 'static,
{
    let extractor = build_extractor(config)?;
    let reconciler = Reconciler::new(store, extractor).with_pacing(config.pacing);

    let report = reconciler
        .run(pass)
        .await
        .with_context(|| format!("{} pass aborted", pass))?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn build_extractor(config: &SyncConfig) -> Result<Arc<dyn Extractor>> {
    let selectors = config.selectors()?;

    match config.fetcher {
        FetcherKind::Http => {
            let mut fetcher = HttpFetcher::new().context("Failed to build HTTP client")?;
            if let Some(user_agent) = &config.user_agent {
                fetcher = fetcher.with_user_agent(user_agent);
            }

            let mut extractor = SelectorExtractor::new(fetcher).with_selectors(selectors);
            if let Some(timeout) = config.page_timeout {
                extractor = extractor.with_timeout(timeout);
            }
            Ok(Arc::new(extractor))
        }
        FetcherKind::Firecrawl => firecrawl_extractor(config, selectors),
    }
}

#[cfg(feature = "firecrawl")]
fn firecrawl_extractor(
    config: &SyncConfig,
    selectors: listing_sync::ExtractionSelectors,
) -> Result<Arc<dyn Extractor>> {
    use listing_sync::FirecrawlFetcher;
    use secrecy::ExposeSecret;

    let key = config
        .firecrawl_api_key
        .as_ref()
        .context("FIRECRAWL_API_KEY must be set")?;
    let fetcher = FirecrawlFetcher::new(key.expose_secret())
        .context("Failed to build Firecrawl client")?;

    let mut extractor = SelectorExtractor::new(fetcher).with_selectors(selectors);
    if let Some(timeout) = config.page_timeout {
        extractor = extractor.with_timeout(timeout);
    }
    Ok(Arc::new(extractor))
}

#[cfg(not(feature = "firecrawl"))]
fn firecrawl_extractor(
    _config: &SyncConfig,
    _selectors: listing_sync::ExtractionSelectors,
) -> Result<Arc<dyn Extractor>> {
    anyhow::bail!("FETCHER=firecrawl requires building with the `firecrawl` feature")
}
