mod archive;
mod dispatch;
mod email;
mod error;
mod format;
mod fx;
mod indicators;
mod market_data;
mod recommendation;
mod server;
mod storage_utils;
mod subscribers;
mod summary_table;
mod templates;

use crate::archive::{DigestArchive, FileArchive};
use crate::dispatch::{DigestPipeline, Providers};
use crate::format::{Currency, Locale};
use crate::storage_utils::{AppConfig, AsyncStorageManager, Secrets, load_config};
use crate::subscribers::{JsonSubscriberStore, Plan, Subscriber, SubscriberStore};
use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Parser)]
#[command(name = "metal-digest")]
#[command(about = "Daily AI metal signals digest", long_about = None)]
struct Cli {
    /// Storage directory (defaults to ./storage next to the binary)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the digest once (what the scheduler invokes)
    Run,
    /// Serve the manual trigger and the archive over HTTP
    Serve,
    /// Manage the subscriber store
    Subscribers {
        #[command(subcommand)]
        action: SubscriberAction,
    },
    /// List archived digests
    Archive,
}

#[derive(Subcommand)]
enum SubscriberAction {
    List,
    /// Add or replace a subscriber
    Add {
        email: String,
        #[arg(long, default_value = "pro")]
        plan: Plan,
        #[arg(long, default_value = "USD")]
        currency: Currency,
        #[arg(long, default_value = "en-US")]
        locale: Locale,
        /// Store the row as inactive
        #[arg(long)]
        inactive: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

async fn open_storage(dir: Option<PathBuf>) -> Result<AsyncStorageManager> {
    match dir {
        Some(dir) => AsyncStorageManager::new(dir).await,
        None => AsyncStorageManager::new_relative("storage").await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let storage = open_storage(cli.storage).await?;

    match cli.command {
        Commands::Run => run_once(storage).await,
        Commands::Serve => serve(storage).await,
        Commands::Subscribers { action } => manage_subscribers(storage, action).await,
        Commands::Archive => list_archive(storage).await,
    }
}

struct Wiring {
    config: AppConfig,
    secrets: Secrets,
    providers: Providers,
}

async fn wire(storage: &AsyncStorageManager) -> Result<Wiring> {
    let config = load_config(storage).await?;
    let secrets = Secrets::from_env()?;
    let providers = Providers::from_config(&config, &secrets, storage)?;
    Ok(Wiring {
        config,
        secrets,
        providers,
    })
}

async fn run_once(storage: AsyncStorageManager) -> Result<()> {
    let wiring = wire(&storage).await?;
    let pipeline = DigestPipeline::new(wiring.providers, wiring.config);

    // the run's one clock read
    let date = Utc::now().date_naive();
    let summary = pipeline.run(date).await?;
    summary_table::print(&summary);
    Ok(())
}

async fn serve(storage: AsyncStorageManager) -> Result<()> {
    let Wiring {
        config,
        secrets,
        providers,
    } = wire(&storage).await?;
    let trigger_secret = secrets
        .trigger_secret
        .ok_or_else(|| anyhow::anyhow!("TRIGGER_SECRET environment variable not set"))?;

    let state = server::AppState {
        archive: providers.archive.clone(),
        pipeline: Arc::new(DigestPipeline::new(providers, config.clone())),
        trigger_secret: Arc::from(trigger_secret),
        run_lock: Arc::new(Mutex::new(())),
    };
    server::serve(state, &config.server).await
}

async fn manage_subscribers(storage: AsyncStorageManager, action: SubscriberAction) -> Result<()> {
    let store = JsonSubscriberStore::new(storage);
    match action {
        SubscriberAction::List => {
            for sub in store.all().await? {
                println!(
                    "{:<32} {:<6} {:<5} {:<3} {}",
                    sub.email,
                    sub.plan,
                    sub.locale,
                    sub.currency,
                    if sub.active { "active" } else { "inactive" }
                );
            }
        }
        SubscriberAction::Add {
            email,
            plan,
            currency,
            locale,
            inactive,
        } => {
            let mut sub = Subscriber::new(email, plan, currency, locale);
            sub.active = !inactive;
            if let Some(existing) = store.get(&sub.email).await? {
                sub.stripe_id = existing.stripe_id;
                sub.stripe_customer_id = existing.stripe_customer_id;
            }
            store.upsert(sub).await?;
        }
    }
    Ok(())
}

async fn list_archive(storage: AsyncStorageManager) -> Result<()> {
    let archive = FileArchive::new(storage);
    let dates = archive.dates().await?;
    if dates.is_empty() {
        println!("No digests archived yet.");
    }
    for date in dates {
        println!("{}", date.format("%Y-%m-%d"));
    }
    Ok(())
}
