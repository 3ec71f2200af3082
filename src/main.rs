//! CLI entry point for the waiting room.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, info};
use waiting_room::cache::{CacheStore, SqliteCacheStore};
use waiting_room::content::{ContentRepository, SqliteContentStore, Viewer};
use waiting_room::context::{ContextResolver, ResolveRequest, SiteUrls};
use waiting_room::downloads::{DRAIN_JOB_NAME, DownloadQueue, DownloadQueueDrain};
use waiting_room::purge::{ContentChange, PurgeExecutor, PurgePlanner};
use waiting_room::scheduler::{DEFAULT_TICK, JobStore, QueueScheduler, SqliteJobStore};
use waiting_room::service::edge_purger;
use waiting_room::token::{TokenConfig, TokenService};
use waiting_room::{Clock, Database, Settings, SystemClock};

mod app_config;
mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let settings = build_settings(&args)?;
    let db = Database::new(&settings.database_path)
        .await
        .with_context(|| {
            format!(
                "Failed to open database '{}'",
                settings.database_path.display()
            )
        })?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let result = run(args.command, &settings, db.clone(), clock).await;
    db.close().await;
    result
}

fn build_settings(args: &Args) -> Result<Settings> {
    let mut settings = Settings::default();
    if let Some(file) = app_config::load_file_config(args.config.as_deref())? {
        file.apply(&mut settings);
    }
    if let Some(path) = &args.db {
        settings.database_path.clone_from(path);
    }
    if let Some(base_url) = &args.base_url {
        settings.base_url.clone_from(base_url);
    }
    if let Some(mode) = args.security_mode {
        settings.security_mode = mode.into();
    }
    if let Ok(token) = std::env::var(app_config::PURGE_TOKEN_ENV)
        && !token.is_empty()
    {
        settings.purge_api_token = Some(token);
    }
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

async fn run(command: Command, settings: &Settings, db: Database, clock: Arc<dyn Clock>) -> Result<()> {
    let content: Arc<dyn ContentRepository> = Arc::new(SqliteContentStore::new(db.clone()));
    let urls = SiteUrls::new(&settings.base_url)?;

    match command {
        Command::Resolve {
            slug,
            version,
            external,
            target,
        } => {
            let request = match external {
                Some(kind) => ResolveRequest::external(slug, kind.into(), target),
                None => ResolveRequest {
                    version_id: version,
                    ..ResolveRequest::latest(slug)
                },
            };
            let resolver = ContextResolver::new(content, urls);
            match resolver.resolve(&request, &Viewer::Anonymous).await {
                Ok(context) => println!("{}", serde_json::to_string_pretty(&context)?),
                Err(error) => bail!("{error}"),
            }
        }
        Command::Purge {
            content: content_id,
            version,
            thread,
        } => {
            let change = match (content_id, thread) {
                (Some(content_id), _) => ContentChange::for_content(content_id, version),
                (None, Some(thread_id)) => ContentChange::ThreadSaved { thread_id },
                (None, None) => bail!("Either --content or --thread is required"),
            };
            let cache: Arc<dyn CacheStore> = Arc::new(SqliteCacheStore::new(db, clock));
            let executor = PurgeExecutor::new(
                PurgePlanner::new(content, urls),
                edge_purger(settings)?,
                Some(cache),
                settings.purge_timeout(),
            );
            let plan = executor.execute(&change).await.context("Purge failed")?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Command::Schedule { once } => {
            let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(db.clone(), Arc::clone(&clock)));
            let scheduler = QueueScheduler::new(store);
            let drain = DownloadQueueDrain::new(
                DownloadQueue::new(db.clone(), Arc::clone(&clock)),
                settings.drain_batch_size,
            )
            .with_token_pruning(token_service(settings, &db, &clock))
            .with_cache_pruning(SqliteCacheStore::new(db, Arc::clone(&clock)));

            let outcome = scheduler
                .ensure_scheduled(DRAIN_JOB_NAME, settings.drain_interval(), Arc::new(drain))
                .await?;
            println!("{DRAIN_JOB_NAME}: {outcome}");

            if !once {
                info!("scheduler running, press Ctrl+C to stop");
                scheduler
                    .run_until(DEFAULT_TICK, async {
                        let _ = tokio::signal::ctrl_c().await;
                    })
                    .await;
            }
        }
        Command::Prune => {
            let tokens = token_service(settings, &db, &clock).prune_expired().await?;
            let pages = SqliteCacheStore::new(db, clock).prune_expired().await?;
            println!(
                "pruned tokens={} requests={} permissions={} pages={pages}",
                tokens.tokens, tokens.requests, tokens.permissions
            );
        }
    }
    Ok(())
}

fn token_service(settings: &Settings, db: &Database, clock: &Arc<dyn Clock>) -> TokenService {
    TokenService::new(
        db.clone(),
        Arc::clone(clock),
        TokenConfig::from_settings(settings),
    )
}
