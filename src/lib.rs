pub mod app;
pub mod config;
pub mod ledger;
pub mod render;
pub mod search;
pub mod tmdb;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::App;
use crate::config::{Config, LedgerBackend};
use crate::ledger::{AppwriteStore, DocumentStore, PopularityLedger, SqliteStore};
use crate::search::{RunMode, SearchPipeline, UserError};
use crate::tmdb::{MovieProvider, TmdbClient};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Popularity store error: {0}")]
    Ledger(#[from] ledger::LedgerError),
    #[error("Movie provider error: {0}")]
    Provider(#[from] tmdb::TmdbError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The long-lived pieces, wired together from the configuration.
pub struct Services {
    pub config: Config,
    pub ledger: Arc<PopularityLedger>,
    pub pipeline: Arc<SearchPipeline>,
}

pub async fn bootstrap(config: Config) -> Result<Services, AppError> {
    config.validate()?;

    let store: Arc<dyn DocumentStore> = match config.ledger.backend {
        LedgerBackend::Sqlite => {
            let db_path = config.get_database_path();
            info!("Opening popularity database at {}", db_path);
            Arc::new(SqliteStore::new(&db_path).await?)
        }
        LedgerBackend::Appwrite => {
            let ids = config.appwrite_ids()?;
            info!(
                endpoint = %ids.endpoint,
                database = %ids.database_id,
                collection = %ids.collection_id,
                "Using Appwrite popularity store"
            );
            Arc::new(AppwriteStore::new(&ids)?)
        }
    };
    let ledger = Arc::new(PopularityLedger::new(store, &config.tmdb.image_base_url));

    let provider: Option<Arc<dyn MovieProvider>> = match config.tmdb_api_key() {
        Some(key) => Some(Arc::new(TmdbClient::new(&config.tmdb, key)?)),
        None => {
            warn!("No TMDB API key configured, movie searches will fail");
            None
        }
    };

    let pipeline = Arc::new(SearchPipeline::new(provider, Some(ledger.clone())));

    Ok(Services {
        config,
        ledger,
        pipeline,
    })
}

fn log_ledger_stats(ledger: &PopularityLedger) {
    let stats = ledger.stats();
    info!(
        records_written = stats.records_written,
        record_failures = stats.record_failures,
        trending_failures = stats.trending_failures,
        purged = stats.purged,
        "Popularity ledger statistics"
    );
    if stats.record_failures > 0 || stats.trending_failures > 0 {
        warn!("Trending searches are degraded, see earlier warnings");
    }
}

pub async fn run_interactive(config: Config) -> Result<(), AppError> {
    let services = bootstrap(config).await?;
    let mut app = App::new(
        services.pipeline.clone(),
        services.ledger.clone(),
        &services.config.tmdb.image_base_url,
        services.config.search.trending_limit,
        Duration::from_millis(services.config.search.debounce_ms),
    );

    app.startup().await;

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    app.run_interactive(stdin, &mut stdout).await?;

    log_ledger_stats(&services.ledger);
    Ok(())
}

pub async fn run_search<W: Write>(config: Config, query: &str, out: &mut W) -> Result<(), AppError> {
    let services = bootstrap(config).await?;
    let image_base_url = &services.config.tmdb.image_base_url;

    if let Some(run) = services.pipeline.run(query, RunMode::Normal).await {
        match run.result {
            Ok(ref movies) => {
                for movie in movies {
                    writeln!(out, "{}", render::movie_card(movie, image_base_url))?;
                }
            }
            Err(ref e) => {
                let error = UserError::from(e);
                writeln!(out, "{} {}", error.kind.icon(), error.message)?;
            }
        }
        if let Some(update) = run.ledger_update {
            ledger::join_record(update).await;
        }
    }

    log_ledger_stats(&services.ledger);
    Ok(())
}

pub async fn run_trending<W: Write>(config: Config, limit: Option<usize>, out: &mut W) -> Result<(), AppError> {
    let services = bootstrap(config).await?;
    let limit = limit.unwrap_or(services.config.search.trending_limit);
    let trending = services.ledger.top_trending(limit).await;
    writeln!(out, "{}", render::trending_list(&trending))?;
    Ok(())
}

pub async fn run_purge(config: Config, days: u32) -> Result<usize, AppError> {
    let services = bootstrap(config).await?;
    let removed = services
        .ledger
        .purge_older_than(chrono::Duration::days(i64::from(days)))
        .await?;
    Ok(removed)
}
