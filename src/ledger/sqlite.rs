use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::model::*;
use super::repo::*;

const COLUMNS: &str = "id, search_term, count, movie_id, title, poster_url, first_seen, last_seen";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(db_path: &str) -> LedgerResult<Self> {
        let in_memory = db_path.contains(":memory:");
        let options = SqliteConnectOptions::from_str(db_path)?.create_if_missing(true);

        // Every connection to an in-memory database sees its own database,
        // so keep exactly one alive for the lifetime of the pool.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await?;

        let store = Self { pool };
        store.init_schema().await?;

        info!("Popularity database initialized at {}", db_path);

        Ok(store)
    }

    pub async fn in_memory() -> LedgerResult<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn init_schema(&self) -> LedgerResult<()> {
        let schema = include_str!("schema.sql");
        sqlx::raw_sql(schema).execute(&self.pool).await?;
        Ok(())
    }
}

fn map_write_error(e: sqlx::Error, term: &str) -> LedgerError {
    match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            LedgerError::AlreadyExists(term.to_string())
        }
        _ => LedgerError::Sqlx(e),
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn find_by_term(&self, search_term: &str) -> LedgerResult<Option<PopularityRecord>> {
        let query = format!("SELECT {} FROM popularity WHERE search_term = ?", COLUMNS);
        let record = sqlx::query_as::<_, PopularityRecord>(&query)
            .bind(search_term)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn create(&self, record: &NewPopularityRecord) -> LedgerResult<PopularityRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO popularity (id, search_term, count, movie_id, title, poster_url, first_seen, last_seen)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&record.search_term)
        .bind(record.count)
        .bind(record.movie_id)
        .bind(&record.title)
        .bind(&record.poster_url)
        .bind(record.first_seen)
        .bind(record.last_seen)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &record.search_term))?;

        Ok(PopularityRecord {
            id,
            search_term: record.search_term.clone(),
            count: record.count,
            movie_id: record.movie_id,
            title: record.title.clone(),
            poster_url: record.poster_url.clone(),
            first_seen: record.first_seen,
            last_seen: record.last_seen,
        })
    }

    async fn update(&self, record: &PopularityRecord) -> LedgerResult<PopularityRecord> {
        let result = sqlx::query(
            "UPDATE popularity SET count = ?, movie_id = ?, title = ?, poster_url = ?, last_seen = ?
             WHERE id = ?",
        )
        .bind(record.count)
        .bind(record.movie_id)
        .bind(&record.title)
        .bind(&record.poster_url)
        .bind(record.last_seen)
        .bind(&record.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(format!("Record not found: {}", record.id)));
        }
        Ok(record.clone())
    }

    async fn list_top(&self, min_count: i64, limit: usize) -> LedgerResult<Vec<PopularityRecord>> {
        let query = format!(
            "SELECT {} FROM popularity WHERE count > ? ORDER BY count DESC, last_seen DESC LIMIT ?",
            COLUMNS
        );
        let records = sqlx::query_as::<_, PopularityRecord>(&query)
            .bind(min_count)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>, limit: usize) -> LedgerResult<Vec<PopularityRecord>> {
        let query = format!(
            "SELECT {} FROM popularity WHERE last_seen < ? ORDER BY last_seen ASC LIMIT ?",
            COLUMNS
        );
        let records = sqlx::query_as::<_, PopularityRecord>(&query)
            .bind(cutoff)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn delete(&self, id: &str) -> LedgerResult<()> {
        let result = sqlx::query("DELETE FROM popularity WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(format!("Record not found: {}", id)));
        }
        Ok(())
    }
}
