use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use super::model::*;
use super::repo::DocumentStore;
use crate::tmdb::Movie;

const PURGE_BATCH: usize = 100;

/// Wait for a background record started by `record_detached`.
pub async fn join_record(handle: JoinHandle<Option<PopularityRecord>>) -> Option<PopularityRecord> {
    match handle.await {
        Ok(record) => record,
        Err(e) => {
            log_join_error(&e);
            None
        }
    }
}

fn log_join_error(e: &JoinError) {
    if e.is_panic() {
        warn!(error = %e, "Popularity record task panicked");
    } else {
        warn!(error = %e, "Popularity record task was cancelled");
    }
}

/// Counters describing how the ledger has been doing. Failures are never
/// surfaced to the user, so this is where they become visible.
#[derive(Debug, Default)]
pub struct LedgerStats {
    records_written: AtomicU64,
    record_failures: AtomicU64,
    trending_failures: AtomicU64,
    purged: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerStatsSnapshot {
    pub records_written: u64,
    pub record_failures: u64,
    pub trending_failures: u64,
    pub purged: u64,
}

impl LedgerStats {
    pub fn snapshot(&self) -> LedgerStatsSnapshot {
        LedgerStatsSnapshot {
            records_written: self.records_written.load(Ordering::Relaxed),
            record_failures: self.record_failures.load(Ordering::Relaxed),
            trending_failures: self.trending_failures.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
        }
    }
}

pub struct PopularityLedger {
    store: Arc<dyn DocumentStore>,
    image_base_url: String,
    stats: LedgerStats,
    /// One lock per search term with a record in progress. The store only
    /// offers read-then-write, so updates to the same term must not overlap.
    term_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PopularityLedger {
    pub fn new(store: Arc<dyn DocumentStore>, image_base_url: &str) -> Self {
        Self {
            store,
            image_base_url: image_base_url.to_string(),
            stats: LedgerStats::default(),
            term_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn stats(&self) -> LedgerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Count one more search for `term`, using `movie` as the representative
    /// result. Returns `None` on any failure.
    pub async fn record(&self, term: &str, movie: &Movie) -> Option<PopularityRecord> {
        match self.try_record(term, movie).await {
            Ok(record) => {
                self.stats.records_written.fetch_add(1, Ordering::Relaxed);
                debug!(term = %record.search_term, count = record.count, "Search recorded");
                Some(record)
            }
            Err(e) => {
                self.stats.record_failures.fetch_add(1, Ordering::Relaxed);
                warn!(term = %term, error = %e, "Failed to record search popularity");
                None
            }
        }
    }

    /// Same as `record`, on a background task.
    pub fn record_detached(self: &Arc<Self>, term: &str, movie: &Movie) -> JoinHandle<Option<PopularityRecord>> {
        let ledger = Arc::clone(self);
        let term = term.to_string();
        let movie = movie.clone();
        tokio::spawn(async move { ledger.record(&term, &movie).await })
    }

    async fn try_record(&self, term: &str, movie: &Movie) -> LedgerResult<PopularityRecord> {
        let search_term = normalize_term(term);
        if search_term.is_empty() {
            return Err(LedgerError::EmptyTerm);
        }

        let term_lock = self.term_lock(&search_term);
        let result = {
            let _held = term_lock.lock().await;
            self.record_locked(&search_term, movie).await
        };
        self.release_term_lock(&search_term, term_lock);
        result
    }

    fn term_lock(&self, search_term: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.term_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(search_term.to_string())
            .or_default()
            .clone()
    }

    fn release_term_lock(&self, search_term: &str, term_lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.term_locks.lock().unwrap_or_else(|e| e.into_inner());
        drop(term_lock);
        // Only the map still holds it: nobody else is waiting on this term.
        if locks.get(search_term).map(Arc::strong_count) == Some(1) {
            locks.remove(search_term);
        }
    }

    async fn record_locked(&self, search_term: &str, movie: &Movie) -> LedgerResult<PopularityRecord> {
        let search_term = search_term.to_string();
        let now = Utc::now();

        if let Some(existing) = self.store.find_by_term(&search_term).await? {
            return self.bump(existing, movie, now).await;
        }

        let new_record = NewPopularityRecord {
            search_term: search_term.clone(),
            count: 1,
            movie_id: i64::try_from(movie.id).ok(),
            title: Some(movie.title.clone()),
            poster_url: movie.poster_url(&self.image_base_url),
            first_seen: now,
            last_seen: now,
        };

        match self.store.create(&new_record).await {
            // Someone else created the record between our lookup and insert.
            Err(LedgerError::AlreadyExists(_)) => {
                let existing = self
                    .store
                    .find_by_term(&search_term)
                    .await?
                    .ok_or_else(|| LedgerError::NotFound(search_term.clone()))?;
                self.bump(existing, movie, now).await
            }
            other => {
                if other.is_ok() {
                    info!(term = %search_term, "New search term recorded");
                }
                other
            }
        }
    }

    async fn bump(
        &self,
        existing: PopularityRecord,
        movie: &Movie,
        now: DateTime<Utc>,
    ) -> LedgerResult<PopularityRecord> {
        let updated = PopularityRecord {
            count: existing.count.max(0).saturating_add(1),
            movie_id: i64::try_from(movie.id).ok(),
            title: Some(movie.title.clone()),
            poster_url: movie.poster_url(&self.image_base_url),
            last_seen: now.max(existing.last_seen),
            ..existing
        };
        self.store.update(&updated).await
    }

    /// Number of search terms with a record currently in progress.
    pub fn terms_in_progress(&self) -> usize {
        self.term_locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Up to `limit` records with a positive count, highest first. Empty on
    /// any failure.
    pub async fn top_trending(&self, limit: usize) -> Vec<PopularityRecord> {
        if limit == 0 {
            return Vec::new();
        }
        match self.store.list_top(0, limit).await {
            Ok(mut records) => {
                records.retain(|r| r.count > 0);
                records.sort_by(|a, b| b.count.cmp(&a.count));
                records.truncate(limit);
                records
            }
            Err(e) => {
                self.stats.trending_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Failed to load trending searches");
                Vec::new()
            }
        }
    }

    /// Delete records not seen for `max_age`. Returns the number removed.
    pub async fn purge_older_than(&self, max_age: Duration) -> LedgerResult<usize> {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;

        loop {
            let stale = self.store.list_stale(cutoff, PURGE_BATCH).await?;
            if stale.is_empty() {
                break;
            }
            let batch_len = stale.len();
            for record in stale {
                self.store.delete(&record.id).await?;
                removed += 1;
            }
            if batch_len < PURGE_BATCH {
                break;
            }
        }

        self.stats.purged.fetch_add(removed as u64, Ordering::Relaxed);
        info!(removed, cutoff = %cutoff, "Purged stale search terms");
        Ok(removed)
    }
}
