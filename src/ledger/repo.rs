use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::model::*;

/// Remote or local document store holding popularity records.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_by_term(&self, search_term: &str) -> LedgerResult<Option<PopularityRecord>>;
    async fn create(&self, record: &NewPopularityRecord) -> LedgerResult<PopularityRecord>;
    async fn update(&self, record: &PopularityRecord) -> LedgerResult<PopularityRecord>;
    /// Records with `count > min_count`, highest count first.
    async fn list_top(&self, min_count: i64, limit: usize) -> LedgerResult<Vec<PopularityRecord>>;
    /// Records last seen before `cutoff`.
    async fn list_stale(&self, cutoff: DateTime<Utc>, limit: usize) -> LedgerResult<Vec<PopularityRecord>>;
    async fn delete(&self, id: &str) -> LedgerResult<()>;
}
