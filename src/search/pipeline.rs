use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::SearchError;
use crate::ledger::{PopularityLedger, PopularityRecord};
use crate::tmdb::{Movie, MovieProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Normal,
    /// Manual retry. Always fetches, even for an empty query.
    Retry,
}

/// Busy indicators shown while a fetch is in flight. Each run counts
/// under its own mode, so overlapping runs keep the indicator up until the
/// last of them ends.
#[derive(Debug, Default)]
pub struct BusyFlags {
    loading: AtomicUsize,
    retrying: AtomicUsize,
}

impl BusyFlags {
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst) > 0
    }

    pub fn is_retrying(&self) -> bool {
        self.retrying.load(Ordering::SeqCst) > 0
    }

    fn counter(&self, mode: RunMode) -> &AtomicUsize {
        match mode {
            RunMode::Normal => &self.loading,
            RunMode::Retry => &self.retrying,
        }
    }

    fn begin(&self, mode: RunMode) -> BusyGuard<'_> {
        self.counter(mode).fetch_add(1, Ordering::SeqCst);
        BusyGuard { flags: self, mode }
    }
}

/// Ends this run's share of the busy state when dropped, however the fetch
/// ended.
struct BusyGuard<'a> {
    flags: &'a BusyFlags,
    mode: RunMode,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flags.counter(self.mode).fetch_sub(1, Ordering::SeqCst);
    }
}

/// Result of one pipeline run.
#[derive(Debug)]
pub struct SearchRun {
    /// Position of this run in issue order. Only the latest one should be shown.
    pub seq: u64,
    pub query: String,
    pub result: Result<Vec<Movie>, SearchError>,
    /// Background popularity update, if one was started.
    pub ledger_update: Option<JoinHandle<Option<PopularityRecord>>>,
}

pub struct SearchPipeline {
    provider: Option<Arc<dyn MovieProvider>>,
    ledger: Option<Arc<PopularityLedger>>,
    busy: BusyFlags,
    initial_load_done: AtomicBool,
    latest_seq: AtomicU64,
}

impl SearchPipeline {
    /// `provider` is `None` when no credential is configured.
    pub fn new(
        provider: Option<Arc<dyn MovieProvider>>,
        ledger: Option<Arc<PopularityLedger>>,
    ) -> Self {
        Self {
            provider,
            ledger,
            busy: BusyFlags::default(),
            initial_load_done: AtomicBool::new(false),
            latest_seq: AtomicU64::new(0),
        }
    }

    pub fn busy(&self) -> &BusyFlags {
        &self.busy
    }

    /// True if `seq` belongs to the most recently started run.
    pub fn is_current(&self, seq: u64) -> bool {
        self.latest_seq.load(Ordering::SeqCst) == seq
    }

    /// Fetch the listing for `query`. Returns `None` when the run was skipped:
    /// an empty query after the initial load, outside a retry.
    pub async fn run(&self, query: &str, mode: RunMode) -> Option<SearchRun> {
        let query = query.trim();
        let first_load = !self.initial_load_done.swap(true, Ordering::SeqCst);

        if query.is_empty() && !first_load && mode == RunMode::Normal {
            debug!("Empty query, skipping fetch");
            return None;
        }

        let seq = self.latest_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let result = {
            let _busy = self.busy.begin(mode);
            self.fetch(query).await
        };

        let mut ledger_update = None;
        match &result {
            Ok(movies) => {
                info!(seq, query = %query, count = movies.len(), "Fetched movies");
                if let (Some(ledger), Some(first)) = (&self.ledger, movies.first()) {
                    if !query.is_empty() {
                        ledger_update = Some(ledger.record_detached(query, first));
                    }
                }
            }
            Err(SearchError::NoResults { .. }) => {
                info!(seq, query = %query, "No movies found");
            }
            Err(e) => {
                warn!(seq, query = %query, error = %e, kind = ?e.kind(), "Movie fetch failed");
            }
        }

        Some(SearchRun {
            seq,
            query: query.to_string(),
            result,
            ledger_update,
        })
    }

    async fn fetch(&self, query: &str) -> Result<Vec<Movie>, SearchError> {
        let provider = self.provider.as_ref().ok_or(SearchError::Config)?;

        let response = if query.is_empty() {
            provider.discover().await?
        } else {
            provider.search(query).await?
        };

        let movies = response.into_movies();
        if movies.is_empty() {
            return Err(SearchError::NoResults {
                query: (!query.is_empty()).then(|| query.to_string()),
            });
        }

        Ok(keep_with_posters(movies))
    }
}

/// Drop movies without a poster, unless that would leave nothing to show.
pub fn keep_with_posters(movies: Vec<Movie>) -> Vec<Movie> {
    if movies.iter().any(Movie::has_poster) {
        movies.into_iter().filter(Movie::has_poster).collect()
    } else {
        movies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TmdbConfig;
    use crate::ledger::{DocumentStore, SqliteStore};
    use crate::search::ErrorKind;
    use crate::tmdb::{MovieListResponse, TmdbClient, TmdbError};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    fn movie(id: u64, title: &str, poster: Option<&str>) -> Movie {
        Movie {
            id,
            title: title.to_string(),
            poster_path: poster.map(str::to_string),
            overview: None,
            release_date: None,
            vote_average: None,
            genre_ids: None,
            original_language: None,
        }
    }

    #[derive(Default)]
    struct FakeProvider {
        movies: Vec<Movie>,
        status: Option<u16>,
        searches: Mutex<Vec<String>>,
        discovers: AtomicUsize,
        gate: Option<Arc<Notify>>,
        /// Only this query waits on `gate`; `None` gates every call.
        gated_query: Option<&'static str>,
    }

    impl FakeProvider {
        fn with_movies(movies: Vec<Movie>) -> Self {
            Self {
                movies,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.searches.lock().unwrap().len() + self.discovers.load(Ordering::SeqCst)
        }

        async fn respond(&self, query: &str) -> Result<MovieListResponse, TmdbError> {
            if let Some(ref gate) = self.gate {
                if self.gated_query.map_or(true, |q| q == query) {
                    gate.notified().await;
                }
            }
            if let Some(status) = self.status {
                return Err(TmdbError::Http {
                    status,
                    url: "fake".to_string(),
                });
            }
            Ok(MovieListResponse {
                page: Some(1),
                results: Some(self.movies.clone()),
                total_results: None,
            })
        }
    }

    #[async_trait]
    impl MovieProvider for FakeProvider {
        async fn search(&self, query: &str) -> Result<MovieListResponse, TmdbError> {
            self.searches.lock().unwrap().push(query.to_string());
            self.respond(query).await
        }

        async fn discover(&self) -> Result<MovieListResponse, TmdbError> {
            self.discovers.fetch_add(1, Ordering::SeqCst);
            self.respond("").await
        }
    }

    fn pipeline_with(provider: Arc<FakeProvider>) -> SearchPipeline {
        SearchPipeline::new(Some(provider), None)
    }

    #[tokio::test]
    async fn test_first_load_fetches_popular() {
        let provider = Arc::new(FakeProvider::with_movies(vec![movie(1, "Popular", Some("/p.jpg"))]));
        let pipeline = pipeline_with(provider.clone());

        let run = pipeline.run("", RunMode::Normal).await.unwrap();
        assert_eq!(run.result.unwrap().len(), 1);
        assert_eq!(provider.discovers.load(Ordering::SeqCst), 1);

        // Later empty queries do nothing.
        assert!(pipeline.run("", RunMode::Normal).await.is_none());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_whitespace_query_behaves_as_empty() {
        let provider = Arc::new(FakeProvider::with_movies(vec![movie(1, "Popular", Some("/p.jpg"))]));
        let pipeline = pipeline_with(provider.clone());

        let run = pipeline.run("   \t ", RunMode::Normal).await.unwrap();
        assert_eq!(run.query, "");
        assert_eq!(provider.discovers.load(Ordering::SeqCst), 1);
        assert!(provider.searches.lock().unwrap().is_empty());

        assert!(pipeline.run("  ", RunMode::Normal).await.is_none());
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_retry_fetches_even_when_empty() {
        let provider = Arc::new(FakeProvider::with_movies(vec![movie(1, "Popular", Some("/p.jpg"))]));
        let pipeline = pipeline_with(provider.clone());

        pipeline.run("", RunMode::Normal).await.unwrap();
        assert!(pipeline.run("", RunMode::Retry).await.is_some());
        assert_eq!(provider.discovers.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_search_uses_trimmed_query() {
        let provider = Arc::new(FakeProvider::with_movies(vec![movie(1, "Alien", Some("/a.jpg"))]));
        let pipeline = pipeline_with(provider.clone());

        pipeline.run("  alien ", RunMode::Normal).await.unwrap();
        assert_eq!(*provider.searches.lock().unwrap(), vec!["alien".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_credential_is_config_error() {
        let pipeline = SearchPipeline::new(None, None);
        let run = pipeline.run("batman", RunMode::Normal).await.unwrap();
        assert_eq!(run.result.unwrap_err(), SearchError::Config);
        assert!(!pipeline.busy().is_loading());
    }

    #[tokio::test]
    async fn test_posterless_results_fall_back_to_full_list() {
        let movies = vec![movie(1, "A", None), movie(2, "B", None)];
        let pipeline = pipeline_with(Arc::new(FakeProvider::with_movies(movies.clone())));

        let run = pipeline.run("obscure", RunMode::Normal).await.unwrap();
        assert_eq!(run.result.unwrap(), movies);
    }

    #[tokio::test]
    async fn test_posterless_results_filtered_when_some_have_posters() {
        let movies = vec![movie(1, "A", None), movie(2, "B", Some("/b.jpg")), movie(3, "C", Some(""))];
        let pipeline = pipeline_with(Arc::new(FakeProvider::with_movies(movies)));

        let result = pipeline.run("x", RunMode::Normal).await.unwrap().result.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, 2);
    }

    #[tokio::test]
    async fn test_zero_results_is_no_results_condition() {
        let pipeline = pipeline_with(Arc::new(FakeProvider::default()));

        let run = pipeline.run("zzzqqqnomatch", RunMode::Normal).await.unwrap();
        let err = run.result.unwrap_err();
        assert_eq!(
            err,
            SearchError::NoResults {
                query: Some("zzzqqqnomatch".to_string())
            }
        );
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.user_message().contains("zzzqqqnomatch"));
        assert!(run.ledger_update.is_none());
    }

    #[tokio::test]
    async fn test_http_status_is_typed_error() {
        let provider = FakeProvider {
            status: Some(503),
            ..Default::default()
        };
        let pipeline = pipeline_with(Arc::new(provider));

        let run = pipeline.run("heat", RunMode::Normal).await.unwrap();
        assert_eq!(run.result.unwrap_err().kind(), ErrorKind::Server);
    }

    #[tokio::test]
    async fn test_unauthorized_response_from_tmdb() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/search/movie")
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .with_body(r#"{"status_code":7,"status_message":"Invalid API key"}"#)
            .create_async()
            .await;

        let config = TmdbConfig {
            base_url: server.url(),
            ..TmdbConfig::default()
        };
        let client = TmdbClient::new(&config, "bad-key").unwrap();
        let pipeline = SearchPipeline::new(Some(Arc::new(client)), None);

        let run = pipeline.run("matrix", RunMode::Normal).await.unwrap();
        let err = crate::search::UserError::from(&run.result.unwrap_err());
        assert_eq!(err.kind, ErrorKind::Unauthorized);
        assert!(err.message.contains("Invalid API key"));
    }

    #[tokio::test]
    async fn test_busy_flag_set_during_fetch_and_cleared_after() {
        let gate = Arc::new(Notify::new());
        let provider = FakeProvider {
            movies: vec![movie(1, "A", Some("/a.jpg"))],
            gate: Some(gate.clone()),
            ..Default::default()
        };
        let pipeline = Arc::new(pipeline_with(Arc::new(provider)));

        let task = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run("a", RunMode::Retry).await })
        };
        while !pipeline.busy().is_retrying() {
            tokio::task::yield_now().await;
        }
        assert!(!pipeline.busy().is_loading());

        gate.notify_one();
        task.await.unwrap().unwrap();
        assert!(!pipeline.busy().is_retrying());
        assert!(!pipeline.busy().is_loading());
    }

    #[tokio::test]
    async fn test_busy_flags_cleared_when_fetch_is_cancelled() {
        let gate = Arc::new(Notify::new());
        let provider = FakeProvider {
            gate: Some(gate),
            ..Default::default()
        };
        let pipeline = Arc::new(pipeline_with(Arc::new(provider)));

        let task = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run("a", RunMode::Normal).await })
        };
        while !pipeline.busy().is_loading() {
            tokio::task::yield_now().await;
        }
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!pipeline.busy().is_loading());
    }

    #[tokio::test]
    async fn test_overlapping_runs_keep_busy_flag_until_last_ends() {
        let gate = Arc::new(Notify::new());
        let provider = FakeProvider {
            movies: vec![movie(1, "A", Some("/a.jpg"))],
            gate: Some(gate.clone()),
            gated_query: Some("slow"),
            ..Default::default()
        };
        let provider = Arc::new(provider);
        let pipeline = Arc::new(pipeline_with(provider.clone()));

        let slow = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run("slow", RunMode::Normal).await })
        };
        while provider.calls() < 1 {
            tokio::task::yield_now().await;
        }
        assert!(pipeline.busy().is_loading());

        pipeline.run("fast", RunMode::Normal).await.unwrap();
        assert!(pipeline.busy().is_loading());

        gate.notify_one();
        slow.await.unwrap().unwrap();
        assert!(!pipeline.busy().is_loading());
    }

    #[tokio::test]
    async fn test_retry_during_normal_run_keeps_both_flags() {
        let gate = Arc::new(Notify::new());
        let provider = FakeProvider {
            movies: vec![movie(1, "A", Some("/a.jpg"))],
            gate: Some(gate.clone()),
            gated_query: Some("slow"),
            ..Default::default()
        };
        let provider = Arc::new(provider);
        let pipeline = Arc::new(pipeline_with(provider.clone()));

        let normal = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run("slow", RunMode::Normal).await })
        };
        while provider.calls() < 1 {
            tokio::task::yield_now().await;
        }
        let retry = {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.run("slow", RunMode::Retry).await })
        };
        while provider.calls() < 2 {
            tokio::task::yield_now().await;
        }
        assert!(pipeline.busy().is_retrying());
        assert!(pipeline.busy().is_loading());

        gate.notify_waiters();
        normal.await.unwrap().unwrap();
        retry.await.unwrap().unwrap();
        assert!(!pipeline.busy().is_loading());
        assert!(!pipeline.busy().is_retrying());
    }

    #[tokio::test]
    async fn test_sequence_numbers_identify_latest_run() {
        let pipeline = pipeline_with(Arc::new(FakeProvider::with_movies(vec![movie(1, "A", None)])));

        let first = pipeline.run("a", RunMode::Normal).await.unwrap();
        let second = pipeline.run("ab", RunMode::Normal).await.unwrap();
        assert!(second.seq > first.seq);
        assert!(!pipeline.is_current(first.seq));
        assert!(pipeline.is_current(second.seq));
    }

    #[tokio::test]
    async fn test_successful_search_records_popularity() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let ledger = Arc::new(PopularityLedger::new(store.clone(), "https://img"));
        let provider = Arc::new(FakeProvider::with_movies(vec![
            movie(10, "No Poster", None),
            movie(11, "Batman Begins", Some("/bb.jpg")),
        ]));
        let pipeline = SearchPipeline::new(Some(provider), Some(ledger));

        for query in ["Batman", " batman "] {
            let run = pipeline.run(query, RunMode::Normal).await.unwrap();
            let record = run.ledger_update.unwrap().await.unwrap().unwrap();
            assert_eq!(record.title.as_deref(), Some("Batman Begins"));
        }

        let stored = store.find_by_term("batman").await.unwrap().unwrap();
        assert_eq!(stored.count, 2);
        assert_eq!(stored.poster_url.as_deref(), Some("https://img/bb.jpg"));
    }

    #[tokio::test]
    async fn test_popular_listing_is_not_recorded() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let ledger = Arc::new(PopularityLedger::new(store.clone(), "https://img"));
        let provider = Arc::new(FakeProvider::with_movies(vec![movie(1, "A", Some("/a.jpg"))]));
        let pipeline = SearchPipeline::new(Some(provider), Some(ledger));

        let run = pipeline.run("", RunMode::Normal).await.unwrap();
        assert!(run.ledger_update.is_none());
        assert!(store.list_top(0, 10).await.unwrap().is_empty());
    }
}
