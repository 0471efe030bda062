use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ledger::{self, PopularityLedger, PopularityRecord};
use crate::render;
use crate::search::{Debouncer, RunMode, SearchPipeline, SearchRun, UserError};
use crate::tmdb::Movie;

/// Everything the user currently sees.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    /// What has been typed so far.
    pub query: String,
    /// The query the shown movies belong to.
    pub shown_query: String,
    pub movies: Vec<Movie>,
    pub error: Option<UserError>,
    pub is_loading: bool,
    pub is_retrying: bool,
    pub trending: Vec<PopularityRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Query(String),
    Retry,
    Trending,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            ":retry" | ":r" => Command::Retry,
            ":trending" | ":t" => Command::Trending,
            ":quit" | ":q" => Command::Quit,
            _ => Command::Query(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

pub struct App {
    pipeline: Arc<SearchPipeline>,
    ledger: Arc<PopularityLedger>,
    image_base_url: String,
    trending_limit: usize,
    debounce: Duration,
    state: ViewState,
    pending_records: Vec<JoinHandle<Option<PopularityRecord>>>,
}

/// How long leaving the interactive loop waits for in-flight ledger records.
const LEDGER_FLUSH_LIMIT: Duration = Duration::from_secs(2);

impl App {
    pub fn new(
        pipeline: Arc<SearchPipeline>,
        ledger: Arc<PopularityLedger>,
        image_base_url: &str,
        trending_limit: usize,
        debounce: Duration,
    ) -> Self {
        Self {
            pipeline,
            ledger,
            image_base_url: image_base_url.to_string(),
            trending_limit,
            debounce,
            state: ViewState::default(),
            pending_records: Vec::new(),
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn ledger(&self) -> &Arc<PopularityLedger> {
        &self.ledger
    }

    pub fn image_base_url(&self) -> &str {
        &self.image_base_url
    }

    /// The two startup tasks: trending searches and the popular listing.
    /// They run concurrently and touch disjoint parts of the state.
    pub async fn startup(&mut self) {
        let (trending, run) = tokio::join!(
            self.ledger.top_trending(self.trending_limit),
            self.pipeline.run("", RunMode::Normal)
        );
        self.state.trending = trending;
        if let Some(run) = run {
            self.apply(run);
        }
    }

    pub async fn load_trending(&mut self) {
        self.state.trending = self.ledger.top_trending(self.trending_limit).await;
    }

    /// Show the outcome of a run, unless a newer run has been started since.
    pub fn apply(&mut self, mut run: SearchRun) -> bool {
        if let Some(update) = run.ledger_update.take() {
            self.pending_records.retain(|handle| !handle.is_finished());
            self.pending_records.push(update);
        }
        self.sync_busy();
        if !self.pipeline.is_current(run.seq) {
            debug!(seq = run.seq, query = %run.query, "Discarding stale results");
            return false;
        }

        self.state.shown_query = run.query;
        match run.result {
            Ok(movies) => {
                self.state.movies = movies;
                self.state.error = None;
            }
            Err(e) => {
                self.state.movies.clear();
                self.state.error = Some(UserError::from(&e));
            }
        }
        true
    }

    /// Ledger records started by applied runs that may still be running.
    pub fn pending_records(&self) -> usize {
        self.pending_records.iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait up to `limit` for ledger records still in flight. Whatever has
    /// not finished by then is abandoned.
    pub async fn finish_ledger_updates(&mut self, limit: Duration) {
        let pending = std::mem::take(&mut self.pending_records);
        if pending.is_empty() {
            return;
        }
        let count = pending.len();
        let join_all = async {
            for handle in pending {
                ledger::join_record(handle).await;
            }
        };
        if tokio::time::timeout(limit, join_all).await.is_err() {
            warn!(pending = count, "Gave up waiting for popularity records");
        }
    }

    fn sync_busy(&mut self) {
        self.state.is_loading = self.pipeline.busy().is_loading();
        self.state.is_retrying = self.pipeline.busy().is_retrying();
    }

    fn spawn_run(&self, query: String, mode: RunMode, results: &mpsc::UnboundedSender<SearchRun>) {
        let pipeline = Arc::clone(&self.pipeline);
        let results = results.clone();
        tokio::spawn(async move {
            if let Some(run) = pipeline.run(&query, mode).await {
                let _ = results.send(run);
            }
        });
    }

    /// Read query values line by line from `input` until end of input or
    /// `:quit`, rendering to `out`.
    pub async fn run_interactive<R, W>(&mut self, input: R, out: &mut W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        writeln!(out, "{}", render::trending_list(&self.state.trending))?;
        writeln!(out, "{}", render::results(&self.state, &self.image_base_url))?;
        out.flush()?;

        let (debouncer, mut debounced) = Debouncer::new(self.debounce);
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        let mut lines = input.lines();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    match Command::parse(&line) {
                        Command::Quit => break,
                        Command::Retry => {
                            info!(query = %self.state.query, "Manual retry");
                            self.spawn_run(self.state.query.clone(), RunMode::Retry, &results_tx);
                        }
                        Command::Trending => {
                            self.load_trending().await;
                            writeln!(out, "{}", render::trending_list(&self.state.trending))?;
                        }
                        Command::Query(query) => {
                            self.state.query = query.clone();
                            debouncer.push(query);
                        }
                    }
                }
                Some(query) = debounced.recv() => {
                    self.spawn_run(query, RunMode::Normal, &results_tx);
                    tokio::task::yield_now().await;
                    self.sync_busy();
                    if let Some(status) = render::status_line(&self.state) {
                        writeln!(out, "{}", status)?;
                    }
                }
                Some(run) = results_rx.recv() => {
                    if self.apply(run) {
                        writeln!(out, "{}", render::results(&self.state, &self.image_base_url))?;
                    }
                }
            }
            out.flush()?;
        }

        debouncer.cancel();
        self.finish_ledger_updates(LEDGER_FLUSH_LIMIT).await;
        Ok(())
    }
}
