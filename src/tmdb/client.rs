use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use std::time::Duration;
use tracing::debug;

use super::types::MovieListResponse;
use crate::config::TmdbConfig;

/// Source of movie listings.
#[async_trait]
pub trait MovieProvider: Send + Sync {
    /// Search movies by title, first page only.
    async fn search(&self, query: &str) -> Result<MovieListResponse, TmdbError>;

    /// Popular movies, first page only.
    async fn discover(&self) -> Result<MovieListResponse, TmdbError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TmdbError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },
    #[error("Invalid response body: {0}")]
    Parse(String),
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

pub struct TmdbClient {
    client: reqwest::Client,
    base_url: String,
    language: String,
    api_key: String,
}

impl TmdbClient {
    pub fn new(config: &TmdbConfig, api_key: &str) -> Result<Self, TmdbError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .default_headers(headers)
            .build()
            .map_err(|e| TmdbError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
            api_key: api_key.to_string(),
        })
    }

    pub fn search_url(&self, query: &str) -> String {
        format!(
            "{}/search/movie?query={}&include_adult=false&language={}&page=1",
            self.base_url,
            urlencoding::encode(query),
            urlencoding::encode(&self.language)
        )
    }

    pub fn discover_url(&self) -> String {
        format!(
            "{}/discover/movie?include_adult=false&language={}&page=1&sort_by=popularity.desc",
            self.base_url,
            urlencoding::encode(&self.language)
        )
    }

    async fn get_list(&self, url: &str) -> Result<MovieListResponse, TmdbError> {
        debug!(url = %url, "TMDB request");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| TmdbError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TmdbError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TmdbError::Network(e.to_string()))?;

        serde_json::from_slice(&body).map_err(|e| TmdbError::Parse(e.to_string()))
    }
}

#[async_trait]
impl MovieProvider for TmdbClient {
    async fn search(&self, query: &str) -> Result<MovieListResponse, TmdbError> {
        let url = self.search_url(query);
        self.get_list(&url).await
    }

    async fn discover(&self) -> Result<MovieListResponse, TmdbError> {
        let url = self.discover_url();
        self.get_list(&url).await
    }
}
