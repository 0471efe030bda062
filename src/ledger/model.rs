use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct PopularityRecord {
    pub id: String,
    pub search_term: String,
    pub count: i64,
    pub movie_id: Option<i64>,
    pub title: Option<String>,
    pub poster_url: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A record that has not been stored yet; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPopularityRecord {
    pub search_term: String,
    pub count: i64,
    pub movie_id: Option<i64>,
    pub title: Option<String>,
    pub poster_url: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Key under which a search term is counted: trimmed and lower-cased.
pub fn normalize_term(term: &str) -> String {
    term.trim().to_lowercase()
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Document store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Document store returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Invalid search term")]
    EmptyTerm,
    #[error("Invalid document store setting: {0}")]
    Invalid(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
