use crate::tmdb::TmdbError;

/// Everything that can go wrong while fetching a movie listing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SearchError {
    #[error("Movie provider credential is not configured")]
    Config,
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error {status}")]
    Http { status: u16 },
    #[error("Invalid response: {0}")]
    Parse(String),
    #[error("No results")]
    NoResults { query: Option<String> },
}

impl From<TmdbError> for SearchError {
    fn from(e: TmdbError) -> Self {
        match e {
            TmdbError::Network(msg) | TmdbError::Client(msg) => SearchError::Network(msg),
            TmdbError::Http { status, .. } => SearchError::Http { status },
            TmdbError::Parse(msg) => SearchError::Parse(msg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    NotFound,
    Server,
    Unauthorized,
    RateLimited,
    Config,
    General,
}

impl ErrorKind {
    pub fn icon(&self) -> &'static str {
        match self {
            ErrorKind::Network => "📡",
            ErrorKind::NotFound => "🔍",
            ErrorKind::Server => "🛠",
            ErrorKind::Unauthorized => "🔑",
            ErrorKind::RateLimited => "⏳",
            ErrorKind::Config => "⚙",
            ErrorKind::General => "⚠",
        }
    }

    /// Whether offering a manual retry makes sense.
    pub fn retryable(&self) -> bool {
        !matches!(self, ErrorKind::Config | ErrorKind::NotFound)
    }

    /// An empty listing is an empty state, not an error.
    pub fn is_empty_state(&self) -> bool {
        matches!(self, ErrorKind::NotFound)
    }
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchError::Config => ErrorKind::Config,
            SearchError::Network(_) => ErrorKind::Network,
            SearchError::NoResults { .. } => ErrorKind::NotFound,
            SearchError::Parse(_) => ErrorKind::General,
            SearchError::Http { status } => match *status {
                401 | 403 => ErrorKind::Unauthorized,
                404 => ErrorKind::NotFound,
                429 => ErrorKind::RateLimited,
                500..=599 => ErrorKind::Server,
                _ => ErrorKind::General,
            },
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            SearchError::Config => {
                "TMDB API key is not configured. Set TMDB_API_KEY or tmdb.apikey and restart."
                    .to_string()
            }
            SearchError::Network(_) => {
                "Unable to reach the movie database. Check your internet connection and try again."
                    .to_string()
            }
            SearchError::NoResults { query: Some(q) } => {
                format!("No movies found for \"{}\". Try a different search term.", q)
            }
            SearchError::NoResults { query: None } => {
                "No popular movies are available right now.".to_string()
            }
            SearchError::Parse(_) => {
                "Received an unexpected response from the movie database.".to_string()
            }
            SearchError::Http { status } => match self.kind() {
                ErrorKind::Unauthorized => {
                    "Invalid API key. Please check your TMDB credentials.".to_string()
                }
                ErrorKind::NotFound => "The requested movies could not be found.".to_string(),
                ErrorKind::RateLimited => {
                    "Too many requests. Please wait a moment and try again.".to_string()
                }
                ErrorKind::Server => {
                    "The movie database is having problems right now. Please try again later."
                        .to_string()
                }
                _ => format!("Request failed with status {}. Please try again.", status),
            },
        }
    }
}

/// What the user gets to see of a failed fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct UserError {
    pub kind: ErrorKind,
    pub message: String,
}

impl UserError {
    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

impl From<&SearchError> for UserError {
    fn from(e: &SearchError) -> Self {
        Self {
            kind: e.kind(),
            message: e.user_message(),
        }
    }
}
