use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub tmdb: TmdbConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TmdbConfig {
    #[serde(alias = "api_key", rename = "apikey")]
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(alias = "base_url", rename = "baseurl")]
    #[serde(default = "default_tmdb_base_url")]
    pub base_url: String,
    #[serde(alias = "image_base_url", rename = "imagebaseurl")]
    #[serde(default = "default_image_base_url")]
    pub image_base_url: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for TmdbConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_tmdb_base_url(),
            image_base_url: default_image_base_url(),
            language: default_language(),
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    #[default]
    Sqlite,
    Appwrite,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LedgerConfig {
    #[serde(default)]
    pub backend: LedgerBackend,
    #[serde(default)]
    pub sqlite: Option<SqliteConfig>,
    #[serde(default)]
    pub appwrite: AppwriteConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SqliteConfig {
    pub filename: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppwriteConfig {
    #[serde(default = "default_appwrite_endpoint")]
    pub endpoint: String,
    #[serde(alias = "project_id", rename = "projectid")]
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(alias = "database_id", rename = "databaseid")]
    #[serde(default)]
    pub database_id: Option<String>,
    #[serde(alias = "collection_id", rename = "collectionid")]
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(alias = "api_key", rename = "apikey")]
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for AppwriteConfig {
    fn default() -> Self {
        Self {
            endpoint: default_appwrite_endpoint(),
            project_id: None,
            database_id: None,
            collection_id: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_trending_limit")]
    pub trending_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            trending_limit: default_trending_limit(),
        }
    }
}

fn default_tmdb_base_url() -> String {
    "https://api.themoviedb.org/3".to_string()
}

fn default_image_base_url() -> String {
    "https://image.tmdb.org/t/p/w500".to_string()
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_timeout() -> u64 {
    15
}

fn default_appwrite_endpoint() -> String {
    "https://cloud.appwrite.io/v1".to_string()
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_trending_limit() -> usize {
    5
}

/// Validated identifiers for the Appwrite document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppwriteIds {
    pub endpoint: String,
    pub project_id: String,
    pub database_id: String,
    pub collection_id: String,
    pub api_key: Option<String>,
}

impl Config {
    /// Loads the config file if it exists, then applies environment overrides.
    /// A missing file yields the defaults.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_string(), e))?;

        Self::from_yaml(&content).map_err(|e| ConfigError::ParseError(path.to_string(), e))
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("TMDB_API_KEY") {
            self.tmdb.api_key = Some(key);
        }
        let appwrite = &mut self.ledger.appwrite;
        if let Some(endpoint) = non_empty("APPWRITE_ENDPOINT") {
            appwrite.endpoint = endpoint;
        }
        if let Some(id) = non_empty("APPWRITE_PROJECT_ID") {
            appwrite.project_id = Some(id);
        }
        if let Some(id) = non_empty("APPWRITE_DATABASE_ID") {
            appwrite.database_id = Some(id);
        }
        if let Some(id) = non_empty("APPWRITE_COLLECTION_ID") {
            appwrite.collection_id = Some(id);
        }
        if let Some(key) = non_empty("APPWRITE_API_KEY") {
            appwrite.api_key = Some(key);
        }
    }

    /// The TMDB credential, if one is configured. Its absence is not a
    /// startup error; the search pipeline reports it on every run instead.
    pub fn tmdb_api_key(&self) -> Option<&str> {
        self.tmdb
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn get_database_path(&self) -> String {
        self.ledger
            .sqlite
            .as_ref()
            .map(|s| s.filename.clone())
            .unwrap_or_else(|| "cinetrend.db".to_string())
    }

    pub fn appwrite_ids(&self) -> Result<AppwriteIds, ConfigError> {
        let appwrite = &self.ledger.appwrite;
        let required = |value: &Option<String>, name: &'static str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(ConfigError::Missing(name))
        };

        Ok(AppwriteIds {
            endpoint: appwrite.endpoint.trim_end_matches('/').to_string(),
            project_id: required(&appwrite.project_id, "ledger.appwrite.projectid")?,
            database_id: required(&appwrite.database_id, "ledger.appwrite.databaseid")?,
            collection_id: required(&appwrite.collection_id, "ledger.appwrite.collectionid")?,
            api_key: appwrite.api_key.clone(),
        })
    }

    /// Startup validation. Document store identifiers must be present when the
    /// Appwrite backend is selected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.backend == LedgerBackend::Appwrite {
            self.appwrite_ids()?;
        }
        if self.search.trending_limit == 0 {
            return Err(ConfigError::Invalid(
                "search.trending_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(String, std::io::Error),
    #[error("Failed to parse config file {0}: {1}")]
    ParseError(String, serde_yaml::Error),
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid setting: {0}")]
    Invalid(String),
}
