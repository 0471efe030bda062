use serde::{Deserialize, Serialize};

pub const PLACEHOLDER_POSTER: &str = "no-movie.png";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Movie {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub vote_average: Option<f32>,
    #[serde(default)]
    pub genre_ids: Option<Vec<u32>>,
    #[serde(default)]
    pub original_language: Option<String>,
}

impl Movie {
    pub fn has_poster(&self) -> bool {
        self.poster_path
            .as_deref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false)
    }

    /// Full poster URL. The path is appended to the image base as-is.
    pub fn poster_url(&self, image_base_url: &str) -> Option<String> {
        if !self.has_poster() {
            return None;
        }
        self.poster_path
            .as_deref()
            .map(|path| format!("{}{}", image_base_url, path))
    }

    pub fn year(&self) -> Option<&str> {
        self.release_date
            .as_deref()
            .and_then(|d| d.split('-').next())
            .filter(|y| y.len() == 4)
    }

    /// Rating clamped to the 0-10 scale the provider uses.
    pub fn rating(&self) -> Option<f32> {
        self.vote_average
            .filter(|r| r.is_finite())
            .map(|r| r.clamp(0.0, 10.0))
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MovieListResponse {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub results: Option<Vec<Movie>>,
    #[serde(default)]
    pub total_results: Option<u64>,
}

impl MovieListResponse {
    pub fn into_movies(self) -> Vec<Movie> {
        self.results.unwrap_or_default()
    }
}
