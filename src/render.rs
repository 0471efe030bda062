use std::fmt::Write;

use crate::app::ViewState;
use crate::ledger::PopularityRecord;
use crate::tmdb::{Movie, PLACEHOLDER_POSTER};

pub fn movie_card(movie: &Movie, image_base_url: &str) -> String {
    let rating = movie
        .rating()
        .map(|r| format!("{:.1}", r))
        .unwrap_or_else(|| "N/A".to_string());
    let language = movie.original_language.as_deref().unwrap_or("N/A");
    let year = movie.year().unwrap_or("N/A");
    let poster = movie
        .poster_url(image_base_url)
        .unwrap_or_else(|| PLACEHOLDER_POSTER.to_string());

    let mut card = String::new();
    let _ = writeln!(card, "  {}", movie.title);
    let _ = writeln!(card, "    ★ {} • {} • {}", rating, language, year);
    let _ = write!(card, "    {}", poster);
    card
}

pub fn trending_list(records: &[PopularityRecord]) -> String {
    if records.is_empty() {
        return "Trending searches: none yet".to_string();
    }

    let mut out = String::from("Trending searches:");
    for (i, record) in records.iter().enumerate() {
        let label = record.title.as_deref().unwrap_or(&record.search_term);
        let _ = write!(
            out,
            "\n  {}. {} ({} searches)",
            i + 1,
            label,
            record.count
        );
    }
    out
}

pub fn status_line(state: &ViewState) -> Option<String> {
    if state.is_retrying {
        Some("Retrying...".to_string())
    } else if state.is_loading {
        Some("Loading...".to_string())
    } else {
        None
    }
}

pub fn results(state: &ViewState, image_base_url: &str) -> String {
    if let Some(ref error) = state.error {
        let mut out = format!("{} {}", error.kind.icon(), error.message);
        if error.retryable() {
            out.push_str("\n  (type :retry to try again)");
        }
        return out;
    }

    let mut out = if state.shown_query.is_empty() {
        "Popular movies:".to_string()
    } else {
        format!("Results for \"{}\":", state.shown_query)
    };
    for movie in &state.movies {
        out.push('\n');
        out.push_str(&movie_card(movie, image_base_url));
    }
    out
}
