pub mod appwrite;
pub mod client;
pub mod model;
pub mod repo;
pub mod sqlite;

pub use appwrite::AppwriteStore;
pub use client::{join_record, LedgerStats, LedgerStatsSnapshot, PopularityLedger};
pub use model::*;
pub use repo::DocumentStore;
pub use sqlite::SqliteStore;
