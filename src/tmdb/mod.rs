pub mod client;
pub mod types;

pub use client::{MovieProvider, TmdbClient, TmdbError};
pub use types::*;
