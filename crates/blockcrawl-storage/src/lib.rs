//! blockcrawl-storage: durable [`ProgressStore`](blockcrawl_core::ProgressStore) backends.
//!
//! Backends:
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//! - [`postgres`]: PostgreSQL via `sqlx` (`postgres` feature)
//!
//! The in-memory store lives in `blockcrawl-core`.

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteProgressStore;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresOptions, PostgresProgressStore};

#[cfg(any(feature = "sqlite", feature = "postgres"))]
use blockcrawl_core::{BlockNumber, CrawlError};

#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn storage_err(e: sqlx::Error) -> CrawlError {
    CrawlError::Storage(e.to_string())
}

/// Block numbers are persisted as decimal text.
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn parse_block(s: &str) -> Result<BlockNumber, CrawlError> {
    s.parse()
        .map_err(|e| CrawlError::Storage(format!("corrupt block number {s:?}: {e}")))
}
