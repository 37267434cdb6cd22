//! SQLite cursor store.
//!
//! One row per stream in a single SQLite file. Block numbers are stored as
//! decimal text so the full `u128` range round-trips.
//!
//! # Usage
//! ```rust,no_run
//! use blockcrawl_storage::sqlite::SqliteProgressStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteProgressStore::open("./crawl.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteProgressStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use blockcrawl_core::{Checkpoint, CrawlError, ProgressStore};

use crate::{parse_block, storage_err};

pub struct SqliteProgressStore {
    pool: SqlitePool,
}

impl SqliteProgressStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./crawl.db"`) or a full
    /// SQLite URL (`"sqlite:./crawl.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, CrawlError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory database. All data is lost when the store is dropped.
    pub async fn in_memory() -> Result<Self, CrawlError> {
        // Every connection to `:memory:` is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), CrawlError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS crawl_progress (
                stream       TEXT    NOT NULL PRIMARY KEY,
                block_number TEXT    NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Every saved checkpoint, ordered by stream key.
    pub async fn list(&self) -> Result<Vec<Checkpoint>, CrawlError> {
        let rows = sqlx::query(
            "SELECT stream, block_number, updated_at FROM crawl_progress ORDER BY stream",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(row_to_checkpoint).collect()
    }
}

fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, CrawlError> {
    Ok(Checkpoint {
        stream: row.get("stream"),
        block_number: parse_block(&row.get::<String, _>("block_number"))?,
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    async fn load(&self, stream: &str) -> Result<Option<Checkpoint>, CrawlError> {
        let row = sqlx::query(
            "SELECT stream, block_number, updated_at FROM crawl_progress WHERE stream = ?",
        )
        .bind(stream)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(row_to_checkpoint).transpose()
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), CrawlError> {
        sqlx::query(
            "INSERT INTO crawl_progress (stream, block_number, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(stream) DO UPDATE SET
                block_number = excluded.block_number,
                updated_at   = excluded.updated_at",
        )
        .bind(&checkpoint.stream)
        .bind(checkpoint.block_number.to_string())
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(stream = %checkpoint.stream, block = checkpoint.block_number, "checkpoint saved");
        Ok(())
    }

    async fn delete(&self, stream: &str) -> Result<(), CrawlError> {
        sqlx::query("DELETE FROM crawl_progress WHERE stream = ?")
            .bind(stream)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}
