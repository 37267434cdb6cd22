//! Error types for the crawl pipeline.

use thiserror::Error;

use crate::types::{BlockNumber, BlockSpan};

/// Errors that can occur while crawling.
#[derive(Debug, Clone, Error)]
pub enum CrawlError {
    /// A fetch against the data source failed (timeout, range limit, rate limit).
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Retry budget exhausted for span {span} after {attempts} attempts: {last}")]
    RetryBudgetExhausted {
        span: BlockSpan,
        attempts: u32,
        last: Box<CrawlError>,
    },

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid span: from {from} is after to {to}")]
    InvalidSpan { from: BlockNumber, to: BlockNumber },

    #[error("Crawl cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl CrawlError {
    /// Build a handler error from anything displayable.
    pub fn handler(handler: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Handler {
            handler: handler.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` if the error is a transient retrieval failure that
    /// narrowing may recover from.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Retrieval(_))
    }

    /// Returns `true` if the crawl stopped because it was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The innermost error, looking through `RetryBudgetExhausted`.
    pub fn root(&self) -> &CrawlError {
        match self {
            Self::RetryBudgetExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}
