//! Record fetcher: the collaborator that talks to the data source.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CrawlError;
use crate::types::{RawRecord, RetrievalQuery};

/// Retrieves raw records for a block span.
///
/// Implementations own transport concerns (timeouts included). Any error is
/// treated by the orchestrator as transient and answered by narrowing the
/// span, so implementations should not retry internally on range-limit
/// rejections.
#[async_trait]
pub trait RecordFetcher: Send + Sync {
    async fn fetch(&self, query: &RetrievalQuery) -> Result<Vec<RawRecord>, CrawlError>;
}

#[async_trait]
impl<T: RecordFetcher + ?Sized> RecordFetcher for Arc<T> {
    async fn fetch(&self, query: &RetrievalQuery) -> Result<Vec<RawRecord>, CrawlError> {
        (**self).fetch(query).await
    }
}
