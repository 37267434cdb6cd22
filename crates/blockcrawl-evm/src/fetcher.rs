//! [`RecordFetcher`] and [`ChainHead`] implementations over an [`EvmRpcClient`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};

use blockcrawl_core::{
    BlockNumber, ChainHead, CrawlError, LogFilter, RawRecord, RecordFetcher, RetrievalQuery,
};

use crate::rpc::{block_from_json, EvmRpcClient, RawLog};

/// Fetches logs with one `eth_getLogs` call per span.
///
/// Removed (reorged) logs and logs outside the query filter are dropped.
pub struct LogFetcher<C> {
    client: Arc<C>,
}

impl<C: EvmRpcClient> LogFetcher<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }
}

fn keep(log: &RawLog, filter: &LogFilter) -> bool {
    !log.is_removed()
        && filter.matches_address(&log.address)
        && match log.topics.first() {
            Some(topic0) => filter.matches_topic0(topic0),
            None => filter.topic0_values.is_empty(),
        }
}

#[async_trait]
impl<C: EvmRpcClient> RecordFetcher for LogFetcher<C> {
    async fn fetch(&self, query: &RetrievalQuery) -> Result<Vec<RawRecord>, CrawlError> {
        let logs = self.client.get_logs(query).await?;
        let returned = logs.len();
        let records = logs
            .into_iter()
            .filter(|log| keep(log, query.filter()))
            .map(RawLog::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        if records.len() != returned {
            tracing::debug!(
                span = %query.span(),
                returned,
                kept = records.len(),
                "Dropped removed or unmatched logs"
            );
        }
        Ok(records)
    }
}

/// Default number of `eth_getBlockByNumber` calls in flight per span.
pub const DEFAULT_BLOCK_CONCURRENCY: usize = 8;

/// Fetches one [`RawRecord`] per block in the span.
///
/// At most `concurrency` blocks are requested at once; a block the node does
/// not know fails the whole span.
pub struct BlockFetcher<C> {
    client: Arc<C>,
    concurrency: usize,
}

impl<C: EvmRpcClient> BlockFetcher<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            client,
            concurrency: DEFAULT_BLOCK_CONCURRENCY,
        }
    }

    /// Cap on concurrent block requests. Zero is treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    async fn block(&self, number: BlockNumber) -> Result<RawRecord, CrawlError> {
        let json = self
            .client
            .get_block(number)
            .await?
            .ok_or_else(|| CrawlError::Retrieval(format!("block {number} not found")))?;
        let payload = block_from_json(&json)
            .ok_or_else(|| CrawlError::Retrieval(format!("malformed block {number}")))?;
        Ok(RawRecord::block(number, payload))
    }
}

#[async_trait]
impl<C: EvmRpcClient> RecordFetcher for BlockFetcher<C> {
    async fn fetch(&self, query: &RetrievalQuery) -> Result<Vec<RawRecord>, CrawlError> {
        let span = query.span();
        stream::iter(span.from()..=span.to())
            .map(|n| self.block(n))
            .buffered(self.concurrency)
            .try_collect()
            .await
    }
}

/// Chain head from `eth_blockNumber`.
pub struct RpcChainHead<C> {
    client: Arc<C>,
}

impl<C: EvmRpcClient> RpcChainHead<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: EvmRpcClient> ChainHead for RpcChainHead<C> {
    async fn head_block_number(&self) -> Result<BlockNumber, CrawlError> {
        self.client.block_number().await
    }
}
