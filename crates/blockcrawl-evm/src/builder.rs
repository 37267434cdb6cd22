//! Fluent builder API for creating EVM crawlers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use blockcrawl_core::{LogFilter, MemoryProgressStore};
//! use blockcrawl_evm::{CrawlerBuilder, EvmRpcClient};
//!
//! # async fn run<C: EvmRpcClient + 'static>(client: Arc<C>) -> Result<(), blockcrawl_core::CrawlError> {
//! let driver = CrawlerBuilder::new()
//!     .stream("ethereum:usdc-transfers")
//!     .confirmations(12)
//!     .max_span(500)
//!     .filter(LogFilter::address("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"))
//!     .build_log_crawler(client, Arc::new(MemoryProgressStore::new()))?;
//! # Ok(()) }
//! ```

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use blockcrawl_core::{
    CrawlConfig, CrawlDriver, CrawlError, CrawlEvent, CrawlOrchestrator, DriverMode,
    HandlerErrorPolicy, HandlerPipeline, HeadTracker, LogFilter, ProgressStore, RecordFetcher,
    RecordHandler,
};

use crate::fetcher::{BlockFetcher, LogFetcher, RpcChainHead};
use crate::rpc::EvmRpcClient;

/// Fluent builder for a [`CrawlDriver`] over an [`EvmRpcClient`].
#[derive(Default)]
pub struct CrawlerBuilder {
    config: CrawlConfig,
    handlers: Vec<Arc<dyn RecordHandler>>,
    events: Option<UnboundedSender<CrawlEvent>>,
}

impl CrawlerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing (e.g. JSON-loaded) configuration.
    pub fn from_config(config: CrawlConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Set the stream key (used for checkpoint keys).
    pub fn stream(mut self, stream: impl Into<String>) -> Self {
        self.config.stream = stream.into();
        self
    }

    /// Set the maximum number of blocks per fetch.
    pub fn max_span(mut self, blocks: u64) -> Self {
        self.config.max_span = blocks;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    /// Set confirmation depth (blocks behind head before processing).
    pub fn confirmations(mut self, depth: u64) -> Self {
        self.config.confirmations = depth;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn error_backoff_ms(mut self, ms: u64) -> Self {
        self.config.error_backoff_ms = ms;
        self
    }

    pub fn handler_error_policy(mut self, policy: HandlerErrorPolicy) -> Self {
        self.config.handler_error_policy = policy;
        self
    }

    pub fn mode(mut self, mode: DriverMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Set the address/topic filter.
    pub fn filter(mut self, filter: LogFilter) -> Self {
        self.config.filter = filter;
        self
    }

    /// Register a handler. Handlers run in registration order.
    pub fn handler(mut self, handler: impl RecordHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Publish driver events on `tx`.
    pub fn events(mut self, tx: UnboundedSender<CrawlEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Build the [`CrawlConfig`] only.
    pub fn build_config(self) -> CrawlConfig {
        self.config
    }

    /// A driver crawling logs with `eth_getLogs`.
    pub fn build_log_crawler<C: EvmRpcClient>(
        self,
        client: Arc<C>,
        store: Arc<dyn ProgressStore>,
    ) -> Result<CrawlDriver<LogFetcher<C>, RpcChainHead<C>>, CrawlError> {
        let fetcher = LogFetcher::new(client.clone());
        self.build_with(fetcher, RpcChainHead::new(client), store)
    }

    /// A driver crawling whole blocks with `eth_getBlockByNumber`.
    pub fn build_block_crawler<C: EvmRpcClient>(
        self,
        client: Arc<C>,
        store: Arc<dyn ProgressStore>,
    ) -> Result<CrawlDriver<BlockFetcher<C>, RpcChainHead<C>>, CrawlError> {
        let fetcher = BlockFetcher::new(client.clone());
        self.build_with(fetcher, RpcChainHead::new(client), store)
    }

    fn build_with<F: RecordFetcher, C: EvmRpcClient>(
        self,
        fetcher: F,
        head: RpcChainHead<C>,
        store: Arc<dyn ProgressStore>,
    ) -> Result<CrawlDriver<F, RpcChainHead<C>>, CrawlError> {
        self.config.validate()?;
        let mut pipeline = HandlerPipeline::new(self.config.handler_error_policy);
        for handler in self.handlers {
            pipeline.push(handler);
        }
        let orchestrator = CrawlOrchestrator::from_config(fetcher, pipeline, &self.config);
        let head = HeadTracker::new(head, self.config.confirmations);
        let driver = CrawlDriver::new(orchestrator, head, store, &self.config);
        Ok(match self.events {
            Some(tx) => driver.with_events(tx),
            None => driver,
        })
    }
}
