//! One-call log collection.
//!
//! [`collect_logs`] runs a one-shot crawl with no confirmation depth into an
//! in-memory cursor and hands back every matching log in key order.

use std::sync::{Arc, Mutex};

use blockcrawl_core::{
    BlockNumber, CancellationToken, CrawlError, DriverMode, DriverOutcome, LogFilter,
    MemoryProgressStore, ProcessorHandler, RawRecord,
};

use crate::builder::CrawlerBuilder;
use crate::rpc::EvmRpcClient;

/// Collect every log matching `filter` in `[from, to]`.
///
/// With `to = None` the crawl runs up to the chain head at the time of each
/// head query. Spans the node rejects are narrowed like in any other crawl;
/// the first span that still fails ends the collection with its error.
pub async fn collect_logs<C: EvmRpcClient>(
    client: Arc<C>,
    filter: LogFilter,
    from: BlockNumber,
    to: Option<BlockNumber>,
) -> Result<Vec<RawRecord>, CrawlError> {
    collect_logs_with(CrawlerBuilder::new(), client, filter, from, to).await
}

/// [`collect_logs`] with span and retry settings taken from `builder`.
///
/// Mode, confirmations and filter are overridden.
pub async fn collect_logs_with<C: EvmRpcClient>(
    builder: CrawlerBuilder,
    client: Arc<C>,
    filter: LogFilter,
    from: BlockNumber,
    to: Option<BlockNumber>,
) -> Result<Vec<RawRecord>, CrawlError> {
    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = records.clone();

    let mut driver = builder
        .stream("collect")
        .mode(DriverMode::OneShot)
        .confirmations(0)
        .filter(filter)
        .handler(ProcessorHandler::from_fn("collect", move |record| {
            sink.lock()
                .map_err(|e| e.to_string())?
                .push(record.clone());
            Ok(())
        }))
        .build_log_crawler(client, Arc::new(MemoryProgressStore::new()))?;

    match driver.execute(to, from, &CancellationToken::new()).await {
        DriverOutcome::Completed { cursor } => {
            tracing::debug!(from, ?to, ?cursor, "Collection complete");
        }
        DriverOutcome::Halted { error, .. } => return Err(error),
        DriverOutcome::Cancelled { .. } => return Err(CrawlError::Cancelled),
    }

    let mut records = records.lock().map_err(|e| CrawlError::Other(e.to_string()))?;
    Ok(std::mem::take(&mut *records))
}
