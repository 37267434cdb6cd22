//! Crawl orchestrator: fetches a span with narrowing retries and
//! dispatches its records in order.
//!
//! For a span `[from, to]` the orchestrator asks the [`RangePlanner`] for an
//! upper bound, fetches, and on failure retries with a narrower span. After
//! each delivered piece it moves on to the rest of the span with a fresh
//! attempt counter. Only after `max_retries` narrowing attempts on one piece
//! does it give up, and even then it returns a [`SpanResult`] rather than an
//! error.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::CrawlConfig;
use crate::error::CrawlError;
use crate::fetcher::RecordFetcher;
use crate::handler::HandlerPipeline;
use crate::planner::RangePlanner;
use crate::types::{BlockNumber, BlockSpan, LogFilter, RawRecord, RetrievalQuery, SpanResult};

/// Default narrowing retries after the first failed fetch.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

pub struct CrawlOrchestrator<F> {
    fetcher: F,
    pipeline: HandlerPipeline,
    filter: Arc<LogFilter>,
    planner: RangePlanner,
    max_retries: u32,
    retry_delay: Duration,
}

impl<F: RecordFetcher> CrawlOrchestrator<F> {
    pub fn new(fetcher: F, pipeline: HandlerPipeline, max_span: u64) -> Self {
        Self {
            fetcher,
            pipeline,
            filter: Arc::new(LogFilter::default()),
            planner: RangePlanner::new(max_span),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::ZERO,
        }
    }

    /// Orchestrator configured from `config` (span, retries, filter).
    pub fn from_config(fetcher: F, pipeline: HandlerPipeline, config: &CrawlConfig) -> Self {
        Self::new(fetcher, pipeline, config.max_span)
            .with_filter(config.filter.clone())
            .with_max_retries(config.max_retries)
            .with_retry_delay(config.retry_delay())
    }

    pub fn with_filter(mut self, filter: LogFilter) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn planner(&self) -> RangePlanner {
        self.planner
    }

    /// Process every block of `[from, to]`.
    ///
    /// On success the result's `to` is the requested `to`. On failure it is
    /// `from`: pieces already delivered are not reported as progress, so the
    /// caller retries the whole span.
    pub async fn process(
        &self,
        from: BlockNumber,
        to: BlockNumber,
        cancel: &CancellationToken,
    ) -> SpanResult {
        if from > to {
            return SpanResult::failure(from, CrawlError::InvalidSpan { from, to });
        }

        let mut next = from;
        let mut delivered = 0;
        loop {
            let piece = self.process_prefix(next, to, cancel).await;
            delivered += piece.records_delivered;
            if let Some(error) = piece.error {
                return SpanResult {
                    to: from,
                    records_delivered: delivered,
                    error: Some(error),
                };
            }
            if piece.to >= to {
                return SpanResult::success(to, delivered);
            }
            tracing::debug!(from, done = piece.to, to, "Continuing with rest of span");
            next = piece.to + 1;
        }
    }

    /// Deliver the first fetchable prefix of `[from, to]`, narrowing on
    /// fetch failures.
    async fn process_prefix(
        &self,
        from: BlockNumber,
        to: BlockNumber,
        cancel: &CancellationToken,
    ) -> SpanResult {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return SpanResult::failure(from, CrawlError::Cancelled);
            }

            let candidate_to = self.planner.plan(from, to, attempt);
            let span = BlockSpan::clamped(from, candidate_to);
            let query = RetrievalQuery::new(span, self.filter.clone());

            tracing::debug!(%span, attempt, "Fetching span");

            match self.fetcher.fetch(&query).await {
                Ok(records) => return self.deliver(span, records, cancel).await,
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        tracing::warn!(
                            %span,
                            attempts = attempt,
                            error = %e,
                            "Retry budget exhausted"
                        );
                        return SpanResult::failure(
                            from,
                            CrawlError::RetryBudgetExhausted {
                                span,
                                attempts: attempt,
                                last: Box::new(e),
                            },
                        );
                    }
                    tracing::warn!(%span, attempt, error = %e, "Fetch failed, narrowing span");
                    if !self.retry_delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                return SpanResult::failure(from, CrawlError::Cancelled);
                            }
                            _ = tokio::time::sleep(self.retry_delay * attempt) => {}
                        }
                    }
                }
            }
        }
    }

    /// Sort, de-duplicate and dispatch the records of a fetched span.
    async fn deliver(
        &self,
        span: BlockSpan,
        mut records: Vec<RawRecord>,
        cancel: &CancellationToken,
    ) -> SpanResult {
        let fetched = records.len();
        records.retain(|r| span.contains(r.block_number));
        if records.len() != fetched {
            tracing::warn!(
                %span,
                dropped = fetched - records.len(),
                "Fetcher returned records outside the requested span"
            );
        }
        records.sort_by_key(RawRecord::key);
        records.dedup_by_key(|r| r.key());

        let mut delivered = 0;
        for record in &records {
            if cancel.is_cancelled() {
                return SpanResult::failure(span.from(), CrawlError::Cancelled);
            }
            match self.pipeline.dispatch(record).await {
                Ok(0) => {}
                Ok(_) => delivered += 1,
                Err(e) => {
                    tracing::warn!(%span, block = record.block_number, error = %e, "Span aborted by handler");
                    return SpanResult::failure(span.from(), e);
                }
            }
        }

        tracing::debug!(%span, records = records.len(), delivered, "Span delivered");
        SpanResult::success(span.to(), delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerErrorPolicy, ProcessorHandler};
    use crate::types::LogPayload;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn log(block: BlockNumber, tx: u64, idx: u64) -> RawRecord {
        RawRecord::log(
            block,
            tx,
            idx,
            LogPayload {
                address: "0xtoken".into(),
                topics: vec!["0xddf2".into()],
                data: "0x".into(),
                block_hash: format!("0x{block}"),
                tx_hash: format!("0x{block}{tx}"),
            },
        )
    }

    /// Fails when the span is wider than `limit`; otherwise returns `records`
    /// filtered to the span. Every requested span is recorded.
    struct LimitedFetcher {
        limit: BlockNumber,
        records: Vec<RawRecord>,
        calls: Mutex<Vec<BlockSpan>>,
    }

    impl LimitedFetcher {
        fn new(limit: BlockNumber, records: Vec<RawRecord>) -> Self {
            Self {
                limit,
                records,
                calls: Mutex::new(vec![]),
            }
        }

        fn calls(&self) -> Vec<BlockSpan> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RecordFetcher for LimitedFetcher {
        async fn fetch(&self, query: &RetrievalQuery) -> Result<Vec<RawRecord>, CrawlError> {
            let span = query.span();
            self.calls.lock().unwrap().push(span);
            if span.len() > self.limit {
                return Err(CrawlError::Retrieval(format!("block range too large: {}", span.len())));
            }
            Ok(self
                .records
                .iter()
                .filter(|r| span.contains(r.block_number))
                .cloned()
                .collect())
        }
    }

    fn recording_pipeline() -> (HandlerPipeline, Arc<Mutex<Vec<(BlockNumber, u64, u64)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let pipeline = HandlerPipeline::default().with_handler(ProcessorHandler::from_fn(
            "recorder",
            move |r| {
                s.lock()
                    .unwrap()
                    .push((r.block_number, r.transaction_index, r.log_index));
                Ok(())
            },
        ));
        (pipeline, seen)
    }

    fn span(from: BlockNumber, to: BlockNumber) -> BlockSpan {
        BlockSpan::new(from, to).unwrap()
    }

    #[tokio::test]
    async fn narrowing_converges_to_requested_end() {
        let fetcher = LimitedFetcher::new(5, vec![log(10, 0, 0), log(14, 1, 0), log(15, 0, 0)]);
        let (pipeline, seen) = recording_pipeline();
        let orch = CrawlOrchestrator::new(fetcher, pipeline, 10);

        let result = orch.process(10, 20, &CancellationToken::new()).await;

        assert!(result.is_success(), "unexpected error: {:?}", result.error);
        assert_eq!(result.to, 20);
        assert_eq!(result.records_delivered, 3);
        assert_eq!(
            orch.fetcher.calls(),
            vec![span(10, 19), span(10, 14), span(15, 20), span(15, 17), span(18, 20)]
        );
        assert_eq!(*seen.lock().unwrap(), vec![(10, 0, 0), (14, 1, 0), (15, 0, 0)]);
    }

    #[tokio::test]
    async fn failure_after_partial_delivery_reports_no_progress() {
        struct FailsFrom(BlockNumber);

        #[async_trait]
        impl RecordFetcher for FailsFrom {
            async fn fetch(&self, q: &RetrievalQuery) -> Result<Vec<RawRecord>, CrawlError> {
                let span = q.span();
                if span.to() >= self.0 {
                    return Err(CrawlError::Retrieval("upstream timeout".into()));
                }
                Ok((span.from()..=span.to()).map(|b| log(b, 0, 0)).collect())
            }
        }

        let (pipeline, seen) = recording_pipeline();
        let orch = CrawlOrchestrator::new(FailsFrom(15), pipeline, 10).with_max_retries(2);

        let result = orch.process(10, 20, &CancellationToken::new()).await;

        assert_eq!(result.to, 10);
        assert!(matches!(
            result.error,
            Some(CrawlError::RetryBudgetExhausted { attempts: 3, .. })
        ));
        // [10,19] ✗ → [10,14] ✓, then [15,20] ✗ → [15,17] ✗ → [15,16] ✗
        assert_eq!(seen.lock().unwrap().len(), 5);
        assert_eq!(result.records_delivered, 5);
    }

    #[tokio::test]
    async fn exhausted_budget_reports_zero_progress() {
        let fetcher = LimitedFetcher::new(0, vec![log(3, 0, 0)]);
        let (pipeline, seen) = recording_pipeline();
        let orch = CrawlOrchestrator::new(fetcher, pipeline, 100).with_max_retries(4);

        let result = orch.process(3, 9, &CancellationToken::new()).await;

        assert_eq!(result.to, 3);
        assert_eq!(result.records_delivered, 0);
        match result.error {
            Some(CrawlError::RetryBudgetExhausted { attempts, last, .. }) => {
                assert_eq!(attempts, 5);
                assert!(last.is_transient());
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(orch.fetcher.calls().len(), 5);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn records_are_delivered_in_key_order() {
        struct Shuffled;

        #[async_trait]
        impl RecordFetcher for Shuffled {
            async fn fetch(&self, _q: &RetrievalQuery) -> Result<Vec<RawRecord>, CrawlError> {
                Ok(vec![log(7, 2, 5), log(5, 0, 1), log(7, 0, 9), log(5, 0, 0), log(6, 4, 2)])
            }
        }

        let (pipeline, seen) = recording_pipeline();
        let orch = CrawlOrchestrator::new(Shuffled, pipeline, 100);
        let result = orch.process(5, 7, &CancellationToken::new()).await;

        assert_eq!(result.records_delivered, 5);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(5, 0, 0), (5, 0, 1), (6, 4, 2), (7, 0, 9), (7, 2, 5)]
        );
    }

    #[tokio::test]
    async fn duplicates_and_out_of_span_records_are_dropped() {
        struct Sloppy;

        #[async_trait]
        impl RecordFetcher for Sloppy {
            async fn fetch(&self, _q: &RetrievalQuery) -> Result<Vec<RawRecord>, CrawlError> {
                Ok(vec![log(2, 0, 0), log(2, 0, 0), log(99, 0, 0)])
            }
        }

        let (pipeline, seen) = recording_pipeline();
        let orch = CrawlOrchestrator::new(Sloppy, pipeline, 100);
        let result = orch.process(1, 3, &CancellationToken::new()).await;

        assert_eq!(result.to, 3);
        assert_eq!(*seen.lock().unwrap(), vec![(2, 0, 0)]);
    }

    #[tokio::test]
    async fn genesis_span_needs_no_special_case() {
        let fetcher = LimitedFetcher::new(1, vec![log(0, 0, 0)]);
        let (pipeline, seen) = recording_pipeline();
        let orch = CrawlOrchestrator::new(fetcher, pipeline, 10);

        let result = orch.process(0, 0, &CancellationToken::new()).await;

        assert!(result.is_success());
        assert_eq!(result.to, 0);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn handler_failure_aborts_span_without_retry() {
        let fetcher = LimitedFetcher::new(100, vec![log(1, 0, 0), log(2, 0, 0)]);
        let attempts = Arc::new(AtomicU32::new(0));
        let a = attempts.clone();
        let pipeline = HandlerPipeline::new(HandlerErrorPolicy::Abort).with_handler(
            ProcessorHandler::from_fn("flaky", move |r| {
                a.fetch_add(1, Ordering::Relaxed);
                if r.block_number == 2 {
                    Err("constraint violation".into())
                } else {
                    Ok(())
                }
            }),
        );
        let orch = CrawlOrchestrator::new(fetcher, pipeline, 100);

        let result = orch.process(1, 5, &CancellationToken::new()).await;

        assert_eq!(result.to, 1);
        assert!(matches!(result.error, Some(CrawlError::Handler { .. })));
        assert_eq!(orch.fetcher.calls().len(), 1);
        assert_eq!(attempts.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn cancelled_before_fetch() {
        let fetcher = LimitedFetcher::new(100, vec![]);
        let orch = CrawlOrchestrator::new(fetcher, HandlerPipeline::default(), 100);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orch.process(1, 5, &cancel).await;

        assert!(matches!(result.error, Some(CrawlError::Cancelled)));
        assert!(orch.fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn inverted_span_is_rejected() {
        let orch = CrawlOrchestrator::new(LimitedFetcher::new(100, vec![]), HandlerPipeline::default(), 100);
        let result = orch.process(9, 3, &CancellationToken::new()).await;
        assert!(matches!(result.error, Some(CrawlError::InvalidSpan { from: 9, to: 3 })));
    }
}
