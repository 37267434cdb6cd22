//! The crawl driver: the top-level checkpointed loop.
//!
//! ```text
//! Idle → LoadingCursor → Bounding ─┬→ Processing → Checkpointing → Bounding …
//!                          ↑       │        └→ Backoff ─┘ (continuous)
//!                          └ Waiting┘        └→ Halted    (one-shot)
//! ```
//!
//! Each span covers at most `max_span` blocks and is checkpointed on its own.
//! The cursor only moves after a span completed with no error, so a restarted
//! driver never skips blocks. Records of a failed span may be delivered again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::config::{CrawlConfig, DriverMode, DriverState};
use crate::error::CrawlError;
use crate::fetcher::RecordFetcher;
use crate::head::{ChainHead, HeadReading, HeadTracker};
use crate::orchestrator::CrawlOrchestrator;
use crate::progress::{ProgressStore, ProgressTracker};
use crate::types::BlockNumber;

/// Published by the driver for observability.
#[derive(Debug)]
pub enum CrawlEvent {
    Resumed { cursor: Option<BlockNumber>, next: BlockNumber },
    SpanCompleted { from: BlockNumber, to: BlockNumber, records: usize },
    SpanFailed { from: BlockNumber, target: BlockNumber, error: CrawlError },
    HeadRegressed { previous: BlockNumber, observed: BlockNumber },
    /// Caught up with the safe head.
    Waiting { next: BlockNumber, bound: Option<BlockNumber> },
}

/// How an `execute` call ended.
#[derive(Debug)]
pub enum DriverOutcome {
    /// Reached the stop block, or caught up in one-shot mode.
    Completed { cursor: Option<BlockNumber> },
    Cancelled { cursor: Option<BlockNumber> },
    /// Gave up on an error (one-shot mode, or a cursor that could not be loaded).
    Halted { cursor: Option<BlockNumber>, error: CrawlError },
}

impl DriverOutcome {
    /// Last checkpointed block at the end of the run.
    pub fn cursor(&self) -> Option<BlockNumber> {
        match self {
            Self::Completed { cursor } | Self::Cancelled { cursor } | Self::Halted { cursor, .. } => {
                *cursor
            }
        }
    }

    pub fn error(&self) -> Option<&CrawlError> {
        match self {
            Self::Halted { error, .. } => Some(error),
            _ => None,
        }
    }
}

pub struct CrawlDriver<F, H> {
    orchestrator: CrawlOrchestrator<F>,
    head: HeadTracker<H>,
    progress: ProgressTracker,
    mode: DriverMode,
    poll_interval: Duration,
    error_backoff: Duration,
    events: Option<UnboundedSender<CrawlEvent>>,
    state: DriverState,
}

impl<F: RecordFetcher, H: ChainHead> CrawlDriver<F, H> {
    pub fn new(
        orchestrator: CrawlOrchestrator<F>,
        head: HeadTracker<H>,
        store: Arc<dyn ProgressStore>,
        config: &CrawlConfig,
    ) -> Self {
        Self {
            orchestrator,
            head,
            progress: ProgressTracker::new(store, config.stream.clone()),
            mode: config.mode,
            poll_interval: config.poll_interval(),
            error_backoff: config.error_backoff(),
            events: None,
            state: DriverState::Idle,
        }
    }

    /// Publish [`CrawlEvent`]s on `tx`. Send errors (receiver dropped) are ignored.
    pub fn with_events(mut self, tx: UnboundedSender<CrawlEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_mode(mut self, mode: DriverMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn stream(&self) -> &str {
        self.progress.stream()
    }

    /// Run until `stop_at` is processed, the run is cancelled, or (one-shot
    /// mode) the safe head is reached or a span fails.
    ///
    /// Without a saved cursor the crawl starts at `start_if_no_cursor`.
    pub async fn execute(
        &mut self,
        stop_at: Option<BlockNumber>,
        start_if_no_cursor: BlockNumber,
        cancel: &CancellationToken,
    ) -> DriverOutcome {
        self.state = DriverState::LoadingCursor;
        let mut cursor = match self.progress.load_cursor().await {
            Ok(cursor) => cursor,
            Err(error) => {
                tracing::error!(stream = self.stream(), %error, "Failed to load cursor");
                self.state = DriverState::Halted;
                return DriverOutcome::Halted { cursor: None, error };
            }
        };
        let mut next = match cursor {
            None => start_if_no_cursor,
            Some(c) => match c.checked_add(1) {
                Some(next) => next,
                None => return self.finish(cursor),
            },
        };
        tracing::info!(stream = self.stream(), ?cursor, next, "Resuming crawl");
        self.emit(CrawlEvent::Resumed { cursor, next });

        loop {
            if cancel.is_cancelled() {
                self.state = DriverState::Halted;
                return DriverOutcome::Cancelled { cursor };
            }
            if stop_at.is_some_and(|stop| next > stop) {
                tracing::info!(stream = self.stream(), ?cursor, "Reached stop block");
                self.state = DriverState::Done;
                return DriverOutcome::Completed { cursor };
            }

            self.state = DriverState::Bounding;
            let bound = match self.head.safe_upper_bound().await {
                Ok(reading) => {
                    if let HeadReading::Regressed { previous, observed } = reading {
                        self.emit(CrawlEvent::HeadRegressed { previous, observed });
                    }
                    reading.bound()
                }
                Err(error) => {
                    tracing::warn!(stream = self.stream(), %error, "Head query failed");
                    match self.on_failure(cursor, next, next, error, cancel).await {
                        Some(outcome) => return outcome,
                        None => continue,
                    }
                }
            };

            let max_span = self.orchestrator.planner().max_span() as BlockNumber;
            let window_end = next.saturating_add(max_span - 1);
            let target = match bound {
                Some(bound) if bound >= next => {
                    stop_at.map_or(bound, |stop| stop.min(bound)).min(window_end)
                }
                _ => {
                    self.emit(CrawlEvent::Waiting { next, bound });
                    if self.mode == DriverMode::OneShot {
                        tracing::info!(stream = self.stream(), next, ?bound, "Caught up with safe head");
                        self.state = DriverState::Done;
                        return DriverOutcome::Completed { cursor };
                    }
                    self.state = DriverState::Waiting;
                    if !sleep_or_cancel(self.poll_interval, cancel).await {
                        self.state = DriverState::Halted;
                        return DriverOutcome::Cancelled { cursor };
                    }
                    continue;
                }
            };

            self.state = DriverState::Processing;
            let result = self.orchestrator.process(next, target, cancel).await;
            if let Some(error) = result.error {
                if error.is_cancelled() {
                    self.state = DriverState::Halted;
                    return DriverOutcome::Cancelled { cursor };
                }
                match self.on_failure(cursor, next, target, error, cancel).await {
                    Some(outcome) => return outcome,
                    None => continue,
                }
            }

            self.state = DriverState::Checkpointing;
            if let Err(error) = self.progress.save_cursor(result.to).await {
                tracing::error!(stream = self.stream(), %error, to = result.to, "Failed to save cursor");
                match self.on_failure(cursor, next, target, error, cancel).await {
                    Some(outcome) => return outcome,
                    None => continue,
                }
            }

            tracing::info!(
                stream = self.stream(),
                from = next,
                to = result.to,
                target,
                records = result.records_delivered,
                "Span complete"
            );
            self.emit(CrawlEvent::SpanCompleted {
                from: next,
                to: result.to,
                records: result.records_delivered,
            });
            cursor = Some(result.to);
            next = match result.to.checked_add(1) {
                Some(next) => next,
                None => return self.finish(cursor),
            };
        }
    }

    /// The cursor sits on the last representable block.
    fn finish(&mut self, cursor: Option<BlockNumber>) -> DriverOutcome {
        tracing::info!(stream = self.stream(), ?cursor, "No blocks left to crawl");
        self.state = DriverState::Done;
        DriverOutcome::Completed { cursor }
    }

    /// Publish a failure, then halt (one-shot) or back off (continuous).
    /// Returns `None` when the loop should go around again.
    async fn on_failure(
        &mut self,
        cursor: Option<BlockNumber>,
        from: BlockNumber,
        target: BlockNumber,
        error: CrawlError,
        cancel: &CancellationToken,
    ) -> Option<DriverOutcome> {
        tracing::warn!(stream = self.stream(), from, target, %error, "Span failed, cursor not advanced");
        if self.mode == DriverMode::OneShot {
            self.emit(CrawlEvent::SpanFailed {
                from,
                target,
                error: error.clone(),
            });
            self.state = DriverState::Halted;
            return Some(DriverOutcome::Halted { cursor, error });
        }
        self.emit(CrawlEvent::SpanFailed { from, target, error });
        self.state = DriverState::Backoff;
        if sleep_or_cancel(self.error_backoff, cancel).await {
            None
        } else {
            self.state = DriverState::Halted;
            Some(DriverOutcome::Cancelled { cursor })
        }
    }

    fn emit(&self, event: CrawlEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

/// Sleep for `duration`; returns `false` if cancelled first.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
