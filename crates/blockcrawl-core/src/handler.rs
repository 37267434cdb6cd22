//! Record handlers and the ordered pipeline that dispatches to them.
//!
//! Every handler exposes one async entry point. Plain sinks, synchronous
//! closures and typed decoders all reduce to [`RecordHandler::process`], which
//! reports whether the record was consumed or filtered out.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};

use crate::error::CrawlError;
use crate::types::RawRecord;

/// Error type returned by user sinks.
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type Sink<T> = Box<dyn Fn(T) -> BoxFuture<'static, Result<(), SinkError>> + Send + Sync>;

/// What the pipeline does when a sink fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerErrorPolicy {
    /// Log the failure and keep going with the remaining handlers and records.
    #[default]
    Isolate,
    /// Stop dispatching and fail the span. The span is not checkpointed and
    /// will be delivered again on retry.
    Abort,
}

/// Result of offering one record to one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    /// The predicate or decoder rejected the record.
    Skipped,
}

/// A consumer of raw records.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    /// Name used in logs and handler errors.
    fn name(&self) -> &str;

    async fn process(&self, record: &RawRecord) -> Result<Dispatch, SinkError>;
}

// ─── ProcessorHandler ─────────────────────────────────────────────────────────

/// Predicate + sink over raw records.
pub struct ProcessorHandler {
    name: String,
    criteria: Option<Predicate<RawRecord>>,
    sink: Sink<RawRecord>,
}

impl ProcessorHandler {
    /// Handler with an async sink.
    pub fn new<F, Fut>(name: impl Into<String>, sink: F) -> Self
    where
        F: Fn(RawRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SinkError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            criteria: None,
            sink: Box::new(move |record| Box::pin(sink(record))),
        }
    }

    /// Handler with a synchronous sink; it completes immediately.
    pub fn from_fn<F>(name: impl Into<String>, sink: F) -> Self
    where
        F: Fn(&RawRecord) -> Result<(), SinkError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            criteria: None,
            sink: Box::new(move |record| Box::pin(future::ready(sink(&record)))),
        }
    }

    /// Only records for which `criteria` returns `true` reach the sink.
    pub fn with_criteria<P>(mut self, criteria: P) -> Self
    where
        P: Fn(&RawRecord) -> bool + Send + Sync + 'static,
    {
        self.criteria = Some(Box::new(criteria));
        self
    }
}

#[async_trait]
impl RecordHandler for ProcessorHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, record: &RawRecord) -> Result<Dispatch, SinkError> {
        if let Some(criteria) = &self.criteria {
            if !criteria(record) {
                return Ok(Dispatch::Skipped);
            }
        }
        (self.sink)(record.clone()).await?;
        Ok(Dispatch::Handled)
    }
}

// ─── TypedHandler ─────────────────────────────────────────────────────────────

/// Turns a raw record into an application type, or `None` when the record
/// does not have the expected shape.
pub trait RecordDecoder: Send + Sync {
    type Output: Send + 'static;

    fn decode(&self, record: &RawRecord) -> Option<Self::Output>;
}

/// A decoded value together with the record it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub event: T,
    pub record: RawRecord,
}

/// Decode-then-filter handler. Records that fail to decode are skipped.
pub struct TypedHandler<D: RecordDecoder> {
    name: String,
    decoder: D,
    criteria: Option<Predicate<Decoded<D::Output>>>,
    sink: Sink<Decoded<D::Output>>,
}

impl<D: RecordDecoder> TypedHandler<D> {
    pub fn new<F, Fut>(name: impl Into<String>, decoder: D, sink: F) -> Self
    where
        F: Fn(Decoded<D::Output>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), SinkError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            decoder,
            criteria: None,
            sink: Box::new(move |decoded| Box::pin(sink(decoded))),
        }
    }

    pub fn from_fn<F>(name: impl Into<String>, decoder: D, sink: F) -> Self
    where
        F: Fn(&Decoded<D::Output>) -> Result<(), SinkError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            decoder,
            criteria: None,
            sink: Box::new(move |decoded| Box::pin(future::ready(sink(&decoded)))),
        }
    }

    pub fn with_criteria<P>(mut self, criteria: P) -> Self
    where
        P: Fn(&Decoded<D::Output>) -> bool + Send + Sync + 'static,
    {
        self.criteria = Some(Box::new(criteria));
        self
    }
}

#[async_trait]
impl<D: RecordDecoder> RecordHandler for TypedHandler<D> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, record: &RawRecord) -> Result<Dispatch, SinkError> {
        let Some(event) = self.decoder.decode(record) else {
            return Ok(Dispatch::Skipped);
        };
        let decoded = Decoded {
            event,
            record: record.clone(),
        };
        if let Some(criteria) = &self.criteria {
            if !criteria(&decoded) {
                return Ok(Dispatch::Skipped);
            }
        }
        (self.sink)(decoded).await?;
        Ok(Dispatch::Handled)
    }
}

// ─── HandlerPipeline ──────────────────────────────────────────────────────────

/// Ordered set of handlers. Each record is offered to every handler in
/// registration order.
pub struct HandlerPipeline {
    handlers: Vec<Arc<dyn RecordHandler>>,
    policy: HandlerErrorPolicy,
}

impl HandlerPipeline {
    pub fn new(policy: HandlerErrorPolicy) -> Self {
        Self {
            handlers: vec![],
            policy,
        }
    }

    /// Append a handler.
    pub fn with_handler(mut self, handler: impl RecordHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Append a shared handler.
    pub fn push(&mut self, handler: Arc<dyn RecordHandler>) {
        self.handlers.push(handler);
    }

    pub fn policy(&self) -> HandlerErrorPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Offer `record` to every handler, one after the other.
    ///
    /// Returns how many handlers consumed the record. Under
    /// [`HandlerErrorPolicy::Abort`] the first sink failure is returned as
    /// [`CrawlError::Handler`] and later handlers do not see the record.
    pub async fn dispatch(&self, record: &RawRecord) -> Result<usize, CrawlError> {
        let mut handled = 0;
        for handler in &self.handlers {
            match handler.process(record).await {
                Ok(Dispatch::Handled) => handled += 1,
                Ok(Dispatch::Skipped) => {}
                Err(e) => match self.policy {
                    HandlerErrorPolicy::Abort => {
                        return Err(CrawlError::handler(handler.name(), e));
                    }
                    HandlerErrorPolicy::Isolate => {
                        tracing::warn!(
                            handler = handler.name(),
                            block = record.block_number,
                            tx_index = record.transaction_index,
                            log_index = record.log_index,
                            error = %e,
                            "Handler failed, continuing"
                        );
                    }
                },
            }
        }
        Ok(handled)
    }
}

impl Default for HandlerPipeline {
    fn default() -> Self {
        Self::new(HandlerErrorPolicy::default())
    }
}
