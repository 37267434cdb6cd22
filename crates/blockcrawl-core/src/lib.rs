//! blockcrawl-core: ordered, checkpointed crawling of logs and blocks from a
//! range-limited, reorg-capable chain node.
//!
//! # Architecture
//!
//! ```text
//! CrawlDriver
//!     ├── HeadTracker        (chain head − confirmations, never regresses)
//!     ├── ProgressTracker    (durable cursor per stream)
//!     └── CrawlOrchestrator  (one span per call)
//!             ├── RangePlanner     (narrows the span after each failure)
//!             ├── RecordFetcher    (data source, supplied by the host)
//!             └── HandlerPipeline  (ordered predicate/sink handlers)
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod fetcher;
pub mod handler;
pub mod head;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod telemetry;
pub mod types;

pub use config::{CrawlConfig, DriverMode, DriverState};
pub use driver::{CrawlDriver, CrawlEvent, DriverOutcome};
pub use error::CrawlError;
pub use fetcher::RecordFetcher;
pub use handler::{
    Decoded, Dispatch, HandlerErrorPolicy, HandlerPipeline, ProcessorHandler, RecordDecoder,
    RecordHandler, SinkError, TypedHandler,
};
pub use head::{ChainHead, HeadReading, HeadTracker};
pub use orchestrator::CrawlOrchestrator;
pub use planner::{plan_upper_bound, RangePlanner};
pub use progress::{Checkpoint, MemoryProgressStore, ProgressStore, ProgressTracker};
pub use types::{
    BlockNumber, BlockPayload, BlockSpan, LogFilter, LogPayload, RawRecord, RecordKey,
    RecordPayload, RetrievalQuery, SpanResult,
};

/// Re-exported so hosts can build tokens without a direct `tokio-util` dependency.
pub use tokio_util::sync::CancellationToken;
