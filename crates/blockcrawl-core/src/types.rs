//! Shared types for the crawl pipeline.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CrawlError;

/// A block number. Wider than `u64` so chains with very large numbering fit.
pub type BlockNumber = u128;

// ─── BlockSpan ────────────────────────────────────────────────────────────────

/// An inclusive range of block numbers submitted as one retrieval unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockSpan {
    from: BlockNumber,
    to: BlockNumber,
}

impl BlockSpan {
    /// Create a span; fails if `from > to`.
    pub fn new(from: BlockNumber, to: BlockNumber) -> Result<Self, CrawlError> {
        if from > to {
            return Err(CrawlError::InvalidSpan { from, to });
        }
        Ok(Self { from, to })
    }

    /// Span from `from` to `to`, with `to` raised to `from` if it is lower.
    pub fn clamped(from: BlockNumber, to: BlockNumber) -> Self {
        Self { from, to: to.max(from) }
    }

    /// A span covering exactly one block.
    pub fn single(block: BlockNumber) -> Self {
        Self { from: block, to: block }
    }

    pub fn from(&self) -> BlockNumber {
        self.from
    }

    pub fn to(&self) -> BlockNumber {
        self.to
    }

    /// Number of blocks in the span (always ≥ 1).
    pub fn len(&self) -> BlockNumber {
        self.to - self.from + 1
    }

    /// Spans are never empty; provided for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns `true` if `block` lies inside the span.
    pub fn contains(&self, block: BlockNumber) -> bool {
        self.from <= block && block <= self.to
    }
}

impl fmt::Display for BlockSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

// ─── RawRecord ────────────────────────────────────────────────────────────────

/// Total ordering key of a record: `(block, transaction index, log index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub block_number: BlockNumber,
    pub transaction_index: u64,
    pub log_index: u64,
}

/// Payload of an EVM-style log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPayload {
    /// Emitting contract address (`0x…`).
    pub address: String,
    /// Indexed topics; `topics[0]` is the event signature hash.
    pub topics: Vec<String>,
    /// Non-indexed data (`0x…`).
    pub data: String,
    pub block_hash: String,
    pub tx_hash: String,
}

/// Payload of a whole block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockPayload {
    pub hash: String,
    pub parent_hash: String,
    /// Unix timestamp (seconds).
    pub timestamp: i64,
    pub tx_count: u32,
    /// The full block body as returned by the node.
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    Log(LogPayload),
    Block(BlockPayload),
}

/// One unit delivered by the data source for a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub block_number: BlockNumber,
    pub transaction_index: u64,
    pub log_index: u64,
    pub payload: RecordPayload,
}

impl RawRecord {
    pub fn log(block_number: BlockNumber, transaction_index: u64, log_index: u64, log: LogPayload) -> Self {
        Self {
            block_number,
            transaction_index,
            log_index,
            payload: RecordPayload::Log(log),
        }
    }

    /// Block records sort before any log of the same block.
    pub fn block(block_number: BlockNumber, block: BlockPayload) -> Self {
        Self {
            block_number,
            transaction_index: 0,
            log_index: 0,
            payload: RecordPayload::Block(block),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            block_number: self.block_number,
            transaction_index: self.transaction_index,
            log_index: self.log_index,
        }
    }

    pub fn as_log(&self) -> Option<&LogPayload> {
        match &self.payload {
            RecordPayload::Log(log) => Some(log),
            RecordPayload::Block(_) => None,
        }
    }

    pub fn as_block(&self) -> Option<&BlockPayload> {
        match &self.payload {
            RecordPayload::Block(block) => Some(block),
            RecordPayload::Log(_) => None,
        }
    }

    /// `topics[0]` of a log record.
    pub fn topic0(&self) -> Option<&str> {
        self.as_log()?.topics.first().map(String::as_str)
    }
}

// ─── LogFilter ────────────────────────────────────────────────────────────────

/// Address / topic filter forwarded to the data source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    /// Only logs from these contract addresses (empty = all addresses).
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Only logs with one of these topic[0] values (empty = all events).
    #[serde(default)]
    pub topic0_values: Vec<String>,
}

impl LogFilter {
    /// Create a filter for a single contract address.
    pub fn address(addr: impl Into<String>) -> Self {
        Self {
            addresses: vec![addr.into()],
            ..Default::default()
        }
    }

    /// Create a filter for several contract addresses.
    pub fn addresses<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addrs.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Add a topic0 filter (event signature hash).
    pub fn topic0(mut self, topic: impl Into<String>) -> Self {
        self.topic0_values.push(topic.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.topic0_values.is_empty()
    }

    /// Returns `true` if `address` matches this filter.
    pub fn matches_address(&self, address: &str) -> bool {
        self.addresses.is_empty()
            || self.addresses.iter().any(|a| a.eq_ignore_ascii_case(address))
    }

    /// Returns `true` if `topic0` matches this filter.
    pub fn matches_topic0(&self, topic0: &str) -> bool {
        self.topic0_values.is_empty()
            || self.topic0_values.iter().any(|t| t.eq_ignore_ascii_case(topic0))
    }
}

// ─── RetrievalQuery ───────────────────────────────────────────────────────────

/// Parameters of one fetch call. Immutable once built.
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    span: BlockSpan,
    filter: Arc<LogFilter>,
}

impl RetrievalQuery {
    pub fn new(span: BlockSpan, filter: Arc<LogFilter>) -> Self {
        Self { span, filter }
    }

    pub fn span(&self) -> BlockSpan {
        self.span
    }

    pub fn filter(&self) -> &LogFilter {
        &self.filter
    }

    /// Address filter, `None` when every address matches.
    pub fn addresses(&self) -> Option<&[String]> {
        (!self.filter.addresses.is_empty()).then_some(self.filter.addresses.as_slice())
    }

    /// Topic[0] filter, `None` when every event matches.
    pub fn topic0_values(&self) -> Option<&[String]> {
        (!self.filter.topic0_values.is_empty()).then_some(self.filter.topic0_values.as_slice())
    }
}

// ─── SpanResult ───────────────────────────────────────────────────────────────

/// Outcome of processing one span.
///
/// When `error` is set, `to` equals the span's `from` and must not be
/// checkpointed.
#[derive(Debug)]
pub struct SpanResult {
    pub to: BlockNumber,
    pub records_delivered: usize,
    pub error: Option<CrawlError>,
}

impl SpanResult {
    pub fn success(to: BlockNumber, records_delivered: usize) -> Self {
        Self {
            to,
            records_delivered,
            error: None,
        }
    }

    pub fn failure(from: BlockNumber, error: CrawlError) -> Self {
        Self {
            to: from,
            records_delivered: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
