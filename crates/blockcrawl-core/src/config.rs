//! Crawl configuration and driver state types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CrawlError;
use crate::handler::HandlerErrorPolicy;
use crate::types::LogFilter;

/// How the driver behaves once it catches up or a span fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverMode {
    /// Crawl up to the current safe head (or stop block) and return; halt on
    /// the first failed span.
    OneShot,
    /// Keep following the head; back off and retry failed spans.
    #[default]
    Continuous,
}

/// Configuration for one crawl stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Unique key of the stream (used for checkpoint keys).
    #[serde(default = "default_stream")]
    pub stream: String,
    /// Maximum number of blocks per fetch.
    #[serde(default = "default_max_span")]
    pub max_span: u64,
    /// Narrowing retries after the first failed fetch of a span.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before retry `n` is `n * retry_delay_ms`.
    #[serde(default)]
    pub retry_delay_ms: u64,
    /// Blocks held back from the chain head.
    /// Typical values: 12 (Ethereum PoS), 64 (Ethereum safe), 0 (trust the head).
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Head polling interval once caught up (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Wait before retrying a failed span in continuous mode (milliseconds).
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default)]
    pub handler_error_policy: HandlerErrorPolicy,
    #[serde(default)]
    pub mode: DriverMode,
    /// Address/topic filter.
    #[serde(default)]
    pub filter: LogFilter,
}

fn default_stream() -> String { "default".into() }
fn default_max_span() -> u64 { 100 }
fn default_max_retries() -> u32 { 5 }
fn default_confirmations() -> u64 { 12 }
fn default_poll_interval_ms() -> u64 { 2_000 }
fn default_error_backoff_ms() -> u64 { 5_000 }

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            stream: default_stream(),
            max_span: default_max_span(),
            max_retries: default_max_retries(),
            retry_delay_ms: 0,
            confirmations: default_confirmations(),
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            handler_error_policy: HandlerErrorPolicy::default(),
            mode: DriverMode::default(),
            filter: LogFilter::default(),
        }
    }
}

impl CrawlConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, CrawlError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| CrawlError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.stream.is_empty() {
            return Err(CrawlError::Config("stream key must not be empty".into()));
        }
        if self.max_span == 0 {
            return Err(CrawlError::Config("max_span must be at least 1".into()));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Runtime state of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    /// Not yet started.
    Idle,
    LoadingCursor,
    /// Querying the safe head.
    Bounding,
    Processing,
    Checkpointing,
    /// Waiting after a failed span.
    Backoff,
    /// Caught up, waiting for the head to move.
    Waiting,
    /// Reached the stop block or caught up in one-shot mode.
    Done,
    /// Stopped on an error or cancellation.
    Halted,
}

impl std::fmt::Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::LoadingCursor => write!(f, "loading-cursor"),
            Self::Bounding => write!(f, "bounding"),
            Self::Processing => write!(f, "processing"),
            Self::Checkpointing => write!(f, "checkpointing"),
            Self::Backoff => write!(f, "backoff"),
            Self::Waiting => write!(f, "waiting"),
            Self::Done => write!(f, "done"),
            Self::Halted => write!(f, "halted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = CrawlConfig::default();
        assert_eq!(cfg.max_span, 100);
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.confirmations, 12);
        assert_eq!(cfg.mode, DriverMode::Continuous);
        assert_eq!(cfg.handler_error_policy, HandlerErrorPolicy::Isolate);
    }

    #[test]
    fn from_json_fills_defaults() {
        let cfg = CrawlConfig::from_json(
            r#"{
                "stream": "polygon:swaps",
                "max_span": 2000,
                "handler_error_policy": "abort",
                "mode": "one_shot",
                "filter": { "addresses": ["0xabc"] }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.stream, "polygon:swaps");
        assert_eq!(cfg.max_span, 2000);
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.handler_error_policy, HandlerErrorPolicy::Abort);
        assert_eq!(cfg.mode, DriverMode::OneShot);
        assert!(cfg.filter.matches_address("0xABC"));
    }

    #[test]
    fn rejects_zero_span() {
        let err = CrawlConfig::from_json(r#"{ "max_span": 0 }"#).unwrap_err();
        assert!(matches!(err, CrawlError::Config(_)));
    }

    #[test]
    fn state_display() {
        assert_eq!(DriverState::LoadingCursor.to_string(), "loading-cursor");
    }
}
