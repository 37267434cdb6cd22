//! JSON-RPC surface of an EVM node.
//!
//! The transport is left to the host: anything that can answer
//! `eth_blockNumber`, `eth_getBlockByNumber` and `eth_getLogs` implements
//! [`EvmRpcClient`]. The helpers here convert between node JSON and
//! BlockCrawl records.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use blockcrawl_core::{BlockNumber, BlockPayload, CrawlError, LogPayload, RawRecord, RetrievalQuery};

/// A raw EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockHash")]
    pub block_hash: String,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "transactionIndex", default)]
    pub transaction_index: Option<String>,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }

    pub fn block_number(&self) -> Result<BlockNumber, CrawlError> {
        parse_hex_u128(&self.block_number)
    }

    /// Convert into a [`RawRecord`] keyed by block, transaction and log index.
    pub fn into_record(self) -> Result<RawRecord, CrawlError> {
        let block_number = self.block_number()?;
        let transaction_index = match &self.transaction_index {
            Some(idx) => parse_hex_u64(idx)?,
            None => 0,
        };
        let log_index = parse_hex_u64(&self.log_index)?;
        Ok(RawRecord::log(
            block_number,
            transaction_index,
            log_index,
            LogPayload {
                address: self.address,
                topics: self.topics,
                data: self.data,
                block_hash: self.block_hash,
                tx_hash: self.tx_hash,
            },
        ))
    }
}

/// Trait for fetching EVM data from a JSON-RPC provider.
///
/// Errors should be [`CrawlError::Retrieval`]; the orchestrator narrows the
/// span and retries on them.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    /// `eth_blockNumber`.
    async fn block_number(&self) -> Result<BlockNumber, CrawlError>;

    /// `eth_getBlockByNumber`; `None` when the node does not know the block.
    async fn get_block(&self, number: BlockNumber) -> Result<Option<Value>, CrawlError>;

    /// `eth_getLogs` for the query's span and filter (see [`get_logs_params`]).
    async fn get_logs(&self, query: &RetrievalQuery) -> Result<Vec<RawLog>, CrawlError>;
}

/// Parse a hex quantity (with or without `0x`) into a block number.
pub fn parse_hex_u128(s: &str) -> Result<u128, CrawlError> {
    let digits = strip_hex_prefix(s);
    u128::from_str_radix(digits, 16)
        .map_err(|e| CrawlError::Retrieval(format!("invalid hex quantity {s:?}: {e}")))
}

/// Parse a hex quantity (with or without `0x`) into a `u64`.
pub fn parse_hex_u64(s: &str) -> Result<u64, CrawlError> {
    let digits = strip_hex_prefix(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| CrawlError::Retrieval(format!("invalid hex quantity {s:?}: {e}")))
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Encode a block number as a JSON-RPC quantity (`0x2a`).
pub fn to_hex_quantity(n: BlockNumber) -> String {
    format!("{n:#x}")
}

/// The filter object of an `eth_getLogs` request for `query`.
pub fn get_logs_params(query: &RetrievalQuery) -> Value {
    let span = query.span();
    let mut params = json!({
        "fromBlock": to_hex_quantity(span.from()),
        "toBlock": to_hex_quantity(span.to()),
    });
    if let Some(addresses) = query.addresses() {
        params["address"] = json!(addresses);
    }
    if let Some(topic0) = query.topic0_values() {
        params["topics"] = json!([topic0]);
    }
    params
}

/// Convert an `eth_getBlockByNumber` response into a [`BlockPayload`].
pub fn block_from_json(v: &Value) -> Option<BlockPayload> {
    Some(BlockPayload {
        hash: v["hash"].as_str()?.to_string(),
        parent_hash: v["parentHash"].as_str()?.to_string(),
        timestamp: parse_hex_u64(v["timestamp"].as_str()?).ok()? as i64,
        tx_count: v["transactions"].as_array().map(|a| a.len() as u32).unwrap_or(0),
        body: v.clone(),
    })
}
