//! In-memory node used by the unit tests of this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use blockcrawl_core::{BlockNumber, CrawlError, RetrievalQuery};

use crate::erc20::{APPROVAL_TOPIC, TRANSFER_TOPIC};
use crate::rpc::{to_hex_quantity, EvmRpcClient, RawLog};

pub const TOKEN: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
pub const ALICE: &str = "0x00000000000000000000000000000000000000a1";
pub const BOB: &str = "0x00000000000000000000000000000000000000b0";
pub const NFT: &str = "0xbc4ca0eda7647a8ab7c2061c2e118a18a936f13d";

pub struct MockNode {
    pub head: Mutex<BlockNumber>,
    pub logs: Vec<RawLog>,
    /// `eth_getLogs` over more blocks than this fails.
    pub max_range: BlockNumber,
    pub missing_blocks: Vec<BlockNumber>,
    pub get_logs_calls: AtomicUsize,
}

impl MockNode {
    pub fn new(head: BlockNumber, logs: Vec<RawLog>) -> Self {
        Self {
            head: Mutex::new(head),
            logs,
            max_range: BlockNumber::MAX,
            missing_blocks: vec![],
            get_logs_calls: AtomicUsize::new(0),
        }
    }

    pub fn max_range(mut self, max_range: BlockNumber) -> Self {
        self.max_range = max_range;
        self
    }

    pub fn calls(&self) -> usize {
        self.get_logs_calls.load(Ordering::SeqCst)
    }
}

fn word(addr: &str) -> String {
    format!("0x{:0>64}", addr.trim_start_matches("0x"))
}

pub fn raw_log(block: BlockNumber, log_index: u64, address: &str, topics: Vec<String>, data: &str) -> RawLog {
    RawLog {
        address: address.to_string(),
        topics,
        data: data.to_string(),
        block_number: to_hex_quantity(block),
        block_hash: format!("0xb{block:x}"),
        tx_hash: format!("0xt{block:x}{log_index:x}"),
        transaction_index: Some("0x0".into()),
        log_index: format!("{log_index:#x}"),
        removed: None,
    }
}

pub fn transfer(block: BlockNumber, log_index: u64, value: u128) -> RawLog {
    raw_log(
        block,
        log_index,
        TOKEN,
        vec![TRANSFER_TOPIC.into(), word(ALICE), word(BOB)],
        &format!("0x{value:064x}"),
    )
}

pub fn approval(block: BlockNumber, log_index: u64, value: u128) -> RawLog {
    raw_log(
        block,
        log_index,
        TOKEN,
        vec![APPROVAL_TOPIC.into(), word(ALICE), word(BOB)],
        &format!("0x{value:064x}"),
    )
}

/// ERC-721 `Transfer`: same topic0 as ERC-20, token id in the third topic.
pub fn nft_transfer(block: BlockNumber, log_index: u64, token_id: u128) -> RawLog {
    raw_log(
        block,
        log_index,
        NFT,
        vec![TRANSFER_TOPIC.into(), word(ALICE), word(BOB), format!("0x{token_id:064x}")],
        "0x",
    )
}

#[async_trait]
impl EvmRpcClient for MockNode {
    async fn block_number(&self) -> Result<BlockNumber, CrawlError> {
        Ok(*self.head.lock().unwrap())
    }

    async fn get_block(&self, number: BlockNumber) -> Result<Option<Value>, CrawlError> {
        if number > *self.head.lock().unwrap() || self.missing_blocks.contains(&number) {
            return Ok(None);
        }
        Ok(Some(json!({
            "number": to_hex_quantity(number),
            "hash": format!("0xb{number:x}"),
            "parentHash": format!("0xb{:x}", number.saturating_sub(1)),
            "timestamp": to_hex_quantity(1_700_000_000 + number * 12),
            "transactions": [],
        })))
    }

    async fn get_logs(&self, query: &RetrievalQuery) -> Result<Vec<RawLog>, CrawlError> {
        self.get_logs_calls.fetch_add(1, Ordering::SeqCst);
        let span = query.span();
        if span.len() > self.max_range {
            return Err(CrawlError::Retrieval(format!(
                "query returned more than 10000 results, span {span}"
            )));
        }
        Ok(self
            .logs
            .iter()
            .filter(|l| {
                let block = l.block_number().unwrap();
                span.contains(block)
                    && query.filter().matches_address(&l.address)
                    && l.topics
                        .first()
                        .map_or(query.topic0_values().is_none(), |t| query.filter().matches_topic0(t))
            })
            .cloned()
            .collect())
    }
}
