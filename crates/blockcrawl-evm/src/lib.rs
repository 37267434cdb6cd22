//! blockcrawl-evm: EVM fetchers, head source, token event decoders and builder.

pub mod builder;
pub mod collect;
pub mod erc20;
pub mod erc721;
pub mod fetcher;
pub mod rpc;

#[cfg(test)]
mod testing;

pub use builder::CrawlerBuilder;
pub use collect::{collect_logs, collect_logs_with};
pub use erc20::{Approval, ApprovalDecoder, Transfer, TransferDecoder, APPROVAL_TOPIC, TRANSFER_TOPIC};
pub use erc721::{Transfer as NftTransfer, TransferDecoder as NftTransferDecoder};
pub use fetcher::{BlockFetcher, LogFetcher, RpcChainHead};
pub use rpc::{EvmRpcClient, RawLog};
