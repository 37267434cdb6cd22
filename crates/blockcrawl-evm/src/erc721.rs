//! Typed decoder for the ERC-721 `Transfer` event.
//!
//! ERC-721 shares topic0 with the ERC-20 `Transfer`; the two are told apart
//! by shape. Here the token id is the third indexed topic and the data is
//! empty, so ERC-20 transfers never decode as NFT transfers and vice versa.

use blockcrawl_core::{RawRecord, RecordDecoder};

use crate::erc20::{hex_word, word_to_address, word_to_u128, TRANSFER_TOPIC};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    /// The collection contract.
    pub token: String,
    pub from: String,
    pub to: String,
    /// Raw 32-byte token id word (`0x` + 64 hex digits).
    pub token_id: String,
}

impl Transfer {
    /// The token id, if it fits in 128 bits.
    pub fn token_id_u128(&self) -> Option<u128> {
        word_to_u128(&self.token_id)
    }

    /// Minted: sent from the zero address.
    pub fn is_mint(&self) -> bool {
        self.from.trim_start_matches("0x").bytes().all(|b| b == b'0')
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransferDecoder;

impl RecordDecoder for TransferDecoder {
    type Output = Transfer;

    fn decode(&self, record: &RawRecord) -> Option<Transfer> {
        let log = record.as_log()?;
        let [topic0, from, to, token_id] = log.topics.as_slice() else {
            return None;
        };
        if !topic0.eq_ignore_ascii_case(TRANSFER_TOPIC) {
            return None;
        }
        if !matches!(log.data.as_str(), "" | "0x") {
            return None;
        }
        Some(Transfer {
            token: log.address.clone(),
            from: word_to_address(from)?,
            to: word_to_address(to)?,
            token_id: format!("0x{}", hex_word(token_id)?),
        })
    }
}
