//! Typed decoders for the ERC-20 `Transfer` and `Approval` events.
//!
//! Use with [`blockcrawl_core::TypedHandler`]: records that are not a
//! well-formed event of the decoder's kind are skipped, never failed.

use blockcrawl_core::{LogPayload, RawRecord, RecordDecoder};

/// `keccak256("Transfer(address,address,uint256)")`
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// `keccak256("Approval(address,address,uint256)")`
pub const APPROVAL_TOPIC: &str =
    "0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub token: String,
    pub from: String,
    pub to: String,
    /// Raw 32-byte amount word (`0x` + 64 hex digits).
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub token: String,
    pub owner: String,
    pub spender: String,
    /// Raw 32-byte amount word (`0x` + 64 hex digits).
    pub value: String,
}

impl Transfer {
    /// The amount, if it fits in 128 bits.
    pub fn value_u128(&self) -> Option<u128> {
        word_to_u128(&self.value)
    }
}

impl Approval {
    /// The allowance, if it fits in 128 bits.
    pub fn value_u128(&self) -> Option<u128> {
        word_to_u128(&self.value)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransferDecoder;

#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalDecoder;

impl RecordDecoder for TransferDecoder {
    type Output = Transfer;

    fn decode(&self, record: &RawRecord) -> Option<Transfer> {
        let (log, from, to, value) = two_address_event(record, TRANSFER_TOPIC)?;
        Some(Transfer {
            token: log.address.clone(),
            from,
            to,
            value,
        })
    }
}

impl RecordDecoder for ApprovalDecoder {
    type Output = Approval;

    fn decode(&self, record: &RawRecord) -> Option<Approval> {
        let (log, owner, spender, value) = two_address_event(record, APPROVAL_TOPIC)?;
        Some(Approval {
            token: log.address.clone(),
            owner,
            spender,
            value,
        })
    }
}

/// `Event(address indexed, address indexed, uint256)` with the given topic0.
fn two_address_event<'a>(
    record: &'a RawRecord,
    topic: &str,
) -> Option<(&'a LogPayload, String, String, String)> {
    let log = record.as_log()?;
    let [topic0, a, b] = log.topics.as_slice() else {
        return None;
    };
    if !topic0.eq_ignore_ascii_case(topic) {
        return None;
    }
    let value = hex_word(&log.data)?;
    Some((log, word_to_address(a)?, word_to_address(b)?, format!("0x{value}")))
}

/// The 64 hex digits of a single 32-byte word.
pub(crate) fn hex_word(s: &str) -> Option<&str> {
    let digits = s.strip_prefix("0x")?;
    (digits.len() == 64 && digits.bytes().all(|b| b.is_ascii_hexdigit())).then_some(digits)
}

/// Last 20 bytes of a left-padded topic word, lowercased.
pub(crate) fn word_to_address(topic: &str) -> Option<String> {
    let digits = hex_word(topic)?;
    Some(format!("0x{}", digits[24..].to_ascii_lowercase()))
}

pub(crate) fn word_to_u128(word: &str) -> Option<u128> {
    let digits = hex_word(word)?;
    let (high, low) = digits.split_at(32);
    if high.bytes().any(|b| b != b'0') {
        return None;
    }
    u128::from_str_radix(low, 16).ok()
}
