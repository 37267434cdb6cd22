//! Range planner: picks the upper bound of the next request.
//!
//! Providers cap how many blocks (or matching logs) one call may cover.
//! Every failed attempt is treated as a sign the span was too wide: the
//! block count is divided by `attempt + 1`, so a span of 10 becomes 5, 3, 2
//! and finally the single `from` block.

use crate::types::BlockNumber;

/// Upper bound to request for `[current_from, requested_to]` on the given
/// attempt, never wider than `max_span` blocks and never below `current_from`.
pub fn plan_upper_bound(
    current_from: BlockNumber,
    requested_to: BlockNumber,
    attempt: u32,
    max_span: u64,
) -> BlockNumber {
    if requested_to <= current_from {
        return current_from;
    }
    let requested = requested_to - current_from + 1;
    let capped = requested.min(max_span.max(1) as BlockNumber);
    let count = capped / (attempt as BlockNumber + 1);
    if count == 0 {
        return current_from;
    }
    current_from + count - 1
}

/// Stateless planner bound to one `max_span`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePlanner {
    max_span: u64,
}

impl RangePlanner {
    /// A `max_span` of zero is treated as one block.
    pub fn new(max_span: u64) -> Self {
        Self {
            max_span: max_span.max(1),
        }
    }

    pub fn max_span(&self) -> u64 {
        self.max_span
    }

    pub fn plan(&self, current_from: BlockNumber, requested_to: BlockNumber, attempt: u32) -> BlockNumber {
        plan_upper_bound(current_from, requested_to, attempt, self.max_span)
    }
}
