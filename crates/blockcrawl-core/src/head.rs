//! Head tracker: turns the chain head into a safe, non-regressing upper bound.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CrawlError;
use crate::types::BlockNumber;

/// Source of the current chain head (a single RPC call in practice).
#[async_trait]
pub trait ChainHead: Send + Sync {
    async fn head_block_number(&self) -> Result<BlockNumber, CrawlError>;
}

#[async_trait]
impl<T: ChainHead + ?Sized> ChainHead for Arc<T> {
    async fn head_block_number(&self) -> Result<BlockNumber, CrawlError> {
        (**self).head_block_number().await
    }
}

/// One reading of the safe upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadReading {
    /// `head - confirmations`, at or above every earlier bound.
    Safe(BlockNumber),
    /// The head moved backwards; the previous bound is kept.
    Regressed {
        previous: BlockNumber,
        observed: BlockNumber,
    },
    /// The chain is shorter than the confirmation depth.
    Unconfirmed { head: BlockNumber },
}

impl HeadReading {
    /// The bound the caller may crawl up to, if any.
    pub fn bound(&self) -> Option<BlockNumber> {
        match self {
            Self::Safe(bound) => Some(*bound),
            Self::Regressed { previous, .. } => Some(*previous),
            Self::Unconfirmed { .. } => None,
        }
    }
}

/// Applies a confirmation offset to the chain head and holds the bound steady
/// across reorgs at the tip.
pub struct HeadTracker<H> {
    source: H,
    confirmations: u64,
    last_safe: Option<BlockNumber>,
}

impl<H: ChainHead> HeadTracker<H> {
    /// `confirmations = 0` trusts the head immediately.
    pub fn new(source: H, confirmations: u64) -> Self {
        Self {
            source,
            confirmations,
            last_safe: None,
        }
    }

    pub fn confirmations(&self) -> u64 {
        self.confirmations
    }

    /// Last bound handed out.
    pub fn last_safe(&self) -> Option<BlockNumber> {
        self.last_safe
    }

    pub async fn safe_upper_bound(&mut self) -> Result<HeadReading, CrawlError> {
        let head = self.source.head_block_number().await?;
        let confirmations = self.confirmations as BlockNumber;

        let Some(safe) = head.checked_sub(confirmations) else {
            tracing::debug!(head, confirmations = self.confirmations, "Chain shorter than confirmation depth");
            return Ok(match self.last_safe {
                Some(previous) => HeadReading::Regressed { previous, observed: head },
                None => HeadReading::Unconfirmed { head },
            });
        };

        match self.last_safe {
            Some(previous) if safe < previous => {
                tracing::warn!(
                    previous,
                    observed = safe,
                    head,
                    "Safe head moved backwards, holding previous bound"
                );
                Ok(HeadReading::Regressed { previous, observed: safe })
            }
            _ => {
                self.last_safe = Some(safe);
                Ok(HeadReading::Safe(safe))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Returns scripted heads in order, repeating the last one.
    struct ScriptedHead(Mutex<Vec<BlockNumber>>);

    impl ScriptedHead {
        fn new(heads: &[BlockNumber]) -> Self {
            let mut v = heads.to_vec();
            v.reverse();
            Self(Mutex::new(v))
        }
    }

    #[async_trait]
    impl ChainHead for ScriptedHead {
        async fn head_block_number(&self) -> Result<BlockNumber, CrawlError> {
            let mut heads = self.0.lock().unwrap();
            if heads.len() > 1 {
                Ok(heads.pop().unwrap())
            } else {
                heads.last().copied().ok_or_else(|| CrawlError::Retrieval("no head".into()))
            }
        }
    }

    #[tokio::test]
    async fn applies_confirmation_offset() {
        let mut tracker = HeadTracker::new(ScriptedHead::new(&[112]), 12);
        assert_eq!(tracker.safe_upper_bound().await.unwrap(), HeadReading::Safe(100));
    }

    #[tokio::test]
    async fn zero_confirmations_trusts_head() {
        let mut tracker = HeadTracker::new(ScriptedHead::new(&[50]), 0);
        assert_eq!(tracker.safe_upper_bound().await.unwrap().bound(), Some(50));
    }

    #[tokio::test]
    async fn regression_holds_previous_bound() {
        let mut tracker = HeadTracker::new(ScriptedHead::new(&[110, 105, 111]), 2);
        assert_eq!(tracker.safe_upper_bound().await.unwrap(), HeadReading::Safe(108));
        assert_eq!(
            tracker.safe_upper_bound().await.unwrap(),
            HeadReading::Regressed { previous: 108, observed: 103 }
        );
        assert_eq!(tracker.last_safe(), Some(108));
        assert_eq!(tracker.safe_upper_bound().await.unwrap(), HeadReading::Safe(109));
    }

    #[tokio::test]
    async fn young_chain_has_no_safe_bound() {
        let mut tracker = HeadTracker::new(ScriptedHead::new(&[5]), 12);
        let reading = tracker.safe_upper_bound().await.unwrap();
        assert_eq!(reading, HeadReading::Unconfirmed { head: 5 });
        assert_eq!(reading.bound(), None);
    }

    #[tokio::test]
    async fn head_errors_propagate() {
        let mut tracker = HeadTracker::new(ScriptedHead::new(&[]), 0);
        assert!(tracker.safe_upper_bound().await.is_err());
    }
}
