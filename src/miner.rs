//! Proof-of-work: search for a nonce whose block hash meets the difficulty target.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::{Block, BlockCandidate};

/// Nonces tried between cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// True when `hash` starts with at least `difficulty` `'0'` hex characters.
pub fn meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let zeros = hash.bytes().take_while(|b| *b == b'0').count();
    zeros >= difficulty as usize
}

/// Try nonces from 0 upwards until the hash meets `difficulty`.
///
/// Returns `None` if `cancel` fires before a nonce is found (or the nonce
/// space is exhausted). Difficulty 0 accepts nonce 0 without searching.
pub fn mine(
    candidate: BlockCandidate,
    difficulty: u32,
    cancel: &CancellationToken,
) -> Option<Block> {
    for nonce in 0..=u64::MAX {
        if nonce % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            debug!(index = candidate.index, nonce, "mining cancelled");
            return None;
        }
        let hash = candidate.hash_with(nonce);
        if meets_difficulty(&hash, difficulty) {
            debug!(index = candidate.index, nonce, %hash, "nonce found");
            return Some(candidate.seal(nonce, hash));
        }
    }
    warn!(index = candidate.index, difficulty, "nonce space exhausted");
    None
}
