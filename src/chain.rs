//! The append-only chain and its pending-record queue.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SubmitError;
use crate::miner;
use crate::model::{now_millis, Block, BlockCandidate, Record, GENESIS_PREVIOUS_HASH};

/// Result of folding the pending queue into a block.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Nothing was pending; the chain is unchanged.
    Empty,
    /// Mining was abandoned; the chain and the queue are unchanged.
    Cancelled,
    /// Another commit extended the chain while this block was mined. The
    /// block was discarded; the chain and the queue are unchanged.
    Stale,
    Committed(Block),
}

impl CommitOutcome {
    pub fn block(&self) -> Option<&Block> {
        match self {
            Self::Committed(block) => Some(block),
            _ => None,
        }
    }
}

/// Blocks plus staging queue. Serializes to the snapshot layout
/// `{ chain, difficulty, pending_records }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    #[serde(rename = "chain")]
    blocks: Vec<Block>,
    difficulty: u32,
    /// Absent in older snapshots.
    #[serde(default)]
    pending_records: Vec<Record>,
}

/// Audit-view digest of the chain state.
#[derive(Debug, Clone, Serialize)]
pub struct ChainSummary {
    pub length: usize,
    pub difficulty: u32,
    pub pending: usize,
    pub tip_hash: Option<String>,
    pub valid: bool,
}

impl Chain {
    /// A fresh chain holding only the genesis block.
    pub fn new(difficulty: u32) -> Self {
        Self {
            blocks: vec![Block::genesis(now_millis())],
            difficulty,
            pending_records: Vec::new(),
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Only a snapshot that lost its genesis block can be empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn tip(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn block(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.blocks.get(i))
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Applies to blocks mined from now on; committed blocks are not re-checked.
    pub fn set_difficulty(&mut self, difficulty: u32) {
        self.difficulty = difficulty;
    }

    pub fn pending(&self) -> &[Record] {
        &self.pending_records
    }

    /// Validate and stamp an entry, then queue it. Returns the new queue length.
    pub fn submit(&mut self, entry: Value) -> Result<usize, SubmitError> {
        let record = Record::new(entry, now_millis())?;
        self.pending_records.push(record);
        debug!(pending = self.pending_records.len(), "record queued");
        Ok(self.pending_records.len())
    }

    /// Snapshot of the pending queue as the next block, or `None` if nothing is pending.
    pub fn next_candidate(&self) -> Option<BlockCandidate> {
        if self.pending_records.is_empty() {
            return None;
        }
        let (previous_hash, previous_time) = match self.tip() {
            Some(tip) => (tip.hash().to_string(), tip.timestamp()),
            None => (GENESIS_PREVIOUS_HASH.to_string(), i64::MIN),
        };
        Some(BlockCandidate {
            index: self.blocks.len() as u64,
            timestamp: now_millis().max(previous_time),
            records: self.pending_records.clone(),
            previous_hash,
        })
    }

    /// Mine the pending queue into a block and append it.
    ///
    /// The queue is cleared only once the block is appended. Cancellation
    /// leaves the chain exactly as it was.
    pub fn commit(&mut self, cancel: &CancellationToken) -> CommitOutcome {
        let Some(candidate) = self.next_candidate() else {
            return CommitOutcome::Empty;
        };
        match miner::mine(candidate, self.difficulty, cancel) {
            Some(block) => self.append_mined(block),
            None => {
                info!(
                    pending = self.pending_records.len(),
                    "commit cancelled before a nonce was found"
                );
                CommitOutcome::Cancelled
            }
        }
    }

    /// Append a block mined from an earlier [`next_candidate`](Self::next_candidate).
    ///
    /// The block must extend the current tip and hold exactly the oldest
    /// pending records. Only those records leave the queue; anything
    /// submitted while the block was mined stays pending.
    pub(crate) fn append_mined(&mut self, block: Block) -> CommitOutcome {
        let consumed = block.records().len();
        let tip_hash = self.tip().map_or(GENESIS_PREVIOUS_HASH, Block::hash);
        let extends_tip =
            block.previous_hash() == tip_hash && block.index() == self.blocks.len() as u64;
        if !extends_tip || self.pending_records.get(..consumed) != Some(block.records()) {
            warn!(
                index = block.index(),
                tip = self.blocks.len().saturating_sub(1),
                "mined block no longer extends the chain, discarded"
            );
            return CommitOutcome::Stale;
        }

        self.pending_records.drain(..consumed);
        self.blocks.push(block.clone());
        info!(
            index = block.index(),
            nonce = block.nonce(),
            records = consumed,
            hash = block.hash(),
            still_pending = self.pending_records.len(),
            "block committed"
        );
        CommitOutcome::Committed(block)
    }

    pub fn summary(&self) -> ChainSummary {
        ChainSummary {
            length: self.blocks.len(),
            difficulty: self.difficulty,
            pending: self.pending_records.len(),
            tip_hash: self.tip().map(|b| b.hash().to_string()),
            valid: self.is_valid(),
        }
    }

    #[cfg(test)]
    pub(crate) fn blocks_mut(&mut self) -> &mut Vec<Block> {
        &mut self.blocks
    }
}
