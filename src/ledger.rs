//! A chain bound to its snapshot file: the single writer collaborators talk to.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::chain::{Chain, CommitOutcome};
use crate::model::Block;
use crate::config::LedgerConfig;
use crate::error::{StorageError, SubmitError};
use crate::miner;
use crate::storage::{RecoveryStatus, SnapshotStore};

/// Shared handle used by request handlers and background commits.
pub type SharedLedger = Arc<Mutex<Ledger>>;

/// Outcome of a commit plus the result of persisting it.
#[derive(Debug)]
pub struct CommitReport {
    pub outcome: CommitOutcome,
    /// Set when a block was appended in memory but the snapshot write failed.
    /// The block stays committed; retry with [`Ledger::save`].
    pub persist_error: Option<StorageError>,
}

#[derive(Debug)]
pub struct Ledger {
    chain: Chain,
    store: SnapshotStore,
}

impl Ledger {
    pub fn new(chain: Chain, store: SnapshotStore) -> Self {
        Self { chain, store }
    }

    /// Recover the chain from `store`; `difficulty` governs blocks mined from now on.
    pub fn open(store: SnapshotStore, difficulty: u32) -> (Self, RecoveryStatus) {
        let recovered = store.recover(difficulty);
        let mut chain = recovered.chain;
        chain.set_difficulty(difficulty);
        (Self::new(chain, store), recovered.status)
    }

    pub fn from_config(config: &LedgerConfig) -> (Self, RecoveryStatus) {
        Self::open(SnapshotStore::new(&config.snapshot_path), config.difficulty)
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn submit_record(&mut self, entry: Value) -> Result<usize, SubmitError> {
        self.chain.submit(entry)
    }

    /// Commit without a way to cancel. Blocks until a nonce is found.
    pub fn commit(&mut self) -> CommitReport {
        self.commit_with(&CancellationToken::new())
    }

    /// Mine pending records into a block and persist the chain.
    pub fn commit_with(&mut self, cancel: &CancellationToken) -> CommitReport {
        let outcome = self.chain.commit(cancel);
        self.persist(outcome)
    }

    /// Append a block mined outside the lock and persist the chain.
    fn append_mined(&mut self, block: Block) -> CommitReport {
        let outcome = self.chain.append_mined(block);
        self.persist(outcome)
    }

    fn persist(&self, outcome: CommitOutcome) -> CommitReport {
        let persist_error = match &outcome {
            CommitOutcome::Committed(block) => match self.save() {
                Ok(()) => None,
                Err(e) => {
                    error!(index = block.index(), "block committed but not persisted: {e}");
                    Some(e)
                }
            },
            CommitOutcome::Empty | CommitOutcome::Cancelled | CommitOutcome::Stale => None,
        };
        CommitReport {
            outcome,
            persist_error,
        }
    }

    pub fn save(&self) -> Result<(), StorageError> {
        self.store.save(&self.chain)
    }
}

/// Run a commit with the nonce search on the blocking pool.
///
/// The ledger is locked only to take the candidate and again to append the
/// mined block, so submissions and queries proceed while mining runs. Mining
/// stops when `cancel` fires or when the returned future is dropped; either
/// way the chain and its pending queue are left untouched. `cancel` itself is
/// never cancelled by this function.
pub async fn commit_in_background(
    ledger: SharedLedger,
    cancel: CancellationToken,
) -> Result<CommitReport, JoinError> {
    let (candidate, difficulty) = {
        let guard = ledger.lock().await;
        (guard.chain.next_candidate(), guard.chain.difficulty())
    };
    let Some(candidate) = candidate else {
        return Ok(CommitReport {
            outcome: CommitOutcome::Empty,
            persist_error: None,
        });
    };

    let mining = cancel.child_token();
    let _cancel_on_drop = mining.clone().drop_guard();
    let mined =
        tokio::task::spawn_blocking(move || miner::mine(candidate, difficulty, &mining)).await?;

    let Some(block) = mined else {
        info!("background commit cancelled before a nonce was found");
        return Ok(CommitReport {
            outcome: CommitOutcome::Cancelled,
            persist_error: None,
        });
    };
    let mut guard = ledger.lock().await;
    Ok(guard.append_mined(block))
}
