//! Append-only, hash-linked ledger of medical record entries.
//!
//! Records are queued with [`Chain::submit`], mined into a proof-of-work
//! block by [`Chain::commit`], and persisted as a single JSON snapshot by
//! [`SnapshotStore`]. [`Ledger`] ties a chain to its snapshot file.

pub mod chain;
pub mod config;
pub mod error;
pub mod ledger;
pub mod miner;
pub mod model;
pub mod query;
pub mod routes;
pub mod storage;
pub mod validate;

pub use chain::{Chain, ChainSummary, CommitOutcome};
pub use config::LedgerConfig;
pub use error::{StorageError, SubmitError};
pub use ledger::{commit_in_background, CommitReport, Ledger, SharedLedger};
pub use model::{compute_hash, Block, Record};
pub use query::RecordMatch;
pub use storage::{Recovered, RecoveryStatus, SnapshotStore};
pub use validate::{Violation, ViolationKind};
