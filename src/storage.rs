//! Disk persistence for the whole chain as a single JSON snapshot.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::chain::Chain;
use crate::error::StorageError;
use crate::model::now_millis;

/// How [`SnapshotStore::recover`] obtained its chain.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryStatus {
    /// No snapshot (or an empty one); started from genesis.
    Fresh,
    /// Snapshot parsed and passed the integrity audit.
    Restored,
    /// Snapshot was unreadable, unparseable or failed the audit. It was moved
    /// to `backup` (when the rename succeeded) and a genesis chain was started.
    Quarantined {
        backup: Option<PathBuf>,
        reason: String,
    },
}

#[derive(Debug)]
pub struct Recovered {
    pub chain: Chain,
    pub status: RecoveryStatus,
}

/// Snapshot file location, fixed at construction.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling path used while a save is in flight.
    pub fn temp_path(&self) -> PathBuf {
        with_suffix(&self.path, ".tmp")
    }

    /// Write the chain to the temp path, sync it, then rename it over the snapshot.
    pub fn save(&self, chain: &Chain) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent).map_err(|e| StorageError::io(parent, e))?;
        }

        let tmp = self.temp_path();
        let result = write_snapshot(&tmp, chain).and_then(|()| {
            fs::rename(&tmp, &self.path).map_err(|e| StorageError::io(&self.path, e))
        });
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    /// Load the snapshot, falling back to a fresh genesis chain. Never fails.
    pub fn load(&self, difficulty: u32) -> Chain {
        self.recover(difficulty).chain
    }

    /// Like [`load`](Self::load), also reporting what happened to the snapshot.
    pub fn recover(&self, difficulty: u32) -> Recovered {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no snapshot found, starting a new chain");
                return self.fresh(difficulty, RecoveryStatus::Fresh);
            }
            Err(e) => return self.quarantine(difficulty, format!("unreadable: {e}")),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            info!(path = %self.path.display(), "snapshot is empty, starting a new chain");
            return self.fresh(difficulty, RecoveryStatus::Fresh);
        }

        let chain: Chain = match serde_json::from_slice(&bytes) {
            Ok(chain) => chain,
            Err(e) => return self.quarantine(difficulty, format!("unparseable: {e}")),
        };

        if let Some(violation) = chain.first_violation() {
            return self.quarantine(
                difficulty,
                format!(
                    "integrity check failed at block {}: {:?}",
                    violation.index, violation.kind
                ),
            );
        }

        if let Some(reason) = identity_problem(&chain) {
            return self.quarantine(difficulty, reason);
        }

        info!(
            path = %self.path.display(),
            blocks = chain.len(),
            pending = chain.pending().len(),
            "snapshot loaded"
        );
        Recovered {
            chain,
            status: RecoveryStatus::Restored,
        }
    }

    fn fresh(&self, difficulty: u32, status: RecoveryStatus) -> Recovered {
        Recovered {
            chain: Chain::new(difficulty),
            status,
        }
    }

    /// Move the bad snapshot aside and start over from genesis.
    fn quarantine(&self, difficulty: u32, reason: String) -> Recovered {
        let backup = with_suffix(&self.path, &format!(".corrupt-{}", now_millis()));
        let backup = match fs::rename(&self.path, &backup) {
            Ok(()) => {
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    %reason,
                    "snapshot quarantined, starting a new chain"
                );
                Some(backup)
            }
            Err(e) => {
                error!(
                    path = %self.path.display(),
                    %reason,
                    "snapshot rejected and could not be moved aside: {e}"
                );
                None
            }
        };
        self.fresh(difficulty, RecoveryStatus::Quarantined { backup, reason })
    }
}

/// Ensure that the given directory exists (create recursively if needed).
pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn write_snapshot(tmp: &Path, chain: &Chain) -> Result<(), StorageError> {
    let file = File::create(tmp).map_err(|e| StorageError::io(tmp, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, chain)?;
    writer.flush().map_err(|e| StorageError::io(tmp, e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| StorageError::io(tmp, e))
}

/// First committed or pending record lacking a valid identity. The genesis
/// sentinel is exempt.
fn identity_problem(chain: &Chain) -> Option<String> {
    for block in chain.blocks().iter().skip(1) {
        if let Some(e) = block.records().iter().find_map(|r| r.check_identity().err()) {
            return Some(format!("block {}: {e}", block.index()));
        }
    }
    chain
        .pending()
        .iter()
        .enumerate()
        .find_map(|(i, r)| r.check_identity().err().map(|e| format!("pending record {i}: {e}")))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
