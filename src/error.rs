use std::path::PathBuf;

/// Rejection of a collaborator entry at submission time.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("record entry must be a JSON object")]
    NotAnObject,

    #[error("record entry needs a non-empty patient_id or doctor_id")]
    MissingIdentity,

    #[error("identity field `{0}` must be a string")]
    InvalidIdentity(&'static str),
}

/// Failure writing a snapshot. The in-memory chain stays authoritative.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("snapshot I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
