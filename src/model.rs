//! Data model for record entries and hash-linked blocks.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::{macros::format_description, OffsetDateTime};

use crate::error::SubmitError;

/// `previous_hash` carried by the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

pub const PATIENT_ID: &str = "patient_id";
pub const DOCTOR_ID: &str = "doctor_id";

/// One structured entry committed to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Collaborator-supplied payload. Keys serialize in sorted order.
    pub entry: Map<String, Value>,
    /// Unix milliseconds at which the entry entered the pending queue.
    pub submitted_at: i64,
}

impl Record {
    /// Accept a collaborator entry, requiring a non-empty `patient_id` or `doctor_id`.
    pub fn new(entry: Value, submitted_at: i64) -> Result<Self, SubmitError> {
        let Value::Object(entry) = entry else {
            return Err(SubmitError::NotAnObject);
        };
        let record = Self {
            entry,
            submitted_at,
        };
        record.check_identity()?;
        Ok(record)
    }

    /// The identity rule [`Record::new`] enforces, for records that arrive
    /// by other routes (such as a snapshot on disk).
    pub fn check_identity(&self) -> Result<(), SubmitError> {
        let mut has_identity = false;
        for field in [PATIENT_ID, DOCTOR_ID] {
            match self.entry.get(field) {
                None | Some(Value::Null) => {}
                Some(Value::String(id)) => has_identity |= !id.trim().is_empty(),
                Some(_) => return Err(SubmitError::InvalidIdentity(field)),
            }
        }
        if has_identity {
            Ok(())
        } else {
            Err(SubmitError::MissingIdentity)
        }
    }

    /// Sentinel entry held by the genesis block. Carries no identity fields.
    pub fn genesis(submitted_at: i64) -> Self {
        let mut entry = Map::new();
        entry.insert("message".into(), Value::from("Genesis Block"));
        Self {
            entry,
            submitted_at,
        }
    }

    pub fn patient_id(&self) -> Option<&str> {
        self.entry.get(PATIENT_ID).and_then(Value::as_str)
    }

    pub fn doctor_id(&self) -> Option<&str> {
        self.entry.get(DOCTOR_ID).and_then(Value::as_str)
    }

    /// SHA-256 hex over the canonical JSON of the entry payload.
    pub fn fingerprint(&self) -> String {
        entry_fingerprint(&self.entry)
    }
}

/// Fingerprint of a bare entry payload, matching [`Record::fingerprint`].
pub fn entry_fingerprint(entry: &Map<String, Value>) -> String {
    sha256_hex(&canonical_json(entry))
}

/// Check a payload against a previously issued fingerprint (case-insensitive hex).
pub fn verify_fingerprint(entry: &Map<String, Value>, expected: &str) -> bool {
    entry_fingerprint(entry).eq_ignore_ascii_case(expected.trim())
}

/// A block before its nonce is fixed.
#[derive(Debug, Clone)]
pub struct BlockCandidate {
    pub index: u64,
    pub timestamp: i64,
    pub records: Vec<Record>,
    pub previous_hash: String,
}

impl BlockCandidate {
    pub fn hash_with(&self, nonce: u64) -> String {
        compute_hash(
            self.index,
            self.timestamp,
            &self.records,
            &self.previous_hash,
            nonce,
        )
    }

    /// Fix the nonce and hash. The caller guarantees `hash == self.hash_with(nonce)`.
    pub(crate) fn seal(self, nonce: u64, hash: String) -> Block {
        Block {
            index: self.index,
            timestamp: self.timestamp,
            records: self.records,
            previous_hash: self.previous_hash,
            nonce,
            hash,
        }
    }
}

/// Committed unit of records. Fields are read-only once the hash is fixed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub(crate) index: u64,
    /// Unix milliseconds.
    pub(crate) timestamp: i64,
    pub(crate) records: Vec<Record>,
    pub(crate) previous_hash: String,
    pub(crate) nonce: u64,
    /// SHA-256 hex over the other five fields.
    pub(crate) hash: String,
}

impl Block {
    pub fn genesis(timestamp: i64) -> Self {
        let candidate = BlockCandidate {
            index: 0,
            timestamp,
            records: vec![Record::genesis(timestamp)],
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
        };
        let hash = candidate.hash_with(0);
        candidate.seal(0, hash)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Hash recomputed from the stored fields, ignoring the stored `hash`.
    pub fn recompute_hash(&self) -> String {
        compute_hash(
            self.index,
            self.timestamp,
            &self.records,
            &self.previous_hash,
            self.nonce,
        )
    }

    /// `YYYY-MM-DD HH:MM:SS` in UTC; falls back to the raw milliseconds when out of range.
    pub fn formatted_time(&self) -> String {
        let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.timestamp) * 1_000_000)
            .ok()
            .and_then(|t| t.format(&format).ok())
            .unwrap_or_else(|| self.timestamp.to_string())
    }
}

/// Field order is alphabetical so the encoding matches a sorted-key JSON dump.
#[derive(Serialize)]
struct HashPayload<'a> {
    index: u64,
    nonce: u64,
    previous_hash: &'a str,
    records: &'a [Record],
    timestamp: i64,
}

/// Digest of the canonical compact-JSON form of a block's five content fields.
pub fn compute_hash(
    index: u64,
    timestamp: i64,
    records: &[Record],
    previous_hash: &str,
    nonce: u64,
) -> String {
    sha256_hex(&canonical_json(&HashPayload {
        index,
        nonce,
        previous_hash,
        records,
        timestamp,
    }))
}

/// SHA-256 over the bytes, lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    // String-keyed maps, integers and strings only; serde_json cannot fail on these.
    serde_json::to_vec(value).expect("canonical payload is always serializable")
}

/// Current wall-clock time as Unix milliseconds.
pub fn now_millis() -> i64 {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(entry: Value) -> Record {
        Record::new(entry, 1_700_000_000_000).unwrap()
    }

    #[test]
    fn hash_is_deterministic() {
        let records = vec![record(json!({"patient_id": "P1", "diagnosis": "flu"}))];
        let a = compute_hash(3, 1_700_000_000_123, &records, "abc", 42);
        let b = compute_hash(3, 1_700_000_000_123, &records, "abc", 42);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, compute_hash(3, 1_700_000_000_123, &records, "abc", 43));
    }

    #[test]
    fn hash_matches_sorted_key_json_digest() {
        // sha256 of
        // {"index":1,"nonce":7,"previous_hash":"0","records":[{"entry":{"diagnosis":"flu","patient_id":"P1"},"submitted_at":5}],"timestamp":10}
        let records = vec![Record::new(json!({"patient_id": "P1", "diagnosis": "flu"}), 5).unwrap()];
        assert_eq!(
            compute_hash(1, 10, &records, "0", 7),
            "d69e557fcc050bdd39aba45da1bd31f8a0d6b2f85a9fa319d60bb80a554a602c"
        );
    }

    #[test]
    fn entry_key_order_does_not_change_hash() {
        let a: Value = serde_json::from_str(r#"{"patient_id":"P1","b":1,"a":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":2,"b":1,"patient_id":"P1"}"#).unwrap();
        assert_eq!(
            compute_hash(1, 1, &[record(a)], "0", 0),
            compute_hash(1, 1, &[record(b)], "0", 0)
        );
    }

    #[test]
    fn record_requires_identity() {
        assert!(matches!(
            Record::new(json!({"diagnosis": "flu"}), 0),
            Err(SubmitError::MissingIdentity)
        ));
        assert!(matches!(
            Record::new(json!({"patient_id": "  "}), 0),
            Err(SubmitError::MissingIdentity)
        ));
        assert!(matches!(
            Record::new(json!({"patient_id": 12}), 0),
            Err(SubmitError::InvalidIdentity(PATIENT_ID))
        ));
        assert!(matches!(
            Record::new(json!(["patient_id", "P1"]), 0),
            Err(SubmitError::NotAnObject)
        ));
        assert!(Record::new(json!({"doctor_id": "D9", "patient_id": null}), 0).is_ok());
    }

    #[test]
    fn genesis_block_is_self_consistent() {
        let genesis = Block::genesis(1_700_000_000_000);
        assert_eq!(genesis.index(), 0);
        assert_eq!(genesis.previous_hash(), GENESIS_PREVIOUS_HASH);
        assert_eq!(genesis.records().len(), 1);
        assert!(genesis.records()[0].patient_id().is_none());
        assert_eq!(genesis.hash(), genesis.recompute_hash());
    }

    #[test]
    fn fingerprint_verification() {
        let r = record(json!({"patient_id": "P1", "treatment": "rest"}));
        let fp = r.fingerprint();
        assert!(verify_fingerprint(&r.entry, &fp));
        assert!(verify_fingerprint(&r.entry, &fp.to_uppercase()));

        let mut tampered = r.entry.clone();
        tampered.insert("treatment".into(), json!("surgery"));
        assert!(!verify_fingerprint(&tampered, &fp));
    }

    #[test]
    fn formatted_time_renders_utc() {
        let block = Block::genesis(0);
        assert_eq!(block.formatted_time(), "1970-01-01 00:00:00");
    }
}
