//! HTTP routes exposing the ledger to collaborators.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::chain::{ChainSummary, CommitOutcome};
use crate::ledger::{commit_in_background, SharedLedger};
use crate::model::{entry_fingerprint, verify_fingerprint, Block, Record};
use crate::query::RecordMatch;
use crate::validate::Violation;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub ledger: SharedLedger,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/records", post(submit_record))
        .route("/records/pending", get(pending_records))
        .route("/commit", post(commit))
        .route("/blocks", get(list_blocks))
        .route("/blocks/:index", get(get_block))
        .route("/patients/:id/records", get(patient_records))
        .route("/doctors/:id/records", get(doctor_records))
        .route("/validate", get(validate_chain))
        .route("/summary", get(summary))
        .route("/save", post(save))
        .route("/verify", post(verify_record))
        .route("/health", get(health))
        .route("/version", get(version))
        .with_state(state)
}

#[derive(Serialize)]
pub struct SubmitResp {
    pub pending: usize,
}

/// POST /records
pub async fn submit_record(
    State(state): State<AppState>,
    Json(entry): Json<Value>,
) -> ApiResult<SubmitResp> {
    let mut ledger = state.ledger.lock().await;
    let pending = ledger
        .submit_record(entry)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(SubmitResp { pending }))
}

/// GET /records/pending
pub async fn pending_records(State(state): State<AppState>) -> Json<Vec<Record>> {
    let ledger = state.ledger.lock().await;
    Json(ledger.chain().pending().to_vec())
}

/// Block as served to clients, with a human-readable timestamp.
#[derive(Serialize)]
pub struct BlockView {
    #[serde(flatten)]
    pub block: Block,
    pub formatted_time: String,
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        Self {
            formatted_time: block.formatted_time(),
            block: block.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct CommitResp {
    pub committed: bool,
    pub block: Option<BlockView>,
    /// Present when the block was committed but the snapshot write failed.
    pub persist_error: Option<String>,
}

/// POST /commit. Mines on the blocking pool. A client that disconnects
/// drops this future, which cancels mining and leaves the queue intact.
pub async fn commit(State(state): State<AppState>) -> ApiResult<CommitResp> {
    let report = commit_in_background(state.ledger.clone(), CancellationToken::new())
        .await
        .map_err(|e| {
            error!("commit task failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "commit failed".to_string())
        })?;

    if let Some(e) = &report.persist_error {
        warn!("commit response carries persistence failure: {e}");
    }
    let block = match &report.outcome {
        CommitOutcome::Committed(block) => Some(BlockView::from(block)),
        CommitOutcome::Empty | CommitOutcome::Cancelled | CommitOutcome::Stale => None,
    };
    Ok(Json(CommitResp {
        committed: block.is_some(),
        block,
        persist_error: report.persist_error.map(|e| e.to_string()),
    }))
}

/// GET /blocks
pub async fn list_blocks(State(state): State<AppState>) -> Json<Vec<BlockView>> {
    let ledger = state.ledger.lock().await;
    Json(ledger.chain().blocks().iter().map(BlockView::from).collect())
}

/// GET /blocks/:index
pub async fn get_block(
    State(state): State<AppState>,
    Path(index): Path<u64>,
) -> ApiResult<BlockView> {
    let ledger = state.ledger.lock().await;
    let block = ledger
        .chain()
        .block(index)
        .ok_or((StatusCode::NOT_FOUND, "not found".into()))?;
    Ok(Json(BlockView::from(block)))
}

/// Owned copy of a [`RecordMatch`] for the response body.
#[derive(Serialize)]
pub struct RecordMatchView {
    pub record: Record,
    pub block_index: u64,
    pub block_hash: String,
    pub block_timestamp: i64,
}

impl From<RecordMatch<'_>> for RecordMatchView {
    fn from(m: RecordMatch<'_>) -> Self {
        Self {
            record: m.record.clone(),
            block_index: m.block_index,
            block_hash: m.block_hash.to_string(),
            block_timestamp: m.block_timestamp,
        }
    }
}

/// GET /patients/:id/records
pub async fn patient_records(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Vec<RecordMatchView>> {
    let ledger = state.ledger.lock().await;
    Json(
        ledger
            .chain()
            .records_for_patient(&id)
            .map(RecordMatchView::from)
            .collect(),
    )
}

/// GET /doctors/:id/records
pub async fn doctor_records(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Vec<RecordMatchView>> {
    let ledger = state.ledger.lock().await;
    Json(
        ledger
            .chain()
            .records_for_doctor(&id)
            .map(RecordMatchView::from)
            .collect(),
    )
}

/// GET /validate: `{ ok, violation }`, where `violation` names the first bad block.
#[derive(Serialize)]
pub struct ValidateResp {
    pub ok: bool,
    pub violation: Option<Violation>,
}

pub async fn validate_chain(State(state): State<AppState>) -> Json<ValidateResp> {
    let ledger = state.ledger.lock().await;
    let violation = ledger.chain().first_violation();
    Json(ValidateResp {
        ok: violation.is_none(),
        violation,
    })
}

/// GET /summary
pub async fn summary(State(state): State<AppState>) -> Json<ChainSummary> {
    let ledger = state.ledger.lock().await;
    Json(ledger.chain().summary())
}

#[derive(Serialize)]
pub struct SaveResp {
    pub saved: bool,
}

/// POST /save
pub async fn save(State(state): State<AppState>) -> ApiResult<SaveResp> {
    let ledger = state.ledger.lock().await;
    ledger.save().map_err(|e| {
        error!("save failed: {e}");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(SaveResp { saved: true }))
}

#[derive(Deserialize)]
pub struct VerifyInput {
    pub entry: Map<String, Value>,
    pub expected_hash: String,
}

#[derive(Serialize)]
pub struct VerifyResp {
    pub matches: bool,
    pub computed_hash: String,
}

/// POST /verify: compare an entry against a previously issued fingerprint.
pub async fn verify_record(Json(input): Json<VerifyInput>) -> Json<VerifyResp> {
    Json(VerifyResp {
        matches: verify_fingerprint(&input.entry, &input.expected_hash),
        computed_hash: entry_fingerprint(&input.entry),
    })
}

/// GET /health: liveness plus the chain size.
#[derive(Serialize)]
pub struct HealthResp {
    pub status: &'static str,
    pub blocks: usize,
    pub pending: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResp> {
    let ledger = state.ledger.lock().await;
    Json(HealthResp {
        status: "ok",
        blocks: ledger.chain().len(),
        pending: ledger.chain().pending().len(),
    })
}

/// GET /version
#[derive(Serialize)]
pub struct VersionResp {
    pub name: &'static str,
    pub version: &'static str,
}

pub async fn version() -> Json<VersionResp> {
    Json(VersionResp {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::storage::SnapshotStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::Mutex;
    use tower::ServiceExt;

    fn app(dir: &TempDir) -> Router {
        let (ledger, _) = Ledger::open(SnapshotStore::new(dir.path().join("chain.json")), 0);
        router(AppState {
            ledger: Arc::new(Mutex::new(ledger)),
        })
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn submit_commit_and_query() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let (status, body) = call(
            &app,
            "POST",
            "/records",
            Some(json!({"patient_id": "P1", "diagnosis": "flu"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pending"], 1);

        let (_, body) = call(&app, "POST", "/commit", None).await;
        assert_eq!(body["committed"], true);
        assert_eq!(body["block"]["index"], 1);
        assert!(body["persist_error"].is_null());

        let (_, body) = call(&app, "GET", "/patients/P1/records", None).await;
        assert_eq!(body[0]["record"]["entry"]["diagnosis"], "flu");
        assert_eq!(body[0]["block_index"], 1);

        let (_, body) = call(&app, "GET", "/validate", None).await;
        assert_eq!(body["ok"], true);

        let (_, body) = call(&app, "POST", "/commit", None).await;
        assert_eq!(body["committed"], false);
    }

    #[tokio::test]
    async fn rejects_entry_without_identity() {
        let dir = TempDir::new().unwrap();
        let (status, _) = call(&app(&dir), "POST", "/records", Some(json!({"diagnosis": "flu"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_block_is_not_found() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);
        let (status, body) = call(&app, "GET", "/blocks/0", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["previous_hash"], "0");
        let (status, _) = call(&app, "GET", "/blocks/7", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_chain_size() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);
        call(&app, "POST", "/records", Some(json!({"doctor_id": "D1"}))).await;

        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["blocks"], 1);
        assert_eq!(body["pending"], 1);

        let (_, body) = call(&app, "GET", "/version", None).await;
        assert_eq!(body["name"], "record-ledger-node");
    }

    #[tokio::test]
    async fn verify_reports_fingerprint() {
        let dir = TempDir::new().unwrap();
        let entry = json!({"patient_id": "P1", "treatment": "rest"});
        let expected = entry_fingerprint(entry.as_object().unwrap());

        let (_, body) = call(
            &app(&dir),
            "POST",
            "/verify",
            Some(json!({"entry": entry, "expected_hash": expected})),
        )
        .await;
        assert_eq!(body["matches"], true);
        assert_eq!(body["computed_hash"], expected.as_str());
    }
}
