use crate::constants::{DEFAULT_RECENT_LIMIT, MAX_BLOCKS_PER_REQUEST};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use sealchain_core::{
    chain::{is_complaint, Ledger},
    validate::ValidationReport,
    Block, LedgerError,
};
use sealchain_storage::SledStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Ledger<SledStore>,
}

#[derive(Serialize, Deserialize)]
pub struct Health {
    pub status: String,
}

/// What callers keep next to their own record as the tamper-evidence anchor.
#[derive(Debug, Serialize, Deserialize)]
pub struct AppendReceipt {
    pub index: u64,
    pub hash: String,
    pub nonce: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InfoOut {
    pub total_blocks: u64,
    pub last_block_hash: String,
    pub last_block_index: u64,
    pub total_complaints: u64,
    pub difficulty: u32,
    pub chain_valid: bool,
}

#[derive(Deserialize)]
pub struct RecentQuery {
    limit: Option<usize>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("ledger worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Ledger(LedgerError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Ledger(LedgerError::EmptyChain) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Ledger(LedgerError::Cancelled) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/chain/info", get(chain_info))
        .route("/chain/validate", get(validate))
        .route("/chain/blocks", get(recent_blocks).post(append))
        .route("/chain/blocks/{index}", get(block_by_index))
        .route("/chain/complaints", get(complaints))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok".to_string(),
    })
}

/// Mining blocks its thread until a seal is found, so it runs off the runtime.
async fn append(State(state): State<AppState>, Json(payload): Json<Value>) -> ApiResult<AppendReceipt> {
    let ledger = state.ledger.clone();
    let block = tokio::task::spawn_blocking(move || ledger.append(payload)).await??;
    Ok(Json(AppendReceipt {
        index: block.index,
        hash: block.hash,
        nonce: block.nonce,
    }))
}

async fn chain_info(State(state): State<AppState>) -> ApiResult<InfoOut> {
    let ledger = state.ledger.clone();
    let out = tokio::task::spawn_blocking(move || -> Result<InfoOut, LedgerError> {
        let (info, blocks) = ledger.inspect()?;
        let total_complaints = count_complaints(&blocks);
        Ok(InfoOut {
            total_blocks: info.total_blocks,
            last_block_hash: info.last_hash,
            last_block_index: info.last_index,
            total_complaints,
            difficulty: info.difficulty,
            chain_valid: info.valid,
        })
    })
    .await??;
    Ok(Json(out))
}

async fn validate(State(state): State<AppState>) -> ApiResult<ValidationReport> {
    let ledger = state.ledger.clone();
    let report = tokio::task::spawn_blocking(move || ledger.validate()).await??;
    Ok(Json(report))
}

async fn recent_blocks(
    State(state): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> ApiResult<Vec<Block>> {
    let limit = q
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .min(MAX_BLOCKS_PER_REQUEST);
    Ok(Json(state.ledger.get_recent(limit)?))
}

/// Every complaint anchor, oldest first.
async fn complaints(State(state): State<AppState>) -> ApiResult<Vec<Block>> {
    let ledger = state.ledger.clone();
    let blocks = tokio::task::spawn_blocking(move || ledger.complaints()).await??;
    Ok(Json(blocks))
}

async fn block_by_index(State(state): State<AppState>, Path(index): Path<u64>) -> ApiResult<Block> {
    Ok(Json(state.ledger.get_block(index)?))
}

pub fn count_complaints(blocks: &[Block]) -> u64 {
    blocks.iter().filter(|b| is_complaint(b)).count() as u64
}
