use crate::response::{ApiError, ApiResponse, ExecutionReply};
use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use tradedesk_bot_orchestrator::{RunState, StartRequest};
use tradedesk_core::{AccountId, Ticket};
use tradedesk_execution::{
    AccountPositions, BulkCloseReport, BulkConnectionReport, ConnectionSnapshot,
    OpenPositionRequest, PositionPreview, PreviewRequest,
};

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T: serde::Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConnectParams {
    pub force: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SymbolFilter {
    pub symbol: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ModifyRequest {
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<Vec<ConnectionSnapshot>> {
    ok(state.registry.list_active_sessions().await)
}

/// # Errors
/// Unknown account (404), inactive or unsupported account (409), broker refusal (502).
pub async fn connect_account(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Query(params): Query<ConnectParams>,
) -> ApiResult<ConnectionSnapshot> {
    ok(state.registry.connect(account_id, params.force).await?)
}

/// # Errors
/// Never fails today.
pub async fn disconnect_account(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<ConnectionSnapshot> {
    ok(state.registry.disconnect(account_id).await?)
}

/// # Errors
/// Same as [`connect_account`].
pub async fn reconnect_account(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<ConnectionSnapshot> {
    ok(state.registry.reconnect(account_id).await?)
}

pub async fn reconnect_all(State(state): State<AppState>) -> ApiResult<BulkConnectionReport> {
    ok(state.registry.reconnect_all().await)
}

pub async fn disconnect_all(State(state): State<AppState>) -> ApiResult<BulkConnectionReport> {
    ok(state.registry.disconnect_all().await)
}

/// # Errors
/// Returns 404 when the account was never connected.
pub async fn connection_state(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
) -> ApiResult<ConnectionSnapshot> {
    let snapshot = state
        .registry
        .get_connection_state(account_id)
        .await
        .ok_or_else(|| {
            ApiError::not_found(format!("account {account_id} has no connection state"))
        })?;
    ok(snapshot)
}

/// # Errors
/// Account not connected (409) or broker failure (502).
pub async fn account_positions(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Query(filter): Query<SymbolFilter>,
) -> ApiResult<Vec<AccountPositions>> {
    ok(state
        .coordinator
        .get_open_positions(Some(account_id), filter.symbol.as_deref())
        .await?)
}

/// # Errors
/// Never fails; accounts whose query fails are skipped.
pub async fn all_positions(
    State(state): State<AppState>,
    Query(filter): Query<SymbolFilter>,
) -> ApiResult<Vec<AccountPositions>> {
    ok(state
        .coordinator
        .get_open_positions(None, filter.symbol.as_deref())
        .await?)
}

pub async fn open_position(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Json(request): Json<OpenPositionRequest>,
) -> ExecutionReply {
    ExecutionReply(state.coordinator.open_position(account_id, request).await)
}

pub async fn modify_position(
    State(state): State<AppState>,
    Path((account_id, ticket)): Path<(AccountId, Ticket)>,
    Json(request): Json<ModifyRequest>,
) -> ExecutionReply {
    ExecutionReply(
        state
            .coordinator
            .modify_position(account_id, ticket, request.stop_loss, request.take_profit)
            .await,
    )
}

pub async fn close_position(
    State(state): State<AppState>,
    Path((account_id, ticket)): Path<(AccountId, Ticket)>,
) -> ExecutionReply {
    ExecutionReply(state.coordinator.close_position(account_id, ticket).await)
}

/// # Errors
/// Account not connected or positions cannot be listed. Individual close
/// failures are reported inside the batch.
pub async fn close_all(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Query(filter): Query<SymbolFilter>,
) -> ApiResult<BulkCloseReport> {
    ok(state
        .coordinator
        .bulk_close(account_id, filter.symbol.as_deref())
        .await?)
}

/// # Errors
/// Account not connected (409) or unknown symbol (422).
pub async fn preview_position(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Json(request): Json<PreviewRequest>,
) -> ApiResult<PositionPreview> {
    ok(state.coordinator.preview_position(account_id, &request).await?)
}

pub async fn bot_status(State(state): State<AppState>) -> ApiResult<RunState> {
    ok(state.controller.status())
}

/// Starts the bot. An empty body starts on the default account.
///
/// # Errors
/// 422 for a body that is not a valid start request. Conflict when a run is
/// live or the state needs a reset, otherwise the connection or account error
/// that aborted the start.
pub async fn start_bot(State(state): State<AppState>, body: Bytes) -> ApiResult<RunState> {
    let request = parse_start_request(&body)?;
    ok(state.controller.start(request).await?)
}

fn parse_start_request(body: &[u8]) -> Result<StartRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(StartRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("invalid start request: {e}"),
        )
    })
}

/// # Errors
/// Conflict when the bot is already stopped.
pub async fn stop_bot(State(state): State<AppState>) -> ApiResult<RunState> {
    ok(state.controller.stop().await?)
}

/// # Errors
/// Conflict unless the bot is running.
pub async fn pause_bot(State(state): State<AppState>) -> ApiResult<RunState> {
    ok(state.controller.pause().await?)
}

/// # Errors
/// Conflict unless the bot is paused.
pub async fn resume_bot(State(state): State<AppState>) -> ApiResult<RunState> {
    ok(state.controller.resume().await?)
}

/// # Errors
/// Conflict while a run is live.
pub async fn reset_bot(State(state): State<AppState>) -> ApiResult<RunState> {
    ok(state.controller.reset().await?)
}
