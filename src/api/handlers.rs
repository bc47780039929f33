//! Request Handlers
//!
//! Thin wrappers that translate HTTP requests into engine calls.

use super::{
    errors::ApiError,
    middleware::RequestId,
    models::*,
    websocket::WebSocketManager,
};
use crate::engine::CrashEngine;
use crate::games::types::RoundSnapshot;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub engine: Arc<CrashEngine>,
    pub version: String,
    pub websocket_manager: WebSocketManager,
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
        store: state.engine.store_name().to_string(),
    })
}

/// POST /api/players
pub async fn create_player_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreatePlayerRequest>,
) -> Result<(StatusCode, Json<PlayerResponse>), ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request(
            request_id.0,
            "Player name must not be empty".to_string(),
        ));
    }

    let player = state
        .engine
        .register_player(name)
        .await
        .map_err(|e| ApiError::from_engine(request_id.0, e))?;

    Ok((StatusCode::CREATED, Json(player.into())))
}

/// GET /api/players/:id/balance
pub async fn balance_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(player_id): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance_usd = state
        .engine
        .balance(&player_id)
        .map_err(|e| ApiError::from_engine(request_id.0, e))?;

    Ok(Json(BalanceResponse {
        player_id,
        balance_usd,
    }))
}

/// POST /api/bet
pub async fn bet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<BetRequest>,
) -> Result<Json<BetResponse>, ApiError> {
    let bet = state
        .engine
        .place_bet(&body.player_id, body.amount_usd, body.currency)
        .await
        .map_err(|e| ApiError::from_engine(request_id.0.clone(), e))?;

    let balance = state
        .engine
        .balance(&body.player_id)
        .map_err(|e| ApiError::from_engine(request_id.0, e))?;

    Ok(Json(BetResponse::new(bet, balance)))
}

/// POST /api/cashout
pub async fn cashout_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CashoutRequest>,
) -> Result<Json<CashoutResponse>, ApiError> {
    let settlement = state
        .engine
        .process_cashout(&body.player_id, body.round_id)
        .await
        .map_err(|e| ApiError::from_engine(request_id.0, e))?;

    Ok(Json(settlement.into()))
}

/// GET /api/round
pub async fn current_round_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<RoundSnapshot>, ApiError> {
    state
        .engine
        .latest_round()
        .map(Json)
        .ok_or_else(|| ApiError::from_engine(request_id.0, crate::errors::EngineError::NoActiveRound))
}

/// GET /api/rounds/:id
pub async fn round_detail_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<u64>,
) -> Result<Json<RoundSnapshot>, ApiError> {
    let record = state
        .engine
        .round_record(round_id)
        .await
        .map_err(|e| ApiError::from_engine(request_id.0, e))?;

    Ok(Json(record.public_view()))
}

/// GET /api/rounds/:id/verify
pub async fn verify_round_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(round_id): Path<u64>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let verification = state
        .engine
        .verify_round(round_id)
        .await
        .map_err(|e| ApiError::from_engine(request_id.0, e))?;

    Ok(Json(verification.into()))
}

/// GET /metrics
pub async fn metrics_handler(
    State(state): State<Arc<AppState>>,
) -> ([(axum::http::header::HeaderName, &'static str); 1], String) {
    let mut body = state.engine.metrics().to_prometheus_format();
    body.push_str(&format!(
        "\n# HELP crash_ws_clients Connected WebSocket clients\n\
         # TYPE crash_ws_clients gauge\n\
         crash_ws_clients {}\n",
        state.websocket_manager.client_count()
    ));

    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}
