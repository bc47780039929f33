//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::{handlers::*, websocket::websocket_handler};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router. `/metrics` is mounted only when
/// `monitoring.enable_metrics` is set.
pub fn create_router(state: Arc<AppState>) -> Router {
    let metrics_enabled = state.engine.config().monitoring.enable_metrics;

    let router = Router::new()
        .route("/health", get(health_handler))
        // Wallets
        .route("/api/players", post(create_player_handler))
        .route("/api/players/:id/balance", get(balance_handler))
        // Round actions
        .route("/api/bet", post(bet_handler))
        .route("/api/cashout", post(cashout_handler))
        // Round history and fairness
        .route("/api/round", get(current_round_handler))
        .route("/api/rounds/:id", get(round_detail_handler))
        .route("/api/rounds/:id/verify", get(verify_round_handler))
        .route("/ws", get(websocket_handler));

    let router = if metrics_enabled {
        router.route("/metrics", get(metrics_handler))
    } else {
        router
    };

    router.with_state(state)
}
