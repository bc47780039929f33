//! HTTP and WebSocket surface of the round engine
//!
//! Exposes wallet, bet, cashout and round-history endpoints, the live
//! event stream and Prometheus metrics.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod websocket;

pub use errors::{ApiError, ErrorResponse};
pub use handlers::AppState;
pub use server::ApiServer;
pub use websocket::WebSocketManager;
