pub mod checkout;
pub mod health;
pub mod tokens;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use crate::AppState;

/// Versioned API routes, mounted under `/api/v1`
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/checkout", post(checkout::process_checkout))
        .route("/tokens/rotate", post(tokens::rotate_token))
        .route("/tokens/metrics", get(tokens::token_metrics))
        .route("/tokens/:token", get(tokens::validate_token))
}
