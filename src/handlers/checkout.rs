use axum::{extract::State, http::StatusCode, response::Json};
use std::sync::Arc;

use crate::{
    errors::CheckoutError,
    services::checkout::{CheckoutRequest, CheckoutResponse},
    AppState,
};

/// Places an order for the photos in the cart and returns the payment
/// redirect (or the fallback link when the gateway is unavailable).
pub async fn process_checkout(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), CheckoutError> {
    let response = state.checkout.process_checkout(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}
