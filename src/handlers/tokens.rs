use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::{
    errors::CheckoutError,
    services::tokens::{RotatedToken, TokenError, TokenMetrics, TokenValidation},
    AppState,
};

#[derive(Debug, Deserialize)]
pub struct RotateTokenRequest {
    pub token: String,
}

impl IntoResponse for TokenError {
    fn into_response(self) -> Response {
        match self {
            TokenError::Rejected(reason) => {
                CheckoutError::new(StatusCode::UNAUTHORIZED, "Access token rejected")
                    .with_details(json!({ "reason": reason }))
                    .into_response()
            }
            err @ TokenError::TooShort { .. } => {
                CheckoutError::bad_request(err.to_string()).into_response()
            }
            other => {
                error!(error = %other, "Token operation failed");
                CheckoutError::internal("An internal error occurred").into_response()
            }
        }
    }
}

/// 200 with the validation when the token is usable, 401 with it otherwise.
pub async fn validate_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> (StatusCode, Json<TokenValidation>) {
    let validation = state.tokens.validate_token(&token).await;
    let status = if validation.valid {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    };
    (status, Json(validation))
}

pub async fn rotate_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RotateTokenRequest>,
) -> Result<Json<RotatedToken>, TokenError> {
    Ok(Json(state.tokens.rotate_token(&request.token).await?))
}

pub async fn token_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TokenMetrics>, TokenError> {
    Ok(Json(state.tokens.get_token_metrics().await?))
}
