use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Json;

use crate::api::{AppState, client_token};
use crate::error::AppError;
use crate::registry::ClientInfo;

/// GET /balance: current balance and name for the calling token.
pub async fn balance(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClientInfo>, AppError> {
    let token = client_token(&headers)?;
    let profile = state.registry.balance(token).await?;

    Ok(Json(ClientInfo {
        balance: profile.balance,
        name: profile.name,
    }))
}
