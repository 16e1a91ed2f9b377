use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::{AppState, require_admin};
use crate::error::AppError;
use crate::registry::ClientPage;

const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientsQuery {
    page: Option<usize>,
    page_size: Option<usize>,
}

/// GET /clients: paginated registry listing, admin only.
pub async fn list_clients(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ClientsQuery>,
) -> Result<Json<ClientPage>, AppError> {
    require_admin(&state, &headers)?;

    let page = state
        .registry
        .list_clients(
            query.page.unwrap_or(1),
            query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;
    Ok(Json(page))
}

/// GET /delete: full reset; disarms the alarm, aborts parked bids and
/// wipes every namespace. Admin only.
pub async fn reset(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    require_admin(&state, &headers)?;

    let removed = state.broker.reset().await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("store reset; {removed} keys removed"),
    })))
}
