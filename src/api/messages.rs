use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Json;
use serde::Deserialize;

use crate::api::{AppState, client_token, parse_json_body};
use crate::broker::RoundReply;
use crate::error::AppError;
use crate::journal::ReplayPage;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SendBody {
    message: Option<String>,
    bid: Option<i64>,
}

/// POST /messages: admits a bid and responds once its round settles.
pub async fn send(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<RoundReply>, AppError> {
    let token = client_token(&headers)?.to_string();

    let body: SendBody = parse_json_body(&body)?;
    let (Some(message), Some(bid)) = (body.message, body.bid) else {
        return Err(AppError::bad_request("Missing message or bid"));
    };

    let reply = state.broker.submit(&token, &message, bid).await?;
    Ok(Json(reply))
}

#[derive(Debug, Deserialize)]
pub struct ReplayQuery {
    end: Option<String>,
    limit: Option<usize>,
}

/// GET /messages: reverse-chronological page of accepted messages.
pub async fn replay(
    State(state): State<AppState>,
    Query(query): Query<ReplayQuery>,
) -> Result<Json<ReplayPage>, AppError> {
    let page = state.journal.replay(query.end, query.limit).await?;
    Ok(Json(page))
}
