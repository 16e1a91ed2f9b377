use anyhow::Context;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::api::{AppState, CLIENT_TOKEN_HEADER, parse_json_body};
use crate::error::AppError;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RegisterBody {
    name: Option<String>,
}

/// PUT /register: issues a token and the starting balance. The token is
/// returned in the body and mirrored in the `X-Client-Token` header.
pub async fn register(
    State(state): State<AppState>,
    body: String,
) -> Result<Response, AppError> {
    let body: RegisterBody = parse_json_body(&body)?;
    let name = body.name.unwrap_or_default();

    let profile = state.registry.register(&name).await?;

    let header = HeaderValue::from_str(&profile.token).context("token is not a valid header")?;
    let mut response = Json(&profile).into_response();
    response.headers_mut().insert(CLIENT_TOKEN_HEADER, header);
    Ok(response)
}
