//! HTTP surface of the broker.
//!
//! Thin by design: handlers validate transport-level input (headers,
//! bodies, query params) and delegate to the broker, registry and journal.
//! Bodies are read as raw strings and parsed with serde_json so every
//! malformed or incomplete body maps to a 400, and the `AppError` → HTTP
//! mapping lives here and nowhere else.

pub mod admin;
pub mod balance;
pub mod messages;
pub mod register;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderMap, HeaderName, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, put};
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::broker::Broker;
use crate::error::AppError;
use crate::journal::Journal;
use crate::registry::Registry;

pub const CLIENT_TOKEN_HEADER: &str = "x-client-token";

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub registry: Arc<Registry>,
    pub journal: Arc<Journal>,
    /// Bearer token for admin routes; `None` disables them.
    pub admin_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(CLIENT_TOKEN_HEADER),
        ])
        .expose_headers([HeaderName::from_static(CLIENT_TOKEN_HEADER)]);

    Router::new()
        .route("/register", put(register::register))
        .route(
            "/messages",
            get(messages::replay).post(messages::send),
        )
        .route("/balance", get(balance::balance))
        .route("/clients", get(admin::list_clients))
        .route("/delete", get(admin::reset))
        .fallback(not_found)
        .with_state(state)
        // Layers are applied as a stack (last applied = outermost)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(?addr, "serving HTTP API");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn not_found() -> AppError {
    AppError::NotFound
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Extracts the bidder token from the `X-Client-Token` header.
fn client_token(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get(CLIENT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::bad_request("Missing token"))
}

/// Checks the admin bearer. An unset `ADMIN_TOKEN` rejects everything.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let expected = state.admin_token.as_deref().ok_or(AppError::Unauthorized)?;

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    if bearer == expected {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

fn parse_json_body<T: DeserializeOwned>(body: &str) -> Result<T, AppError> {
    serde_json::from_str(body).map_err(|_| AppError::bad_request("Invalid request body"))
}
