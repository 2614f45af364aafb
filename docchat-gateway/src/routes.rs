//! HTTP surface: health, token verification and context-window lookup.

use crate::auth::{bearer_token, Principal};
use crate::service::ConversationService;
use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Json, Router,
};
use docchat_memory::{Message, SessionHandle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ConversationService>,
}

impl AppState {
    pub fn new(service: Arc<ConversationService>) -> Self {
        Self { service }
    }
}

/// Verified caller, inserted into request extensions by [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub principal: Principal,
    pub session: SessionHandle,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserInfo {
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub sub: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub user_info: UserInfo,
    pub session_id: SessionHandle,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub budget: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: SessionHandle,
    pub budget: usize,
    pub messages: Vec<Message>,
}

fn error_response(status: StatusCode, error: &str, code: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
        }),
    )
        .into_response()
}

fn unauthorized(error: &str) -> Response {
    let mut response = error_response(StatusCode::UNAUTHORIZED, error, "UNAUTHORIZED");
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
}

/// Authenticate the bearer token and resolve the caller's session.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()).map(str::to_owned) else {
        return unauthorized("Not authenticated");
    };

    let principal = match state.service.authenticate(&token).await {
        Ok(principal) => principal,
        Err(_) => return unauthorized("Invalid authentication token"),
    };

    let session = match state.service.get_session(&principal).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "Failed to resolve session");
            return error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "service temporarily unavailable",
                "SESSION_UNAVAILABLE",
            );
        }
    };

    request
        .extensions_mut()
        .insert(AuthUser { principal, session });
    next.run(request).await
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, label) = if state.service.health_check().await {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(HealthResponse {
            status: label.into(),
            version: env!("CARGO_PKG_VERSION").into(),
            service: "docchat-gateway".into(),
        }),
    )
}

async fn verify_handler(Extension(user): Extension<AuthUser>) -> Json<VerifyResponse> {
    let AuthUser { principal, session } = user;
    Json(VerifyResponse {
        valid: true,
        user_info: UserInfo {
            email: principal.email,
            name: principal.display_name,
            picture: principal.picture_url,
            sub: principal.subject_id,
        },
        session_id: session,
    })
}

async fn history_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let budget = query
        .budget
        .unwrap_or_else(|| state.service.default_budget());

    match state.service.get_context_window(&user.session, budget).await {
        Ok(messages) => Json(HistoryResponse {
            session_id: user.session,
            budget,
            messages,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(session = %user.session, error = %e, "Failed to load history");
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            error_response(status, "failed to load history", "HISTORY_ERROR")
        }
    }
}

/// Build the router; `/health` is public, everything under `/api/v1` requires a bearer token.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/v1/auth/verify", get(verify_handler))
        .route("/api/v1/chatbot/history", get(history_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(protected)
        .with_state(state)
}
