//! HTTP service for the `/ask2` contract.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ask2` | Ask a question; returns answer, sources, meta |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Client failures follow the JSON error schema:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "q must not be empty" } }
//! ```
//!
//! Only invalid input (400) and rate limiting (429) surface as non-success
//! responses. Retrieval and generation failures degrade inside the
//! orchestrator to an HTTP 200 with an apologetic payload — the chat UI never
//! renders a raw error.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; the public website calls
//! this service cross-origin.

use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::errors::AskError;
use crate::models::ScopeHint;
use crate::orchestrate::{AskRequest, Orchestrator};
use crate::ratelimit::RateLimiter;

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    limiter: Arc<RateLimiter>,
}

/// Start the `/ask2` service. Binds to `[server].bind` and runs until the
/// process is terminated. Under strict embed parity a mismatched corpus makes
/// this return an error before the listener ever opens.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let orchestrator = Arc::new(Orchestrator::from_config(config).await?);
    let limiter = Arc::new(RateLimiter::new(&config.rate_limit));

    let state = AppState {
        orchestrator,
        limiter,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ask2", post(handle_ask))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    let bind_addr = config.server.bind.clone();
    tracing::info!(bind = %bind_addr, "ask2 service listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn rate_limited() -> AppError {
    AppError {
        status: StatusCode::TOO_MANY_REQUESTS,
        code: "rate_limited".to_string(),
        message: "rate limit exceeded, retry later".to_string(),
    }
}

// ============ POST /ask2 ============

/// Request body. `q` has accepted aliases so older site clients keep working.
#[derive(Debug, Deserialize, Default)]
pub struct AskBody {
    q: Option<String>,
    question: Option<String>,
    user_message: Option<String>,
    message: Option<String>,
    text: Option<String>,
    k: Option<i64>,
    docset: Option<String>,
    namespace: Option<String>,
    ticker: Option<String>,
    company: Option<String>,
}

impl AskBody {
    /// First non-empty of `q` and its aliases, in precedence order.
    fn query(&self) -> Option<String> {
        [
            &self.q,
            &self.question,
            &self.user_message,
            &self.message,
            &self.text,
        ]
        .into_iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(|s| s.to_string())
    }

    fn into_request(self, q: String) -> AskRequest {
        AskRequest {
            q,
            k: self.k,
            hint: ScopeHint {
                docset: self.docset,
                namespace: self.namespace,
                ticker: self.ticker,
                company: self.company,
            },
        }
    }
}

async fn handle_ask(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<AskBody>,
) -> Result<Json<crate::models::AnswerPayload>, AppError> {
    // Quota check precedes classification so over-limit callers cost nothing
    if !state.limiter.allow(&addr.ip().to_string()).await {
        return Err(rate_limited());
    }

    let q = body.query().unwrap_or_default();
    Orchestrator::validate(&q, body.k).map_err(|e| match e {
        AskError::InvalidRequest(msg) => bad_request(msg),
        other => bad_request(other.to_string()),
    })?;

    let request = body.into_request(q);
    let payload = state.orchestrator.handle(&request).await;
    Ok(Json(payload))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_alias_precedence() {
        let body = AskBody {
            question: Some("from question".to_string()),
            message: Some("from message".to_string()),
            ..Default::default()
        };
        assert_eq!(body.query().as_deref(), Some("from question"));

        let body = AskBody {
            q: Some("  ".to_string()),
            text: Some("from text".to_string()),
            ..Default::default()
        };
        assert_eq!(body.query().as_deref(), Some("from text"));

        assert_eq!(AskBody::default().query(), None);
    }
}
