//! Reference implementation of the remote preferences API.
//!
//! Routes:
//! - `GET /health`
//! - `GET /preferences` - stored envelope, `404` when empty
//! - `PUT /preferences` - blind overwrite, returns the canonical envelope
//! - `DELETE /preferences`
//!
//! Each bearer token is one account. State is kept in memory.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use prefsync_common::{PutPreferences, RemoteEnvelope, DEVICE_TYPE_HEADER};

/// Shared server state.
#[derive(Clone)]
pub struct ServerState {
    tokens: Arc<HashSet<String>>,
    /// Stamp writes with `max(server_now, client updated_at)`.
    reconcile_clock: bool,
    accounts: Arc<RwLock<HashMap<String, RemoteEnvelope>>>,
}

impl ServerState {
    pub fn new<I, S>(tokens: I, reconcile_clock: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: Arc::new(tokens.into_iter().map(Into::into).collect()),
            reconcile_clock,
            accounts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Envelope stored for `token`.
    pub async fn stored(&self, token: &str) -> Option<RemoteEnvelope> {
        self.accounts.read().await.get(token).cloned()
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<String, ApiError> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        if self.tokens.contains(token) {
            Ok(token.to_string())
        } else {
            warn!("Rejected request with unknown token");
            Err(ApiError::Unauthorized)
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Request failures mapped to status codes.
#[derive(Debug)]
enum ApiError {
    Unauthorized,
    NotFound,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "missing or invalid token"),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "no preferences stored"),
        };
        (
            status,
            Json(ErrorResponse {
                error: error.to_string(),
            }),
        )
            .into_response()
    }
}

/// Build the API router.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/preferences",
            get(get_preferences)
                .put(put_preferences)
                .delete(delete_preferences),
        )
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    "OK"
}

async fn get_preferences(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<Json<RemoteEnvelope>, ApiError> {
    let token = state.authorize(&headers)?;
    state
        .stored(&token)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn put_preferences(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(request): Json<PutPreferences>,
) -> Result<Json<RemoteEnvelope>, ApiError> {
    let token = state.authorize(&headers)?;

    let device_type = headers
        .get(DEVICE_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    debug!(device_id = %request.device_id, device_type, "PUT /preferences");

    let server_now = state.reconcile_clock.then(Utc::now);
    let envelope = request.into_envelope(server_now);

    state
        .accounts
        .write()
        .await
        .insert(token, envelope.clone());

    info!(
        version = envelope.document.version,
        updated_at = %envelope.updated_at,
        "Stored preferences"
    );
    Ok(Json(envelope))
}

async fn delete_preferences(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = state.authorize(&headers)?;
    state.accounts.write().await.remove(&token);
    info!("Deleted preferences");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use prefsync_common::{DeviceType, PreferenceDocument};

    async fn spawn(state: ServerState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn body(document: PreferenceDocument) -> PutPreferences {
        PutPreferences {
            document,
            device_id: "dev-1".to_string(),
            device_type: DeviceType::Desktop,
        }
    }

    #[tokio::test]
    async fn test_health() {
        let base = spawn(ServerState::new(["t"], false)).await;
        let text = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(text, "OK");
    }

    #[tokio::test]
    async fn test_requires_token() {
        let base = spawn(ServerState::new(["t"], false)).await;
        let client = reqwest::Client::new();

        let missing = client
            .get(format!("{}/preferences", base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::UNAUTHORIZED);

        let wrong = client
            .get(format!("{}/preferences", base))
            .bearer_auth("other")
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), reqwest::StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_accounts_are_isolated() {
        let state = ServerState::new(["a", "b"], false);
        let base = spawn(state.clone()).await;
        let client = reqwest::Client::new();

        let put = client
            .put(format!("{}/preferences", base))
            .bearer_auth("a")
            .json(&body(PreferenceDocument::new_default()))
            .send()
            .await
            .unwrap();
        assert!(put.status().is_success());

        assert!(state.stored("a").await.is_some());
        let other = client
            .get(format!("{}/preferences", base))
            .bearer_auth("b")
            .send()
            .await
            .unwrap();
        assert_eq!(other.status(), reqwest::StatusCode::NOT_FOUND);

        let deleted = client
            .delete(format!("{}/preferences", base))
            .bearer_auth("a")
            .send()
            .await
            .unwrap();
        assert_eq!(deleted.status(), reqwest::StatusCode::NO_CONTENT);
        assert!(state.stored("a").await.is_none());
    }

    #[tokio::test]
    async fn test_clock_reconciliation_moves_stale_stamp_forward() {
        let base = spawn(ServerState::new(["t"], true)).await;
        let mut document = PreferenceDocument::new_default();
        document.updated_at = Utc::now() - Duration::hours(1);
        let stale = document.updated_at;

        let envelope: RemoteEnvelope = reqwest::Client::new()
            .put(format!("{}/preferences", base))
            .bearer_auth("t")
            .json(&body(document))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert!(envelope.updated_at > stale);
        assert_eq!(envelope.document.updated_at, envelope.updated_at);
    }
}
