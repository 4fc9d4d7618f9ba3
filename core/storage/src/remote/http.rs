//! HTTP client for the remote preferences API.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use prefsync_common::{
    DeviceIdentity, Error, PreferenceDocument, PutPreferences, RemoteEnvelope, Result, TierId,
    DEVICE_ID_HEADER, DEVICE_TYPE_HEADER,
};

use crate::tier::StorageTier;

fn default_timeout_ms() -> u64 {
    5000
}

/// Where and how to reach the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// API root, e.g. `https://prefs.example.com/api/`.
    pub base_url: String,
    /// Bearer token of the authenticated session.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Per-request timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// T4 over HTTP.
///
/// Every request carries the session bearer token and the device identity
/// as metadata headers.
pub struct HttpRemoteTier {
    http: Client,
    endpoint: Url,
    auth_token: Option<String>,
    identity: DeviceIdentity,
}

impl HttpRemoteTier {
    /// Create a client for `config`, writing as `identity`.
    ///
    /// # Errors
    /// - `InvalidInput` if the base URL does not parse
    /// - `Network` if the HTTP client cannot be built
    pub fn new(config: &RemoteConfig, identity: DeviceIdentity) -> Result<Self> {
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let endpoint = Url::parse(&base)
            .and_then(|u| u.join("preferences"))
            .map_err(|e| Error::InvalidInput(format!("Invalid remote URL '{}': {}", base, e)))?;

        let http = Client::builder()
            .user_agent("PrefSync/0.1")
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint,
            auth_token: config.auth_token.clone(),
            identity,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn auth_header(&self) -> Result<String> {
        match &self.auth_token {
            Some(token) => Ok(format!("Bearer {}", token)),
            None => Err(Error::Unauthenticated("no session token".to_string())),
        }
    }

    fn request(&self, method: reqwest::Method) -> Result<reqwest::RequestBuilder> {
        Ok(self
            .http
            .request(method, self.endpoint.clone())
            .header(header::AUTHORIZATION, self.auth_header()?)
            .header(DEVICE_ID_HEADER, &self.identity.id)
            .header(DEVICE_TYPE_HEADER, self.identity.device_type.as_str()))
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(format!("{} timed out", what))
            } else {
                Error::Network(format!("Failed to {}: {}", what, e))
            }
        })
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Parse(format!("Failed to parse response: {}", e)))
        } else if status == StatusCode::NOT_FOUND {
            Err(Error::NotFound("No remote preferences".to_string()))
        } else if status == StatusCode::UNAUTHORIZED {
            Err(Error::Unauthenticated(
                "Invalid or expired session".to_string(),
            ))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Network(format!("API error: {} - {}", status, body)))
        }
    }
}

#[async_trait]
impl StorageTier for HttpRemoteTier {
    fn tier(&self) -> TierId {
        TierId::Remote
    }

    async fn read(&self) -> Result<Option<PreferenceDocument>> {
        let request = self.request(reqwest::Method::GET)?;
        let response = self.send(request, "fetch preferences").await?;

        match self.handle_response::<RemoteEnvelope>(response).await {
            Ok(envelope) => {
                debug!(writer = %envelope.device_id, "Fetched remote preferences");
                Ok(Some(envelope.into_canonical()))
            }
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, doc: &PreferenceDocument) -> Result<PreferenceDocument> {
        let body = PutPreferences {
            document: doc.clone(),
            device_id: self.identity.id.clone(),
            device_type: self.identity.device_type,
        };
        let request = self.request(reqwest::Method::PUT)?.json(&body);
        let response = self.send(request, "store preferences").await?;

        let envelope: RemoteEnvelope = self.handle_response(response).await?;
        debug!(version = doc.version, "Stored remote preferences");
        Ok(envelope.into_canonical())
    }

    async fn clear(&self) -> Result<()> {
        let request = self.request(reqwest::Method::DELETE)?;
        let response = self.send(request, "delete preferences").await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else if status == StatusCode::UNAUTHORIZED {
            Err(Error::Unauthenticated(
                "Invalid or expired session".to_string(),
            ))
        } else {
            Err(Error::Network(format!("API error: {}", status)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prefsync_common::{DeviceType, ErrorKind, ThemeMode};
    use prefsync_server::{router, ServerState};

    async fn spawn_server(state: ServerState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity::generate(DeviceType::Desktop)
    }

    #[test]
    fn test_endpoint_join() {
        let tier = HttpRemoteTier::new(&RemoteConfig::new("http://localhost:8080/api"), identity())
            .unwrap();
        assert_eq!(tier.endpoint().as_str(), "http://localhost:8080/api/preferences");
    }

    #[test]
    fn test_invalid_url() {
        let err = HttpRemoteTier::new(&RemoteConfig::new("not a url"), identity())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_roundtrip_against_server() {
        let base = spawn_server(ServerState::new(["secret"], false)).await;
        let tier = HttpRemoteTier::new(&RemoteConfig::new(base).with_token("secret"), identity())
            .unwrap();

        assert!(tier.read().await.unwrap().is_none());

        let mut doc = PreferenceDocument::new_default();
        doc.mode = ThemeMode::Dark;
        let stored = tier.write(&doc).await.unwrap();
        assert_eq!(stored, doc);
        assert_eq!(tier.read().await.unwrap(), Some(doc));

        tier.clear().await.unwrap();
        assert!(tier.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bad_token_is_unauthenticated() {
        let base = spawn_server(ServerState::new(["secret"], false)).await;
        let tier = HttpRemoteTier::new(&RemoteConfig::new(base).with_token("wrong"), identity())
            .unwrap();

        let err = tier.read().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn test_missing_token_fails_fast() {
        let tier = HttpRemoteTier::new(&RemoteConfig::new("http://127.0.0.1:9"), identity())
            .unwrap();
        let err = tier.write(&PreferenceDocument::new_default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn test_unreachable_is_network_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = RemoteConfig::new(format!("http://{}", addr))
            .with_token("secret")
            .with_timeout_ms(500);
        let tier = HttpRemoteTier::new(&config, identity()).unwrap();
        let err = tier.read().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
