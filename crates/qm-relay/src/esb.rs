//! ESB connector
//!
//! `EsbClient` is the seam the forwarder uses for `govesb:` targets.
//! `HttpEsbClient` talks to the engine over plain HTTP:
//! - obtains a client-credentials access token from the token endpoint
//! - posts to `{engine}/push-request` when the payload carries a push code,
//!   otherwise to `{engine}/request`

use async_trait::async_trait;
use qm_common::ErrorInfo;
use qm_config::EsbConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

const PUSH_CODE_FIELDS: &[&str] = &["pushCode", "apiPushCode", "push_code"];

/// ESB call failure, carried into the tracker and dead-letter envelope
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EsbError {
    pub code: Option<String>,
    pub message: String,
    pub status: Option<u16>,
}

impl EsbError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            status: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl From<EsbError> for ErrorInfo {
    fn from(e: EsbError) -> Self {
        ErrorInfo::new(e.code, e.message, e.status)
    }
}

impl From<reqwest::Error> for EsbError {
    fn from(e: reqwest::Error) -> Self {
        let info = crate::forwarder::normalize_transport_error(&e);
        Self {
            code: info.code,
            message: info.message.unwrap_or_else(|| e.to_string()),
            status: info.status,
        }
    }
}

#[async_trait]
pub trait EsbClient: Send + Sync {
    async fn send(&self, service_code: &str, payload: &Value) -> Result<Value, EsbError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct HttpEsbClient {
    config: EsbConfig,
    client: reqwest::Client,
}

impl HttpEsbClient {
    pub fn new(config: EsbConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn is_push_request(payload: &Value) -> bool {
        PUSH_CODE_FIELDS.iter().any(|field| match payload.get(*field) {
            Some(Value::Null) | Some(Value::Bool(false)) | None => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        })
    }

    async fn access_token(&self, token_url: &str, client_id: &str, client_secret: &str) -> Result<String, EsbError> {
        let response = self
            .client
            .post(token_url)
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials"), ("client_id", client_id)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EsbError::new(format!("ESB token request failed with status {}", status))
                .with_code("ESB_TOKEN")
                .with_status(status.as_u16()));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| EsbError::new(format!("Invalid ESB token response: {}", e)).with_code("ESB_TOKEN"))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl EsbClient for HttpEsbClient {
    async fn send(&self, service_code: &str, payload: &Value) -> Result<Value, EsbError> {
        if service_code.is_empty() {
            return Err(EsbError::new("Missing GOVESB service code"));
        }

        let (Some(token_url), Some(client_id), Some(client_secret), Some(engine_url)) = (
            self.config.token_url.as_deref(),
            self.config.client_id.as_deref(),
            self.config.client_secret.as_deref(),
            self.config.resolved_engine_url(),
        ) else {
            return Err(EsbError::new("Missing GOVESB configuration values").with_code("ESB_NOT_CONFIGURED"));
        };

        let token = self.access_token(token_url, client_id, client_secret).await?;

        let (endpoint, envelope) = if Self::is_push_request(payload) {
            (
                format!("{}/push-request", engine_url),
                json!({"data": {"pushCode": service_code, "esbBody": payload}}),
            )
        } else {
            (
                format!("{}/request", engine_url),
                json!({"data": {"apiCode": service_code, "esbBody": payload}}),
            )
        };

        debug!(service_code = %service_code, endpoint = %endpoint, "Sending ESB request");

        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(token)
            .json(&envelope)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EsbError::new(format!("ESB request failed with status {}", status))
                .with_status(status.as_u16()));
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}
