//! Queue Mediator Configuration
//!
//! Loads the mediator configuration from a TOML or JSON file:
//! - Broker server settings and the derived AMQP URI
//! - Subscription queues (consumed and forwarded) and publish queues
//! - Request tracker, HTTP, forwarder and ESB settings
//!
//! Keys are camelCase so existing mediator JSON documents load unchanged.
//! Environment variables override file values.

use std::path::Path;

use qm_common::SubQueueConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_RECORDS: usize = 5000;
pub const DEFAULT_HTTP_PORT: u16 = 8085;
pub const DEFAULT_FORWARD_TIMEOUT_SECS: u64 = 300;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Broker server connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueServerConfig {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "VHOST")]
    pub vhost: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Declare queues as durable when asserting them
    #[serde(default)]
    pub durable_queues: bool,
}

impl Default for QueueServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: Some(5672),
            vhost: None,
            username: None,
            password: None,
            durable_queues: false,
        }
    }
}

impl QueueServerConfig {
    /// AMQP URI in the form `amqp://[user:pass@]host[:port][/vhost]`.
    /// Credentials are only embedded when both are present.
    pub fn amqp_uri(&self) -> String {
        let mut uri = String::from("amqp://");

        if let (Some(user), Some(pass)) = (&self.username, &self.password) {
            uri.push_str(&urlencoding::encode(user));
            uri.push(':');
            uri.push_str(&urlencoding::encode(pass));
            uri.push('@');
        }

        uri.push_str(&self.host);
        if let Some(port) = self.port {
            uri.push_str(&format!(":{}", port));
        }
        if let Some(vhost) = self.vhost.as_deref().filter(|v| !v.is_empty()) {
            uri.push('/');
            uri.push_str(&urlencoding::encode(vhost));
        }

        uri
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerConfig {
    pub max_records: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { max_records: DEFAULT_MAX_RECORDS }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: DEFAULT_HTTP_PORT }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwarderConfig {
    pub timeout_seconds: u64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self { timeout_seconds: DEFAULT_FORWARD_TIMEOUT_SECS }
    }
}

/// ESB connector settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EsbConfig {
    #[serde(default, alias = "accessTokenUri")]
    pub token_url: Option<String>,
    #[serde(default)]
    pub engine_url: Option<String>,
    #[serde(default)]
    pub push_request_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl EsbConfig {
    /// Engine base URL; falls back to the push request URL without its
    /// trailing `/push-request` segment.
    pub fn resolved_engine_url(&self) -> Option<String> {
        if let Some(engine) = self.engine_url.as_deref().filter(|u| !u.is_empty()) {
            return Some(engine.trim_end_matches('/').to_string());
        }
        self.push_request_url.as_deref().filter(|u| !u.is_empty()).map(|push| {
            push.strip_suffix("/push-request").unwrap_or(push).to_string()
        })
    }

    pub fn is_configured(&self) -> bool {
        self.token_url.is_some()
            && self.client_id.is_some()
            && self.client_secret.is_some()
            && self.resolved_engine_url().is_some()
    }
}

/// Complete mediator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediatorConfig {
    #[serde(default)]
    pub queue_server: QueueServerConfig,
    #[serde(default)]
    pub sub_queues: Vec<SubQueueConfig>,
    #[serde(default)]
    pub pub_queues: Vec<String>,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub forwarder: ForwarderConfig,
    #[serde(default)]
    pub esb: EsbConfig,
    /// Reload the file and re-register consumers on this interval
    #[serde(default)]
    pub resync_interval_seconds: Option<u64>,
}

impl MediatorConfig {
    /// Load from a file, choosing the parser by extension (`.json` or TOML)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };

        info!(
            path = %path.display(),
            sub_queues = config.sub_queues.len(),
            pub_queues = config.pub_queues.len(),
            "Loaded mediator configuration"
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load, apply environment overrides and validate
    pub fn load_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a key lookup; non-empty values win over the file
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(host) = get("QM_QUEUE_HOST") {
            self.queue_server.host = host;
        }
        if let Some(port) = get("QM_QUEUE_PORT") {
            match port.parse() {
                Ok(p) => self.queue_server.port = Some(p),
                Err(_) => warn!(value = %port, "Ignoring invalid QM_QUEUE_PORT"),
            }
        }
        if let Some(vhost) = get("QM_QUEUE_VHOST") {
            self.queue_server.vhost = Some(vhost);
        }
        if let Some(user) = get("QM_QUEUE_USERNAME") {
            self.queue_server.username = Some(user);
        }
        if let Some(pass) = get("QM_QUEUE_PASSWORD") {
            self.queue_server.password = Some(pass);
        }
        if let Some(port) = get("QM_HTTP_PORT") {
            match port.parse() {
                Ok(p) => self.http.port = p,
                Err(_) => warn!(value = %port, "Ignoring invalid QM_HTTP_PORT"),
            }
        }
        if let Some(max) = get("QM_TRACKER_MAX_RECORDS") {
            match max.parse() {
                Ok(m) => self.tracker.max_records = m,
                Err(_) => warn!(value = %max, "Ignoring invalid QM_TRACKER_MAX_RECORDS"),
            }
        }
        if let Some(id) = get("ESB_CLIENT_ID") {
            self.esb.client_id = Some(id);
        }
        if let Some(secret) = get("ESB_CLIENT_SECRET") {
            self.esb.client_secret = Some(secret);
        }
        if let Some(url) = get("ESB_TOKEN_URL").or_else(|| get("ACCESS_TOKEN_URL")) {
            self.esb.token_url = Some(url);
        }
        if let Some(url) = get("ESB_PUSH_REQUEST_URL").or_else(|| get("PUSH_REQUEST")) {
            self.esb.push_request_url = Some(url);
        }

        debug!("Applied environment overrides");
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("queueServer.host must not be empty".to_string()));
        }
        if self.tracker.max_records == 0 {
            return Err(ConfigError::Invalid("tracker.maxRecords must be greater than zero".to_string()));
        }
        if let Some(entry) = self.sub_queues.iter().find(|q| q.queue_name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "subQueues entry for {} has an empty queueName",
                entry.channel_url
            )));
        }
        Ok(())
    }

    /// Subscription entries with status RUN, in configuration order
    pub fn running_sub_queues(&self) -> Vec<SubQueueConfig> {
        self.sub_queues.iter().filter(|q| q.is_running()).cloned().collect()
    }

    pub fn find_sub_queue(&self, queue_name: &str) -> Option<&SubQueueConfig> {
        self.sub_queues.iter().find(|q| q.queue_name == queue_name)
    }

    pub fn is_publish_queue(&self, queue_name: &str) -> bool {
        self.pub_queues.iter().any(|q| q == queue_name)
    }
}
