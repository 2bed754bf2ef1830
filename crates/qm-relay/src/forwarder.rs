//! MessageForwarder - outbound delivery of consumed messages
//!
//! Targets are either `govesb:{serviceCode}` (delegated to the `EsbClient`)
//! or a literal HTTP(S) URL. Any HTTP status counts as a completed response;
//! only transport errors (DNS, timeout, refused connection, broken body) are
//! failures. Failures mark the tracker FAILED and are dead-lettered exactly
//! once. `forward` never returns an error so the consumer loop keeps running.

use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use qm_common::ErrorInfo;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::esb::EsbClient;
use crate::failure::FailureRouter;
use crate::metrics;
use crate::tracker::{RequestDetails, RequestTracker};
use crate::{RelayError, Result};

pub const ESB_SCHEME: &str = "govesb:";
pub const SERVICE_CODE_HEADER: &str = "service-code";
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(300);

/// URL fragments mapped to the informational service-code header.
/// When several fragments match, the later entry wins.
const SERVICE_CODES: &[(&str, &str)] = &[
    ("ffars-muse", "SRVC019"),
    ("planrep-to-muse-data", "SRVC0048"),
    ("planrep-to-npmis-objective", "SRVC0050"),
    ("planrep-to-npmis-budget", "SRVC0051"),
    ("planrep-to-npmis-response", "SRVC0049"),
    ("planrep-to-muse-budget-cancellation", "SRVC0048"),
];

pub fn service_code_for(url: &str) -> &'static str {
    SERVICE_CODES
        .iter()
        .rev()
        .find(|(fragment, _)| url.contains(fragment))
        .map(|(_, code)| *code)
        .unwrap_or("")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardTarget {
    Esb { service_code: String },
    Http { url: String },
}

impl ForwardTarget {
    pub fn parse(url: &str) -> Self {
        match url.strip_prefix(ESB_SCHEME) {
            Some(code) => ForwardTarget::Esb { service_code: code.trim().to_string() },
            None => ForwardTarget::Http { url: url.to_string() },
        }
    }
}

/// One forward attempt for a consumed message
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub source_queue: String,
    pub method: String,
    pub url: String,
    pub payload: Value,
    pub request_id: Option<String>,
}

/// Keep-alive client with gzip/deflate decompression and no body size cap
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .map_err(|e| RelayError::HttpClient(e.to_string()))
}

pub struct MessageForwarder {
    client: reqwest::Client,
    tracker: Arc<RequestTracker>,
    failures: Arc<FailureRouter>,
    esb: Arc<dyn EsbClient>,
}

impl MessageForwarder {
    pub fn new(
        tracker: Arc<RequestTracker>,
        failures: Arc<FailureRouter>,
        esb: Arc<dyn EsbClient>,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            tracker,
            failures,
            esb,
        })
    }

    /// Deliver the payload. Returns the downstream response body, or `None`
    /// when the attempt failed and was dead-lettered.
    pub async fn forward(&self, request: &ForwardRequest) -> Option<Value> {
        info!(queue = %request.source_queue, url = %request.url, "Sending request");

        let outcome = match ForwardTarget::parse(&request.url) {
            ForwardTarget::Esb { service_code } => self
                .esb
                .send(&service_code, &request.payload)
                .await
                .map_err(ErrorInfo::from),
            ForwardTarget::Http { url } => self.send_http(&url, request).await,
        };

        match outcome {
            Ok(body) => {
                if let Some(id) = &request.request_id {
                    self.tracker
                        .mark_forwarded(id, RequestDetails::target(&request.url, &request.method));
                }
                metrics::record_forwarded(&request.source_queue);
                info!(queue = %request.source_queue, url = %request.url, request_id = ?request.request_id, "Response received");
                Some(body)
            }
            Err(err) => {
                error!(
                    queue = %request.source_queue,
                    url = %request.url,
                    request_id = ?request.request_id,
                    code = ?err.code,
                    error = ?err.message,
                    "Forwarding error"
                );
                if let Some(id) = &request.request_id {
                    self.tracker.mark_failed(
                        id,
                        err.clone(),
                        RequestDetails::target(&request.url, &request.method),
                    );
                }
                metrics::record_failed(&request.source_queue);
                self.failures
                    .route_failure(&request.source_queue, &request.payload, &request.url, &err)
                    .await;
                None
            }
        }
    }

    async fn send_http(&self, url: &str, request: &ForwardRequest) -> std::result::Result<Value, ErrorInfo> {
        let method = http_method(&request.method).unwrap_or_else(|| {
            warn!(method = %request.method, "Unknown HTTP method, using POST");
            Method::POST
        });

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(SERVICE_CODE_HEADER, HeaderValue::from_static(service_code_for(url)));

        let mut builder = self.client.request(method.clone(), url).headers(headers);
        if method != Method::GET && method != Method::HEAD {
            // Text payloads go out verbatim, not as a quoted JSON string
            builder = match &request.payload {
                Value::String(text) => builder.body(text.clone()),
                payload => builder.json(payload),
            };
        }

        let response = builder.send().await.map_err(|e| normalize_transport_error(&e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| normalize_transport_error(&e))?;

        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "Downstream answered with non-success status");
        }

        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

/// Standard request methods accepted for subscription targets
pub fn http_method(name: &str) -> Option<Method> {
    match name.trim().to_ascii_uppercase().as_str() {
        "GET" => Some(Method::GET),
        "POST" => Some(Method::POST),
        "PUT" => Some(Method::PUT),
        "PATCH" => Some(Method::PATCH),
        "DELETE" => Some(Method::DELETE),
        "HEAD" => Some(Method::HEAD),
        "OPTIONS" => Some(Method::OPTIONS),
        _ => None,
    }
}

/// Map a transport error to `{code, message, status}` with socket-style codes
pub fn normalize_transport_error(e: &reqwest::Error) -> ErrorInfo {
    let message = error_chain_message(e);
    let code = transport_error_code(e, &message);
    ErrorInfo::new(code.map(str::to_string), message, e.status().map(|s| s.as_u16()))
}

fn error_chain_message(e: &reqwest::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

fn io_error_kind(e: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source: Option<&(dyn StdError + 'static)> = e.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = cause.source();
    }
    None
}

fn transport_error_code(e: &reqwest::Error, message: &str) -> Option<&'static str> {
    if e.is_timeout() {
        return Some("ETIMEDOUT");
    }

    match io_error_kind(e) {
        Some(io::ErrorKind::ConnectionRefused) => return Some("ECONNREFUSED"),
        Some(io::ErrorKind::ConnectionReset) => return Some("ECONNRESET"),
        Some(io::ErrorKind::ConnectionAborted) => return Some("ECONNABORTED"),
        Some(io::ErrorKind::TimedOut) => return Some("ETIMEDOUT"),
        _ => {}
    }

    let lower = message.to_lowercase();
    if lower.contains("dns error") || lower.contains("failed to lookup address") {
        Some("ENOTFOUND")
    } else if lower.contains("connection refused") {
        Some("ECONNREFUSED")
    } else if lower.contains("connection reset") {
        Some("ECONNRESET")
    } else if e.is_connect() {
        Some("ERR_NETWORK")
    } else if e.is_body() || e.is_decode() {
        Some("ERR_BAD_RESPONSE")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_targets() {
        assert_eq!(
            ForwardTarget::parse("govesb: SRVC0048 "),
            ForwardTarget::Esb { service_code: "SRVC0048".to_string() }
        );
        assert_eq!(
            ForwardTarget::parse("http://down/ok"),
            ForwardTarget::Http { url: "http://down/ok".to_string() }
        );
    }

    #[test]
    fn test_service_code_table() {
        assert_eq!(service_code_for("http://x/api/ffars-muse/push"), "SRVC019");
        assert_eq!(service_code_for("http://x/planrep-to-npmis-budget"), "SRVC0051");
        assert_eq!(service_code_for("http://x/planrep-to-muse-budget-cancellation"), "SRVC0048");
        assert_eq!(service_code_for("http://x/other"), "");
    }

    #[test]
    fn test_http_method_accepts_standard_methods_only() {
        assert_eq!(http_method(" put "), Some(Method::PUT));
        assert_eq!(http_method("delete"), Some(Method::DELETE));
        assert_eq!(http_method("FOO"), None);
        assert_eq!(http_method(""), None);
    }

    #[tokio::test]
    async fn test_refused_connection_normalizes_to_econnrefused() {
        let client = build_http_client(Duration::from_secs(5)).unwrap();
        let err = client.post("http://127.0.0.1:1/").send().await.unwrap_err();

        let info = normalize_transport_error(&err);
        assert_eq!(info.code.as_deref(), Some("ECONNREFUSED"));
        assert!(info.message.is_some());
        assert_eq!(info.status, None);
    }
}
