use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request Tracking Types
// ============================================================================

/// Lifecycle status of a relayed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    /// Published, or picked up by a consumer and about to be forwarded
    Queued,
    /// Downstream call completed (any HTTP status)
    Forwarded,
    /// Downstream call failed at the transport level
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Queued => "QUEUED",
            RequestStatus::Forwarded => "FORWARDED",
            RequestStatus::Failed => "FAILED",
        }
    }
}

/// Normalized error attached to failed requests and dead-letter envelopes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Transport error code, e.g. ECONNREFUSED, ETIMEDOUT
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Upstream HTTP status, when the failure carried one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorInfo {
    pub fn new(code: Option<String>, message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            status,
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Some(code.into()), message, None)
    }
}

/// Per-request lifecycle entry exposed for status polling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub request_id: String,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

// ============================================================================
// Dead-Letter Types
// ============================================================================

/// Suffix appended to a source queue to name its dead-letter companion
pub const FAILED_QUEUE_SUFFIX: &str = "_FAILED";

/// Dead-letter queue name for a source queue
pub fn failed_queue_name(source_queue: &str) -> String {
    format!("{}{}", source_queue, FAILED_QUEUE_SUFFIX)
}

/// Envelope published to `<queue>_FAILED` when forwarding fails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEnvelope {
    pub source_queue: String,
    pub failed_at: DateTime<Utc>,
    pub target_url: String,
    pub error: ErrorInfo,
    pub payload: serde_json::Value,
}

impl FailureEnvelope {
    pub fn new(source_queue: &str, target_url: &str, error: ErrorInfo, payload: serde_json::Value) -> Self {
        Self {
            source_queue: source_queue.to_string(),
            failed_at: Utc::now(),
            target_url: target_url.to_string(),
            error,
            payload,
        }
    }
}

// ============================================================================
// Consumer Binding Types
// ============================================================================

/// A live consumer bound to one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerBinding {
    pub queue_name: String,
    pub consumer_tag: String,
    pub method: String,
    pub target_url: String,
}

impl ConsumerBinding {
    /// True when the binding already forwards with this method and url
    pub fn targets(&self, method: &str, url: &str) -> bool {
        self.method == method && self.target_url == url
    }
}

/// Status value marking a subscription queue as active
pub const QUEUE_STATUS_RUN: &str = "RUN";

/// Subscription queue entry from the mediator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQueueConfig {
    pub queue_name: String,
    #[serde(default = "default_http_method")]
    pub channel_http_method: String,
    pub channel_url: String,
    #[serde(default)]
    pub queue_status: String,
}

impl SubQueueConfig {
    pub fn is_running(&self) -> bool {
        self.queue_status == QUEUE_STATUS_RUN
    }
}

fn default_http_method() -> String {
    "POST".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_queue_name() {
        assert_eq!(failed_queue_name("Q"), "Q_FAILED");
        assert_eq!(failed_queue_name("PLANREP_TO_MUSE"), "PLANREP_TO_MUSE_FAILED");
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let now = Utc::now();
        let record = RequestRecord {
            request_id: "R1".to_string(),
            status: RequestStatus::Failed,
            queue_name: Some("Q".to_string()),
            target_url: Some("http://down/bad".to_string()),
            method: None,
            created_at: now,
            updated_at: now,
            error: Some(ErrorInfo::with_code("ECONNREFUSED", "connection refused")),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["requestId"], "R1");
        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["targetUrl"], "http://down/bad");
        assert_eq!(json["error"]["code"], "ECONNREFUSED");
        assert!(json.get("method").is_none());
    }

    #[test]
    fn test_sub_queue_defaults() {
        let entry: SubQueueConfig = serde_json::from_value(serde_json::json!({
            "queueName": "Q",
            "channelUrl": "http://down/ok",
            "queueStatus": "RUN"
        }))
        .unwrap();

        assert_eq!(entry.channel_http_method, "POST");
        assert!(entry.is_running());

        let stopped = SubQueueConfig { queue_status: "STOP".to_string(), ..entry };
        assert!(!stopped.is_running());
    }

    #[test]
    fn test_binding_targets() {
        let binding = ConsumerBinding {
            queue_name: "Q".to_string(),
            consumer_tag: "tag-1".to_string(),
            method: "POST".to_string(),
            target_url: "http://down/ok".to_string(),
        };
        assert!(binding.targets("POST", "http://down/ok"));
        assert!(!binding.targets("POST", "http://down/other"));
        assert!(!binding.targets("PUT", "http://down/ok"));
    }
}
