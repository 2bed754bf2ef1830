//! RequestTracker - bounded in-memory request lifecycle records
//!
//! Transitions are last-write-wins: any mark may follow any other, including
//! re-marking a terminal record. `created_at` is kept from the first write of
//! an id and `updated_at` is refreshed on every write.
//!
//! Capacity is enforced after every mutation by evicting the oldest-inserted
//! ids. Updating an existing id does not move it in the eviction order.

use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::Mutex;
use qm_common::{ErrorInfo, RequestRecord, RequestStatus};
use tracing::debug;

pub const DEFAULT_MAX_RECORDS: usize = 5000;

/// Optional context recorded alongside a transition.
/// Absent fields keep the value already stored for the id.
#[derive(Debug, Clone, Default)]
pub struct RequestDetails {
    pub queue_name: Option<String>,
    pub target_url: Option<String>,
    pub method: Option<String>,
}

impl RequestDetails {
    pub fn new(queue_name: Option<&str>, target_url: Option<&str>, method: Option<&str>) -> Self {
        Self {
            queue_name: queue_name.map(str::to_string),
            target_url: target_url.map(str::to_string),
            method: method.map(str::to_string),
        }
    }

    pub fn target(target_url: &str, method: &str) -> Self {
        Self::new(None, Some(target_url), Some(method))
    }
}

pub struct RequestTracker {
    /// Insertion-ordered; index 0 is the next eviction candidate
    records: Mutex<IndexMap<String, RequestRecord>>,
    max_records: usize,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORDS)
    }
}

impl RequestTracker {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Mutex::new(IndexMap::new()),
            max_records: max_records.max(1),
        }
    }

    pub fn mark_queued(&self, request_id: &str, details: RequestDetails) {
        self.write(request_id, RequestStatus::Queued, details, None);
    }

    pub fn mark_forwarded(&self, request_id: &str, details: RequestDetails) {
        self.write(request_id, RequestStatus::Forwarded, details, None);
    }

    pub fn mark_failed(&self, request_id: &str, error: ErrorInfo, details: RequestDetails) {
        self.write(request_id, RequestStatus::Failed, details, Some(error));
    }

    pub fn get(&self, request_id: &str) -> Option<RequestRecord> {
        self.records.lock().get(request_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    fn write(
        &self,
        request_id: &str,
        status: RequestStatus,
        details: RequestDetails,
        error: Option<ErrorInfo>,
    ) {
        let now = Utc::now();
        let mut records = self.records.lock();

        let record = match records.get(request_id) {
            Some(existing) => RequestRecord {
                request_id: request_id.to_string(),
                status,
                queue_name: details.queue_name.or_else(|| existing.queue_name.clone()),
                target_url: details.target_url.or_else(|| existing.target_url.clone()),
                method: details.method.or_else(|| existing.method.clone()),
                created_at: existing.created_at,
                updated_at: now,
                error,
            },
            None => RequestRecord {
                request_id: request_id.to_string(),
                status,
                queue_name: details.queue_name,
                target_url: details.target_url,
                method: details.method,
                created_at: now,
                updated_at: now,
                error,
            },
        };

        // insert() on an existing key keeps its position
        records.insert(request_id.to_string(), record);

        if records.len() > self.max_records {
            let overflow = records.len() - self.max_records;
            records.drain(..overflow);
            debug!(evicted = overflow, remaining = records.len(), "Evicted oldest request records");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queued_then_forwarded_keeps_created_at() {
        let tracker = RequestTracker::default();
        tracker.mark_queued("R1", RequestDetails::new(Some("Q"), Some("http://down/ok"), Some("POST")));
        let queued = tracker.get("R1").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        tracker.mark_forwarded("R1", RequestDetails::default());
        let forwarded = tracker.get("R1").unwrap();

        assert_eq!(forwarded.status, RequestStatus::Forwarded);
        assert_eq!(forwarded.created_at, queued.created_at);
        assert!(forwarded.updated_at > queued.updated_at);
        assert_eq!(forwarded.queue_name.as_deref(), Some("Q"));
        assert_eq!(forwarded.target_url.as_deref(), Some("http://down/ok"));
        assert_eq!(forwarded.method.as_deref(), Some("POST"));
    }

    #[test]
    fn test_last_write_wins_including_terminal() {
        let tracker = RequestTracker::default();
        tracker.mark_failed("R1", ErrorInfo::with_code("ECONNREFUSED", "refused"), RequestDetails::default());
        assert_eq!(tracker.get("R1").unwrap().status, RequestStatus::Failed);

        tracker.mark_forwarded("R1", RequestDetails::target("http://down/ok", "POST"));
        let record = tracker.get("R1").unwrap();
        assert_eq!(record.status, RequestStatus::Forwarded);
        assert!(record.error.is_none());

        tracker.mark_queued("R1", RequestDetails::default());
        assert_eq!(tracker.get("R1").unwrap().status, RequestStatus::Queued);
    }

    #[test]
    fn test_failed_records_error() {
        let tracker = RequestTracker::default();
        let error = ErrorInfo::new(Some("ETIMEDOUT".to_string()), "timeout", None);
        tracker.mark_failed("R1", error.clone(), RequestDetails::target("http://down/slow", "POST"));

        let record = tracker.get("R1").unwrap();
        assert_eq!(record.error, Some(error));
        assert_eq!(record.target_url.as_deref(), Some("http://down/slow"));
    }

    #[test]
    fn test_never_exceeds_cap() {
        let tracker = RequestTracker::new(3);
        for i in 0..10 {
            tracker.mark_queued(&format!("R{}", i), RequestDetails::default());
            assert!(tracker.len() <= 3);
        }

        assert_eq!(tracker.len(), 3);
        assert!(tracker.get("R6").is_none());
        assert!(tracker.get("R7").is_some());
        assert!(tracker.get("R9").is_some());
    }

    #[test]
    fn test_update_does_not_refresh_eviction_order() {
        let tracker = RequestTracker::new(2);
        tracker.mark_queued("A", RequestDetails::default());
        tracker.mark_queued("B", RequestDetails::default());

        // A is updated but remains the oldest insertion
        tracker.mark_forwarded("A", RequestDetails::default());
        tracker.mark_queued("C", RequestDetails::default());

        assert!(tracker.get("A").is_none());
        assert!(tracker.get("B").is_some());
        assert!(tracker.get("C").is_some());
    }

    #[test]
    fn test_get_unknown_is_none() {
        let tracker = RequestTracker::default();
        assert!(tracker.get("never-seen").is_none());
        assert!(tracker.is_empty());
    }
}
