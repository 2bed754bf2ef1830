//! Relay counters, labelled by source queue

pub const MESSAGES_CONSUMED: &str = "qm_messages_consumed_total";
pub const MESSAGES_FORWARDED: &str = "qm_messages_forwarded_total";
pub const MESSAGES_FAILED: &str = "qm_messages_failed_total";
pub const DEAD_LETTER_PUBLISHED: &str = "qm_dead_letter_published_total";
pub const DEAD_LETTER_FAILED: &str = "qm_dead_letter_failed_total";

pub(crate) fn record_consumed(queue: &str) {
    ::metrics::counter!(MESSAGES_CONSUMED, "queue" => queue.to_string()).increment(1);
}

pub(crate) fn record_forwarded(queue: &str) {
    ::metrics::counter!(MESSAGES_FORWARDED, "queue" => queue.to_string()).increment(1);
}

pub(crate) fn record_failed(queue: &str) {
    ::metrics::counter!(MESSAGES_FAILED, "queue" => queue.to_string()).increment(1);
}

pub(crate) fn record_dead_letter(queue: &str, published: bool) {
    let name = if published { DEAD_LETTER_PUBLISHED } else { DEAD_LETTER_FAILED };
    ::metrics::counter!(name, "queue" => queue.to_string()).increment(1);
}
