use std::sync::Once;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use tracing::debug;

// Define metric names as constants to avoid typos
pub const BATCHES_TOTAL: &str = "relay_batches_total";
pub const BATCH_EVENTS: &str = "relay_batch_events";
pub const EVENTS_TOTAL: &str = "relay_events_total";
pub const MONITOR_ERRORS_TOTAL: &str = "relay_monitor_errors_total";
pub const PENDING_PUSH_EVENTS: &str = "relay_pending_push_events";
pub const LAST_BLOCK_INDEX: &str = "relay_last_block_index";
pub const CURSOR_WRITES_TOTAL: &str = "relay_cursor_writes_total";

pub const API_REQUESTS_TOTAL: &str = "relay_api_requests_total";
pub const API_REQUEST_DURATION_SECONDS: &str = "relay_api_request_duration_seconds";

pub const NOTIFICATION_DELIVERIES_TOTAL: &str = "relay_notification_deliveries_total";

static METRICS_DESCRIBED: Once = Once::new();

/// Register descriptions for every relay metric with the installed recorder
pub fn describe_metrics() {
    METRICS_DESCRIBED.call_once(|| {
        describe_counter!(BATCHES_TOTAL, "Block batches emitted by a monitor");
        describe_histogram!(BATCH_EVENTS, "Number of events per emitted batch");
        describe_counter!(EVENTS_TOTAL, "Events processed by outcome");
        describe_counter!(
            MONITOR_ERRORS_TOTAL,
            "Recoverable monitor failures by kind"
        );
        describe_gauge!(
            PENDING_PUSH_EVENTS,
            "Webhook events waiting for the next drain"
        );
        describe_gauge!(
            LAST_BLOCK_INDEX,
            "Index of the last block emitted by the pull monitor"
        );
        describe_counter!(CURSOR_WRITES_TOTAL, "Cursor writes by result");
        describe_counter!(API_REQUESTS_TOTAL, "Total API requests");
        describe_histogram!(
            API_REQUEST_DURATION_SECONDS,
            "API request duration in seconds"
        );
        describe_counter!(
            NOTIFICATION_DELIVERIES_TOTAL,
            "Notification deliveries by result"
        );
    });
}

pub fn record_batch(monitor: &'static str, event_count: usize) {
    counter!(BATCHES_TOTAL, "monitor" => monitor).increment(1);
    histogram!(BATCH_EVENTS, "monitor" => monitor).record(event_count as f64);
}

pub fn record_monitor_error(monitor: &'static str, kind: &'static str) {
    counter!(MONITOR_ERRORS_TOTAL, "monitor" => monitor, "kind" => kind).increment(1);
}

pub fn record_exchange_outcome(outcome: &'static str) {
    counter!(EVENTS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_cursor_write(success: bool) {
    let result = if success { "ok" } else { "error" };
    counter!(CURSOR_WRITES_TOTAL, "result" => result).increment(1);
}

pub fn set_pending_push_events(count: usize) {
    gauge!(PENDING_PUSH_EVENTS).set(count as f64);
}

pub fn set_last_block_index(index: u64) {
    gauge!(LAST_BLOCK_INDEX).set(index as f64);
}

pub fn record_notification_delivery(success: bool) {
    let result = if success { "delivered" } else { "failed" };
    counter!(NOTIFICATION_DELIVERIES_TOTAL, "result" => result).increment(1);
}

pub mod api_metrics {
    use super::*;

    /// Record API request metrics
    pub fn record_api_request(method: &str, path: &str, status_code: u16, duration: Duration) {
        let status_class = match status_code {
            200..=299 => "2xx",
            300..=399 => "3xx",
            400..=499 => "4xx",
            500..=599 => "5xx",
            _ => "unknown",
        };

        counter!(
            API_REQUESTS_TOTAL,
            "method" => method.to_string(),
            "endpoint" => path.to_string(),
            "status" => status_class.to_string()
        )
        .increment(1);

        histogram!(
            API_REQUEST_DURATION_SECONDS,
            "method" => method.to_string(),
            "endpoint" => path.to_string()
        )
        .record(duration.as_secs_f64());

        debug!(
            method = %method,
            path = %path,
            status_code = status_code,
            duration_ms = duration.as_millis(),
            "Recorded API request metrics"
        );
    }
}
