//! Metrics instrumentation for the client.
//!
//! Uses the `metrics` facade; nothing is recorded unless the application
//! installs a recorder (for example a Prometheus exporter).

use metrics::counter;

/// Metric names.
pub mod names {
    pub const FRAMES_TOTAL: &str = "ortc_frames_total";
    pub const MESSAGES_DELIVERED_TOTAL: &str = "ortc_messages_delivered_total";
    pub const EXCEPTIONS_TOTAL: &str = "ortc_exceptions_total";
    pub const HEARTBEAT_FAILURES_TOTAL: &str = "ortc_heartbeat_failures_total";
    pub const RECONNECT_ATTEMPTS_TOTAL: &str = "ortc_reconnect_attempts_total";
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of frames by direction");
    metrics::describe_counter!(
        names::MESSAGES_DELIVERED_TOTAL,
        "Total number of complete messages delivered to handlers"
    );
    metrics::describe_counter!(names::EXCEPTIONS_TOTAL, "Total number of reported exceptions");
    metrics::describe_counter!(
        names::HEARTBEAT_FAILURES_TOTAL,
        "Total number of connections declared dead by the heartbeat monitor"
    );
    metrics::describe_counter!(
        names::RECONNECT_ATTEMPTS_TOTAL,
        "Total number of connect attempts made by the reconnection loop"
    );
}

/// Record a frame.
pub fn record_frame(direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
}

/// Record a delivered message.
pub fn record_delivery() {
    counter!(names::MESSAGES_DELIVERED_TOTAL).increment(1);
}

/// Record an exception.
pub fn record_exception(kind: &'static str) {
    counter!(names::EXCEPTIONS_TOTAL, "kind" => kind).increment(1);
}

/// Record a heartbeat failure.
pub fn record_heartbeat_failure() {
    counter!(names::HEARTBEAT_FAILURES_TOTAL).increment(1);
}

/// Record a reconnect attempt.
pub fn record_reconnect_attempt() {
    counter!(names::RECONNECT_ATTEMPTS_TOTAL).increment(1);
}
