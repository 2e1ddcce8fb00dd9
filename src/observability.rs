//! Metrics collection using metrics-rs.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `framelink_messages_arrived` | Counter | Messages enqueued per named queue |
//! | `framelink_messages_dropped` | Counter | Messages evicted by the drop-oldest policy |
//! | `framelink_events_evicted` | Counter | Event-queue entries evicted on overflow |
//! | `framelink_recorded_bytes` | Counter | Serialized bytes appended by record threads |
//!
//! Metrics are recorded unconditionally; attach an exporter (prometheus,
//! statsd, ...) to collect them.

use metrics::Unit;
use std::sync::atomic::{AtomicBool, Ordering};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

pub(crate) const MESSAGES_ARRIVED: &str = "framelink_messages_arrived";
pub(crate) const MESSAGES_DROPPED: &str = "framelink_messages_dropped";
pub(crate) const EVENTS_EVICTED: &str = "framelink_events_evicted";
pub(crate) const RECORDED_BYTES: &str = "framelink_recorded_bytes";

/// Initialize metric descriptions.
///
/// Call once at application startup. Safe to call multiple times
/// (subsequent calls are no-ops).
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        MESSAGES_ARRIVED,
        Unit::Count,
        "Messages enqueued per named queue"
    );
    metrics::describe_counter!(
        MESSAGES_DROPPED,
        Unit::Count,
        "Messages evicted by the drop-oldest policy"
    );
    metrics::describe_counter!(
        EVENTS_EVICTED,
        Unit::Count,
        "Event-queue entries evicted on overflow"
    );
    metrics::describe_counter!(
        RECORDED_BYTES,
        Unit::Bytes,
        "Serialized bytes appended by record threads"
    );
}
