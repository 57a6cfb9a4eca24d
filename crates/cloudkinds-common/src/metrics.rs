//! Metrics registry for CloudKinds observability
//!
//! Instruments are registered on the global OpenTelemetry meter. They record
//! nothing until the binary installs a meter provider.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for CloudKinds metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("cloudkinds"));

/// Counter of reconciliations by terminal state
///
/// Labels:
/// - `kind`: resource kind name
/// - `state`: provider_missing, provider_ambiguous, clean, fetch_failed,
///   delivered, provider_rejected, transport_failure
pub static RECONCILE_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("cloudkinds_reconcile_total")
        .with_description("Total number of reconciliations by terminal state")
        .with_unit("{reconciliations}")
        .build()
});

/// Histogram of reconciliation duration
///
/// Labels:
/// - `kind`: resource kind name
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("cloudkinds_reconcile_duration_seconds")
        .with_description("Duration of reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of webhook requests by response status
///
/// Labels:
/// - `status`: HTTP status code, or `error` when no response was received
pub static WEBHOOK_REQUESTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("cloudkinds_webhook_requests_total")
        .with_description("Total number of provider webhook requests")
        .with_unit("{requests}")
        .build()
});

/// Record one finished reconciliation
pub fn record_reconcile(kind: &str, state: &'static str, seconds: f64) {
    RECONCILE_TOTAL.add(
        1,
        &[
            KeyValue::new("kind", kind.to_string()),
            KeyValue::new("state", state),
        ],
    );
    RECONCILE_DURATION.record(seconds, &[KeyValue::new("kind", kind.to_string())]);
}

/// Record one webhook request; `None` means the request never got a response
pub fn record_webhook(status: Option<u16>) {
    let status = match status {
        Some(code) => code.to_string(),
        None => "error".to_string(),
    };
    WEBHOOK_REQUESTS.add(1, &[KeyValue::new("status", status)]);
}
