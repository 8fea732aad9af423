//! Prometheus metrics for credential routing.
//!
//! Exposes a standard `/metrics` endpoint that Prometheus can scrape.
//! Counters live in the global default registry and are registered lazily,
//! so building several routers in one process (tests) never double-registers.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashSet;
use once_cell::sync::Lazy;
use prometheus::{
    opts, register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

use crate::models::breaker::FailureOutcome;

/// Maximum distinct vendor labels before bucketing to "other".
const MAX_VENDOR_LABELS: usize = 64;

static SEEN_VENDORS: Lazy<DashSet<String>> = Lazy::new(DashSet::new);

/// Label slots handed out so far; never exceeds `MAX_VENDOR_LABELS`.
static VENDOR_SLOTS: AtomicUsize = AtomicUsize::new(0);

static RESOLUTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("token_router_resolutions_total", "Credential resolutions by outcome source"),
        &["vendor", "source"]
    )
    .expect("failed to register token_router_resolutions_total")
});

static FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("token_router_failures_total", "Upstream failures reported against credentials"),
        &["outcome"]
    )
    .expect("failed to register token_router_failures_total")
});

static BREAKER_TRIPS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("token_router_breaker_trips_total", "Shared credentials benched for the day"),
        &["vendor"]
    )
    .expect("failed to register token_router_breaker_trips_total")
});

static BREAKER_HEALS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!("token_router_breaker_heals_total", "Shared credentials returned to the pool"),
        &["vendor"]
    )
    .expect("failed to register token_router_breaker_heals_total")
});

static MAPPINGS_SWEPT_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "token_router_task_mappings_swept_total",
        "Expired task bindings deleted"
    )
    .expect("failed to register token_router_task_mappings_swept_total")
});

/// Where a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Explicit,
    Owned,
    Shared,
    None,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Explicit => "explicit",
            ResolutionSource::Owned => "owned",
            ResolutionSource::Shared => "shared",
            ResolutionSource::None => "none",
        }
    }
}

/// Cardinality guard: unknown vendors beyond the cap share one label.
fn vendor_label(vendor: &str) -> String {
    if SEEN_VENDORS.contains(vendor) {
        return vendor.to_string();
    }
    let reserved = VENDOR_SLOTS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
        (n < MAX_VENDOR_LABELS).then_some(n + 1)
    });
    if reserved.is_err() {
        return "other".to_string();
    }
    if !SEEN_VENDORS.insert(vendor.to_string()) {
        // another caller registered the same vendor first
        VENDOR_SLOTS.fetch_sub(1, Ordering::SeqCst);
    }
    vendor.to_string()
}

pub fn record_resolution(vendor: &str, source: ResolutionSource) {
    let vendor = vendor_label(vendor);
    RESOLUTIONS_TOTAL
        .with_label_values(&[vendor.as_str(), source.as_str()])
        .inc();
}

pub fn record_failure(outcome: &FailureOutcome) {
    let label = match outcome {
        FailureOutcome::Ignored => "ignored",
        FailureOutcome::Counted { .. } => "counted",
        FailureOutcome::Tripped { .. } => "tripped",
        FailureOutcome::Unrecorded => "unrecorded",
    };
    FAILURES_TOTAL.with_label_values(&[label]).inc();
}

pub fn record_trip(vendor: &str) {
    let vendor = vendor_label(vendor);
    BREAKER_TRIPS_TOTAL.with_label_values(&[vendor.as_str()]).inc();
}

pub fn record_heal(vendor: &str) {
    let vendor = vendor_label(vendor);
    BREAKER_HEALS_TOTAL.with_label_values(&[vendor.as_str()]).inc();
}

pub fn record_swept(rows: u64) {
    MAPPINGS_SWEPT_TOTAL.inc_by(rows);
}

/// Encode all registered metrics as Prometheus text format.
/// Called by the `/metrics` HTTP handler.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap_or_default();
    String::from_utf8(buffer).unwrap_or_default()
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_recorded_counters() {
        record_resolution("sora", ResolutionSource::Shared);
        record_failure(&FailureOutcome::Counted { count: 1 });
        let output = encode_metrics();
        assert!(output.contains("token_router_resolutions_total"));
        assert!(output.contains("token_router_failures_total"));
    }

    #[test]
    fn test_vendor_labels_are_capped_under_concurrency() {
        let handles: Vec<_> = (0..8)
            .map(|t| {
                std::thread::spawn(move || {
                    for i in 0..50 {
                        vendor_label(&format!("vendor-{}-{}", t, i));
                        vendor_label("shared-vendor");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(SEEN_VENDORS.len() <= MAX_VENDOR_LABELS);
        assert_eq!(VENDOR_SLOTS.load(Ordering::SeqCst), SEEN_VENDORS.len());
        assert_eq!(vendor_label("never-seen-before"), "other");
    }

    #[test]
    fn test_source_labels() {
        assert_eq!(ResolutionSource::Owned.as_str(), "owned");
        assert_eq!(ResolutionSource::None.as_str(), "none");
    }
}
