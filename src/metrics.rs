// Prometheus metrics definitions for the Zero Sanity backend.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Counters ─────────────────────────────────────────────────────

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("zerosanity_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    /// Successful pull record submissions.
    pub static ref PULL_SUBMISSIONS_TOTAL: IntCounter = IntCounter::new(
        "zerosanity_pull_submissions_total",
        "Pull record submissions saved",
    )
    .unwrap();

    /// Individual pulls received in submissions, by rarity.
    pub static ref PULLS_RECORDED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("zerosanity_pulls_recorded_total", "Pulls received in submissions"),
        &["rarity"],
    )
    .unwrap();

    /// Aggregate cache lookups, by cache and outcome (hit/miss).
    pub static ref CACHE_LOOKUPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("zerosanity_cache_lookups_total", "Aggregate cache lookups"),
        &["cache", "outcome"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "zerosanity_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["endpoint"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(PULL_SUBMISSIONS_TOTAL.clone()),
        Box::new(PULLS_RECORDED_TOTAL.clone()),
        Box::new(CACHE_LOOKUPS_TOTAL.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            tracing::warn!("Failed to register metric: {e}");
        }
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record the rarity mix of a submission.
pub fn record_pulls(six: i64, five: i64, four: i64, three: i64) {
    for (label, count) in [("6", six), ("5", five), ("4", four), ("3", three)] {
        PULLS_RECORDED_TOTAL
            .with_label_values(&[label])
            .inc_by(count.max(0) as u64);
    }
}

/// Fixed routes served by the API, used as-is for metric labels.
const STATIC_ROUTES: &[&str] = &[
    "/health",
    "/metrics",
    "/llms.txt",
    "/api/auth/register",
    "/api/auth/login",
    "/api/auth/me",
    "/api/headhunt/pulls",
    "/api/headhunt/stats",
    "/api/headhunt/leaderboard",
    "/api/headhunt/history",
    "/api/api-keys",
];

/// Map a request path to its route template. Paths that match no route share
/// the `other` label so unknown URLs cannot create new series.
pub fn normalize_path(path: &str) -> &'static str {
    if let Some(route) = STATIC_ROUTES.iter().find(|r| **r == path) {
        return *route;
    }
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match segments.as_slice() {
        ["api", "operators", name, "stats"] if !name.is_empty() => "/api/operators/:name/stats",
        ["api", "api-keys", id] if id.parse::<i64>().is_ok() => "/api/api-keys/:id",
        _ => "other",
    }
}
