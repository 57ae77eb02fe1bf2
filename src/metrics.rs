//! Process-wide metrics, recorded the way the teacher's handlers call
//! `metrics::record_request`/`record_duration` around each request: thin
//! free functions wrapping the `metrics` crate's macros, with a Prometheus
//! exporter installed once at startup.
//!
//! Covers the counters spec.md's ambient stack implies but doesn't itself
//! name: segments fetched/decrypted per track, manifest-refresh latency
//! (feeding the orchestrator's EWMA), rolling-window evictions, and
//! saver-cycle duration.

use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::warn;

/// Install the Prometheus recorder and start its HTTP exporter. Call once
/// from `main`; a second call is a no-op save for the warning, matching the
/// "process-wide state, no dynamic mutation after startup" discipline
/// spec.md's DESIGN NOTES ask of global singletons.
pub fn install(listen_addr: std::net::SocketAddr) {
    if let Err(e) = PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        .install()
    {
        warn!("failed to install prometheus exporter: {e}");
    }
}

/// Record a completed manifest fetch+parse, tagged by track-agnostic
/// outcome (`ok`/`error`) and its duration, the way `record_request` tags
/// an HTTP handler's outcome.
pub fn record_manifest_refresh(outcome: &'static str, started: Instant) {
    metrics::counter!("dashhls_manifest_refresh_total", "outcome" => outcome).increment(1);
    metrics::histogram!("dashhls_manifest_refresh_duration_seconds")
        .record(started.elapsed().as_secs_f64());
}

/// Record one Widevine key fetch.
pub fn record_key_fetch(outcome: &'static str) {
    metrics::counter!("dashhls_key_fetch_total", "outcome" => outcome).increment(1);
}

/// Record one segment having been fetched and decrypted for `track`
/// (`"audio"` or `"video"`).
pub fn record_segment_saved(track: &str) {
    metrics::counter!("dashhls_segments_saved_total", "track" => track.to_string()).increment(1);
}

/// Record one rolling-window eviction for `track`.
pub fn record_eviction(track: &str) {
    metrics::counter!("dashhls_segments_evicted_total", "track" => track.to_string()).increment(1);
}

/// Record one saver cycle's wall-clock duration.
pub fn record_cycle_duration(started: Instant) {
    metrics::histogram!("dashhls_saver_cycle_duration_seconds")
        .record(started.elapsed().as_secs_f64());
}

/// Record a segment-pipeline failure (decrypt, fetch, or merge) for `track`.
pub fn record_segment_error(track: &str) {
    metrics::counter!("dashhls_segment_errors_total", "track" => track.to_string()).increment(1);
}
