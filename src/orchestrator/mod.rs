//! The DASH orchestrator (spec.md §4.10): owns the manifest lifecycle —
//! resolving the manifest URL via the operator's API, fetching and parsing
//! the MPD, scheduling refreshes, and handing the resulting [`Presentation`]
//! to the segment saver.
//!
//! State machine: `Idle -> Starting -> Live -> Refreshing -> Live (loop) ->
//! Stopping -> Stopped`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::ServiceConfig;
use crate::error::{Code, EngineError, Result};
use crate::mpd::{parse_mpd, StreamMap};
use crate::model::stream::Presentation;

/// Floor for the refresh timer, regardless of `@minimumUpdatePeriod` or the
/// EWMA estimate (spec.md §4.10).
pub const MIN_UPDATE_PERIOD: Duration = Duration::from_secs(3);

/// Number of samples the refresh-duration EWMA's half-life is defined over.
const EWMA_HALF_LIFE_SAMPLES: f64 = 5.0;

/// Cooperative cancellation signal: `true` once the holder should stop at
/// its next suspension point. Plain `tokio::sync::watch` rather than a
/// dedicated cancellation crate, matching the rest of the stack's
/// "reach for tokio primitives first" discipline.
pub type AbortSignal = watch::Receiver<bool>;

/// Anything that runs as a cooperatively-cancellable background operation
/// (spec.md §5 `abortable_operation`): the orchestrator's refresh loop and
/// the saver's per-cycle pipeline both implement this.
#[async_trait]
pub trait AbortableOperation {
    async fn run(&mut self, abort: AbortSignal) -> Result<()>;
}

/// Exponential moving average of refresh durations, half-life
/// `EWMA_HALF_LIFE_SAMPLES` samples, the way the teacher's bandwidth
/// estimator smooths noisy per-request timings.
#[derive(Debug, Clone, Copy)]
struct Ewma {
    alpha: f64,
    estimate: Option<Duration>,
}

impl Ewma {
    fn with_half_life(samples: f64) -> Self {
        Self {
            alpha: 1.0 - 0.5f64.powf(1.0 / samples),
            estimate: None,
        }
    }

    fn record(&mut self, sample: Duration) {
        self.estimate = Some(match self.estimate {
            None => sample,
            Some(prev) => {
                let prev_s = prev.as_secs_f64();
                let sample_s = sample.as_secs_f64();
                Duration::from_secs_f64(self.alpha * sample_s + (1.0 - self.alpha) * prev_s)
            }
        });
    }

    fn estimate(&self) -> Duration {
        self.estimate.unwrap_or(MIN_UPDATE_PERIOD)
    }
}

/// Manifest-URL API response (spec.md §6): `{"data": "<MPD URL>", "expiry":
/// <unix seconds>}`.
#[derive(Debug, Clone, Deserialize)]
struct ManifestUrlResponse {
    data: String,
    expiry: i64,
}

/// Decryption-key API response (spec.md §6): `{"status": bool, "keys":
/// {"<hex keyId>": "<hex key>"}}`.
#[derive(Debug, Clone, Deserialize)]
struct KeyApiResponse {
    status: bool,
    #[serde(default)]
    keys: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Starting,
    Live,
    Refreshing,
    Stopping,
    Stopped,
}

/// Owns the manifest lifecycle for one ingest. Not `Clone`: the stream map
/// and EWMA are single-writer state per spec.md §5.
pub struct DashOrchestrator {
    client: Client,
    config: ServiceConfig,
    state: State,
    manifest_uri: Option<String>,
    expire_time: Option<i64>,
    stream_map: StreamMap,
    presentation: Option<Presentation>,
    ewma: Ewma,
    manifest_expired: bool,
}

impl DashOrchestrator {
    pub fn new(client: Client, config: ServiceConfig) -> Self {
        Self {
            client,
            config,
            state: State::Idle,
            manifest_uri: None,
            expire_time: None,
            stream_map: StreamMap::new(),
            presentation: None,
            ewma: Ewma::with_half_life(EWMA_HALF_LIFE_SAMPLES),
            manifest_expired: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn presentation(&self) -> Option<&Presentation> {
        self.presentation.as_ref()
    }

    pub fn manifest_expired(&self) -> bool {
        self.manifest_expired
    }

    pub fn clear_manifest_expired(&mut self) {
        self.manifest_expired = false;
    }

    /// Resolve the manifest URL via the operator's API and perform the
    /// first fetch+parse. Transitions `Idle -> Starting -> Live`.
    pub async fn start(&mut self) -> Result<()> {
        self.state = State::Starting;
        info!("orchestrator starting, service={}, id={}", self.config.service, self.config.id);

        self.resolve_manifest_url().await?;
        self.request_manifest().await?;
        self.manifest_expired = true;
        self.state = State::Live;
        info!("orchestrator live, manifest_uri={:?}", self.manifest_uri);
        Ok(())
    }

    /// Call the manifest-URL API and record the resolved URL and expiry.
    async fn resolve_manifest_url(&mut self) -> Result<()> {
        let url = self.config.manifest_api_url();
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(EngineError::OriginFetch)?;
        let body: ManifestUrlResponse = response.json().await.map_err(EngineError::OriginFetch)?;
        debug!("manifest-url API resolved {} (expiry {})", body.data, body.expiry);
        self.manifest_uri = Some(body.data);
        self.expire_time = Some(body.expiry);
        Ok(())
    }

    /// Fetch and parse the current `manifest_uri`, recording the elapsed
    /// time into the refresh-duration EWMA.
    async fn request_manifest(&mut self) -> Result<()> {
        let uri = self
            .manifest_uri
            .clone()
            .ok_or_else(|| EngineError::coded(Code::DashInvalidXml, "no manifest URI resolved"))?;

        let started = Instant::now();
        let response = self
            .client
            .get(&uri)
            .send()
            .await
            .map_err(EngineError::OriginFetch)?;
        let bytes = response.bytes().await.map_err(EngineError::OriginFetch)?;

        let presentation = parse_mpd(&bytes, &uri, &self.client, &self.stream_map).await;
        crate::metrics::record_manifest_refresh(
            if presentation.is_ok() { "ok" } else { "error" },
            started,
        );
        let presentation = presentation?;
        self.ewma.record(started.elapsed());
        self.presentation = Some(presentation);
        Ok(())
    }

    /// Drive one refresh: re-resolve the manifest URL if its expiry has
    /// passed, re-fetch+parse, and return how long to wait before the next
    /// call (spec.md §4.10's `max(MIN_UPDATE_PERIOD, updatePeriod - elapsed,
    /// ewma.estimate)` reschedule formula).
    ///
    /// Manifest-refresh failures are re-classified `Recoverable` so the
    /// timer survives a transient fetch/parse failure instead of
    /// terminating the process (spec.md §7).
    pub async fn on_update(&mut self) -> Duration {
        self.state = State::Refreshing;
        let cycle_started = Instant::now();

        let now = chrono::Utc::now().timestamp();
        if self.expire_time.map(|e| now >= e).unwrap_or(true) {
            if let Err(e) = self.resolve_manifest_url().await {
                warn!("manifest-url refresh failed, keeping previous URI: {}", e.into_recoverable());
            } else {
                self.manifest_expired = true;
            }
        }

        let update_period = self
            .presentation
            .as_ref()
            .and_then(|p| p.minimum_update_period)
            .unwrap_or(MIN_UPDATE_PERIOD.as_secs_f64());

        if let Err(e) = self.request_manifest().await {
            error!("manifest refresh failed: {}", e);
            let _ = e.into_recoverable();
        }

        self.state = State::Live;

        let elapsed = cycle_started.elapsed();
        let scheduled = Duration::from_secs_f64(update_period).saturating_sub(elapsed);
        let wait = MIN_UPDATE_PERIOD.max(scheduled).max(self.ewma.estimate());
        debug!("next manifest refresh in {:?}", wait);
        wait
    }

    /// Fetch the Widevine key for `pssh_box_base64` via the key API.
    /// Returns `(hex key id, hex key)`. A `status: false` or missing-keyId
    /// response is treated as fatal for the current cycle per spec.md §6.
    pub async fn fetch_key(&self, pssh_box_base64: &str, key_id_hex: &str) -> Result<(String, String)> {
        let url = self.config.key_api_url(pssh_box_base64);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(EngineError::OriginFetch)?;
        let body: KeyApiResponse = response.json().await.map_err(EngineError::OriginFetch)?;

        if !body.status {
            warn!("key API returned status=false for key id {}", key_id_hex);
            crate::metrics::record_key_fetch("error");
            return Err(EngineError::coded(
                Code::KeyFetchFailed,
                "key API returned status=false",
            ));
        }

        let key = body.keys.get(key_id_hex).cloned().ok_or_else(|| {
            warn!("key API response missing key id {}", key_id_hex);
            EngineError::coded(
                Code::KeyFetchFailed,
                format!("key API response missing key id {key_id_hex}"),
            )
        });
        let key = match key {
            Ok(k) => {
                crate::metrics::record_key_fetch("ok");
                k
            }
            Err(e) => {
                crate::metrics::record_key_fetch("error");
                return Err(e);
            }
        };

        Ok((key_id_hex.to_string(), key))
    }

    /// Release every stream's segment index, clear the stream map, and
    /// transition to `Stopped`. Idempotent.
    pub fn stop(&mut self) {
        self.state = State::Stopping;
        info!("orchestrator stopping");
        for mut entry in self.stream_map.iter_mut() {
            if let Some(index) = entry.value_mut().segment_index.as_mut() {
                index.release();
            }
        }
        self.stream_map.clear();
        self.presentation = None;
        self.state = State::Stopped;
        info!("orchestrator stopped");
    }

    /// Run the refresh loop until `abort` is signaled or `ctrl_c` fires,
    /// the way `main.rs` drives the orchestrator in production.
    pub async fn run_until_shutdown(&mut self, mut abort: AbortSignal) -> Result<()> {
        self.start().await?;

        loop {
            let wait = self.on_update().await;

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = abort.changed() => {
                    if *abort.borrow() {
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("ctrl_c received, shutting down orchestrator");
                    break;
                }
            }
        }

        self.stop();
        Ok(())
    }
}

#[async_trait]
impl AbortableOperation for DashOrchestrator {
    async fn run(&mut self, abort: AbortSignal) -> Result<()> {
        self.run_until_shutdown(abort).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewma_first_sample_is_the_estimate() {
        let mut ewma = Ewma::with_half_life(5.0);
        ewma.record(Duration::from_millis(200));
        assert_eq!(ewma.estimate(), Duration::from_millis(200));
    }

    #[test]
    fn ewma_smooths_toward_new_samples() {
        let mut ewma = Ewma::with_half_life(5.0);
        ewma.record(Duration::from_millis(100));
        ewma.record(Duration::from_millis(300));
        let estimate = ewma.estimate();
        assert!(estimate > Duration::from_millis(100) && estimate < Duration::from_millis(300));
    }

    #[test]
    fn default_estimate_before_any_sample_is_floor() {
        let ewma = Ewma::with_half_life(5.0);
        assert_eq!(ewma.estimate(), MIN_UPDATE_PERIOD);
    }

    #[tokio::test]
    async fn stop_releases_and_clears_stream_map() {
        use crate::model::segment_index::SegmentIndex;
        use crate::model::stream::{ContentType, StreamId};
        use std::collections::BTreeSet;

        let config = ServiceConfig {
            service: "svc".into(),
            id: "1".into(),
            apiformat_mpd: "https://api/{service}/{id}".into(),
            apiformat_key: "https://api/{service}/{id}/{pssh-box}".into(),
            languages: vec!["en".into()],
            bandwidth_tier: crate::config::BandwidthTier::Mid,
            max_segment_num: 5,
            outpath: "/tmp/out".into(),
            repo_root: "/tmp/repo".into(),
            decrypter_path: "/bin/true".into(),
        };
        let mut orchestrator = DashOrchestrator::new(Client::new(), config);
        orchestrator.stream_map.insert(
            StreamId {
                period_id: "p0".into(),
                representation_id: "r0".into(),
            },
            crate::model::stream::Stream {
                id: 0,
                origin_id: StreamId {
                    period_id: "p0".into(),
                    representation_id: "r0".into(),
                },
                content_type: ContentType::Video,
                mime_type: "video/mp4".into(),
                codecs: "avc1".into(),
                language: "und".into(),
                label: None,
                roles: vec![],
                width: None,
                height: None,
                frame_rate: None,
                channel_count: None,
                sampling_rate: None,
                bandwidth: 0,
                drm_infos: vec![],
                key_ids: BTreeSet::new(),
                hdr: None,
                encrypted: false,
                forced_subtitle: false,
                tiles_layout: None,
                trick_mode_for: None,
                segment_index: Some(SegmentIndex::new(vec![])),
            },
        );

        orchestrator.stop();
        assert_eq!(orchestrator.stream_map.len(), 0);
        assert_eq!(orchestrator.state(), State::Stopped);
    }
}
