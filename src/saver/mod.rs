//! Live-window segment saver (spec.md §4.11): pulls a selected Variant's
//! segments off the live edge, decrypts them, and maintains a rolling HLS
//! playlist window on disk.

pub mod variant_selection;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::{Code, EngineError, Result};
use crate::http_retry::{fetch_range_with_retry, fetch_with_retry, RetryConfig};
use crate::model::segment_reference::SegmentReference;
use crate::model::stream::{Stream, Variant};

/// One track's rolling playlist state, carried across cycles.
#[derive(Debug, Default)]
struct TrackState {
    media_sequence: u64,
    /// `(filename stem, duration)` pairs currently in the playlist window,
    /// oldest first.
    window: VecDeque<(String, f64)>,
    last_segment_uri: Option<String>,
    buffer_full: bool,
}

/// Drives the rolling HLS window for one ingest. Holds per-track state
/// across `run_cycle` calls the way the orchestrator's stream map holds
/// per-representation state across manifest refreshes.
pub struct LiveWindowSaver {
    client: Client,
    outpath: PathBuf,
    repo_root: PathBuf,
    decrypter_path: PathBuf,
    max_segment_num: usize,
    audio: TrackState,
    video: TrackState,
    master_written: bool,
}

/// The two track names the saver ever writes: spec.md's filesystem layout
/// is keyed on these literal strings (`{outpath}/{audio|video}/...`).
const TRACK_NAMES: [&str; 2] = ["audio", "video"];

impl LiveWindowSaver {
    pub fn new(client: Client, config: &ServiceConfig) -> Self {
        Self {
            client,
            outpath: PathBuf::from(&config.outpath),
            repo_root: PathBuf::from(&config.repo_root),
            decrypter_path: PathBuf::from(&config.decrypter_path),
            max_segment_num: config.max_segment_num,
            audio: TrackState::default(),
            video: TrackState::default(),
            master_written: false,
        }
    }

    fn download_dir(&self, track: &str) -> PathBuf {
        self.repo_root.join("download").join(track)
    }

    fn output_dir(&self, track: &str) -> PathBuf {
        self.repo_root.join("output").join(track)
    }

    fn playlist_dir(&self, track: &str) -> PathBuf {
        self.outpath.join(track)
    }

    /// Run one saver cycle against the selected `variant`: fetch, decrypt,
    /// and publish the next window of segments for each present track.
    ///
    /// `key_id_hex`/`key_hex` are the Widevine content key for the
    /// currently-selected variant; `availability_end` is the presentation
    /// timeline's current segment-availability end (spec.md §4.11).
    pub async fn run_cycle(
        &mut self,
        variant: &Variant,
        key_id_hex: &str,
        key_hex: &str,
        availability_end: f64,
    ) -> Result<()> {
        let cycle_started = Instant::now();

        if !self.master_written {
            self.write_master_playlist(variant).await?;
            self.master_written = true;
        }

        let mut target_segment_duration = MIN_SEGMENT_DURATION;

        if let Some(audio) = &variant.audio {
            if let Some(d) = self
                .run_track_cycle("audio", audio, key_id_hex, key_hex, availability_end)
                .await?
            {
                target_segment_duration = target_segment_duration.max(d);
            }
        }
        if let Some(video) = &variant.video {
            if let Some(d) = self
                .run_track_cycle("video", video, key_id_hex, key_hex, availability_end)
                .await?
            {
                target_segment_duration = target_segment_duration.max(d);
            }
        }

        self.cleanup_scratch_dirs().await;

        if target_segment_duration > MIN_SEGMENT_DURATION {
            let buffer_full = self.audio.buffer_full || self.video.buffer_full;
            if buffer_full {
                let track = if self.video.buffer_full { "video" } else { "audio" };
                self.pace(track, target_segment_duration, cycle_started).await;
            }
        }

        crate::metrics::record_cycle_duration(cycle_started);
        Ok(())
    }

    /// Run the per-segment pipeline for one track, returning the duration
    /// of the last segment processed (used for cycle pacing), or `None` if
    /// nothing new was available this cycle.
    async fn run_track_cycle(
        &mut self,
        track: &str,
        stream: &Stream,
        key_id_hex: &str,
        key_hex: &str,
        availability_end: f64,
    ) -> Result<Option<f64>> {
        let index = stream.segment_index.as_ref().ok_or_else(|| {
            EngineError::coded(Code::DashNoSegmentInfo, format!("{track} stream has no segment index"))
        })?;

        let refs = index.references();
        if refs.is_empty() {
            return Ok(None);
        }

        let state = self.track_state_mut(track);
        let start = live_edge_start(refs, state.last_segment_uri.as_deref(), self.max_segment_num, availability_end);

        let init = refs.first().and_then(|r| r.init_segment_reference.as_ref());
        let init_path = match init {
            Some(init) => Some(self.fetch_init_segment(track, init).await?),
            None => None,
        };

        let mut last_duration = None;
        for reference in &refs[start..] {
            let duration = reference.duration();
            if let Err(e) = self
                .process_segment(track, reference, init_path.as_deref(), key_id_hex, key_hex)
                .await
            {
                crate::metrics::record_segment_error(track);
                return Err(e);
            }
            last_duration = Some(duration);
        }

        if let Some(last) = refs.last() {
            self.track_state_mut(track).last_segment_uri = last.get_uris().first().cloned();
        }

        Ok(last_duration)
    }

    /// Fetch a stream's initialization segment once per cycle, over HTTP,
    /// honoring its byte range when one is present (spec.md §3
    /// `InitSegmentReference`), and return the local path it landed at so
    /// every segment this cycle can be concatenated against it.
    async fn fetch_init_segment(
        &self,
        track: &str,
        init: &crate::model::segment_reference::InitSegmentReference,
    ) -> Result<PathBuf> {
        let uri = init
            .uris
            .first()
            .ok_or_else(|| EngineError::coded(Code::DashNoSegmentInfo, "init segment reference has no URI"))?;

        let download_dir = self.download_dir(track);
        tokio::fs::create_dir_all(&download_dir).await.map_err(EngineError::Io)?;
        let dest = download_dir.join("init.mp4");

        let bytes = match init.end_byte {
            Some(end) => fetch_range_with_retry(&self.client, uri, init.start_byte, end, &RetryConfig::default())
                .await
                .map_err(EngineError::OriginFetch)?,
            None => fetch_with_retry(&self.client, uri, &RetryConfig::default())
                .await
                .map_err(EngineError::OriginFetch)?
                .bytes()
                .await
                .map_err(EngineError::OriginFetch)?
                .to_vec(),
        };
        tokio::fs::write(&dest, &bytes).await.map_err(EngineError::Io)?;
        Ok(dest)
    }

    fn track_state_mut(&mut self, track: &str) -> &mut TrackState {
        match track {
            "audio" => &mut self.audio,
            "video" => &mut self.video,
            _ => unreachable!("only audio/video tracks are ever driven"),
        }
    }

    /// Fetch, concatenate with the init segment, decrypt, append to the
    /// playlist, and evict on overflow — one segment's worth of spec.md
    /// §4.11's pipeline.
    async fn process_segment(
        &mut self,
        track: &str,
        reference: &SegmentReference,
        init_path: Option<&Path>,
        key_id_hex: &str,
        key_hex: &str,
    ) -> Result<()> {
        let uri = reference
            .get_uris()
            .first()
            .ok_or_else(|| EngineError::coded(Code::DashNoSegmentInfo, "segment reference has no URI"))?;

        let stem = segment_output_stem(uri);
        let download_dir = self.download_dir(track);
        let output_dir = self.output_dir(track);
        let playlist_dir = self.playlist_dir(track);
        tokio::fs::create_dir_all(&download_dir).await.map_err(EngineError::Io)?;
        tokio::fs::create_dir_all(&output_dir).await.map_err(EngineError::Io)?;
        tokio::fs::create_dir_all(&playlist_dir).await.map_err(EngineError::Io)?;

        let segment_name = format!("{stem}.m4s");
        let download_path = download_dir.join(&segment_name);
        fetch_to_file(&self.client, uri, &download_path).await?;

        let concatenated_path = output_dir.join(&segment_name);
        concatenate_with_init(init_path, &download_path, &concatenated_path).await?;

        let playlist_mp4 = format!("{stem}.mp4");
        let out_path = playlist_dir.join(&playlist_mp4);
        invoke_decrypter(
            &self.decrypter_path,
            key_id_hex,
            key_hex,
            &concatenated_path,
            &out_path,
            &self.repo_root,
            track,
        )
        .await?;

        self.append_and_evict(track, &playlist_mp4, reference.duration()).await?;
        crate::metrics::record_segment_saved(track);
        debug!("{track}: published segment {playlist_mp4}");
        Ok(())
    }

    /// Append the segment to the rolling window, evict the eldest entry
    /// past `max_segment_num`, and rewrite the media playlist atomically.
    async fn append_and_evict(&mut self, track: &str, filename: &str, duration: f64) -> Result<()> {
        let playlist_dir = self.playlist_dir(track);
        let max_segment_num = self.max_segment_num;
        let state = self.track_state_mut(track);

        state.window.push_back((filename.to_string(), duration));

        if state.window.len() > max_segment_num {
            if let Some((evicted, _)) = state.window.pop_front() {
                let evicted_path = playlist_dir.join(&evicted);
                if let Err(e) = tokio::fs::remove_file(&evicted_path).await {
                    warn!("{track}: failed to evict {evicted}: {e}");
                }
                state.media_sequence += 1;
                state.buffer_full = true;
                crate::metrics::record_eviction(track);
            }
        }

        self.write_media_playlist(track).await
    }

    /// Atomically rewrite `{outpath}/{track}/{track}Variant.m3u8` (spec.md
    /// §6's exact header/body format).
    async fn write_media_playlist(&self, track: &str) -> Result<()> {
        let state = match track {
            "audio" => &self.audio,
            "video" => &self.video,
            _ => unreachable!(),
        };

        let target_duration = state
            .window
            .iter()
            .map(|(_, d)| *d)
            .fold(0.0_f64, f64::max)
            .floor() as u64;

        let mut body = String::new();
        body.push_str("#EXTM3U\n");
        body.push_str("#EXT-X-VERSION:7\n");
        body.push_str("#EXT-X-PLAYLIST-TYPE:EVENT\n");
        body.push_str(&format!("#EXT-X-TARGETDURATION:{target_duration}\n"));
        body.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", state.media_sequence));
        for (name, duration) in &state.window {
            body.push_str(&format!("#EXTINF:{duration},\n{name}\n"));
        }

        let variant_name = format!("{track}Variant.m3u8");
        let path = self.playlist_dir(track).join(&variant_name);
        atomic_write(&path, body.as_bytes()).await
    }

    /// Write `{outpath}/master.m3u8` once, per spec.md §6's exact format.
    async fn write_master_playlist(&self, variant: &Variant) -> Result<()> {
        tokio::fs::create_dir_all(&self.outpath).await.map_err(EngineError::Io)?;

        let mut body = String::new();
        body.push_str("#EXTM3U\n");
        body.push_str("#EXT-X-VERSION:7\n");

        if let Some(audio) = &variant.audio {
            body.push_str(&format!(
                "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio\",LANGUAGE=\"{lang}\",NAME=\"{lang}\",AUTOSELECT=YES,URI=\"audio/audioVariant.m3u8\"\n",
                lang = audio.language,
            ));
        }

        if let Some(video) = &variant.video {
            let resolution = match (video.width, video.height) {
                (Some(w), Some(h)) => format!("{w}x{h}"),
                _ => String::new(),
            };
            let frame_rate = video.frame_rate.unwrap_or(0.0);
            body.push_str(&format!(
                "#EXT-X-STREAM-INF:PROGRAM-ID=1,BANDWIDTH={bw},RESOLUTION={res},CODECS=\"{codecs}\",FRAME-RATE={fr},AUDIO=\"audio\"\n",
                bw = variant.bandwidth,
                res = resolution,
                codecs = video.codecs,
                fr = frame_rate,
            ));
            body.push_str("video/videoVariant.m3u8\n");
        }

        let path = self.outpath.join("master.m3u8");
        atomic_write(&path, body.as_bytes()).await
    }

    /// Purge `download/`/`output/` scratch directories at cycle end
    /// (spec.md §4.11's "cleanup" step).
    async fn cleanup_scratch_dirs(&self) {
        for track in TRACK_NAMES {
            for dir in [self.download_dir(track), self.output_dir(track)] {
                if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("failed to clean up {}: {e}", dir.display());
                    }
                }
            }
        }
    }

    /// Sleep the remainder of a segment's duration if the rolling window
    /// is already full (spec.md §4.11 pacing), so the saver doesn't race
    /// ahead of the live edge once steady state is reached.
    pub async fn pace(&self, track: &str, segment_duration: f64, cycle_started: Instant) {
        let buffer_full = match track {
            "audio" => self.audio.buffer_full,
            "video" => self.video.buffer_full,
            _ => false,
        };
        if !buffer_full {
            return;
        }
        let target = Duration::from_secs_f64(segment_duration.max(0.0));
        let elapsed = cycle_started.elapsed();
        if let Some(remaining) = target.checked_sub(elapsed) {
            tokio::time::sleep(remaining).await;
        }
    }
}

const MIN_SEGMENT_DURATION: f64 = 0.0;

/// Find the starting index into `refs` for this cycle: resume exactly where
/// the previous cycle left off if `last_segment_uri` still matches a
/// reference, otherwise find the earliest first-start window per spec.md
/// §4.11's `k + maxSegmentNum < total` / `endTime > availabilityEnd` rule.
fn live_edge_start(
    refs: &[SegmentReference],
    last_segment_uri: Option<&str>,
    max_segment_num: usize,
    availability_end: f64,
) -> usize {
    if let Some(last_uri) = last_segment_uri {
        if let Some(pos) = refs.iter().position(|r| r.get_uris().first().map(String::as_str) == Some(last_uri)) {
            return pos + 1;
        }
    }

    let total = refs.len();
    for k in 0..total {
        if k + max_segment_num < total && refs[k + max_segment_num].end_time > availability_end {
            return k;
        }
    }
    total.saturating_sub(1)
}

/// Derive the output filename stem for a segment URI: the zero-padded
/// 12-digit decimal form of the hex-parsed basename stem, falling back to
/// the original stem when it isn't valid hex.
fn segment_output_stem(uri: &str) -> String {
    let basename = uri.rsplit('/').next().unwrap_or(uri);
    let stem = basename.rsplit_once('.').map(|(s, _)| s).unwrap_or(basename);
    match u64::from_str_radix(stem, 16) {
        Ok(n) => format!("{n:012}"),
        Err(_) => stem.to_string(),
    }
}

async fn fetch_to_file(client: &Client, url: &str, dest: &Path) -> Result<()> {
    let response = fetch_with_retry(client, url, &RetryConfig::default())
        .await
        .map_err(EngineError::OriginFetch)?;
    let bytes = response.bytes().await.map_err(EngineError::OriginFetch)?;
    tokio::fs::write(dest, &bytes).await.map_err(EngineError::Io)?;
    Ok(())
}

/// Concatenate an init segment (if any) followed by the downloaded media
/// segment into `out_path`.
async fn concatenate_with_init(
    init_path: Option<&Path>,
    segment_path: &Path,
    out_path: &Path,
) -> Result<()> {
    let mut out = tokio::fs::File::create(out_path).await.map_err(EngineError::Io)?;

    if let Some(init_path) = init_path {
        let init_bytes = tokio::fs::read(init_path).await.map_err(EngineError::Io)?;
        out.write_all(&init_bytes).await.map_err(EngineError::Io)?;
    }

    let segment_bytes = tokio::fs::read(segment_path).await.map_err(EngineError::Io)?;
    out.write_all(&segment_bytes).await.map_err(EngineError::Io)?;
    out.flush().await.map_err(EngineError::Io)?;
    Ok(())
}

/// Invoke the decrypter sub-process (spec.md §6): `decrypt.sh {hex_keyId}
/// {hex_key} {srcPath} {outPath} {repoRoot} {trackName}`. Non-zero exit is
/// `SEGMENT_MANIPULATION_FAILED`.
async fn invoke_decrypter(
    decrypter_path: &Path,
    key_id_hex: &str,
    key_hex: &str,
    src_path: &Path,
    out_path: &Path,
    repo_root: &Path,
    track_name: &str,
) -> Result<()> {
    let status = tokio::process::Command::new(decrypter_path)
        .arg(key_id_hex)
        .arg(key_hex)
        .arg(src_path)
        .arg(out_path)
        .arg(repo_root)
        .arg(track_name)
        .status()
        .await
        .map_err(EngineError::Io)?;

    if !status.success() {
        return Err(EngineError::coded(
            Code::SegmentManipulationFailed,
            format!("decrypter exited with status {status:?} for {}", src_path.display()),
        ));
    }
    Ok(())
}

/// Write `contents` to `path` via a temp-file-then-rename, so a concurrent
/// reader (the HLS client) never observes a partially-written playlist.
async fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(EngineError::Io)?;
    }
    let tmp_path = path.with_extension("m3u8.tmp");
    tokio::fs::write(&tmp_path, contents).await.map_err(EngineError::Io)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(EngineError::Io)?;
    info!("wrote playlist {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, uri: &str) -> SegmentReference {
        SegmentReference {
            start_time: start,
            end_time: end,
            uris: vec![uri.to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn segment_output_stem_hex_decimal_round_trip() {
        assert_eq!(segment_output_stem("media/1a2b.m4s"), "000000006699");
    }

    #[test]
    fn segment_output_stem_falls_back_when_not_hex() {
        assert_eq!(segment_output_stem("media/init-segment.m4s"), "init-segment");
    }

    #[test]
    fn live_edge_resumes_after_last_seen_segment() {
        let refs = vec![seg(0.0, 2.0, "a"), seg(2.0, 4.0, "b"), seg(4.0, 6.0, "c")];
        let start = live_edge_start(&refs, Some("b"), 5, 6.0);
        assert_eq!(start, 2);
    }

    #[test]
    fn live_edge_finds_first_start_window_when_no_resume_point() {
        let refs: Vec<SegmentReference> = (0..10)
            .map(|i| seg(i as f64 * 2.0, (i + 1) as f64 * 2.0, &format!("s{i}")))
            .collect();
        // maxSegmentNum=3, availability end past segment index 7's end (16.0)
        let start = live_edge_start(&refs, None, 3, 15.0);
        assert!(start + 3 < refs.len());
        assert!(refs[start + 3].end_time > 15.0);
    }

    #[tokio::test]
    async fn append_and_evict_tracks_media_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            service: "s".into(),
            id: "1".into(),
            apiformat_mpd: "https://x/{service}/{id}".into(),
            apiformat_key: "https://x/{service}/{id}/{pssh-box}".into(),
            languages: vec!["en".into()],
            bandwidth_tier: crate::config::BandwidthTier::Mid,
            max_segment_num: 2,
            outpath: dir.path().join("out").to_string_lossy().to_string(),
            repo_root: dir.path().join("repo").to_string_lossy().to_string(),
            decrypter_path: "/bin/true".into(),
        };
        let mut saver = LiveWindowSaver::new(Client::new(), &config);

        saver.append_and_evict("video", "000000000001.mp4", 2.0).await.unwrap();
        saver.append_and_evict("video", "000000000002.mp4", 2.0).await.unwrap();
        assert_eq!(saver.video.media_sequence, 0);
        saver.append_and_evict("video", "000000000003.mp4", 2.0).await.unwrap();
        assert_eq!(saver.video.media_sequence, 1);
        assert!(saver.video.buffer_full);
        assert_eq!(saver.video.window.len(), 2);
    }
}
