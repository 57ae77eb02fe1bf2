//! [`Stream`], [`Variant`], [`Presentation`] and [`PresentationTimeline`] —
//! the cross-period data model the MPD parser and period combiner build,
//! and the segment saver consumes.

use std::collections::BTreeSet;

use crate::model::segment_index::SegmentIndex;

/// Content type of a Stream, dispatched over a closed set of tags rather
/// than runtime string-prefix matching (spec.md §9 "Dynamic dispatch by
/// codec").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Audio,
    Video,
    Text,
    Image,
    Application,
}

impl ContentType {
    pub fn from_mime_or_str(s: &str) -> Option<Self> {
        let prefix = s.split('/').next().unwrap_or(s);
        match prefix {
            "audio" => Some(ContentType::Audio),
            "video" => Some(ContentType::Video),
            "text" => Some(ContentType::Text),
            "image" => Some(ContentType::Image),
            "application" => Some(ContentType::Application),
            _ => None,
        }
    }
}

/// `(Period.id, Representation.id)` — the stable cross-refresh identity a
/// Stream is keyed by in the orchestrator's stream map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId {
    pub period_id: String,
    pub representation_id: String,
}

/// A resolved init-data override, carried by a [`DrmInfo`] (from
/// `<cenc:pssh>` or an MP4Protection default) or attached directly to an
/// [`crate::model::InitSegmentReference`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitDataOverride {
    pub init_data_type: String,
    pub data: Vec<u8>,
}

/// A single DRM system's descriptor, normalized out of `ContentProtection`
/// elements (spec.md §4.7).
#[derive(Debug, Clone, PartialEq)]
pub struct DrmInfo {
    pub key_system: String,
    pub license_server_uri: Option<String>,
    pub robustness: Option<String>,
    pub init_data: Vec<InitDataOverride>,
    /// Lowercase, hyphen-free hex key IDs.
    pub key_ids: BTreeSet<String>,
    /// Base64 PSSH payload, populated for `com.widevine.alpha` so the key
    /// client can build the `{pssh-box}` API parameter without re-deriving
    /// it from `init_data`.
    pub widevine_pssh_base64: Option<String>,
}

impl DrmInfo {
    pub fn new(key_system: impl Into<String>) -> Self {
        Self {
            key_system: key_system.into(),
            license_server_uri: None,
            robustness: None,
            init_data: Vec::new(),
            key_ids: BTreeSet::new(),
            widevine_pssh_base64: None,
        }
    }
}

/// One playable track: an AdaptationSet/Representation pair resolved
/// across period combination.
#[derive(Debug, Clone)]
pub struct Stream {
    pub id: u64,
    pub origin_id: StreamId,
    pub content_type: ContentType,
    pub mime_type: String,
    pub codecs: String,
    /// BCP-47, lowercased.
    pub language: String,
    pub label: Option<String>,
    pub roles: Vec<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub channel_count: Option<u32>,
    pub sampling_rate: Option<u32>,
    pub bandwidth: u64,
    pub drm_infos: Vec<DrmInfo>,
    pub key_ids: BTreeSet<String>,
    pub hdr: Option<String>,
    pub encrypted: bool,
    pub forced_subtitle: bool,
    pub tiles_layout: Option<String>,
    /// `id` of the normal AdaptationSet this stream is a trick-mode (e.g.
    /// iframe-only) rendition of, once resolved by matching codec base
    /// against the candidate named in its `http://dashif.org/guidelines/
    /// trickmode` EssentialProperty (spec.md §4.4 step 5).
    pub trick_mode_for: Option<String>,
    pub segment_index: Option<SegmentIndex>,
}

impl Stream {
    /// True if this stream's DRM set is compatible with `other`'s: both
    /// clear, or sharing at least one key system (spec.md's Variant
    /// invariant).
    pub fn drm_compatible_with(&self, other: &Stream) -> bool {
        if !self.encrypted && !other.encrypted {
            return true;
        }
        self.drm_infos
            .iter()
            .any(|a| other.drm_infos.iter().any(|b| a.key_system == b.key_system))
    }
}

/// A playable (audio, video) pair plus aggregate bandwidth, produced by the
/// period combiner.
#[derive(Debug, Clone)]
pub struct Variant {
    pub audio: Option<Stream>,
    pub video: Option<Stream>,
    pub bandwidth: u64,
}

impl Variant {
    pub fn language(&self) -> Option<&str> {
        self.audio
            .as_ref()
            .map(|s| s.language.as_str())
            .or_else(|| self.video.as_ref().map(|s| s.language.as_str()))
    }
}

/// Availability-window and live/static bookkeeping for one presentation.
///
/// Invariants: `segment_availability_duration >= 0` (`f64::INFINITY` for
/// VOD); if static, `availability_start` is unused; `max_segment_duration
/// >= 1`.
#[derive(Debug, Clone)]
pub struct PresentationTimeline {
    /// Wall-clock availability start, as Unix seconds.
    pub availability_start: f64,
    /// `serverTime - clientTime`, in milliseconds (from UTCTiming).
    pub clock_offset_ms: i64,
    pub segment_availability_duration: f64,
    pub duration: Option<f64>,
    pub is_static: bool,
    pub max_segment_duration: f64,
    pub presentation_delay: f64,
}

impl PresentationTimeline {
    pub fn new(availability_start: f64) -> Self {
        Self {
            availability_start,
            clock_offset_ms: 0,
            segment_availability_duration: f64::INFINITY,
            duration: None,
            is_static: true,
            max_segment_duration: 1.0,
            presentation_delay: 0.0,
        }
    }

    /// Now, adjusted by the UTCTiming clock offset.
    pub fn now_seconds(&self, wall_now_seconds: f64) -> f64 {
        wall_now_seconds + self.clock_offset_ms as f64 / 1000.0
    }

    /// The latest presentation time currently guaranteed available, given
    /// the caller's wall-clock `now`.
    pub fn get_segment_availability_end(&self, wall_now_seconds: f64) -> f64 {
        if self.is_static {
            return self.duration.unwrap_or(f64::INFINITY);
        }
        let now = self.now_seconds(wall_now_seconds);
        now - self.availability_start - self.presentation_delay
    }

    pub fn notify_max_segment_duration(&mut self, d: f64) {
        if d >= 1.0 && d > self.max_segment_duration {
            self.max_segment_duration = d;
        } else if self.max_segment_duration < 1.0 {
            self.max_segment_duration = d.max(1.0);
        }
    }

    /// Update `max_segment_duration` and `duration` bookkeeping from a
    /// freshly-parsed batch of references, the way the orchestrator drives
    /// the timeline after every manifest refresh.
    pub fn notify_segments(&mut self, refs: &[crate::model::SegmentReference]) {
        for r in refs {
            self.notify_max_segment_duration(r.duration());
        }
    }

    pub fn set_static(&mut self, is_static: bool) {
        self.is_static = is_static;
    }

    pub fn set_clock_offset(&mut self, offset_ms: i64) {
        self.clock_offset_ms = offset_ms;
    }

    pub fn set_duration(&mut self, seconds: f64) {
        self.duration = Some(seconds);
    }
}

/// The root of one ingest: the timeline plus every Variant/TextStream/
/// ImageStream the MPD currently resolves to.
#[derive(Debug, Clone)]
pub struct Presentation {
    pub timeline: PresentationTimeline,
    pub variants: Vec<Variant>,
    pub text_streams: Vec<Stream>,
    pub image_streams: Vec<Stream>,
    pub sequence_mode: bool,
    pub min_buffer_time: f64,
    /// `@minimumUpdatePeriod`, seconds. `None` means the manifest never
    /// changes and the orchestrator should not schedule a refresh.
    pub minimum_update_period: Option<f64>,
}

impl Presentation {
    pub fn new(timeline: PresentationTimeline) -> Self {
        Self {
            timeline,
            variants: Vec::new(),
            text_streams: Vec::new(),
            image_streams: Vec::new(),
            sequence_mode: false,
            min_buffer_time: 0.0,
            minimum_update_period: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_from_mime_prefix() {
        assert_eq!(
            ContentType::from_mime_or_str("video/mp4"),
            Some(ContentType::Video)
        );
        assert_eq!(ContentType::from_mime_or_str("bogus"), None);
    }

    #[test]
    fn timeline_static_availability_end_is_duration() {
        let mut t = PresentationTimeline::new(0.0);
        t.set_static(true);
        t.set_duration(30.0);
        assert_eq!(t.get_segment_availability_end(12345.0), 30.0);
    }

    #[test]
    fn timeline_dynamic_availability_end_tracks_wall_clock() {
        let mut t = PresentationTimeline::new(1000.0);
        t.set_static(false);
        t.presentation_delay = 5.0;
        assert_eq!(t.get_segment_availability_end(1100.0), 95.0);
    }

    #[test]
    fn clock_offset_shifts_now() {
        let mut t = PresentationTimeline::new(0.0);
        t.set_clock_offset(2000);
        assert_eq!(t.now_seconds(10.0), 12.0);
    }

    #[test]
    fn drm_compatible_when_both_clear() {
        let a = test_stream(false, &[]);
        let b = test_stream(false, &[]);
        assert!(a.drm_compatible_with(&b));
    }

    #[test]
    fn drm_incompatible_across_key_systems() {
        let a = test_stream(true, &["com.widevine.alpha"]);
        let b = test_stream(true, &["com.microsoft.playready"]);
        assert!(!a.drm_compatible_with(&b));
    }

    fn test_stream(encrypted: bool, systems: &[&str]) -> Stream {
        Stream {
            id: 0,
            origin_id: StreamId {
                period_id: "p".into(),
                representation_id: "r".into(),
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
            drm_infos: systems.iter().map(|s| DrmInfo::new(*s)).collect(),
            key_ids: BTreeSet::new(),
            hdr: None,
            encrypted,
            forced_subtitle: false,
            tiles_layout: None,
            trick_mode_for: None,
            segment_index: None,
        }
    }
}
