//! Period combiner (spec.md §4.6): merges per-period stream lists into
//! cross-period Variants (audio+video pairs), TextStreams, and ImageStreams.
//! Re-invoked on every manifest refresh.

use std::collections::BTreeSet;

use tracing::warn;

use crate::model::segment_index::SegmentIndex;
use crate::model::stream::{ContentType, Stream, Variant};

/// One period's worth of already-parsed streams, split by content type.
#[derive(Debug, Clone, Default)]
pub struct PeriodStreams {
    pub period_id: String,
    pub period_start: f64,
    pub audio: Vec<Stream>,
    pub video: Vec<Stream>,
    pub text: Vec<Stream>,
    pub image: Vec<Stream>,
}

/// The matching discipline the spec names: `(language, roleSet, channelCount,
/// label, codecBase)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MatchKey {
    language: String,
    roles: BTreeSet<String>,
    channel_count: Option<u32>,
    label: Option<String>,
    codec_base: String,
}

fn codec_base(codecs: &str) -> String {
    codecs
        .split('.')
        .next()
        .unwrap_or(codecs)
        .to_ascii_lowercase()
}

fn match_key(s: &Stream) -> MatchKey {
    MatchKey {
        language: s.language.clone(),
        roles: s.roles.iter().cloned().collect(),
        channel_count: s.channel_count,
        label: s.label.clone(),
        codec_base: codec_base(&s.codecs),
    }
}

/// A cross-period track: one representative Stream (from the first period it
/// appeared in) plus the per-period (start-time, Stream) pairs used to build
/// the concatenated SegmentIndex.
struct TrackGroup {
    key: MatchKey,
    representative: Stream,
    members: Vec<(f64, Stream)>,
}

fn group_by_match_key(content_type: ContentType, periods: &[PeriodStreams]) -> Vec<TrackGroup> {
    let mut groups: Vec<TrackGroup> = Vec::new();

    for period in periods {
        let streams: &[Stream] = match content_type {
            ContentType::Audio => period.audio.as_slice(),
            ContentType::Video => period.video.as_slice(),
            ContentType::Text => period.text.as_slice(),
            ContentType::Image => period.image.as_slice(),
            ContentType::Application => &[],
        };

        for stream in streams {
            let key = match_key(stream);

            if let Some(group) = groups.iter_mut().find(|g| g.key == key) {
                group.members.push((period.period_start, stream.clone()));
                continue;
            }

            // Most-compatible fallback: match on language + codec base alone
            // when the full tuple has no exact counterpart yet.
            if let Some(group) = groups.iter_mut().find(|g| {
                g.key.language == key.language && g.key.codec_base == key.codec_base
            }) {
                warn!(
                    "period {}: stream {:?} has no exact cross-period match; falling back to language+codec match",
                    period.period_id, stream.origin_id
                );
                group.members.push((period.period_start, stream.clone()));
                continue;
            }

            groups.push(TrackGroup {
                key,
                representative: stream.clone(),
                members: vec![(period.period_start, stream.clone())],
            });
        }
    }

    groups
}

/// Concatenate each member's SegmentIndex, time-shifted by its period start,
/// into a single index for the cross-period track.
fn concatenated_index(group: &TrackGroup) -> Option<SegmentIndex> {
    let mut refs = Vec::new();
    let mut any = false;
    for (period_start, stream) in &group.members {
        if let Some(index) = &stream.segment_index {
            any = true;
            for r in index.references() {
                refs.push(r.shifted(*period_start));
            }
        }
    }
    if !any {
        return None;
    }
    Some(SegmentIndex::new(refs))
}

fn materialize(group: TrackGroup) -> Stream {
    let index = concatenated_index(&group);
    let mut stream = group.representative;
    stream.segment_index = index;
    stream
}

/// Combine a manifest's per-period stream lists into the cross-period
/// Variants, TextStreams, and ImageStreams the Presentation exposes.
pub fn combine_periods(periods: &[PeriodStreams]) -> (Vec<Variant>, Vec<Stream>, Vec<Stream>) {
    let audio_groups = group_by_match_key(ContentType::Audio, periods);
    let video_groups = group_by_match_key(ContentType::Video, periods);
    let text_groups = group_by_match_key(ContentType::Text, periods);
    let image_groups = group_by_match_key(ContentType::Image, periods);

    let audio_streams: Vec<Stream> = audio_groups.into_iter().map(materialize).collect();
    let video_streams: Vec<Stream> = video_groups.into_iter().map(materialize).collect();
    let text_streams: Vec<Stream> = text_groups.into_iter().map(materialize).collect();
    let image_streams: Vec<Stream> = image_groups.into_iter().map(materialize).collect();

    let variants = pair_audio_video(audio_streams, video_streams);

    (variants, text_streams, image_streams)
}

/// Pair audio and video cross-period tracks into Variants. Each video track
/// is paired with the audio track sharing its language (preferring a
/// DRM-compatible one), falling back to the first audio track when no
/// language match exists. A video-only or audio-only manifest still produces
/// Variants with the missing side left `None`.
fn pair_audio_video(audio_streams: Vec<Stream>, video_streams: Vec<Stream>) -> Vec<Variant> {
    if video_streams.is_empty() {
        return audio_streams
            .into_iter()
            .map(|a| Variant {
                bandwidth: a.bandwidth,
                audio: Some(a),
                video: None,
            })
            .collect();
    }

    let mut variants = Vec::with_capacity(video_streams.len());
    for video in video_streams {
        let audio = audio_streams
            .iter()
            .find(|a| a.language == video.language && a.drm_compatible_with(&video))
            .or_else(|| audio_streams.iter().find(|a| a.drm_compatible_with(&video)))
            .cloned();

        let bandwidth = video.bandwidth + audio.as_ref().map(|a| a.bandwidth).unwrap_or(0);
        variants.push(Variant {
            bandwidth,
            audio,
            video: Some(video),
        });
    }
    variants
}
