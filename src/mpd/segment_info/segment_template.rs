//! `SegmentTemplate` resolution (spec.md §4.5, SegmentTemplate).
//!
//! Purely offline: unlike SegmentBase, nothing here needs a network fetch —
//! the URI template and (optionally) the `SegmentTimeline` fully describe
//! the segment sequence already present in the MPD XML.

use tracing::warn;

use crate::model::segment_reference::{InitSegmentReference, QualityInfo, SegmentReference};
use crate::mpd::segment_info::timeline::{expand_timeline, STimelineEntry};
use crate::mpd::uri_template::{expand_uri_template, TemplateValues};

/// A resolved `SegmentTemplate` element, with inheritance already applied.
#[derive(Debug, Clone)]
pub struct SegmentTemplateInfo {
    pub media: Option<String>,
    pub initialization: Option<String>,
    pub timescale: u64,
    /// Fixed segment duration, in timescale units (`@duration`).
    pub duration: Option<u64>,
    pub start_number: u64,
    /// `@presentationTimeOffset`, in timescale units.
    pub presentation_time_offset: u64,
    pub timeline: Option<Vec<STimelineEntry>>,
    pub representation_id: String,
    pub bandwidth: u64,
}

/// Resolve a `SegmentTemplate` into an ordered list of `SegmentReference`s.
///
/// `period_duration` bounds `@duration`-based (fixed-interval) expansion;
/// per spec.md §1's non-goals, full `$Number$`/`$Time$` expansion for an
/// unbounded dynamic period (no period duration, no timeline) is not
/// attempted — the caller gets an empty index and a warning instead of an
/// unbounded loop.
pub fn resolve_segment_template(
    info: &SegmentTemplateInfo,
    period_start: f64,
    period_duration: Option<f64>,
) -> Vec<SegmentReference> {
    let mut refs = match &info.timeline {
        Some(entries) => resolve_from_timeline(info, entries, period_start, period_duration),
        None => resolve_from_duration(info, period_start, period_duration),
    };
    let init = resolve_init_segment_reference(info);
    if init.is_some() {
        for r in &mut refs {
            r.init_segment_reference = init.clone();
        }
    }
    refs
}

/// Expand `@initialization` into the `InitSegmentReference` every segment
/// this template produces shares (spec.md §4.5): the init template only
/// ever substitutes `$RepresentationID$`/`$Bandwidth$`, never
/// `$Number$`/`$Time$`, since one initialization segment covers the whole
/// Representation.
fn resolve_init_segment_reference(info: &SegmentTemplateInfo) -> Option<InitSegmentReference> {
    let template = info.initialization.as_ref()?;
    let uri = expand_uri_template(
        template,
        &TemplateValues {
            representation_id: Some(&info.representation_id),
            bandwidth: Some(info.bandwidth),
            number: None,
            time: None,
        },
    );
    Some(InitSegmentReference {
        uris: vec![uri],
        start_byte: 0,
        end_byte: None,
        quality: QualityInfo {
            bandwidth: Some(info.bandwidth),
            ..Default::default()
        },
    })
}

fn resolve_from_timeline(
    info: &SegmentTemplateInfo,
    entries: &[STimelineEntry],
    period_start: f64,
    period_duration: Option<f64>,
) -> Vec<SegmentReference> {
    let pto = info.presentation_time_offset as i64;
    let segs = expand_timeline(entries, info.timescale.max(1), pto, period_duration);

    let mut out = Vec::with_capacity(segs.len());
    for (idx, seg) in segs.iter().enumerate() {
        let number = info.start_number + idx as u64;
        let uri = info.media.as_ref().map(|media| {
            expand_uri_template(
                media,
                &TemplateValues {
                    representation_id: Some(&info.representation_id),
                    number: Some(number),
                    bandwidth: Some(info.bandwidth),
                    time: Some(seg.unscaled_start.max(0) as u64),
                },
            )
        });
        out.push(SegmentReference {
            start_time: period_start + seg.start,
            end_time: period_start + seg.end,
            uris: uri.into_iter().collect(),
            ..Default::default()
        });
    }
    out
}

fn resolve_from_duration(
    info: &SegmentTemplateInfo,
    period_start: f64,
    period_duration: Option<f64>,
) -> Vec<SegmentReference> {
    let Some(duration) = info.duration else {
        warn!("SegmentTemplate has neither @duration nor SegmentTimeline; no segments resolved");
        return Vec::new();
    };
    if duration == 0 {
        warn!("SegmentTemplate @duration is zero; no segments resolved");
        return Vec::new();
    }

    let start_number = if info.start_number == 0 {
        warn!("SegmentTemplate @startNumber of 0 is invalid; treating as 1");
        1
    } else {
        info.start_number
    };

    let seg_duration_seconds = duration as f64 / info.timescale.max(1) as f64;
    let pto_seconds = info.presentation_time_offset as f64 / info.timescale.max(1) as f64;

    let Some(period_duration) = period_duration else {
        warn!(
            "SegmentTemplate @duration-based expansion for an unbounded dynamic period is out of scope; no segments resolved"
        );
        return Vec::new();
    };

    let count = (period_duration / seg_duration_seconds).ceil() as u64;
    let mut out = Vec::with_capacity(count as usize);
    for i in 0..count {
        let number = start_number + i;
        let start = period_start + i as f64 * seg_duration_seconds + pto_seconds;
        let end = start + seg_duration_seconds;
        let unscaled_time = i * duration + info.presentation_time_offset;
        let uri = info.media.as_ref().map(|media| {
            expand_uri_template(
                media,
                &TemplateValues {
                    representation_id: Some(&info.representation_id),
                    number: Some(number),
                    bandwidth: Some(info.bandwidth),
                    time: Some(unscaled_time),
                },
            )
        });
        out.push(SegmentReference {
            start_time: start,
            end_time: end,
            uris: uri.into_iter().collect(),
            ..Default::default()
        });
    }
    out
}
