//! `SegmentList` resolution (spec.md §4.5, SegmentList): an explicit
//! `SegmentURL` list paired with either a fixed `@duration` or a
//! `SegmentTimeline`.

use tracing::warn;

use crate::error::{Code, EngineError, Result};
use crate::model::segment_reference::{InitSegmentReference, SegmentReference};
use crate::mpd::segment_info::timeline::{expand_timeline, STimelineEntry};

/// One `<SegmentURL media="..." mediaRange="...">` entry.
#[derive(Debug, Clone, Default)]
pub struct SegmentUrlEntry {
    pub media: Option<String>,
    pub media_range: Option<(u64, Option<u64>)>,
}

/// A `<Initialization sourceURL="..." range="...">` child, common to
/// SegmentList the same way it's required on SegmentBase (spec.md §4.5).
#[derive(Debug, Clone)]
pub struct InitializationInfo {
    pub source_url: String,
    pub range: Option<(u64, Option<u64>)>,
}

#[derive(Debug, Clone)]
pub struct SegmentListInfo {
    pub urls: Vec<SegmentUrlEntry>,
    /// Fixed segment duration, in timescale units (`@duration`).
    pub duration: Option<u64>,
    pub timescale: u64,
    /// `Some(entries)` only when a `SegmentTimeline` child was actually
    /// present (possibly empty — which is itself a failure case).
    pub timeline: Option<Vec<STimelineEntry>>,
    pub initialization: Option<InitializationInfo>,
}

fn init_segment_reference(info: &SegmentListInfo) -> Option<InitSegmentReference> {
    let init = info.initialization.as_ref()?;
    Some(InitSegmentReference {
        uris: vec![init.source_url.clone()],
        start_byte: init.range.map(|(s, _)| s).unwrap_or(0),
        end_byte: init.range.and_then(|(_, e)| e),
        quality: Default::default(),
    })
}

/// Resolve a `SegmentList` into an ordered list of `SegmentReference`s.
pub fn resolve_segment_list(
    info: &SegmentListInfo,
    period_start: f64,
    period_duration: Option<f64>,
) -> Result<Vec<SegmentReference>> {
    let n = info.urls.len();

    if let Some(timeline) = &info.timeline {
        if timeline.is_empty() {
            return Err(EngineError::coded(
                Code::DashNoSegmentInfo,
                "SegmentList has an explicit but empty SegmentTimeline",
            ));
        }
        let segs = expand_timeline(timeline, info.timescale.max(1), 0, period_duration);
        let count = segs.len().min(n);
        if segs.len() != n {
            warn!(
                "SegmentList SegmentURL count ({n}) and SegmentTimeline length ({}) differ; truncating to {count}",
                segs.len()
            );
        }
        let init = init_segment_reference(info);
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            out.push(SegmentReference {
                start_time: period_start + segs[i].start,
                end_time: period_start + segs[i].end,
                uris: url_uris(&info.urls[i]),
                start_byte: info.urls[i].media_range.map(|(s, _)| s),
                end_byte: info.urls[i].media_range.and_then(|(_, e)| e),
                init_segment_reference: init.clone(),
                ..Default::default()
            });
        }
        return Ok(out);
    }

    if n > 1 && info.duration.is_none() {
        return Err(EngineError::coded(
            Code::DashNoSegmentInfo,
            "SegmentList has multiple segments but no @duration and no SegmentTimeline",
        ));
    }
    if n == 1 && info.duration.is_none() && period_duration.is_none() {
        return Err(EngineError::coded(
            Code::DashNoSegmentInfo,
            "single-segment SegmentList needs @duration, a SegmentTimeline, or a period duration",
        ));
    }

    let seg_duration_seconds = match info.duration {
        Some(d) => d as f64 / info.timescale.max(1) as f64,
        None => period_duration.unwrap(),
    };

    let init = init_segment_reference(info);
    let mut out = Vec::with_capacity(n);
    for (i, url) in info.urls.iter().enumerate() {
        let start = period_start + i as f64 * seg_duration_seconds;
        out.push(SegmentReference {
            start_time: start,
            end_time: start + seg_duration_seconds,
            uris: url_uris(url),
            start_byte: url.media_range.map(|(s, _)| s),
            end_byte: url.media_range.and_then(|(_, e)| e),
            init_segment_reference: init.clone(),
            ..Default::default()
        });
    }
    Ok(out)
}

fn url_uris(entry: &SegmentUrlEntry) -> Vec<String> {
    entry.media.clone().into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(media: &str) -> SegmentUrlEntry {
        SegmentUrlEntry {
            media: Some(media.to_string()),
            media_range: None,
        }
    }

    #[test]
    fn fixed_duration_resolves_all_urls() {
        let info = SegmentListInfo {
            urls: vec![url("a.mp4"), url("b.mp4"), url("c.mp4")],
            duration: Some(4),
            timescale: 1,
            timeline: None,
            initialization: None,
        };
        let refs = resolve_segment_list(&info, 0.0, None).unwrap();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[1].start_time, 4.0);
        assert_eq!(refs[2].uris, vec!["c.mp4".to_string()]);
    }

    #[test]
    fn initialization_element_is_shared_across_every_reference() {
        let mut info = SegmentListInfo {
            urls: vec![url("a.mp4"), url("b.mp4")],
            duration: Some(4),
            timescale: 1,
            timeline: None,
            initialization: None,
        };
        info.initialization = Some(InitializationInfo {
            source_url: "init.mp4".to_string(),
            range: Some((0, Some(899))),
        });
        let refs = resolve_segment_list(&info, 0.0, None).unwrap();
        for r in &refs {
            let init = r.init_segment_reference.as_ref().expect("init segment reference");
            assert_eq!(init.uris, vec!["init.mp4".to_string()]);
            assert_eq!(init.start_byte, 0);
            assert_eq!(init.end_byte, Some(899));
        }
    }

    #[test]
    fn multi_segment_without_duration_or_timeline_fails() {
        let info = SegmentListInfo {
            urls: vec![url("a.mp4"), url("b.mp4")],
            duration: None,
            timescale: 1,
            timeline: None,
            initialization: None,
        };
        let err = resolve_segment_list(&info, 0.0, None).unwrap_err();
        assert_eq!(err.code(), Some(Code::DashNoSegmentInfo));
    }

    #[test]
    fn single_segment_falls_back_to_period_duration() {
        let info = SegmentListInfo {
            urls: vec![url("only.mp4")],
            duration: None,
            timescale: 1,
            timeline: None,
            initialization: None,
        };
        let refs = resolve_segment_list(&info, 0.0, Some(10.0)).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].end_time, 10.0);
    }

    #[test]
    fn explicit_empty_timeline_fails() {
        let info = SegmentListInfo {
            urls: vec![url("a.mp4")],
            duration: None,
            timescale: 1,
            timeline: Some(vec![]),
            initialization: None,
        };
        let err = resolve_segment_list(&info, 0.0, None).unwrap_err();
        assert_eq!(err.code(), Some(Code::DashNoSegmentInfo));
    }

    #[test]
    fn url_count_and_timeline_length_mismatch_truncates() {
        let info = SegmentListInfo {
            urls: vec![url("a.mp4"), url("b.mp4")],
            duration: None,
            timescale: 1,
            timeline: Some(vec![
                crate::mpd::segment_info::timeline::STimelineEntry {
                    t: Some(0),
                    d: Some(5),
                    r: 0,
                },
                crate::mpd::segment_info::timeline::STimelineEntry {
                    t: Some(5),
                    d: Some(5),
                    r: 0,
                },
                crate::mpd::segment_info::timeline::STimelineEntry {
                    t: Some(10),
                    d: Some(5),
                    r: 0,
                },
            ]),
            initialization: None,
        };
        let refs = resolve_segment_list(&info, 0.0, None).unwrap();
        assert_eq!(refs.len(), 2);
    }
}
