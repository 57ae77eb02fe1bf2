//! `SegmentTimeline` expansion (spec.md §4.5.1).

use tracing::warn;

/// One `<S>` element as parsed from the MPD: `t` (start, timescale units),
/// `d` (duration, timescale units), `r` (repeat count, default 0).
#[derive(Debug, Clone, Copy, Default)]
pub struct STimelineEntry {
    pub t: Option<i64>,
    pub d: Option<i64>,
    pub r: i64,
}

/// One expanded timeline segment, in seconds on the presentation timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineSegment {
    pub start: f64,
    pub end: f64,
    pub unscaled_start: i64,
}

const GAP_TOLERANCE: f64 = 1.0 / 15.0;

/// Expand a `SegmentTimeline`'s `<S>` list into concrete segments.
///
/// `unscaled_pto` is the presentation time offset in timescale units;
/// `period_duration` is the owning Period's duration in seconds, required
/// only when the final `<S>` has `r = -1` and there is no following `<S>`.
pub fn expand_timeline(
    entries: &[STimelineEntry],
    timescale: u64,
    unscaled_pto: i64,
    period_duration: Option<f64>,
) -> Vec<TimelineSegment> {
    let mut out = Vec::new();
    let mut last_end: i64 = -unscaled_pto;
    let timescale = timescale.max(1) as f64;

    for (idx, entry) in entries.iter().enumerate() {
        let mut start = match entry.t {
            Some(t) => t - unscaled_pto,
            None => last_end,
        };

        let Some(d) = entry.d else {
            warn!("SegmentTimeline <S> at index {idx} has no @d; dropping it and all following entries");
            break;
        };
        if d <= 0 {
            warn!("SegmentTimeline <S> at index {idx} has non-positive @d; dropping it and all following entries");
            break;
        }

        let gap = (start - last_end) as f64 / timescale;
        if !out.is_empty() && gap.abs() >= GAP_TOLERANCE {
            warn!("SegmentTimeline gap of {gap:.4}s before entry {idx}; stretching previous entry");
            if let Some(prev) = out.last_mut() {
                let stretched_end = start as f64 / timescale;
                let prev: &mut TimelineSegment = prev;
                prev.end = stretched_end;
            }
        }

        let repeat: i64 = if entry.r >= 0 {
            entry.r
        } else {
            match next_t(entries, idx) {
                Some(next_t) => {
                    if start >= next_t {
                        warn!(
                            "SegmentTimeline <S> at index {idx} starts at or after the next entry's @t; dropping remaining entries"
                        );
                        break;
                    }
                    (((next_t - start) as f64 / d as f64).ceil() as i64) - 1
                }
                None => match period_duration {
                    Some(pd) => {
                        let period_end_ticks = (pd * timescale).round() as i64;
                        (((period_end_ticks - start) as f64 / d as f64).ceil() as i64) - 1
                    }
                    None => {
                        warn!(
                            "SegmentTimeline <S> at index {idx} has r=-1 with no following @t and no finite period duration; emitting a single entry"
                        );
                        0
                    }
                },
            }
        };

        for _ in 0..=repeat.max(0) {
            let end = start + d;
            out.push(TimelineSegment {
                start: start as f64 / timescale,
                end: end as f64 / timescale,
                unscaled_start: start,
            });
            last_end = end;
            start = end;
        }
    }

    out
}

fn next_t(entries: &[STimelineEntry], idx: usize) -> Option<i64> {
    entries.get(idx + 1).and_then(|e| e.t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(t: Option<i64>, d: Option<i64>, r: i64) -> STimelineEntry {
        STimelineEntry { t, d, r }
    }

    #[test]
    fn simple_fixed_duration_no_repeat() {
        let entries = vec![s(Some(0), Some(6), 0), s(Some(6), Some(6), 0)];
        let segs = expand_timeline(&entries, 1, 0, None);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].start, 0.0);
        assert_eq!(segs[1].start, 6.0);
        assert_eq!(segs[1].end, 12.0);
    }

    #[test]
    fn repeat_minus_one_fills_to_period_end() {
        // spec.md §8 scenario 2: d=10, t=0, r=-1, periodDuration=60 => 6 entries [0,10,...,50], last end 60.
        let entries = vec![s(Some(0), Some(10), -1)];
        let segs = expand_timeline(&entries, 1, 0, Some(60.0));
        assert_eq!(segs.len(), 6);
        assert_eq!(segs[0].start, 0.0);
        assert_eq!(segs[5].start, 50.0);
        assert_eq!(segs[5].end, 60.0);
    }

    #[test]
    fn repeat_minus_one_fills_to_next_s_t() {
        let entries = vec![s(Some(0), Some(10), -1), s(Some(40), Some(10), 0)];
        let segs = expand_timeline(&entries, 1, 0, None);
        // repeat = ceil((40-0)/10) - 1 = 3, so 4 entries at 0,10,20,30 then the explicit 40.
        assert_eq!(segs.len(), 5);
        assert_eq!(segs[3].start, 30.0);
        assert_eq!(segs[4].start, 40.0);
    }

    #[test]
    fn missing_t_uses_last_end() {
        let entries = vec![s(Some(0), Some(5), 0), s(None, Some(5), 0)];
        let segs = expand_timeline(&entries, 1, 0, None);
        assert_eq!(segs[1].start, 5.0);
    }

    #[test]
    fn missing_duration_drops_rest() {
        let entries = vec![s(Some(0), Some(5), 0), s(Some(5), None, 0)];
        let segs = expand_timeline(&entries, 1, 0, None);
        assert_eq!(segs.len(), 1);
    }

    #[test]
    fn presentation_time_offset_shifts_start() {
        let entries = vec![s(Some(10), Some(5), 0)];
        let segs = expand_timeline(&entries, 1, 10, None);
        assert_eq!(segs[0].start, 0.0);
    }
}
