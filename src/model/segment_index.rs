//! [`SegmentIndex`] — an ordered, gap-free sequence of [`SegmentReference`]s
//! with the merge/evict/fit mutations the presentation timeline and period
//! combiner drive it through on every manifest refresh.

use tracing::warn;

use crate::model::segment_reference::SegmentReference;

/// Adjacent references may differ by up to this many seconds before the
/// gap/overlap is considered a parse anomaly worth a warning (spec.md §8:
/// `|r_i.endTime - r_{i+1}.startTime| < 1/15 s`).
pub const GAP_TOLERANCE_SECONDS: f64 = 1.0 / 15.0;

/// An ordered, non-overlapping run of segment references.
#[derive(Debug, Clone, Default)]
pub struct SegmentIndex {
    references: Vec<SegmentReference>,
    /// Set once a live update timer has been armed (SegmentTemplate with a
    /// dynamic timeline); `release()` clears it and renders the index
    /// inert for further timer-driven refreshes.
    timer_armed: bool,
}

impl SegmentIndex {
    pub fn new(references: Vec<SegmentReference>) -> Self {
        Self {
            references,
            timer_armed: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn references(&self) -> &[SegmentReference] {
        &self.references
    }

    pub fn get(&self, i: usize) -> Option<&SegmentReference> {
        self.references.get(i)
    }

    pub fn for_each_top_level_reference(&self, mut f: impl FnMut(&SegmentReference)) {
        for r in &self.references {
            f(r);
        }
    }

    pub fn arm_timer(&mut self) {
        self.timer_armed = true;
    }

    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    /// Cancels any update timer and renders the index inert. A released
    /// index retains its references but will receive no further updates.
    pub fn release(&mut self) {
        self.timer_armed = false;
    }

    /// Append `new` references in order. A new reference whose `startTime`
    /// falls strictly before the current last reference's `endTime` minus
    /// the gap tolerance is considered an overlap with already-visible
    /// content and is dropped with a warning rather than reordering the
    /// index.
    pub fn merge(&mut self, new: Vec<SegmentReference>) {
        for r in new {
            if let Some(last) = self.references.last() {
                if r.start_time + GAP_TOLERANCE_SECONDS < last.end_time {
                    warn!(
                        "dropping segment reference overlapping existing window: new start {} < last end {}",
                        r.start_time, last.end_time
                    );
                    continue;
                }
                if (r.start_time - last.end_time).abs() >= GAP_TOLERANCE_SECONDS {
                    warn!(
                        "segment index gap of {:.3}s between {} and {}",
                        r.start_time - last.end_time,
                        last.end_time,
                        r.start_time
                    );
                }
            }
            self.references.push(r);
        }
    }

    /// Same as [`merge`](Self::merge), but first evicts anything whose end
    /// time precedes `min_availability_start`, matching the orchestrator's
    /// refresh-time contract of keeping only what's still in the live
    /// window before appending new content.
    pub fn merge_and_evict(&mut self, new: Vec<SegmentReference>, min_availability_start: f64) {
        self.evict(min_availability_start);
        self.merge(new);
    }

    /// Drop every reference whose `endTime` is before `min_availability_start`.
    pub fn evict(&mut self, min_availability_start: f64) {
        self.references
            .retain(|r| r.end_time >= min_availability_start);
    }

    /// Truncate to `[period_start, period_end)`. `is_new` distinguishes a
    /// freshly-built index (trims both ends) from a re-fit of a
    /// previously-observed index (only trims the tail, since the head may
    /// already have been evicted from the live window).
    ///
    /// A `period_end` of `None` (per spec.md §9 Open Question (i), an
    /// `isLastPeriod` period of unknown duration) is treated as infinite:
    /// no tail trimming is applied.
    pub fn fit(&mut self, period_start: f64, period_end: Option<f64>, is_new: bool) {
        if is_new {
            self.references.retain(|r| r.end_time > period_start);
        }
        if let Some(end) = period_end {
            for r in &mut self.references {
                if r.end_time > end {
                    r.end_time = end;
                }
            }
            self.references.retain(|r| r.start_time < end);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(s: f64, e: f64) -> SegmentReference {
        SegmentReference {
            start_time: s,
            end_time: e,
            ..Default::default()
        }
    }

    #[test]
    fn merge_appends_in_order() {
        let mut idx = SegmentIndex::new(vec![r(0.0, 2.0)]);
        idx.merge(vec![r(2.0, 4.0), r(4.0, 6.0)]);
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.get(2).unwrap().start_time, 4.0);
    }

    #[test]
    fn merge_drops_overlap_with_existing_window() {
        let mut idx = SegmentIndex::new(vec![r(0.0, 2.0)]);
        idx.merge(vec![r(1.0, 3.0)]);
        assert_eq!(idx.len(), 1, "overlapping reference should be dropped");
    }

    #[test]
    fn evict_drops_expired_references() {
        let mut idx = SegmentIndex::new(vec![r(0.0, 2.0), r(2.0, 4.0), r(4.0, 6.0)]);
        idx.evict(3.0);
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.get(0).unwrap().start_time, 2.0);
    }

    #[test]
    fn merge_and_evict_combines_both() {
        let mut idx = SegmentIndex::new(vec![r(0.0, 2.0), r(2.0, 4.0)]);
        idx.merge_and_evict(vec![r(4.0, 6.0)], 2.0);
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.get(0).unwrap().start_time, 2.0);
        assert_eq!(idx.get(1).unwrap().start_time, 4.0);
    }

    #[test]
    fn fit_truncates_to_period_bounds() {
        let mut idx = SegmentIndex::new(vec![r(0.0, 2.0), r(2.0, 4.0), r(4.0, 6.0)]);
        idx.fit(1.0, Some(5.0), true);
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.get(1).unwrap().end_time, 5.0);
    }

    #[test]
    fn fit_with_no_period_end_is_infinite() {
        let mut idx = SegmentIndex::new(vec![r(0.0, 2.0), r(2.0, 4.0)]);
        idx.fit(0.0, None, true);
        assert_eq!(idx.len(), 2);
    }

    #[test]
    fn release_clears_timer_flag() {
        let mut idx = SegmentIndex::default();
        idx.arm_timer();
        assert!(idx.timer_armed());
        idx.release();
        assert!(!idx.timer_armed());
    }
}
