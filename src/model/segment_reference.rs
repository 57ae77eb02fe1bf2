//! [`SegmentReference`] and [`InitSegmentReference`] — the atoms a
//! [`crate::model::segment_index::SegmentIndex`] is built from.

/// A quality descriptor carried alongside an initialization segment, used
/// when HLS playlist generation needs to describe the variant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QualityInfo {
    pub bandwidth: Option<u64>,
    pub codecs: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u32>,
}

/// The initialization segment (MP4 `ftyp+moov`, or WebM header) a set of
/// media segments depend on.
#[derive(Debug, Clone, PartialEq)]
pub struct InitSegmentReference {
    pub uris: Vec<String>,
    pub start_byte: u64,
    pub end_byte: Option<u64>,
    pub quality: QualityInfo,
}

/// One addressable media segment on the presentation timeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SegmentReference {
    pub start_time: f64,
    pub end_time: f64,
    /// Inclusive byte range start, when the segment is served as a
    /// sub-range of a larger resource (SegmentBase/SIDX).
    pub start_byte: Option<u64>,
    /// Inclusive byte range end; `None` means "to end of file".
    pub end_byte: Option<u64>,
    /// Candidate URIs for this segment; SegmentList/SegmentTemplate usually
    /// produce exactly one, SIDX-produced references leave this empty
    /// (the byte range addresses the shared media resource instead).
    pub uris: Vec<String>,
    /// The init segment this reference depends on, if any.
    pub init_segment_reference: Option<InitSegmentReference>,
    /// Seconds added to the container-internal PTS when this segment is
    /// appended to a source buffer.
    pub timestamp_offset: f64,
    pub append_window_start: Option<f64>,
    pub append_window_end: Option<f64>,
}

impl SegmentReference {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Lazily-resolved URL list; `getUris()` in the spec's vocabulary.
    pub fn get_uris(&self) -> &[String] {
        &self.uris
    }

    /// True when `startTime <= endTime` and, if a byte range is present,
    /// `startByte < endByte`.
    pub fn is_valid(&self) -> bool {
        if self.start_time > self.end_time {
            return false;
        }
        if let (Some(s), Some(e)) = (self.start_byte, self.end_byte) {
            if s >= e {
                return false;
            }
        }
        true
    }

    /// Shift both times by `offset` seconds, used when a period's member
    /// stream indexes are concatenated into a Variant-level index.
    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            start_time: self.start_time + offset,
            end_time: self.end_time + offset,
            ..self.clone()
        }
    }
}
