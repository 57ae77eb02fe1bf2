//! The presentation data model: the types a parsed, live manifest is built
//! from, independent of how they were parsed (MPD XML, SIDX, WebM Cues).

pub mod segment_index;
pub mod segment_reference;
pub mod stream;

pub use segment_index::SegmentIndex;
pub use segment_reference::{InitSegmentReference, QualityInfo, SegmentReference};
pub use stream::{
    ContentType, DrmInfo, Presentation, PresentationTimeline, Stream, StreamId, Variant,
};
