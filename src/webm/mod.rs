//! WebM Cues/Info parsing (spec.md §4.9) — the WebM counterpart to the
//! ISO-BMFF SIDX parser, producing the same [`SegmentReference`] shape
//! from a Matroska `Cues` element.

pub mod cues;

pub use cues::parse_webm_cues;
