//! DASH MPD parsing (spec.md §4.4-§4.6): XML tree walking, the
//! inheritance-frame stack, per-Representation segment-info resolution, and
//! cross-period stream combination.

pub mod inheritance;
pub mod parser;
pub mod period_combiner;
pub mod segment_info;
pub mod uri_template;
pub mod xml;

pub use parser::{parse_mpd, StreamMap};
