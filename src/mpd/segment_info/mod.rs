//! Resolution of a Representation's segment-info source into a concrete
//! [`crate::model::segment_index::SegmentIndex`] (spec.md §4.5: exactly one
//! of `SegmentBase`, `SegmentList`, or `SegmentTemplate` is present on a
//! media Representation).

pub mod segment_base;
pub mod segment_list;
pub mod segment_template;
pub mod timeline;

pub use segment_base::{resolve_segment_base, Container, SegmentBaseInfo};
pub use segment_list::{resolve_segment_list, InitializationInfo, SegmentListInfo, SegmentUrlEntry};
pub use segment_template::{resolve_segment_template, SegmentTemplateInfo};
pub use timeline::{expand_timeline, STimelineEntry, TimelineSegment};

use crate::error::Result;
use crate::model::segment_reference::SegmentReference;
use reqwest::Client;

/// The segment-info source resolved for a single Representation, carrying
/// exactly the data each strategy needs. `SegmentBase` is the only variant
/// requiring a network fetch at resolution time.
#[derive(Debug, Clone)]
pub enum SegmentInfoSource {
    Base(SegmentBaseInfo),
    List(SegmentListInfo),
    Template(SegmentTemplateInfo),
    /// Text/application Representations are exempt from the
    /// exactly-one-of-three rule (spec.md §4.5) and carry no segment index.
    None,
}

impl SegmentInfoSource {
    /// Resolve this source into an ordered list of segment references.
    pub async fn resolve(
        &self,
        client: &Client,
        period_start: f64,
        period_duration: Option<f64>,
        timestamp_offset: f64,
    ) -> Result<Vec<SegmentReference>> {
        match self {
            SegmentInfoSource::Base(info) => {
                resolve_segment_base(info, client, timestamp_offset).await
            }
            SegmentInfoSource::List(info) => {
                resolve_segment_list(info, period_start, period_duration)
            }
            SegmentInfoSource::Template(info) => Ok(resolve_segment_template(
                info,
                period_start,
                period_duration,
            )),
            SegmentInfoSource::None => Ok(Vec::new()),
        }
    }
}
