//! `SegmentBase` resolution (spec.md §4.5, SegmentBase): the only
//! segment-info source that needs a network round trip, since the segment
//! sequence lives inside the media container's SIDX (mp4) or Cues (webm)
//! index rather than in the MPD XML itself.

use reqwest::Client;

use crate::error::{Code, EngineError, Result};
use crate::http_retry::{fetch_range_with_retry, RetryConfig};
use crate::model::segment_reference::{InitSegmentReference, SegmentReference};
use crate::mp4::sidx::parse_sidx;
use crate::webm::cues::parse_webm_cues_parts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
    Webm,
}

impl Container {
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        if mime_type.contains("mp4") {
            Some(Container::Mp4)
        } else if mime_type.contains("webm") {
            Some(Container::Webm)
        } else {
            None
        }
    }
}

/// A resolved `SegmentBase` element.
#[derive(Debug, Clone)]
pub struct SegmentBaseInfo {
    /// URL of the media resource the index range and initialization range
    /// are fetched from.
    pub source_url: String,
    pub container: Container,
    /// Inclusive byte range of the index box (`@indexRange` or
    /// `RepresentationIndex@range`).
    pub index_range: (u64, u64),
    /// Inclusive byte range of the `Initialization` element. Required for
    /// WebM (`DASH_WEBM_MISSING_INIT` if absent); optional for mp4.
    pub initialization_range: Option<(u64, u64)>,
}

/// The `InitSegmentReference` every reference a SegmentBase resolves
/// shares: the same `source_url`, addressed by `initialization_range`
/// rather than a distinct URI (spec.md §3 `InitSegmentReference`).
fn init_segment_reference(info: &SegmentBaseInfo) -> Option<InitSegmentReference> {
    let (start, end) = info.initialization_range?;
    Some(InitSegmentReference {
        uris: vec![info.source_url.clone()],
        start_byte: start,
        end_byte: Some(end),
        quality: Default::default(),
    })
}

/// Fetch and parse a `SegmentBase`'s index, returning the ordered segment
/// references it describes.
pub async fn resolve_segment_base(
    info: &SegmentBaseInfo,
    client: &Client,
    timestamp_offset: f64,
) -> Result<Vec<SegmentReference>> {
    let retry = RetryConfig::default();
    let init = init_segment_reference(info);

    let mut refs = match info.container {
        Container::Mp4 => {
            let (start, end) = info.index_range;
            let bytes = fetch_range_with_retry(client, &info.source_url, start, end, &retry)
                .await
                .map_err(EngineError::from)?;
            parse_sidx(&bytes, start, timestamp_offset)?
        }
        Container::Webm => {
            let Some((init_start, init_end)) = info.initialization_range else {
                return Err(EngineError::coded(
                    Code::DashWebmMissingInit,
                    "WebM SegmentBase requires an Initialization byte range",
                ));
            };
            let (index_start, index_end) = info.index_range;
            let init_bytes =
                fetch_range_with_retry(client, &info.source_url, init_start, init_end, &retry)
                    .await
                    .map_err(EngineError::from)?;
            let index_bytes =
                fetch_range_with_retry(client, &info.source_url, index_start, index_end, &retry)
                    .await
                    .map_err(EngineError::from)?;
            parse_webm_cues_parts(&init_bytes, &index_bytes, timestamp_offset)?
        }
    };

    if init.is_some() {
        for r in &mut refs {
            r.init_segment_reference = init.clone();
        }
    }
    Ok(refs)
}
