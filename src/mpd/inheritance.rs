//! The MPD inheritance-frame stack (spec.md §3 `InheritanceFrame`,
//! `Context`), implemented as value-typed, immutable-at-each-level frames
//! rather than a parent-pointer chain (spec.md §9 "Inheritance across MPD
//! levels"): each level is built by cloning its parent and overriding the
//! fields the child XML element actually specifies.

use crate::mpd::xml::XmlElement;

/// Per-level MPD context, inherited top-down (Period -> AdaptationSet ->
/// Representation). Each field is `Option`/empty when absent at this
/// level, in which case the parent's value applies.
#[derive(Debug, Clone, Default)]
pub struct InheritanceFrame {
    pub base_urls: Vec<String>,
    pub segment_base: Option<XmlElement>,
    pub segment_list: Option<XmlElement>,
    pub segment_template: Option<XmlElement>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub content_type: Option<String>,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    pub frame_rate: Option<f64>,
    pub pixel_aspect_ratio: Option<String>,
    pub emsg_uris: Vec<String>,
    pub id: Option<String>,
    pub channel_count: Option<u32>,
    pub sampling_rate: Option<u32>,
    /// Accumulated sum of `@availabilityTimeOffset` across BaseURL,
    /// SegmentBase, and SegmentTemplate along the inheritance chain.
    pub availability_time_offset: f64,
}

impl InheritanceFrame {
    /// Derive a child frame: start from a clone of `self`, then let the
    /// caller override whichever fields the child XML element specifies.
    /// The parent is left untouched.
    pub fn derive(&self) -> Self {
        self.clone()
    }
}

/// The mutable walk state threaded through one full MPD parse.
///
/// Per spec.md §3, `Context` must be shallow-copyable so per-representation
/// segment-index factories can capture an independent snapshot unaffected
/// by later mutation of the walk (e.g. moving on to the next
/// Representation).
#[derive(Debug, Clone)]
pub struct Context {
    pub dynamic: bool,
    pub period: InheritanceFrame,
    pub adaptation_set: InheritanceFrame,
    pub representation: InheritanceFrame,
    pub period_start: f64,
    pub period_duration: Option<f64>,
    pub is_last_period: bool,
    pub bandwidth: u64,
    pub profiles: Vec<String>,
    pub index_range_warning_given: bool,
}

impl Context {
    pub fn new(dynamic: bool) -> Self {
        Self {
            dynamic,
            period: InheritanceFrame::default(),
            adaptation_set: InheritanceFrame::default(),
            representation: InheritanceFrame::default(),
            period_start: 0.0,
            period_duration: None,
            is_last_period: false,
            bandwidth: 0,
            profiles: Vec::new(),
            index_range_warning_given: false,
        }
    }
}

/// Find the first non-null value among Representation, AdaptationSet, and
/// Period frames, in that order (the `inheritAttribute` walk).
pub fn inherit_attribute<'a, T>(
    representation: &'a Option<T>,
    adaptation_set: &'a Option<T>,
    period: &'a Option<T>,
) -> Option<&'a T> {
    representation
        .as_ref()
        .or(adaptation_set.as_ref())
        .or(period.as_ref())
}

/// Find the first matching child element among Representation,
/// AdaptationSet, and Period XML elements (the `inheritChild` walk).
pub fn inherit_child<'a>(
    representation: Option<&'a XmlElement>,
    adaptation_set: Option<&'a XmlElement>,
    period: Option<&'a XmlElement>,
    name: &str,
) -> Option<&'a XmlElement> {
    representation
        .and_then(|e| e.child_named(name))
        .or_else(|| adaptation_set.and_then(|e| e.child_named(name)))
        .or_else(|| period.and_then(|e| e.child_named(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_copies_parent_fields() {
        let mut parent = InheritanceFrame::default();
        parent.width = Some(1920);
        parent.base_urls = vec!["https://a.example.com/".to_string()];
        let child = parent.derive();
        assert_eq!(child.width, Some(1920));
        assert_eq!(child.base_urls, parent.base_urls);
    }

    #[test]
    fn inherit_attribute_prefers_most_specific() {
        let period = Some(1);
        let adaptation_set = Some(2);
        let representation: Option<i32> = None;
        assert_eq!(
            inherit_attribute(&representation, &adaptation_set, &period),
            Some(&2)
        );
    }
}
