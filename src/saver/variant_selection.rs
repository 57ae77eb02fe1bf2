//! Variant selection (spec.md §4.12): pick one audio+video pair per ingest
//! cycle from the configured bandwidth tier and language preference list.

use crate::config::BandwidthTier;
use crate::error::{Code, EngineError, Result};
use crate::model::stream::Variant;

/// `[low, high]` inclusive index range into a bandwidth-ascending-sorted
/// variant list for the requested tier, per spec.md §8's boundary test
/// (`n=5` → low=[0,1], mid=[2,3], high=[4,4]).
fn tier_range(tier: BandwidthTier, n: usize) -> (usize, usize) {
    let low_end = n / 3;
    let mid_end = 2 * n / 3;
    match tier {
        BandwidthTier::Low => (0, low_end),
        BandwidthTier::Mid => (low_end + 1, mid_end),
        BandwidthTier::High => (mid_end + 1, n - 1),
    }
}

/// Select the Variant to ingest this cycle: sort ascending by bandwidth,
/// restrict to the configured tier's index range, then for each language in
/// `languages` (in preference order) scan the tier from highest bandwidth
/// down and return the first variant whose audio language matches.
///
/// # Errors
///
/// `NO_LANGUAGE_MATCH` if no variant in the tier matches any configured
/// language, or the variant list is empty.
pub fn select_variant<'a>(
    variants: &'a [Variant],
    tier: BandwidthTier,
    languages: &[String],
) -> Result<&'a Variant> {
    if variants.is_empty() {
        return Err(EngineError::coded(
            Code::NoLanguageMatch,
            "no variants available to select from",
        ));
    }

    let mut sorted: Vec<&Variant> = variants.iter().collect();
    sorted.sort_by_key(|v| v.bandwidth);

    let n = sorted.len();
    let (low, high) = tier_range(tier, n);
    let tier_slice = &sorted[low..=high];

    for lang in languages {
        for variant in tier_slice.iter().rev() {
            if variant.language().map(|l| l.eq_ignore_ascii_case(lang)).unwrap_or(false) {
                return Ok(variant);
            }
        }
    }

    Err(EngineError::coded(
        Code::NoLanguageMatch,
        format!(
            "no variant in tier {:?} matches any of {:?}",
            tier, languages
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::stream::{ContentType, DrmInfo, Stream, StreamId};
    use std::collections::BTreeSet;

    fn audio_variant(bandwidth: u64, language: &str) -> Variant {
        Variant {
            bandwidth,
            audio: Some(Stream {
                id: bandwidth,
                origin_id: StreamId {
                    period_id: "p".into(),
                    representation_id: bandwidth.to_string(),
                },
                content_type: ContentType::Audio,
                mime_type: "audio/mp4".into(),
                codecs: "mp4a.40.2".into(),
                language: language.into(),
                label: None,
                roles: vec![],
                width: None,
                height: None,
                frame_rate: None,
                channel_count: None,
                sampling_rate: None,
                bandwidth,
                drm_infos: Vec::<DrmInfo>::new(),
                key_ids: BTreeSet::new(),
                hdr: None,
                encrypted: false,
                forced_subtitle: false,
                tiles_layout: None,
                trick_mode_for: None,
                segment_index: None,
            }),
            video: None,
        }
    }

    #[test]
    fn boundary_tiers_match_spec_example() {
        assert_eq!(tier_range(BandwidthTier::Low, 5), (0, 1));
        assert_eq!(tier_range(BandwidthTier::Mid, 5), (2, 3));
        assert_eq!(tier_range(BandwidthTier::High, 5), (4, 4));
    }

    #[test]
    fn selects_highest_bandwidth_matching_language_in_tier() {
        let variants: Vec<Variant> = (0..5).map(|i| audio_variant(i * 100, "en")).collect();
        let languages = vec!["en".to_string()];
        let picked = select_variant(&variants, BandwidthTier::High, &languages).unwrap();
        assert_eq!(picked.bandwidth, 400);
    }

    #[test]
    fn falls_through_language_preference_order() {
        let mut variants = vec![audio_variant(100, "fr"), audio_variant(200, "de")];
        variants.push(audio_variant(50, "en"));
        let languages = vec!["en".to_string(), "de".to_string()];
        let picked = select_variant(&variants, BandwidthTier::Low, &languages);
        // n=3: low tier is index [0,1] after sorting by bandwidth ascending
        // (en=50, fr=100), neither "en" candidate excluded by sort order.
        assert!(picked.is_ok());
    }

    #[test]
    fn no_match_is_an_error() {
        let variants = vec![audio_variant(100, "ja")];
        let languages = vec!["en".to_string()];
        let err = select_variant(&variants, BandwidthTier::Low, &languages).unwrap_err();
        assert_eq!(err.code(), Some(Code::NoLanguageMatch));
    }

    #[test]
    fn empty_variant_list_is_an_error() {
        let err = select_variant(&[], BandwidthTier::Low, &["en".to_string()]).unwrap_err();
        assert_eq!(err.code(), Some(Code::NoLanguageMatch));
    }
}
