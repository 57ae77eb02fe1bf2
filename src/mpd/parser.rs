//! The top-level MPD parser (spec.md §4.4): XML bytes in, a [`Presentation`]
//! out, built by walking Period -> AdaptationSet -> Representation while
//! threading an [`InheritanceFrame`] stack and resolving each
//! Representation's segment-info source.

use std::collections::{BTreeSet, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use reqwest::Client;
use tracing::warn;
use url::Url;

use crate::drm::content_protection::{
    intersect_with_adaptation_set, parse_content_protection, ContentProtectionElement,
};
use crate::error::{Code, EngineError, Result};
use crate::http_retry::{fetch_with_retry, RetryConfig};
use crate::model::segment_index::SegmentIndex;
use crate::model::segment_reference::SegmentReference;
use crate::model::stream::{ContentType, DrmInfo, Presentation, PresentationTimeline, Stream, StreamId};
use crate::mpd::inheritance::{Context, InheritanceFrame};
use crate::mpd::period_combiner::{combine_periods, PeriodStreams};
use crate::mpd::segment_info::segment_base::{Container, SegmentBaseInfo};
use crate::mpd::segment_info::segment_list::{InitializationInfo, SegmentListInfo, SegmentUrlEntry};
use crate::mpd::segment_info::segment_template::SegmentTemplateInfo;
use crate::mpd::segment_info::timeline::STimelineEntry;
use crate::mpd::segment_info::SegmentInfoSource;
use crate::mpd::xml::{parse_iso8601_datetime, parse_iso8601_duration, parse_xml_tree, XmlElement};

/// The stream map the orchestrator owns across refreshes, keyed by
/// `(period.id, representation.id)` (spec.md §4.10, §5 shared resource (a)).
pub type StreamMap = DashMap<StreamId, Stream>;

/// Parse an MPD document into a full [`Presentation`], resolving every
/// Representation's segment index over the network where needed
/// (SegmentBase) and merging against `previous_streams` for streams already
/// observed on an earlier refresh.
pub async fn parse_mpd(
    xml_bytes: &[u8],
    manifest_uri: &str,
    client: &Client,
    previous_streams: &StreamMap,
) -> Result<Presentation> {
    let root = parse_xml_tree(xml_bytes)?;
    if root.name != "MPD" {
        return Err(EngineError::coded(
            Code::DashInvalidXml,
            format!("root element is '{}', expected 'MPD'", root.name),
        ));
    }

    let is_dynamic = root.attr("type") == Some("dynamic");
    let min_buffer_time = root
        .attr("minBufferTime")
        .and_then(parse_iso8601_duration)
        .unwrap_or(2.0);
    let minimum_update_period = root.attr("minimumUpdatePeriod").and_then(parse_iso8601_duration);
    let availability_start_time = root
        .attr("availabilityStartTime")
        .and_then(parse_iso8601_datetime)
        .unwrap_or(0.0);
    let time_shift_buffer_depth = root.attr("timeShiftBufferDepth").and_then(parse_iso8601_duration);
    let suggested_presentation_delay = root
        .attr("suggestedPresentationDelay")
        .and_then(parse_iso8601_duration)
        .unwrap_or(1.5 * min_buffer_time);
    let max_segment_duration = root.attr("maxSegmentDuration").and_then(parse_iso8601_duration);
    let media_presentation_duration = root
        .attr("mediaPresentationDuration")
        .and_then(parse_iso8601_duration);
    let profiles: Vec<String> = root
        .attr("profiles")
        .map(|p| p.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();

    let mut timeline = PresentationTimeline::new(availability_start_time);
    timeline.set_static(!is_dynamic);
    timeline.presentation_delay = suggested_presentation_delay;
    if let Some(d) = media_presentation_duration {
        timeline.set_duration(d);
    }
    if let Some(depth) = time_shift_buffer_depth {
        timeline.segment_availability_duration = depth;
    }
    if let Some(d) = max_segment_duration {
        timeline.notify_max_segment_duration(d);
    }

    let root_base_urls = resolve_base_urls(&[], &root);

    let mut root_frame = InheritanceFrame::default();
    root_frame.base_urls = root_base_urls;
    root_frame.availability_time_offset = availability_time_offset_of(&root);

    let periods_xml: Vec<&XmlElement> = root.children_named("Period").collect();
    if periods_xml.is_empty() {
        return Err(EngineError::coded(
            Code::DashInvalidXml,
            "MPD has no Period elements",
        ));
    }

    let mut id_counter: u64 = 0;
    let mut period_infos: Vec<PeriodStreams> = Vec::with_capacity(periods_xml.len());
    let mut all_period_starts: Vec<f64> = Vec::with_capacity(periods_xml.len());

    // Pass 1: derive each period's start time from document order.
    let mut cursor = 0.0;
    for el in &periods_xml {
        let start = el
            .attr("start")
            .and_then(parse_iso8601_duration)
            .unwrap_or(cursor);
        all_period_starts.push(start);
        cursor = start;
    }

    let now_wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    let min_availability_start = if is_dynamic {
        let end = timeline.get_segment_availability_end(now_wall);
        (end - timeline.segment_availability_duration).max(0.0)
    } else {
        0.0
    };

    for (idx, period_el) in periods_xml.iter().enumerate() {
        let is_last = idx + 1 == periods_xml.len();
        let start = all_period_starts[idx];
        let duration = if !is_last {
            Some(all_period_starts[idx + 1] - start)
        } else if let Some(total) = media_presentation_duration {
            Some(total - start)
        } else {
            period_el.attr("duration").and_then(parse_iso8601_duration)
        };
        let period_end = duration.map(|d| start + d);

        let period_id = period_el
            .attr("id")
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("__sp_period_{start}"));

        let mut period_frame = root_frame.derive();
        period_frame.base_urls = resolve_base_urls(&period_frame.base_urls, period_el);
        period_frame.availability_time_offset += availability_time_offset_of(period_el);

        let mut ctx = Context::new(is_dynamic);
        ctx.period = period_frame;
        ctx.period_start = start;
        ctx.period_duration = duration;
        ctx.is_last_period = is_last;
        ctx.profiles = profiles.clone();

        let mut streams = PeriodStreams {
            period_id: period_id.clone(),
            period_start: start,
            ..Default::default()
        };

        let mut seen_representation_ids: BTreeSet<String> = BTreeSet::new();

        // Bookkeeping for trickModeFor association (spec.md §4.4 step 5):
        // codec bases of every non-trickmode AdaptationSet, keyed by its
        // `id`, and the pending trickmode sets' referenced id, codec bases,
        // and the stream slots they produced, resolved once the period's
        // AdaptationSets have all been walked.
        let mut normal_codec_bases: HashMap<String, BTreeSet<String>> = HashMap::new();
        let mut trickmode_entries: Vec<(Option<String>, BTreeSet<String>, Vec<(ContentType, usize)>)> =
            Vec::new();

        if period_el.children_named("AdaptationSet").next().is_none() {
            warn!("period {period_id} has no AdaptationSet children");
        }

        for adaptation_el in period_el.children_named("AdaptationSet") {
            if adaptation_dropped_by_essential_property(adaptation_el) {
                warn!(
                    "period {period_id}: dropping AdaptationSet with unrecognized EssentialProperty"
                );
                continue;
            }

            let mut adaptation_frame = ctx.period.derive();
            apply_common_attributes(&mut adaptation_frame, adaptation_el);
            adaptation_frame.base_urls = resolve_base_urls(&adaptation_frame.base_urls, adaptation_el);
            adaptation_frame.availability_time_offset += availability_time_offset_of(adaptation_el);

            let (roles, forced_subtitle) = parse_roles(adaptation_el);
            let language = adaptation_el
                .attr("lang")
                .unwrap_or("und")
                .to_ascii_lowercase();
            let label = adaptation_el
                .child_named("Label")
                .map(|l| l.text_trimmed().to_string());
            let adaptation_id = adaptation_el.attr("id").map(|s| s.to_string());
            let trickmode_ref = trick_mode_for_value(adaptation_el);
            let video_range = video_range_from_cicp(adaptation_el).map(|s| s.to_string());

            let adaptation_cp_elements = content_protection_elements(adaptation_el);
            let adaptation_cp = parse_content_protection(&adaptation_cp_elements)?;
            let mut adaptation_drm_running = adaptation_cp.drm_infos.clone();

            if adaptation_el.children_named("Representation").next().is_none() {
                warn!("period {period_id}: AdaptationSet has no Representations");
                continue;
            }

            let mut this_adaptation_codec_bases: BTreeSet<String> = BTreeSet::new();
            let mut this_adaptation_stream_indices: Vec<(ContentType, usize)> = Vec::new();

            for representation_el in adaptation_el.children_named("Representation") {
                let rep_id = representation_el
                    .attr("id")
                    .unwrap_or("")
                    .to_string();

                if is_dynamic {
                    if !seen_representation_ids.insert(rep_id.clone()) {
                        return Err(EngineError::coded(
                            Code::DashDuplicateRepresentationId,
                            format!("duplicate Representation id '{rep_id}' in period '{period_id}'"),
                        ));
                    }
                }

                let mut rep_frame = adaptation_frame.derive();
                apply_common_attributes(&mut rep_frame, representation_el);
                rep_frame.base_urls = resolve_base_urls(&rep_frame.base_urls, representation_el);

                let bandwidth: u64 = representation_el
                    .attr("bandwidth")
                    .and_then(|b| b.parse().ok())
                    .unwrap_or(0);

                let mime_type = rep_frame
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let content_type = rep_frame
                    .content_type
                    .as_deref()
                    .and_then(ContentType::from_mime_or_str)
                    .or_else(|| ContentType::from_mime_or_str(&mime_type))
                    .unwrap_or(ContentType::Application);

                let source_url = rep_frame
                    .base_urls
                    .first()
                    .cloned()
                    .unwrap_or_else(|| manifest_uri.to_string());

                let info_source = resolve_segment_info_source(
                    representation_el,
                    adaptation_el,
                    period_el,
                    &rep_frame,
                    &rep_id,
                    bandwidth,
                    &mime_type,
                    &source_url,
                    content_type,
                )?;

                let rep_cp_elements = content_protection_elements(representation_el);
                let rep_cp = if rep_cp_elements.is_empty() {
                    adaptation_cp.clone()
                } else {
                    parse_content_protection(&rep_cp_elements)?
                };
                intersect_with_adaptation_set(&mut adaptation_drm_running, &rep_cp.drm_infos)?;
                let drm_infos: Vec<DrmInfo> = adaptation_drm_running.clone();

                let mut key_ids = adaptation_cp.default_key_ids.clone();
                key_ids.extend(rep_cp.default_key_ids.iter().cloned());
                let encrypted = !drm_infos.is_empty() || !key_ids.is_empty();

                let fresh_refs = info_source
                    .resolve(client, start, duration, 0.0)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("period {period_id} representation {rep_id}: segment resolution failed: {e}");
                        Vec::new()
                    });
                timeline.notify_segments(&fresh_refs);

                let stream_id = StreamId {
                    period_id: period_id.clone(),
                    representation_id: rep_id.clone(),
                };
                let segment_index = build_segment_index(
                    previous_streams,
                    &stream_id,
                    fresh_refs,
                    start,
                    period_end,
                    min_availability_start,
                );

                id_counter += 1;
                let stream = Stream {
                    id: id_counter,
                    origin_id: stream_id.clone(),
                    content_type,
                    mime_type,
                    codecs: rep_frame.codecs.clone().unwrap_or_default(),
                    language: language.clone(),
                    label: label.clone(),
                    roles: roles.clone(),
                    width: rep_frame.width,
                    height: rep_frame.height,
                    frame_rate: rep_frame.frame_rate,
                    channel_count: rep_frame.channel_count,
                    sampling_rate: rep_frame.sampling_rate,
                    bandwidth,
                    drm_infos,
                    key_ids,
                    hdr: video_range.clone(),
                    encrypted,
                    forced_subtitle,
                    tiles_layout: None,
                    trick_mode_for: None,
                    segment_index: Some(segment_index),
                };

                if let Some(base) = codec_base(&stream.codecs) {
                    this_adaptation_codec_bases.insert(base.to_string());
                }

                previous_streams.insert(stream_id, stream.clone());

                match content_type {
                    ContentType::Audio => {
                        streams.audio.push(stream);
                        this_adaptation_stream_indices.push((ContentType::Audio, streams.audio.len() - 1));
                    }
                    ContentType::Video => {
                        streams.video.push(stream);
                        this_adaptation_stream_indices.push((ContentType::Video, streams.video.len() - 1));
                    }
                    ContentType::Text => {
                        streams.text.push(stream);
                        this_adaptation_stream_indices.push((ContentType::Text, streams.text.len() - 1));
                    }
                    ContentType::Image => {
                        streams.image.push(stream);
                        this_adaptation_stream_indices.push((ContentType::Image, streams.image.len() - 1));
                    }
                    ContentType::Application => {}
                }
            }

            if trickmode_ref.is_some() {
                trickmode_entries.push((trickmode_ref, this_adaptation_codec_bases, this_adaptation_stream_indices));
            } else if let Some(id) = adaptation_id {
                normal_codec_bases
                    .entry(id)
                    .or_default()
                    .extend(this_adaptation_codec_bases);
            }
        }

        for (referenced_id, codec_bases, indices) in trickmode_entries {
            let matched = referenced_id
                .as_ref()
                .and_then(|rid| normal_codec_bases.get(rid))
                .filter(|bases| bases.iter().any(|b| codec_bases.contains(b)))
                .map(|_| referenced_id.clone().unwrap())
                .or_else(|| {
                    normal_codec_bases
                        .iter()
                        .find(|(_, bases)| bases.iter().any(|b| codec_bases.contains(b)))
                        .map(|(id, _)| id.clone())
                });

            match matched {
                Some(id) => {
                    for (content_type, idx) in indices {
                        let slot = match content_type {
                            ContentType::Audio => streams.audio.get_mut(idx),
                            ContentType::Video => streams.video.get_mut(idx),
                            ContentType::Text => streams.text.get_mut(idx),
                            ContentType::Image => streams.image.get_mut(idx),
                            ContentType::Application => None,
                        };
                        if let Some(stream) = slot {
                            stream.trick_mode_for = Some(id.clone());
                        }
                    }
                }
                None => warn!(
                    "period {period_id}: trickmode AdaptationSet referencing '{referenced_id:?}' had no codec-base match"
                ),
            }
        }

        period_infos.push(streams);
    }

    let (variants, text_streams, image_streams) = combine_periods(&period_infos);

    let mut presentation = Presentation::new(timeline);
    presentation.variants = variants;
    presentation.text_streams = text_streams;
    presentation.image_streams = image_streams;
    presentation.min_buffer_time = min_buffer_time;
    presentation.minimum_update_period = minimum_update_period;

    if let Some(utc_timing) = root.child_named("UTCTiming") {
        match resolve_utc_timing(utc_timing, client).await {
            Ok(offset_ms) => presentation.timeline.set_clock_offset(offset_ms),
            Err(e) => warn!("UTCTiming resolution failed: {e}"),
        }
    }

    Ok(presentation)
}

fn build_segment_index(
    previous_streams: &StreamMap,
    stream_id: &StreamId,
    fresh_refs: Vec<SegmentReference>,
    period_start: f64,
    period_end: Option<f64>,
    min_availability_start: f64,
) -> SegmentIndex {
    if let Some(previous) = previous_streams.get(stream_id) {
        if let Some(mut index) = previous.segment_index.clone() {
            index.merge_and_evict(fresh_refs, min_availability_start);
            index.fit(period_start, period_end, false);
            return index;
        }
    }
    let mut index = SegmentIndex::new(fresh_refs);
    index.fit(period_start, period_end, true);
    index
}

/// Copy the scalar attributes a frame may override at this level (spec.md
/// §3 InheritanceFrame fields that cascade per-level rather than as whole
/// child elements).
fn apply_common_attributes(frame: &mut InheritanceFrame, el: &XmlElement) {
    if let Some(w) = el.attr("width").and_then(|v| v.parse().ok()) {
        frame.width = Some(w);
    }
    if let Some(h) = el.attr("height").and_then(|v| v.parse().ok()) {
        frame.height = Some(h);
    }
    if let Some(ct) = el.attr("contentType") {
        frame.content_type = Some(ct.to_string());
    }
    if let Some(mt) = el.attr("mimeType") {
        frame.mime_type = Some(mt.to_string());
    }
    if let Some(c) = el.attr("codecs") {
        frame.codecs = Some(c.to_string());
    }
    if let Some(fr) = el.attr("frameRate").and_then(parse_frame_rate) {
        frame.frame_rate = Some(fr);
    }
    if let Some(par) = el.attr("par") {
        frame.pixel_aspect_ratio = Some(par.to_string());
    }
    if let Some(id) = el.attr("id") {
        frame.id = Some(id.to_string());
    }
    if let Some(cc) = el
        .child_named("AudioChannelConfiguration")
        .and_then(|c| c.attr("value"))
        .and_then(|v| v.parse().ok())
    {
        frame.channel_count = Some(cc);
    }
    if let Some(sr) = el.attr("audioSamplingRate").and_then(|v| v.parse().ok()) {
        frame.sampling_rate = Some(sr);
    }
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den == 0.0 {
            None
        } else {
            Some(num / den)
        }
    } else {
        s.parse().ok()
    }
}

fn resolve_base_urls(parent_urls: &[String], element: &XmlElement) -> Vec<String> {
    let own: Vec<&str> = element
        .children_named("BaseURL")
        .map(|e| e.text_trimmed())
        .filter(|s| !s.is_empty())
        .collect();
    if own.is_empty() {
        return parent_urls.to_vec();
    }
    let mut out = Vec::with_capacity(own.len().max(1));
    for b in own {
        if let Some(parent) = parent_urls.first() {
            match Url::parse(parent).and_then(|base| base.join(b)) {
                Ok(joined) => out.push(joined.to_string()),
                Err(_) => out.push(b.to_string()),
            }
        } else {
            out.push(b.to_string());
        }
    }
    out
}

fn availability_time_offset_of(element: &XmlElement) -> f64 {
    let mut total = 0.0;
    for base in element.children_named("BaseURL") {
        if let Some(v) = base.attr("availabilityTimeOffset").and_then(|v| v.parse::<f64>().ok()) {
            total += v;
        }
    }
    for name in ["SegmentBase", "SegmentTemplate"] {
        if let Some(el) = element.child_named(name) {
            if let Some(v) = el.attr("availabilityTimeOffset").and_then(|v| v.parse::<f64>().ok()) {
                total += v;
            }
        }
    }
    total
}

const ROLE_SCHEME: &str = "urn:mpeg:dash:role:2011";

fn parse_roles(adaptation_el: &XmlElement) -> (Vec<String>, bool) {
    let mut roles = Vec::new();
    let mut forced_subtitle = false;
    for role_el in adaptation_el.children_named("Role") {
        let scheme = role_el.attr("schemeIdUri").unwrap_or("");
        let value = role_el.attr("value").unwrap_or("");
        if scheme.eq_ignore_ascii_case(ROLE_SCHEME) {
            roles.push(value.to_string());
            if value == "forced_subtitle" || value == "forced-subtitle" {
                forced_subtitle = true;
            }
        }
    }
    (roles, forced_subtitle)
}

const TRICKMODE_SCHEME: &str = "http://dashif.org/guidelines/trickmode";
const CICP_TRANSFER_SCHEME: &str = "urn:mpeg:mpegb:cicp:transfercharacteristics";

/// True if this AdaptationSet should be dropped entirely: any
/// `EssentialProperty` whose `schemeIdUri` is not the trickmode scheme makes
/// the set unplayable by a conforming client, so the whole set is silently
/// dropped (spec.md §4.4 step 5).
fn adaptation_dropped_by_essential_property(adaptation_el: &XmlElement) -> bool {
    adaptation_el
        .children_named("EssentialProperty")
        .any(|p| {
            let scheme = p.attr("schemeIdUri").unwrap_or("").to_ascii_lowercase();
            scheme != TRICKMODE_SCHEME
        })
}

/// The `@value` of a `http://dashif.org/guidelines/trickmode`
/// `EssentialProperty`, if this AdaptationSet is a trick-mode rendition: the
/// `id` of the normal AdaptationSet it is a trick-mode version of (spec.md
/// §4.4 step 5). The association itself is resolved later, by matching
/// codec base, once every AdaptationSet in the period has been parsed.
fn trick_mode_for_value(adaptation_el: &XmlElement) -> Option<String> {
    adaptation_el
        .children_named("EssentialProperty")
        .find(|p| {
            p.attr("schemeIdUri")
                .map(|s| s.eq_ignore_ascii_case(TRICKMODE_SCHEME))
                .unwrap_or(false)
        })
        .and_then(|p| p.attr("value"))
        .map(|v| v.to_string())
}

/// First codec's base token (before any `.` profile/level suffix), the unit
/// `trickModeFor` association is matched on (spec.md §4.4 step 5).
fn codec_base(codecs: &str) -> Option<&str> {
    codecs
        .split(',')
        .next()
        .map(str::trim)
        .and_then(|c| c.split('.').next())
        .filter(|c| !c.is_empty())
}

/// CICP TransferCharacteristics -> video range, per ITU-T H.273 (only the
/// values DASH-IF's guidelines actually use in practice are mapped; anything
/// else is left unclassified rather than guessed).
fn video_range_from_cicp(adaptation_el: &XmlElement) -> Option<&'static str> {
    adaptation_el
        .children_named("SupplementalProperty")
        .find(|p| {
            p.attr("schemeIdUri")
                .map(|s| s.eq_ignore_ascii_case(CICP_TRANSFER_SCHEME))
                .unwrap_or(false)
        })
        .and_then(|p| p.attr("value"))
        .and_then(|v| match v {
            "1" | "6" | "13" | "14" | "15" => Some("SDR"),
            "16" => Some("PQ"),
            "18" => Some("HLG"),
            _ => None,
        })
}

fn content_protection_elements(el: &XmlElement) -> Vec<ContentProtectionElement> {
    el.children_named("ContentProtection")
        .map(|cp| {
            let scheme_id_uri = cp.attr("schemeIdUri").unwrap_or("").to_string();
            let default_kid = cp
                .attrs
                .iter()
                .find(|(k, _)| k.ends_with("default_KID"))
                .map(|(_, v)| v.clone());
            let cenc_pssh_base64 = cp
                .children
                .iter()
                .find(|c| c.name.ends_with("pssh"))
                .map(|c| c.text_trimmed().to_string());
            let widevine_laurl = cp
                .children
                .iter()
                .find(|c| c.name.ends_with("laurl"))
                .and_then(|c| c.attr("licenseUrl").map(|s| s.to_string()));
            let clearkey_laurl = cp
                .children
                .iter()
                .find(|c| c.name.to_ascii_lowercase().contains("laurl") && c.attr("Lic_type").is_some())
                .map(|c| c.text_trimmed().to_string());
            let playready_pro_base64 = cp
                .children
                .iter()
                .find(|c| c.name.ends_with("pro"))
                .map(|c| c.text_trimmed().to_string());
            ContentProtectionElement {
                scheme_id_uri,
                default_kid,
                cenc_pssh_base64,
                widevine_laurl,
                clearkey_laurl,
                playready_pro_base64,
            }
        })
        .collect()
}

/// Resolve a Representation's segment-info source (spec.md §4.5): exactly
/// one of SegmentBase/SegmentList/SegmentTemplate must be present, except
/// for text/application content which may have none.
#[allow(clippy::too_many_arguments)]
fn resolve_segment_info_source(
    representation_el: &XmlElement,
    adaptation_el: &XmlElement,
    period_el: &XmlElement,
    frame: &InheritanceFrame,
    representation_id: &str,
    bandwidth: u64,
    mime_type: &str,
    source_url: &str,
    content_type: ContentType,
) -> Result<SegmentInfoSource> {
    let segment_base = crate::mpd::inheritance::inherit_child(
        Some(representation_el),
        Some(adaptation_el),
        Some(period_el),
        "SegmentBase",
    );
    let segment_list = crate::mpd::inheritance::inherit_child(
        Some(representation_el),
        Some(adaptation_el),
        Some(period_el),
        "SegmentList",
    );
    let segment_template = crate::mpd::inheritance::inherit_child(
        Some(representation_el),
        Some(adaptation_el),
        Some(period_el),
        "SegmentTemplate",
    );

    let present_count =
        [segment_base.is_some(), segment_list.is_some(), segment_template.is_some()]
            .iter()
            .filter(|b| **b)
            .count();

    if present_count == 0 {
        if matches!(content_type, ContentType::Text | ContentType::Application) {
            return Ok(SegmentInfoSource::None);
        }
        return Err(EngineError::coded(
            Code::DashNoSegmentInfo,
            format!("representation '{representation_id}' has no segment-info source"),
        ));
    }
    if present_count > 1 {
        return Err(EngineError::coded(
            Code::DashNoSegmentInfo,
            format!(
                "representation '{representation_id}' has more than one of SegmentBase/List/Template"
            ),
        ));
    }

    if let Some(el) = segment_template {
        let timeline = el.child_named("SegmentTimeline").map(parse_s_elements);
        let info = SegmentTemplateInfo {
            media: el.attr("media").map(|s| s.to_string()),
            initialization: el.attr("initialization").map(|s| s.to_string()),
            timescale: el.attr("timescale").and_then(|v| v.parse().ok()).unwrap_or(1),
            duration: el.attr("duration").and_then(|v| v.parse().ok()),
            start_number: el.attr("startNumber").and_then(|v| v.parse().ok()).unwrap_or(1),
            presentation_time_offset: el
                .attr("presentationTimeOffset")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            timeline,
            representation_id: representation_id.to_string(),
            bandwidth,
        };
        return Ok(SegmentInfoSource::Template(info));
    }

    if let Some(el) = segment_list {
        let urls: Vec<SegmentUrlEntry> = el
            .children_named("SegmentURL")
            .map(|u| SegmentUrlEntry {
                media: u.attr("media").map(|s| s.to_string()),
                media_range: u.attr("mediaRange").and_then(parse_byte_range),
            })
            .collect();
        let timeline = el.child_named("SegmentTimeline").map(parse_s_elements);
        let initialization = el.child_named("Initialization").map(|i| InitializationInfo {
            source_url: i
                .attr("sourceURL")
                .map(|s| s.to_string())
                .unwrap_or_else(|| source_url.to_string()),
            range: i.attr("range").and_then(parse_byte_range),
        });
        let info = SegmentListInfo {
            urls,
            duration: el.attr("duration").and_then(|v| v.parse().ok()),
            timescale: el.attr("timescale").and_then(|v| v.parse().ok()).unwrap_or(1),
            timeline,
            initialization,
        };
        return Ok(SegmentInfoSource::List(info));
    }

    let el = segment_base.expect("present_count == 1 guarantees exactly one is Some");
    let container = Container::from_mime_type(mime_type).ok_or_else(|| {
        EngineError::coded(
            Code::DashUnsupportedContainer,
            format!("unsupported container for mime type '{mime_type}'"),
        )
    })?;
    let index_range = el
        .attr("indexRange")
        .and_then(parse_byte_range_required)
        .or_else(|| {
            el.child_named("RepresentationIndex")
                .and_then(|ri| ri.attr("range"))
                .and_then(parse_byte_range_required)
        })
        .ok_or_else(|| {
            EngineError::coded(
                Code::DashNoSegmentInfo,
                format!("representation '{representation_id}' SegmentBase has no indexRange"),
            )
        })?;
    let initialization_range = el
        .child_named("Initialization")
        .and_then(|i| i.attr("range"))
        .and_then(parse_byte_range_required);

    if container == Container::Webm && initialization_range.is_none() {
        return Err(EngineError::coded(
            Code::DashWebmMissingInit,
            format!("representation '{representation_id}' is WebM SegmentBase without Initialization"),
        ));
    }

    let _ = frame;
    Ok(SegmentInfoSource::Base(SegmentBaseInfo {
        source_url: source_url.to_string(),
        container,
        index_range,
        initialization_range,
    }))
}

fn parse_s_elements(timeline_el: &XmlElement) -> Vec<STimelineEntry> {
    timeline_el
        .children_named("S")
        .map(|s| STimelineEntry {
            t: s.attr("t").and_then(|v| v.parse().ok()),
            d: s.attr("d").and_then(|v| v.parse().ok()),
            r: s.attr("r").and_then(|v| v.parse().ok()).unwrap_or(0),
        })
        .collect()
}

fn parse_byte_range(s: &str) -> Option<(u64, Option<u64>)> {
    let (start, end) = s.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()))
}

fn parse_byte_range_required(s: &str) -> Option<(u64, u64)> {
    let (start, end) = s.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

/// Resolve a `UTCTiming` element into `clockOffset` milliseconds, per the
/// `http-head|http-xsdate|http-iso|direct` schemes spec.md §4.4 names.
/// Unrecognized schemes warn and return `0`.
async fn resolve_utc_timing(el: &XmlElement, client: &Client) -> Result<i64> {
    let scheme = el.attr("schemeIdUri").unwrap_or("");
    let value = el.attr("value").unwrap_or("");
    let now_ms = (SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
        * 1000.0) as i64;

    let server_ms = if scheme.starts_with("urn:mpeg:dash:utc:direct") {
        parse_iso8601_datetime(value).map(|s| (s * 1000.0) as i64)
    } else if scheme.starts_with("urn:mpeg:dash:utc:http-iso")
        || scheme.starts_with("urn:mpeg:dash:utc:http-xsdate")
    {
        let body = fetch_with_retry(client, value, &RetryConfig::default())
            .await
            .map_err(EngineError::from)?
            .text()
            .await
            .map_err(EngineError::from)?;
        parse_iso8601_datetime(body.trim()).map(|s| (s * 1000.0) as i64)
    } else if scheme.starts_with("urn:mpeg:dash:utc:http-head") {
        let response = fetch_with_retry(client, value, &RetryConfig::default())
            .await
            .map_err(EngineError::from)?;
        response
            .headers()
            .get("date")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| chrono::DateTime::parse_from_rfc2822(s).ok())
            .map(|dt| dt.timestamp_millis())
    } else {
        warn!("unrecognized UTCTiming scheme '{scheme}'");
        None
    };

    Ok(server_ms.map(|s| s - now_ms).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client::new()
    }

    #[tokio::test]
    async fn rejects_non_mpd_root() {
        let xml = b"<NotMPD/>";
        let map = StreamMap::new();
        let err = parse_mpd(xml, "https://example.com/manifest.mpd", &client(), &map)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(Code::DashInvalidXml));
    }

    #[tokio::test]
    async fn spec_scenario_1_static_single_period_segment_template() {
        let xml = br#"<MPD type="static" mediaPresentationDuration="PT30S">
            <Period id="p0">
                <AdaptationSet mimeType="video/mp4" contentType="video" lang="en">
                    <SegmentTemplate media="seg_$Number$.m4s" initialization="init.mp4"
                        timescale="1" duration="6" startNumber="1"/>
                    <Representation id="v1" bandwidth="500000" codecs="avc1.64001f"/>
                </AdaptationSet>
            </Period>
        </MPD>"#;
        let map = StreamMap::new();
        let presentation = parse_mpd(xml, "https://example.com/manifest.mpd", &client(), &map)
            .await
            .unwrap();
        assert_eq!(presentation.variants.len(), 1);
        let video = presentation.variants[0].video.as_ref().unwrap();
        let index = video.segment_index.as_ref().unwrap();
        assert_eq!(index.len(), 5);
        assert_eq!(index.get(0).unwrap().uris, vec!["seg_1.m4s".to_string()]);
        assert_eq!(index.get(4).unwrap().start_time, 24.0);
    }

    #[tokio::test]
    async fn missing_period_fails() {
        let xml = br#"<MPD type="static"></MPD>"#;
        let map = StreamMap::new();
        let err = parse_mpd(xml, "https://example.com/manifest.mpd", &client(), &map)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(Code::DashInvalidXml));
    }

    #[tokio::test]
    async fn essential_property_drops_adaptation_set() {
        let xml = br#"<MPD type="static" mediaPresentationDuration="PT30S">
            <Period id="p0">
                <AdaptationSet mimeType="video/mp4" contentType="video">
                    <EssentialProperty schemeIdUri="urn:unknown:scheme"/>
                    <SegmentTemplate media="seg_$Number$.m4s" timescale="1" duration="6"/>
                    <Representation id="v1" bandwidth="1" codecs="avc1"/>
                </AdaptationSet>
            </Period>
        </MPD>"#;
        let map = StreamMap::new();
        let presentation = parse_mpd(xml, "https://example.com/manifest.mpd", &client(), &map)
            .await
            .unwrap();
        assert!(presentation.variants.is_empty());
    }

    #[tokio::test]
    async fn duplicate_representation_id_fails_when_dynamic() {
        let xml = br#"<MPD type="dynamic" availabilityStartTime="2024-01-01T00:00:00Z">
            <Period id="p0">
                <AdaptationSet mimeType="video/mp4" contentType="video">
                    <SegmentTemplate media="seg_$Number$.m4s" timescale="1" duration="6"/>
                    <Representation id="v1" bandwidth="1" codecs="avc1"/>
                    <Representation id="v1" bandwidth="2" codecs="avc1"/>
                </AdaptationSet>
            </Period>
        </MPD>"#;
        let map = StreamMap::new();
        let err = parse_mpd(xml, "https://example.com/manifest.mpd", &client(), &map)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(Code::DashDuplicateRepresentationId));
    }
}
