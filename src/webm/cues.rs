//! WebM `Cues` parsing — turns a Matroska `Segment > Cues` element into an
//! ordered list of [`SegmentReference`]s, one per `CuePoint` interval.

use crate::bitstream::ebml::{parse_element, Element};
use crate::bitstream::Cursor;
use crate::error::{Code, EngineError, Result};
use crate::model::segment_reference::SegmentReference;

const ID_EBML_HEADER: u32 = 0x1A45_DFA3;
const ID_SEGMENT: u32 = 0x1853_8067;
const ID_INFO: u32 = 0x1549_A966;
const ID_TIMECODE_SCALE: u32 = 0x2AD7_B1;
const ID_DURATION: u32 = 0x4489;
const ID_CUES: u32 = 0x1C53_BB6B;
const ID_CUE_POINT: u32 = 0xBB;
const ID_CUE_TIME: u32 = 0xB3;
const ID_CUE_TRACK_POSITIONS: u32 = 0xB7;
const ID_CUE_CLUSTER_POSITION: u32 = 0xF1;

/// Walk the top-level siblings of `data` and collect every element,
/// recursing is left to callers (each element's own payload can be
/// re-walked the same way).
fn top_level_elements(data: &[u8]) -> Result<Vec<Element<'_>>> {
    let mut cursor = Cursor::new(data);
    let mut out = Vec::new();
    while cursor.has_more() {
        match parse_element(&mut cursor) {
            Ok(el) => out.push(el),
            Err(_) => break,
        }
    }
    Ok(out)
}

fn find_child<'a>(elements: &[Element<'a>], id: u32) -> Option<Element<'a>> {
    elements.iter().find(|e| e.id == id).cloned()
}

/// Parse a complete WebM/Matroska buffer (EBML header + `Segment`) and
/// return the expanded segment references for its `Cues` index.
pub fn parse_webm_cues(data: &[u8], timestamp_offset: f64) -> Result<Vec<SegmentReference>> {
    let top = top_level_elements(data)?;

    find_child(&top, ID_EBML_HEADER).ok_or_else(|| {
        EngineError::coded(Code::WebmEbmlHeaderElementMissing, "missing EBML header element")
    })?;

    let segment = find_child(&top, ID_SEGMENT)
        .ok_or_else(|| EngineError::coded(Code::WebmSegmentElementMissing, "missing Segment element"))?;

    let segment_children = top_level_elements(segment.data)?;

    let info = find_child(&segment_children, ID_INFO)
        .ok_or_else(|| EngineError::coded(Code::WebmInfoElementMissing, "missing Info element"))?;
    let info_children = top_level_elements(info.data)?;

    let timecode_scale = find_child(&info_children, ID_TIMECODE_SCALE)
        .map(|e| be_uint(e.data))
        .unwrap_or(1_000_000); // default per Matroska spec: 1ms in ns

    let duration_elem = find_child(&info_children, ID_DURATION)
        .ok_or_else(|| EngineError::coded(Code::WebmDurationElementMissing, "missing Duration element"))?;
    let duration_ticks = be_float(duration_elem.data);

    // Duration is in "segment ticks" (timecode units); TimecodeScale converts
    // ticks to nanoseconds.
    let duration_seconds = duration_ticks * timecode_scale as f64 / 1_000_000_000.0;

    let cues = find_child(&segment_children, ID_CUES)
        .ok_or_else(|| EngineError::coded(Code::WebmCuesElementMissing, "missing Cues element"))?;
    let cue_points: Vec<Element> = top_level_elements(cues.data)?
        .into_iter()
        .filter(|e| e.id == ID_CUE_POINT)
        .collect();

    build_references_from_cue_points(&cue_points, timecode_scale, duration_seconds, timestamp_offset)
}

/// Variant of [`parse_webm_cues`] for the SegmentBase case: the
/// `Initialization` range (EBML header + `Segment` wrapping `Info`) and the
/// `@indexRange` bytes (a standalone `Cues` element) are fetched
/// separately, so they arrive as two buffers rather than one file.
pub fn parse_webm_cues_parts(
    init_data: &[u8],
    cues_data: &[u8],
    timestamp_offset: f64,
) -> Result<Vec<SegmentReference>> {
    let top = top_level_elements(init_data)?;
    find_child(&top, ID_EBML_HEADER).ok_or_else(|| {
        EngineError::coded(Code::WebmEbmlHeaderElementMissing, "missing EBML header element")
    })?;
    let segment = find_child(&top, ID_SEGMENT)
        .ok_or_else(|| EngineError::coded(Code::WebmSegmentElementMissing, "missing Segment element"))?;
    let segment_children = top_level_elements(segment.data)?;
    let info = find_child(&segment_children, ID_INFO)
        .ok_or_else(|| EngineError::coded(Code::WebmInfoElementMissing, "missing Info element"))?;
    let info_children = top_level_elements(info.data)?;
    let timecode_scale = find_child(&info_children, ID_TIMECODE_SCALE)
        .map(|e| be_uint(e.data))
        .unwrap_or(1_000_000);
    let duration_elem = find_child(&info_children, ID_DURATION)
        .ok_or_else(|| EngineError::coded(Code::WebmDurationElementMissing, "missing Duration element"))?;
    let duration_seconds = be_float(duration_elem.data) * timecode_scale as f64 / 1_000_000_000.0;

    let cues_top = top_level_elements(cues_data)?;
    let cues = find_child(&cues_top, ID_CUES)
        .ok_or_else(|| EngineError::coded(Code::WebmCuesElementMissing, "missing Cues element"))?;
    let cue_points: Vec<Element> = top_level_elements(cues.data)?
        .into_iter()
        .filter(|e| e.id == ID_CUE_POINT)
        .collect();

    build_references_from_cue_points(&cue_points, timecode_scale, duration_seconds, timestamp_offset)
}

fn build_references_from_cue_points(
    cue_points: &[Element],
    timecode_scale: u64,
    duration_seconds: f64,
    timestamp_offset: f64,
) -> Result<Vec<SegmentReference>> {
    let mut cue_times_and_offsets = Vec::with_capacity(cue_points.len());
    for cp in cue_points {
        let cp_children = top_level_elements(cp.data)?;
        let cue_time = find_child(&cp_children, ID_CUE_TIME)
            .ok_or_else(|| EngineError::coded(Code::WebmCueTimeElementMissing, "missing CueTime element"))?;
        let unscaled_time = be_uint(cue_time.data);
        let track_positions = find_child(&cp_children, ID_CUE_TRACK_POSITIONS).ok_or_else(|| {
            EngineError::coded(
                Code::WebmCueTrackPositionsElementMissing,
                "missing CueTrackPositions element",
            )
        })?;
        let tp_children = top_level_elements(track_positions.data)?;
        let offset = find_child(&tp_children, ID_CUE_CLUSTER_POSITION)
            .map(|e| be_uint(e.data))
            .unwrap_or(0);
        cue_times_and_offsets.push((unscaled_time, offset));
    }

    let mut out = Vec::with_capacity(cue_times_and_offsets.len());
    for (i, (unscaled_time, offset)) in cue_times_and_offsets.iter().enumerate() {
        let start_time =
            *unscaled_time as f64 * timecode_scale as f64 / 1_000_000_000.0 + timestamp_offset;
        let (end_time, end_byte) = if cue_times_and_offsets.get(i + 1).is_some() {
            let next_time = cue_times_and_offsets[i + 1].0 as f64 * timecode_scale as f64
                / 1_000_000_000.0
                + timestamp_offset;
            (next_time, Some(cue_times_and_offsets[i + 1].1))
        } else {
            (duration_seconds + timestamp_offset, None)
        };
        out.push(SegmentReference {
            start_time,
            end_time,
            start_byte: Some(*offset),
            end_byte,
            ..Default::default()
        });
    }
    Ok(out)
}

fn be_uint(data: &[u8]) -> u64 {
    data.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

fn be_float(data: &[u8]) -> f64 {
    match data.len() {
        4 => f32::from_be_bytes(data.try_into().unwrap()) as f64,
        8 => f64::from_be_bytes(data.try_into().unwrap()),
        _ => be_uint(data) as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elem(id: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = encode_id(id);
        out.extend_from_slice(&encode_size(payload.len() as u64));
        out.extend_from_slice(payload);
        out
    }

    fn encode_id(id: u32) -> Vec<u8> {
        if id <= 0xFF {
            vec![id as u8]
        } else if id <= 0xFFFF {
            (id as u16).to_be_bytes().to_vec()
        } else if id <= 0xFF_FFFF {
            vec![(id >> 16) as u8, (id >> 8) as u8, id as u8]
        } else {
            id.to_be_bytes().to_vec()
        }
    }

    fn encode_size(size: u64) -> Vec<u8> {
        // single-byte vint form, values < 0x7f
        vec![0x80 | size as u8]
    }

    fn build_webm(timecode_scale_ns: u64, duration_ticks: f64, cues: &[(u64, u64)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&elem(ID_EBML_HEADER, &[]));

        let tc_scale = elem(ID_TIMECODE_SCALE, &(timecode_scale_ns as u32).to_be_bytes());
        let dur_bytes = (duration_ticks as f32).to_be_bytes();
        let duration = elem(ID_DURATION, &dur_bytes);
        let mut info_payload = Vec::new();
        info_payload.extend_from_slice(&tc_scale);
        info_payload.extend_from_slice(&duration);
        let info = elem_large(ID_INFO, &info_payload);

        let mut cues_payload = Vec::new();
        for (time, offset) in cues {
            let cue_time = elem(ID_CUE_TIME, &(*time as u32).to_be_bytes());
            let cluster_pos = elem(ID_CUE_CLUSTER_POSITION, &(*offset as u32).to_be_bytes());
            let track_positions = elem_large(ID_CUE_TRACK_POSITIONS, &cluster_pos);
            let mut cp_payload = Vec::new();
            cp_payload.extend_from_slice(&cue_time);
            cp_payload.extend_from_slice(&track_positions);
            cues_payload.extend_from_slice(&elem_large(ID_CUE_POINT, &cp_payload));
        }
        let cues_elem = elem_large(ID_CUES, &cues_payload);

        let mut segment_payload = Vec::new();
        segment_payload.extend_from_slice(&info);
        segment_payload.extend_from_slice(&cues_elem);
        out.extend_from_slice(&elem_large(ID_SEGMENT, &segment_payload));
        out
    }

    /// Like `elem` but supports payloads > 126 bytes using a 2-byte vint size.
    fn elem_large(id: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = encode_id(id);
        let len = payload.len() as u64;
        if len < 0x7f {
            out.extend_from_slice(&encode_size(len));
        } else {
            // 2-byte vint: marker 0x4000
            let v = 0x4000u16 | (len as u16 & 0x3FFF);
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn parses_cue_points_into_segment_references() {
        let data = build_webm(1_000_000, 5_000.0, &[(0, 100), (2000, 5000), (4000, 9000)]);
        let refs = parse_webm_cues(&data, 0.0).unwrap();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].start_time, 0.0);
        assert_eq!(refs[0].end_time, 2.0);
        assert_eq!(refs[0].start_byte, Some(100));
        assert_eq!(refs[1].start_time, 2.0);
        assert_eq!(refs[1].end_time, 4.0);
        // last reference is open-ended
        assert_eq!(refs[2].end_byte, None);
        assert_eq!(refs[2].end_time, 5.0);
    }

    #[test]
    fn missing_ebml_header_fails() {
        let data = elem_large(ID_SEGMENT, &[]);
        let err = parse_webm_cues(&data, 0.0).unwrap_err();
        assert_eq!(err.code(), Some(Code::WebmEbmlHeaderElementMissing));
    }

    #[test]
    fn missing_cues_fails() {
        let mut out = Vec::new();
        out.extend_from_slice(&elem(ID_EBML_HEADER, &[]));
        let tc_scale = elem(ID_TIMECODE_SCALE, &1_000_000u32.to_be_bytes());
        let duration = elem(ID_DURATION, &5000f32.to_be_bytes());
        let mut info_payload = Vec::new();
        info_payload.extend_from_slice(&tc_scale);
        info_payload.extend_from_slice(&duration);
        let info = elem_large(ID_INFO, &info_payload);
        out.extend_from_slice(&elem_large(ID_SEGMENT, &info));

        let err = parse_webm_cues(&out, 0.0).unwrap_err();
        assert_eq!(err.code(), Some(Code::WebmCuesElementMissing));
    }
}
