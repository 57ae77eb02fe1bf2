//! SIDX (Segment Index) box parsing — turns one `sidx` box into an ordered
//! list of byte-ranged, time-ranged segment references.

use crate::bitstream::Cursor;
use crate::error::{Code, EngineError, Result};
use crate::mp4::boxes::{BoxInfo, BoxWalker};
use crate::model::segment_reference::SegmentReference;

/// Parse the `sidx` box found at the start of `data` (the index-range byte
/// window fetched for a SegmentBase representation).
///
/// `sidx_offset` is the absolute byte offset of the start of this box in
/// the underlying media resource; `timestamp_offset` shifts every emitted
/// reference's times (e.g. by the owning period's start time).
pub fn parse_sidx(
    data: &[u8],
    sidx_offset: u64,
    timestamp_offset: f64,
) -> Result<Vec<SegmentReference>> {
    let mut result: Result<Vec<SegmentReference>> = Err(EngineError::coded(
        Code::Mp4SidxWrongBoxType,
        "no sidx box found in the supplied range",
    ));

    let mut walker = BoxWalker::new().full_box("sidx", |info: BoxInfo, w| {
        result = parse_sidx_body(info, sidx_offset, timestamp_offset);
        w.stop();
    });
    walker.parse(data, 0)?;
    result
}

fn parse_sidx_body(
    info: BoxInfo,
    sidx_offset: u64,
    timestamp_offset: f64,
) -> Result<Vec<SegmentReference>> {
    let mut cursor = Cursor::new(info.payload);

    let _reference_id = cursor.read_u32()?;
    let timescale = cursor.read_u32()?;
    if timescale == 0 {
        return Err(EngineError::coded(
            Code::Mp4SidxInvalidTimescale,
            "sidx timescale must be non-zero",
        ));
    }

    let (earliest_presentation_time, first_offset) = if info.version == 0 {
        let t = cursor.read_u32()? as u64;
        let o = cursor.read_u32()? as u64;
        (t, o)
    } else {
        let t = cursor.read_u64()?;
        let o = cursor.read_u64()?;
        (t, o)
    };
    let _ = earliest_presentation_time;

    cursor.skip(2)?; // 16 reserved bits
    let reference_count = cursor.read_u16()?;

    let box_size = (info.header_size + info.payload.len()) as u64;
    let mut start_byte = sidx_offset + box_size + first_offset;
    let mut unscaled_start: u64 = 0;

    let mut out = Vec::with_capacity(reference_count as usize);
    for _ in 0..reference_count {
        let chunk = cursor.read_u32()?;
        let ref_type = chunk >> 31;
        let size = chunk & 0x7fff_ffff;
        let duration = cursor.read_u32()?;
        cursor.skip(4)?; // sap flags etc, unused

        if ref_type == 1 {
            return Err(EngineError::coded(
                Code::Mp4SidxTypeNotSupported,
                "hierarchical SIDX (reference_type == 1) is not supported",
            ));
        }

        let start_time = unscaled_start as f64 / timescale as f64 + timestamp_offset;
        let end_time = (unscaled_start + duration as u64) as f64 / timescale as f64 + timestamp_offset;
        let start = start_byte;
        let end = start_byte + size as u64 - 1;

        out.push(SegmentReference {
            start_time,
            end_time,
            start_byte: Some(start),
            end_byte: Some(end),
            ..Default::default()
        });

        start_byte += size as u64;
        unscaled_start += duration as u64;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_sidx(
        version: u8,
        timescale: u32,
        first_offset: u32,
        refs: &[(u32, u32)],
    ) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_be_bytes()); // reference_id
        body.extend_from_slice(&timescale.to_be_bytes());
        if version == 0 {
            body.extend_from_slice(&0u32.to_be_bytes()); // earliest_presentation_time
            body.extend_from_slice(&first_offset.to_be_bytes());
        } else {
            body.extend_from_slice(&0u64.to_be_bytes());
            body.extend_from_slice(&(first_offset as u64).to_be_bytes());
        }
        body.extend_from_slice(&0u16.to_be_bytes()); // reserved
        body.extend_from_slice(&(refs.len() as u16).to_be_bytes());
        for (size, duration) in refs {
            body.extend_from_slice(&size.to_be_bytes()); // type=0 in top bit
            body.extend_from_slice(&duration.to_be_bytes());
            body.extend_from_slice(&0u32.to_be_bytes());
        }

        let mut header = vec![version];
        header.extend_from_slice(&[0, 0, 0]); // flags
        header.extend_from_slice(&body);

        let total = 8 + header.len();
        let mut out = Vec::new();
        out.extend_from_slice(&(total as u32).to_be_bytes());
        out.extend_from_slice(b"sidx");
        out.extend_from_slice(&header);
        out
    }

    #[test]
    fn sidx_round_trip_matches_spec_example() {
        // version 0, timescale 1000, two references (1000/2000, 2000/3000),
        // first_offset = 100, starting at sidxOffset = 0.
        let data = build_sidx(0, 1000, 100, &[(1000, 2000), (2000, 3000)]);
        let box_size = data.len() as u64;
        let refs = parse_sidx(&data, 0, 0.0).unwrap();
        assert_eq!(refs.len(), 2);

        let first_start = box_size + 100;
        assert_eq!(refs[0].start_byte, Some(first_start));
        assert_eq!(refs[0].end_byte, Some(first_start + 1000 - 1));
        assert_eq!(refs[0].start_time, 0.0);
        assert_eq!(refs[0].end_time, 2.0);

        let second_start = first_start + 1000;
        assert_eq!(refs[1].start_byte, Some(second_start));
        assert_eq!(refs[1].end_byte, Some(second_start + 2000 - 1));
        assert_eq!(refs[1].start_time, 2.0);
        assert_eq!(refs[1].end_time, 5.0);
    }

    #[test]
    fn hierarchical_sidx_is_rejected() {
        // build_sidx always encodes type=0 references, so hand-roll one
        // with the top bit of the first reference word set (type=1).
        let mut full = Vec::new();
        let mut body = Vec::new();
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&1000u32.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        body.extend_from_slice(&0u16.to_be_bytes());
        body.extend_from_slice(&1u16.to_be_bytes());
        let chunk: u32 = (1u32 << 31) | 500; // type = 1
        body.extend_from_slice(&chunk.to_be_bytes());
        body.extend_from_slice(&1000u32.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        let mut header = vec![0u8, 0, 0, 0];
        header.extend_from_slice(&body);
        let total = 8 + header.len();
        full.extend_from_slice(&(total as u32).to_be_bytes());
        full.extend_from_slice(b"sidx");
        full.extend_from_slice(&header);

        assert!(parse_sidx(&full, 0, 0.0).is_err());
    }

    #[test]
    fn zero_timescale_is_rejected() {
        let data = build_sidx(0, 0, 0, &[(100, 100)]);
        assert!(parse_sidx(&data, 0, 0.0).is_err());
    }
}
