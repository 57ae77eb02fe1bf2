//! PlayReady Object (PRO) parsing — recovers the `LA_URL` license-
//! acquisition URL from the `WRMHEADER` XML carried by the
//! RIGHTS_MANAGEMENT record (spec.md §4.7).

use crate::bitstream::Cursor;
use crate::error::{Code, EngineError, Result};

/// PlayReady record type identifying the embedded `WRMHEADER` XML.
const RECORD_TYPE_RIGHTS_MANAGEMENT: u16 = 0x0001;

/// One `(type, data)` record inside a PRO object.
#[derive(Debug, Clone)]
pub struct ProRecord {
    pub record_type: u16,
    pub data: Vec<u8>,
}

/// Parse a PlayReady Object: `u32 pro_size` (little-endian, must equal
/// `input.len()`), `u16 record_count`, then `record_count` records of
/// `(u16 type, u16 size, size bytes)`. `size` must be even and must not
/// overrun the buffer.
pub fn parse_pro(input: &[u8]) -> Result<Vec<ProRecord>> {
    if input.len() < 4 {
        return Err(EngineError::coded(
            Code::BufferReadOutOfBounds,
            "PlayReady PRO object shorter than its length prefix",
        ));
    }
    let pro_size = u32::from_le_bytes([input[0], input[1], input[2], input[3]]) as usize;
    if pro_size != input.len() {
        return Err(EngineError::coded(
            Code::BufferReadOutOfBounds,
            format!(
                "PRO size field {pro_size} does not match buffer length {}",
                input.len()
            ),
        ));
    }

    let mut cursor = Cursor::new(&input[4..]);
    let record_count = cursor.read_u16_le()?;

    let mut records = Vec::with_capacity(record_count as usize);
    for _ in 0..record_count {
        let record_type = cursor.read_u16_le()?;
        let size = cursor.read_u16_le()? as usize;
        if size % 2 != 0 {
            return Err(EngineError::coded(
                Code::BufferReadOutOfBounds,
                "PlayReady record size must be even",
            ));
        }
        let data = cursor.read_bytes(size)?.to_vec();
        records.push(ProRecord { record_type, data });
    }
    Ok(records)
}

/// Decode a RIGHTS_MANAGEMENT record's UTF-16LE `WRMHEADER` XML and pull
/// out `<LA_URL>...</LA_URL>`.
pub fn extract_la_url(records: &[ProRecord]) -> Option<String> {
    let record = records
        .iter()
        .find(|r| r.record_type == RECORD_TYPE_RIGHTS_MANAGEMENT)?;
    let xml = decode_utf16le(&record.data)?;
    extract_tag_text(&xml, "LA_URL")
}

fn decode_utf16le(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

fn extract_tag_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_pro(records: &[(u16, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&(records.len() as u16).to_le_bytes());
        for (rtype, data) in records {
            body.extend_from_slice(&rtype.to_le_bytes());
            body.extend_from_slice(&(data.len() as u16).to_le_bytes());
            body.extend_from_slice(data);
        }
        let total_len = 4 + body.len();
        let mut out = Vec::new();
        out.extend_from_slice(&(total_len as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    fn utf16le(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn parses_records_and_extracts_la_url() {
        let xml = "<WRMHEADER><DATA><LA_URL>https://license.example.com</LA_URL></DATA></WRMHEADER>";
        let data = utf16le(xml);
        let pro = build_pro(&[(RECORD_TYPE_RIGHTS_MANAGEMENT, &data)]);
        let records = parse_pro(&pro).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            extract_la_url(&records),
            Some("https://license.example.com".to_string())
        );
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let mut pro = build_pro(&[(1, &[0, 0])]);
        pro[0] = 0xff; // corrupt the declared length
        assert!(parse_pro(&pro).is_err());
    }

    #[test]
    fn odd_record_size_is_rejected() {
        let mut pro = build_pro(&[(1, &[0, 0])]);
        // Record size field lives at offset 4 (count) + 2 (type) = 6.
        pro[6] = 3;
        pro[7] = 0;
        assert!(parse_pro(&pro).is_err());
    }
}
