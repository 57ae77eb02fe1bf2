//! PSSH (Protection System Specific Header) box extraction.
//!
//! Walks `moov → pssh` boxes. Absence of any `pssh` box is not an error —
//! the content may be clear — so callers get an (possibly empty) list back
//! rather than a `Result` that can fail on "none found".

use crate::bitstream::Cursor;
use crate::error::{Code, EngineError, Result};
use crate::mp4::boxes::{BoxInfo, BoxWalker};

/// One parsed `pssh` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pssh {
    pub system_id: [u8; 16],
    pub version: u8,
    pub key_ids: Vec<[u8; 16]>,
    pub data: Vec<u8>,
    /// The complete original box bytes (header + payload), kept for
    /// re-emission and for byte-equality deduplication.
    pub raw: Vec<u8>,
}

/// Walk `data` (the contents of a `moov` box, or any buffer that may
/// contain `pssh` boxes at any nesting depth reachable via `children`)
/// and collect every `pssh` box found.
pub fn find_pssh_boxes(data: &[u8]) -> Result<Vec<Pssh>> {
    let mut out: Vec<Pssh> = Vec::new();
    collect_pssh(data, 0, &mut out)?;
    Ok(out)
}

fn collect_pssh(data: &[u8], base_offset: usize, out: &mut Vec<Pssh>) -> Result<()> {
    let mut found_err: Option<EngineError> = None;
    {
        let out_cell = std::cell::RefCell::new(&mut *out);
        let err_cell = std::cell::RefCell::new(&mut found_err);
        let mut walker = BoxWalker::new()
            .basic_box("moov", |info: BoxInfo, w| {
                let _ = w.children(info);
            })
            .basic_box("moof", |info: BoxInfo, w| {
                let _ = w.children(info);
            })
            .full_box("pssh", |info: BoxInfo, _w| {
                match parse_pssh_box(info) {
                    Ok(pssh) => out_cell.borrow_mut().push(pssh),
                    Err(e) => *err_cell.borrow_mut() = Some(e),
                }
            });
        walker.parse(data, base_offset)?;
    }
    if let Some(e) = found_err {
        return Err(e);
    }
    Ok(())
}

fn parse_pssh_box(info: BoxInfo) -> Result<Pssh> {
    let mut cursor = Cursor::new(info.payload);
    let system_id_bytes = cursor.read_bytes(16)?;
    let mut system_id = [0u8; 16];
    system_id.copy_from_slice(system_id_bytes);

    let mut key_ids = Vec::new();
    if info.version == 1 {
        let kid_count = cursor.read_u32()?;
        for _ in 0..kid_count {
            let kid_bytes = cursor.read_bytes(16)?;
            let mut kid = [0u8; 16];
            kid.copy_from_slice(kid_bytes);
            key_ids.push(kid);
        }
    }

    let data_size = cursor.read_u32()? as usize;
    let data = cursor.read_bytes(data_size)?.to_vec();

    // Reconstruct the full original box (header + payload) for re-emission
    // and byte-equality dedup. Full-box header is 12 bytes (size, type,
    // version, flags); the 64-bit largesize form is not produced here since
    // PSSH boxes never approach the 32-bit size limit in practice.
    let total_size = 12 + info.payload.len();
    let mut raw = Vec::with_capacity(total_size);
    raw.extend_from_slice(&(total_size as u32).to_be_bytes());
    raw.extend_from_slice(b"pssh");
    raw.push(info.version);
    raw.extend_from_slice(&[0, 0, 0]); // flags, always 0 for pssh
    raw.extend_from_slice(info.payload);

    Ok(Pssh {
        system_id,
        version: info.version,
        key_ids,
        data,
        raw,
    })
}

impl Pssh {
    /// Lowercase hex key IDs, for cross-referencing a v1 PSSH's key-ID list
    /// against the MPD's `cenc:default_KID` hex strings.
    pub fn key_ids_hex(&self) -> Vec<String> {
        self.key_ids.iter().map(hex::encode).collect()
    }
}

/// Byte-equality PSSH dedup, per the "two PSSH buffers are equal iff
/// byte-equal" policy.
pub fn dedupe_pssh(boxes: Vec<Pssh>) -> Vec<Pssh> {
    let mut out: Vec<Pssh> = Vec::new();
    for b in boxes {
        if !out.iter().any(|existing| existing.raw == b.raw) {
            out.push(b);
        }
    }
    out
}

/// Decode a `DASH_PSSH_BAD_ENCODING` candidate: base64 text into PSSH box
/// bytes, used by the ContentProtection `<cenc:pssh>` handling.
pub fn decode_base64_pssh(text: &str) -> Result<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|e| EngineError::coded(Code::DashPsshBadEncoding, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_pssh_v0(system_id: [u8; 16], data: &[u8]) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&system_id);
        payload.extend_from_slice(&(data.len() as u32).to_be_bytes());
        payload.extend_from_slice(data);

        let mut header = Vec::new();
        header.push(0u8); // version
        header.extend_from_slice(&[0, 0, 0]); // flags
        header.extend_from_slice(&payload);

        let size = 8 + header.len();
        let mut out = Vec::new();
        out.extend_from_slice(&(size as u32).to_be_bytes());
        out.extend_from_slice(b"pssh");
        out.extend_from_slice(&header);
        out
    }

    #[test]
    fn finds_version_0_pssh_with_no_key_ids() {
        let sysid = [0xAB; 16];
        let data = build_pssh_v0(sysid, &[1, 2, 3, 4]);
        let found = find_pssh_boxes(&data).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].system_id, sysid);
        assert!(found[0].key_ids.is_empty());
        assert_eq!(found[0].data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn no_pssh_boxes_is_not_an_error() {
        let data = vec![0u8, 0, 0, 8, b'f', b'r', b'e', b'e'];
        let found = find_pssh_boxes(&data).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn dedupe_keeps_first_of_byte_equal_pair() {
        let sysid = [0x01; 16];
        let data = build_pssh_v0(sysid, &[9]);
        let a = find_pssh_boxes(&data).unwrap().remove(0);
        let b = a.clone();
        let deduped = dedupe_pssh(vec![a, b]);
        assert_eq!(deduped.len(), 1);
    }

    #[test]
    fn key_ids_hex_lowercases_and_encodes() {
        let pssh = Pssh {
            system_id: [0u8; 16],
            version: 1,
            key_ids: vec![[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]],
            data: vec![],
            raw: vec![],
        };
        assert_eq!(
            pssh.key_ids_hex(),
            vec!["deadbeef000000000000000000000000".to_string()]
        );
    }

    #[test]
    fn base64_roundtrip() {
        use base64::Engine;
        let raw = vec![1u8, 2, 3, 4, 5];
        let encoded = base64::engine::general_purpose::STANDARD.encode(&raw);
        let decoded = decode_base64_pssh(&encoded).unwrap();
        assert_eq!(decoded, raw);
    }
}
