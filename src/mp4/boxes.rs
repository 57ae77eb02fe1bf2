//! A configurable ISO-BMFF box walker.
//!
//! Callers register per-FourCC callbacks as either "basic" (payload only) or
//! "full" (version + flags + payload) boxes. The walker reads each box
//! header, dispatches to the matching callback with a sub-slice over the
//! payload, and otherwise skips to the box's end. A `stop()` flag halts
//! iteration early — used by the PSSH and SIDX parsers to bail out once
//! their target box is found.

use std::collections::HashMap;
use std::fmt;

use crate::bitstream::Cursor;
use crate::error::{Code, EngineError, Result};

/// A big-endian four-character box type code (e.g. `moov`, `pssh`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub fn new(name: &str) -> Self {
        let bytes = name.as_bytes();
        debug_assert_eq!(bytes.len(), 4, "FourCC must be exactly 4 ASCII bytes");
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&bytes[..4]);
        FourCc(arr)
    }

    pub fn as_str(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The header and payload of one parsed box.
#[derive(Debug, Clone, Copy)]
pub struct BoxInfo<'a> {
    pub box_type: FourCc,
    /// Absolute offset of this box's `size` field within the root buffer
    /// the walker was started on.
    pub start: usize,
    /// Header length in bytes (8, 12, 16, or 20 depending on 64-bit size
    /// and full-box version/flags), exposed so child callbacks can do
    /// byte-range arithmetic (SIDX `first_offset`).
    pub header_size: usize,
    pub payload: &'a [u8],
    /// Zero for boxes registered as "basic".
    pub version: u8,
    /// Zero for boxes registered as "basic".
    pub flags: u32,
}

impl<'a> BoxInfo<'a> {
    /// Absolute offset of the first byte following this box's header, i.e.
    /// where its payload begins in the root buffer.
    pub fn payload_start(&self) -> usize {
        self.start + self.header_size
    }
}

pub type BoxCallback<'a, 'cb> = Box<dyn FnMut(BoxInfo<'a>, &mut BoxWalker<'a, 'cb>) + 'cb>;
pub type FullBoxCallback<'a, 'cb> = BoxCallback<'a, 'cb>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Basic,
    Full,
}

/// A registry of per-FourCC callbacks plus the short-circuit `stop` flag.
pub struct BoxWalker<'a, 'cb> {
    callbacks: HashMap<FourCc, (Kind, BoxCallback<'a, 'cb>)>,
    stop: bool,
    stop_on_partial: bool,
}

impl<'a, 'cb> BoxWalker<'a, 'cb> {
    pub fn new() -> Self {
        Self {
            callbacks: HashMap::new(),
            stop: false,
            stop_on_partial: false,
        }
    }

    /// If set, a truncated trailing header cleanly terminates the walk
    /// instead of returning an error.
    pub fn stop_on_partial(mut self, v: bool) -> Self {
        self.stop_on_partial = v;
        self
    }

    pub fn basic_box(
        mut self,
        name: &str,
        f: impl FnMut(BoxInfo<'a>, &mut BoxWalker<'a, 'cb>) + 'cb,
    ) -> Self {
        self.callbacks
            .insert(FourCc::new(name), (Kind::Basic, Box::new(f)));
        self
    }

    pub fn full_box(
        mut self,
        name: &str,
        f: impl FnMut(BoxInfo<'a>, &mut BoxWalker<'a, 'cb>) + 'cb,
    ) -> Self {
        self.callbacks
            .insert(FourCc::new(name), (Kind::Full, Box::new(f)));
        self
    }

    /// Halts iteration after the current callback returns.
    pub fn stop(&mut self) {
        self.stop = true;
    }

    pub fn stopped(&self) -> bool {
        self.stop
    }

    /// Parse `data` as a sequence of sibling boxes starting at absolute
    /// offset `base_offset` in the root buffer (0 for a top-level call).
    pub fn parse(&mut self, data: &'a [u8], base_offset: usize) -> Result<()> {
        let mut offset = 0usize;
        while offset < data.len() && !self.stop {
            let header = match parse_header(&data[offset..], base_offset + offset, &self.callbacks)
            {
                Ok(h) => h,
                Err(HeaderError::Truncated) if self.stop_on_partial => break,
                Err(HeaderError::Truncated) => {
                    return Err(EngineError::coded(
                        Code::BufferReadOutOfBounds,
                        "truncated box header",
                    ));
                }
            };

            let box_end = (offset + header.total_size).min(data.len());
            let payload_start = offset + header.header_size;
            let payload = if payload_start <= box_end {
                &data[payload_start..box_end]
            } else {
                &data[box_end..box_end]
            };

            if let Some((kind, mut cb)) = self.callbacks.remove(&header.box_type) {
                let info = BoxInfo {
                    box_type: header.box_type,
                    start: base_offset + offset,
                    header_size: header.header_size,
                    payload,
                    version: if kind == Kind::Full { header.version } else { 0 },
                    flags: if kind == Kind::Full { header.flags } else { 0 },
                };
                cb(info, self);
                self.callbacks.insert(header.box_type, (kind, cb));
            }

            offset = box_end.max(offset + header.header_size);
        }
        Ok(())
    }

    /// Standard "children" body: recursively walk the box's payload with
    /// the same callback registry until it is exhausted.
    pub fn children(&mut self, info: BoxInfo<'a>) -> Result<()> {
        self.parse(info.payload, info.payload_start())
    }

    /// Standard "sampleDescription" body: a leading `u32` entry count
    /// followed by that many child boxes.
    pub fn sample_description(&mut self, info: BoxInfo<'a>) -> Result<()> {
        let mut cursor = Cursor::new(info.payload);
        let _count = cursor.read_u32()?;
        let rest = cursor.remaining_slice();
        self.parse(rest, info.payload_start() + 4)
    }
}

impl<'a, 'cb> Default for BoxWalker<'a, 'cb> {
    fn default() -> Self {
        Self::new()
    }
}

/// Standard "allData" body: hands the entire remaining payload to `f`.
pub fn all_data<'a>(info: &BoxInfo<'a>, mut f: impl FnMut(&'a [u8])) {
    f(info.payload);
}

enum HeaderError {
    Truncated,
}

struct Header {
    box_type: FourCc,
    header_size: usize,
    total_size: usize,
    version: u8,
    flags: u32,
}

fn parse_header(
    data: &[u8],
    _abs_offset: usize,
    callbacks: &HashMap<FourCc, (Kind, BoxCallback<'_, '_>)>,
) -> std::result::Result<Header, HeaderError> {
    if data.len() < 8 {
        return Err(HeaderError::Truncated);
    }
    let size32 = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
    let box_type = FourCc([data[4], data[5], data[6], data[7]]);

    let mut header_size = 8usize;
    let total_size: u64;

    if size32 == 1 {
        if data.len() < 16 {
            return Err(HeaderError::Truncated);
        }
        let largesize = u64::from_be_bytes([
            data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
        ]);
        header_size = 16;
        total_size = largesize;
    } else if size32 == 0 {
        total_size = data.len() as u64;
    } else {
        total_size = size32;
    }

    let is_full = callbacks
        .get(&box_type)
        .map(|(k, _)| *k == Kind::Full)
        .unwrap_or(false);

    let (version, flags) = if is_full {
        if data.len() < header_size + 4 {
            return Err(HeaderError::Truncated);
        }
        let v = data[header_size];
        let f = ((data[header_size + 1] as u32) << 16)
            | ((data[header_size + 2] as u32) << 8)
            | data[header_size + 3] as u32;
        header_size += 4;
        (v, f)
    } else {
        (0u8, 0u32)
    };

    Ok(Header {
        box_type,
        header_size,
        total_size: (total_size as usize).max(header_size),
        version,
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn basic_box(fourcc: &str, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let size = 8 + payload.len();
        out.extend_from_slice(&(size as u32).to_be_bytes());
        out.extend_from_slice(fourcc.as_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn dispatches_to_matching_basic_callback() {
        let data = basic_box("free", &[1, 2, 3]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let mut walker = BoxWalker::new().basic_box("free", move |info, _w| {
            seen2.borrow_mut().extend_from_slice(info.payload);
        });
        walker.parse(&data, 0).unwrap();
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn unmatched_box_is_skipped() {
        let mut data = basic_box("skip", &[9, 9]);
        data.extend(basic_box("free", &[7]));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let mut walker = BoxWalker::new().basic_box("free", move |info, _w| {
            seen2.borrow_mut().extend_from_slice(info.payload);
        });
        walker.parse(&data, 0).unwrap();
        assert_eq!(*seen.borrow(), vec![7]);
    }

    #[test]
    fn full_box_reads_version_and_flags() {
        let mut payload = vec![0x01u8, 0x00, 0x00, 0x02]; // version=1, flags=2
        payload.extend_from_slice(&[0xAA]);
        let data = basic_box("pssh", &payload);
        let captured = Rc::new(RefCell::new(None));
        let captured2 = captured.clone();
        let mut walker = BoxWalker::new().full_box("pssh", move |info, _w| {
            *captured2.borrow_mut() = Some((info.version, info.flags, info.payload.to_vec()));
        });
        walker.parse(&data, 0).unwrap();
        let (v, f, p) = captured.borrow().clone().unwrap();
        assert_eq!(v, 1);
        assert_eq!(f, 2);
        assert_eq!(p, vec![0xAA]);
    }

    #[test]
    fn size_zero_extends_to_buffer_end() {
        let mut data = vec![0u8, 0, 0, 0];
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[1, 2, 3, 4, 5]);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let mut walker = BoxWalker::new().basic_box("mdat", move |info, _w| {
            seen2.borrow_mut().extend_from_slice(info.payload);
        });
        walker.parse(&data, 0).unwrap();
        assert_eq!(*seen.borrow(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn children_recurses_into_payload() {
        let inner = basic_box("mdhd", &[0xFF]);
        let outer = basic_box("mdia", &inner);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let mut walker = BoxWalker::new()
            .basic_box("mdia", move |info, w| {
                w.children(info).unwrap();
            })
            .basic_box("mdhd", move |info, _w| {
                seen2.borrow_mut().extend_from_slice(info.payload);
            });
        walker.parse(&outer, 0).unwrap();
        assert_eq!(*seen.borrow(), vec![0xFF]);
    }

    #[test]
    fn truncated_header_with_stop_on_partial_terminates_cleanly() {
        let data = vec![0u8, 0, 0]; // only 3 bytes, needs 8
        let mut walker = BoxWalker::new().stop_on_partial(true);
        assert!(walker.parse(&data, 0).is_ok());
    }

    #[test]
    fn truncated_header_without_stop_on_partial_errors() {
        let data = vec![0u8, 0, 0];
        let mut walker: BoxWalker<'_, '_> = BoxWalker::new();
        assert!(walker.parse(&data, 0).is_err());
    }
}
