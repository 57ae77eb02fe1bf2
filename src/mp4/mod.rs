//! ISO-BMFF (MP4) box parsing: a registry-driven walker plus the two
//! consumers built on top of it, PSSH extraction and SIDX indexing.

pub mod boxes;
pub mod pssh;
pub mod sidx;

pub use boxes::{BoxCallback, BoxWalker, FullBoxCallback};
