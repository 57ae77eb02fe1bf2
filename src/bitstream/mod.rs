//! Low-level binary readers shared by the MP4 and WebM parsers.

pub mod cursor;
pub mod ebml;

pub use cursor::Cursor;
