//! The DASH-to-HLS live decrypting re-streamer engine (spec.md §2).
//!
//! Exposed as a library so the orchestrator/saver pipeline is testable
//! without a process boundary; `main.rs` is a thin binary that wires
//! configuration, logging, and the top-level run loop on top of it.

pub mod bitstream;
pub mod config;
pub mod drm;
pub mod error;
pub mod http_retry;
pub mod metrics;
pub mod model;
pub mod mp4;
pub mod mpd;
pub mod orchestrator;
pub mod saver;
pub mod webm;
