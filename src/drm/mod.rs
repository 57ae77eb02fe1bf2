//! DRM scheme identification and ContentProtection analysis (spec.md §4.7).
//!
//! Resolves `ContentProtection` elements into normalized [`DrmInfo`]
//! descriptors, intersects representation-level key systems into the
//! owning AdaptationSet, and decodes a PlayReady `PRO` object to recover
//! its license-acquisition URL.

pub mod content_protection;
pub mod playready;
pub mod scheme;

pub use content_protection::{parse_content_protection, ContentProtectionElement};
pub use scheme::key_system_for_scheme_id;
