//! Crate-wide error type.
//!
//! Errors carry `(severity, category, code)` per the taxonomy the engine is
//! built against: parsing errors, segment-pipeline failures, and network
//! failures all flow through [`EngineError`] so the orchestrator can apply
//! the propagation policy (re-classify manifest-refresh failures from
//! `Critical` to `Recoverable`, drop non-fatal per-representation errors).

use std::fmt;

/// How severely an error should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Terminates the current top-level operation (process exit, unless the
    /// caller re-classifies it).
    Critical,
    /// Logged and absorbed; the caller continues with degraded state.
    Recoverable,
}

/// Broad subsystem an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Manifest,
    Media,
    Player,
    Segment,
    Network,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Manifest => "MANIFEST",
            Category::Media => "MEDIA",
            Category::Player => "PLAYER",
            Category::Segment => "SEGMENT",
            Category::Network => "NETWORK",
        };
        write!(f, "{s}")
    }
}

/// A single `(severity, category, code)` error code from the specification's
/// error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    DashInvalidXml,
    DashNoSegmentInfo,
    DashUnsupportedContainer,
    DashWebmMissingInit,
    DashConflictingKeyIds,
    DashNoCommonKeySystem,
    DashDuplicateRepresentationId,
    DashEmptyPeriod,
    DashEmptyAdaptationSet,
    DashPsshBadEncoding,
    DashMultipleKeyIdsNotSupported,
    DashXlinkDepthLimit,
    Mp4SidxWrongBoxType,
    Mp4SidxInvalidTimescale,
    Mp4SidxTypeNotSupported,
    WebmCuesElementMissing,
    WebmEbmlHeaderElementMissing,
    WebmSegmentElementMissing,
    WebmInfoElementMissing,
    WebmDurationElementMissing,
    WebmCueTimeElementMissing,
    WebmCueTrackPositionsElementMissing,
    BufferReadOutOfBounds,
    JsIntegerOverflow,
    EbmlOverflow,
    EbmlBadFloatingPointSize,
    OperationAborted,
    SegmentManipulationFailed,
    HlsCouldNotGuessCodecs,
    NoLanguageMatch,
    /// The key API answered but refused the key (`status=false`) or omitted
    /// the requested key id; the orchestrator treats either as a fatal
    /// cycle error (spec.md "Decryption-key API").
    KeyFetchFailed,
}

impl Code {
    /// Default `(severity, category)` for this code. Callers may override
    /// the severity (e.g. the orchestrator re-classifies manifest-refresh
    /// failures as `Recoverable`).
    pub fn defaults(self) -> (Severity, Category) {
        use Category::*;
        use Severity::*;
        match self {
            Code::DashInvalidXml => (Critical, Manifest),
            Code::DashNoSegmentInfo => (Critical, Manifest),
            Code::DashUnsupportedContainer => (Critical, Manifest),
            Code::DashWebmMissingInit => (Critical, Manifest),
            Code::DashConflictingKeyIds => (Critical, Manifest),
            Code::DashNoCommonKeySystem => (Critical, Manifest),
            Code::DashDuplicateRepresentationId => (Critical, Manifest),
            Code::DashEmptyPeriod => (Recoverable, Manifest),
            Code::DashEmptyAdaptationSet => (Recoverable, Manifest),
            Code::DashPsshBadEncoding => (Recoverable, Media),
            Code::DashMultipleKeyIdsNotSupported => (Critical, Manifest),
            Code::DashXlinkDepthLimit => (Critical, Manifest),
            Code::Mp4SidxWrongBoxType => (Critical, Media),
            Code::Mp4SidxInvalidTimescale => (Critical, Media),
            Code::Mp4SidxTypeNotSupported => (Critical, Media),
            Code::WebmCuesElementMissing => (Critical, Media),
            Code::WebmEbmlHeaderElementMissing => (Critical, Media),
            Code::WebmSegmentElementMissing => (Critical, Media),
            Code::WebmInfoElementMissing => (Critical, Media),
            Code::WebmDurationElementMissing => (Critical, Media),
            Code::WebmCueTimeElementMissing => (Critical, Media),
            Code::WebmCueTrackPositionsElementMissing => (Critical, Media),
            Code::BufferReadOutOfBounds => (Critical, Media),
            Code::JsIntegerOverflow => (Critical, Media),
            Code::EbmlOverflow => (Critical, Media),
            Code::EbmlBadFloatingPointSize => (Critical, Media),
            Code::OperationAborted => (Recoverable, Player),
            Code::SegmentManipulationFailed => (Critical, Segment),
            Code::HlsCouldNotGuessCodecs => (Recoverable, Segment),
            Code::NoLanguageMatch => (Critical, Player),
            Code::KeyFetchFailed => (Critical, Network),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Code::DashInvalidXml => "DASH_INVALID_XML",
            Code::DashNoSegmentInfo => "DASH_NO_SEGMENT_INFO",
            Code::DashUnsupportedContainer => "DASH_UNSUPPORTED_CONTAINER",
            Code::DashWebmMissingInit => "DASH_WEBM_MISSING_INIT",
            Code::DashConflictingKeyIds => "DASH_CONFLICTING_KEY_IDS",
            Code::DashNoCommonKeySystem => "DASH_NO_COMMON_KEY_SYSTEM",
            Code::DashDuplicateRepresentationId => "DASH_DUPLICATE_REPRESENTATION_ID",
            Code::DashEmptyPeriod => "DASH_EMPTY_PERIOD",
            Code::DashEmptyAdaptationSet => "DASH_EMPTY_ADAPTATION_SET",
            Code::DashPsshBadEncoding => "DASH_PSSH_BAD_ENCODING",
            Code::DashMultipleKeyIdsNotSupported => "DASH_MULTIPLE_KEY_IDS_NOT_SUPPORTED",
            Code::DashXlinkDepthLimit => "DASH_XLINK_DEPTH_LIMIT",
            Code::Mp4SidxWrongBoxType => "MP4_SIDX_WRONG_BOX_TYPE",
            Code::Mp4SidxInvalidTimescale => "MP4_SIDX_INVALID_TIMESCALE",
            Code::Mp4SidxTypeNotSupported => "MP4_SIDX_TYPE_NOT_SUPPORTED",
            Code::WebmCuesElementMissing => "WEBM_CUES_ELEMENT_MISSING",
            Code::WebmEbmlHeaderElementMissing => "WEBM_EBML_HEADER_ELEMENT_MISSING",
            Code::WebmSegmentElementMissing => "WEBM_SEGMENT_ELEMENT_MISSING",
            Code::WebmInfoElementMissing => "WEBM_INFO_ELEMENT_MISSING",
            Code::WebmDurationElementMissing => "WEBM_DURATION_ELEMENT_MISSING",
            Code::WebmCueTimeElementMissing => "WEBM_CUE_TIME_ELEMENT_MISSING",
            Code::WebmCueTrackPositionsElementMissing => "WEBM_CUE_TRACK_POSITIONS_ELEMENT_MISSING",
            Code::BufferReadOutOfBounds => "BUFFER_READ_OUT_OF_BOUNDS",
            Code::JsIntegerOverflow => "JS_INTEGER_OVERFLOW",
            Code::EbmlOverflow => "EBML_OVERFLOW",
            Code::EbmlBadFloatingPointSize => "EBML_BAD_FLOATING_POINT_SIZE",
            Code::OperationAborted => "OPERATION_ABORTED",
            Code::SegmentManipulationFailed => "SEGMENT_MANIPULATION_FAILED",
            Code::HlsCouldNotGuessCodecs => "HLS_COULD_NOT_GUESS_CODECS",
            Code::NoLanguageMatch => "NO_LANGUAGE_MATCH",
            Code::KeyFetchFailed => "KEY_FETCH_FAILED",
        }
    }
}

/// The crate-wide error type.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("{code}: {message}")]
    Coded {
        code: Code,
        severity: Severity,
        message: String,
    },

    #[error("origin fetch failed: {0}")]
    OriginFetch(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decrypter exited with status {0}: {1}")]
    DecrypterFailed(i32, String),
}

impl EngineError {
    /// Build a coded error using the code's default severity/category.
    pub fn coded(code: Code, message: impl Into<String>) -> Self {
        let (severity, _category) = code.defaults();
        EngineError::Coded {
            code,
            severity,
            message: message.into(),
        }
    }

    /// Returns the code if this is a `Coded` variant.
    pub fn code(&self) -> Option<Code> {
        match self {
            EngineError::Coded { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Current severity of this error.
    pub fn severity(&self) -> Severity {
        match self {
            EngineError::Coded { severity, .. } => *severity,
            EngineError::OriginFetch(_) => Severity::Critical,
            EngineError::Io(_) => Severity::Critical,
            EngineError::DecrypterFailed(..) => Severity::Critical,
        }
    }

    /// Re-classify a `Critical` error as `Recoverable` in place. Used by the
    /// orchestrator's manifest-refresh path so the refresh timer survives a
    /// failed fetch/parse instead of terminating the process.
    pub fn into_recoverable(self) -> Self {
        match self {
            EngineError::Coded {
                code, message, ..
            } => EngineError::Coded {
                code,
                severity: Severity::Recoverable,
                message,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
