//! Error types for index build, cache load, query, and evaluation.
//!
//! Messages are meant to be shown to users as-is: they name the failing
//! stage and the condition, never a file path or a raw backend message.
//! The underlying cause stays reachable through `source()` for logging.

use std::fmt;
use std::io;
use std::time::Duration;

/// Pipeline stage a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Import,
    Build,
    Load,
    Query,
    Evaluate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Import => "import",
            Stage::Build => "build",
            Stage::Load => "load",
            Stage::Query => "query",
            Stage::Evaluate => "evaluate",
        };
        f.write_str(s)
    }
}

/// Failures raised by a [`crate::store::DocumentStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("store read timed out after {0:?}")]
    Timeout(Duration),

    #[error("store backend error: {0}")]
    Backend(#[from] sled::Error),
}

/// Why a cache file was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorruptReason {
    BadMagic,
    UnsupportedVersion(u32),
    Truncated,
    ChecksumMismatch,
    Undecodable,
    Inconsistent(&'static str),
}

impl fmt::Display for CorruptReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorruptReason::BadMagic => f.write_str("unrecognized format marker"),
            CorruptReason::UnsupportedVersion(v) => write!(f, "unsupported format version {v}"),
            CorruptReason::Truncated => f.write_str("file is truncated"),
            CorruptReason::ChecksumMismatch => f.write_str("checksum mismatch"),
            CorruptReason::Undecodable => f.write_str("payload could not be decoded"),
            CorruptReason::Inconsistent(what) => write!(f, "inconsistent contents: {what}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("{0} failed: document store unavailable")]
    StoreUnavailable(Stage, #[source] StoreError),

    #[error("{0} failed: index cache is corrupt ({1}); rebuild the index")]
    CacheCorrupt(Stage, CorruptReason),

    #[error("{0} failed: no index cache found; run build-index first")]
    CacheMissing(Stage),

    #[error(
        "{stage} failed: cached index uses k1={cached_k1}, b={cached_b} but k1={k1}, b={b} was requested; rebuild the index"
    )]
    ParamsMismatch {
        stage: Stage,
        cached_k1: f64,
        cached_b: f64,
        k1: f64,
        b: f64,
    },

    #[error("{0} failed: i/o error ({kind})", kind = .1.kind())]
    Io(Stage, #[source] io::Error),

    #[error("evaluate failed: judgments are not valid ({0})")]
    InvalidJudgments(String),

    #[error("{0} failed: invalid input ({1})")]
    InvalidInput(Stage, String),
}

impl SearchError {
    pub fn stage(&self) -> Stage {
        match self {
            SearchError::StoreUnavailable(stage, _)
            | SearchError::CacheCorrupt(stage, _)
            | SearchError::CacheMissing(stage)
            | SearchError::Io(stage, _)
            | SearchError::InvalidInput(stage, _) => *stage,
            SearchError::ParamsMismatch { stage, .. } => *stage,
            SearchError::InvalidJudgments(_) => Stage::Evaluate,
        }
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
