//! Mapping between evaluation-engine namespaces and mirrored kinds.

use flagsync_state::Kind;

use crate::error::{Result, SyncError};

/// Namespace-level view of [`Kind`] used by the evaluation engine.
pub trait KindExt: Sized {
    /// Map an engine namespace (`features`, `segments`) to a kind.
    fn from_namespace(namespace: &str) -> Result<Self>;

    /// Engine namespace of this kind.
    fn namespace(&self) -> &'static str;
}

impl KindExt for Kind {
    fn from_namespace(namespace: &str) -> Result<Self> {
        match namespace {
            "features" => Ok(Kind::Flag),
            "segments" => Ok(Kind::Segment),
            other => Err(SyncError::UnsupportedKind(other.to_string())),
        }
    }

    fn namespace(&self) -> &'static str {
        match self {
            Kind::Flag => "features",
            Kind::Segment => "segments",
        }
    }
}
