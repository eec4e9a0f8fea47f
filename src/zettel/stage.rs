use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::zettel::id::Identifier;

/// One processing stage of the archive pipeline, in dependency order:
/// snapshot the card page, fetch the structured record, convert it to a
/// document.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Snapshot,
    Fetch,
    Convert,
}

impl StageId {
    pub const PIPELINE: [StageId; 3] = [StageId::Snapshot, StageId::Fetch, StageId::Convert];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Fetch => "fetch",
            Self::Convert => "convert",
        }
    }

    pub fn artifact_ext(self) -> &'static str {
        match self {
            Self::Snapshot => "html",
            Self::Fetch => "json",
            Self::Convert => "md",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classification for one stage invocation. Transient failures are
/// retried within a pass and re-attempted in later passes; permanent
/// failures are recorded and excluded from future automatic retries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("permanent failure: {0}")]
    Permanent(String),
}

/// Reference to a produced artifact: its path and content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub path: String,
    pub sha256: String,
}

/// The stage function contract. Implementations must be safely re-invokable
/// for the same identifier; re-processing overwrites the same artifact.
pub trait StageFn: Sync {
    fn invoke(&self, id: &Identifier) -> Result<ArtifactRef, StageError>;
}

impl<F> StageFn for F
where
    F: Fn(&Identifier) -> Result<ArtifactRef, StageError> + Sync,
{
    fn invoke(&self, id: &Identifier) -> Result<ArtifactRef, StageError> {
        self(id)
    }
}
