use std::fmt;

use serde::{Deserialize, Serialize};

/// Symbolic name of the currently checked-out revision.
pub const HEAD: &str = "HEAD";

/// Point in the version history that a comparison targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum RevisionRef {
    /// The revision the working tree is based on (`HEAD`).
    Head,
    /// Any other revision expression understood by the VCS (`HEAD~1`, a tag, a SHA).
    Named(String),
}

impl RevisionRef {
    /// Parse a user supplied revision expression.
    ///
    /// An empty string and `HEAD` both denote [`RevisionRef::Head`].
    #[must_use]
    pub fn parse(expr: &str) -> Self {
        let trimmed = expr.trim();
        if trimmed.is_empty() || trimmed == HEAD {
            Self::Head
        } else {
            Self::Named(trimmed.to_owned())
        }
    }

    /// Returns `true` when the reference points at the current `HEAD`.
    #[must_use]
    pub const fn is_head(&self) -> bool {
        matches!(self, Self::Head)
    }

    /// Revision expression suitable for handing to the VCS.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Head => HEAD,
            Self::Named(name) => name,
        }
    }
}

impl Default for RevisionRef {
    fn default() -> Self {
        Self::Head
    }
}

impl fmt::Display for RevisionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of the on-disk checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingTreeState {
    /// Human readable descriptor (`v1.2-3-gabc1234-dirty`).
    pub identity: String,
    /// Whether tracked files differ from the last commit.
    pub dirty: bool,
}
