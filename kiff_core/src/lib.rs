//! Core library for kiff, the visual diff of layout documents across git
//! revisions.
//!
//! The crate is layered around four responsibilities:
//! - switching the working tree between the current and target revision
//!   without losing uncommitted work
//! - keeping both renders on an identical crop window
//! - pixel-level differencing of the per-layer rasters
//! - persisting diff images and the run summary

#![warn(
    clippy::all,
    clippy::cargo,
    clippy::nursery,
    clippy::pedantic,
    missing_docs
)]
#![cfg_attr(
    not(test),
    deny(
        clippy::dbg_macro,
        clippy::expect_used,
        clippy::panic,
        clippy::print_stderr,
        clippy::print_stdout,
        clippy::todo,
        clippy::unwrap_used
    )
)]

/// Diff image and summary persistence.
pub mod artifacts;
/// Crop window anchoring across renders.
pub mod bounds;
/// Validated run configuration.
pub mod config;
/// Pixel-level raster differencing.
pub mod diff;
/// Tracing subscriber setup for the binary.
pub mod logging;
/// End-to-end comparison run.
pub mod pipeline;
/// Git working tree access.
pub mod repository;
/// Transactional switching between current and target states.
pub mod snapshot;

use std::fmt;

pub use kiff_api::{
    BoundingBox, ChangeFractions, ComparisonReport, LayerOutcome, LayerReport, LayerSet,
    RevisionRef, WorkingTreeState,
};
pub use kiff_render_api::{
    Rasterizer, RenderError, RenderOutput, RenderRequest, RenderedLayer, Renderer,
};

/// Common result type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Which render of the comparison an error or event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    /// Render of the working tree as found.
    Current,
    /// Render of the target revision.
    Target,
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => f.write_str("current"),
            Self::Target => f.write_str("target"),
        }
    }
}

/// Restoration step that could not be completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStep {
    /// Checking the original revision back out.
    CheckoutBack,
    /// Re-applying stashed modifications.
    Unstash,
}

impl fmt::Display for RestoreStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckoutBack => f.write_str("checkout of the original revision"),
            Self::Unstash => f.write_str("stash pop"),
        }
    }
}

/// Errors surfaced by the core library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The working tree has no modifications and `HEAD` was the target.
    #[error("no local changes, nothing to compare; pick a target revision")]
    NothingToCompare,
    /// Provided path does not correspond to a git repository.
    #[error("path does not reference a git repository: {path}")]
    VcsUnavailable {
        /// Path that failed to resolve to a repository.
        path: String,
    },
    /// No descriptor could be produced for the checked-out state.
    #[error("no git description, can't continue: {reason}")]
    VcsDescribe {
        /// Why describing failed.
        reason: String,
    },
    /// Underlying git operation failed.
    #[error("git error: {source}")]
    Git {
        /// Original libgit2 error.
        #[from]
        source: git2::Error,
    },
    /// A version-control primitive failed.
    #[error("{operation} failed: {message}")]
    Vcs {
        /// Equivalent git command.
        operation: &'static str,
        /// Failure description.
        message: String,
    },
    /// A render of one of the two states failed.
    #[error("render of the {stage} state failed: {source}")]
    Render {
        /// Which render failed.
        stage: RenderStage,
        /// Renderer failure.
        #[source]
        source: RenderError,
    },
    /// Rasterizing a single layer artifact failed.
    #[error("rasterizing {path} failed: {source}")]
    Rasterize {
        /// Artifact being rasterized.
        path: String,
        /// Rasterizer failure.
        #[source]
        source: RenderError,
    },
    /// The two rasters of a layer have different sizes.
    #[error("dimension mismatch: before is {before:?}, after is {after:?} (cols, rows)")]
    DimensionMismatch {
        /// Dimensions of the first raster.
        before: (u32, u32),
        /// Dimensions of the second raster.
        after: (u32, u32),
    },
    /// Restoring the working tree failed; manual recovery is needed.
    #[error(
        "working tree was not restored ({step} failed: {cause}); manual recovery required{}",
        pending_suffix(.pending)
    )]
    WorkingTreeNotRestored {
        /// Step that failed.
        step: RestoreStep,
        /// Why it failed.
        #[source]
        cause: Box<Error>,
        /// Error that was already propagating when restoration ran.
        pending: Option<Box<Error>>,
    },
    /// Configuration values were rejected.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong.
        reason: String,
    },
    /// Encoding or writing a diff image failed.
    #[error("failed to write image {path}: {source}")]
    Image {
        /// Destination path.
        path: String,
        /// Encoder error.
        #[source]
        source: image::ImageError,
    },
    /// Filesystem interaction failed.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Filesystem path involved in the failed operation.
        path: String,
        /// Source I/O error returned by the standard library.
        #[source]
        source: std::io::Error,
    },
}

fn pending_suffix(pending: &Option<Box<Error>>) -> String {
    pending
        .as_ref()
        .map(|err| format!(" (while handling: {err})"))
        .unwrap_or_default()
}

impl Error {
    /// Returns `true` for failures in the version-control layer.
    #[must_use]
    pub const fn is_vcs(&self) -> bool {
        matches!(
            self,
            Self::VcsUnavailable { .. }
                | Self::VcsDescribe { .. }
                | Self::Git { .. }
                | Self::Vcs { .. }
        )
    }
}
