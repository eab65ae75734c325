use camino::{Utf8Path, Utf8PathBuf};

use kiff_api::{BoundingBox, LayerSet};

/// Parameters for a single export of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    /// Layout document to export.
    pub document: Utf8PathBuf,
    /// Directory receiving one artifact per layer.
    pub output_dir: Utf8PathBuf,
    /// Layers to export, in order.
    pub layers: LayerSet,
    /// Crop window already fixed by an earlier render, if any.
    pub bounds: Option<BoundingBox>,
    /// Output resolution in dots per inch.
    pub resolution_dpi: u32,
}

impl RenderRequest {
    /// Construct a request without a crop window.
    #[must_use]
    pub fn new(
        document: impl Into<Utf8PathBuf>,
        output_dir: impl Into<Utf8PathBuf>,
        layers: LayerSet,
        resolution_dpi: u32,
    ) -> Self {
        Self {
            document: document.into(),
            output_dir: output_dir.into(),
            layers,
            bounds: None,
            resolution_dpi,
        }
    }

    /// Attach a crop window.
    #[must_use]
    pub fn with_bounds(mut self, bounds: Option<BoundingBox>) -> Self {
        self.bounds = bounds;
        self
    }

    /// File stem of the document (`board` for `pcb/board.kicad_pcb`).
    #[must_use]
    pub fn document_stem(&self) -> &str {
        self.document.file_stem().unwrap_or("board")
    }
}

/// Artifact exported for one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedLayer {
    /// Layer name as requested.
    pub name: String,
    /// Path of the exported artifact.
    pub artifact: Utf8PathBuf,
}

/// Everything a render produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderOutput {
    /// Successfully exported layers, in request order.
    pub layers: Vec<RenderedLayer>,
    /// Physical extent of the document when the renderer could determine it.
    pub bounds: Option<BoundingBox>,
}

impl RenderOutput {
    /// Artifact exported for `layer`, if that layer succeeded.
    #[must_use]
    pub fn artifact(&self, layer: &str) -> Option<&Utf8Path> {
        self.layers
            .iter()
            .find(|rendered| rendered.name == layer)
            .map(|rendered| rendered.artifact.as_path())
    }
}

/// Errors surfaced by renderers and rasterizers.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The external tool could not be located.
    #[error("{tool} is not available: {reason}")]
    ToolUnavailable {
        /// Tool that was searched for.
        tool: String,
        /// Why discovery failed.
        reason: String,
    },
    /// The external tool did not finish in time and was killed.
    #[error("{tool} timed out after {seconds}s")]
    Timeout {
        /// Tool that timed out.
        tool: String,
        /// Configured limit.
        seconds: u64,
    },
    /// The external tool exited unsuccessfully.
    #[error("{tool} failed with status {status}: {stderr}")]
    CommandFailed {
        /// Tool that failed.
        tool: String,
        /// Exit code, or `terminated` when killed by a signal.
        status: String,
        /// Trimmed standard error output.
        stderr: String,
    },
    /// The document cannot be read.
    #[error("{path}: not readable")]
    Unreadable {
        /// Offending document.
        path: Utf8PathBuf,
    },
    /// No requested layer was exported.
    #[error("nothing rendered from {path}")]
    NothingRendered {
        /// Document that was exported.
        path: Utf8PathBuf,
    },
    /// Rasterizer output could not be decoded.
    #[error("failed to decode raster for {path}: {source}")]
    Decode {
        /// Artifact being rasterized.
        path: Utf8PathBuf,
        /// Underlying decoder error.
        #[source]
        source: image::ImageError,
    },
    /// Filesystem or process plumbing failed.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Path or command involved.
        path: String,
        /// Source I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Convenience result alias for renderer operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
