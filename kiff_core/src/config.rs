use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use kiff_api::{LayerSet, RevisionRef, DEFAULT_LAYERS};

use crate::{Error, Result};

/// Resolution used when none is requested.
pub const DEFAULT_RESOLUTION_DPI: u32 = 400;
/// Diff output directory used when none is requested.
pub const DEFAULT_DIFF_DIR: &str = "diffs";
/// Upper bound on any single external tool invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Everything a comparison run needs, validated.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareConfig {
    /// Layout document, relative to the working directory.
    pub document: Utf8PathBuf,
    /// Revision to compare against.
    pub target: RevisionRef,
    /// Layers to compare, inner copper layers included.
    pub layers: LayerSet,
    /// Rasterization resolution.
    pub resolution_dpi: u32,
    /// Keep the intermediate render directories.
    pub keep_renders: bool,
    /// Where diff images and the summary go.
    pub diff_dir: Utf8PathBuf,
    /// Invert rasters before diffing (dark content on a light page).
    pub invert: bool,
    /// Timeout applied to each external tool invocation.
    pub tool_timeout: Duration,
    /// Explicit kicad-cli binary.
    pub kicad_cli: Option<OsString>,
    /// Explicit pdftoppm binary.
    pub pdftoppm: Option<OsString>,
}

impl CompareConfig {
    /// Defaults for comparing `document` against `HEAD`.
    #[must_use]
    pub fn new(document: impl Into<Utf8PathBuf>) -> Self {
        Self {
            document: document.into(),
            target: RevisionRef::Head,
            layers: LayerSet::new(DEFAULT_LAYERS.iter().copied()),
            resolution_dpi: DEFAULT_RESOLUTION_DPI,
            keep_renders: false,
            diff_dir: Utf8PathBuf::from(DEFAULT_DIFF_DIR),
            invert: true,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            kicad_cli: None,
            pdftoppm: None,
        }
    }

    /// Compare against `target` instead of `HEAD`.
    #[must_use]
    pub fn with_target(mut self, target: RevisionRef) -> Self {
        self.target = target;
        self
    }

    /// Replace the layer selection.
    #[must_use]
    pub fn with_layers(mut self, layers: LayerSet) -> Self {
        self.layers = layers;
        self
    }

    /// Check the invariants the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending value.
    pub fn validate(self) -> Result<Self> {
        if self.resolution_dpi == 0 {
            return Err(invalid("resolution must be greater than zero"));
        }
        if self.layers.is_empty() {
            return Err(invalid("at least one layer must be selected"));
        }
        if self.tool_timeout.is_zero() {
            return Err(invalid("tool timeout must be greater than zero"));
        }
        if self.diff_dir.as_str().is_empty() {
            return Err(invalid("diff directory must not be empty"));
        }
        if !self.document.is_file() {
            return Err(invalid(format!("{} is not a file", self.document)));
        }
        Ok(self)
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidConfig {
        reason: reason.into(),
    }
}
