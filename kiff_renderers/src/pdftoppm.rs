use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8Path;
use image::{GrayImage, ImageFormat};
use kiff_api::BoundingBox;
use kiff_render_api::{Rasterizer, RenderError, RenderResult};

use crate::process::ToolCommand;

const TOOL: &str = "pdftoppm";

/// Rasterizes PDF layer plots with poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    tool: ToolCommand,
}

impl PdftoppmRasterizer {
    /// Use `pdftoppm` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tool: ToolCommand::new(TOOL, TOOL),
        }
    }

    /// Use `binary` instead of the one on `PATH`.
    #[must_use]
    pub fn with_binary(mut self, binary: Option<impl Into<OsString>>) -> Self {
        if let Some(binary) = binary {
            self.tool = ToolCommand::new(TOOL, binary);
        }
        self
    }

    /// Limit each invocation to `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.tool = self.tool.with_timeout(timeout);
        self
    }
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Rasterizer for PdftoppmRasterizer {
    fn rasterize(
        &self,
        artifact: &Utf8Path,
        bounds: Option<&BoundingBox>,
        dpi: u32,
    ) -> RenderResult<GrayImage> {
        let output = self.tool.run(&crop_args(artifact, bounds, dpi))?;
        let decoded = image::load_from_memory_with_format(&output.stdout, ImageFormat::Pnm)
            .map_err(|source| RenderError::Decode {
                path: artifact.to_path_buf(),
                source,
            })?;
        Ok(decoded.to_luma8())
    }
}

fn crop_args(artifact: &Utf8Path, bounds: Option<&BoundingBox>, dpi: u32) -> Vec<String> {
    let mut args = vec!["-r".to_string(), dpi.to_string()];
    if let Some(bounds) = bounds {
        let (x, y, width, height) = bounds.to_pixels(dpi);
        args.extend([
            "-x".to_string(),
            x.to_string(),
            "-y".to_string(),
            y.to_string(),
            "-W".to_string(),
            width.to_string(),
            "-H".to_string(),
            height.to_string(),
        ]);
    }
    args.push(artifact.to_string());
    args
}
