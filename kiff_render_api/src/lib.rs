mod types;

pub use types::{RenderError, RenderOutput, RenderRequest, RenderResult, RenderedLayer};

use camino::Utf8Path;
use image::GrayImage;
use kiff_api::BoundingBox;

/// Exports named layers of a layout document (e.g., kicad-cli).
pub trait Renderer: Send + Sync {
    /// Stable identifier used for logging.
    fn id(&self) -> &'static str;

    /// Export every layer in `request.layers` into `request.output_dir`.
    ///
    /// Layers that fail individually are left out of the output; the call
    /// only fails when the document is unreadable or nothing was exported.
    ///
    /// # Errors
    ///
    /// Implementors surface tool discovery, timeout and export failures.
    fn render(&self, request: &RenderRequest) -> RenderResult<RenderOutput>;
}

/// Turns an exported layer artifact into an 8-bit grayscale raster.
pub trait Rasterizer: Send + Sync {
    /// Rasterize `artifact` at `dpi`, cropped to `bounds` when given.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool fails or its output cannot be decoded.
    fn rasterize(
        &self,
        artifact: &Utf8Path,
        bounds: Option<&BoundingBox>,
        dpi: u32,
    ) -> RenderResult<GrayImage>;
}
