use serde::{Deserialize, Serialize};

/// Millimetres per inch.
pub const MM_PER_INCH: f64 = 25.4;

/// Physical crop window in inches, measured from the top-left page corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Horizontal extent, strictly positive.
    pub width: f64,
    /// Vertical extent, strictly positive.
    pub height: f64,
}

impl BoundingBox {
    /// Construct a window, rejecting non-finite or non-positive extents.
    #[must_use]
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Option<Self> {
        let finite = [x, y, width, height].iter().all(|value| value.is_finite());
        (finite && width > 0.0 && height > 0.0).then_some(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// Smallest window covering two corner points given in millimetres.
    #[must_use]
    pub fn from_mm_extents(min: (f64, f64), max: (f64, f64)) -> Option<Self> {
        Self::new(
            min.0 / MM_PER_INCH,
            min.1 / MM_PER_INCH,
            (max.0 - min.0) / MM_PER_INCH,
            (max.1 - min.1) / MM_PER_INCH,
        )
    }

    /// Returns `true` when the window satisfies the positive-extent invariant.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        Self::new(self.x, self.y, self.width, self.height).is_some()
    }

    /// Window converted to whole pixels at `dpi` as `(x, y, width, height)`.
    ///
    /// Values are truncated toward zero, matching how rasterizers take crop
    /// arguments.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_pixels(&self, dpi: u32) -> (u32, u32, u32, u32) {
        let scale = f64::from(dpi);
        let px = |inches: f64| (inches * scale).max(0.0) as u32;
        (px(self.x), px(self.y), px(self.width), px(self.height))
    }
}
