//! Pixel-level differencing of two renders of the same layer.
//!
//! Channel convention of the produced image:
//! - red (channel 0): content only in the reference (target revision), reported as `removed`
//! - green (channel 1): content only in the current working tree, reported as `added`
//! - all channels: `0.2` of the content common to both, a dim neutral tone

use image::{GrayImage, Rgb, RgbImage};
use kiff_api::ChangeFractions;

use crate::{Error, Result};

const COMMON_WEIGHT: f64 = 0.2;
const CHANGE_WEIGHT: f64 = 0.8;
const MAX_INTENSITY: u64 = u8::MAX as u64;

/// Diff image plus its change metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffResult {
    /// Three-channel visualisation, same dimensions as the inputs.
    pub image: RgbImage,
    /// Fractions of the maximum total intensity that changed.
    pub changes: ChangeFractions,
}

/// Computes per-layer visual diffs.
#[derive(Debug, Clone, Copy)]
pub struct DiffEngine {
    invert: bool,
}

impl DiffEngine {
    /// Engine for dark content on a light background (the usual plot output).
    #[must_use]
    pub const fn new() -> Self {
        Self { invert: true }
    }

    /// Choose whether inputs are inverted before combining.
    ///
    /// Pass `false` for renders that already draw light content on dark.
    #[must_use]
    pub const fn with_invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    /// Diff `current` (working tree) against `reference` (target revision).
    ///
    /// Intensities are combined bitwise: `common = current & reference`,
    /// `only_reference = reference & !common`, `only_current = current & !common`.
    /// Swapping the arguments swaps `added` and `removed`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] when the rasters differ in size.
    /// Rasters are never resized or truncated.
    pub fn diff(&self, current: &GrayImage, reference: &GrayImage) -> Result<DiffResult> {
        if current.dimensions() != reference.dimensions() {
            return Err(Error::DimensionMismatch {
                before: current.dimensions(),
                after: reference.dimensions(),
            });
        }

        let (width, height) = current.dimensions();
        let mut image = RgbImage::new(width, height);
        let mut only_current_sum: u64 = 0;
        let mut only_reference_sum: u64 = 0;

        for ((out, cur), refr) in image
            .pixels_mut()
            .zip(current.pixels())
            .zip(reference.pixels())
        {
            let (a, b) = if self.invert {
                (!cur.0[0], !refr.0[0])
            } else {
                (cur.0[0], refr.0[0])
            };

            let common = a & b;
            let only_reference = b & !common;
            let only_current = a & !common;

            only_current_sum += u64::from(only_current);
            only_reference_sum += u64::from(only_reference);

            let dim = f64::from(common) * COMMON_WEIGHT;
            *out = Rgb([
                channel(dim + f64::from(only_reference) * CHANGE_WEIGHT),
                channel(dim + f64::from(only_current) * CHANGE_WEIGHT),
                channel(dim),
            ]);
        }

        let total = u64::from(width) * u64::from(height) * MAX_INTENSITY;
        Ok(DiffResult {
            image,
            changes: ChangeFractions {
                added: fraction(only_current_sum, total),
                removed: fraction(only_reference_sum, total),
            },
        })
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn channel(value: f64) -> u8 {
    // truncation toward zero, capped at full intensity
    value.min(255.0) as u8
}

#[allow(clippy::cast_precision_loss)]
fn fraction(sum: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        sum as f64 / total as f64
    }
}
