//! Keeps both renders of a comparison on one physical crop window.

use kiff_api::BoundingBox;

/// Anchors the crop window to the first render of a comparison.
///
/// The first call to [`BoundsResolver::resolve`] fixes the window; every
/// later call returns that same window, whatever the later render reports.
/// Letting each state use its own extent would crop and scale the two
/// rasters differently whenever the board outline changed.
#[derive(Debug, Default, Clone)]
pub struct BoundsResolver {
    anchored: Option<Option<BoundingBox>>,
}

impl BoundsResolver {
    /// A resolver with no window fixed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { anchored: None }
    }

    /// Window to hand to the next render, before that render runs.
    ///
    /// `None` until the first render has been resolved.
    #[must_use]
    pub fn requested(&self) -> Option<BoundingBox> {
        self.anchored.flatten()
    }

    /// Returns `true` once the first render has fixed the window.
    #[must_use]
    pub const fn is_anchored(&self) -> bool {
        self.anchored.is_some()
    }

    /// Window to use for the render that reported `reported`.
    ///
    /// Invalid windows (non-positive or non-finite extents) are normalised to
    /// `None`, meaning "full page".
    pub fn resolve(&mut self, reported: Option<BoundingBox>) -> Option<BoundingBox> {
        if let Some(anchored) = self.anchored {
            if reported != anchored {
                tracing::debug!(?reported, ?anchored, "ignoring bounds of later render");
            }
            return anchored;
        }

        let normalized = reported.filter(BoundingBox::is_valid);
        if reported.is_some() && normalized.is_none() {
            tracing::warn!(?reported, "renderer reported an empty crop window, using full page");
        }
        self.anchored = Some(normalized);
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(width: f64) -> BoundingBox {
        BoundingBox {
            x: 1.0,
            y: 1.0,
            width,
            height: 2.0,
        }
    }

    #[test]
    fn first_render_fixes_the_window() {
        let mut resolver = BoundsResolver::new();
        assert!(resolver.requested().is_none());

        assert_eq!(resolver.resolve(Some(window(3.0))), Some(window(3.0)));
        assert_eq!(resolver.requested(), Some(window(3.0)));
        assert_eq!(resolver.resolve(Some(window(5.0))), Some(window(3.0)));
        assert_eq!(resolver.resolve(None), Some(window(3.0)));
    }

    #[test]
    fn full_page_is_anchored_too() {
        let mut resolver = BoundsResolver::new();
        assert_eq!(resolver.resolve(None), None);
        assert!(resolver.is_anchored());
        assert_eq!(resolver.resolve(Some(window(3.0))), None);
    }

    #[test]
    fn invalid_window_means_full_page() {
        let mut resolver = BoundsResolver::new();
        assert_eq!(resolver.resolve(Some(window(0.0))), None);
        assert!(resolver.is_anchored());
    }
}
