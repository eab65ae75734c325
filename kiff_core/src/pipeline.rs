//! One comparison run: render both states, then diff every layer.

use std::collections::HashMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use image::GrayImage;
use kiff_api::{BoundingBox, ChangeFractions, ComparisonReport, LayerOutcome, LayerReport};
use kiff_render_api::{Rasterizer, RenderOutput, RenderRequest, Renderer};
use rayon::prelude::*;

use crate::artifacts::ArtifactWriter;
use crate::bounds::BoundsResolver;
use crate::config::CompareConfig;
use crate::diff::DiffEngine;
use crate::repository::VersionControl;
use crate::snapshot::SnapshotManager;
use crate::{Error, RenderStage, Result};

const RENDER_DIR_PREFIX: &str = "plot_";
const TARGET_COLLISION_SUFFIX: &str = "-target";

/// Output of one render together with the crop window both states share.
#[derive(Debug, Clone)]
struct RenderPass {
    output: RenderOutput,
    bounds: Option<BoundingBox>,
}

/// Drives a full comparison with the given collaborators.
#[derive(Debug)]
pub struct Pipeline<R, Z> {
    config: CompareConfig,
    renderer: R,
    rasterizer: Z,
    work_dir: Utf8PathBuf,
}

impl<R: Renderer, Z: Rasterizer> Pipeline<R, Z> {
    /// Pipeline writing intermediate renders into the current directory.
    pub fn new(config: CompareConfig, renderer: R, rasterizer: Z) -> Self {
        Self {
            config,
            renderer,
            rasterizer,
            work_dir: Utf8PathBuf::from("."),
        }
    }

    /// Place the `plot_<identity>` directories under `dir`.
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    /// Configuration this pipeline runs with.
    #[must_use]
    pub const fn config(&self) -> &CompareConfig {
        &self.config
    }

    /// Render, diff and persist; returns the per-layer report.
    ///
    /// Intermediate render directories are removed afterwards, on success
    /// and failure alike, unless the configuration keeps them.
    ///
    /// # Errors
    ///
    /// Any [`SnapshotManager::run_comparison`] failure, or a failure to
    /// create the diff directory or write the summary. Per-layer problems
    /// are reported as [`LayerOutcome::Failed`] instead.
    pub fn run<V: VersionControl>(&self, vcs: &mut V) -> Result<ComparisonReport> {
        let mut render_dirs = Vec::new();
        let result = self.compare(vcs, &mut render_dirs);

        if self.config.keep_renders {
            for dir in &render_dirs {
                tracing::info!(%dir, "keeping intermediate render");
            }
        } else {
            remove_render_dirs(&render_dirs);
        }
        result
    }

    fn compare<V: VersionControl>(
        &self,
        vcs: &mut V,
        render_dirs: &mut Vec<Utf8PathBuf>,
    ) -> Result<ComparisonReport> {
        let mut bounds = BoundsResolver::new();
        let comparison =
            SnapshotManager::new(vcs).run_comparison(&self.config.target, |stage, identity| {
                let dir = self.render_dir(identity, render_dirs);
                render_dirs.push(dir.clone());
                self.render(stage, dir, &mut bounds)
            })?;

        let writer = ArtifactWriter::create(self.config.diff_dir.clone())?;
        let layers =
            self.diff_layers(&comparison.current.output, &comparison.target.output, &writer);

        let report = ComparisonReport {
            target: self.config.target.clone(),
            current_identity: comparison.current.identity,
            target_identity: comparison.target.identity,
            layers,
        };
        let summary = writer.write_summary(&report)?;
        tracing::debug!(%summary, "wrote comparison summary");
        Ok(report)
    }

    fn render_dir(&self, identity: &str, taken: &[Utf8PathBuf]) -> Utf8PathBuf {
        let name = format!("{RENDER_DIR_PREFIX}{}", identity.replace(['/', '\\'], "_"));
        let dir = self.work_dir.join(&name);
        if taken.contains(&dir) {
            self.work_dir.join(format!("{name}{TARGET_COLLISION_SUFFIX}"))
        } else {
            dir
        }
    }

    fn render(
        &self,
        stage: RenderStage,
        output_dir: Utf8PathBuf,
        bounds: &mut BoundsResolver,
    ) -> Result<RenderPass> {
        tracing::info!(%stage, renderer = self.renderer.id(), dir = %output_dir, "rendering");
        let request = RenderRequest::new(
            self.config.document.clone(),
            output_dir,
            self.config.layers.clone(),
            self.config.resolution_dpi,
        )
        .with_bounds(bounds.requested());

        let output = self
            .renderer
            .render(&request)
            .map_err(|source| Error::Render { stage, source })?;
        let window = bounds.resolve(output.bounds);
        Ok(RenderPass {
            output,
            bounds: window,
        })
    }

    fn diff_layers(
        &self,
        current: &RenderPass,
        target: &RenderPass,
        writer: &ArtifactWriter,
    ) -> Vec<LayerReport> {
        let mut unique: Vec<&str> = Vec::with_capacity(self.config.layers.len());
        for layer in self.config.layers.iter() {
            if !unique.contains(&layer) {
                unique.push(layer);
            }
        }

        let outcomes: HashMap<&str, LayerOutcome> = unique
            .par_iter()
            .map(|layer| (*layer, self.diff_layer(layer, current, target, writer)))
            .collect();

        self.config
            .layers
            .iter()
            .map(|layer| LayerReport {
                layer: layer.to_string(),
                outcome: outcomes
                    .get(layer)
                    .cloned()
                    .unwrap_or_else(|| LayerOutcome::Failed {
                        reason: "layer was not processed".into(),
                    }),
            })
            .collect()
    }

    fn diff_layer(
        &self,
        layer: &str,
        current: &RenderPass,
        target: &RenderPass,
        writer: &ArtifactWriter,
    ) -> LayerOutcome {
        let (Some(before), Some(after)) = (
            current.output.artifact(layer),
            target.output.artifact(layer),
        ) else {
            let missing = if current.output.artifact(layer).is_none() {
                RenderStage::Current
            } else {
                RenderStage::Target
            };
            tracing::warn!(layer, %missing, "layer missing from a render, skipping");
            return LayerOutcome::Failed {
                reason: format!("not rendered for the {missing} state"),
            };
        };

        match self.compare_layer(layer, before, after, current.bounds.as_ref(), writer) {
            Ok((image, changes)) => LayerOutcome::Compared {
                image: image.to_string(),
                changes,
            },
            Err(err) => {
                tracing::warn!(layer, error = %err, "layer comparison failed");
                LayerOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    fn compare_layer(
        &self,
        layer: &str,
        before: &Utf8Path,
        after: &Utf8Path,
        bounds: Option<&BoundingBox>,
        writer: &ArtifactWriter,
    ) -> Result<(Utf8PathBuf, ChangeFractions)> {
        let current = self.rasterize(before, bounds)?;
        let reference = self.rasterize(after, bounds)?;
        let result = DiffEngine::new()
            .with_invert(self.config.invert)
            .diff(&current, &reference)?;
        let image = writer.write_layer(layer, &result.image)?;
        Ok((image, result.changes))
    }

    fn rasterize(&self, artifact: &Utf8Path, bounds: Option<&BoundingBox>) -> Result<GrayImage> {
        self.rasterizer
            .rasterize(artifact, bounds, self.config.resolution_dpi)
            .map_err(|source| Error::Rasterize {
                path: artifact.to_string(),
                source,
            })
    }
}

fn remove_render_dirs(dirs: &[Utf8PathBuf]) {
    for dir in dirs {
        if !dir.exists() {
            continue;
        }
        if let Err(err) = fs::remove_dir_all(dir) {
            tracing::warn!(%dir, error = %err, "failed to remove intermediate render");
        }
    }
}

/// Human-readable line for one layer of a report.
///
/// `> diffs/F.Cu.png      (+0.000123, -0.000045)` for compared layers.
#[must_use]
pub fn summary_line(report: &LayerReport) -> String {
    match &report.outcome {
        LayerOutcome::Compared { image, changes } => format!(
            "> {image:18} (+{:.6}, -{:.6})",
            changes.added, changes.removed
        ),
        LayerOutcome::Failed { reason } => format!("> {:18} failed: {reason}", report.layer),
    }
}
