use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use image::RgbImage;
use kiff_api::ComparisonReport;

use crate::{Error, Result};

/// File name of the machine-readable run summary.
pub const SUMMARY_FILE: &str = "summary.json";

/// Writes diff images and the run summary into one output directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: Utf8PathBuf,
}

impl ArtifactWriter {
    /// Prepare `dir` for output, creating it when absent.
    ///
    /// An existing directory is reused; files from earlier runs with the
    /// same layer names are overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the directory cannot be created.
    pub fn create(dir: impl Into<Utf8PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(dir.as_std_path()).map_err(|source| Error::Io {
            path: dir.to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Output directory.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Destination of the diff image for `layer`.
    #[must_use]
    pub fn layer_path(&self, layer: &str) -> Utf8PathBuf {
        self.dir.join(format!("{layer}.png"))
    }

    /// Encode `image` as PNG under the layer's name and return its path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Image`] when encoding or writing fails.
    pub fn write_layer(&self, layer: &str, image: &RgbImage) -> Result<Utf8PathBuf> {
        let path = self.layer_path(layer);
        image
            .save_with_format(path.as_std_path(), image::ImageFormat::Png)
            .map_err(|source| Error::Image {
                path: path.to_string(),
                source,
            })?;
        tracing::debug!(%path, "wrote diff image");
        Ok(path)
    }

    /// Serialize `report` to `summary.json`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file cannot be written.
    pub fn write_summary(&self, report: &ComparisonReport) -> Result<Utf8PathBuf> {
        let path = self.dir.join(SUMMARY_FILE);
        let json = serde_json::to_vec_pretty(report).map_err(|err| Error::Io {
            path: path.to_string(),
            source: err.into(),
        })?;
        fs::write(path.as_std_path(), json).map_err(|source| Error::Io {
            path: path.to_string(),
            source,
        })?;
        Ok(path)
    }
}
