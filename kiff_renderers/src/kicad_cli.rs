use std::ffi::OsString;
use std::io::ErrorKind;
use std::time::Duration;

use camino::Utf8PathBuf;
use kiff_api::{layer_artifact_name, BoundingBox};
use kiff_render_api::{
    RenderError, RenderOutput, RenderRequest, RenderResult, RenderedLayer, Renderer,
};
use once_cell::sync::OnceCell;

use crate::board::read_document_bounds;
use crate::process::{ToolCommand, DEFAULT_TIMEOUT};

const TOOL: &str = "kicad-cli";
const FLATPAK_PREFIX: &[&str] = &["run", "--command=kicad-cli", "org.kicad.KiCad"];
/// First release able to export every layer in one invocation.
const SEPARATE_MODE_MAJOR: u32 = 9;

#[derive(Debug, Clone)]
struct KicadCli {
    tool: ToolCommand,
    version: String,
}

impl KicadCli {
    fn major(&self) -> u32 {
        self.version
            .split('.')
            .next()
            .and_then(|major| major.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Renderer backed by `kicad-cli pcb export pdf`.
///
/// The binary is located on first use: an explicit override, then
/// `kicad-cli` on `PATH`, then the flatpak-packaged KiCad.
#[derive(Debug)]
pub struct KicadCliRenderer {
    override_binary: Option<OsString>,
    timeout: Duration,
    cli: OnceCell<KicadCli>,
}

impl KicadCliRenderer {
    /// Construct a renderer that searches for `kicad-cli` lazily.
    #[must_use]
    pub fn new() -> Self {
        Self {
            override_binary: None,
            timeout: DEFAULT_TIMEOUT,
            cli: OnceCell::new(),
        }
    }

    /// Use `binary` instead of searching for kicad-cli.
    #[must_use]
    pub fn with_binary(mut self, binary: Option<impl Into<OsString>>) -> Self {
        self.override_binary = binary.map(Into::into);
        self
    }

    /// Limit each kicad-cli invocation to `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Version string reported by the discovered kicad-cli.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::ToolUnavailable`] when no kicad-cli can be run.
    pub fn version(&self) -> RenderResult<&str> {
        Ok(&self.cli()?.version)
    }

    fn cli(&self) -> RenderResult<&KicadCli> {
        self.cli.get_or_try_init(|| self.discover())
    }

    fn discover(&self) -> RenderResult<KicadCli> {
        let candidates = match &self.override_binary {
            Some(binary) => vec![ToolCommand::new(TOOL, binary.clone())],
            None => vec![
                ToolCommand::new(TOOL, TOOL),
                ToolCommand::new(TOOL, "flatpak").with_prefix(FLATPAK_PREFIX.iter().copied()),
            ],
        };

        let mut last_error = String::from("no candidates");
        for tool in candidates {
            let tool = tool.with_timeout(self.timeout);
            match tool.run(&["-v"]) {
                Ok(output) => {
                    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    tracing::info!(%version, "found kicad-cli");
                    return Ok(KicadCli { tool, version });
                }
                Err(RenderError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                    last_error = source.to_string();
                }
                Err(err) => last_error = err.to_string(),
            }
        }

        Err(RenderError::ToolUnavailable {
            tool: TOOL.into(),
            reason: last_error,
        })
    }

    fn export_all(cli: &KicadCli, request: &RenderRequest) {
        let args = [
            "pcb".to_string(),
            "export".into(),
            "pdf".into(),
            "-l".into(),
            request.layers.join(","),
            "--black-and-white".into(),
            "--mode-separate".into(),
            "-o".into(),
            request.output_dir.to_string(),
            request.document.to_string(),
        ];
        if let Err(err) = cli.tool.run(&args) {
            tracing::warn!(error = %err, "layer export reported a failure");
        }
    }

    fn export_each(cli: &KicadCli, request: &RenderRequest) {
        for layer in request.layers.iter() {
            let artifact = request
                .output_dir
                .join(layer_artifact_name(request.document_stem(), layer));
            let args = [
                "pcb",
                "export",
                "pdf",
                "-l",
                layer,
                "--black-and-white",
                "-o",
                artifact.as_str(),
                request.document.as_str(),
            ];
            if let Err(err) = cli.tool.run(&args) {
                tracing::warn!(layer, error = %err, "something went wrong plotting layer");
            }
        }
    }

    fn document_bounds(request: &RenderRequest) -> RenderResult<Option<BoundingBox>> {
        if request.bounds.is_some() {
            return Ok(request.bounds);
        }
        let bounds = read_document_bounds(&request.document)?;
        if bounds.is_none() {
            tracing::warn!(document = %request.document, "board draws nothing, using full page");
        }
        Ok(bounds)
    }
}

impl Default for KicadCliRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for KicadCliRenderer {
    fn id(&self) -> &'static str {
        TOOL
    }

    fn render(&self, request: &RenderRequest) -> RenderResult<RenderOutput> {
        if !request.document.is_file() {
            return Err(RenderError::Unreadable {
                path: request.document.clone(),
            });
        }
        let bounds = Self::document_bounds(request)?;
        let cli = self.cli()?;

        std::fs::create_dir_all(&request.output_dir).map_err(|source| RenderError::Io {
            path: request.output_dir.to_string(),
            source,
        })?;

        if cli.major() >= SEPARATE_MODE_MAJOR {
            Self::export_all(cli, request);
        } else {
            Self::export_each(cli, request);
        }

        let mut layers = Vec::with_capacity(request.layers.len());
        for layer in request.layers.iter() {
            let artifact: Utf8PathBuf = request
                .output_dir
                .join(layer_artifact_name(request.document_stem(), layer));
            if artifact.is_file() {
                layers.push(RenderedLayer {
                    name: layer.to_string(),
                    artifact,
                });
            } else {
                tracing::warn!(layer, "layer not exported - skipping");
            }
        }

        if layers.is_empty() {
            return Err(RenderError::NothingRendered {
                path: request.document.clone(),
            });
        }

        Ok(RenderOutput { layers, bounds })
    }
}
