use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use kiff_core::config::{CompareConfig, DEFAULT_DIFF_DIR, DEFAULT_RESOLUTION_DPI};
use kiff_core::pipeline::{summary_line, Pipeline};
use kiff_core::repository::Repository;
use kiff_core::{logging, Error, LayerSet, RevisionRef};
use kiff_renderers::{KicadCliRenderer, PdftoppmRasterizer};

/// Visual diff of a KiCad board between the working tree and a git revision.
#[derive(Debug, Parser)]
#[command(name = "kiff", version)]
struct Cli {
    /// Board file to compare.
    document: Utf8PathBuf,

    /// Revision to compare the working tree against.
    #[arg(short, long, default_value = "HEAD")]
    commit: String,

    /// Layers to compare, separated by spaces or commas.
    #[arg(long, default_value = "F.Cu B.Cu F.SilkS B.SilkS")]
    layers: String,

    /// Also compare inner copper layers In1.Cu through InN.Cu.
    #[arg(short = 'l', long, value_name = "N", default_value_t = 0)]
    inner_layers: u32,

    /// Rasterization resolution in dpi.
    #[arg(short, long, default_value_t = DEFAULT_RESOLUTION_DPI)]
    resolution: u32,

    /// Keep the plot_* directories with the intermediate renders.
    #[arg(short, long)]
    keep: bool,

    /// Directory receiving the diff images and summary.json.
    #[arg(long, default_value = DEFAULT_DIFF_DIR)]
    diff_dir: Utf8PathBuf,

    /// Treat renders as light content on a dark page.
    #[arg(long)]
    no_invert: bool,

    /// Seconds any single external tool may run.
    #[arg(long, env = "KIFF_TOOL_TIMEOUT_SECS", default_value_t = 120)]
    timeout: u64,

    /// kicad-cli binary to use instead of searching for one.
    #[arg(long, env = "KIFF_KICAD_CLI")]
    kicad_cli: Option<PathBuf>,

    /// pdftoppm binary to use.
    #[arg(long, env = "KIFF_PDFTOPPM")]
    pdftoppm: Option<PathBuf>,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> CompareConfig {
        let layers = LayerSet::parse(&self.layers).with_inner_copper(self.inner_layers);
        let mut config = CompareConfig::new(self.document)
            .with_target(RevisionRef::parse(&self.commit))
            .with_layers(layers);
        config.resolution_dpi = self.resolution;
        config.keep_renders = self.keep;
        config.diff_dir = self.diff_dir;
        config.invert = !self.no_invert;
        config.tool_timeout = Duration::from_secs(self.timeout);
        config.kicad_cli = self.kicad_cli.map(PathBuf::into_os_string);
        config.pdftoppm = self.pdftoppm.map(PathBuf::into_os_string);
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code(&err);
            match err.downcast_ref::<Error>() {
                Some(nothing @ Error::NothingToCompare) => eprintln!("{nothing}"),
                _ => eprintln!("error: {err:#}"),
            }
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.into_config().validate()?;

    let repo_dir = match config.document.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    };
    let mut repo = Repository::open(&repo_dir)
        .with_context(|| format!("failed to open the repository containing {}", config.document))?;

    let renderer = KicadCliRenderer::new()
        .with_binary(config.kicad_cli.clone())
        .with_timeout(config.tool_timeout);
    let rasterizer = PdftoppmRasterizer::new()
        .with_binary(config.pdftoppm.clone())
        .with_timeout(config.tool_timeout);

    let pipeline = Pipeline::new(config, renderer, rasterizer);
    let report = pipeline
        .run(&mut repo)
        .with_context(|| format!("comparison against {} failed", pipeline.config().target))?;

    for layer in &report.layers {
        println!("{}", summary_line(layer));
    }
    if report.is_unchanged() {
        println!("No visual changes detected");
    }
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::NothingToCompare) => 2,
        Some(Error::WorkingTreeNotRestored { .. }) => 5,
        Some(err) if err.is_vcs() => 3,
        Some(Error::Render { .. } | Error::Rasterize { .. }) => 4,
        _ => 1,
    }
}
