use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use camino::{Utf8Path, Utf8PathBuf};
use git2::{ErrorClass, ErrorCode, IndexAddOption, Oid, Repository as GitRepository};
use image::{GrayImage, Luma};
use kiff_core::config::CompareConfig;
use kiff_core::pipeline::Pipeline;
use kiff_core::repository::{Repository, VersionControl};
use kiff_core::{
    BoundingBox, Error, LayerOutcome, LayerSet, Rasterizer, RenderError, RenderOutput,
    RenderRequest, RenderStage, RenderedLayer, Renderer, Result, RevisionRef,
};
use kiff_render_api::RenderResult;
use tempfile::TempDir;

/// Copies the document into one artifact per layer; each `x` in the
/// document becomes one dark pixel when rasterized.
#[derive(Default, Clone)]
struct CopyingRenderer {
    requests: Arc<Mutex<Vec<RenderRequest>>>,
    fail_on_call: Option<usize>,
    skip_layer_on_call: Option<(usize, &'static str)>,
}

impl CopyingRenderer {
    fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Renderer for CopyingRenderer {
    fn id(&self) -> &'static str {
        "copying"
    }

    fn render(&self, request: &RenderRequest) -> RenderResult<RenderOutput> {
        let call = {
            let mut requests = self.requests.lock().expect("requests lock");
            requests.push(request.clone());
            requests.len()
        };
        if self.fail_on_call == Some(call) {
            return Err(RenderError::NothingRendered {
                path: request.document.clone(),
            });
        }

        let text = fs::read_to_string(&request.document).map_err(|source| RenderError::Io {
            path: request.document.to_string(),
            source,
        })?;
        fs::create_dir_all(&request.output_dir).expect("create output dir");

        let mut layers = Vec::new();
        for layer in request.layers.iter() {
            if self.skip_layer_on_call == Some((call, layer)) {
                continue;
            }
            let artifact = request
                .output_dir
                .join(kiff_api::layer_artifact_name(request.document_stem(), layer));
            fs::write(&artifact, &text).expect("write artifact");
            layers.push(RenderedLayer {
                name: layer.to_string(),
                artifact,
            });
        }

        // Board extent grows with the document so anchoring is observable.
        let width = 1.0 + text.len() as f64;
        Ok(RenderOutput {
            layers,
            bounds: BoundingBox::new(0.0, 0.0, width, 1.0),
        })
    }
}

/// Rasterizes `x` characters as dark pixels on a 10x10 page.
#[derive(Default, Clone)]
struct CountingRasterizer {
    windows: Arc<Mutex<Vec<Option<BoundingBox>>>>,
    /// Artifact file name rasterized half as wide in the current render.
    narrow_current: Option<&'static str>,
}

impl Rasterizer for CountingRasterizer {
    fn rasterize(
        &self,
        artifact: &Utf8Path,
        bounds: Option<&BoundingBox>,
        _dpi: u32,
    ) -> RenderResult<GrayImage> {
        self.windows
            .lock()
            .expect("windows lock")
            .push(bounds.copied());
        let text = fs::read_to_string(artifact).map_err(|source| RenderError::Io {
            path: artifact.to_string(),
            source,
        })?;
        let dark = text.chars().filter(|c| *c == 'x').count() as u32;
        let in_current = artifact
            .parent()
            .is_some_and(|dir| dir.as_str().ends_with("-dirty"));
        let width = if in_current && artifact.file_name() == self.narrow_current {
            5
        } else {
            10
        };
        Ok(GrayImage::from_fn(width, 10, |x, y| {
            if y * 10 + x < dark {
                Luma([0])
            } else {
                Luma([255])
            }
        }))
    }
}

struct Fixture {
    repo_dir: TempDir,
    out_dir: TempDir,
    git: GitRepository,
}

impl Fixture {
    fn new(committed: &str) -> Result<Self> {
        let repo_dir = TempDir::new().expect("tempdir");
        let out_dir = TempDir::new().expect("tempdir");
        let git = GitRepository::init(repo_dir.path())?;
        let fixture = Self {
            repo_dir,
            out_dir,
            git,
        };
        fixture.write_board(committed);
        fixture.commit("Initial commit")?;
        Ok(fixture)
    }

    fn board(&self) -> Utf8PathBuf {
        utf8(self.repo_dir.path()).join("board.kicad_pcb")
    }

    fn out(&self) -> Utf8PathBuf {
        utf8(self.out_dir.path())
    }

    fn write_board(&self, contents: &str) {
        fs::write(self.board(), contents).expect("write board");
    }

    fn read_board(&self) -> String {
        fs::read_to_string(self.board()).expect("read board")
    }

    fn head_name(&self) -> Option<String> {
        self.git
            .head()
            .ok()
            .and_then(|head| head.name().map(str::to_owned))
    }

    fn stash_count(&mut self) -> usize {
        let mut count = 0;
        self.git
            .stash_foreach(|_, _, _| {
                count += 1;
                true
            })
            .expect("stash list");
        count
    }

    fn config(&self, layers: &str) -> CompareConfig {
        let mut config = CompareConfig::new(self.board()).with_layers(LayerSet::parse(layers));
        config.diff_dir = self.out().join("diffs");
        config
    }

    fn commit(&self, message: &str) -> Result<Oid> {
        let mut index = self.git.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree = self.git.find_tree(index.write_tree()?)?;
        let signature = git2::Signature::now("Test User", "test@example.com")?;

        let parents = match self.git.head() {
            Ok(head) => vec![head.peel_to_commit()?],
            Err(err)
                if err.class() == ErrorClass::Reference
                    && matches!(err.code(), ErrorCode::NotFound | ErrorCode::UnbornBranch) =>
            {
                Vec::new()
            }
            Err(err) => return Err(Error::from(err)),
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        Ok(self
            .git
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parent_refs)?)
    }

    fn tag(&self, name: &str) -> Result<()> {
        let head = self.git.head()?.peel_to_commit()?;
        let signature = git2::Signature::now("Test User", "test@example.com")?;
        self.git
            .tag(name, head.as_object(), &signature, "release", false)?;
        Ok(())
    }
}

fn utf8(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).expect("utf8 path")
}

fn pipeline(
    fixture: &Fixture,
    config: CompareConfig,
    renderer: CopyingRenderer,
    rasterizer: CountingRasterizer,
) -> Pipeline<CopyingRenderer, CountingRasterizer> {
    Pipeline::new(config, renderer, rasterizer).with_work_dir(fixture.out())
}

#[test]
fn modified_board_against_head_reports_added_content() -> Result<()> {
    let fixture = Fixture::new("xx\n")?;
    fixture.tag("v1.0")?;
    fixture.write_board("xxxx\n");

    let renderer = CopyingRenderer::default();
    let rasterizer = CountingRasterizer::default();
    let mut repo = Repository::open(fixture.repo_dir.path())?;
    let report = pipeline(&fixture, fixture.config("F.Cu"), renderer.clone(), rasterizer.clone())
        .run(&mut repo)?;

    assert_eq!(report.current_identity, "v1.0-dirty");
    assert_eq!(report.target_identity, "v1.0");
    assert_eq!(report.layers.len(), 1);
    let changes = report.layers[0].changes().expect("compared");
    assert!((changes.added - 0.02).abs() < 1e-12);
    assert_eq!(changes.removed, 0.0);
    assert!(!report.is_unchanged());

    assert_eq!(fixture.read_board(), "xxxx\n");
    assert!(repo.has_local_modifications()?);
    assert_eq!(repo.describe()?, "v1.0");

    let diffs = fixture.out().join("diffs");
    assert!(diffs.join("F.Cu.png").is_file());
    assert!(diffs.join("summary.json").is_file());
    assert!(!fixture.out().join("plot_v1.0-dirty").exists());
    assert!(!fixture.out().join("plot_v1.0").exists());
    Ok(())
}

#[test]
fn second_render_reuses_first_crop_window() -> Result<()> {
    let fixture = Fixture::new("x\n")?;
    fixture.write_board("xxxxxxxx\n");

    let renderer = CopyingRenderer::default();
    let rasterizer = CountingRasterizer::default();
    let mut repo = Repository::open(fixture.repo_dir.path())?;
    pipeline(&fixture, fixture.config("F.Cu B.Cu"), renderer.clone(), rasterizer.clone())
        .run(&mut repo)?;

    let requests = renderer.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].bounds.is_none());
    let anchored = BoundingBox::new(0.0, 0.0, 10.0, 1.0);
    assert_eq!(requests[1].bounds, anchored);

    let windows = rasterizer.windows.lock().expect("windows lock").clone();
    assert_eq!(windows.len(), 4);
    assert!(windows.iter().all(|window| *window == anchored));
    Ok(())
}

#[test]
fn clean_board_against_head_is_nothing_to_compare() -> Result<()> {
    let fixture = Fixture::new("xx\n")?;
    let renderer = CopyingRenderer::default();
    let mut repo = Repository::open(fixture.repo_dir.path())?;

    let result = pipeline(
        &fixture,
        fixture.config("F.Cu"),
        renderer.clone(),
        CountingRasterizer::default(),
    )
    .run(&mut repo);

    assert!(matches!(result, Err(Error::NothingToCompare)));
    assert!(renderer.requests().is_empty());
    assert!(!fixture.out().join("diffs").exists());
    Ok(())
}

#[test]
fn clean_board_against_older_revision_restores_branch() -> Result<()> {
    let mut fixture = Fixture::new("xxxx\n")?;
    fixture.write_board("xx\n");
    fixture.commit("Remove two pads")?;
    let branch = fixture.head_name();

    let mut repo = Repository::open(fixture.repo_dir.path())?;
    let config = fixture.config("F.Cu").with_target(RevisionRef::parse("HEAD~1"));
    let report = pipeline(
        &fixture,
        config,
        CopyingRenderer::default(),
        CountingRasterizer::default(),
    )
    .run(&mut repo)?;

    let changes = report.layers[0].changes().expect("compared");
    assert_eq!(changes.added, 0.0);
    assert!((changes.removed - 0.02).abs() < 1e-12);

    assert_eq!(fixture.head_name(), branch);
    assert_eq!(fixture.read_board(), "xx\n");
    assert_eq!(fixture.stash_count(), 0);
    Ok(())
}

#[test]
fn failed_target_render_still_restores_everything() -> Result<()> {
    let mut fixture = Fixture::new("x\n")?;
    fixture.write_board("xx\n");
    fixture.commit("Second")?;
    fixture.write_board("xxx uncommitted\n");
    let branch = fixture.head_name();

    let renderer = CopyingRenderer {
        fail_on_call: Some(2),
        ..CopyingRenderer::default()
    };
    let mut repo = Repository::open(fixture.repo_dir.path())?;
    let config = fixture.config("F.Cu").with_target(RevisionRef::parse("HEAD~1"));
    let result = pipeline(&fixture, config, renderer.clone(), CountingRasterizer::default())
        .run(&mut repo);

    assert!(matches!(
        result,
        Err(Error::Render {
            stage: RenderStage::Target,
            ..
        })
    ));
    assert_eq!(renderer.requests().len(), 2);
    assert_eq!(fixture.read_board(), "xxx uncommitted\n");
    assert_eq!(fixture.head_name(), branch);
    assert_eq!(fixture.stash_count(), 0);
    assert!(repo.has_local_modifications()?);
    Ok(())
}

#[test]
fn layer_missing_from_one_render_fails_alone() -> Result<()> {
    let fixture = Fixture::new("x\n")?;
    fixture.write_board("xx\n");

    let renderer = CopyingRenderer {
        skip_layer_on_call: Some((2, "B.Cu")),
        ..CopyingRenderer::default()
    };
    let mut repo = Repository::open(fixture.repo_dir.path())?;
    let report = pipeline(
        &fixture,
        fixture.config("F.Cu B.Cu"),
        renderer,
        CountingRasterizer::default(),
    )
    .run(&mut repo)?;

    assert_eq!(report.layers[0].layer, "F.Cu");
    assert!(report.layers[0].changes().is_some());
    assert_eq!(report.layers[1].layer, "B.Cu");
    assert!(matches!(report.layers[1].outcome, LayerOutcome::Failed { .. }));
    assert_eq!(report.failed_layers(), 1);
    Ok(())
}

#[test]
fn mismatched_raster_sizes_fail_only_their_layer() -> Result<()> {
    let fixture = Fixture::new("x\n")?;
    fixture.write_board("xxx\n");

    let rasterizer = CountingRasterizer {
        narrow_current: Some("board-B_Cu.pdf"),
        ..CountingRasterizer::default()
    };
    let mut repo = Repository::open(fixture.repo_dir.path())?;
    let report = pipeline(
        &fixture,
        fixture.config("F.Cu B.Cu F.SilkS"),
        CopyingRenderer::default(),
        rasterizer,
    )
    .run(&mut repo)?;

    match &report.layers[1].outcome {
        LayerOutcome::Failed { reason } => {
            assert!(reason.contains("dimension mismatch"), "{reason}");
            assert!(reason.contains("(5, 10)"), "{reason}");
        }
        other => panic!("expected B.Cu to fail, got {other:?}"),
    }
    for layer in [&report.layers[0], &report.layers[2]] {
        let changes = layer.changes().expect("compared");
        assert!((changes.added - 0.02).abs() < 1e-12);
    }
    assert_eq!(report.failed_layers(), 1);
    assert!(!fixture.out().join("diffs").join("B.Cu.png").exists());
    assert!(fixture.out().join("diffs").join("F.SilkS.png").is_file());
    Ok(())
}

#[test]
fn kept_renders_never_share_a_directory() -> Result<()> {
    let fixture = Fixture::new("xx\n")?;
    fixture.tag("v2.0")?;

    let mut config = fixture.config("F.Cu").with_target(RevisionRef::parse("v2.0"));
    config.keep_renders = true;
    let mut repo = Repository::open(fixture.repo_dir.path())?;
    let report = pipeline(
        &fixture,
        config,
        CopyingRenderer::default(),
        CountingRasterizer::default(),
    )
    .run(&mut repo)?;

    assert_eq!(report.current_identity, "v2.0");
    assert_eq!(report.target_identity, "v2.0");
    assert!(report.is_unchanged());
    assert!(fixture.out().join("plot_v2.0").is_dir());
    assert!(fixture.out().join("plot_v2.0-target").is_dir());
    assert!(fixture
        .out()
        .join("plot_v2.0")
        .join("board-F_Cu.pdf")
        .is_file());
    Ok(())
}
