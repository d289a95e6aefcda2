//! A full run: enumerate → walk → restore → assemble.
//!
//! [`render`] wires up the production collaborators (system `git`, the shell
//! build command, poppler, the GIF file encoder). [`render_with`] takes them
//! as arguments so the whole run can be exercised against mocks.
//!
//! Only a few things end a run early: an invalid configuration, an invalid
//! revision range, a detached `HEAD` that no aborted run explains, a working
//! tree that cannot be opened, and an assembly failure (including the empty
//! sequence). Everything that goes wrong with a single revision is reported
//! in the [`RunSummary`] instead.
//!
//! With the cache enabled, a [`WalkMarker`] in the cache directory lets a run
//! killed halfway be resumed over the same range.

use crate::assemble::{
    AnimationEncoder, AssembleError, AssembleSummary, EncodeOptions, GifFileEncoder, assemble,
};
use crate::build::{Builder, ShellBuilder};
use crate::cache::{CacheStats, RenderCache, hash_capture_params};
use crate::capture::{CaptureSettings, PageRange};
use crate::config::{ConfigError, RunConfig, parse_color};
use crate::frame::write_frame_pngs;
use crate::raster::{Dimensions, PopplerRasterizer, Rasterizer};
use crate::resume::{ResumeError, WalkMarker, walk_start};
use crate::revisions::{EnumerateError, RevisionRange, enumerate};
use crate::tree::{TreeError, WorkingTree};
use crate::types::Revision;
use crate::vcs::{GitCli, VersionControl};
use crate::walk::{SkippedRevision, StopSignal, WalkContext, WalkEvent, walk};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Enumerate(#[from] EnumerateError),
    #[error(transparent)]
    Resume(#[from] ResumeError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
    #[error("could not write frames to {}: {source}", .path.display())]
    Frames {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0} not found on PATH (install poppler-utils)")]
    ToolMissing(&'static str),
}

/// Everything a render run needs, resolved from a [`RunConfig`].
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub repository: PathBuf,
    pub command: String,
    pub range: RevisionRange,
    pub settings: CaptureSettings,
    pub encode: EncodeOptions,
    pub gifpath: PathBuf,
    pub frames_dir: Option<PathBuf>,
    pub build_timeout: Option<Duration>,
    /// `None` disables the render cache.
    pub cache_dir: Option<PathBuf>,
    /// Start even if the tree has local modifications.
    pub allow_dirty: bool,
}

impl RunPlan {
    pub fn from_config(config: &RunConfig) -> Result<Self, ConfigError> {
        let repository = repository(config)?;
        let command = config.command.clone().ok_or(ConfigError::Missing("command"))?;
        let pdf_path = config.pdfpath.clone().ok_or(ConfigError::Missing("pdfpath"))?;
        let r = &config.render;

        let cache_dir = config.cache.enabled.then(|| config.cache.dir.clone());
        if let Some(dir) = &cache_dir
            && is_inside(dir, &repository)
        {
            return Err(ConfigError::Validation(format!(
                "cache.dir {} is inside the repository, which is cleaned at every step",
                dir.display()
            )));
        }

        Ok(Self {
            repository,
            command,
            range: revision_range(config),
            settings: CaptureSettings {
                subdirectory: config.subdirectory.clone(),
                pdf_path,
                canvas: Dimensions::new(r.frame_width, r.frame_height),
                page_cell: Dimensions::new(r.page_width, r.page_height),
                layout: r.layout,
                pages: PageRange {
                    first: r.first_page,
                    last: r.last_page,
                },
                background: parse_color(&r.background)?,
            },
            encode: EncodeOptions {
                delay_ms: config.animation.delay_ms,
                loop_count: config.animation.loop_count,
            },
            gifpath: config.gifpath.clone(),
            frames_dir: config.animation.frames_dir.clone(),
            build_timeout: config.build.timeout_secs.map(Duration::from_secs),
            cache_dir,
            allow_dirty: false,
        })
    }
}

pub fn repository(config: &RunConfig) -> Result<PathBuf, ConfigError> {
    config
        .repository
        .clone()
        .ok_or(ConfigError::Missing("repository"))
}

pub fn revision_range(config: &RunConfig) -> RevisionRange {
    RevisionRange {
        start: config.starthash.clone(),
        end: config.endhash.clone(),
        first_parent: config.first_parent,
    }
}

/// Whether `path` is `root` or lies below it, once both are made absolute.
/// Components that don't exist yet are taken literally.
fn is_inside(path: &Path, root: &Path) -> bool {
    fn resolve(path: &Path) -> PathBuf {
        let Ok(absolute) = std::path::absolute(path) else {
            return path.to_path_buf();
        };
        let mut existing = absolute.as_path();
        let mut rest = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    rest.push(name.to_os_string());
                    existing = parent;
                }
                _ => break,
            }
        }
        let mut resolved = existing
            .canonicalize()
            .unwrap_or_else(|_| existing.to_path_buf());
        resolved.extend(rest.iter().rev());
        resolved
    }
    resolve(path).starts_with(resolve(root))
}

/// The collaborators a run drives.
pub struct Backends<'a> {
    pub builder: &'a dyn Builder,
    pub rasterizer: &'a dyn Rasterizer,
    pub encoder: &'a mut dyn AnimationEncoder,
}

/// What a completed run did.
#[derive(Debug)]
pub struct RunSummary {
    /// Revisions in the range.
    pub revisions: usize,
    /// Revisions that contributed frames.
    pub captured: usize,
    pub skipped: Vec<SkippedRevision>,
    pub interrupted: bool,
    /// Whether the tree is back on the ref it started on.
    pub restored: bool,
    pub cache_stats: CacheStats,
    pub frames_written: Option<(PathBuf, usize)>,
    pub animation: AssembleSummary,
}

/// List the revisions a render of `repository` over `range` would visit.
/// Read-only.
pub fn list(repository: &Path, range: &RevisionRange) -> Result<Vec<Revision>, RunError> {
    Ok(enumerate(&GitCli::new(repository), range)?)
}

/// Run the full pipeline with the system tools and write `plan.gifpath`.
pub fn render(
    plan: &RunPlan,
    stop: StopSignal,
    progress: Option<Sender<WalkEvent>>,
) -> Result<RunSummary, RunError> {
    if !PopplerRasterizer::is_available() {
        return Err(RunError::ToolMissing("pdftoppm"));
    }
    let builder = ShellBuilder::new(plan.command.as_str()).with_timeout(plan.build_timeout);
    let rasterizer = PopplerRasterizer::new();
    let mut encoder = GifFileEncoder::new(&plan.gifpath);
    render_with(
        GitCli::new(&plan.repository),
        Backends {
            builder: &builder,
            rasterizer: &rasterizer,
            encoder: &mut encoder,
        },
        plan,
        stop,
        progress,
    )
}

/// Run the full pipeline against the given collaborators.
#[tracing::instrument(name = "render", skip_all, fields(repository = %plan.repository.display()))]
pub fn render_with<V: VersionControl>(
    vcs: V,
    backends: Backends<'_>,
    plan: &RunPlan,
    stop: StopSignal,
    progress: Option<Sender<WalkEvent>>,
) -> Result<RunSummary, RunError> {
    let marker_dir = plan.cache_dir.as_deref();
    let start = walk_start(
        &vcs,
        &plan.range,
        marker_dir.and_then(|dir| WalkMarker::load(dir, &plan.repository)),
    )?;
    let revisions = enumerate(&vcs, &start.range)?;
    tracing::info!(revisions = revisions.len(), "enumerated revisions");

    // Leftovers of an aborted walk are expected in the tree.
    let mut tree = WorkingTree::open(vcs, plan.allow_dirty || start.is_resumed())?;
    if let Some(reference) = start.original_ref {
        tree = tree.with_original_ref(reference);
    }
    if let (Some(dir), Some(last)) = (marker_dir, revisions.last()) {
        let marker = WalkMarker::new(&plan.repository, tree.original_ref(), last.id.clone());
        if let Err(e) = marker.save(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "could not write walk marker");
        }
    }
    let mut cache = plan
        .cache_dir
        .as_ref()
        .map(|dir| RenderCache::load(dir, hash_capture_params(&plan.command, &plan.settings)));

    let report = walk(
        &mut tree,
        &revisions,
        WalkContext {
            builder: backends.builder,
            rasterizer: backends.rasterizer,
            settings: &plan.settings,
            cache: cache.as_mut(),
            stop,
            progress,
        },
    );

    let restored = match tree.restore() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "could not restore the working tree");
            false
        }
    };
    if restored
        && let Some(dir) = marker_dir
        && let Err(e) = WalkMarker::clear(dir)
    {
        tracing::warn!(dir = %dir.display(), error = %e, "could not remove walk marker");
    }

    let frames_written = match &plan.frames_dir {
        Some(dir) if !report.frames.is_empty() => {
            let written =
                write_frame_pngs(&report.frames, dir).map_err(|source| RunError::Frames {
                    path: dir.clone(),
                    source,
                })?;
            tracing::info!(dir = %dir.display(), frames = written.len(), "wrote frame PNGs");
            Some((dir.clone(), written.len()))
        }
        _ => None,
    };

    let animation = assemble(report.frames, backends.encoder, &plan.encode)?;

    Ok(RunSummary {
        revisions: revisions.len(),
        captured: report.captured,
        skipped: report.skipped,
        interrupted: report.interrupted,
        restored,
        cache_stats: report.cache_stats,
        frames_written,
        animation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::backend::tests::FakeRasterizer;
    use crate::test_helpers::{InMemoryEncoder, ScriptedBuilder, settings};
    use crate::types::FrameKey;
    use crate::vcs::backend::tests::{MockVcs, list_files, mock_id};
    use tempfile::TempDir;

    fn plan(repo: &Path) -> RunPlan {
        RunPlan {
            repository: repo.to_path_buf(),
            command: "make".into(),
            range: RevisionRange::default(),
            settings: settings(),
            encode: EncodeOptions::default(),
            gifpath: PathBuf::from("history.gif"),
            frames_dir: None,
            build_timeout: None,
            cache_dir: None,
            allow_dirty: false,
        }
    }

    fn abc_repo(tmp: &TempDir) -> MockVcs {
        MockVcs::new(
            tmp.path(),
            vec![
                ("A", vec![("doc.src", "broken")]),
                ("B", vec![("doc.src", "pages=2")]),
                ("C", vec![("doc.src", "pages=1")]),
            ],
        )
    }

    fn run(
        vcs: MockVcs,
        plan: &RunPlan,
        encoder: &mut InMemoryEncoder,
    ) -> Result<RunSummary, RunError> {
        let builder = ScriptedBuilder::new();
        let raster = FakeRasterizer::new();
        render_with(
            vcs,
            Backends {
                builder: &builder,
                rasterizer: &raster,
                encoder,
            },
            plan,
            StopSignal::new(),
            None,
        )
    }

    // =========================================================================
    // render_with
    // =========================================================================

    #[test]
    fn render_encodes_surviving_revisions() {
        let tmp = TempDir::new().unwrap();
        let mut encoder = InMemoryEncoder::new();
        let summary = run(abc_repo(&tmp), &plan(tmp.path()), &mut encoder).unwrap();

        assert_eq!(
            encoder.keys,
            vec![FrameKey::new(1, 0), FrameKey::new(1, 1), FrameKey::new(2, 0)]
        );
        assert_eq!(summary.revisions, 3);
        assert_eq!(summary.captured, 2);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.animation.frames, 3);
        assert_eq!(summary.animation.dimensions, (200, 150));
        assert!(summary.restored);
        assert!(!summary.interrupted);
    }

    #[test]
    fn all_failures_is_empty_sequence_error() {
        let tmp = TempDir::new().unwrap();
        let vcs = MockVcs::new(
            tmp.path(),
            vec![
                ("A", vec![("doc.src", "broken")]),
                ("B", vec![("doc.src", "broken")]),
            ],
        );
        let mut encoder = InMemoryEncoder::new();
        let err = run(vcs, &plan(tmp.path()), &mut encoder).unwrap_err();
        assert!(matches!(err, RunError::Assemble(AssembleError::EmptySequence)));
        assert_eq!(encoder.calls, 0);
    }

    #[test]
    fn invalid_start_is_fatal_before_checkout() {
        let tmp = TempDir::new().unwrap();
        let mut p = plan(tmp.path());
        p.range.start = Some("nowhere".into());
        let mut encoder = InMemoryEncoder::new();
        let err = run(abc_repo(&tmp), &p, &mut encoder).unwrap_err();
        assert!(matches!(
            err,
            RunError::Enumerate(EnumerateError::InvalidRevision { .. })
        ));
        assert_eq!(encoder.calls, 0);
    }

    #[test]
    fn tree_is_restored_to_original_ref() {
        let tmp = TempDir::new().unwrap();
        let mut encoder = InMemoryEncoder::new();
        let summary = run(abc_repo(&tmp), &plan(tmp.path()), &mut encoder).unwrap();

        assert!(summary.restored);
        // Back on main (C), without the byproducts of the last build.
        assert_eq!(list_files(tmp.path()), vec!["doc.src"]);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("doc.src")).unwrap(),
            "pages=1"
        );
    }

    #[test]
    fn dirty_tree_is_refused_without_force() {
        let tmp = TempDir::new().unwrap();
        let vcs = abc_repo(&tmp);
        std::fs::write(tmp.path().join("notes.txt"), "keep me").unwrap();
        let mut encoder = InMemoryEncoder::new();
        let err = run(vcs, &plan(tmp.path()), &mut encoder).unwrap_err();
        assert!(matches!(err, RunError::Tree(TreeError::Dirty { .. })));
        assert!(tmp.path().join("notes.txt").exists());
    }

    #[test]
    fn force_allows_dirty_tree() {
        let tmp = TempDir::new().unwrap();
        let vcs = abc_repo(&tmp);
        std::fs::write(tmp.path().join("notes.txt"), "scratch").unwrap();
        let mut p = plan(tmp.path());
        p.allow_dirty = true;
        let mut encoder = InMemoryEncoder::new();
        let summary = run(vcs, &p, &mut encoder).unwrap();
        assert_eq!(summary.animation.frames, 3);
    }

    #[test]
    fn frames_dir_receives_one_png_per_frame() {
        let repo = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let mut p = plan(repo.path());
        p.frames_dir = Some(out.path().join("frames"));
        let mut encoder = InMemoryEncoder::new();
        let summary = run(abc_repo(&repo), &p, &mut encoder).unwrap();

        let (dir, count) = summary.frames_written.unwrap();
        assert_eq!(count, 3);
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert!(names[0].starts_with("001-000-"));
        assert!(names[2].starts_with("002-000-"));
    }

    #[test]
    fn cached_second_run_builds_only_failures() {
        let repo = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let mut p = plan(repo.path());
        p.cache_dir = Some(cache.path().to_path_buf());

        let mut first = InMemoryEncoder::new();
        run(abc_repo(&repo), &p, &mut first).unwrap();

        let mut second = InMemoryEncoder::new();
        let summary = run(abc_repo(&repo), &p, &mut second).unwrap();
        assert_eq!(first.keys, second.keys);
        assert_eq!(summary.cache_stats.cached, 2);
        assert_eq!(summary.cache_stats.built, 0);
    }

    // =========================================================================
    // Resuming after an aborted run
    // =========================================================================

    /// Leave `vcs` the way a run killed while building `label` would: HEAD
    /// detached there, build byproducts in the tree, marker in the cache.
    fn abort_at(vcs: &MockVcs, label: &str, repo: &Path, cache: &Path) {
        WalkMarker::new(repo, "main", mock_id("C")).save(cache).unwrap();
        vcs.force_checkout(mock_id(label).as_str()).unwrap();
        std::fs::write(repo.join("out.pdf"), "pages=2").unwrap();
    }

    #[test]
    fn aborted_walk_resumes_over_full_range_and_returns_to_branch() {
        let repo = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let vcs = abc_repo(&repo);
        abort_at(&vcs, "B", repo.path(), cache.path());
        let mut p = plan(repo.path());
        p.cache_dir = Some(cache.path().to_path_buf());

        let mut encoder = InMemoryEncoder::new();
        let summary = run(vcs, &p, &mut encoder).unwrap();

        assert_eq!(summary.revisions, 3);
        assert_eq!(
            encoder.keys,
            vec![FrameKey::new(1, 0), FrameKey::new(1, 1), FrameKey::new(2, 0)]
        );
        assert!(summary.restored);
        // Back on main (C), not on B where the aborted run stopped.
        assert_eq!(list_files(repo.path()), vec!["doc.src"]);
        assert_eq!(
            std::fs::read_to_string(repo.path().join("doc.src")).unwrap(),
            "pages=1"
        );
        assert!(WalkMarker::load(cache.path(), repo.path()).is_none());
    }

    #[test]
    fn detached_head_without_marker_is_refused() {
        let repo = TempDir::new().unwrap();
        let vcs = abc_repo(&repo);
        vcs.force_checkout(mock_id("B").as_str()).unwrap();
        let mut encoder = InMemoryEncoder::new();
        let err = run(vcs, &plan(repo.path()), &mut encoder).unwrap_err();
        assert!(matches!(
            err,
            RunError::Resume(ResumeError::DetachedHead { .. })
        ));
        assert_eq!(encoder.calls, 0);
    }

    /// Records whether the walk marker exists while revisions are built.
    struct MarkerWatcher {
        marker: PathBuf,
        inner: ScriptedBuilder,
        seen: std::sync::Mutex<Vec<bool>>,
    }

    impl Builder for MarkerWatcher {
        fn build(&self, dir: &Path) -> Result<crate::build::ExitInfo, crate::build::BuildError> {
            self.seen.lock().unwrap().push(self.marker.exists());
            self.inner.build(dir)
        }
    }

    #[test]
    fn marker_exists_only_while_walking() {
        let repo = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let mut p = plan(repo.path());
        p.cache_dir = Some(cache.path().to_path_buf());
        let builder = MarkerWatcher {
            marker: cache.path().join(".walk-in-progress.json"),
            inner: ScriptedBuilder::new(),
            seen: Default::default(),
        };
        let raster = FakeRasterizer::new();
        let mut encoder = InMemoryEncoder::new();

        render_with(
            abc_repo(&repo),
            Backends {
                builder: &builder,
                rasterizer: &raster,
                encoder: &mut encoder,
            },
            &p,
            StopSignal::new(),
            None,
        )
        .unwrap();

        assert_eq!(*builder.seen.lock().unwrap(), vec![true, true, true]);
        assert!(!builder.marker.exists());
    }

    // =========================================================================
    // RunPlan::from_config
    // =========================================================================

    fn config(repo: &Path) -> RunConfig {
        RunConfig {
            repository: Some(repo.to_path_buf()),
            command: Some("latexmk -pdf".into()),
            pdfpath: Some(PathBuf::from("paper.pdf")),
            ..RunConfig::default()
        }
    }

    #[test]
    fn plan_from_config_maps_every_section() {
        let repo = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let mut c = config(repo.path());
        c.starthash = Some("v1".into());
        c.first_parent = true;
        c.render.first_page = Some(2);
        c.render.background = "#000000".into();
        c.animation.delay_ms = 500;
        c.build.timeout_secs = Some(30);
        c.cache.dir = cache.path().join("c");

        let p = RunPlan::from_config(&c).unwrap();
        assert_eq!(p.command, "latexmk -pdf");
        assert_eq!(p.range.start.as_deref(), Some("v1"));
        assert!(p.range.first_parent);
        assert_eq!(p.settings.canvas, Dimensions::new(800, 600));
        assert_eq!(p.settings.pages.first, Some(2));
        assert_eq!(p.settings.background, image::Rgba([0, 0, 0, 255]));
        assert_eq!(p.encode.delay_ms, 500);
        assert_eq!(p.build_timeout, Some(Duration::from_secs(30)));
        assert_eq!(p.cache_dir, Some(cache.path().join("c")));
        assert!(!p.allow_dirty);
    }

    #[test]
    fn plan_requires_command_and_pdfpath() {
        let repo = TempDir::new().unwrap();
        let mut c = config(repo.path());
        c.command = None;
        assert!(matches!(
            RunPlan::from_config(&c),
            Err(ConfigError::Missing("command"))
        ));
        let mut c = config(repo.path());
        c.pdfpath = None;
        assert!(matches!(
            RunPlan::from_config(&c),
            Err(ConfigError::Missing("pdfpath"))
        ));
        let mut c = config(repo.path());
        c.repository = None;
        assert!(matches!(
            RunPlan::from_config(&c),
            Err(ConfigError::Missing("repository"))
        ));
    }

    #[test]
    fn disabled_cache_has_no_dir() {
        let repo = TempDir::new().unwrap();
        let mut c = config(repo.path());
        c.cache.enabled = false;
        assert!(RunPlan::from_config(&c).unwrap().cache_dir.is_none());
    }

    #[test]
    fn cache_inside_repository_is_rejected() {
        let repo = TempDir::new().unwrap();
        let mut c = config(repo.path());
        c.cache.dir = repo.path().join("not-yet").join(".pdflapse-cache");
        assert!(matches!(
            RunPlan::from_config(&c),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn is_inside_handles_missing_components() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir(&repo).unwrap();
        assert!(is_inside(&repo.join("a/b"), &repo));
        assert!(is_inside(&repo, &repo));
        assert!(!is_inside(&tmp.path().join("cache"), &repo));
        assert!(!is_inside(&tmp.path().join("repo-cache"), &repo));
    }
}
