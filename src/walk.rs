//! The revision walk: drives step → build → rasterize once per revision.
//!
//! Revisions are visited strictly one after another in enumeration order.
//! Each revision either contributes all of its frames or none; failures are
//! logged with the revision id, recorded in the [`WalkReport`], and the walk
//! moves on. Nothing a single revision does can end the walk.
//!
//! A [`StopSignal`] is checked before each revision. When it is raised the
//! walk stops and returns everything gathered so far.

use crate::build::Builder;
use crate::cache::{CacheStats, RenderCache};
use crate::capture::{CaptureSettings, RevisionOutcome, SkipReason, capture_revision};
use crate::frame::{Frame, FrameSequence};
use crate::raster::Rasterizer;
use crate::tree::WorkingTree;
use crate::types::Revision;
use crate::vcs::VersionControl;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

/// Shared flag asking the walk to stop after the current revision.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress events, in the order they happen.
#[derive(Debug, Clone)]
pub enum WalkEvent {
    RevisionStarted {
        revision: Revision,
        total: usize,
    },
    RevisionCaptured {
        revision: Revision,
        frames: usize,
        cached: bool,
    },
    RevisionSkipped {
        revision: Revision,
        stage: &'static str,
        reason: String,
    },
    /// The stop signal was seen; `remaining` revisions were not visited.
    Interrupted { remaining: usize },
}

/// A revision that contributed no frames, and why.
#[derive(Debug)]
pub struct SkippedRevision {
    pub revision: Revision,
    pub reason: SkipReason,
}

#[derive(Debug)]
pub struct WalkReport {
    pub frames: FrameSequence,
    /// Revisions that contributed frames (built or cached).
    pub captured: usize,
    pub skipped: Vec<SkippedRevision>,
    pub interrupted: bool,
    pub cache_stats: CacheStats,
}

/// Collaborators and settings for one walk.
pub struct WalkContext<'a> {
    pub builder: &'a dyn Builder,
    pub rasterizer: &'a dyn Rasterizer,
    pub settings: &'a CaptureSettings,
    pub cache: Option<&'a mut RenderCache>,
    pub stop: StopSignal,
    pub progress: Option<Sender<WalkEvent>>,
}

impl WalkContext<'_> {
    fn emit(&self, event: WalkEvent) {
        if let Some(tx) = &self.progress {
            tx.send(event).ok();
        }
    }
}

/// Visit `revisions` in order and collect their frames.
pub fn walk<V: VersionControl>(
    tree: &mut WorkingTree<V>,
    revisions: &[Revision],
    mut ctx: WalkContext<'_>,
) -> WalkReport {
    let total = revisions.len();
    let mut report = WalkReport {
        frames: FrameSequence::new(),
        captured: 0,
        skipped: Vec::new(),
        interrupted: false,
        cache_stats: CacheStats::default(),
    };

    for (position, revision) in revisions.iter().enumerate() {
        if ctx.stop.is_stopped() {
            let remaining = total - position;
            tracing::warn!(remaining, "interrupted, stopping walk");
            report.interrupted = true;
            ctx.emit(WalkEvent::Interrupted { remaining });
            break;
        }
        ctx.emit(WalkEvent::RevisionStarted {
            revision: revision.clone(),
            total,
        });

        if let Some(frames) = ctx.cache.as_deref().and_then(|c| c.find(revision)) {
            tracing::info!(revision = %revision.id.short(), frames = frames.len(), "cached");
            report.cache_stats.hit();
            accept(&mut report, &ctx, revision, frames, true);
            continue;
        }

        let outcome = match tree.step_to(revision) {
            Ok(()) => capture_revision(
                tree,
                ctx.builder,
                ctx.rasterizer,
                ctx.settings,
                revision,
            ),
            Err(e) => RevisionOutcome::Skipped(e.into()),
        };

        match outcome {
            RevisionOutcome::Captured(frames) => {
                tracing::info!(revision = %revision.id.short(), frames = frames.len(), "captured");
                if let Some(cache) = ctx.cache.as_deref_mut()
                    && let Err(e) = cache.store(revision, &frames)
                {
                    tracing::warn!(
                        revision = %revision.id,
                        error = %e,
                        "could not write render cache"
                    );
                }
                report.cache_stats.build();
                accept(&mut report, &ctx, revision, frames, false);
            }
            RevisionOutcome::Skipped(reason) => {
                tracing::warn!(
                    revision = %revision.id,
                    stage = reason.stage(),
                    error = %reason,
                    "skipping revision"
                );
                report.cache_stats.skip();
                ctx.emit(WalkEvent::RevisionSkipped {
                    revision: revision.clone(),
                    stage: reason.stage(),
                    reason: reason.to_string(),
                });
                report.skipped.push(SkippedRevision {
                    revision: revision.clone(),
                    reason,
                });
            }
        }
    }

    report
}

fn accept(
    report: &mut WalkReport,
    ctx: &WalkContext<'_>,
    revision: &Revision,
    frames: Vec<Frame>,
    cached: bool,
) {
    ctx.emit(WalkEvent::RevisionCaptured {
        revision: revision.clone(),
        frames: frames.len(),
        cached,
    });
    report.captured += 1;
    report.frames.extend(frames);
}
