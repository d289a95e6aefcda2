//! CLI output formatting.
//!
//! Output is **revision-centric**: every line about a revision leads with its
//! walk index and short hash, then its subject line, so the progress log reads
//! as the history being replayed. Details (frame counts, skip reasons) go on
//! indented lines below.
//!
//! # Output Format
//!
//! ## List
//!
//! ```text
//! Revisions (3)
//! 000 1f3e9a0c Initial outline
//! 001 77b20d41 Draft introduction
//! 002 c0ffee12 Fix figure 2
//! ```
//!
//! ## Render progress
//!
//! ```text
//! [1/3] 000 1f3e9a0c Initial outline
//!     skipped (build): build exited with status 1
//! [2/3] 001 77b20d41 Draft introduction
//!     2 frames
//! [3/3] 002 c0ffee12 Fix figure 2
//!     2 frames (cached)
//! ```
//!
//! ## Render summary
//!
//! ```text
//! Skipped
//!     000 1f3e9a0c build: build exited with status 1
//! Frames: frames/ (4 files)
//! Wrote history.gif: 4 frames from 2 of 3 revisions (800x600)
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::run::RunSummary;
use crate::types::Revision;
use crate::walk::WalkEvent;
use std::path::Path;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a walk index as 3-digit zero-padded, matching frame file names.
fn format_index(index: usize) -> String {
    format!("{:0>3}", index)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `000 1f3e9a0c Initial outline`
fn revision_line(revision: &Revision) -> String {
    if revision.summary.is_empty() {
        format!("{} {}", format_index(revision.index), revision.id.short())
    } else {
        format!(
            "{} {} {}",
            format_index(revision.index),
            revision.id.short(),
            revision.summary
        )
    }
}

/// First line of a possibly multi-line error message.
fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or("")
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{} {}", n, word)
    } else {
        format!("{} {}s", n, word)
    }
}

// ============================================================================
// List
// ============================================================================

pub fn format_revision_list(revisions: &[Revision]) -> Vec<String> {
    let mut lines = vec![format!("Revisions ({})", revisions.len())];
    lines.extend(revisions.iter().map(revision_line));
    lines
}

pub fn print_revision_list(revisions: &[Revision]) {
    for line in format_revision_list(revisions) {
        println!("{}", line);
    }
}

// ============================================================================
// Render progress
// ============================================================================

/// Format a single walk event as display lines.
pub fn format_walk_event(event: &WalkEvent) -> Vec<String> {
    match event {
        WalkEvent::RevisionStarted { revision, total } => vec![format!(
            "[{}/{}] {}",
            revision.index + 1,
            total,
            revision_line(revision)
        )],
        WalkEvent::RevisionCaptured { frames, cached, .. } => {
            let mut line = format!("{}{}", indent(1), plural(*frames, "frame"));
            if *cached {
                line.push_str(" (cached)");
            }
            vec![line]
        }
        WalkEvent::RevisionSkipped { stage, reason, .. } => vec![format!(
            "{}skipped ({}): {}",
            indent(1),
            stage,
            first_line(reason)
        )],
        WalkEvent::Interrupted { remaining } => vec![format!(
            "Interrupted: {} not visited",
            plural(*remaining, "revision")
        )],
    }
}

// ============================================================================
// Render summary
// ============================================================================

pub fn format_run_summary(summary: &RunSummary, gifpath: &Path) -> Vec<String> {
    let mut lines = Vec::new();

    if !summary.skipped.is_empty() {
        lines.push("Skipped".to_string());
        for skipped in &summary.skipped {
            lines.push(format!(
                "{}{} {} {}: {}",
                indent(1),
                format_index(skipped.revision.index),
                skipped.revision.id.short(),
                skipped.reason.stage(),
                first_line(&skipped.reason.to_string())
            ));
        }
    }

    if summary.interrupted {
        lines.push("Interrupted: the animation covers only the revisions visited".to_string());
    }
    if !summary.restored {
        lines.push(
            "Warning: the working tree could not be restored to its original ref".to_string(),
        );
    }
    if let Some((dir, count)) = &summary.frames_written {
        lines.push(format!(
            "Frames: {}/ ({})",
            dir.display(),
            plural(*count, "file")
        ));
    }

    let (w, h) = summary.animation.dimensions;
    lines.push(format!(
        "Wrote {}: {} from {} of {} ({}x{})",
        gifpath.display(),
        plural(summary.animation.frames, "frame"),
        summary.animation.revisions,
        plural(summary.revisions, "revision"),
        w,
        h
    ));
    lines
}

pub fn print_run_summary(summary: &RunSummary, gifpath: &Path) {
    for line in format_run_summary(summary, gifpath) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
