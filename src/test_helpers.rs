//! Shared test utilities for the pdflapse test suite.
//!
//! Unit tests never need a real LaTeX installation or poppler: documents in
//! the mock repositories are tiny text files (`doc.src`) whose content tells
//! [`ScriptedBuilder`] how to behave, and the "PDF" it writes is read back by
//! [`FakeRasterizer`](crate::raster::backend::tests::FakeRasterizer).
//!
//! # `doc.src` scripts
//!
//! | content | build result |
//! |---|---|
//! | `pages=N` (plus any other tokens) | exit 0, writes `out.pdf` with the same content, plus `out.aux` |
//! | contains `broken` | exit 1 with a LaTeX-style error on stderr, no PDF |
//! | contains `nooutput` | exit 0, no PDF |
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let vcs = MockVcs::new(tmp.path(), vec![("A", vec![("doc.src", "pages=2")])]);
//! let mut tree = WorkingTree::open(vcs, false).unwrap();
//! tree.step_to(&revision(0, "A")).unwrap();
//! let outcome = capture_revision(&tree, &ScriptedBuilder::new(), &FakeRasterizer::new(), &settings(), &revision(0, "A"));
//! ```

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use image::Rgba;

use crate::assemble::{AnimationEncoder, EncodeError, EncodeOptions};
use crate::build::{BuildError, Builder, ExitInfo};
use crate::capture::{CaptureSettings, PageRange};
use crate::frame::FrameSequence;
use crate::raster::Dimensions;
use crate::types::{FrameKey, Layout, Revision};
use crate::vcs::backend::tests::mock_id;

// =========================================================================
// Fixtures
// =========================================================================

/// Revision `label` of a `MockVcs` repository at walk position `index`.
pub fn revision(index: usize, label: &str) -> Revision {
    Revision {
        index,
        id: mock_id(label),
        summary: format!("commit {}", label),
    }
}

/// Small canvas settings for fast tests: 200×150 frames, 40×50 sheet cells,
/// PDF at `out.pdf` in the tree root.
pub fn settings() -> CaptureSettings {
    CaptureSettings {
        subdirectory: PathBuf::new(),
        pdf_path: PathBuf::from("out.pdf"),
        canvas: Dimensions::new(200, 150),
        page_cell: Dimensions::new(40, 50),
        layout: Layout::Pages,
        pages: PageRange::default(),
        background: Rgba([255, 255, 255, 255]),
    }
}

// =========================================================================
// Builder
// =========================================================================

/// Builder that follows the script in `doc.src` instead of running anything.
#[derive(Default)]
pub struct ScriptedBuilder {
    calls: Mutex<Vec<PathBuf>>,
}

impl ScriptedBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn exit(code: i32, stderr: &str) -> ExitInfo {
    ExitInfo {
        code: Some(code),
        success: code == 0,
        duration: Duration::from_millis(1),
        stdout_tail: String::new(),
        stderr_tail: stderr.to_string(),
    }
}

impl Builder for ScriptedBuilder {
    fn build(&self, dir: &Path) -> Result<ExitInfo, BuildError> {
        self.calls.lock().unwrap().push(dir.to_path_buf());
        let script = std::fs::read_to_string(dir.join("doc.src")).map_err(BuildError::Spawn)?;
        if script.contains("broken") {
            return Ok(exit(1, "! Undefined control sequence."));
        }
        if script.contains("nooutput") {
            return Ok(exit(0, ""));
        }
        std::fs::write(dir.join("out.aux"), "\\relax").map_err(BuildError::Spawn)?;
        std::fs::write(dir.join("out.pdf"), &script).map_err(BuildError::Spawn)?;
        Ok(exit(0, ""))
    }
}

// =========================================================================
// Encoder
// =========================================================================

/// Encoder that records what it was asked to encode.
#[derive(Default)]
pub struct InMemoryEncoder {
    pub calls: usize,
    pub keys: Vec<FrameKey>,
    pub options: Option<EncodeOptions>,
    pub fail: bool,
}

impl InMemoryEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl AnimationEncoder for InMemoryEncoder {
    fn encode(
        &mut self,
        frames: FrameSequence,
        options: &EncodeOptions,
    ) -> Result<(), EncodeError> {
        self.calls += 1;
        if self.fail {
            return Err(EncodeError::Io(std::io::Error::other("disk full")));
        }
        self.keys = frames.keys();
        self.options = Some(options.clone());
        Ok(())
    }
}
