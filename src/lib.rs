//! # pdflapse
//!
//! Replays the history of a repository that builds a PDF and turns it into an
//! animated GIF. Every revision in a range is checked out, built with the
//! user's own build command, and every page of the resulting PDF becomes a
//! frame. Watching the GIF shows the document being written.
//!
//! # Architecture: Four-Stage Pipeline
//!
//! ```text
//! 1. Enumerate  [start, end]     →  Vec<Revision>    (history, oldest first)
//! 2. Step       Revision         →  pristine tree     (force checkout + clean)
//! 3. Capture    tree             →  Vec<Frame>        (build → PDF → pages)
//! 4. Assemble   FrameSequence    →  history.gif
//! ```
//!
//! Stages 2 and 3 repeat once per revision, strictly in order, driven by
//! [`walk`]. A revision that fails to check out, build or rasterize is
//! skipped with a warning and contributes no frames; the walk always moves
//! on. Only an invalid revision range (before the walk) and an empty frame
//! sequence (after it) end a run with an error.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`revisions`] | Stage 1: resolves the range and lists the revisions to visit |
//! | [`tree`] | Stage 2: the working tree as an owned resource, `&mut` to step it |
//! | [`capture`] | Stage 3: builds the checked-out revision and renders its pages |
//! | [`assemble`] | Stage 4: encodes the ordered frames into the GIF |
//! | [`walk`] | The per-revision loop, skip handling, progress events, stop signal |
//! | [`run`] | A whole run from config to GIF, plus the read-only `list` |
//! | [`vcs`] | Version control capability; `git` CLI implementation |
//! | [`build`] | Build command capability; shell implementation with timeout |
//! | [`raster`] | PDF rasterizer capability (poppler) and canvas composition |
//! | [`frame`] | Frames and the key-ordered frame sequence |
//! | [`cache`] | Render cache that makes interrupted runs resumable |
//! | [`resume`] | Walk marker that recovers range and ref after a hard abort |
//! | [`config`] | `pdflapse.toml` loading, validation, merging |
//! | [`types`] | Shared identifiers (`Revision`, `FrameKey`, `Layout`) |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## System Tools at the Edges
//!
//! Checkout, build and rasterization shell out to `git`, `sh` and poppler's
//! `pdfinfo`/`pdftoppm`. Each sits behind a small trait
//! ([`vcs::VersionControl`], [`build::Builder`], [`raster::Rasterizer`]), so the
//! pipeline logic is tested against in-memory fakes without any of them
//! installed. Compositing and GIF encoding are pure Rust (`image`).
//!
//! ## The Tree Is Destroyed at Every Step
//!
//! A build needs a pristine tree: stale `.aux` files or a leftover PDF from
//! the previous revision would leak into the next frame. Every step discards
//! local modifications and deletes all untracked and ignored files. Point
//! pdflapse at a dedicated clone. [`tree::WorkingTree::open`] refuses a dirty
//! tree unless forced, and the original ref is checked out again at the end.
//!
//! ## Fixed Canvas
//!
//! GIF frames must share one size, while page sizes can change over a
//! document's history. Every page is scaled to fit a fixed canvas,
//! centered, with the remainder filled by the background colour.
//!
//! ## Resumable Runs
//!
//! Building every revision of a long history takes a while. Frames of each
//! captured revision are stored in the [`cache`] keyed by revision id and
//! render settings, so a run stopped with Ctrl-C picks up where it left off.
//! A run killed outright leaves `HEAD` detached mid-history; the [`resume`]
//! marker tells the next run which range it was walking and where to return.

pub mod assemble;
pub mod build;
pub mod cache;
pub mod capture;
pub mod config;
pub mod frame;
pub mod output;
pub mod raster;
pub mod resume;
pub mod revisions;
pub mod run;
pub mod tree;
pub mod types;
pub mod vcs;
pub mod walk;

#[cfg(test)]
pub(crate) mod test_helpers;
