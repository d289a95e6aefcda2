//! Render cache for resumable runs.
//!
//! Building a revision is the bottleneck of a run: a LaTeX document can take
//! many seconds per revision, and a long history has hundreds of them. This
//! module lets the walk skip checkout, build and rasterization entirely for
//! revisions whose frames were already rendered with the same settings, so
//! an interrupted or repeated run picks up where it left off.
//!
//! # Design
//!
//! Only successfully captured revisions are cached. A skipped revision is
//! retried on the next run, since the failure may have been environmental
//! (missing tool, timeout).
//!
//! ## Cache keys
//!
//! Lookups are by the combination of `revision` and `params_hash`:
//!
//! - **`revision`**: full commit hash. Commits are immutable, so the sources
//!   behind a hash never change.
//!
//! - **`params_hash`**: SHA-256 of every setting that influences the rendered
//!   pixels: build command, build directory, PDF path, canvas size, page cell
//!   size, layout, page range and background colour. Changing any of them
//!   invalidates every entry. Frame delay and loop count only affect encoding
//!   and are not part of the key.
//!
//! A cache hit requires:
//! 1. An entry with matching `revision` and `params_hash` exists
//! 2. Every frame PNG it lists is still on disk and decodes
//!
//! Frame keys are not stored: a hit is re-tagged with the revision's index
//! in the current walk, which depends on the chosen range.
//!
//! ## Storage
//!
//! The manifest is a JSON file at `<cache dir>/.cache-manifest.json`, next
//! to the frame PNGs. It is saved after every captured revision, through a
//! `.partial` file and a rename, so killing the process loses at most the
//! revision in flight and never the manifest itself.
//!
//! Opening the cache with new settings drops the entries of every other
//! settings hash and deletes their PNGs, so the directory only ever holds
//! frames of one configuration.
//!
//! ## Bypassing the cache
//!
//! Pass `--no-cache` (or set `cache.enabled = false`) to neither read nor
//! write the cache.

use crate::capture::CaptureSettings;
use crate::frame::Frame;
use crate::types::{FrameKey, Layout, Revision};
use image::ImageFormat;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Name of the cache manifest file within the cache directory.
const MANIFEST_FILENAME: &str = ".cache-manifest.json";

/// Version of the cache manifest format. Bump this to invalidate all
/// existing caches when the format or key computation changes.
const MANIFEST_VERSION: u32 = 1;

/// Frames of one captured revision.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub revision: String,
    pub params_hash: String,
    /// PNG file names in the cache directory, in page order.
    pub frames: Vec<String>,
}

/// On-disk manifest mapping `"{revision}:{params_hash}"` to entries.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CacheManifest {
    pub version: u32,
    pub entries: HashMap<String, CacheEntry>,
}

impl CacheManifest {
    pub fn empty() -> Self {
        Self {
            version: MANIFEST_VERSION,
            entries: HashMap::new(),
        }
    }

    /// Load from the cache directory. Returns an empty manifest if the
    /// file doesn't exist or can't be parsed (version mismatch, corruption).
    pub fn load(dir: &Path) -> Self {
        let content = match std::fs::read_to_string(manifest_path(dir)) {
            Ok(c) => c,
            Err(_) => return Self::empty(),
        };
        let manifest: Self = match serde_json::from_str(&content) {
            Ok(m) => m,
            Err(_) => return Self::empty(),
        };
        if manifest.version != MANIFEST_VERSION {
            return Self::empty();
        }
        manifest
    }

    /// Save to the cache directory, creating it if needed.
    pub fn save(&self, dir: &Path) -> io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(self)?;
        write_replacing(&manifest_path(dir), json.as_bytes())
    }

    /// Remove entries made with any settings hash but `params_hash` and
    /// delete their frame files. Returns the number of entries removed.
    fn prune(&mut self, dir: &Path, params_hash: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            if entry.params_hash == params_hash {
                return true;
            }
            for name in &entry.frames {
                let _ = std::fs::remove_file(dir.join(name));
            }
            false
        });
        before - self.entries.len()
    }
}

/// Write `contents` to `path` through a sibling `.partial` file and a
/// rename, so readers see either the old or the new file, never a torn one.
pub(crate) fn write_replacing(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);
    std::fs::write(&partial, contents)?;
    std::fs::rename(&partial, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&partial);
    })
}

fn entry_key(revision: &str, params_hash: &str) -> String {
    format!("{}:{}", revision, params_hash)
}

/// Render cache bound to one directory and one set of capture settings.
#[derive(Debug)]
pub struct RenderCache {
    dir: PathBuf,
    params_hash: String,
    manifest: CacheManifest,
}

impl RenderCache {
    /// Open the cache in `dir` for settings hashing to `params_hash`.
    pub fn load(dir: impl Into<PathBuf>, params_hash: impl Into<String>) -> Self {
        let dir = dir.into();
        let params_hash = params_hash.into();
        let mut manifest = CacheManifest::load(&dir);
        let pruned = manifest.prune(&dir, &params_hash);
        if pruned > 0 {
            tracing::info!(
                dir = %dir.display(),
                entries = pruned,
                "dropped cache entries made with other settings"
            );
            if let Err(e) = manifest.save(&dir) {
                tracing::warn!(
                    dir = %dir.display(),
                    error = %e,
                    "could not rewrite cache manifest"
                );
            }
        }
        tracing::debug!(
            dir = %dir.display(),
            entries = manifest.entries.len(),
            "loaded render cache"
        );
        Self {
            dir,
            params_hash,
            manifest,
        }
    }

    pub fn len(&self) -> usize {
        self.manifest.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.entries.is_empty()
    }

    /// Frames previously captured for `revision`, tagged with its current
    /// walk index. `None` unless every frame file is present and readable.
    pub fn find(&self, revision: &Revision) -> Option<Vec<Frame>> {
        let entry = self
            .manifest
            .entries
            .get(&entry_key(revision.id.as_str(), &self.params_hash))?;
        if entry.frames.is_empty() {
            return None;
        }
        entry
            .frames
            .iter()
            .enumerate()
            .map(|(page_index, name)| {
                let bytes = std::fs::read(self.dir.join(name)).ok()?;
                let image = image::load_from_memory_with_format(&bytes, ImageFormat::Png)
                    .ok()?
                    .to_rgba8();
                Some(Frame::new(
                    FrameKey::new(revision.index, page_index),
                    revision.id.clone(),
                    image,
                ))
            })
            .collect()
    }

    /// Write the frames of `revision` and persist the manifest.
    pub fn store(&mut self, revision: &Revision, frames: &[Frame]) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let prefix = &self.params_hash[..self.params_hash.len().min(12)];
        let mut names = Vec::with_capacity(frames.len());
        for (page_index, frame) in frames.iter().enumerate() {
            let name = format!("{}-{}-{:03}.png", revision.id, prefix, page_index);
            frame
                .image()
                .save_with_format(self.dir.join(&name), ImageFormat::Png)
                .map_err(io::Error::other)?;
            names.push(name);
        }
        self.manifest.entries.insert(
            entry_key(revision.id.as_str(), &self.params_hash),
            CacheEntry {
                revision: revision.id.to_string(),
                params_hash: self.params_hash.clone(),
                frames: names,
            },
        );
        self.manifest.save(&self.dir)
    }
}

/// SHA-256 hash of everything that determines the pixels of a revision's
/// frames.
pub fn hash_capture_params(command: &str, settings: &CaptureSettings) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"capture\0");
    hasher.update(command.as_bytes());
    hasher.update(b"\0");
    hasher.update(settings.subdirectory.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update(settings.pdf_path.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    for v in [
        settings.canvas.width,
        settings.canvas.height,
        settings.page_cell.width,
        settings.page_cell.height,
    ] {
        hasher.update(v.to_le_bytes());
    }
    hasher.update(match settings.layout {
        Layout::Pages => b"pages",
        Layout::Sheet => b"sheet",
    });
    for end in [settings.pages.first, settings.pages.last] {
        match end {
            Some(n) => {
                hasher.update(b"\x01");
                hasher.update((n as u64).to_le_bytes());
            }
            None => hasher.update(b"\x00"),
        }
    }
    hasher.update(settings.background.0);
    format!("{:x}", hasher.finalize())
}

/// Per-run tally of where each revision's frames came from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub cached: u32,
    pub built: u32,
    pub skipped: u32,
}

impl CacheStats {
    pub fn hit(&mut self) {
        self.cached += 1;
    }

    pub fn build(&mut self) {
        self.built += 1;
    }

    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    pub fn total(&self) -> u32 {
        self.cached + self.built + self.skipped
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cached > 0 {
            write!(f, "{} cached, {} built", self.cached, self.built)?;
        } else {
            write!(f, "{} built", self.built)?;
        }
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        if self.cached > 0 || self.skipped > 0 {
            write!(f, " ({} total)", self.total())?;
        }
        Ok(())
    }
}

/// Resolve the cache manifest path for a cache directory.
pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILENAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{revision, settings};
    use image::{Rgba, RgbaImage};
    use std::fs;
    use tempfile::TempDir;

    fn frames_for(rev: &Revision, shades: &[u8]) -> Vec<Frame> {
        shades
            .iter()
            .enumerate()
            .map(|(i, &s)| {
                Frame::new(
                    FrameKey::new(rev.index, i),
                    rev.id.clone(),
                    RgbaImage::from_pixel(6, 4, Rgba([s, s, s, 255])),
                )
            })
            .collect()
    }

    // =========================================================================
    // CacheManifest basics
    // =========================================================================

    #[test]
    fn empty_manifest_has_no_entries() {
        let m = CacheManifest::empty();
        assert_eq!(m.version, MANIFEST_VERSION);
        assert!(m.entries.is_empty());
    }

    #[test]
    fn load_missing_file_returns_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(CacheManifest::load(tmp.path()).entries.is_empty());
    }

    #[test]
    fn load_corrupt_json_returns_empty() {
        let tmp = TempDir::new().unwrap();
        fs::write(manifest_path(tmp.path()), "not json").unwrap();
        assert!(CacheManifest::load(tmp.path()).entries.is_empty());
    }

    #[test]
    fn load_wrong_version_returns_empty() {
        let tmp = TempDir::new().unwrap();
        let json = format!(
            r#"{{"version": {}, "entries": {{"a:p": {{"revision":"a","params_hash":"p","frames":["x.png"]}}}}}}"#,
            MANIFEST_VERSION + 1
        );
        fs::write(manifest_path(tmp.path()), json).unwrap();
        assert!(CacheManifest::load(tmp.path()).entries.is_empty());
    }

    // =========================================================================
    // RenderCache
    // =========================================================================

    #[test]
    fn store_then_find_in_new_session() {
        let tmp = TempDir::new().unwrap();
        let rev = revision(3, "B");
        let mut cache = RenderCache::load(tmp.path(), "params");
        cache.store(&rev, &frames_for(&rev, &[10, 20])).unwrap();

        let reopened = RenderCache::load(tmp.path(), "params");
        assert_eq!(reopened.len(), 1);
        let found = reopened.find(&rev).unwrap();
        assert_eq!(found, frames_for(&rev, &[10, 20]));
    }

    #[test]
    fn find_retags_with_current_index() {
        let tmp = TempDir::new().unwrap();
        let mut cache = RenderCache::load(tmp.path(), "params");
        let old = revision(5, "B");
        cache.store(&old, &frames_for(&old, &[1])).unwrap();

        let now = revision(0, "B");
        let found = cache.find(&now).unwrap();
        assert_eq!(found[0].key(), FrameKey::new(0, 0));
    }

    #[test]
    fn find_miss_with_other_params() {
        let tmp = TempDir::new().unwrap();
        let rev = revision(0, "A");
        let mut cache = RenderCache::load(tmp.path(), "params-a");
        cache.store(&rev, &frames_for(&rev, &[1])).unwrap();

        assert!(RenderCache::load(tmp.path(), "params-b").find(&rev).is_none());
    }

    #[test]
    fn find_miss_when_frame_file_deleted() {
        let tmp = TempDir::new().unwrap();
        let rev = revision(0, "A");
        let mut cache = RenderCache::load(tmp.path(), "params");
        cache.store(&rev, &frames_for(&rev, &[1, 2])).unwrap();

        let entry = cache.manifest.entries.values().next().unwrap().clone();
        fs::remove_file(tmp.path().join(&entry.frames[1])).unwrap();
        assert!(cache.find(&rev).is_none());
    }

    #[test]
    fn find_miss_unknown_revision() {
        let tmp = TempDir::new().unwrap();
        let cache = RenderCache::load(tmp.path(), "params");
        assert!(cache.is_empty());
        assert!(cache.find(&revision(0, "A")).is_none());
    }

    #[test]
    fn other_settings_are_pruned_with_their_files() {
        let tmp = TempDir::new().unwrap();
        let rev = revision(0, "A");
        let mut old = RenderCache::load(tmp.path(), "params-a");
        old.store(&rev, &frames_for(&rev, &[1, 2])).unwrap();
        let stale = old.manifest.entries.values().next().unwrap().frames.clone();

        let mut current = RenderCache::load(tmp.path(), "params-b");
        assert!(current.is_empty());
        for name in &stale {
            assert!(!tmp.path().join(name).exists());
        }
        current.store(&rev, &frames_for(&rev, &[3])).unwrap();

        let reopened = CacheManifest::load(tmp.path());
        assert_eq!(reopened.entries.len(), 1);
        assert!(reopened.entries.values().all(|e| e.params_hash == "params-b"));
    }

    #[test]
    fn save_replaces_manifest_without_leftovers() {
        let tmp = TempDir::new().unwrap();
        let rev = revision(0, "A");
        // A torn write from a killed run never reaches the manifest itself.
        fs::write(tmp.path().join(".cache-manifest.json.partial"), "{\"vers").unwrap();
        let mut cache = RenderCache::load(tmp.path(), "params");
        cache.store(&rev, &frames_for(&rev, &[1])).unwrap();

        assert!(!tmp.path().join(".cache-manifest.json.partial").exists());
        assert_eq!(CacheManifest::load(tmp.path()).entries.len(), 1);
    }

    // =========================================================================
    // hash_capture_params
    // =========================================================================

    #[test]
    fn params_hash_deterministic() {
        assert_eq!(
            hash_capture_params("make", &settings()),
            hash_capture_params("make", &settings())
        );
        assert_eq!(hash_capture_params("make", &settings()).len(), 64);
    }

    #[test]
    fn params_hash_varies_with_command() {
        assert_ne!(
            hash_capture_params("make", &settings()),
            hash_capture_params("latexmk -pdf", &settings())
        );
    }

    #[test]
    fn params_hash_varies_with_layout_and_canvas() {
        let base = hash_capture_params("make", &settings());
        let mut sheet = settings();
        sheet.layout = Layout::Sheet;
        assert_ne!(base, hash_capture_params("make", &sheet));

        let mut wide = settings();
        wide.canvas.width += 1;
        assert_ne!(base, hash_capture_params("make", &wide));
    }

    #[test]
    fn params_hash_varies_with_page_range() {
        let mut first = settings();
        first.pages.first = Some(1);
        let mut last = settings();
        last.pages.last = Some(1);
        assert_ne!(
            hash_capture_params("make", &first),
            hash_capture_params("make", &last)
        );
    }

    // =========================================================================
    // CacheStats
    // =========================================================================

    #[test]
    fn cache_stats_display_with_hits() {
        let s = CacheStats {
            cached: 5,
            built: 2,
            skipped: 0,
        };
        assert_eq!(format!("{}", s), "5 cached, 2 built (7 total)");
    }

    #[test]
    fn cache_stats_display_with_skips() {
        let s = CacheStats {
            cached: 0,
            built: 3,
            skipped: 1,
        };
        assert_eq!(format!("{}", s), "3 built, 1 skipped (4 total)");
    }

    #[test]
    fn cache_stats_display_only_built() {
        let mut s = CacheStats::default();
        s.build();
        s.build();
        assert_eq!(format!("{}", s), "2 built");
    }
}
