//! Run configuration.
//!
//! Handles loading, validating, and merging `pdflapse.toml`. Settings are
//! layered: stock defaults, then the config file, then command-line flags.
//! Each layer is a sparse TOML table merged on top of the previous one, so
//! the final [`RunConfig`] is deserialized and validated exactly once.
//!
//! ## Config File Location
//!
//! `pdflapse.toml` in the current directory is picked up automatically.
//! `--config <file>` names a different file, which must then exist.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below.
//! # repository, command and pdfpath have no default and must be set here
//! # or on the command line.
//!
//! repository = "."          # Git checkout to walk (it WILL be reset)
//! subdirectory = ""         # Build directory inside the repository
//! command = "latexmk -pdf"  # Build command, run through the shell
//! pdfpath = "paper.pdf"     # PDF produced, relative to the build directory
//! starthash = "v1.0"        # First revision (inclusive), default: root commit
//! endhash = "main"          # Last revision (inclusive), default: HEAD
//! gifpath = "history.gif"
//! first_parent = false      # Follow only the first parent of merges
//!
//! [render]
//! frame_width = 800         # Frame canvas, at least 100x100
//! frame_height = 600
//! page_width = 80           # Page cell in sheet layout, at least 10x10
//! page_height = 100
//! layout = "pages"          # "pages" (frame per page) or "sheet"
//! first_page = 1            # 1-based, inclusive
//! last_page = 3
//! background = "#ffffff"
//!
//! [animation]
//! delay_ms = 200
//! loop_count = 0            # 0 = forever
//! frames_dir = "frames"     # Also write every frame as PNG
//!
//! [build]
//! timeout_secs = 300        # Kill builds running longer than this
//!
//! [cache]
//! enabled = true
//! dir = ".pdflapse-cache"
//!
//! [processing]
//! max_processes = 4         # Parallel page renders (omit for auto = CPU cores)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::types::Layout;
use image::Rgba;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Config file picked up from the current directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "pdflapse.toml";

/// Smallest frame canvas edge.
pub const MIN_FRAME_EDGE: u32 = 100;

/// Smallest sheet cell edge.
pub const MIN_PAGE_EDGE: u32 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("missing required setting '{0}' (set it in pdflapse.toml or pass --{0})")]
    Missing(&'static str),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Run configuration loaded from `pdflapse.toml` and command-line flags.
///
/// Unknown keys are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Git checkout to walk.
    pub repository: Option<PathBuf>,
    /// Build directory relative to the repository root.
    pub subdirectory: PathBuf,
    /// Build command line.
    pub command: Option<String>,
    /// PDF produced by the build, relative to the build directory.
    pub pdfpath: Option<PathBuf>,
    pub starthash: Option<String>,
    pub endhash: Option<String>,
    /// Output animation.
    pub gifpath: PathBuf,
    pub first_parent: bool,
    pub render: RenderConfig,
    pub animation: AnimationConfig,
    pub build: BuildConfig,
    pub cache: CacheConfig,
    pub processing: ProcessingConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            repository: None,
            subdirectory: PathBuf::new(),
            command: None,
            pdfpath: None,
            starthash: None,
            endhash: None,
            gifpath: PathBuf::from("history.gif"),
            first_parent: false,
            render: RenderConfig::default(),
            animation: AnimationConfig::default(),
            build: BuildConfig::default(),
            cache: CacheConfig::default(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl RunConfig {
    /// Raise frame and page sizes to their minimums.
    pub fn clamp_sizes(&mut self) {
        let r = &mut self.render;
        let before = (r.frame_width, r.frame_height, r.page_width, r.page_height);
        r.frame_width = r.frame_width.max(MIN_FRAME_EDGE);
        r.frame_height = r.frame_height.max(MIN_FRAME_EDGE);
        r.page_width = r.page_width.max(MIN_PAGE_EDGE);
        r.page_height = r.page_height.max(MIN_PAGE_EDGE);
        if before != (r.frame_width, r.frame_height, r.page_width, r.page_height) {
            tracing::info!(
                frame = %format!("{}x{}", r.frame_width, r.frame_height),
                page = %format!("{}x{}", r.page_width, r.page_height),
                "raised render sizes to their minimums"
            );
        }
    }

    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(command) = &self.command
            && command.trim().is_empty()
        {
            return Err(ConfigError::Validation("command must not be empty".into()));
        }
        if self.subdirectory.is_absolute() {
            return Err(ConfigError::Validation(
                "subdirectory must be relative to the repository".into(),
            ));
        }
        if self.render.first_page == Some(0) || self.render.last_page == Some(0) {
            return Err(ConfigError::Validation(
                "render.first_page and render.last_page are 1-based".into(),
            ));
        }
        if let (Some(first), Some(last)) = (self.render.first_page, self.render.last_page)
            && first > last
        {
            return Err(ConfigError::Validation(format!(
                "render.first_page ({}) is after render.last_page ({})",
                first, last
            )));
        }
        parse_color(&self.render.background)?;
        if self.animation.delay_ms == 0 {
            return Err(ConfigError::Validation(
                "animation.delay_ms must be positive".into(),
            ));
        }
        if self.build.timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "build.timeout_secs must be positive".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Frame geometry and page selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    pub frame_width: u32,
    pub frame_height: u32,
    /// Page cell size in sheet layout.
    pub page_width: u32,
    pub page_height: u32,
    pub layout: Layout,
    /// First page to render (1-based, inclusive).
    pub first_page: Option<usize>,
    /// Last page to render (1-based, inclusive).
    pub last_page: Option<usize>,
    /// Letterbox colour, `#rrggbb` or `#rgb`.
    pub background: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frame_width: 800,
            frame_height: 600,
            page_width: 80,
            page_height: 100,
            layout: Layout::Pages,
            first_page: None,
            last_page: None,
            background: "#ffffff".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnimationConfig {
    pub delay_ms: u32,
    /// 0 loops forever.
    pub loop_count: u16,
    /// Directory to also write every frame to as PNG.
    pub frames_dir: Option<PathBuf>,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            delay_ms: crate::assemble::DEFAULT_DELAY_MS,
            loop_count: 0,
            frames_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Wall-clock limit per build. None waits forever.
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".pdflapse-cache"),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of pages rendered in parallel.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Parse `#rrggbb` or `#rgb` into an opaque colour.
pub fn parse_color(s: &str) -> Result<Rgba<u8>, ConfigError> {
    let invalid = || ConfigError::Validation(format!("invalid colour '{}', expected #rrggbb", s));
    let hex = s.strip_prefix('#').ok_or_else(invalid)?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let channel = |i: usize, len: usize| {
        u8::from_str_radix(&hex[i * len..(i + 1) * len], 16).map_err(|_| invalid())
    };
    match hex.len() {
        6 => Ok(Rgba([channel(0, 2)?, channel(1, 2)?, channel(2, 2)?, 255])),
        3 => {
            let short = |i| channel(i, 1).map(|v| v * 17);
            Ok(Rgba([short(0)?, short(1)?, short(2)?, 255]))
        }
        _ => Err(invalid()),
    }
}

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(RunConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge overlays in order onto a base value, then deserialize, clamp and
/// validate.
pub fn resolve_config(
    base: toml::Value,
    overlays: impl IntoIterator<Item = toml::Value>,
) -> Result<RunConfig, ConfigError> {
    let merged = overlays.into_iter().fold(base, merge_toml);
    let mut config: RunConfig = merged.try_into()?;
    config.clamp_sizes();
    config.validate()?;
    Ok(config)
}

/// Load the run config: stock defaults, then the config file, then `cli`.
///
/// `path` of `None` means [`DEFAULT_CONFIG_FILE`] if it exists; an explicit
/// path must exist.
pub fn load_config(
    path: Option<&Path>,
    cli: Option<toml::Value>,
) -> Result<RunConfig, ConfigError> {
    let file = match path {
        Some(p) => Some(load_raw_config(p)?.ok_or_else(|| ConfigError::NotFound(p.to_path_buf()))?),
        None => load_raw_config(Path::new(DEFAULT_CONFIG_FILE))?,
    };
    resolve_config(stock_defaults_value()?, file.into_iter().chain(cli))
}

/// Returns a fully-commented stock `pdflapse.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# pdflapse Configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Command-line flags override them.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# What to walk and how to build it
# ---------------------------------------------------------------------------
# Git checkout to walk. Every revision is force-checked-out and cleaned
# (git clean -ffdx), so use a dedicated clone, not your working copy.
# repository = "path/to/clone"

# Directory inside the repository the build command runs in.
subdirectory = ""

# Build command, run through the shell in the build directory.
# command = "latexmk -pdf paper.tex"

# PDF produced by the build, relative to the build directory.
# pdfpath = "paper.pdf"

# Revision range, both ends inclusive. Branch names, tags and hashes work.
# Defaults: the first commit, and HEAD.
# starthash = "v1.0"
# endhash = "main"

# Follow only the first parent of merge commits.
first_parent = false

# Output animation.
gifpath = "history.gif"

# ---------------------------------------------------------------------------
# Rendering
# ---------------------------------------------------------------------------
[render]
# Size of every frame. Pages are scaled to fit and centered. Minimum 100.
frame_width = 800
frame_height = 600

# Size of one page cell in the sheet layout. Minimum 10.
page_width = 80
page_height = 100

# "pages": one frame per page. "sheet": all pages of a revision tiled
# row-wise onto one frame.
layout = "pages"

# Render only a range of pages (1-based, inclusive).
# first_page = 1
# last_page = 1

# Colour around letterboxed pages.
background = "#ffffff"

# ---------------------------------------------------------------------------
# Animation
# ---------------------------------------------------------------------------
[animation]
# Time each frame is shown, in milliseconds.
delay_ms = 200

# Number of times to play the animation. 0 loops forever.
loop_count = 0

# Also write every frame as a PNG into this directory.
# frames_dir = "frames"

# ---------------------------------------------------------------------------
# Build
# ---------------------------------------------------------------------------
[build]
# Kill a build that runs longer than this many seconds; that revision is
# skipped. Omit to wait forever.
# timeout_secs = 300

# ---------------------------------------------------------------------------
# Render cache
# ---------------------------------------------------------------------------
[cache]
# Reuse frames of revisions rendered by an earlier run with the same
# settings. Makes interrupted runs resumable.
enabled = true
dir = ".pdflapse-cache"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum pages rendered in parallel.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
