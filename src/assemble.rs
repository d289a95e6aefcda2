//! Frame assembly: the last stage, turning the frame sequence into a GIF.
//!
//! An empty sequence is an error of its own ([`AssembleError::EmptySequence`])
//! and the encoder is never called for it, so a run in which every revision
//! failed leaves no output file behind.
//!
//! [`GifFileEncoder`] encodes in memory, writes `<path>.partial` and renames
//! it into place, so the target path either holds a complete GIF or is left
//! untouched.

use crate::frame::FrameSequence;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame as GifFrame};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default per-frame delay.
pub const DEFAULT_DELAY_MS: u32 = 200;

/// GIF encoder speed (1 = best quality, 30 = fastest).
const GIF_SPEED: i32 = 10;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("GIF encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("frame {index} is {actual:?}, expected {expected:?}")]
    SizeMismatch {
        index: usize,
        expected: (u32, u32),
        actual: (u32, u32),
    },
}

#[derive(Error, Debug)]
pub enum AssembleError {
    #[error("no frames to encode: every revision in the range was skipped")]
    EmptySequence,
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeOptions {
    pub delay_ms: u32,
    /// Times to play the animation; 0 loops forever.
    pub loop_count: u16,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            delay_ms: DEFAULT_DELAY_MS,
            loop_count: 0,
        }
    }
}

/// Encodes an ordered, non-empty frame sequence into an animation.
pub trait AnimationEncoder {
    fn encode(&mut self, frames: FrameSequence, options: &EncodeOptions) -> Result<(), EncodeError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembleSummary {
    pub frames: usize,
    /// Distinct revisions that contributed frames.
    pub revisions: usize,
    pub dimensions: (u32, u32),
}

/// Hand `frames` to `encoder` in key order.
pub fn assemble(
    frames: FrameSequence,
    encoder: &mut dyn AnimationEncoder,
    options: &EncodeOptions,
) -> Result<AssembleSummary, AssembleError> {
    let Some(first) = frames.iter().next() else {
        return Err(AssembleError::EmptySequence);
    };
    let summary = AssembleSummary {
        frames: frames.len(),
        revisions: frames
            .keys()
            .iter()
            .map(|k| k.revision_index)
            .collect::<BTreeSet<_>>()
            .len(),
        dimensions: first.image().dimensions(),
    };
    tracing::info!(frames = summary.frames, revisions = summary.revisions, "encoding animation");
    encoder.encode(frames, options)?;
    Ok(summary)
}

/// Writes an animated GIF file.
pub struct GifFileEncoder {
    path: PathBuf,
}

impl GifFileEncoder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn partial_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".partial");
        PathBuf::from(name)
    }
}

/// Encode `frames` as GIF bytes.
fn encode_gif(frames: FrameSequence, options: &EncodeOptions) -> Result<Vec<u8>, EncodeError> {
    let mut expected = None;
    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new_with_speed(&mut bytes, GIF_SPEED);
        encoder.set_repeat(match options.loop_count {
            0 => Repeat::Infinite,
            n => Repeat::Finite(n),
        })?;
        let delay = Delay::from_numer_denom_ms(options.delay_ms, 1);
        for (index, frame) in frames.into_frames().into_iter().enumerate() {
            let actual = frame.image().dimensions();
            match expected {
                None => expected = Some(actual),
                Some(e) if e != actual => {
                    return Err(EncodeError::SizeMismatch {
                        index,
                        expected: e,
                        actual,
                    });
                }
                Some(_) => {}
            }
            encoder.encode_frame(GifFrame::from_parts(frame.into_image(), 0, 0, delay))?;
        }
    }
    Ok(bytes)
}

/// Create the parent directory of `path` if it has one.
fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

impl AnimationEncoder for GifFileEncoder {
    fn encode(
        &mut self,
        frames: FrameSequence,
        options: &EncodeOptions,
    ) -> Result<(), EncodeError> {
        let bytes = encode_gif(frames, options)?;
        ensure_parent_dir(&self.path)?;
        let partial = self.partial_path();
        std::fs::write(&partial, &bytes)?;
        if let Err(e) = std::fs::rename(&partial, &self.path) {
            let _ = std::fs::remove_file(&partial);
            return Err(e.into());
        }
        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "wrote GIF");
        Ok(())
    }
}
