//! Frames and the ordered sequence they are collected into.

use crate::types::{FrameKey, RevisionId};
use image::RgbaImage;
use std::io;
use std::path::{Path, PathBuf};

/// One rendered page of one revision. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    key: FrameKey,
    revision: RevisionId,
    image: RgbaImage,
}

impl Frame {
    pub fn new(key: FrameKey, revision: RevisionId, image: RgbaImage) -> Self {
        Self {
            key,
            revision,
            image,
        }
    }

    pub fn key(&self) -> FrameKey {
        self.key
    }

    pub fn revision(&self) -> &RevisionId {
        &self.revision
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// `<revision_index>-<page_index>-<short hash>.png`
    pub fn file_name(&self) -> String {
        format!(
            "{:03}-{:03}-{}.png",
            self.key.revision_index,
            self.key.page_index,
            self.revision.short()
        )
    }
}

/// Frames ordered by [`FrameKey`].
///
/// Insertion keeps the order regardless of the order frames arrive in, so
/// the sequence is always ready to encode. Frames with equal keys keep
/// their insertion order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FrameSequence {
    frames: Vec<Frame>,
}

impl FrameSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) {
        let at = self.frames.partition_point(|f| f.key <= frame.key);
        self.frames.insert(at, frame);
    }

    pub fn extend(&mut self, frames: impl IntoIterator<Item = Frame>) {
        for frame in frames {
            self.push(frame);
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    pub fn keys(&self) -> Vec<FrameKey> {
        self.frames.iter().map(|f| f.key).collect()
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}

/// Write every frame as a PNG into `dir`. Returns the written paths in
/// sequence order.
pub fn write_frame_pngs(frames: &FrameSequence, dir: &Path) -> io::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    frames
        .iter()
        .map(|frame| {
            let path = dir.join(frame.file_name());
            frame
                .image
                .save_with_format(&path, image::ImageFormat::Png)
                .map_err(io::Error::other)?;
            Ok(path)
        })
        .collect()
}
