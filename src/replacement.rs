//! An in-memory cyclic sequence of raw planar frames.
//!
//! The backing store is a headerless concatenation of tightly packed 4:2:0
//! frames at one fixed resolution. It is read once, never written again, and
//! handed out as read-only [`FrameView`]s, so concurrent readers need no lock.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::LoadError;
use crate::frame::{FrameView, Plane};
use crate::types::{PixelFormat, Size};

#[derive(Debug)]
pub struct ReplacementSequence {
    data: Vec<u8>,
    size: Size,
    pixel_format: PixelFormat,
    frame_len: usize,
    frame_count: usize,
}

impl ReplacementSequence {
    /// An empty sequence for frames of `size`; every lookup returns `None`.
    pub const fn empty(size: Size) -> Self {
        ReplacementSequence {
            data: Vec::new(),
            size,
            pixel_format: PixelFormat::Yuv420p,
            frame_len: 0,
            frame_count: 0,
        }
    }

    /// Build a sequence from bytes already in memory. A trailing partial
    /// frame is dropped.
    pub fn from_bytes(mut data: Vec<u8>, size: Size) -> Self {
        let pixel_format = PixelFormat::Yuv420p;
        let frame_len = pixel_format.frame_len(size);
        let frame_count = data.len().checked_div(frame_len).unwrap_or(0);
        data.truncate(frame_len * frame_count);
        ReplacementSequence {
            data,
            size,
            pixel_format,
            frame_len,
            frame_count,
        }
    }

    /// Replace the contents with the file at `path`.
    ///
    /// On failure the sequence is left empty.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let result = File::open(path.as_ref()).map_err(LoadError::from).and_then(|file| {
            let hint = file.metadata().map(|m| m.len() as usize).unwrap_or(0);
            read_all(file, hint)
        });
        self.finish_load(result)
    }

    /// Replace the contents with everything `reader` yields.
    ///
    /// On failure the sequence is left empty.
    pub fn load_from(&mut self, reader: impl Read) -> Result<(), LoadError> {
        let result = read_all(reader, 0);
        self.finish_load(result)
    }

    fn finish_load(&mut self, result: Result<Vec<u8>, LoadError>) -> Result<(), LoadError> {
        match result {
            Ok(data) => {
                *self = Self::from_bytes(data, self.size);
                Ok(())
            }
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }

    /// Frame `index` modulo the frame count, or `None` while empty.
    pub fn frame_at(&self, index: usize) -> Option<FrameView<'_>> {
        if self.frame_count == 0 {
            return None;
        }
        let start = (index % self.frame_count) * self.frame_len;
        let mut frame = &self.data[start..start + self.frame_len];

        let planes = (0..self.pixel_format.plane_count()).filter_map(|i| {
            let dims = self.pixel_format.plane_size(i, self.size)?;
            let (plane, rest) = frame.split_at(dims.area());
            frame = rest;
            Some(Plane {
                data: plane,
                bytes_per_row: dims.width as usize,
            })
        });
        Some(FrameView::new(self.pixel_format, self.size, planes))
    }

    /// Drop the backing store. Later lookups return `None`.
    pub fn release(&mut self) {
        self.data = Vec::new();
        self.frame_count = 0;
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count == 0
    }
}

fn read_all(mut reader: impl Read, hint: usize) -> Result<Vec<u8>, LoadError> {
    let mut data = Vec::new();
    data.try_reserve_exact(hint)
        .map_err(|_| LoadError::AllocationFailure { bytes: hint })?;
    reader.read_to_end(&mut data)?;
    Ok(data)
}
