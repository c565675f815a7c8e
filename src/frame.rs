//! Borrowed planar pixel buffers and the write primitives that operate on
//! them.
//!
//! Frames handed to us by a decoder are only valid for the duration of the
//! intercepted call, so every type here carries the lifetime of that borrow.
//! All writes are clipped against the destination's own width, height and
//! row stride; padding bytes past the logical row width are never touched.

use core::fmt;
use core::slice::{Chunks, ChunksMut};

use arrayvec::ArrayVec;

use crate::types::{CenteredBox, PixelFormat, Rect, Size};

/// Upper bound on planes per frame, mirroring decoder frame layouts.
pub const MAX_PLANES: usize = 8;

/// A single read-only plane of image data.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    pub bytes_per_row: usize,
}

impl<'a> Plane<'a> {
    /// Row slices, each `bytes_per_row` long (the last may be shorter).
    pub fn rows(&self) -> Chunks<'a, u8> {
        let data: &'a [u8] = if self.bytes_per_row == 0 { &[] } else { self.data };
        data.chunks(self.bytes_per_row.max(1))
    }
}

/// A single writable plane of image data owned by someone else.
#[derive(Debug)]
pub struct PlaneMut<'a> {
    pub data: &'a mut [u8],
    pub bytes_per_row: usize,
}

impl PlaneMut<'_> {
    pub fn as_plane(&self) -> Plane<'_> {
        Plane {
            data: self.data,
            bytes_per_row: self.bytes_per_row,
        }
    }

    fn rows_mut(&mut self) -> ChunksMut<'_, u8> {
        let stride = self.bytes_per_row.max(1);
        let data: &mut [u8] = if self.bytes_per_row == 0 {
            &mut []
        } else {
            &mut *self.data
        };
        data.chunks_mut(stride)
    }
}

/// Read access to a planar frame.
pub trait Frame {
    fn pixel_format(&self) -> PixelFormat;
    fn size(&self) -> Size;
    /// Plane `index`, or `None` when the frame does not expose it.
    fn plane(&self, index: usize) -> Option<Plane<'_>>;
}

/// Why a frame was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum PreconditionNotMet {
    /// Plane 0 is null or its stride cannot hold a full row.
    MissingLumaPlane,
    /// Width or height is zero (or was negative at the ABI).
    EmptyGeometry,
    UnsupportedFormat(PixelFormat),
}

impl fmt::Display for PreconditionNotMet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLumaPlane => f.write_str("luma plane missing or unusable"),
            Self::EmptyGeometry => f.write_str("frame has no pixels"),
            Self::UnsupportedFormat(pf) => write!(f, "unsupported pixel format {pf:?}"),
        }
    }
}

impl core::error::Error for PreconditionNotMet {}

/// A second luma value written inside a centered box after the base fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Highlight {
    pub region: CenteredBox,
    pub luma: u8,
}

/// Flat fill of every plane's logical region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillOp {
    pub luma: u8,
    pub chroma: u8,
    pub highlight: Option<Highlight>,
}

impl FillOp {
    pub const fn new(luma: u8, chroma: u8) -> Self {
        FillOp {
            luma,
            chroma,
            highlight: None,
        }
    }

    pub const fn with_highlight(mut self, region: CenteredBox, luma: u8) -> Self {
        self.highlight = Some(Highlight { region, luma });
        self
    }
}

/// Plane-by-plane copy from another frame, cropped to the smaller of the two.
#[derive(Clone, Copy)]
pub struct CopyOp<'s> {
    pub source: &'s dyn Frame,
}

impl fmt::Debug for CopyOp<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyOp")
            .field("format", &self.source.pixel_format())
            .field("size", &self.source.size())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FrameOp<'s> {
    Fill(FillOp),
    Copy(CopyOp<'s>),
}

/// A read-only frame over memory we own or borrow, e.g. one slot of a
/// replacement sequence.
#[derive(Debug, Clone)]
pub struct FrameView<'a> {
    planes: ArrayVec<Plane<'a>, MAX_PLANES>,
    pixel_format: PixelFormat,
    size: Size,
}

impl<'a> FrameView<'a> {
    pub fn new(
        pixel_format: PixelFormat,
        size: Size,
        planes: impl IntoIterator<Item = Plane<'a>>,
    ) -> Self {
        FrameView {
            planes: planes.into_iter().take(MAX_PLANES).collect(),
            pixel_format,
            size,
        }
    }

    pub fn planes(&self) -> &[Plane<'a>] {
        &self.planes
    }
}

impl Frame for FrameView<'_> {
    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn size(&self) -> Size {
        self.size
    }

    fn plane(&self, index: usize) -> Option<Plane<'_>> {
        self.planes.get(index).copied()
    }
}

/// A decoded frame borrowed from its owner for the duration of one call.
///
/// Unused or invalid planes are `None`. The buffer never outlives `'a`, so it
/// cannot be retained past the intercepted call that produced it.
#[derive(Debug)]
pub struct PixelBuffer<'a> {
    planes: ArrayVec<Option<PlaneMut<'a>>, MAX_PLANES>,
    pixel_format: PixelFormat,
    size: Size,
}

impl<'a> PixelBuffer<'a> {
    pub fn new(
        pixel_format: PixelFormat,
        size: Size,
        planes: impl IntoIterator<Item = Option<PlaneMut<'a>>>,
    ) -> Self {
        PixelBuffer {
            planes: planes.into_iter().take(MAX_PLANES).collect(),
            pixel_format,
            size,
        }
    }

    /// Build a buffer from decoder-style pointer and line-size arrays.
    ///
    /// Negative dimensions collapse to zero. A plane is dropped when its
    /// pointer is null, its line size is not positive, or its line size is
    /// smaller than the plane's logical row width.
    ///
    /// # Safety
    ///
    /// For every plane the format defines, a non-null `data[i]` must point to
    /// at least `linesize[i] * plane_rows` bytes that are writable and not
    /// aliased for the lifetime `'a`.
    pub unsafe fn from_raw_parts(
        pixel_format: PixelFormat,
        width: i32,
        height: i32,
        data: &[*mut u8],
        linesize: &[i32],
    ) -> Self {
        let size = Size {
            width: u32::try_from(width).unwrap_or(0),
            height: u32::try_from(height).unwrap_or(0),
        };
        let planes = data
            .iter()
            .zip(linesize)
            .enumerate()
            .take(MAX_PLANES)
            // SAFETY: forwarded from the caller's contract.
            .map(|(i, (&ptr, &stride))| unsafe { raw_plane(pixel_format, size, i, ptr, stride) });
        PixelBuffer::new(pixel_format, size, planes)
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Whether the buffer satisfies the preconditions for any write.
    pub fn check_ready(&self) -> Result<(), PreconditionNotMet> {
        if !self.pixel_format.is_planar_420() {
            return Err(PreconditionNotMet::UnsupportedFormat(self.pixel_format));
        }
        if self.size.is_empty() {
            return Err(PreconditionNotMet::EmptyGeometry);
        }
        if self.planes.first().and_then(Option::as_ref).is_none() {
            return Err(PreconditionNotMet::MissingLumaPlane);
        }
        Ok(())
    }

    pub fn apply(&mut self, op: &FrameOp<'_>) -> Result<(), PreconditionNotMet> {
        match op {
            FrameOp::Fill(fill) => self.fill(fill),
            FrameOp::Copy(copy) => self.copy_from(copy.source),
        }
    }

    /// Write `op.luma` over the luma region and `op.chroma` over both chroma
    /// regions, then the optional highlight box.
    pub fn fill(&mut self, op: &FillOp) -> Result<(), PreconditionNotMet> {
        self.check_ready()?;
        let (format, size) = (self.pixel_format, self.size);

        for (index, slot) in self.planes.iter_mut().enumerate() {
            let (Some(plane), Some(dims)) = (slot.as_mut(), format.plane_size(index, size)) else {
                continue;
            };
            let value = if index == 0 { op.luma } else { op.chroma };
            fill_rect(plane, whole(dims), value);
        }

        if let Some(highlight) = op.highlight
            && let Some(Some(luma)) = self.planes.first_mut()
        {
            fill_rect(luma, highlight.region.resolve(size), highlight.luma);
        }
        Ok(())
    }

    /// Copy `source` over this buffer plane by plane.
    ///
    /// Each plane is cropped to the smaller of the two frames. Chroma planes
    /// are copied only when both sides expose them.
    pub fn copy_from(&mut self, source: &dyn Frame) -> Result<(), PreconditionNotMet> {
        self.check_ready()?;
        let src_format = source.pixel_format();
        if !src_format.is_planar_420() {
            return Err(PreconditionNotMet::UnsupportedFormat(src_format));
        }
        if source.plane(0).is_none() {
            return Err(PreconditionNotMet::MissingLumaPlane);
        }
        let (format, size, src_size) = (self.pixel_format, self.size, source.size());

        for (index, slot) in self.planes.iter_mut().enumerate() {
            let Some(plane) = slot.as_mut() else {
                continue;
            };
            let (Some(dst_dims), Some(src_dims), Some(src_plane)) = (
                format.plane_size(index, size),
                src_format.plane_size(index, src_size),
                source.plane(index),
            ) else {
                continue;
            };
            copy_plane(plane, src_plane, dst_dims.min(src_dims));
        }
        Ok(())
    }
}

impl Frame for PixelBuffer<'_> {
    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn size(&self) -> Size {
        self.size
    }

    fn plane(&self, index: usize) -> Option<Plane<'_>> {
        self.planes.get(index)?.as_ref().map(|p| p.as_plane())
    }
}

unsafe fn raw_plane<'a>(
    format: PixelFormat,
    size: Size,
    index: usize,
    ptr: *mut u8,
    linesize: i32,
) -> Option<PlaneMut<'a>> {
    let dims = format.plane_size(index, size)?;
    if ptr.is_null() {
        return None;
    }
    let stride = usize::try_from(linesize)
        .ok()
        .filter(|&s| s > 0 && s >= dims.width as usize)?;
    let len = stride
        .checked_mul(dims.height as usize)
        .filter(|&len| len <= isize::MAX as usize)?;
    // SAFETY: the caller guarantees `ptr` covers `linesize * rows` writable
    // bytes for 'a.
    let data = unsafe { core::slice::from_raw_parts_mut(ptr, len) };
    Some(PlaneMut {
        data,
        bytes_per_row: stride,
    })
}

fn whole(size: Size) -> Rect {
    Rect {
        x: 0,
        y: 0,
        width: size.width as usize,
        height: size.height as usize,
    }
}

fn fill_rect(plane: &mut PlaneMut<'_>, rect: Rect, value: u8) {
    let end = rect.x.saturating_add(rect.width).min(plane.bytes_per_row);
    if rect.x >= end {
        return;
    }
    for row in plane.rows_mut().skip(rect.y).take(rect.height) {
        let end = end.min(row.len());
        if rect.x < end {
            row[rect.x..end].fill(value);
        }
    }
}

fn copy_plane(dst: &mut PlaneMut<'_>, src: Plane<'_>, extent: Size) {
    let width = extent.width as usize;
    for (d, s) in dst
        .rows_mut()
        .zip(src.rows())
        .take(extent.height as usize)
    {
        let n = width.min(d.len()).min(s.len());
        d[..n].copy_from_slice(&s[..n]);
    }
}
