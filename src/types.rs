use core::fmt;
use core::str::FromStr;

/// Pixel formats a decoder may hand back.
///
/// Only 8-bit planar 4:2:0 layouts are mutated; everything else is carried
/// through as [`PixelFormat::Other`] with its raw code so it can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PixelFormat {
    /// Three planes, chroma at half width and half height.
    Yuv420p,
    /// Full-range variant of [`PixelFormat::Yuv420p`], identical layout.
    Yuvj420p,
    /// Any format code this crate does not understand.
    Other(i32),
}

impl PixelFormat {
    /// Whether the layout is three independent 8-bit planes with 4:2:0 chroma.
    pub fn is_planar_420(&self) -> bool {
        matches!(self, Self::Yuv420p | Self::Yuvj420p)
    }

    /// Number of planes carrying pixel data, or zero for unsupported formats.
    pub fn plane_count(&self) -> usize {
        if self.is_planar_420() { 3 } else { 0 }
    }

    /// Logical dimensions of plane `index` for a frame of `size`.
    ///
    /// Chroma dimensions are floor(luma / 2). Returns `None` for planes the
    /// format does not have.
    pub fn plane_size(&self, index: usize, size: Size) -> Option<Size> {
        match (self.is_planar_420(), index) {
            (true, 0) => Some(size),
            (true, 1 | 2) => Some(Size {
                width: size.width / 2,
                height: size.height / 2,
            }),
            _ => None,
        }
    }

    /// Bytes occupied by one tightly packed frame (stride equals width).
    pub fn frame_len(&self, size: Size) -> usize {
        (0..self.plane_count())
            .filter_map(|i| self.plane_size(i, size))
            .map(|s| s.area())
            .sum()
    }
}

/// Pixel dimensions of a frame or plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Size { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Component-wise minimum, used to crop one frame onto another.
    pub fn min(self, other: Size) -> Size {
        Size {
            width: self.width.min(other.width),
            height: self.height.min(other.height),
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Error returned when parsing a `WIDTHxHEIGHT` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseSizeError;

impl fmt::Display for ParseSizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expected WIDTHxHEIGHT with non-zero dimensions")
    }
}

impl core::error::Error for ParseSizeError {}

impl FromStr for Size {
    type Err = ParseSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or(ParseSizeError)?;
        let width = w.trim().parse().map_err(|_| ParseSizeError)?;
        let height = h.trim().parse().map_err(|_| ParseSizeError)?;
        let size = Size { width, height };
        if size.is_empty() {
            return Err(ParseSizeError);
        }
        Ok(size)
    }
}

/// An axis-aligned box centered in a frame, sized as a fraction of the
/// frame's width and height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenteredBox {
    pub width_fraction: f32,
    pub height_fraction: f32,
}

/// Pixel rectangle produced by resolving a [`CenteredBox`] against a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl CenteredBox {
    pub const fn new(width_fraction: f32, height_fraction: f32) -> Self {
        CenteredBox {
            width_fraction,
            height_fraction,
        }
    }

    /// Resolve to pixels. The result always lies inside `size`; fractions
    /// outside `[0, 1]` (or NaN) are clamped.
    pub fn resolve(&self, size: Size) -> Rect {
        let frame_w = size.width as usize;
        let frame_h = size.height as usize;
        let width = scale(frame_w, self.width_fraction);
        let height = scale(frame_h, self.height_fraction);
        Rect {
            x: (frame_w - width) / 2,
            y: (frame_h - height) / 2,
            width,
            height,
        }
    }
}

fn scale(extent: usize, fraction: f32) -> usize {
    let fraction = if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    };
    ((extent as f32 * fraction) as usize).min(extent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chroma_planes_are_floor_half() {
        let size = Size::new(65, 33);
        let chroma = PixelFormat::Yuv420p.plane_size(1, size).unwrap();
        assert_eq!(chroma, Size::new(32, 16));
        assert_eq!(PixelFormat::Yuv420p.plane_size(3, size), None);
        assert_eq!(PixelFormat::Other(23).plane_size(0, size), None);
    }

    #[test]
    fn frame_len_matches_packed_layout() {
        let size = Size::new(480, 360);
        assert_eq!(PixelFormat::Yuv420p.frame_len(size), 480 * 360 * 3 / 2);
        assert_eq!(PixelFormat::Other(2).frame_len(size), 0);
    }

    #[test]
    fn parses_sizes() {
        assert_eq!("480x360".parse::<Size>(), Ok(Size::new(480, 360)));
        assert_eq!(" 64X32 ".parse::<Size>(), Ok(Size::new(64, 32)));
        assert_eq!("0x10".parse::<Size>(), Err(ParseSizeError));
        assert_eq!("wide".parse::<Size>(), Err(ParseSizeError));
    }

    #[test]
    fn centered_box_stays_inside_frame() {
        let rect = CenteredBox::new(0.5, 0.25).resolve(Size::new(64, 64));
        assert_eq!(
            rect,
            Rect {
                x: 16,
                y: 24,
                width: 32,
                height: 16
            }
        );

        let clamped = CenteredBox::new(3.0, f32::NAN).resolve(Size::new(10, 10));
        assert_eq!(clamped.width, 10);
        assert_eq!(clamped.height, 0);
        assert_eq!(clamped.x, 0);
    }
}
