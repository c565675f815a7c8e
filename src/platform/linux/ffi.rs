//! The slices of the libavcodec and libva ABIs the entry points touch.
//!
//! Only the leading fields of `AVFrame` are declared. The struct is never
//! constructed or sized by us, only read through a pointer the decoder owns.

#![allow(non_camel_case_types)]

use std::ffi::{c_int, c_uint, c_void};

use crate::types::PixelFormat;

pub const AV_NUM_DATA_POINTERS: usize = 8;

pub const AV_PIX_FMT_YUV420P: c_int = 0;
pub const AV_PIX_FMT_YUVJ420P: c_int = 12;

const fn fferrtag(a: u8, b: u8, c: u8, d: u8) -> c_int {
    (a as c_int) | (b as c_int) << 8 | (c as c_int) << 16 | (d as c_int) << 24
}

/// Generic "external library failed" code.
pub const AVERROR_EXTERNAL: c_int = -fferrtag(b'E', b'X', b'T', b' ');

#[repr(C)]
pub struct AVCodecContext {
    _private: [u8; 0],
}

#[repr(C)]
pub struct AVPacket {
    _private: [u8; 0],
}

/// Leading fields of libavutil's `AVFrame`, in declaration order.
#[repr(C)]
pub struct AVFrame {
    pub data: [*mut u8; AV_NUM_DATA_POINTERS],
    pub linesize: [c_int; AV_NUM_DATA_POINTERS],
    pub extended_data: *mut *mut u8,
    pub width: c_int,
    pub height: c_int,
    pub nb_samples: c_int,
    pub format: c_int,
}

pub fn pixel_format(code: c_int) -> PixelFormat {
    match code {
        AV_PIX_FMT_YUV420P => PixelFormat::Yuv420p,
        AV_PIX_FMT_YUVJ420P => PixelFormat::Yuvj420p,
        other => PixelFormat::Other(other),
    }
}

pub type VADisplay = *mut c_void;
pub type VAStatus = c_int;
pub type VAGenericID = c_uint;
pub type VABufferID = VAGenericID;
pub type VAContextID = VAGenericID;
pub type VAConfigID = VAGenericID;
pub type VASurfaceID = VAGenericID;
pub type VABufferType = c_int;

pub const VA_STATUS_SUCCESS: VAStatus = 0x0000_0000;
pub const VA_STATUS_ERROR_UNIMPLEMENTED: VAStatus = 0x0000_0014;

pub type SendPacketFn = unsafe extern "C" fn(*mut AVCodecContext, *const AVPacket) -> c_int;
pub type ReceiveFrameFn = unsafe extern "C" fn(*mut AVCodecContext, *mut AVFrame) -> c_int;

pub type RenderPictureFn =
    unsafe extern "C" fn(VADisplay, VAContextID, *mut VABufferID, c_int) -> VAStatus;
pub type CreateContextFn = unsafe extern "C" fn(
    VADisplay,
    VAConfigID,
    c_int,
    c_int,
    c_int,
    *mut VASurfaceID,
    c_int,
    *mut VAContextID,
) -> VAStatus;

pub type BufferInfoFn = unsafe extern "C" fn(
    VADisplay,
    VAContextID,
    VABufferID,
    *mut VABufferType,
    *mut c_uint,
    *mut c_uint,
) -> VAStatus;
pub type MapBufferFn = unsafe extern "C" fn(VADisplay, VABufferID, *mut *mut c_void) -> VAStatus;
pub type UnmapBufferFn = unsafe extern "C" fn(VADisplay, VABufferID) -> VAStatus;
