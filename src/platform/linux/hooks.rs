//! Exported entry points that shadow libavcodec and libva.
//!
//! Every hook forwards to the next definition in the lookup chain with its
//! arguments untouched and returns the original status. Instrumentation runs
//! inside [`guarded`], so a panic there never crosses the C boundary.

#![allow(non_snake_case)]

use std::ffi::{c_int, c_uint, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::slice;

use super::ffi::{
    self, AVCodecContext, AVERROR_EXTERNAL, AVFrame, AVPacket, BufferInfoFn, CreateContextFn,
    MapBufferFn, ReceiveFrameFn, RenderPictureFn, SendPacketFn, UnmapBufferFn, VA_STATUS_SUCCESS,
    VA_STATUS_ERROR_UNIMPLEMENTED, VABufferID, VAConfigID, VAContextID, VADisplay, VASurfaceID,
};
use super::{Global, NextInChain, session};
use crate::error::BufferAccessError;
use crate::forward::{InterceptedSymbol, SymbolResolver};
use crate::frame::PixelBuffer;
use crate::inspect::{BufferInfo, BufferMapper, inspect_batch};
use crate::session::{FrameOutcome, Hook, Session};

// SAFETY (all statics below): each function pointer type is declared in
// `ffi` to match the C prototype of the named symbol.
static SEND_PACKET: InterceptedSymbol<SendPacketFn> =
    unsafe { InterceptedSymbol::new(Hook::SendPacket.symbol()) };
static RECEIVE_FRAME: InterceptedSymbol<ReceiveFrameFn> =
    unsafe { InterceptedSymbol::new(Hook::ReceiveFrame.symbol()) };
static RENDER_PICTURE: InterceptedSymbol<RenderPictureFn> =
    unsafe { InterceptedSymbol::new(Hook::RenderPicture.symbol()) };
static CREATE_CONTEXT: InterceptedSymbol<CreateContextFn> =
    unsafe { InterceptedSymbol::new(Hook::CreateContext.symbol()) };

static BUFFER_INFO: InterceptedSymbol<BufferInfoFn> =
    unsafe { InterceptedSymbol::new(c"vaBufferInfo") };
static MAP_BUFFER: InterceptedSymbol<MapBufferFn> =
    unsafe { InterceptedSymbol::new(c"vaMapBuffer") };
static UNMAP_BUFFER: InterceptedSymbol<UnmapBufferFn> =
    unsafe { InterceptedSymbol::new(c"vaUnmapBuffer") };

/// Run instrumentation, absorbing any panic.
fn guarded<R>(hook: Hook, f: impl FnOnce() -> R) -> Option<R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::error!(
                symbol = %hook.symbol().to_string_lossy(),
                "instrumentation panicked; call passed through"
            );
            None
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn avcodec_send_packet(
    avctx: *mut AVCodecContext,
    avpkt: *const AVPacket,
) -> c_int {
    // SAFETY: arguments are the caller's.
    unsafe { send_packet(session(), &SEND_PACKET, &NextInChain, avctx, avpkt) }
}

/// # Safety
///
/// Arguments must satisfy `avcodec_send_packet`'s contract.
pub(crate) unsafe fn send_packet<R: SymbolResolver + ?Sized>(
    session: &Session,
    symbol: &InterceptedSymbol<SendPacketFn>,
    resolver: &R,
    avctx: *mut AVCodecContext,
    avpkt: *const AVPacket,
) -> c_int {
    symbol.forward(session, Hook::SendPacket, resolver, AVERROR_EXTERNAL, |original| {
        guarded(Hook::SendPacket, || {
            tracing::trace!(
                packet = session.calls(Hook::SendPacket),
                flush = avpkt.is_null(),
                "packet submitted"
            )
        });
        // SAFETY: arguments are passed through unchanged.
        unsafe { original(avctx, avpkt) }
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn avcodec_receive_frame(
    avctx: *mut AVCodecContext,
    frame: *mut AVFrame,
) -> c_int {
    // SAFETY: arguments are the caller's.
    unsafe { receive_frame(session(), &RECEIVE_FRAME, &NextInChain, avctx, frame) }
}

/// Forward, then instrument the frame only when the decoder reports one.
///
/// # Safety
///
/// Arguments must satisfy `avcodec_receive_frame`'s contract.
pub(crate) unsafe fn receive_frame<R: SymbolResolver + ?Sized>(
    session: &Session,
    symbol: &InterceptedSymbol<ReceiveFrameFn>,
    resolver: &R,
    avctx: *mut AVCodecContext,
    frame: *mut AVFrame,
) -> c_int {
    let status = symbol.forward(
        session,
        Hook::ReceiveFrame,
        resolver,
        AVERROR_EXTERNAL,
        // SAFETY: arguments are passed through unchanged.
        |original| unsafe { original(avctx, frame) },
    );
    if status == 0 && !frame.is_null() {
        // SAFETY: status 0 means the decoder just populated `frame`.
        guarded(Hook::ReceiveFrame, || unsafe { on_decoded(session, frame) });
    }
    status
}

/// Count and optionally rewrite a frame the decoder has just returned.
///
/// # Safety
///
/// `frame` must point to a populated `AVFrame` whose plane pointers and line
/// sizes describe writable memory, not otherwise accessed until this returns.
pub(crate) unsafe fn on_decoded(session: &Session, frame: *mut AVFrame) -> FrameOutcome {
    let index = session.record_decoded();
    // SAFETY: readable per the caller's contract; fields are copied out.
    let (data, linesize, width, height, format) = unsafe {
        let f = &*frame;
        (f.data, f.linesize, f.width, f.height, f.format)
    };
    // SAFETY: the decoder owns these planes for the duration of this call.
    let mut buffer = unsafe {
        PixelBuffer::from_raw_parts(ffi::pixel_format(format), width, height, &data, &linesize)
    };
    let outcome = session.process_frame(&mut buffer, index);
    tracing::debug!(frame = index + 1, width, height, format, ?outcome, "decoded frame");
    outcome
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn vaRenderPicture(
    dpy: VADisplay,
    context: VAContextID,
    buffers: *mut VABufferID,
    num_buffers: c_int,
) -> ffi::VAStatus {
    let driver = VaDriver { display: dpy, context };
    // SAFETY: arguments are the caller's.
    unsafe {
        render_picture(
            session(),
            &RENDER_PICTURE,
            &NextInChain,
            &driver,
            (dpy, context, buffers, num_buffers),
        )
    }
}

/// Inspect the submitted buffers, then forward.
///
/// # Safety
///
/// Arguments must satisfy `vaRenderPicture`'s contract.
pub(crate) unsafe fn render_picture<R, M>(
    session: &Session,
    symbol: &InterceptedSymbol<RenderPictureFn>,
    resolver: &R,
    mapper: &M,
    (dpy, context, buffers, num_buffers): (VADisplay, VAContextID, *mut VABufferID, c_int),
) -> ffi::VAStatus
where
    R: SymbolResolver + ?Sized,
    M: BufferMapper<Id = VABufferID> + ?Sized,
{
    guarded(Hook::RenderPicture, || {
        // SAFETY: the caller passes `num_buffers` ids at `buffers`.
        unsafe { inspect_submission(session, mapper, buffers, num_buffers) }
    });
    symbol.forward(
        session,
        Hook::RenderPicture,
        resolver,
        VA_STATUS_ERROR_UNIMPLEMENTED,
        // SAFETY: arguments are passed through unchanged.
        |original| unsafe { original(dpy, context, buffers, num_buffers) },
    )
}

/// Inspect every buffer of one render submission and tally the outcome.
///
/// # Safety
///
/// When `ids` is non-null it must point to `count` readable buffer ids.
pub(crate) unsafe fn inspect_submission<M: BufferMapper + ?Sized>(
    session: &Session,
    mapper: &M,
    ids: *const M::Id,
    count: c_int,
) {
    let ids: &[M::Id] = match usize::try_from(count) {
        // SAFETY: forwarded from the caller's contract.
        Ok(len) if len > 0 && !ids.is_null() => unsafe { slice::from_raw_parts(ids, len) },
        _ => &[],
    };
    tracing::debug!(buffers = ids.len(), "render submission");
    let report = inspect_batch(mapper, session.classifier(), ids);
    session.record_batch(ids.len(), &report);
}

/// Arguments of `vaCreateContext`, in declaration order.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CreateContextArgs {
    pub dpy: VADisplay,
    pub config_id: VAConfigID,
    pub picture_width: c_int,
    pub picture_height: c_int,
    pub flag: c_int,
    pub render_targets: *mut VASurfaceID,
    pub num_render_targets: c_int,
    pub context: *mut VAContextID,
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn vaCreateContext(
    dpy: VADisplay,
    config_id: VAConfigID,
    picture_width: c_int,
    picture_height: c_int,
    flag: c_int,
    render_targets: *mut VASurfaceID,
    num_render_targets: c_int,
    context: *mut VAContextID,
) -> ffi::VAStatus {
    let args = CreateContextArgs {
        dpy,
        config_id,
        picture_width,
        picture_height,
        flag,
        render_targets,
        num_render_targets,
        context,
    };
    // SAFETY: arguments are the caller's.
    unsafe { create_context(session(), &CREATE_CONTEXT, &NextInChain, args) }
}

/// Forward, then log the created context.
///
/// # Safety
///
/// Arguments must satisfy `vaCreateContext`'s contract.
pub(crate) unsafe fn create_context<R: SymbolResolver + ?Sized>(
    session: &Session,
    symbol: &InterceptedSymbol<CreateContextFn>,
    resolver: &R,
    args: CreateContextArgs,
) -> ffi::VAStatus {
    let status = symbol.forward(
        session,
        Hook::CreateContext,
        resolver,
        VA_STATUS_ERROR_UNIMPLEMENTED,
        |original| {
            // SAFETY: arguments are passed through unchanged.
            unsafe {
                original(
                    args.dpy,
                    args.config_id,
                    args.picture_width,
                    args.picture_height,
                    args.flag,
                    args.render_targets,
                    args.num_render_targets,
                    args.context,
                )
            }
        },
    );
    guarded(Hook::CreateContext, || {
        if status == VA_STATUS_SUCCESS && !args.context.is_null() {
            // SAFETY: on success the driver has written the new id.
            let id = unsafe { *args.context };
            tracing::info!(
                width = args.picture_width,
                height = args.picture_height,
                context = id,
                "decode context created"
            );
        } else {
            tracing::debug!(status, "decode context creation failed");
        }
    });
    status
}

/// libva buffer access for one display and context, resolved lazily from
/// whatever libva the host has loaded.
struct VaDriver {
    display: VADisplay,
    context: VAContextID,
}

// SAFETY: libva guarantees a successfully mapped buffer is readable for its
// reported size until `vaUnmapBuffer`.
unsafe impl BufferMapper for VaDriver {
    type Id = VABufferID;

    fn buffer_info(&self, id: VABufferID) -> Result<BufferInfo, BufferAccessError> {
        let info = BUFFER_INFO
            .resolve(&Global)
            .map_err(|_| BufferAccessError::Unavailable)?;
        let (mut type_tag, mut size, mut elements): (ffi::VABufferType, c_uint, c_uint) = (0, 0, 0);
        // SAFETY: out-pointers reference live locals.
        let status = unsafe {
            info(self.display, self.context, id, &mut type_tag, &mut size, &mut elements)
        };
        if status != VA_STATUS_SUCCESS {
            return Err(BufferAccessError::Info { status });
        }
        Ok(BufferInfo {
            type_tag,
            size: (size as usize).saturating_mul(elements as usize),
        })
    }

    fn map(&self, id: VABufferID) -> Result<*const u8, BufferAccessError> {
        let map = MAP_BUFFER
            .resolve(&Global)
            .map_err(|_| BufferAccessError::Unavailable)?;
        let mut data: *mut c_void = ptr::null_mut();
        // SAFETY: `data` is a live out-pointer.
        let status = unsafe { map(self.display, id, &mut data) };
        if status != VA_STATUS_SUCCESS {
            return Err(BufferAccessError::Map { status });
        }
        Ok(data.cast_const().cast())
    }

    fn unmap(&self, id: VABufferID) {
        let Ok(unmap) = UNMAP_BUFFER.resolve(&Global) else {
            return;
        };
        // SAFETY: `id` was mapped by `map` on this display.
        let status = unsafe { unmap(self.display, id) };
        if status != VA_STATUS_SUCCESS {
            tracing::warn!(buffer = id, status, "unmap failed");
        }
    }
}
