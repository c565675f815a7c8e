//! `LD_PRELOAD` integration.
//!
//! The shared object registers [`attach`] and [`detach`] in `.init_array` and
//! `.fini_array`. Hooks that fire before the loader runs our constructor
//! still get a session, created on first use.

use std::ffi::{CStr, c_void};
use std::io::{self, IsTerminal, Write};
use std::panic;
use std::ptr::NonNull;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::EnvFilter;

use crate::config::{self, Config};
use crate::forward::SymbolResolver;
use crate::session::{Report, Session};

pub mod ffi;
pub mod hooks;

static SESSION: OnceLock<Session> = OnceLock::new();
static DETACHED: AtomicBool = AtomicBool::new(false);

/// The next definition after this object in the loader's search order.
#[derive(Debug, Clone, Copy, Default)]
pub struct NextInChain;

impl SymbolResolver for NextInChain {
    fn resolve(&self, name: &CStr) -> Option<NonNull<c_void>> {
        // SAFETY: `name` is NUL-terminated; RTLD_NEXT is a valid pseudo-handle.
        NonNull::new(unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) })
    }
}

/// The first definition in the global scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct Global;

impl SymbolResolver for Global {
    fn resolve(&self, name: &CStr) -> Option<NonNull<c_void>> {
        // SAFETY: `name` is NUL-terminated; RTLD_DEFAULT is a valid pseudo-handle.
        NonNull::new(unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) })
    }
}

/// The process-wide session, attaching on first use.
pub fn session() -> &'static Session {
    SESSION.get_or_init(|| Session::attach(Config::from_env()))
}

/// Install logging and start the session.
pub fn attach() -> &'static Session {
    init_logging();
    tracing::info!(
        pid = std::process::id(),
        process = %process_name(),
        "decode-tap attached, intercepting avcodec_send_packet, avcodec_receive_frame, vaRenderPicture, vaCreateContext"
    );
    session()
}

/// Report and release the session. Only the first call returns a report.
///
/// Runs from `.fini_array`, after thread-local destructors, so the report is
/// written straight to stderr instead of through `tracing`.
pub fn detach() -> Option<Report> {
    if DETACHED.swap(true, Ordering::AcqRel) {
        return None;
    }
    let report = match SESSION.get() {
        Some(session) => session.detach()?,
        None => Report::default(),
    };
    let _ = writeln!(io::stderr().lock(), "decode-tap detached\n{report}");
    Some(report)
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(config::LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    // A host that already installed a global subscriber keeps it.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .try_init();
}

fn process_name() -> String {
    std::fs::read_to_string("/proc/self/comm")
        .map(|name| name.trim_end().to_owned())
        .unwrap_or_else(|_| String::from("unknown"))
}

extern "C" fn on_load() {
    let _ = panic::catch_unwind(attach);
}

extern "C" fn on_unload() {
    let _ = panic::catch_unwind(detach);
}

#[cfg(not(test))]
#[used]
#[unsafe(link_section = ".init_array")]
static ON_LOAD: extern "C" fn() = on_load;

#[cfg(not(test))]
#[used]
#[unsafe(link_section = ".fini_array")]
static ON_UNLOAD: extern "C" fn() = on_unload;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_in_chain_finds_libc_and_misses_absent_symbols() {
        assert!(Global.resolve(c"malloc").is_some());
        assert!(NextInChain.resolve(c"decode_tap_definitely_absent").is_none());
    }

    #[test]
    fn detach_reports_only_once() {
        assert!(detach().is_some());
        assert!(detach().is_none());
        assert!(detach().is_none());
    }

    #[test]
    fn process_name_is_read() {
        assert!(!process_name().is_empty());
    }

    #[test]
    fn unresolvable_originals_return_abi_sentinels() {
        // No libavcodec or libva is loaded into the test binary.
        let status = unsafe { hooks::avcodec_send_packet(std::ptr::null_mut(), std::ptr::null()) };
        assert_eq!(status, ffi::AVERROR_EXTERNAL);

        let status = unsafe {
            hooks::vaRenderPicture(std::ptr::null_mut(), 0, std::ptr::null_mut(), 0)
        };
        assert_eq!(status, ffi::VA_STATUS_ERROR_UNIMPLEMENTED);

        let session = session();
        assert!(session.calls(crate::session::Hook::SendPacket) >= 1);
        assert!(session.calls(crate::session::Hook::RenderPicture) >= 1);
    }
}
