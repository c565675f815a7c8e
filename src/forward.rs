//! Lazy resolution of shadowed entry points and pass-through forwarding.
//!
//! Each [`InterceptedSymbol`] resolves its original implementation at most
//! once per instance. Concurrent first callers race on a [`OnceLock`], so
//! exactly one lookup runs and every caller sees the same outcome. A failed
//! lookup is sticky.

use std::ffi::{CStr, c_void};
use std::fmt;
use std::mem;
use std::ptr::NonNull;
use std::sync::OnceLock;

use crate::error::Error;
use crate::session::{Hook, Session};

/// Looks up the address of a named entry point.
pub trait SymbolResolver {
    fn resolve(&self, name: &CStr) -> Option<NonNull<c_void>>;
}

impl<T> SymbolResolver for T
where
    T: Fn(&CStr) -> Option<NonNull<c_void>>,
{
    fn resolve(&self, name: &CStr) -> Option<NonNull<c_void>> {
        self(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    Unresolved,
    Resolved,
    ResolutionFailed,
}

/// One foreign entry point and its cached original implementation.
pub struct InterceptedSymbol<F> {
    name: &'static CStr,
    slot: OnceLock<Option<F>>,
}

impl<F> InterceptedSymbol<F> {
    pub fn state(&self) -> ResolutionState {
        match self.slot.get() {
            None => ResolutionState::Unresolved,
            Some(Some(_)) => ResolutionState::Resolved,
            Some(None) => ResolutionState::ResolutionFailed,
        }
    }
}

impl<F: Copy> InterceptedSymbol<F> {
    /// # Safety
    ///
    /// `F` must be an `extern "C"` function pointer type whose signature
    /// matches the C declaration of `name`.
    pub const unsafe fn new(name: &'static CStr) -> Self {
        InterceptedSymbol {
            name,
            slot: OnceLock::new(),
        }
    }

    /// Resolve on first use and return the cached implementation.
    pub fn resolve<R: SymbolResolver + ?Sized>(&self, resolver: &R) -> Result<F, Error> {
        const { assert!(mem::size_of::<F>() == mem::size_of::<*mut c_void>()) };

        let cached = self.slot.get_or_init(|| {
            let symbol = self.name.to_string_lossy();
            match resolver.resolve(self.name) {
                Some(address) => {
                    tracing::debug!(%symbol, ?address, "resolved original implementation");
                    // SAFETY: `new` requires `F` to be a function pointer with
                    // the symbol's signature; the size check above holds.
                    Some(unsafe { mem::transmute_copy::<*mut c_void, F>(&address.as_ptr()) })
                }
                None => {
                    tracing::error!(%symbol, "original implementation not found; calls will fail");
                    None
                }
            }
        });
        cached.ok_or(Error::Resolution { symbol: self.name })
    }

    /// Count the call against `hook`, then hand the original implementation
    /// to `call`. Returns `failure` without calling anything if resolution
    /// failed.
    pub fn forward<R, T>(
        &self,
        session: &Session,
        hook: Hook,
        resolver: &R,
        failure: T,
        call: impl FnOnce(F) -> T,
    ) -> T
    where
        R: SymbolResolver + ?Sized,
    {
        session.record_call(hook);
        match self.resolve(resolver) {
            Ok(original) => call(original),
            Err(_) => failure,
        }
    }
}

impl<F> fmt::Debug for InterceptedSymbol<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptedSymbol")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::config::Config;

    type AnswerFn = extern "C" fn(i32) -> i32;

    extern "C" fn double(x: i32) -> i32 {
        x * 2
    }

    fn address_of(f: AnswerFn) -> NonNull<c_void> {
        NonNull::new(f as *mut c_void).unwrap()
    }

    #[test]
    fn concurrent_first_calls_resolve_once() {
        // SAFETY: AnswerFn matches `double`.
        let symbol: InterceptedSymbol<AnswerFn> = unsafe { InterceptedSymbol::new(c"double") };
        let lookups = AtomicUsize::new(0);
        let resolver = |_: &CStr| {
            lookups.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            Some(address_of(double))
        };

        let threads = 16;
        let barrier = Barrier::new(threads);
        let seen: Vec<usize> = thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        symbol.resolve(&resolver).unwrap() as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(lookups.load(Ordering::SeqCst), 1);
        assert!(seen.iter().all(|&addr| addr == double as AnswerFn as usize));
        assert_eq!(symbol.state(), ResolutionState::Resolved);
    }

    #[test]
    fn forwards_arguments_and_result_unchanged() {
        let session = Session::new(Config::default());
        // SAFETY: AnswerFn matches `double`.
        let symbol: InterceptedSymbol<AnswerFn> = unsafe { InterceptedSymbol::new(c"double") };
        let resolver = |_: &CStr| Some(address_of(double));

        let result = symbol.forward(&session, Hook::SendPacket, &resolver, -1, |f| f(21));
        assert_eq!(result, 42);
        assert_eq!(session.calls(Hook::SendPacket), 1);
    }

    #[test]
    fn failure_is_sticky_and_reported_with_sentinel() {
        let session = Session::new(Config::default());
        // SAFETY: AnswerFn matches the (absent) symbol.
        let symbol: InterceptedSymbol<AnswerFn> = unsafe { InterceptedSymbol::new(c"missing") };
        assert_eq!(symbol.state(), ResolutionState::Unresolved);

        let none = |_: &CStr| -> Option<NonNull<c_void>> { None };
        let called = AtomicUsize::new(0);
        let result = symbol.forward(&session, Hook::RenderPicture, &none, -99, |f| {
            called.fetch_add(1, Ordering::SeqCst);
            f(1)
        });
        assert_eq!(result, -99);
        assert_eq!(symbol.state(), ResolutionState::ResolutionFailed);

        // A resolver that would now succeed is never consulted.
        let late = |_: &CStr| Some(address_of(double));
        let result = symbol.forward(&session, Hook::RenderPicture, &late, -99, |f| f(1));
        assert_eq!(result, -99);
        assert!(matches!(
            symbol.resolve(&late),
            Err(Error::Resolution { symbol }) if symbol == c"missing"
        ));
        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert_eq!(session.calls(Hook::RenderPicture), 2);
    }
}
