//! Preloadable interposer for decoder and VA-API entry points.
//!
//! Loaded with `LD_PRELOAD`, the shared object shadows
//! `avcodec_send_packet`, `avcodec_receive_frame`, `vaRenderPicture` and
//! `vaCreateContext`. Each call is forwarded unchanged to the real
//! implementation; decoded planar frames can be overwritten on the way out,
//! and driver buffers are classified and previewed on the way in.
//!
//! The frame model in [`frame`] and [`types`] is `core`-only.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod frame;
pub mod types;

#[cfg(feature = "std")]
pub mod config;
#[cfg(feature = "std")]
pub mod error;
#[cfg(feature = "std")]
pub mod forward;
#[cfg(feature = "std")]
pub mod inspect;
#[cfg(feature = "std")]
pub mod platform;
#[cfg(feature = "std")]
pub mod replacement;
#[cfg(feature = "std")]
pub mod session;

// Re-exports
pub use frame::*;
pub use types::*;

#[cfg(feature = "std")]
pub use config::{Config, SubstitutionMode};
#[cfg(feature = "std")]
pub use error::*;
#[cfg(feature = "std")]
pub use forward::{InterceptedSymbol, ResolutionState, SymbolResolver};
#[cfg(feature = "std")]
pub use inspect::{BufferCategory, BufferClassifier, BufferMapper, MappedBuffer};
#[cfg(feature = "std")]
pub use replacement::ReplacementSequence;
#[cfg(feature = "std")]
pub use session::{FrameOutcome, Hook, Report, Session};
