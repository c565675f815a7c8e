//! Process-wide counters and the attach/detach lifecycle.
//!
//! A [`Session`] is created at attach, shared by every intercepted call, and
//! reports exactly once at detach. Counters are atomics; the replacement
//! sequence sits behind an `RwLock` that only detach ever takes for writing.

use core::fmt;
use std::ffi::CStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::config::{Config, SubstitutionMode};
use crate::error::Error;
use crate::frame::{CopyOp, FrameOp, PixelBuffer};
use crate::inspect::{BatchReport, BufferClassifier};
use crate::replacement::ReplacementSequence;

/// The intercepted entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    SendPacket,
    ReceiveFrame,
    RenderPicture,
    CreateContext,
}

impl Hook {
    pub const ALL: [Hook; 4] = [
        Hook::SendPacket,
        Hook::ReceiveFrame,
        Hook::RenderPicture,
        Hook::CreateContext,
    ];

    /// Exported symbol name of the entry point.
    pub const fn symbol(self) -> &'static CStr {
        match self {
            Self::SendPacket => c"avcodec_send_packet",
            Self::ReceiveFrame => c"avcodec_receive_frame",
            Self::RenderPicture => c"vaRenderPicture",
            Self::CreateContext => c"vaCreateContext",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// What was done to a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Untouched,
    Filled,
    Replaced,
}

/// Counter snapshot, logged at detach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Report {
    pub calls: [u64; Hook::ALL.len()],
    pub frames_decoded: u64,
    pub frames_mutated: u64,
    pub buffers_seen: u64,
    pub buffers_inspected: u64,
    pub buffers_skipped: u64,
}

impl Report {
    pub fn calls(&self, hook: Hook) -> u64 {
        self.calls[hook.index()]
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "packets: {}", self.calls(Hook::SendPacket))?;
        writeln!(
            f,
            "frames: {} decoded of {} receive calls",
            self.frames_decoded,
            self.calls(Hook::ReceiveFrame)
        )?;
        writeln!(f, "frames mutated: {}", self.frames_mutated)?;
        writeln!(f, "render calls: {}", self.calls(Hook::RenderPicture))?;
        writeln!(
            f,
            "buffers: {} seen, {} inspected, {} skipped",
            self.buffers_seen, self.buffers_inspected, self.buffers_skipped
        )?;
        write!(f, "contexts created: {}", self.calls(Hook::CreateContext))
    }
}

#[derive(Debug)]
pub struct Session {
    config: Config,
    mode: SubstitutionMode,
    classifier: BufferClassifier,
    replacement: RwLock<ReplacementSequence>,
    calls: [AtomicU64; Hook::ALL.len()],
    frames_decoded: AtomicU64,
    frames_mutated: AtomicU64,
    buffers_seen: AtomicU64,
    buffers_inspected: AtomicU64,
    buffers_skipped: AtomicU64,
    detached: AtomicBool,
}

impl Session {
    /// A session with zeroed counters and nothing loaded.
    pub fn new(config: Config) -> Self {
        Session {
            mode: config.mode,
            replacement: RwLock::new(ReplacementSequence::empty(config.source_size)),
            config,
            classifier: BufferClassifier::default(),
            calls: Default::default(),
            frames_decoded: AtomicU64::new(0),
            frames_mutated: AtomicU64::new(0),
            buffers_seen: AtomicU64::new(0),
            buffers_inspected: AtomicU64::new(0),
            buffers_skipped: AtomicU64::new(0),
            detached: AtomicBool::new(false),
        }
    }

    /// Start a session, loading the replacement sequence when substitution
    /// is enabled. A missing or unreadable source degrades to plain fills.
    pub fn attach(config: Config) -> Self {
        let mut session = Session::new(config);
        if session.mode == SubstitutionMode::Replace {
            match session.load_replacement() {
                Ok(frames) => tracing::info!(frames, "replacement frames loaded"),
                Err(error) => {
                    tracing::warn!(%error, "replacement unavailable, falling back to fill");
                    session.mode = SubstitutionMode::Fill;
                }
            }
        }
        tracing::info!(mode = ?session.mode, "session attached");
        session
    }

    fn load_replacement(&mut self) -> Result<usize, Error> {
        let path = self.config.source.clone().ok_or_else(|| Error::InvalidConfig {
            key: crate::config::SOURCE_ENV,
            value: String::new(),
        })?;
        let replacement = self
            .replacement
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        replacement.load(&path)?;
        tracing::debug!(
            path = %path.display(),
            size = %replacement.size(),
            frame_len = replacement.frame_len(),
            "read replacement source"
        );
        Ok(replacement.frame_count())
    }

    /// Install an already loaded sequence and switch to replacement mode.
    pub fn with_replacement(mut self, replacement: ReplacementSequence) -> Self {
        *self
            .replacement
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner) = replacement;
        self.mode = SubstitutionMode::Replace;
        self
    }

    /// Substitution mode in effect after attach-time fallbacks.
    pub fn mode(&self) -> SubstitutionMode {
        self.mode
    }

    pub fn classifier(&self) -> &BufferClassifier {
        &self.classifier
    }

    pub fn record_call(&self, hook: Hook) -> u64 {
        self.calls[hook.index()].fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn calls(&self, hook: Hook) -> u64 {
        self.calls[hook.index()].load(Ordering::Relaxed)
    }

    /// Count a successfully decoded frame and return its zero-based index.
    pub fn record_decoded(&self) -> u64 {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed)
    }

    /// Apply the configured substitution to decoded frame number `index`.
    ///
    /// Frames that fail the write preconditions are left as they are.
    pub fn process_frame(&self, frame: &mut PixelBuffer<'_>, index: u64) -> FrameOutcome {
        let result = match self.mode {
            SubstitutionMode::Off => return FrameOutcome::Untouched,
            SubstitutionMode::Fill => frame
                .apply(&FrameOp::Fill(self.config.fill))
                .map(|()| FrameOutcome::Filled),
            SubstitutionMode::Replace => self.replace(frame, index),
        };
        match result {
            Ok(outcome) => {
                self.frames_mutated.fetch_add(1, Ordering::Relaxed);
                outcome
            }
            Err(reason) => {
                tracing::debug!(frame = index, %reason, "frame left untouched");
                FrameOutcome::Untouched
            }
        }
    }

    fn replace(
        &self,
        frame: &mut PixelBuffer<'_>,
        index: u64,
    ) -> Result<FrameOutcome, crate::frame::PreconditionNotMet> {
        frame.apply(&FrameOp::Fill(self.config.fill))?;
        let replacement = self
            .replacement
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(source) = usize::try_from(index)
            .ok()
            .and_then(|i| replacement.frame_at(i))
        else {
            return Ok(FrameOutcome::Filled);
        };
        frame.apply(&FrameOp::Copy(CopyOp { source: &source }))?;
        Ok(FrameOutcome::Replaced)
    }

    /// Fold one render submission into the counters.
    pub fn record_batch<Id>(&self, submitted: usize, report: &BatchReport<Id>) {
        self.buffers_seen
            .fetch_add(submitted as u64, Ordering::Relaxed);
        self.buffers_inspected
            .fetch_add(report.inspected.len() as u64, Ordering::Relaxed);
        self.buffers_skipped
            .fetch_add(report.skipped.len() as u64, Ordering::Relaxed);
    }

    pub fn report(&self) -> Report {
        Report {
            calls: Hook::ALL.map(|hook| self.calls(hook)),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_mutated: self.frames_mutated.load(Ordering::Relaxed),
            buffers_seen: self.buffers_seen.load(Ordering::Relaxed),
            buffers_inspected: self.buffers_inspected.load(Ordering::Relaxed),
            buffers_skipped: self.buffers_skipped.load(Ordering::Relaxed),
        }
    }

    /// Release the replacement store and return the final counters. Only the
    /// first call returns a report; writing it out is left to the caller,
    /// which may be running after thread-local storage is gone.
    pub fn detach(&self) -> Option<Report> {
        if self.detached.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.replacement
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .release();
        Some(self.report())
    }
}
