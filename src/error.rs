use core::fmt;
use std::ffi::CStr;
use std::io;

/// Failure to bring up the replacement frame source.
#[derive(Debug)]
#[non_exhaustive]
pub enum LoadError {
    SourceUnavailable(io::Error),
    AllocationFailure { bytes: usize },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceUnavailable(e) => write!(f, "replacement source unavailable: {e}"),
            Self::AllocationFailure { bytes } => {
                write!(f, "could not allocate {bytes} bytes for replacement frames")
            }
        }
    }
}

impl core::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::SourceUnavailable(e) => Some(e),
            Self::AllocationFailure { .. } => None,
        }
    }
}

impl From<io::Error> for LoadError {
    fn from(e: io::Error) -> Self {
        Self::SourceUnavailable(e)
    }
}

/// Failure to read one opaque driver buffer. Only that buffer is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum BufferAccessError {
    /// Type/size query returned a non-success status.
    Info { status: i32 },
    /// Mapping returned a non-success status.
    Map { status: i32 },
    /// The driver entry points needed for inspection could not be resolved.
    Unavailable,
}

impl fmt::Display for BufferAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info { status } => write!(f, "could not get buffer info (status {status})"),
            Self::Map { status } => write!(f, "could not map buffer (status {status})"),
            Self::Unavailable => f.write_str("buffer mapping entry points unavailable"),
        }
    }
}

impl core::error::Error for BufferAccessError {}

/// Top-level crate error.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The original implementation of an intercepted symbol was not found.
    Resolution { symbol: &'static CStr },
    Load(LoadError),
    InvalidConfig { key: &'static str, value: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolution { symbol } => {
                write!(f, "could not resolve original {}", symbol.to_string_lossy())
            }
            Self::Load(e) => write!(f, "load error: {e}"),
            Self::InvalidConfig { key, value } => write!(f, "invalid value {value:?} for {key}"),
        }
    }
}

impl core::error::Error for Error {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Load(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LoadError> for Error {
    fn from(e: LoadError) -> Self {
        Self::Load(e)
    }
}
