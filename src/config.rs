//! Environment-driven configuration, read once at attach.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Error;
use crate::frame::FillOp;
use crate::types::{CenteredBox, Size};

pub const MODE_ENV: &str = "DECODE_TAP_MODE";
pub const LUMA_ENV: &str = "DECODE_TAP_LUMA";
pub const CHROMA_ENV: &str = "DECODE_TAP_CHROMA";
pub const BOX_ENV: &str = "DECODE_TAP_BOX";
pub const BOX_LUMA_ENV: &str = "DECODE_TAP_BOX_LUMA";
pub const SOURCE_ENV: &str = "DECODE_TAP_SOURCE";
pub const SOURCE_SIZE_ENV: &str = "DECODE_TAP_SOURCE_SIZE";
/// `tracing` filter directives for the preload layer's own subscriber.
pub const LOG_ENV: &str = "DECODE_TAP_LOG";

const DEFAULT_SOURCE_SIZE: Size = Size::new(480, 360);
const DEFAULT_BOX_LUMA: u8 = 235;

/// What happens to each decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubstitutionMode {
    /// Observe and count only.
    Off,
    /// Overwrite with a flat fill.
    #[default]
    Fill,
    /// Fill, then copy the next frame of the replacement sequence on top.
    Replace,
}

impl FromStr for SubstitutionMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "0" => Ok(Self::Off),
            "fill" => Ok(Self::Fill),
            "replace" => Ok(Self::Replace),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub mode: SubstitutionMode,
    pub fill: FillOp,
    /// Raw planar 4:2:0 file used by [`SubstitutionMode::Replace`].
    pub source: Option<PathBuf>,
    pub source_size: Size,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: SubstitutionMode::default(),
            fill: FillOp::new(255, 128),
            source: None,
            source_size: DEFAULT_SOURCE_SIZE,
        }
    }
}

impl Config {
    /// Read the process environment. Each invalid value is logged and falls
    /// back on its own; the rest of the configuration is kept.
    pub fn from_env() -> Self {
        let (config, errors) = Self::from_lookup_lossy(|key| std::env::var(key).ok());
        for error in &errors {
            tracing::warn!(%error, "ignoring configuration value");
        }
        config
    }

    /// Build a configuration from an arbitrary key lookup. Unset keys take
    /// their defaults; the first set but invalid key is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let (config, errors) = Self::from_lookup_lossy(lookup);
        match errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(config),
        }
    }

    /// Like [`from_lookup`](Self::from_lookup), but an invalid key only
    /// resets that key. An unreadable mode means [`SubstitutionMode::Off`],
    /// so a typo never turns observation into mutation.
    pub fn from_lookup_lossy(lookup: impl Fn(&str) -> Option<String>) -> (Self, Vec<Error>) {
        let mut config = Config::default();
        let mut errors = Vec::new();

        if let Some(mode) = lookup(MODE_ENV) {
            let parsed = mode
                .parse::<SubstitutionMode>()
                .map_err(|()| invalid(MODE_ENV, &mode));
            config.mode = keep(&mut errors, parsed).unwrap_or(SubstitutionMode::Off);
        }
        if let Some(luma) = lookup(LUMA_ENV)
            && let Some(luma) = keep(&mut errors, parse_byte(LUMA_ENV, &luma))
        {
            config.fill.luma = luma;
        }
        if let Some(chroma) = lookup(CHROMA_ENV)
            && let Some(chroma) = keep(&mut errors, parse_byte(CHROMA_ENV, &chroma))
        {
            config.fill.chroma = chroma;
        }
        if let Some(raw) = lookup(BOX_ENV)
            && let Some(region) = keep(
                &mut errors,
                parse_box(&raw).ok_or_else(|| invalid(BOX_ENV, &raw)),
            )
        {
            let luma = match lookup(BOX_LUMA_ENV) {
                Some(luma) => keep(&mut errors, parse_byte(BOX_LUMA_ENV, &luma))
                    .unwrap_or(DEFAULT_BOX_LUMA),
                None => DEFAULT_BOX_LUMA,
            };
            config.fill = config.fill.with_highlight(region, luma);
        }
        if let Some(source) = lookup(SOURCE_ENV).filter(|s| !s.trim().is_empty()) {
            config.source = Some(PathBuf::from(source));
        }
        if let Some(size) = lookup(SOURCE_SIZE_ENV)
            && let Some(size) = keep(
                &mut errors,
                size.parse::<Size>().map_err(|_| invalid(SOURCE_SIZE_ENV, &size)),
            )
        {
            config.source_size = size;
        }
        (config, errors)
    }
}

fn keep<T>(errors: &mut Vec<Error>, result: Result<T, Error>) -> Option<T> {
    result.map_err(|error| errors.push(error)).ok()
}

fn invalid(key: &'static str, value: &str) -> Error {
    Error::InvalidConfig {
        key,
        value: value.to_owned(),
    }
}

fn parse_byte(key: &'static str, value: &str) -> Result<u8, Error> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

/// `W,H` fractions, or a single fraction for both, each in (0, 1].
fn parse_box(value: &str) -> Option<CenteredBox> {
    let fraction = |s: &str| {
        s.trim()
            .parse::<f32>()
            .ok()
            .filter(|f| *f > 0.0 && *f <= 1.0)
    };
    match value.split_once(',') {
        Some((w, h)) => Some(CenteredBox::new(fraction(w)?, fraction(h)?)),
        None => {
            let both = fraction(value)?;
            Some(CenteredBox::new(both, both))
        }
    }
}
