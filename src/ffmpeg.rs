//! FFmpeg library setup for the AVI backend.
//!
//! FFmpeg prints to stderr through its own logger, independent of the `log`
//! crate. [`init_ffmpeg`] initializes the libraries once per process and
//! applies the configured verbosity; the CLI exposes it as
//! `--ffmpeg-log-level`.

use std::str::FromStr;
use std::sync::OnceLock;

use ffmpeg_next::util::log::Level;

use crate::error::ConvertError;

/// FFmpeg console verbosity, quietest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FfmpegLogLevel {
    /// No output.
    Quiet,
    /// Unrecoverable errors only.
    Fatal,
    /// Recoverable errors.
    #[default]
    Error,
    /// Warnings.
    Warning,
    /// Informational messages.
    Info,
    /// Debugging output.
    Debug,
}

impl From<FfmpegLogLevel> for Level {
    fn from(level: FfmpegLogLevel) -> Self {
        match level {
            FfmpegLogLevel::Quiet => Level::Quiet,
            FfmpegLogLevel::Fatal => Level::Fatal,
            FfmpegLogLevel::Error => Level::Error,
            FfmpegLogLevel::Warning => Level::Warning,
            FfmpegLogLevel::Info => Level::Info,
            FfmpegLogLevel::Debug => Level::Debug,
        }
    }
}

impl FromStr for FfmpegLogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "quiet" => Ok(Self::Quiet),
            "fatal" => Ok(Self::Fatal),
            "error" => Ok(Self::Error),
            "warning" | "warn" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(format!(
                "unknown FFmpeg log level '{other}' (expected quiet, fatal, error, warning, info or debug)"
            )),
        }
    }
}

static INITIALIZED: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize FFmpeg once for this process.
///
/// Subsequent calls return the first result without re-initializing.
pub fn init_ffmpeg() -> Result<(), ConvertError> {
    INITIALIZED
        .get_or_init(|| {
            log::debug!("Initializing FFmpeg");
            ffmpeg_next::init().map_err(|error| error.to_string())
        })
        .clone()
        .map_err(ConvertError::FfmpegError)
}

/// Set FFmpeg's console verbosity.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.into());
}
