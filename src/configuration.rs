//! Conversion configuration.
//!
//! [`ConversionOptions`] is a builder that threads cancellation, throttling
//! and output settings through the conversion pipelines without polluting
//! every function signature. The progress sink is not part of the options;
//! it is passed to each job invocation.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use dicomconvert::{CancellationToken, ConversionOptions, ListFrameSource};
//!
//! let token = CancellationToken::new();
//! let options = ConversionOptions::new()
//!     .with_cancellation(token.clone())
//!     .with_frame_interval(Duration::ZERO)
//!     .with_jpeg_quality(85)
//!     .with_list_frame_source(ListFrameSource::EachFile);
//! assert_eq!(options.jpeg_quality(), 85);
//! ```

use std::time::Duration;

use crate::progress::CancellationToken;

/// Default pause after each processed frame.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(1);

/// Default JPEG quality for extracted still frames.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Default bound on how long [`JobController::stop`](crate::JobController::stop)
/// waits for the worker to exit.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Which file a list-based AVI assembly opens for each list item.
///
/// The default re-opens the **first** file of the list for every item,
/// which yields a video of identical frames. `EachFile` opens `list[i]`
/// for item `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListFrameSource {
    /// Open `list[0]` for every item.
    #[default]
    FirstFile,
    /// Open `list[i]` for item `i`.
    EachFile,
}

/// Configuration for conversion operations.
///
/// All fields have defaults: no cancellation token, a 1 ms pause between
/// frames, JPEG quality 90, [`ListFrameSource::FirstFile`] and a 30 second
/// stop timeout.
#[derive(Debug, Clone)]
pub struct ConversionOptions {
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) frame_interval: Duration,
    pub(crate) jpeg_quality: u8,
    pub(crate) list_frame_source: ListFrameSource,
    pub(crate) stop_timeout: Duration,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionOptions {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self {
            cancellation: None,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            list_frame_source: ListFrameSource::default(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Attach a cancellation token.
    ///
    /// When the token is cancelled the conversion loop stops at the next
    /// frame boundary and returns [`ConvertError::Cancelled`](crate::ConvertError::Cancelled).
    /// A [`JobController`](crate::JobController) installs its own token for
    /// every job it starts.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Set the pause inserted after every frame. `Duration::ZERO` disables it.
    #[must_use]
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Set the JPEG quality for extracted frames. Clamped to `1..=100`.
    #[must_use]
    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Choose which file the list-based AVI pipeline opens per item.
    #[must_use]
    pub fn with_list_frame_source(mut self, source: ListFrameSource) -> Self {
        self.list_frame_source = source;
        self
    }

    /// Bound how long a controller's `stop` waits for the worker.
    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// The configured JPEG quality.
    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    /// The configured pause between frames.
    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// The configured list-mode file choice.
    pub fn list_frame_source(&self) -> ListFrameSource {
        self.list_frame_source
    }

    /// The configured stop timeout.
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// Returns `true` if cancellation has been requested.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }

    /// Sleep for the configured frame interval, if any.
    pub(crate) fn throttle(&self) {
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }
    }
}
