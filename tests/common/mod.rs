//! In-memory sources, sinks and progress recorders shared by the
//! integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dicomconvert::{
    ConvertError, DicomSource, PixelContainerElement, ProgressCallback, ProgressEvent,
    SourceOpener, VideoGeometry, VideoSink, VideoSinkFactory,
};
use image::{DynamicImage, GrayImage, Luma, RgbImage};

// ── Sources ────────────────────────────────────────────────────────

/// A fake dataset. Frame `i` renders as a grayscale image whose pixel in
/// row `y` has the value `shade + i + y`.
#[derive(Debug, Clone)]
pub struct MockSource {
    pub attributes: HashMap<String, String>,
    pub transfer_syntax: String,
    pub shade: u8,
    pub failing_frames: HashSet<u32>,
    pub panicking_frame: Option<u32>,
    pub render_size: Option<(u32, u32)>,
    pub render_delay: Duration,
    pub raw_frames: Vec<Vec<u8>>,
    pub replaced: Option<PixelContainerElement>,
}

impl MockSource {
    pub fn new(frames: u32, columns: u32, rows: u32) -> Self {
        let attributes = [
            ("NumberOfFrames", frames.to_string()),
            ("Columns", columns.to_string()),
            ("Rows", rows.to_string()),
            ("BitsAllocated", "8".to_string()),
            ("SOPInstanceUID", "1.2.826.0.1.3680043.2.1125.1".to_string()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();

        Self {
            attributes,
            transfer_syntax: "1.2.840.10008.1.2.1".to_string(),
            shade: 0,
            failing_frames: HashSet::new(),
            panicking_frame: None,
            render_size: None,
            render_delay: Duration::ZERO,
            raw_frames: (0..frames).map(|index| vec![index as u8; 4]).collect(),
            replaced: None,
        }
    }

    pub fn with_shade(mut self, shade: u8) -> Self {
        self.shade = shade;
        self
    }

    pub fn failing_on(mut self, frame: u32) -> Self {
        self.failing_frames.insert(frame);
        self
    }

    pub fn panicking_on(mut self, frame: u32) -> Self {
        self.panicking_frame = Some(frame);
        self
    }

    pub fn rendering_at(mut self, width: u32, height: u32) -> Self {
        self.render_size = Some((width, height));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    pub fn with_attribute(mut self, keyword: &str, value: &str) -> Self {
        self.attributes.insert(keyword.to_string(), value.to_string());
        self
    }

    pub fn without_attribute(mut self, keyword: &str) -> Self {
        self.attributes.remove(keyword);
        self
    }

    pub fn with_transfer_syntax(mut self, uid: &str) -> Self {
        self.transfer_syntax = uid.to_string();
        self
    }
}

impl DicomSource for MockSource {
    fn attribute(&self, keyword: &str) -> Option<String> {
        self.attributes.get(keyword).cloned()
    }

    fn transfer_syntax_uid(&self) -> String {
        self.transfer_syntax.clone()
    }

    fn render_frame(&self, index: u32) -> Result<DynamicImage, ConvertError> {
        std::thread::sleep(self.render_delay);
        if self.panicking_frame == Some(index) {
            panic!("renderer crashed on frame {index}");
        }
        if self.failing_frames.contains(&index) {
            return Err(ConvertError::RenderError {
                frame: index,
                reason: "corrupt frame".to_string(),
            });
        }

        let (width, height) = self
            .render_size
            .unwrap_or_else(|| self.dimensions().unwrap_or((1, 1)));
        let base = self.shade.wrapping_add(index as u8);
        Ok(DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |_, y| {
            Luma([base.wrapping_add(y as u8)])
        })))
    }

    fn raw_frame(&self, index: u32) -> Result<Vec<u8>, ConvertError> {
        self.raw_frames
            .get(index as usize)
            .cloned()
            .ok_or(ConvertError::FrameOutOfRange {
                frame: index,
                total_frames: self.raw_frames.len() as u32,
            })
    }

    fn replace_pixel_data(&mut self, element: PixelContainerElement) -> Result<(), ConvertError> {
        self.attributes
            .insert("NumberOfFrames".to_string(), element.frame_count().to_string());
        self.replaced = Some(element);
        Ok(())
    }

    /// Writes `<kind>:<frames>:<hex bytes of frame 0>`.
    fn save(&self, path: &Path) -> Result<(), ConvertError> {
        let element = self
            .replaced
            .as_ref()
            .ok_or_else(|| ConvertError::PixelDataError("nothing to save".to_string()))?;
        let bytes: String = element
            .frame(0)
            .unwrap_or_default()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect();
        fs::write(path, format!("{}:{}:{bytes}", element.kind(), element.frame_count()))?;
        Ok(())
    }
}

/// Serves registered [`MockSource`]s by path and records every open.
#[derive(Debug, Clone, Default)]
pub struct MockOpener {
    sources: HashMap<PathBuf, MockSource>,
    pub opened: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `source` at `path`, creating a placeholder file there so
    /// existence checks pass.
    pub fn with_source(mut self, path: &Path, source: MockSource) -> Self {
        fs::write(path, b"mock").expect("write placeholder file");
        self.sources.insert(path.to_path_buf(), source);
        self
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().unwrap().clone()
    }
}

impl SourceOpener for MockOpener {
    type Source = MockSource;

    fn open(&self, path: &Path) -> Result<MockSource, ConvertError> {
        self.opened.lock().unwrap().push(path.to_path_buf());
        self.sources
            .get(path)
            .cloned()
            .ok_or_else(|| ConvertError::SourceOpen {
                path: path.to_path_buf(),
                reason: "not a registered mock".to_string(),
            })
    }
}

// ── Video sinks ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SinkLog {
    pub created: Vec<(PathBuf, u16, VideoGeometry)>,
    pub frames: Vec<RgbImage>,
    pub close_calls: usize,
}

/// Records everything handed to the sinks it creates.
#[derive(Debug, Clone, Default)]
pub struct RecordingFactory {
    pub log: Arc<Mutex<SinkLog>>,
    pub fail_on_frame: Option<usize>,
    pub fail_on_close: bool,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on_frame(mut self, frame: usize) -> Self {
        self.fail_on_frame = Some(frame);
        self
    }

    pub fn failing_on_close(mut self) -> Self {
        self.fail_on_close = true;
        self
    }

    pub fn created(&self) -> usize {
        self.log.lock().unwrap().created.len()
    }

    pub fn frames(&self) -> Vec<RgbImage> {
        self.log.lock().unwrap().frames.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.log.lock().unwrap().close_calls
    }

    /// Red channel of the top-left pixel of every recorded frame.
    pub fn top_left_values(&self) -> Vec<u8> {
        self.frames().iter().map(|frame| frame.get_pixel(0, 0)[0]).collect()
    }
}

pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
    fail_on_frame: Option<usize>,
    fail_on_close: bool,
    added: usize,
}

impl VideoSink for RecordingSink {
    fn add_frame(&mut self, frame: &RgbImage) -> Result<(), ConvertError> {
        if self.fail_on_frame == Some(self.added) {
            return Err(ConvertError::VideoWriteError("disk full".to_string()));
        }
        self.added += 1;
        self.log.lock().unwrap().frames.push(frame.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<(), ConvertError> {
        self.log.lock().unwrap().close_calls += 1;
        if self.fail_on_close {
            return Err(ConvertError::VideoWriteError("trailer failed".to_string()));
        }
        Ok(())
    }
}

impl VideoSinkFactory for RecordingFactory {
    type Sink = RecordingSink;

    fn create(
        &self,
        path: &Path,
        frame_rate: u16,
        geometry: VideoGeometry,
    ) -> Result<RecordingSink, ConvertError> {
        self.log
            .lock()
            .unwrap()
            .created
            .push((path.to_path_buf(), frame_rate, geometry));
        Ok(RecordingSink {
            log: Arc::clone(&self.log),
            fail_on_frame: self.fail_on_frame,
            fail_on_close: self.fail_on_close,
            added: 0,
        })
    }
}

// ── Progress ───────────────────────────────────────────────────────

/// Collects every event it receives.
#[derive(Debug, Clone, Default)]
pub struct ProgressRecorder {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
    threads: Arc<Mutex<Vec<Option<String>>>>,
}

impl ProgressRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> Arc<dyn ProgressCallback> {
        Arc::new(self.clone())
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn percents(&self) -> Vec<f32> {
        self.events().iter().map(|event| event.percent).collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn thread_names(&self) -> Vec<Option<String>> {
        self.threads.lock().unwrap().clone()
    }
}

impl ProgressCallback for ProgressRecorder {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
        self.threads
            .lock()
            .unwrap()
            .push(std::thread::current().name().map(str::to_string));
    }
}

pub fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 0.01,
        "expected {expected}, got {actual}"
    );
}

pub fn assert_non_decreasing(values: &[f32]) {
    for pair in values.windows(2) {
        assert!(pair[0] <= pair[1], "progress moved backwards: {values:?}");
    }
}
