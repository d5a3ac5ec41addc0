//! Streaming AVI writer backed by FFmpeg.
//!
//! [`AviWriter`] encodes RGB frames with the MPEG-4 Part 2 codec into an AVI
//! container one frame at a time, so an assembly job never holds more than
//! the current frame in memory.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dicomconvert::{
//!     AviWriterFactory, ConversionJob, ConvertError, DicomFileOpener, FrameRange,
//!     JobController, SourceDescriptor,
//! };
//!
//! let mut controller = JobController::new(DicomFileOpener, AviWriterFactory::default());
//! let job = ConversionJob::assemble_avi(
//!     SourceDescriptor::multi_frame("cine.dcm"),
//!     FrameRange::all(),
//!     "cine.avi",
//!     25,
//! );
//! controller.start(job, Arc::new(|_: &dicomconvert::ProgressEvent| {}))?;
//! let outcome = controller.wait();
//! # Ok::<(), ConvertError>(())
//! ```

use std::path::Path;

use ffmpeg_next::codec::Id;
use ffmpeg_next::codec::context::Context as CodecContext;
use ffmpeg_next::format::context::Output;
use ffmpeg_next::format::{Flags as FormatFlags, Pixel};
use ffmpeg_next::frame::Video as VideoFrame;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_next::{Packet, Rational};
use image::RgbImage;

use crate::avi::{VideoGeometry, VideoSink, VideoSinkFactory};
use crate::error::ConvertError;
use crate::ffmpeg::init_ffmpeg;

/// Default target bitrate in bits per second.
pub const DEFAULT_BIT_RATE: usize = 4_000_000;

/// An open AVI file accepting frames.
pub struct AviWriter {
    output: Output,
    encoder: ffmpeg_next::encoder::video::Encoder,
    scaler: ScalingContext,
    stream_index: usize,
    encoder_time_base: Rational,
    stream_time_base: Rational,
    geometry: VideoGeometry,
    next_pts: i64,
    closed: bool,
}

impl AviWriter {
    /// Create `path` and write the container header.
    ///
    /// # Errors
    ///
    /// [`ConvertError::VideoWriteError`] if the file, codec or scaler cannot
    /// be set up.
    pub fn create(
        path: &Path,
        frame_rate: u16,
        geometry: VideoGeometry,
        bit_rate: usize,
    ) -> Result<Self, ConvertError> {
        init_ffmpeg()?;

        let write_error = |what: &str, error: ffmpeg_next::Error| {
            ConvertError::VideoWriteError(format!("{what}: {error}"))
        };
        let fps = i32::from(frame_rate.max(1));
        let encoder_time_base = Rational::new(1, fps);
        let VideoGeometry { width, height } = geometry;

        log::debug!(
            "Creating AVI writer at {} ({width}x{height}, {fps} fps)",
            path.display()
        );

        let mut output = ffmpeg_next::format::output_as(path, "avi")
            .map_err(|error| write_error("cannot open output", error))?;
        let needs_global_header = output.format().flags().contains(FormatFlags::GLOBAL_HEADER);

        let codec = ffmpeg_next::encoder::find(Id::MPEG4).ok_or_else(|| {
            ConvertError::VideoWriteError("MPEG-4 encoder not available".to_string())
        })?;

        let (stream_index, encoder) = {
            let mut stream = output
                .add_stream(codec)
                .map_err(|error| write_error("cannot add stream", error))?;
            let stream_index = stream.index();

            let mut encoder = CodecContext::from_parameters(stream.parameters())
                .and_then(|context| context.encoder().video())
                .map_err(|error| write_error("cannot create encoder", error))?;
            encoder.set_width(width);
            encoder.set_height(height);
            encoder.set_format(Pixel::YUV420P);
            encoder.set_time_base(encoder_time_base);
            encoder.set_frame_rate(Some(Rational::new(fps, 1)));
            encoder.set_bit_rate(bit_rate);

            if needs_global_header {
                unsafe {
                    (*encoder.as_mut_ptr()).flags |=
                        ffmpeg_sys_next::AV_CODEC_FLAG_GLOBAL_HEADER as i32;
                }
            }

            let encoder = encoder
                .open_as(codec)
                .map_err(|error| write_error("cannot open encoder", error))?;
            stream.set_parameters(&encoder);
            stream.set_time_base(encoder_time_base);
            (stream_index, encoder)
        };

        output
            .write_header()
            .map_err(|error| write_error("cannot write header", error))?;

        // The muxer may adjust the stream time base while writing the header.
        let stream_time_base = output
            .stream(stream_index)
            .map(|stream| stream.time_base())
            .ok_or_else(|| ConvertError::VideoWriteError("video stream vanished".to_string()))?;

        let scaler = ScalingContext::get(
            Pixel::RGB24,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            ScalingFlags::BILINEAR,
        )
        .map_err(|error| write_error("cannot create scaler", error))?;

        Ok(Self {
            output,
            encoder,
            scaler,
            stream_index,
            encoder_time_base,
            stream_time_base,
            geometry,
            next_pts: 0,
            closed: false,
        })
    }

    /// Frames encoded so far.
    pub fn frames_written(&self) -> i64 {
        self.next_pts
    }

    fn write_pending_packets(&mut self) -> Result<(), ConvertError> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.stream_index);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet.write_interleaved(&mut self.output).map_err(|error| {
                ConvertError::VideoWriteError(format!("write packet failed: {error}"))
            })?;
        }
        Ok(())
    }
}

impl VideoSink for AviWriter {
    fn add_frame(&mut self, frame: &RgbImage) -> Result<(), ConvertError> {
        if self.closed {
            return Err(ConvertError::VideoWriteError(
                "writer is already closed".to_string(),
            ));
        }

        let VideoGeometry { width, height } = self.geometry;
        if frame.dimensions() != (width, height) {
            return Err(ConvertError::VideoWriteError(format!(
                "frame is {}x{}, video is {width}x{height}",
                frame.width(),
                frame.height(),
            )));
        }

        let mut rgb_frame = VideoFrame::new(Pixel::RGB24, width, height);
        let stride = rgb_frame.stride(0);
        let row_len = width as usize * 3;
        let destination = rgb_frame.data_mut(0);
        for (y, row) in frame.as_raw().chunks_exact(row_len).enumerate() {
            let start = y * stride;
            destination[start..start + row_len].copy_from_slice(row);
        }

        let mut yuv_frame = VideoFrame::empty();
        self.scaler.run(&rgb_frame, &mut yuv_frame).map_err(|error| {
            ConvertError::VideoWriteError(format!("scaling failed: {error}"))
        })?;
        yuv_frame.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder.send_frame(&yuv_frame).map_err(|error| {
            ConvertError::VideoWriteError(format!("send_frame failed: {error}"))
        })?;
        self.write_pending_packets()
    }

    fn close(&mut self) -> Result<(), ConvertError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.encoder.send_eof().map_err(|error| {
            ConvertError::VideoWriteError(format!("send_eof failed: {error}"))
        })?;
        self.write_pending_packets()?;
        self.output.write_trailer().map_err(|error| {
            ConvertError::VideoWriteError(format!("cannot write trailer: {error}"))
        })?;

        log::debug!("Closed AVI writer after {} frames", self.next_pts);
        Ok(())
    }
}

/// Creates [`AviWriter`]s.
#[derive(Debug, Clone, Copy)]
pub struct AviWriterFactory {
    bit_rate: usize,
}

impl AviWriterFactory {
    /// Use `bit_rate` bits per second for every writer.
    pub fn with_bit_rate(bit_rate: usize) -> Self {
        Self { bit_rate }
    }
}

impl Default for AviWriterFactory {
    fn default() -> Self {
        Self::with_bit_rate(DEFAULT_BIT_RATE)
    }
}

impl VideoSinkFactory for AviWriterFactory {
    type Sink = AviWriter;

    fn create(
        &self,
        path: &Path,
        frame_rate: u16,
        geometry: VideoGeometry,
    ) -> Result<AviWriter, ConvertError> {
        AviWriter::create(path, frame_rate, geometry, self.bit_rate)
    }
}
