use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use dicomconvert::{
    ConversionJob, ConversionOptions, DicomFile, DicomFileOpener, DicomSource,
    FrameSequenceExtractor, JobController, JobOutcome, JobReport, NoOpProgress, ProgressCallback,
    ProgressEvent, StagingDirectory,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

#[cfg(feature = "ffmpeg")]
use dicomconvert::{AviWriterFactory, FfmpegLogLevel, FrameRange, ListFrameSource, SourceDescriptor};

const CLI_AFTER_HELP: &str = "Examples:\n  dicomconvert info cine.dcm --json\n  dicomconvert frames cine.dcm --out tmpframe --progress\n  dicomconvert split cine.dcm --frame 3 --out frame-3.dcm\n  dicomconvert avi cine.dcm --out cine.avi --fps 25\n  dicomconvert completions zsh > _dicomconvert";

#[derive(Debug, Parser)]
#[command(
    name = "dicomconvert",
    version,
    about = "Convert multi-frame DICOM files into JPEG frames and AVI videos",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// List every produced file.
    #[arg(long)]
    verbose: bool,

    /// Show a progress bar.
    #[arg(long)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long)]
    overwrite: bool,

    /// Skip the pause between frames.
    #[arg(long)]
    no_throttle: bool,

    /// FFmpeg log level (quiet, fatal, error, warning, info, debug).
    #[cfg(feature = "ffmpeg")]
    #[arg(long)]
    ffmpeg_log_level: Option<FfmpegLogLevel>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print image attributes of a DICOM file.
    #[command(
        about = "Print DICOM image attributes",
        after_help = "Examples:\n  dicomconvert info cine.dcm\n  dicomconvert info cine.dcm --json"
    )]
    Info {
        /// Input DICOM file.
        input: PathBuf,

        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Render every frame to a JPEG still.
    #[command(
        about = "Extract frames as JPEG stills",
        after_help = "Examples:\n  dicomconvert frames cine.dcm\n  dicomconvert frames cine.dcm --out stills --quality 95 --progress"
    )]
    Frames {
        /// Input multi-frame DICOM file.
        input: PathBuf,
        /// Staging directory (defaults to `tmpframe` next to the executable).
        /// Its contents are deleted first.
        #[arg(long)]
        out: Option<PathBuf>,
        /// JPEG quality (1-100).
        #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u8).range(1..=100))]
        quality: u8,
    },

    /// Write one frame as a standalone single-frame DICOM file.
    #[command(
        about = "Split one frame into its own DICOM file",
        after_help = "Examples:\n  dicomconvert split cine.dcm --frame 0 --out first.dcm"
    )]
    Split {
        /// Input multi-frame DICOM file.
        input: PathBuf,
        /// Zero-based frame index.
        #[arg(long)]
        frame: u32,
        /// Output DICOM file.
        #[arg(long)]
        out: PathBuf,
    },

    #[cfg(feature = "ffmpeg")]
    /// Encode frames into an AVI video.
    #[command(
        about = "Assemble frames into an AVI video",
        after_help = "Examples:\n  dicomconvert avi cine.dcm --out cine.avi --fps 25 --begin 10 --end 40\n  dicomconvert avi a.dcm b.dcm c.dcm --out list.avi --each-file"
    )]
    Avi {
        /// One multi-frame file, or several single-frame files in playback order.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output AVI file.
        #[arg(long)]
        out: PathBuf,
        /// Frames per second.
        #[arg(long, default_value_t = 25)]
        fps: u16,
        /// First frame of a multi-frame source.
        #[arg(long, default_value_t = 0)]
        begin: u32,
        /// One past the last frame of a multi-frame source (0 = all).
        #[arg(long, default_value_t = 0)]
        end: u32,
        /// With several inputs, read each file instead of repeating the first.
        #[arg(long)]
        each_file: bool,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new(message: &'static str) -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos:>3}% {msg}")?;
        bar.set_style(style.progress_chars("##-"));
        bar.set_message(message);
        Ok(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        self.bar.set_position(event.percent.round() as u64);
    }
}

fn warn(message: impl AsRef<str>) {
    eprintln!("{} {}", "warning:".yellow().bold(), message.as_ref().yellow());
}

fn ensure_writable_path(path: &std::path::Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            warn(format!("overwriting {}", path.display()));
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn conversion_options(global: &GlobalOptions) -> ConversionOptions {
    let options = ConversionOptions::new();
    if global.no_throttle {
        options.with_frame_interval(Duration::ZERO)
    } else {
        options
    }
}

fn apply_global_options(global: &GlobalOptions) {
    #[cfg(feature = "ffmpeg")]
    if let Some(level) = global.ffmpeg_log_level {
        dicomconvert::set_ffmpeg_log_level(level);
    }
    #[cfg(not(feature = "ffmpeg"))]
    let _ = global;
}

/// Run a job to completion, drawing a progress bar when requested.
fn run_job<F>(
    mut controller: JobController<DicomFileOpener, F>,
    job: ConversionJob,
    show_progress: bool,
    message: &'static str,
) -> Result<JobReport, Box<dyn std::error::Error>>
where
    F: dicomconvert::VideoSinkFactory,
{
    let terminal = if show_progress {
        Some(Arc::new(TerminalProgress::new(message)?))
    } else {
        None
    };
    let callback: Arc<dyn ProgressCallback> = match &terminal {
        Some(terminal) => terminal.clone(),
        None => Arc::new(NoOpProgress),
    };

    controller.start(job, callback)?;
    let outcome = controller.wait();
    if let Some(terminal) = &terminal {
        terminal.finish();
    }

    match outcome {
        Some(JobOutcome::Completed(report)) => Ok(report),
        Some(JobOutcome::Failed(error)) => Err(error.into()),
        Some(JobOutcome::Stopped(_)) => Err("conversion was stopped".into()),
        None => Err("no conversion was started".into()),
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global);

    match cli.command {
        Commands::Info { input, json } => {
            let file = DicomFile::open(&input)?;
            let syntax = file.transfer_syntax();
            let (columns, rows) = file.dimensions().unwrap_or((0, 0));

            if json {
                let payload = json!({
                    "path": input.display().to_string(),
                    "sop_instance_uid": file.sop_instance_uid(),
                    "frames": file.frame_count(),
                    "columns": columns,
                    "rows": rows,
                    "bits_allocated": file.bits_allocated(),
                    "transfer_syntax": syntax.uid(),
                    "encapsulated": syntax.is_encapsulated(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("SOP Instance UID: {}", file.sop_instance_uid());
                println!("Frames: {}", file.frame_count());
                println!("Size: {columns}x{rows}, {} bits allocated", file.bits_allocated());
                println!("Transfer syntax: {syntax}");
            }
        }
        Commands::Frames {
            input,
            out,
            quality,
        } => {
            let staging = out.map_or_else(StagingDirectory::default_location, StagingDirectory::new);
            let options = conversion_options(&cli.global).with_jpeg_quality(quality);
            let controller = JobController::extraction(DicomFileOpener).with_options(options);
            let job = ConversionJob::ExtractFrames {
                source: input,
                staging: staging.clone(),
            };

            if let JobReport::Frames(report) =
                run_job(controller, job, cli.global.progress, "extracting")?
            {
                if !report.staging_cleaned {
                    warn(format!(
                        "staging directory {} could not be fully cleaned",
                        staging.path().display()
                    ));
                }
                for skipped in &report.skipped {
                    warn(format!("frame {} skipped: {}", skipped.index, skipped.reason));
                }
                if cli.global.verbose {
                    for path in &report.manifest {
                        println!("{}", path.display());
                    }
                }
                println!(
                    "{} {} of {} frames to {}",
                    "saved".green().bold(),
                    report.manifest.len(),
                    report.frame_count,
                    staging.path().display()
                );
            }
        }
        Commands::Split { input, frame, out } => {
            ensure_writable_path(&out, cli.global.overwrite)?;
            let options = conversion_options(&cli.global);
            FrameSequenceExtractor::new(&DicomFileOpener, &options).split_frame(&input, frame, &out)?;
            println!("{} {}", "saved".green().bold(), out.display());
        }
        #[cfg(feature = "ffmpeg")]
        Commands::Avi {
            inputs,
            out,
            fps,
            begin,
            end,
            each_file,
        } => {
            ensure_writable_path(&out, cli.global.overwrite)?;
            let mut options = conversion_options(&cli.global);
            if each_file {
                options = options.with_list_frame_source(ListFrameSource::EachFile);
            }

            let source = match inputs.as_slice() {
                [single] => SourceDescriptor::multi_frame(single),
                _ => {
                    if begin != 0 || end != 0 {
                        warn("--begin/--end are ignored for a list of files");
                    }
                    SourceDescriptor::single_frame_list(inputs)
                }
            };
            let controller =
                JobController::new(DicomFileOpener, AviWriterFactory::default()).with_options(options);
            let job = ConversionJob::assemble_avi(source, FrameRange::new(begin, end), &out, fps);

            if let JobReport::Video(report) = run_job(controller, job, cli.global.progress, "encoding")? {
                println!(
                    "{} {} ({} frames, {}x{})",
                    "saved".green().bold(),
                    report.output.display(),
                    report.frames_written,
                    report.geometry.width,
                    report.geometry.height
                );
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "dicomconvert", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, Commands, conversion_options};
    use clap::Parser;

    #[test]
    fn frames_defaults() {
        let cli = Cli::try_parse_from(["dicomconvert", "frames", "cine.dcm"]).unwrap();
        match cli.command {
            Commands::Frames { out, quality, .. } => {
                assert!(out.is_none());
                assert_eq!(quality, 90);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn quality_is_range_checked() {
        assert!(Cli::try_parse_from(["dicomconvert", "frames", "cine.dcm", "--quality", "0"]).is_err());
        assert!(Cli::try_parse_from(["dicomconvert", "frames", "cine.dcm", "--quality", "101"]).is_err());
    }

    #[test]
    fn split_requires_frame_and_output() {
        assert!(Cli::try_parse_from(["dicomconvert", "split", "cine.dcm"]).is_err());
        let cli = Cli::try_parse_from([
            "dicomconvert", "split", "cine.dcm", "--frame", "4", "--out", "f.dcm",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Split { frame: 4, .. }));
    }

    #[test]
    fn no_throttle_disables_the_frame_pause() {
        let cli = Cli::try_parse_from(["dicomconvert", "--no-throttle", "info", "x.dcm"]).unwrap();
        assert!(conversion_options(&cli.global).frame_interval().is_zero());

        let cli = Cli::try_parse_from(["dicomconvert", "info", "x.dcm"]).unwrap();
        assert!(!conversion_options(&cli.global).frame_interval().is_zero());
    }
}
