//! Configuration parsing for the stream runtime.
//!
//! This module owns translation of CLI arguments (with environment fallbacks)
//! into immutable config structs which downstream stages use without
//! re-reading flags or the environment.

use std::{fs, path::PathBuf, time::Duration};

use ab_glyph::FontVec;
use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use image::Rgb;
use tracing::error;
use video_io::DecodeOptions;

use crate::vision::{
    annotation::{DEFAULT_BOX_COLOR, DEFAULT_FONT_COLOR, OverlayStyle, RenderOptions, VerticalAlign},
    pipeline::InferenceFailurePolicy,
};

pub(crate) const DEFAULT_CONDUIT: &str = "/tmp/annotated-stream/inference.mjpeg";
pub(crate) const DEFAULT_OUTPUT_URL: &str = "rtmp://localhost/show/stream";

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing.
pub(crate) struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub(crate) chrome_trace_path: Option<PathBuf>,
}

/// Label and box styling.
#[derive(Debug, Clone, Args)]
pub(crate) struct StyleArgs {
    /// Label text color as `RRGGBB` or `RGB` hex.
    #[arg(long, env = "FONT_COLOR", value_name = "HEX")]
    pub(crate) font_color: Option<String>,
    /// Box color as `RRGGBB` or `RGB` hex; label backgrounds are a darker shade.
    #[arg(long, env = "BOX_COLOR", value_name = "HEX")]
    pub(crate) box_color: Option<String>,
    /// Font size as a percentage of the base size.
    #[arg(long, env = "FONT_SCALE_PCT", value_name = "PCT", default_value_t = 100)]
    pub(crate) font_scale_pct: u32,
    /// TrueType font for labels; a built-in bitmap face is used otherwise.
    #[arg(long = "font", env = "FONT_PATH", value_name = "PATH")]
    pub(crate) font_path: Option<PathBuf>,
}

impl TryFrom<&StyleArgs> for OverlayStyle {
    type Error = anyhow::Error;

    fn try_from(args: &StyleArgs) -> Result<Self> {
        if args.font_scale_pct == 0 {
            bail!("--font-scale-pct must be a positive integer");
        }
        let font_color = color_or_default(args.font_color.as_deref(), DEFAULT_FONT_COLOR, "font");
        let box_color = color_or_default(args.box_color.as_deref(), DEFAULT_BOX_COLOR, "box");
        let font = match args.font_path.as_ref() {
            Some(path) => {
                let bytes = fs::read(path)
                    .with_context(|| format!("failed to read font {}", path.display()))?;
                let font = FontVec::try_from_vec(bytes)
                    .map_err(|err| anyhow!("invalid font {}: {err}", path.display()))?;
                Some(font)
            }
            None => None,
        };
        Ok(OverlayStyle::new(
            font_color,
            box_color,
            args.font_scale_pct,
            font,
        ))
    }
}

/// Parse `RRGGBB` or shorthand `RGB` hex (an optional leading `#` is accepted).
pub(crate) fn parse_hex_color(value: &str) -> Option<Rgb<u8>> {
    let digits = value.trim().trim_start_matches('#');
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&digits[range], 16).ok();
    match digits.len() {
        6 => Some(Rgb([channel(0..2)?, channel(2..4)?, channel(4..6)?])),
        3 => Some(Rgb([
            channel(0..1)? * 17,
            channel(1..2)? * 17,
            channel(2..3)? * 17,
        ])),
        _ => None,
    }
}

fn color_or_default(value: Option<&str>, default: Rgb<u8>, what: &str) -> Rgb<u8> {
    match value {
        None => default,
        Some(raw) => parse_hex_color(raw).unwrap_or_else(|| {
            error!("Error parsing {what} color {raw:?}, defaulting to {default:?}");
            default
        }),
    }
}

/// Frame pipeline and inference settings.
#[derive(Debug, Clone, Args)]
pub(crate) struct PipelineArgs {
    /// Inference service endpoint receiving JPEG frames.
    #[arg(
        long,
        env = "INFERENCE_URL",
        value_name = "URL",
        default_value = "http://127.0.0.1:8500/infer"
    )]
    pub(crate) inference_url: String,
    /// Per-request inference timeout in milliseconds.
    #[arg(long, env = "INFERENCE_TIMEOUT_MS", value_name = "MS", default_value_t = 10_000)]
    pub(crate) inference_timeout_ms: u64,
    /// Run inference on every Nth frame and reuse the result in between.
    #[arg(long = "infer-every", env = "INFERENCE_INTERVAL", value_name = "N", default_value_t = 10)]
    pub(crate) infer_every: u64,
    /// Capacity of the decoded frame queue.
    #[arg(long, env = "INPUT_QUEUE_CAPACITY", value_name = "N", default_value_t = 500)]
    pub(crate) input_capacity: usize,
    /// Capacity of the annotated frame queue.
    #[arg(long, value_name = "N", default_value_t = 64)]
    pub(crate) output_capacity: usize,
    /// Working frame width in pixels.
    #[arg(long, value_name = "PX", default_value_t = 640)]
    pub(crate) width: u32,
    /// Working frame height in pixels.
    #[arg(long, value_name = "PX", default_value_t = 360)]
    pub(crate) height: u32,
    /// JPEG quality for inference requests and egress frames (1-100).
    #[arg(long, value_name = "QUALITY", default_value_t = 85)]
    pub(crate) jpeg_quality: u8,
    /// Crop/pad frames to this aspect ratio before inference.
    #[arg(long, value_name = "RATIO")]
    pub(crate) model_aspect_ratio: Option<f64>,
    /// Maximum number of detection boxes drawn per frame.
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub(crate) max_detections: usize,
    /// Detections below this score are not drawn.
    #[arg(long, value_name = "SCORE", default_value_t = 0.3)]
    pub(crate) min_score: f32,
    /// Append scores to labels.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub(crate) draw_scores: bool,
    /// What a failed inference call does to the run.
    #[arg(long, value_enum, default_value_t = InferenceFailurePolicy::FailRun)]
    pub(crate) on_inference_error: InferenceFailurePolicy,
    /// ffmpeg binary used for decoding and transcoding.
    #[arg(long, env = "FFMPEG_BIN", value_name = "PATH", default_value = "ffmpeg")]
    pub(crate) ffmpeg: PathBuf,
}

#[derive(Clone, Debug)]
/// Canonical configuration shared by the three stages of a run.
pub(crate) struct PipelineConfig {
    /// Working resolution every decoded frame is scaled to.
    pub(crate) frame_size: (u32, u32),
    pub(crate) infer_every: u64,
    pub(crate) input_capacity: usize,
    pub(crate) output_capacity: usize,
    pub(crate) jpeg_quality: u8,
    pub(crate) model_aspect_ratio: Option<f64>,
    pub(crate) failure_policy: InferenceFailurePolicy,
    pub(crate) render: RenderOptions,
    /// Wait slice of every blocking queue operation; stop is checked in between.
    pub(crate) poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_size: (640, 360),
            infer_every: 10,
            input_capacity: 500,
            output_capacity: 64,
            jpeg_quality: 85,
            model_aspect_ratio: None,
            failure_policy: InferenceFailurePolicy::FailRun,
            render: RenderOptions::default(),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Where and how to reach the inference service.
#[derive(Clone, Debug)]
pub(crate) struct InferenceEndpoint {
    pub(crate) url: String,
    pub(crate) timeout: Duration,
}

impl TryFrom<&PipelineArgs> for PipelineConfig {
    type Error = anyhow::Error;

    fn try_from(args: &PipelineArgs) -> Result<Self> {
        if args.infer_every == 0 {
            bail!("--infer-every must be at least 1");
        }
        if args.input_capacity == 0 || args.output_capacity == 0 {
            bail!("queue capacities must be at least 1");
        }
        if args.width == 0 || args.height == 0 {
            bail!("--width and --height must be positive");
        }
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        if let Some(ratio) = args.model_aspect_ratio {
            if !(ratio.is_finite() && ratio > 0.0) {
                bail!("--model-aspect-ratio must be a positive number");
            }
        }
        Ok(Self {
            frame_size: (args.width, args.height),
            infer_every: args.infer_every,
            input_capacity: args.input_capacity,
            output_capacity: args.output_capacity,
            jpeg_quality: args.jpeg_quality,
            model_aspect_ratio: args.model_aspect_ratio,
            failure_policy: args.on_inference_error,
            render: RenderOptions {
                draw_scores: args.draw_scores,
                max_detections: args.max_detections,
                min_detection_score: args.min_score,
                ..RenderOptions::default()
            },
            ..Self::default()
        })
    }
}

impl PipelineArgs {
    pub(crate) fn endpoint(&self) -> InferenceEndpoint {
        InferenceEndpoint {
            url: self.inference_url.clone(),
            timeout: Duration::from_millis(self.inference_timeout_ms),
        }
    }

    pub(crate) fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            ffmpeg: self.ffmpeg.clone(),
            native_rate: true,
        }
    }
}

/// Egress conduit and transcoder settings.
#[derive(Debug, Clone, Args)]
pub(crate) struct EgressArgs {
    /// Named FIFO the annotated JPEG frames are written to.
    #[arg(long, env = "INFERENCE_PIPE", value_name = "PATH", default_value = DEFAULT_CONDUIT)]
    pub(crate) conduit: PathBuf,
    /// Distribution endpoint the transcoder publishes to.
    #[arg(long, env = "RTMP_STREAM", value_name = "URL", default_value = DEFAULT_OUTPUT_URL)]
    pub(crate) output_url: String,
    /// How long a stopped run may take to drain before the transcoder is killed.
    #[arg(long, value_name = "MS", default_value_t = 2_000)]
    pub(crate) stop_grace_ms: u64,
}

#[derive(Clone, Debug)]
pub(crate) struct EgressConfig {
    pub(crate) conduit: PathBuf,
    pub(crate) output_url: String,
    pub(crate) ffmpeg: PathBuf,
    pub(crate) stop_grace: Duration,
}

impl EgressConfig {
    pub(crate) fn from_args(args: &EgressArgs, ffmpeg: PathBuf) -> Self {
        Self {
            conduit: args.conduit.clone(),
            output_url: args.output_url.clone(),
            ffmpeg,
            stop_grace: Duration::from_millis(args.stop_grace_ms),
        }
    }
}

/// Message-bus style request handling.
#[derive(Debug, Clone, Args)]
pub(crate) struct BusArgs {
    /// Run inference on every Nth message and reuse the last result otherwise.
    #[arg(long, env = "PROCESS_EACH_N_FRAMES", value_name = "N", default_value_t = 1)]
    pub(crate) process_each_n_frames: u64,
    /// Answer with annotated images instead of the JSON inference result.
    #[arg(
        long,
        env = "DRAW_DEMO",
        action = clap::ArgAction::SetTrue,
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub(crate) draw_demo: bool,
    /// Vertical placement of classification tags on annotated answers.
    #[arg(long, value_enum, default_value_t = VerticalAlign::Preview)]
    pub(crate) valign: VerticalAlign,
}

#[derive(Clone, Debug)]
pub(crate) struct BusConfig {
    pub(crate) process_each_n_frames: u64,
    pub(crate) draw_demo: bool,
    pub(crate) render: RenderOptions,
    pub(crate) jpeg_quality: u8,
}

impl TryFrom<&BusArgs> for BusConfig {
    type Error = anyhow::Error;

    fn try_from(args: &BusArgs) -> Result<Self> {
        if args.process_each_n_frames == 0 {
            bail!("PROCESS_EACH_N_FRAMES must be at least 1");
        }
        Ok(Self {
            process_each_n_frames: args.process_each_n_frames,
            draw_demo: args.draw_demo,
            render: RenderOptions {
                valign: args.valign,
                ..RenderOptions::preview()
            },
            jpeg_quality: 75,
        })
    }
}
