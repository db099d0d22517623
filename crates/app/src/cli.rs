use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use ml_core::{HttpInferenceClient, InferenceClient};
use tracing::{info, warn};

use crate::vision::{
    annotation::OverlayStyle,
    bus::MessageHandler,
    config::{BusArgs, BusConfig, EgressArgs, EgressConfig, PipelineArgs, PipelineConfig, StyleArgs, TelemetryOptions},
    controller::{FfmpegBackend, PipelineController},
    pipeline::FramePipeline,
    resolver::DefaultResolver,
    server::spawn_control_server,
    telemetry,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const SIGNAL_POLL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "annotated-stream", version, about = "Annotate live video with remote inference results")]
pub(crate) struct Cli {
    /// Write a Chrome trace JSON file capturing pipeline spans.
    #[arg(long, global = true, value_name = "PATH")]
    chrome_trace: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP control surface and annotate streams on request.
    Serve(ServeArgs),
    /// Annotate one source until it ends or Ctrl-C is pressed.
    Run(RunArgs),
    /// Answer image files the way the message-bus worker answers messages.
    Annotate(AnnotateArgs),
}

/// Everything needed to build a stream controller.
#[derive(Args)]
struct StreamArgs {
    /// Program used to resolve YouTube pages.
    #[arg(long, env = "YTDLP_BIN", value_name = "PATH", default_value = "yt-dlp")]
    ytdlp: PathBuf,
    /// Seconds a YouTube resolution may take before it is abandoned.
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    ytdlp_timeout_secs: u64,
    #[command(flatten)]
    pipeline: PipelineArgs,
    #[command(flatten)]
    style: StyleArgs,
    #[command(flatten)]
    egress: EgressArgs,
}

#[derive(Args)]
struct ServeArgs {
    /// Address the control server listens on.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:5000")]
    bind: SocketAddr,
    #[command(flatten)]
    stream: StreamArgs,
}

#[derive(Args)]
struct RunArgs {
    /// Stream address, file path, device or YouTube page.
    source: String,
    #[command(flatten)]
    stream: StreamArgs,
}

#[derive(Args)]
struct AnnotateArgs {
    /// Encoded images, handled in order as consecutive messages.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Directory the answers are written to.
    #[arg(long, short, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,
    /// Inference service endpoint receiving the raw image bytes.
    #[arg(long, env = "INFERENCE_URL", default_value = "http://127.0.0.1:8500/infer")]
    inference_url: String,
    /// Per-request timeout of the inference call.
    #[arg(long, value_name = "MS", default_value_t = 10_000)]
    inference_timeout_ms: u64,
    #[command(flatten)]
    bus: BusArgs,
    #[command(flatten)]
    style: StyleArgs,
}

pub(crate) fn run() -> Result<()> {
    let cli = Cli::parse();
    let _telemetry = telemetry::init(&TelemetryOptions {
        chrome_trace_path: cli.chrome_trace.clone(),
    });

    match cli.command {
        Command::Serve(args) => serve(args),
        Command::Run(args) => run_single(args),
        Command::Annotate(args) => annotate(args),
    }
}

fn build_controller(args: &StreamArgs) -> Result<PipelineController> {
    let config = PipelineConfig::try_from(&args.pipeline)?;
    let style = Arc::new(OverlayStyle::try_from(&args.style)?);
    let endpoint = args.pipeline.endpoint();
    let client: Arc<dyn InferenceClient> = Arc::new(
        HttpInferenceClient::new(endpoint.url, endpoint.timeout)
            .context("Failed to build inference client")?,
    );

    let pipeline = FramePipeline::new(config, client, style);
    let egress = EgressConfig::from_args(&args.egress, args.pipeline.ffmpeg.clone());
    let backend = FfmpegBackend::new(pipeline, args.pipeline.decode_options(), egress);
    let resolver = DefaultResolver::with_ytdlp(
        args.ytdlp.clone(),
        Duration::from_secs(args.ytdlp_timeout_secs),
    );
    Ok(PipelineController::new(Box::new(resolver), Box::new(backend)))
}

fn shutdown_signal() -> Result<Receiver<()>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("Failed to install Ctrl-C handler")?;
    Ok(rx)
}

fn serve(args: ServeArgs) -> Result<()> {
    telemetry::init_metrics_recorder();
    let controller = build_controller(&args.stream)?;
    let server = spawn_control_server(controller.clone(), args.bind)?;
    let signal = shutdown_signal()?;

    let outcome = loop {
        match signal.recv_timeout(SIGNAL_POLL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break Ok(()),
            Err(RecvTimeoutError::Timeout) if server.is_finished() => {
                break Err(anyhow::anyhow!("control server on {} exited", args.bind));
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    };

    info!("Shutting down");
    server.stop();
    if !controller.shutdown(SHUTDOWN_TIMEOUT) {
        warn!("runs still active after {SHUTDOWN_TIMEOUT:?}");
    }
    outcome
}

fn run_single(args: RunArgs) -> Result<()> {
    telemetry::init_metrics_recorder();
    let controller = build_controller(&args.stream)?;
    let metadata = controller
        .start(&args.source)
        .with_context(|| format!("Cannot start {}", args.source))?;
    info!(video_url = %metadata.video_url, "annotating");

    let signal = shutdown_signal()?;
    while controller.is_busy() {
        match signal.recv_timeout(SIGNAL_POLL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                info!("Interrupted, stopping run");
                if !controller.shutdown(SHUTDOWN_TIMEOUT) {
                    bail!("run did not stop within {SHUTDOWN_TIMEOUT:?}");
                }
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
    Ok(())
}

fn annotate(args: AnnotateArgs) -> Result<()> {
    let config = BusConfig::try_from(&args.bus)?;
    let extension = if config.draw_demo { "jpg" } else { "json" };
    let style = Arc::new(OverlayStyle::try_from(&args.style)?);
    let client = HttpInferenceClient::new(
        args.inference_url.clone(),
        Duration::from_millis(args.inference_timeout_ms),
    )
    .context("Failed to build inference client")?;
    let mut handler = MessageHandler::new(config, Arc::new(client), style);

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;
    for (index, input) in args.inputs.iter().enumerate() {
        let payload =
            fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
        let answer = handler
            .handle(&payload)
            .with_context(|| format!("Failed to handle {}", input.display()))?;
        let target = answer_path(&args.output_dir, index, input, extension);
        fs::write(&target, &answer)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        info!(input = %input.display(), output = %target.display(), bytes = answer.len(), "answered");
    }
    info!(messages = handler.handled(), "all inputs answered");
    Ok(())
}

fn answer_path(dir: &Path, index: usize, input: &Path, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("message");
    dir.join(format!("{index:05}-{stem}.{extension}"))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_takes_a_source_and_stream_flags() {
        let cli = Cli::try_parse_from([
            "annotated-stream",
            "run",
            "rtsp://cam/1",
            "--infer-every",
            "5",
            "--ytdlp-timeout-secs",
            "3",
            "--conduit",
            "/tmp/x.mjpeg",
            "--chrome-trace",
            "trace.json",
        ])
        .unwrap();
        assert_eq!(cli.chrome_trace, Some(PathBuf::from("trace.json")));
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.source, "rtsp://cam/1");
                assert_eq!(args.stream.pipeline.infer_every, 5);
                assert_eq!(args.stream.ytdlp_timeout_secs, 3);
                assert_eq!(args.stream.egress.conduit, PathBuf::from("/tmp/x.mjpeg"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn answers_are_numbered_by_message() {
        let path = answer_path(Path::new("/out"), 7, Path::new("/in/frame.png"), "json");
        assert_eq!(path, PathBuf::from("/out/00007-frame.json"));
    }
}
