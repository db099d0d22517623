//! Three-stage frame pipeline: reader → scheduler → writer.
//!
//! Stages talk only through bounded crossbeam queues carrying [`Envelope`]s,
//! and ownership of every frame moves with it. The scheduler is the only
//! stage calling the inference service; it amortises each call over
//! `infer_every` frames by sharing the last result behind an `Arc`.

use std::{
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use ml_core::{InferenceClient, InferenceError, InferenceResult, crop, normalize_roi};
use tracing::{debug, error, info, warn};
use video_io::{Frame, FrameSource};

use crate::vision::{
    annotation::{AnnotationRenderer, OverlayStyle},
    config::PipelineConfig,
    data::{Envelope, PendingFrame, StopFlag},
    telemetry,
};

/// What a failed inference call does to the run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum InferenceFailurePolicy {
    /// Stop the run on the first failed call.
    #[default]
    FailRun,
    /// Log the failure and keep annotating with the previous result.
    ReuseLast,
}

/// Destination of encoded annotated frames.
pub(crate) trait FrameSink: Send {
    fn write_frame(&mut self, jpeg: &[u8]) -> Result<()>;

    /// Called once after the last frame, including after a failed write.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Counters and outcome of one finished run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct PipelineReport {
    pub(crate) frames_read: u64,
    pub(crate) frames_scheduled: u64,
    pub(crate) frames_written: u64,
    pub(crate) frames_skipped: u64,
    pub(crate) inference_calls: u64,
    pub(crate) inference_failures: u64,
    /// The stop flag was raised before the run drained.
    pub(crate) stopped: bool,
    pub(crate) failure: Option<String>,
}

#[derive(Default)]
struct ReaderOutcome {
    frames_read: u64,
    failure: Option<String>,
}

#[derive(Default)]
struct SchedulerOutcome {
    frames_scheduled: u64,
    inference_calls: u64,
    inference_failures: u64,
    failure: Option<String>,
}

#[derive(Default)]
struct WriterOutcome {
    frames_written: u64,
    frames_skipped: u64,
    failure: Option<String>,
}

/// Handles of the three workers of an active run.
pub(crate) struct PipelineRun {
    stop: StopFlag,
    reader: JoinHandle<ReaderOutcome>,
    scheduler: JoinHandle<SchedulerOutcome>,
    writer: JoinHandle<WriterOutcome>,
}

impl PipelineRun {
    pub(crate) fn is_finished(&self) -> bool {
        self.reader.is_finished() && self.scheduler.is_finished() && self.writer.is_finished()
    }

    /// Wait for all three workers and merge their outcomes.
    pub(crate) fn join(self) -> PipelineReport {
        let mut report = PipelineReport::default();
        let mut failures = Vec::new();

        match self.reader.join() {
            Ok(outcome) => {
                report.frames_read = outcome.frames_read;
                failures.extend(outcome.failure);
            }
            Err(_) => failures.push("reader thread panicked".to_string()),
        }
        match self.scheduler.join() {
            Ok(outcome) => {
                report.frames_scheduled = outcome.frames_scheduled;
                report.inference_calls = outcome.inference_calls;
                report.inference_failures = outcome.inference_failures;
                failures.extend(outcome.failure);
            }
            Err(_) => failures.push("scheduler thread panicked".to_string()),
        }
        match self.writer.join() {
            Ok(outcome) => {
                report.frames_written = outcome.frames_written;
                report.frames_skipped = outcome.frames_skipped;
                failures.extend(outcome.failure);
            }
            Err(_) => failures.push("writer thread panicked".to_string()),
        }

        report.stopped = self.stop.is_raised();
        if !failures.is_empty() {
            report.failure = Some(failures.join("; "));
        }
        report
    }
}

/// Factory for pipeline runs sharing one inference client and style.
pub(crate) struct FramePipeline {
    config: PipelineConfig,
    client: Arc<dyn InferenceClient>,
    renderer: Arc<AnnotationRenderer>,
}

impl FramePipeline {
    pub(crate) fn new(
        config: PipelineConfig,
        client: Arc<dyn InferenceClient>,
        style: Arc<OverlayStyle>,
    ) -> Self {
        let renderer = Arc::new(AnnotationRenderer::new(style, config.render.clone()));
        Self {
            config,
            client,
            renderer,
        }
    }

    pub(crate) fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start the three workers of a run observing `stop`.
    pub(crate) fn spawn<S, K>(&self, source: S, sink: K, stop: StopFlag) -> Result<PipelineRun>
    where
        S: FrameSource + 'static,
        K: FrameSink + 'static,
    {
        let (input_tx, input_rx) =
            crossbeam_channel::bounded::<Envelope<Frame>>(self.config.input_capacity);
        let (output_tx, output_rx) =
            crossbeam_channel::bounded::<Envelope<PendingFrame>>(self.config.output_capacity);

        let writer = {
            let renderer = self.renderer.clone();
            let stop = stop.clone();
            let quality = self.config.jpeg_quality;
            let poll = self.config.poll_interval;
            telemetry::spawn_thread("stream-writer", move || {
                write_frames(output_rx, sink, &renderer, quality, &stop, poll)
            })
            .context("Failed to spawn writer thread")?
        };

        let scheduler = {
            let client = self.client.clone();
            let config = self.config.clone();
            let stop_for_thread = stop.clone();
            telemetry::spawn_thread("stream-scheduler", move || {
                schedule(input_rx, output_tx, client.as_ref(), &config, &stop_for_thread)
            })
            .inspect_err(|_| stop.raise())
            .context("Failed to spawn scheduler thread")?
        };

        let reader = {
            let stop_for_thread = stop.clone();
            let poll = self.config.poll_interval;
            telemetry::spawn_thread("stream-reader", move || {
                read_frames(source, input_tx, &stop_for_thread, poll)
            })
            .inspect_err(|_| stop.raise())
            .context("Failed to spawn reader thread")?
        };

        Ok(PipelineRun {
            stop,
            reader,
            scheduler,
            writer,
        })
    }
}

/// Push `item`, waiting in `poll` slices while the queue is full.
///
/// Returns `false` when the stop flag was raised or the consumer is gone.
fn push_blocking<T>(
    tx: &Sender<Envelope<T>>,
    item: Envelope<T>,
    stop: &StopFlag,
    poll: Duration,
) -> bool {
    let mut item = item;
    loop {
        match tx.send_timeout(item, poll) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => {
                if stop.is_raised() {
                    return false;
                }
                item = back;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

/// Pop the next item, waiting in `poll` slices. `None` means stop, end of
/// stream or a vanished producer.
fn pop_blocking<T>(rx: &Receiver<Envelope<T>>, stop: &StopFlag, poll: Duration) -> Option<T> {
    loop {
        match rx.recv_timeout(poll) {
            Ok(Envelope::Item(item)) => return Some(item),
            Ok(Envelope::EndOfStream) => return None,
            Err(RecvTimeoutError::Timeout) => {
                if stop.is_raised() {
                    return None;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}

fn read_frames<S: FrameSource>(
    mut source: S,
    tx: Sender<Envelope<Frame>>,
    stop: &StopFlag,
    poll: Duration,
) -> ReaderOutcome {
    let _span = tracing::info_span!("pipeline.reader").entered();
    let mut outcome = ReaderOutcome::default();

    while !stop.is_raised() {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(frames = outcome.frames_read, "source exhausted");
                break;
            }
            Err(err) => {
                error!("Frame read failed: {err}");
                outcome.failure = Some(format!("frame read failed: {err}"));
                break;
            }
        };
        if !push_blocking(&tx, Envelope::Item(frame), stop, poll) {
            break;
        }
        outcome.frames_read += 1;
        metrics::gauge!("stream_queue_depth", "queue" => "input").set(tx.len() as f64);
    }

    if stop.is_raised() {
        debug!("Stopped reading frames");
    }
    // Blocks until the scheduler takes it or drops its receiver.
    let _ = tx.send(Envelope::EndOfStream);
    outcome
}

enum InferenceFailure {
    Encode(anyhow::Error),
    Call(InferenceError),
}

fn infer_frame(
    client: &dyn InferenceClient,
    frame: &Frame,
    config: &PipelineConfig,
) -> Result<InferenceResult, InferenceFailure> {
    let image = frame.to_image().ok_or_else(|| {
        InferenceFailure::Encode(anyhow!(
            "frame buffer does not match {}x{}",
            frame.width,
            frame.height
        ))
    })?;

    match config.model_aspect_ratio {
        None => {
            let jpeg = crop::encode_jpeg(&image, config.jpeg_quality)
                .map_err(|err| InferenceFailure::Encode(err.into()))?;
            client.infer(&jpeg).map_err(InferenceFailure::Call)
        }
        Some(ratio) => {
            let cropped = crop::crop_to_aspect(&image, ratio)
                .map_err(|err| InferenceFailure::Encode(err.into()))?;
            let jpeg = crop::encode_jpeg(&cropped.image, config.jpeg_quality)
                .map_err(|err| InferenceFailure::Encode(err.into()))?;
            let result = client.infer(&jpeg).map_err(InferenceFailure::Call)?;
            Ok(result.map_boxes(|bbox| normalize_roi(bbox, &cropped.maps.to_source)))
        }
    }
}

fn schedule(
    rx: Receiver<Envelope<Frame>>,
    tx: Sender<Envelope<PendingFrame>>,
    client: &dyn InferenceClient,
    config: &PipelineConfig,
    stop: &StopFlag,
) -> SchedulerOutcome {
    let _span = tracing::info_span!("pipeline.scheduler", infer_every = config.infer_every).entered();
    let mut outcome = SchedulerOutcome::default();
    let mut current = Arc::new(InferenceResult::empty());
    let mut index: u64 = 0;

    while let Some(frame) = pop_blocking(&rx, stop, config.poll_interval) {
        if stop.is_raised() {
            break;
        }

        if index % config.infer_every == 0 {
            let started = Instant::now();
            let attempt = tracing::info_span!("inference", frame = index)
                .in_scope(|| infer_frame(client, &frame, config));
            match attempt {
                Ok(result) => {
                    outcome.inference_calls += 1;
                    metrics::counter!("stream_inference_calls_total").increment(1);
                    metrics::histogram!("stream_inference_seconds")
                        .record(started.elapsed().as_secs_f64());
                    debug!(frame = index, predictions = result.len(), "inference result");
                    current = Arc::new(result);
                }
                Err(InferenceFailure::Encode(err)) => {
                    metrics::counter!("stream_frame_errors_total", "stage" => "scheduler")
                        .increment(1);
                    warn!(frame = index, "Could not prepare frame for inference: {err:#}");
                }
                Err(InferenceFailure::Call(err)) => {
                    outcome.inference_calls += 1;
                    outcome.inference_failures += 1;
                    metrics::counter!("stream_inference_calls_total").increment(1);
                    metrics::counter!("stream_inference_failures_total").increment(1);
                    match config.failure_policy {
                        InferenceFailurePolicy::FailRun => {
                            error!(frame = index, "Inference failed, stopping run: {err}");
                            outcome.failure = Some(format!("inference failed: {err}"));
                            stop.raise();
                            break;
                        }
                        InferenceFailurePolicy::ReuseLast => {
                            warn!(frame = index, "Inference failed, reusing last result: {err}");
                        }
                    }
                }
            }
        }

        let pending = PendingFrame {
            index,
            frame,
            result: Arc::clone(&current),
        };
        index += 1;
        if !push_blocking(&tx, Envelope::Item(pending), stop, config.poll_interval) {
            break;
        }
        outcome.frames_scheduled += 1;
        metrics::gauge!("stream_queue_depth", "queue" => "output").set(tx.len() as f64);
    }

    let _ = tx.send(Envelope::EndOfStream);
    outcome
}

fn annotate(
    renderer: &AnnotationRenderer,
    frame: Frame,
    result: &InferenceResult,
    quality: u8,
) -> Result<Vec<u8>> {
    let (width, height) = (frame.width, frame.height);
    let mut image = frame
        .into_image()
        .ok_or_else(|| anyhow!("frame buffer does not match {width}x{height}"))?;
    let summary = renderer.render(&mut image, result);
    tracing::trace!(tags = summary.tags, boxes = summary.boxes, "frame annotated");
    crop::encode_jpeg(&image, quality).context("JPEG encode failed")
}

fn write_frames<K: FrameSink>(
    rx: Receiver<Envelope<PendingFrame>>,
    mut sink: K,
    renderer: &AnnotationRenderer,
    quality: u8,
    stop: &StopFlag,
    poll: Duration,
) -> WriterOutcome {
    let _span = tracing::info_span!("pipeline.writer").entered();
    let mut outcome = WriterOutcome::default();

    while let Some(PendingFrame {
        index,
        frame,
        result,
    }) = pop_blocking(&rx, stop, poll)
    {
        if stop.is_raised() {
            break;
        }
        let jpeg = match annotate(renderer, frame, &result, quality) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                outcome.frames_skipped += 1;
                metrics::counter!("stream_frame_errors_total", "stage" => "writer").increment(1);
                warn!(frame = index, "Skipping frame: {err:#}");
                continue;
            }
        };
        if let Err(err) = sink.write_frame(&jpeg) {
            if stop.is_raised() {
                debug!(frame = index, "Egress closed after stop: {err:#}");
                break;
            }
            error!(frame = index, "Egress write failed: {err:#}");
            outcome.failure = Some(format!("egress write failed: {err:#}"));
            stop.raise();
            break;
        }
        outcome.frames_written += 1;
        metrics::counter!("stream_frames_written_total").increment(1);
    }

    if let Err(err) = sink.finish() {
        warn!("Failed to close egress sink: {err:#}");
    }
    info!(
        written = outcome.frames_written,
        skipped = outcome.frames_skipped,
        stopped = stop.is_raised(),
        "Writer finished"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicBool, AtomicU64, Ordering},
        },
        thread,
    };

    use image::{Rgb, RgbImage};
    use ml_core::{BoundingBox, Prediction};
    use video_io::CaptureError;

    use super::*;

    fn solid_frame(value: u8) -> Frame {
        Frame::from_image(RgbImage::from_pixel(32, 24, Rgb([value, value, value])), 0)
    }

    struct VecSource {
        frames: VecDeque<Frame>,
        delay: Duration,
    }

    impl VecSource {
        fn new(count: usize) -> Self {
            Self {
                frames: (0..count).map(|i| solid_frame((i * 4 % 256) as u8)).collect(),
                delay: Duration::ZERO,
            }
        }

        fn paced(count: usize, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(count)
            }
        }
    }

    impl FrameSource for VecSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            Ok(self.frames.pop_front())
        }
    }

    struct EndlessSource;

    impl FrameSource for EndlessSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
            thread::sleep(Duration::from_millis(2));
            Ok(Some(solid_frame(9)))
        }
    }

    #[derive(Default)]
    struct ScriptedClient {
        calls: AtomicU64,
        fail: bool,
        empty: bool,
        detection: Option<BoundingBox>,
    }

    impl InferenceClient for ScriptedClient {
        fn infer(&self, jpeg: &[u8]) -> Result<InferenceResult, InferenceError> {
            assert!(jpeg.starts_with(&[0xff, 0xd8]));
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(InferenceError::Other("service unavailable".into()));
            }
            if self.empty {
                return Ok(InferenceResult::empty());
            }
            let prediction = match self.detection {
                Some(bbox) => Prediction::Detection {
                    label: format!("call-{call}"),
                    score: 0.9,
                    bbox,
                },
                None => Prediction::Classification {
                    label: format!("call-{call}"),
                    score: 0.9,
                },
            };
            Ok(InferenceResult::new(vec![prediction]))
        }
    }

    #[derive(Clone, Default)]
    struct CollectSink {
        frames: Arc<Mutex<Vec<(Instant, Vec<u8>)>>>,
        finished: Arc<AtomicBool>,
        delay: Duration,
    }

    impl FrameSink for CollectSink {
        fn write_frame(&mut self, jpeg: &[u8]) -> Result<()> {
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            self.frames
                .lock()
                .unwrap()
                .push((Instant::now(), jpeg.to_vec()));
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct BrokenSink;

    impl FrameSink for BrokenSink {
        fn write_frame(&mut self, _jpeg: &[u8]) -> Result<()> {
            Err(anyhow!("broken pipe"))
        }
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            poll_interval: Duration::from_millis(5),
            ..PipelineConfig::default()
        }
    }

    fn pipeline(config: PipelineConfig, client: Arc<ScriptedClient>) -> FramePipeline {
        FramePipeline::new(config, client, Arc::new(OverlayStyle::default()))
    }

    fn label_of(result: &InferenceResult) -> Option<String> {
        result.predictions().first().map(|p| p.label().to_string())
    }

    #[test]
    fn scheduler_reuses_the_latest_result_between_calls() {
        let client = ScriptedClient::default();
        let config = test_config();
        let (in_tx, in_rx) = crossbeam_channel::bounded(64);
        let (out_tx, out_rx) = crossbeam_channel::bounded(64);
        for i in 0..25 {
            in_tx.send(Envelope::Item(solid_frame(i as u8))).unwrap();
        }
        in_tx.send(Envelope::EndOfStream).unwrap();

        let outcome = schedule(in_rx, out_tx, &client, &config, &StopFlag::new());
        assert_eq!(outcome.inference_calls, 3);
        assert_eq!(outcome.frames_scheduled, 25);
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);

        let mut seen = 0;
        for envelope in out_rx.iter() {
            match envelope {
                Envelope::Item(pending) => {
                    assert_eq!(pending.index, seen);
                    let expected = format!("call-{}", seen / 10);
                    assert_eq!(label_of(&pending.result).as_deref(), Some(expected.as_str()));
                    seen += 1;
                }
                Envelope::EndOfStream => break,
            }
        }
        assert_eq!(seen, 25);
    }

    #[test]
    fn inference_runs_once_per_interval_over_a_whole_run() {
        for (frames, expected_calls) in [(1, 1), (10, 1), (11, 2), (47, 5)] {
            let client = Arc::new(ScriptedClient {
                empty: true,
                ..ScriptedClient::default()
            });
            let sink = CollectSink::default();
            let report = pipeline(test_config(), client.clone())
                .spawn(VecSource::new(frames), sink.clone(), StopFlag::new())
                .unwrap()
                .join();
            assert_eq!(report.inference_calls, expected_calls, "{frames} frames");
            assert_eq!(report.frames_written, frames as u64);
            assert_eq!(report.failure, None);
            assert!(!report.stopped);
            assert!(sink.finished.load(Ordering::SeqCst));
        }
    }

    #[test]
    fn frames_survive_backpressure_in_order() {
        let config = PipelineConfig {
            input_capacity: 2,
            output_capacity: 1,
            ..test_config()
        };
        let client = Arc::new(ScriptedClient {
            empty: true,
            ..ScriptedClient::default()
        });
        let sink = CollectSink {
            delay: Duration::from_millis(3),
            ..CollectSink::default()
        };
        let report = pipeline(config, client)
            .spawn(VecSource::new(50), sink.clone(), StopFlag::new())
            .unwrap()
            .join();

        assert_eq!(report.frames_read, 50);
        assert_eq!(report.frames_written, 50);
        let frames = sink.frames.lock().unwrap();
        for (i, (_, jpeg)) in frames.iter().enumerate() {
            let decoded = image::load_from_memory(jpeg).unwrap().to_rgb8();
            let value = decoded.get_pixel(16, 12).0[0];
            let expected = (i * 4 % 256) as u8;
            assert!(value.abs_diff(expected) <= 3, "frame {i}: {value} vs {expected}");
        }
    }

    #[test]
    fn detections_are_mapped_back_through_the_crop() {
        let bbox = BoundingBox::full();
        let client = ScriptedClient {
            detection: Some(bbox),
            ..ScriptedClient::default()
        };
        let config = PipelineConfig {
            model_aspect_ratio: Some(1.0),
            ..test_config()
        };
        let frame = solid_frame(100);
        let expected = {
            let cropped = crop::crop_to_aspect(&frame.to_image().unwrap(), 1.0).unwrap();
            normalize_roi(&bbox, &cropped.maps.to_source)
        };

        let result = infer_frame(&client, &frame, &config).ok().unwrap();
        assert_eq!(result.predictions()[0].bbox(), Some(&expected));
        assert!(expected.xmin > 0.0 && expected.xmax < 1.0);
    }

    #[test]
    fn failed_inference_stops_the_run_by_default() {
        let client = Arc::new(ScriptedClient {
            fail: true,
            ..ScriptedClient::default()
        });
        let stop = StopFlag::new();
        let report = pipeline(test_config(), client.clone())
            .spawn(VecSource::new(30), CollectSink::default(), stop.clone())
            .unwrap()
            .join();
        assert!(stop.is_raised());
        assert!(report.stopped);
        assert_eq!(report.inference_failures, 1);
        assert!(report.failure.unwrap().contains("inference failed"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_inference_can_reuse_the_previous_result() {
        let config = PipelineConfig {
            failure_policy: InferenceFailurePolicy::ReuseLast,
            ..test_config()
        };
        let client = Arc::new(ScriptedClient {
            fail: true,
            ..ScriptedClient::default()
        });
        let report = pipeline(config, client)
            .spawn(VecSource::new(30), CollectSink::default(), StopFlag::new())
            .unwrap()
            .join();
        assert_eq!(report.frames_written, 30);
        assert_eq!(report.inference_failures, 3);
        assert_eq!(report.failure, None);
    }

    #[test]
    fn stop_flag_ends_an_endless_run() {
        let client = Arc::new(ScriptedClient {
            empty: true,
            ..ScriptedClient::default()
        });
        let stop = StopFlag::new();
        let run = pipeline(test_config(), client)
            .spawn(EndlessSource, CollectSink::default(), stop.clone())
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(!run.is_finished());

        stop.raise();
        let report = run.join();
        assert!(report.stopped);
        assert!(report.frames_read > 0);
        assert!(report.frames_written <= report.frames_read);
    }

    #[test]
    fn broken_sink_stops_the_run() {
        let client = Arc::new(ScriptedClient {
            empty: true,
            ..ScriptedClient::default()
        });
        let report = pipeline(test_config(), client)
            .spawn(EndlessSource, BrokenSink, StopFlag::new())
            .unwrap()
            .join();
        assert!(report.stopped);
        assert_eq!(report.frames_written, 0);
        assert!(report.failure.unwrap().contains("broken pipe"));
    }

    #[test]
    fn output_rate_follows_a_paced_source() {
        let client = Arc::new(ScriptedClient {
            empty: true,
            ..ScriptedClient::default()
        });
        let sink = CollectSink::default();
        pipeline(test_config(), client)
            .spawn(
                VecSource::paced(60, Duration::from_millis(40)),
                sink.clone(),
                StopFlag::new(),
            )
            .unwrap()
            .join();

        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 60);
        let span = frames[59].0.duration_since(frames[0].0).as_secs_f64();
        let fps = 59.0 / span;
        assert!((20.0..=30.0).contains(&fps), "measured {fps:.1} fps");
    }
}
