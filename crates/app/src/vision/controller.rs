//! Single-flight supervision of pipeline runs.
//!
//! Every `start` supersedes the previous request: the current run is asked to
//! stop and a supervisor thread waits until no run is active before starting
//! the new one. A supervisor that is itself superseded while waiting never
//! starts its run, so at most one run is active at any time.

use std::{
    collections::{HashMap, HashSet},
    io,
    path::PathBuf,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{error, info, warn};
use video_io::{
    DecodeOptions, FfmpegSource, Transcoder, TranscoderConfig, prepare_fifo, remove_conduit,
};

use crate::vision::{
    config::EgressConfig,
    data::StopFlag,
    egress::FifoSink,
    pipeline::{FramePipeline, PipelineReport},
    resolver::{ResolveError, SourceResolver, StreamMetadata},
    telemetry,
};

#[derive(Debug, Error)]
pub(crate) enum StartError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("failed to spawn run supervisor: {0}")]
    Spawn(#[source] io::Error),
}

/// Executes one run to completion while observing `stop`.
pub(crate) trait RunBackend: Send + Sync {
    fn run(&self, metadata: &StreamMetadata, stop: &StopFlag) -> Result<PipelineReport>;
}

#[derive(Default)]
struct ControllerState {
    metadata: HashMap<String, StreamMetadata>,
    /// Sources currently being resolved outside the lock.
    resolving: HashSet<String>,
    active_runs: usize,
    /// Supervisors spawned and not yet exited, active ones included.
    supervisors: usize,
    current: Option<StopFlag>,
}

struct Shared {
    state: Mutex<ControllerState>,
    changed: Condvar,
    resolver: Box<dyn SourceResolver>,
    backend: Box<dyn RunBackend>,
}

#[derive(Clone)]
pub(crate) struct PipelineController {
    shared: Arc<Shared>,
}

impl PipelineController {
    pub(crate) fn new(resolver: Box<dyn SourceResolver>, backend: Box<dyn RunBackend>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ControllerState::default()),
                changed: Condvar::new(),
                resolver,
                backend,
            }),
        }
    }

    /// Resolve `source`, supersede the current run and schedule a new one.
    ///
    /// Returns as soon as the metadata is known; the run itself starts on a
    /// supervisor thread once the previous run has wound down.
    pub(crate) fn start(&self, source: &str) -> Result<StreamMetadata, StartError> {
        let metadata = self.shared.resolve(source)?;
        let stop = StopFlag::new();
        {
            let mut state = self.shared.lock();
            if let Some(previous) = state.current.replace(stop.clone()) {
                previous.raise();
            }
            state.supervisors += 1;
        }
        self.shared.changed.notify_all();

        let shared = Arc::clone(&self.shared);
        let run_metadata = metadata.clone();
        let run_stop = stop.clone();
        if let Err(err) = telemetry::spawn_thread("stream-supervisor", move || {
            shared.supervise(run_metadata, run_stop)
        }) {
            let mut state = self.shared.lock();
            state.supervisors -= 1;
            if state.current.as_ref().is_some_and(|current| current.same_as(&stop)) {
                state.current = None;
            }
            drop(state);
            self.shared.changed.notify_all();
            return Err(StartError::Spawn(err));
        }

        info!(source, video_url = %metadata.video_url, "run requested");
        Ok(metadata)
    }

    /// Cached metadata for `source`, resolving it on first use.
    pub(crate) fn metadata(&self, source: &str) -> Result<StreamMetadata, ResolveError> {
        self.shared.resolve(source)
    }

    /// Ask the current run, if any, to stop.
    pub(crate) fn stop(&self) {
        let current = self.shared.lock().current.take();
        if let Some(stop) = current {
            stop.raise();
            self.shared.changed.notify_all();
        }
    }

    pub(crate) fn active_runs(&self) -> usize {
        self.shared.lock().active_runs
    }

    /// Whether any supervisor is still waiting or running.
    pub(crate) fn is_busy(&self) -> bool {
        self.shared.lock().supervisors > 0
    }

    /// Block until every supervisor has exited, or `timeout` elapsed.
    ///
    /// Returns `true` when the controller went idle.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .changed
            .wait_timeout_while(state, timeout, |state| state.supervisors > 0)
            .unwrap_or_else(PoisonError::into_inner);
        state.supervisors == 0
    }

    /// Stop the current run and wait for every supervisor to exit.
    pub(crate) fn shutdown(&self, timeout: Duration) -> bool {
        self.stop();
        self.wait_idle(timeout)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Memoized resolution. The resolver runs without the lock held; concurrent
    /// callers for the same source wait for the one already resolving it.
    fn resolve(&self, source: &str) -> Result<StreamMetadata, ResolveError> {
        {
            let mut state = self
                .changed
                .wait_while(self.lock(), |state| {
                    !state.metadata.contains_key(source) && state.resolving.contains(source)
                })
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(metadata) = state.metadata.get(source) {
                return Ok(metadata.clone());
            }
            state.resolving.insert(source.to_string());
        }

        let _marker = Resolving { shared: self, source };
        let metadata = self.resolver.resolve(source)?;
        self.lock().metadata.insert(source.to_string(), metadata.clone());
        Ok(metadata)
    }

    fn supervise(&self, metadata: StreamMetadata, stop: StopFlag) {
        let _span = tracing::info_span!("supervisor", video_url = %metadata.video_url).entered();
        let _slot = SupervisorSlot { shared: self, stop: &stop };

        {
            let state = self.lock();
            let mut state = self
                .changed
                .wait_while(state, |state| state.active_runs > 0 && !stop.is_raised())
                .unwrap_or_else(PoisonError::into_inner);
            if stop.is_raised() {
                info!("superseded before starting");
                return;
            }
            state.active_runs += 1;
            metrics::gauge!("stream_runs_active").set(state.active_runs as f64);
        }
        let _active = ActiveRun { shared: self };

        info!("run started");
        match self.backend.run(&metadata, &stop) {
            Ok(report) => info!(
                frames_read = report.frames_read,
                frames_scheduled = report.frames_scheduled,
                frames_written = report.frames_written,
                frames_skipped = report.frames_skipped,
                inference_calls = report.inference_calls,
                inference_failures = report.inference_failures,
                stopped = report.stopped,
                failure = report.failure.as_deref().unwrap_or(""),
                "run finished"
            ),
            Err(err) => error!("run failed: {err:#}"),
        }
    }
}

/// Clears the in-flight marker of a resolution, successful or not.
struct Resolving<'a> {
    shared: &'a Shared,
    source: &'a str,
}

impl Drop for Resolving<'_> {
    fn drop(&mut self) {
        self.shared.lock().resolving.remove(self.source);
        self.shared.changed.notify_all();
    }
}

/// Releases the active-run slot, including when the backend panics.
struct ActiveRun<'a> {
    shared: &'a Shared,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.active_runs = state.active_runs.saturating_sub(1);
        metrics::gauge!("stream_runs_active").set(state.active_runs as f64);
        drop(state);
        self.shared.changed.notify_all();
    }
}

struct SupervisorSlot<'a> {
    shared: &'a Shared,
    stop: &'a StopFlag,
}

impl Drop for SupervisorSlot<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.supervisors = state.supervisors.saturating_sub(1);
        if state.current.as_ref().is_some_and(|current| current.same_as(self.stop)) {
            state.current = None;
        }
        drop(state);
        self.shared.changed.notify_all();
    }
}

/// Decoder, pipeline, FIFO and transcoder wired for one run.
pub(crate) struct FfmpegBackend {
    pipeline: FramePipeline,
    decode: DecodeOptions,
    egress: EgressConfig,
}

impl FfmpegBackend {
    pub(crate) fn new(pipeline: FramePipeline, decode: DecodeOptions, egress: EgressConfig) -> Self {
        Self {
            pipeline,
            decode,
            egress,
        }
    }

    fn transcoder_config(&self) -> TranscoderConfig {
        TranscoderConfig {
            ffmpeg: self.egress.ffmpeg.clone(),
            conduit: self.egress.conduit.clone(),
            output_url: self.egress.output_url.clone(),
        }
    }

    fn drive(
        &self,
        metadata: &StreamMetadata,
        stop: &StopFlag,
        transcoder: &mut Transcoder,
    ) -> Result<PipelineReport> {
        let config = self.pipeline.config();
        let source = FfmpegSource::spawn(&metadata.video_url, config.frame_size, &self.decode)
            .with_context(|| format!("Failed to open {}", metadata.video_url))?;
        let decoder = source.handle();
        let sink = FifoSink::new(self.egress.conduit.clone(), stop.clone(), config.poll_interval);
        let run = self.pipeline.spawn(source, sink, stop.clone())?;

        let mut stop_seen: Option<Instant> = None;
        let mut transcoder_gone = false;
        let mut killed = false;
        while !run.is_finished() {
            thread::sleep(config.poll_interval);
            if !transcoder_gone {
                match transcoder.try_status() {
                    Ok(Some(status)) => {
                        warn!(%status, "transcoder exited, stopping run");
                        transcoder_gone = true;
                        stop.raise();
                    }
                    Ok(None) => {}
                    Err(err) => warn!("could not poll transcoder: {err}"),
                }
            }
            if stop.is_raised() && !killed {
                let since = *stop_seen.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.egress.stop_grace {
                    warn!("workers still busy after stop, killing decoder and transcoder");
                    if let Err(err) = decoder.kill() {
                        warn!("could not kill decoder: {err}");
                    }
                    if !transcoder_gone {
                        if let Err(err) = transcoder.terminate() {
                            warn!("could not kill transcoder: {err}");
                        }
                        transcoder_gone = true;
                    }
                    killed = true;
                }
            }
        }
        Ok(run.join())
    }
}

impl RunBackend for FfmpegBackend {
    fn run(&self, metadata: &StreamMetadata, stop: &StopFlag) -> Result<PipelineReport> {
        let _span = tracing::info_span!("pipeline.run", source = %metadata.video_url).entered();
        let conduit: &PathBuf = &self.egress.conduit;

        prepare_fifo(conduit)?;
        let mut transcoder = match Transcoder::spawn(&self.transcoder_config()) {
            Ok(transcoder) => transcoder,
            Err(err) => {
                let _ = remove_conduit(conduit);
                return Err(err.into());
            }
        };
        info!(pid = ?transcoder.id(), output = %self.egress.output_url, "transcoder started");

        let outcome = self.drive(metadata, stop, &mut transcoder);

        match transcoder.terminate() {
            Ok(status) => info!(?status, "transcoder stopped"),
            Err(err) => warn!("could not stop transcoder: {err}"),
        }
        if let Err(err) = remove_conduit(conduit) {
            warn!("could not remove {}: {err}", conduit.display());
        }
        outcome
    }
}
