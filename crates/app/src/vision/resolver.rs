//! Turns a user supplied source address into a stream the decoder can open.

use std::{
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use video_io::parse_device_index;

use crate::vision::telemetry;

const DEFAULT_YTDLP_TIMEOUT: Duration = Duration::from_secs(30);
const EXIT_POLL: Duration = Duration::from_millis(50);

/// Playable stream address plus an optional preview image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub(crate) struct StreamMetadata {
    pub(crate) video_url: String,
    pub(crate) thumb_url: Option<String>,
}

#[derive(Debug, Error)]
pub(crate) enum ResolveError {
    #[error("unsupported source {0:?}")]
    Unsupported(String),
    #[error("failed to run {program:?}: {source}")]
    Spawn { program: PathBuf, source: io::Error },
    #[error("{program:?} exited with {status}: {stderr}")]
    Failed {
        program: PathBuf,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{program:?} did not finish within {after:?}")]
    TimedOut { program: PathBuf, after: Duration },
    #[error("unexpected resolver output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("resolver output has no stream url")]
    MissingUrl,
}

pub(crate) trait SourceResolver: Send + Sync {
    fn resolve(&self, source: &str) -> Result<StreamMetadata, ResolveError>;
}

const DIRECT_SCHEMES: &[&str] = &["rtsp://", "rtsps://", "rtmp://", "http://", "https://", "file://"];

/// Accepts addresses ffmpeg can open as they are.
#[derive(Clone, Debug, Default)]
pub(crate) struct DirectResolver;

impl SourceResolver for DirectResolver {
    fn resolve(&self, source: &str) -> Result<StreamMetadata, ResolveError> {
        let source = source.trim();
        let lower = source.to_ascii_lowercase();
        let playable = DIRECT_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
            || parse_device_index(source).is_some()
            || (!source.is_empty() && Path::new(source).exists());
        if !playable {
            return Err(ResolveError::Unsupported(source.to_string()));
        }
        Ok(StreamMetadata {
            video_url: source.to_string(),
            thumb_url: None,
        })
    }
}

/// Asks `yt-dlp` for the direct media url of a video page.
///
/// The process is killed when it has not exited after `timeout`.
#[derive(Clone, Debug)]
pub(crate) struct YtDlpResolver {
    program: PathBuf,
    timeout: Duration,
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new("yt-dlp", DEFAULT_YTDLP_TIMEOUT)
    }
}

#[derive(Deserialize)]
struct YtDlpInfo {
    url: Option<String>,
    thumbnail: Option<String>,
}

impl YtDlpResolver {
    pub(crate) fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn spawn_error(&self, source: io::Error) -> ResolveError {
        ResolveError::Spawn {
            program: self.program.clone(),
            source,
        }
    }

    fn wait_for_exit(&self, child: &mut Child) -> Result<ExitStatus, ResolveError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) if Instant::now() >= deadline => {
                    warn!(program = ?self.program, timeout = ?self.timeout, "resolver timed out, killing it");
                    reap(child);
                    return Err(ResolveError::TimedOut {
                        program: self.program.clone(),
                        after: self.timeout,
                    });
                }
                Ok(None) => thread::sleep(EXIT_POLL),
                Err(err) => {
                    reap(child);
                    return Err(self.spawn_error(err));
                }
            }
        }
    }

    fn command(&self, source: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--dump-single-json")
            .arg("--no-warnings")
            .arg("-f")
            .arg("bestvideo")
            .arg(source);
        cmd
    }
}

impl SourceResolver for YtDlpResolver {
    fn resolve(&self, source: &str) -> Result<StreamMetadata, ResolveError> {
        debug!(source, program = ?self.program, "resolving via yt-dlp");
        let mut child = self
            .command(source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| self.spawn_error(err))?;

        let readers = drain(child.stdout.take())
            .and_then(|stdout| Ok((stdout, drain(child.stderr.take())?)));
        let (stdout, stderr) = match readers {
            Ok(readers) => readers,
            Err(err) => {
                reap(&mut child);
                return Err(self.spawn_error(err));
            }
        };

        let status = self.wait_for_exit(&mut child)?;
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        if !status.success() {
            return Err(ResolveError::Failed {
                program: self.program.clone(),
                status,
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        parse_ytdlp_output(&stdout)
    }
}

/// Collect a child pipe on its own thread so a chatty process never blocks.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> io::Result<thread::JoinHandle<Vec<u8>>> {
    telemetry::spawn_thread("resolver-output", move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        buffer
    })
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn parse_ytdlp_output(stdout: &[u8]) -> Result<StreamMetadata, ResolveError> {
    let info: YtDlpInfo = serde_json::from_slice(stdout)?;
    let video_url = info
        .url
        .filter(|url| !url.is_empty())
        .ok_or(ResolveError::MissingUrl)?;
    Ok(StreamMetadata {
        video_url,
        thumb_url: info.thumbnail,
    })
}

/// Whether `source` points at a YouTube page.
pub(crate) fn is_youtube(source: &str) -> bool {
    let rest = source
        .split_once("://")
        .map_or(source, |(_, rest)| rest)
        .to_ascii_lowercase();
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = host.rsplit_once('@').map_or(host, |(_, host)| host);
    let host = host.split(':').next().unwrap_or_default();
    host == "youtu.be" || host == "youtube.com" || host.ends_with(".youtube.com")
}

/// YouTube pages through yt-dlp, everything else as a direct address.
#[derive(Clone, Debug, Default)]
pub(crate) struct DefaultResolver {
    direct: DirectResolver,
    youtube: YtDlpResolver,
}

impl DefaultResolver {
    pub(crate) fn with_ytdlp(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            direct: DirectResolver,
            youtube: YtDlpResolver::new(program, timeout),
        }
    }
}

impl SourceResolver for DefaultResolver {
    fn resolve(&self, source: &str) -> Result<StreamMetadata, ResolveError> {
        if is_youtube(source) {
            self.youtube.resolve(source)
        } else {
            self.direct.resolve(source)
        }
    }
}
