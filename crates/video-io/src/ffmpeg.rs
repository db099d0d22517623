use std::{
    io::{self, ErrorKind, Read},
    path::PathBuf,
    process::{Child, ChildStdout, Command, Stdio},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    FrameSource,
    types::{CaptureError, Frame},
};

/// Ingress transport inferred from a resolved stream URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// Local V4L devices.
    Device,
    /// Real-time streaming protocol feeds.
    Rtsp,
    /// Files and progressive HTTP media.
    Media,
}

impl SourceKind {
    pub fn from_uri(uri: &str) -> Self {
        if uri.starts_with("rtsp://") || uri.starts_with("rtsps://") {
            SourceKind::Rtsp
        } else if parse_device_index(uri).is_some() {
            SourceKind::Device
        } else {
            SourceKind::Media
        }
    }

    /// Live transports already deliver frames at their native rate.
    pub fn is_live(self) -> bool {
        matches!(self, SourceKind::Device | SourceKind::Rtsp)
    }
}

pub fn parse_device_index(uri: &str) -> Option<u32> {
    if let Ok(index) = uri.parse::<u32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<u32>().ok();
        }
    }
    None
}

#[derive(Clone, Debug)]
pub struct DecodeOptions {
    pub ffmpeg: PathBuf,
    /// Throttle non-live inputs to their native frame rate (`-re`).
    pub native_rate: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            native_rate: true,
        }
    }
}

/// Build the ffmpeg invocation decoding `uri` into raw RGB24 frames of
/// `target_size` on stdout.
pub fn decode_command(uri: &str, target_size: (u32, u32), options: &DecodeOptions) -> Command {
    let kind = SourceKind::from_uri(uri);
    let scale_arg = format!("scale={}:{}", target_size.0, target_size.1);

    let mut cmd = Command::new(&options.ffmpeg);
    cmd.arg("-hide_banner").arg("-loglevel").arg("error");

    match kind {
        SourceKind::Rtsp => {
            cmd.arg("-rtsp_transport")
                .arg("tcp")
                .arg("-fflags")
                .arg("nobuffer")
                .arg("-flags")
                .arg("low_delay");
        }
        SourceKind::Device => {
            cmd.arg("-f").arg("video4linux2");
        }
        SourceKind::Media => {}
    }
    if options.native_rate && !kind.is_live() {
        cmd.arg("-re");
    }

    let input = match (kind, parse_device_index(uri)) {
        (SourceKind::Device, Some(index)) => format!("/dev/video{index}"),
        _ => uri.to_string(),
    };

    cmd.arg("-i")
        .arg(input)
        .arg("-an")
        .arg("-vf")
        .arg(&scale_arg)
        .arg("-pix_fmt")
        .arg("rgb24")
        .arg("-f")
        .arg("rawvideo")
        .arg("-");
    cmd
}

/// Kills the decoder of an [`FfmpegSource`] from another thread.
///
/// A reader blocked on a stalled decoder sees end of stream once the process
/// is gone.
#[derive(Clone)]
pub struct DecoderHandle {
    child: Arc<Mutex<Child>>,
}

impl DecoderHandle {
    pub fn kill(&self) -> io::Result<()> {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        match child.kill() {
            Err(err) if err.kind() != ErrorKind::InvalidInput => Err(err),
            _ => Ok(()),
        }
    }
}

/// Pull-based frame source backed by an ffmpeg decoder subprocess.
///
/// The subprocess is killed and reaped when the source is dropped.
pub struct FfmpegSource {
    child: Arc<Mutex<Child>>,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    buffer: Vec<u8>,
    exhausted: bool,
}

impl FfmpegSource {
    pub fn spawn(
        uri: &str,
        target_size: (u32, u32),
        options: &DecodeOptions,
    ) -> Result<Self, CaptureError> {
        let mut cmd = decode_command(uri, target_size, options);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|source| CaptureError::Spawn {
            program: options.ffmpeg.clone(),
            source,
        })?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::Open {
                    uri: uri.to_string(),
                });
            }
        };

        debug!(
            uri,
            width = target_size.0,
            height = target_size.1,
            pid = child.id(),
            "decoder started"
        );

        Ok(Self {
            child: Arc::new(Mutex::new(child)),
            stdout,
            width: target_size.0,
            height: target_size.1,
            buffer: vec![0u8; Frame::byte_len(target_size.0, target_size.1)],
            exhausted: false,
        })
    }

    pub fn handle(&self) -> DecoderHandle {
        DecoderHandle {
            child: Arc::clone(&self.child),
        }
    }

    fn child(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        if self.exhausted {
            return Ok(None);
        }
        match self.stdout.read_exact(&mut self.buffer) {
            Ok(()) => Ok(Some(Frame {
                data: self.buffer.clone(),
                width: self.width,
                height: self.height,
                timestamp_ms: Utc::now().timestamp_millis(),
            })),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                self.exhausted = true;
                match self.child().try_wait() {
                    Ok(Some(status)) if !status.success() => {
                        warn!(%status, "decoder exited with failure");
                    }
                    _ => {}
                }
                Ok(None)
            }
            Err(err) => {
                self.exhausted = true;
                Err(CaptureError::Io(err))
            }
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        let mut child = self.child();
        let _ = child.kill();
        let _ = child.wait();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        os::unix::fs::PermissionsExt,
        path::Path,
        sync::mpsc,
        thread,
        time::Duration,
    };

    use super::*;

    /// Executable stand-in for ffmpeg running `body` under `sh`.
    fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("ffmpeg");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        // A concurrent fork may still hold the write descriptor.
        for _ in 0..100 {
            match Command::new(&path).arg("-version").spawn() {
                Ok(mut child) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return path;
                }
                Err(err) if err.raw_os_error() == Some(libc::ETXTBSY) => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(err) => panic!("cannot run {}: {err}", path.display()),
            }
        }
        panic!("{} stayed busy", path.display());
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn source_kind_from_uri() {
        assert_eq!(SourceKind::from_uri("rtsp://cam/1"), SourceKind::Rtsp);
        assert_eq!(SourceKind::from_uri("/dev/video2"), SourceKind::Device);
        assert_eq!(SourceKind::from_uri("0"), SourceKind::Device);
        assert_eq!(
            SourceKind::from_uri("https://cdn.example/v.mp4"),
            SourceKind::Media
        );
        assert_eq!(SourceKind::from_uri("/dev/videox"), SourceKind::Media);
    }

    #[test]
    fn media_sources_are_read_at_native_rate() {
        let cmd = decode_command(
            "https://cdn.example/v.mp4",
            (640, 360),
            &DecodeOptions::default(),
        );
        let args = args(&cmd);
        assert_eq!(args[3], "-re");
        let scale = args.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args[scale + 1], "scale=640:360");
        assert_eq!(args.last().map(String::as_str), Some("-"));
        assert!(args.contains(&"rgb24".to_string()));
    }

    #[test]
    fn devices_use_v4l_without_throttling() {
        let cmd = decode_command("1", (320, 240), &DecodeOptions::default());
        let args = args(&cmd);
        assert!(!args.contains(&"-re".to_string()));
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input + 1], "/dev/video1");
        assert_eq!(args[input - 1], "video4linux2");
    }

    #[test]
    fn live_sources_are_never_throttled() {
        assert!(SourceKind::Rtsp.is_live());
        assert!(!SourceKind::Media.is_live());
        let args = args(&decode_command(
            "rtsp://cam/1",
            (320, 240),
            &DecodeOptions::default(),
        ));
        assert!(!args.contains(&"-re".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-rtsp_transport" && w[1] == "tcp"));
    }

    #[test]
    fn killing_the_handle_unblocks_a_stalled_read() {
        let dir = tempfile::tempdir().unwrap();
        let options = DecodeOptions {
            ffmpeg: fake_ffmpeg(dir.path(), "exec sleep 60"),
            native_rate: false,
        };
        let mut source = FfmpegSource::spawn("rtsp://dead/feed", (8, 8), &options).unwrap();
        let handle = source.handle();

        let (tx, rx) = mpsc::channel();
        let reader = thread::spawn(move || {
            let _ = tx.send(source.next_frame().map(|frame| frame.is_some()));
        });
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        handle.kill().unwrap();
        let read = rx.recv_timeout(Duration::from_secs(5)).expect("reader still blocked");
        assert!(matches!(read, Ok(false)));
        reader.join().unwrap();
        handle.kill().unwrap();
    }

    #[test]
    fn spawn_failure_names_the_program() {
        let options = DecodeOptions {
            ffmpeg: PathBuf::from("/nonexistent/ffmpeg-binary"),
            native_rate: false,
        };
        match FfmpegSource::spawn("file.mp4", (8, 8), &options) {
            Err(CaptureError::Spawn { program, .. }) => assert_eq!(program, options.ffmpeg),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawn should fail"),
        }
    }
}
