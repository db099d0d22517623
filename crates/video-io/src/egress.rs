//! Egress side: the named FIFO carrying JPEG frames and the ffmpeg
//! transcoder that republishes them as a continuous stream.

use std::{
    ffi::CString,
    fs::{self, File, OpenOptions},
    io,
    os::unix::{ffi::OsStrExt, fs::OpenOptionsExt, io::AsRawFd},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::Duration,
};

use tracing::{debug, warn};

use crate::types::EgressError;

#[derive(Clone, Debug)]
pub struct TranscoderConfig {
    pub ffmpeg: PathBuf,
    /// FIFO the annotated JPEG frames are written to.
    pub conduit: PathBuf,
    /// Distribution endpoint, e.g. `rtmp://localhost/show/stream`.
    pub output_url: String,
}

/// ffmpeg invocation reading concatenated JPEGs from the conduit and
/// publishing H.264 over FLV.
pub fn transcoder_command(config: &TranscoderConfig) -> Command {
    let mut cmd = Command::new(&config.ffmpeg);
    cmd.arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-re")
        .arg("-f")
        .arg("mjpeg")
        .arg("-probesize")
        .arg("32")
        .arg("-i")
        .arg(&config.conduit)
        .arg("-vcodec")
        .arg("libx264")
        .arg("-vprofile")
        .arg("high444")
        .arg("-g")
        .arg("30")
        .arg("-an")
        .arg("-f")
        .arg("flv")
        .arg(&config.output_url);
    cmd
}

/// Running transcoder subprocess. Killed and reaped on drop.
pub struct Transcoder {
    child: Option<Child>,
}

impl Transcoder {
    pub fn spawn(config: &TranscoderConfig) -> Result<Self, EgressError> {
        let mut cmd = transcoder_command(config);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        let child = cmd.spawn().map_err(|source| EgressError::Spawn {
            program: config.ffmpeg.clone(),
            source,
        })?;
        debug!(pid = child.id(), output = %config.output_url, "transcoder started");
        Ok(Self { child: Some(child) })
    }

    pub fn from_child(child: Child) -> Self {
        Self { child: Some(child) }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Exit status if the process already terminated on its own.
    pub fn try_status(&mut self) -> io::Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => child.try_wait(),
            None => Ok(None),
        }
    }

    /// Kill the process (no-op if it already exited) and wait for it.
    pub fn terminate(&mut self) -> io::Result<Option<ExitStatus>> {
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };
        if child.try_wait()?.is_none() {
            if let Err(err) = child.kill() {
                if err.kind() != io::ErrorKind::InvalidInput {
                    return Err(err);
                }
            }
        }
        child.wait().map(Some)
    }
}

impl Drop for Transcoder {
    fn drop(&mut self) {
        if let Err(err) = self.terminate() {
            warn!("failed to reap transcoder: {err}");
        }
    }
}

/// Remove a conduit left behind by an earlier run. Missing files are fine.
pub fn remove_conduit(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Replace whatever sits at `path` with a fresh FIFO.
pub fn prepare_fifo(path: &Path) -> Result<(), EgressError> {
    let conduit_err = |source| EgressError::Conduit {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(conduit_err)?;
        }
    }
    remove_conduit(path).map_err(conduit_err)?;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|err| conduit_err(io::Error::new(io::ErrorKind::InvalidInput, err)))?;
    // SAFETY: `c_path` is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o644) };
    if rc != 0 {
        return Err(conduit_err(io::Error::last_os_error()));
    }
    Ok(())
}

/// Open the FIFO for writing once a reader is attached.
///
/// Opening a FIFO for writing blocks until a reader shows up; this polls a
/// non-blocking open instead so `should_stop` is observed every `backoff`.
/// Returns `Ok(None)` when asked to stop before a reader appeared. The
/// returned file is switched back to blocking writes.
pub fn open_fifo_writer(
    path: &Path,
    backoff: Duration,
    mut should_stop: impl FnMut() -> bool,
) -> Result<Option<File>, EgressError> {
    loop {
        if should_stop() {
            return Ok(None);
        }
        match OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
        {
            Ok(file) => {
                set_blocking(&file)?;
                return Ok(Some(file));
            }
            Err(err) if err.raw_os_error() == Some(libc::ENXIO) => thread::sleep(backoff),
            Err(source) => {
                return Err(EgressError::Conduit {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }
}

fn set_blocking(file: &File) -> io::Result<()> {
    let fd = file.as_raw_fd();
    // SAFETY: `fd` is owned by `file`, which outlives both calls.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
