use std::{
    fs::File,
    io::Write,
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use tracing::debug;
use video_io::open_fifo_writer;

use crate::vision::{data::StopFlag, pipeline::FrameSink};

/// Writes annotated JPEG frames back to back into the transcoder's FIFO.
///
/// The FIFO is opened on the first frame, once the transcoder had time to
/// attach as reader. Until then the open is retried every `backoff`.
pub(crate) struct FifoSink {
    path: PathBuf,
    stop: StopFlag,
    backoff: Duration,
    file: Option<File>,
}

impl FifoSink {
    pub(crate) fn new(path: PathBuf, stop: StopFlag, backoff: Duration) -> Self {
        Self {
            path,
            stop,
            backoff,
            file: None,
        }
    }

    fn writer(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            let stop = self.stop.clone();
            let opened = open_fifo_writer(&self.path, self.backoff, || stop.is_raised())
                .with_context(|| format!("Failed to open {}", self.path.display()))?;
            match opened {
                Some(file) => {
                    debug!(path = %self.path.display(), "egress conduit attached");
                    self.file = Some(file);
                }
                None => bail!("stopped before a reader attached to {}", self.path.display()),
            }
        }
        self.file
            .as_mut()
            .context("egress conduit is not open")
    }
}

impl FrameSink for FifoSink {
    fn write_frame(&mut self, jpeg: &[u8]) -> Result<()> {
        let path = self.path.clone();
        self.writer()?
            .write_all(jpeg)
            .with_context(|| format!("Failed to write frame to {}", path.display()))
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .with_context(|| format!("Failed to flush {}", self.path.display()))?;
        }
        Ok(())
    }
}
