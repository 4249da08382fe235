//! Stream aggregation for worker stdout and stderr.
//!
//! Each pipe is drained by its own reader thread into an append-only buffer.
//! Chunks keep their arrival order within a stream; the two streams are
//! independent and no ordering between them is recorded.

use std::{
    borrow::Cow,
    fmt,
    io::{self, Read},
    sync::{Arc, Mutex, MutexGuard, OnceLock, mpsc},
    thread,
    time::{Duration, Instant},
};

use super::WorkerHandle;

const PIPE_CHUNK_SIZE: usize = 8192;

/// Default ceiling for captured stdout (10 MiB).
pub const DEFAULT_MAX_STDOUT_BYTES: u64 = 10 * 1024 * 1024;
/// Default ceiling for captured stderr (1 MiB).
pub const DEFAULT_MAX_STDERR_BYTES: u64 = 1024 * 1024;

/// Identifies one of the worker's output pipes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl OutputStream {
    /// Short lowercase name used in logs and messages.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Byte budgets for captured output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputLimits {
    /// Maximum bytes kept from stdout.
    pub stdout: u64,
    /// Maximum bytes kept from stderr.
    pub stderr: u64,
}

impl OutputLimits {
    const fn for_stream(self, stream: OutputStream) -> u64 {
        match stream {
            OutputStream::Stdout => self.stdout,
            OutputStream::Stderr => self.stderr,
        }
    }
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            stdout: DEFAULT_MAX_STDOUT_BYTES,
            stderr: DEFAULT_MAX_STDERR_BYTES,
        }
    }
}

/// Records that a stream produced more bytes than its budget allows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Overflow {
    /// Stream that exceeded its budget.
    pub stream: OutputStream,
    /// The configured ceiling.
    pub limit: u64,
}

/// Immutable snapshot of both output buffers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Bytes read from stdout.
    pub stdout: Vec<u8>,
    /// Bytes read from stderr.
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    /// Stdout decoded lossily as UTF-8.
    #[must_use]
    pub fn stdout_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// Stderr decoded lossily as UTF-8.
    #[must_use]
    pub fn stderr_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }
}

/// Accumulates a worker's stdout and stderr while it runs.
#[derive(Debug)]
pub struct StreamAggregator {
    stdout: PipeCapture,
    stderr: PipeCapture,
    overflow: Arc<OnceLock<Overflow>>,
}

impl StreamAggregator {
    /// Take the handle's output pipes and start draining them.
    pub fn attach(handle: &mut WorkerHandle, limits: OutputLimits) -> Self {
        let overflow = Arc::new(OnceLock::new());
        let stdout = PipeCapture::spawn(
            handle.take_stdout(),
            PipeLimit::new(OutputStream::Stdout, limits),
            Arc::clone(&overflow),
        );
        let stderr = PipeCapture::spawn(
            handle.take_stderr(),
            PipeLimit::new(OutputStream::Stderr, limits),
            Arc::clone(&overflow),
        );
        Self {
            stdout,
            stderr,
            overflow,
        }
    }

    /// First budget violation observed on either stream, if any.
    #[must_use]
    pub fn overflow(&self) -> Option<Overflow> {
        self.overflow.get().copied()
    }

    /// Wait for both readers to reach end-of-stream and snapshot the buffers.
    ///
    /// A reader still attached after `grace` (for example because a
    /// grandchild inherited the pipe) is detached and whatever it buffered so
    /// far is returned. The second element reports a budget violation seen
    /// at any point, including after the worker exited.
    #[must_use]
    pub fn finish(self, grace: Duration) -> (CapturedOutput, Option<Overflow>) {
        let deadline = Instant::now() + grace;
        let captured = CapturedOutput {
            stdout: self.stdout.finish(OutputStream::Stdout, deadline),
            stderr: self.stderr.finish(OutputStream::Stderr, deadline),
        };
        (captured, self.overflow.get().copied())
    }
}

#[derive(Debug)]
struct PipeCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    reader: Option<(thread::JoinHandle<()>, mpsc::Receiver<()>)>,
}

impl PipeCapture {
    fn spawn<R>(pipe: Option<R>, limit: PipeLimit, overflow: Arc<OnceLock<Overflow>>) -> Self
    where
        R: Read + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let reader = pipe.map(|source| {
            let (done_tx, done_rx) = mpsc::channel();
            let sink = Arc::clone(&buffer);
            let join = thread::spawn(move || {
                drain_pipe(source, limit, &sink, &overflow);
                if done_tx.send(()).is_err() {
                    tracing::trace!("pipe reader finished after the run stopped waiting");
                }
            });
            (join, done_rx)
        });
        Self { buffer, reader }
    }

    fn finish(self, stream: OutputStream, deadline: Instant) -> Vec<u8> {
        if let Some((join, done)) = self.reader {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match done.recv_timeout(remaining) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                    if let Err(join_err) = join.join() {
                        tracing::warn!(
                            stream = stream.describe(),
                            ?join_err,
                            "pipe reader thread panicked"
                        );
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    tracing::debug!(
                        stream = stream.describe(),
                        "pipe still open after worker exit; detaching reader"
                    );
                }
            }
        }
        let mut guard = lock_buffer(&self.buffer);
        std::mem::take(&mut *guard)
    }
}

fn lock_buffer(buffer: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    match buffer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn drain_pipe<R>(
    mut reader: R,
    mut limit: PipeLimit,
    sink: &Mutex<Vec<u8>>,
    overflow: &OnceLock<Overflow>,
) where
    R: Read,
{
    let mut chunk = [0_u8; PIPE_CHUNK_SIZE];
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::debug!(stream = limit.stream.describe(), "pipe read failed: {err}");
                break;
            }
        };
        if let Err(exceeded) = limit.record(read) {
            if overflow.set(exceeded).is_err() {
                tracing::trace!(stream = limit.stream.describe(), "overflow already recorded");
            }
            break;
        }
        let Some(bytes) = chunk.get(..read) else {
            break;
        };
        lock_buffer(sink).extend_from_slice(bytes);
    }
}

struct PipeLimit {
    stream: OutputStream,
    limit: u64,
    consumed: u64,
}

impl PipeLimit {
    const fn new(stream: OutputStream, limits: OutputLimits) -> Self {
        Self {
            stream,
            limit: limits.for_stream(stream),
            consumed: 0,
        }
    }

    fn record(&mut self, read: usize) -> Result<(), Overflow> {
        let exceeded = Overflow {
            stream: self.stream,
            limit: self.limit,
        };
        let bytes = u64::try_from(read).map_err(|_| exceeded)?;
        let total = self.consumed.checked_add(bytes).ok_or(exceeded)?;
        if total > self.limit {
            return Err(exceeded);
        }
        self.consumed = total;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn drain(data: &[u8], limit: u64) -> (Vec<u8>, Option<Overflow>) {
        let sink = Mutex::new(Vec::new());
        let overflow = OnceLock::new();
        let limits = OutputLimits {
            stdout: limit,
            stderr: limit,
        };
        drain_pipe(
            Cursor::new(data.to_vec()),
            PipeLimit::new(OutputStream::Stdout, limits),
            &sink,
            &overflow,
        );
        let captured = lock_buffer(&sink).clone();
        (captured, overflow.get().copied())
    }

    #[test]
    fn drain_collects_bytes_within_limit() {
        let (captured, overflow) = drain(b"LOG: starting\n{\"x\":1}\n", 128);
        assert_eq!(captured, b"LOG: starting\n{\"x\":1}\n");
        assert_eq!(overflow, None);
    }

    #[test]
    fn drain_reports_limit_exceedance() {
        let (captured, overflow) = drain(&[b'z'; 32], 8);
        assert!(captured.is_empty(), "oversized chunk must not be buffered");
        assert_eq!(
            overflow,
            Some(Overflow {
                stream: OutputStream::Stdout,
                limit: 8,
            })
        );
    }

    #[test]
    fn pipe_capture_without_pipe_yields_empty_buffer() {
        let capture = PipeCapture::spawn(
            None::<Cursor<Vec<u8>>>,
            PipeLimit::new(OutputStream::Stderr, OutputLimits::default()),
            Arc::new(OnceLock::new()),
        );
        let bytes = capture.finish(OutputStream::Stderr, Instant::now());
        assert!(bytes.is_empty());
    }

    #[test]
    fn pipe_capture_snapshots_after_reader_finishes() {
        let capture = PipeCapture::spawn(
            Some(Cursor::new(b"partial\nline".to_vec())),
            PipeLimit::new(OutputStream::Stdout, OutputLimits::default()),
            Arc::new(OnceLock::new()),
        );
        let bytes = capture.finish(
            OutputStream::Stdout,
            Instant::now() + Duration::from_secs(5),
        );
        assert_eq!(bytes, b"partial\nline");
    }

    #[test]
    fn captured_output_decodes_lossily() {
        let output = CapturedOutput {
            stdout: vec![b'o', b'k', 0xff],
            stderr: b"warn".to_vec(),
        };
        assert_eq!(output.stdout_text(), "ok\u{fffd}");
        assert_eq!(output.stderr_text(), "warn");
    }
}
