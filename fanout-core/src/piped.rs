//! Streaming transcodes over named pipes.
//!
//! [`PipedTranscoder`] rewrites the input and every output locator to a named
//! pipe inside a private temporary directory. The caller streams bytes in
//! through a [`PipeWriter`] and drains each output through a [`PipeReader`],
//! on threads of its own, while [`PipedTranscoder::transcode`] blocks.
//!
//! Each endpoint is backed by a pump thread that copies between an anonymous
//! pipe handed to the caller and the named pipe the engine opens. The pump
//! decouples the caller's open/close timing from the engine's: closing the
//! writer before the engine has opened its input is fine, and if the engine
//! fails without opening an endpoint the pump is released after the call so
//! readers see end-of-stream and writers see a broken pipe.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{ErrorKind, Result, TranscodeError, codes};
use crate::session::Session;
use crate::types::{ComponentOptions, InputSpec, Locator, OutputSpec, TranscodeResult};

const RELEASE_POLL: Duration = Duration::from_millis(10);

/// Write end of the input stream.
#[derive(Debug)]
pub struct PipeWriter {
    inner: Option<io::PipeWriter>,
}

impl PipeWriter {
    /// Signal end of input.
    pub fn close(&mut self) {
        self.inner.take();
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(inner) => inner.write(buf),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "input already closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

/// Read end of one output stream.
#[derive(Debug)]
pub struct PipeReader {
    inner: io::PipeReader,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToEngine,
    FromEngine,
}

/// Copy thread between a caller-side anonymous pipe and a named pipe.
#[derive(Debug)]
struct Pump {
    fifo: PathBuf,
    direction: Direction,
    opened: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Pump {
    fn spawn(fifo: PathBuf, direction: Direction, caller_end: CallerEnd) -> io::Result<Self> {
        let opened = Arc::new(AtomicBool::new(false));
        let flag = opened.clone();
        let path = fifo.clone();
        let name = match direction {
            Direction::ToEngine => "fanout-pipe-in",
            Direction::FromEngine => "fanout-pipe-out",
        };
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let copied = match caller_end {
                CallerEnd::Source(mut source) => {
                    let fifo = OpenOptions::new().write(true).open(&path);
                    flag.store(true, Ordering::SeqCst);
                    fifo.and_then(|mut fifo| io::copy(&mut source, &mut fifo))
                }
                CallerEnd::Sink(mut sink) => {
                    let fifo = File::open(&path);
                    flag.store(true, Ordering::SeqCst);
                    fifo.and_then(|mut fifo| io::copy(&mut fifo, &mut sink))
                }
            };
            match copied {
                Ok(bytes) => debug!(fifo = %path.display(), bytes, "pipe pump finished"),
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                    debug!(fifo = %path.display(), "pipe pump peer went away")
                }
                Err(err) => warn!(fifo = %path.display(), error = %err, "pipe pump failed"),
            }
        })?;
        Ok(Self {
            fifo,
            direction,
            opened,
            handle: Some(handle),
        })
    }

    /// Unblock a pump still waiting for the engine to open its side.
    fn release(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        while !self.opened.load(Ordering::SeqCst) && !handle.is_finished() {
            let mut counterpart = OpenOptions::new();
            match self.direction {
                Direction::ToEngine => counterpart.read(true),
                Direction::FromEngine => counterpart.write(true),
            };
            let _ = counterpart
                .custom_flags(nix::libc::O_NONBLOCK)
                .open(&self.fifo);
            thread::sleep(RELEASE_POLL);
        }
        // The copy may still be draining into the caller; leave it running.
        drop(handle);
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.release();
    }
}

enum CallerEnd {
    Source(io::PipeReader),
    Sink(io::PipeWriter),
}

#[derive(Debug)]
struct PipedInput {
    spec: InputSpec,
    pump: Pump,
}

#[derive(Debug)]
struct PipedOutput {
    spec: OutputSpec,
    pump: Pump,
}

/// One streaming transcode: set the input, set the outputs, transcode.
#[derive(Debug)]
pub struct PipedTranscoder {
    input: Option<PipedInput>,
    outputs: Vec<PipedOutput>,
    generation: usize,
    // Dropped last: pumps must be released while their pipes still exist.
    dir: TempDir,
}

fn io_failure(context: &str, err: io::Error) -> TranscodeError {
    let code = err.raw_os_error().map(|errno| -errno).unwrap_or(codes::EIO);
    TranscodeError::with_code(ErrorKind::Engine, code, format!("{context}: {err}"))
}

impl PipedTranscoder {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("fanout-pipes-")
            .tempdir()
            .map_err(|err| io_failure("creating pipe directory", err))?;
        Ok(Self {
            input: None,
            outputs: Vec::new(),
            generation: 0,
            dir,
        })
    }

    fn make_fifo(&mut self, stem: &str) -> Result<PathBuf> {
        self.generation += 1;
        let path = self.dir.path().join(format!("{stem}-{}", self.generation));
        mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR).map_err(|errno| {
            TranscodeError::with_code(
                ErrorKind::Engine,
                -(errno as i32),
                format!("mkfifo {}: {errno}", path.display()),
            )
        })?;
        Ok(path)
    }

    /// Route the input through a named pipe and return its write end.
    pub fn set_input(&mut self, mut spec: InputSpec) -> Result<PipeWriter> {
        let fifo = self.make_fifo("input")?;
        let (source, writer) = io::pipe().map_err(|err| io_failure("creating input pipe", err))?;
        let pump = Pump::spawn(fifo.clone(), Direction::ToEngine, CallerEnd::Source(source))
            .map_err(|err| io_failure("starting input pump", err))?;
        spec.locator = Locator::Pipe(fifo);
        self.input = Some(PipedInput { spec, pump });
        Ok(PipeWriter {
            inner: Some(writer),
        })
    }

    /// Route every output through a named pipe; readers follow output order.
    ///
    /// Pipes cannot carry format hints, so every output needs an explicit muxer.
    /// Fingerprints would land next to the pipe in a directory removed with
    /// the adapter, so signature outputs are refused.
    pub fn set_outputs(&mut self, specs: Vec<OutputSpec>) -> Result<Vec<PipeReader>> {
        if let Some(index) = specs.iter().position(|spec| spec.calc_signature) {
            return Err(TranscodeError::new(
                ErrorKind::InvalidInput,
                format!("output {index}: piped outputs cannot write signatures"),
            ));
        }
        if let Some(index) = specs
            .iter()
            .position(|spec| ComponentOptions::explicit_name(spec.muxer.as_ref()).is_none())
        {
            return Err(TranscodeError::new(
                ErrorKind::InvalidInput,
                format!("output {index}: piped outputs need an explicit muxer"),
            ));
        }

        let mut outputs = Vec::with_capacity(specs.len());
        let mut readers = Vec::with_capacity(specs.len());
        for (index, mut spec) in specs.into_iter().enumerate() {
            let fifo = self.make_fifo(&format!("output{index}"))?;
            let (reader, sink) =
                io::pipe().map_err(|err| io_failure("creating output pipe", err))?;
            let pump = Pump::spawn(fifo.clone(), Direction::FromEngine, CallerEnd::Sink(sink))
                .map_err(|err| io_failure("starting output pump", err))?;
            spec.locator = Locator::Pipe(fifo);
            outputs.push(PipedOutput { spec, pump });
            readers.push(PipeReader { inner: reader });
        }
        self.outputs = outputs;
        Ok(readers)
    }

    /// Run the session over the configured pipes. Blocks until the engine is
    /// done; the caller must feed the writer and drain every reader meanwhile.
    pub fn transcode(&mut self, session: &Session) -> Result<TranscodeResult> {
        let Some(mut input) = self.input.take() else {
            return Err(TranscodeError::new(ErrorKind::InvalidInput, "no piped input set"));
        };
        let mut outputs = std::mem::take(&mut self.outputs);
        let specs: Vec<OutputSpec> = outputs.iter().map(|o| o.spec.clone()).collect();

        let result = session.transcode(&input.spec, &specs);

        input.pump.release();
        for output in &mut outputs {
            output.pump.release();
        }
        result
    }
}
