//! Line-oriented output sinks for run reports.
//!
//! Batch runs and sweeps report progress, renderer diagnostics, and
//! results as plain lines. Where those lines go is decided by the caller:
//! the CLI attaches the console and a log file through a [`Tee`], tests
//! attach a [`MemorySink`].
//!
//! Writing a line never fails from the caller's point of view. A sink
//! that cannot write (full disk, closed pipe) warns once through
//! `tracing` and drops further output, so a broken log file can neither
//! abort a run nor hide output from the other sinks.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Destination for report lines.
pub trait LogSink {
    /// Append one line. `line` carries no trailing newline.
    fn write_line(&mut self, line: &str);
}

impl<S: LogSink + ?Sized> LogSink for &mut S {
    fn write_line(&mut self, line: &str) {
        (**self).write_line(line);
    }
}

impl<S: LogSink + ?Sized> LogSink for Box<S> {
    fn write_line(&mut self, line: &str) {
        (**self).write_line(line);
    }
}

/// Writes lines to any [`Write`] implementation, flushing after each.
#[derive(Debug)]
pub struct WriterSink<W: Write> {
    label: String,
    writer: W,
    failed: bool,
}

impl<W: Write> WriterSink<W> {
    /// Wrap `writer`; `label` names it in failure warnings.
    pub fn new(label: impl Into<String>, writer: W) -> Self {
        Self {
            label: label.into(),
            writer,
            failed: false,
        }
    }

    /// Whether a write has failed and output is being dropped.
    #[must_use]
    pub const fn has_failed(&self) -> bool {
        self.failed
    }

    /// Recover the wrapped writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> LogSink for WriterSink<W> {
    fn write_line(&mut self, line: &str) {
        if self.failed {
            return;
        }
        let result = writeln!(self.writer, "{line}").and_then(|()| self.writer.flush());
        if let Err(e) = result {
            self.failed = true;
            tracing::warn!(sink = %self.label, "log output disabled after write failure: {e}");
        }
    }
}

/// A standard stream of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl Stream {
    const fn name(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Standard output or standard error.
pub type ConsoleSink = WriterSink<Box<dyn Write>>;

/// Create a sink writing to `stream`.
#[must_use]
pub fn console(stream: Stream) -> ConsoleSink {
    let writer: Box<dyn Write> = match stream {
        Stream::Stdout => Box::new(io::stdout()),
        Stream::Stderr => Box::new(io::stderr()),
    };
    WriterSink::new(stream.name(), writer)
}

/// A log file.
pub type FileSink = WriterSink<BufWriter<File>>;

/// Create (or truncate) a log file at `path`.
///
/// # Errors
///
/// Returns the I/O error if the file cannot be created.
pub fn file(path: &Path) -> io::Result<FileSink> {
    let file = File::create(path)?;
    Ok(WriterSink::new(
        path.display().to_string(),
        BufWriter::new(file),
    ))
}

/// Collects lines in memory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemorySink {
    lines: Vec<String>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines written so far.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Whether any line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn write_line(&mut self, line: &str) {
        self.lines.push(line.to_owned());
    }
}

/// Fans every line out to all attached sinks, in attachment order.
#[derive(Default)]
pub struct Tee<'a> {
    sinks: Vec<Box<dyn LogSink + 'a>>,
}

impl<'a> Tee<'a> {
    /// A tee with no sinks attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach another sink.
    #[must_use]
    pub fn with(mut self, sink: impl LogSink + 'a) -> Self {
        self.attach(sink);
        self
    }

    /// Attach another sink in place.
    pub fn attach(&mut self, sink: impl LogSink + 'a) {
        self.sinks.push(Box::new(sink));
    }

    /// Number of attached sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether no sinks are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl LogSink for Tee<'_> {
    fn write_line(&mut self, line: &str) {
        for sink in &mut self.sinks {
            sink.write_line(line);
        }
    }
}

/// Open the log file for a run, creating its directory first.
///
/// # Errors
///
/// Returns the I/O error if the directory or file cannot be created.
pub fn open_log(path: &Path) -> io::Result<FileSink> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    file(path)
}
