//! The external renderer, modelled as an opaque subprocess.
//!
//! The renderer is driven through a fixed command-line contract:
//!
//! ```text
//! <program> --output <dir> --samples <N> --resources <dir> --reference_scene <path>
//! ```
//!
//! On success it writes `<N>_ref.png` into the output directory. Failure is
//! signalled by a non-zero exit status and a free-text diagnostic stream.
//!
//! [`RenderProcess`] is the seam: production code uses [`Subprocess`],
//! tests substitute fakes that write images directly.

use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often a renderer with a deadline is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors that prevent a renderer invocation from producing an exit status.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The renderer executable does not exist.
    #[error("renderer program {} not found", .0.display())]
    ProgramNotFound(PathBuf),

    /// The renderer could not be started.
    #[error("cannot start renderer {}: {source}", program.display())]
    Spawn {
        /// Renderer executable.
        program: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Waiting for the renderer failed.
    #[error("lost track of renderer {}: {source}", program.display())]
    Wait {
        /// Renderer executable.
        program: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The renderer exceeded its deadline and was killed.
    #[error("renderer {} timed out after {timeout:?}", program.display())]
    TimedOut {
        /// Renderer executable.
        program: PathBuf,
        /// Deadline that was exceeded.
        timeout: Duration,
        /// Diagnostics written before the renderer was killed.
        stderr: String,
    },
}

/// Result of a completed renderer invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessOutput {
    /// Exit code, or `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ProcessOutput {
    /// A successful run with no output.
    #[must_use]
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    /// A failed run with the given exit code and diagnostic text.
    #[must_use]
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the process exited with status zero.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    /// Exit code formatted for humans (`signal` when killed).
    #[must_use]
    pub fn exit_code_text(&self) -> String {
        self.exit_code
            .map_or_else(|| String::from("signal"), |code| code.to_string())
    }
}

/// Something that can run the renderer with a list of arguments.
pub trait RenderProcess {
    /// Run the renderer to completion.
    ///
    /// A non-zero exit status is **not** an error here: it is reported in
    /// the returned [`ProcessOutput`]. Errors mean no exit status exists.
    ///
    /// # Errors
    ///
    /// Returns a [`RenderError`] if the process could not be started,
    /// waited on, or finished within its deadline.
    fn invoke(&self, args: &[OsString]) -> Result<ProcessOutput, RenderError>;
}

/// The renderer as a blocking child process.
#[derive(Debug, Clone)]
pub struct Subprocess {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl Subprocess {
    /// Run `program` with no deadline.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
        }
    }

    /// Kill the renderer if it runs longer than `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn spawn_error(&self, source: io::Error) -> RenderError {
        if source.kind() == io::ErrorKind::NotFound {
            RenderError::ProgramNotFound(self.program.clone())
        } else {
            RenderError::Spawn {
                program: self.program.clone(),
                source,
            }
        }
    }

    fn wait_error(&self, source: io::Error) -> RenderError {
        RenderError::Wait {
            program: self.program.clone(),
            source,
        }
    }

    fn wait_with_deadline(
        &self,
        mut child: Child,
        timeout: Duration,
    ) -> Result<ProcessOutput, RenderError> {
        // Drain both pipes while polling so a chatty renderer cannot block
        // on a full pipe buffer.
        let stdout = child.stdout.take().map(Drain::spawn);
        let stderr = child.stderr.take().map(Drain::spawn);

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait().map_err(|e| self.wait_error(e))? {
                break status;
            }
            if Instant::now() >= deadline {
                if let Err(e) = child.kill() {
                    tracing::warn!(program = %self.program.display(), "failed to kill renderer: {e}");
                }
                if let Err(e) = child.wait() {
                    tracing::warn!(program = %self.program.display(), "failed to reap renderer: {e}");
                }
                // Grandchildren may still hold the pipes open, so take what
                // arrived so far instead of joining the readers.
                return Err(RenderError::TimedOut {
                    program: self.program.clone(),
                    timeout,
                    stderr: stderr.map(|d| d.snapshot()).unwrap_or_default(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        Ok(ProcessOutput {
            exit_code: status.code(),
            stdout: stdout.map(Drain::finish).unwrap_or_default(),
            stderr: stderr.map(Drain::finish).unwrap_or_default(),
        })
    }
}

impl RenderProcess for Subprocess {
    fn invoke(&self, args: &[OsString]) -> Result<ProcessOutput, RenderError> {
        tracing::debug!(program = %self.program.display(), ?args, "invoking renderer");

        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        match self.timeout {
            Some(timeout) => self.wait_with_deadline(child, timeout),
            None => {
                let output = child.wait_with_output().map_err(|e| self.wait_error(e))?;
                Ok(ProcessOutput {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
        }
    }
}

/// Reads a child pipe on a helper thread into a shared buffer.
struct Drain {
    handle: JoinHandle<()>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl Drain {
    fn spawn<R: Read + Send + 'static>(mut pipe: R) -> Self {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let handle = thread::spawn(move || {
            let mut chunk = [0_u8; 4096];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => lock(&sink).extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        tracing::debug!("renderer pipe closed early: {e}");
                        break;
                    }
                }
            }
        });
        Self { handle, buffer }
    }

    /// Everything read so far, without waiting for the pipe to close.
    fn snapshot(&self) -> String {
        String::from_utf8_lossy(&lock(&self.buffer)).into_owned()
    }

    /// Wait for the pipe to close and return everything read.
    fn finish(self) -> String {
        let Self { handle, buffer } = self;
        if handle.join().is_err() {
            tracing::warn!("renderer pipe reader panicked");
        }
        String::from_utf8_lossy(&lock(&buffer)).into_owned()
    }
}

fn lock(buffer: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Remove a renderer output file left over from an earlier invocation.
///
/// The renderer signals success by writing a fixed file name, so a stale
/// file would be mistaken for fresh output.
pub(crate) fn discard_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale renderer output"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), "cannot remove stale renderer output: {e}");
        }
    }
}

/// Arguments for one render at a fixed sample count.
#[must_use]
pub fn render_args(
    output_dir: &Path,
    samples: u32,
    resource_dir: &Path,
    scene: &Path,
) -> Vec<OsString> {
    vec![
        "--output".into(),
        output_dir.into(),
        "--samples".into(),
        samples.to_string().into(),
        "--resources".into(),
        resource_dir.into(),
        "--reference_scene".into(),
        scene.into(),
    ]
}

/// File name the renderer writes for a render at `samples`.
#[must_use]
pub fn output_file_name(samples: u32) -> String {
    format!("{samples}_ref.png")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn args_follow_renderer_contract() {
        let args = render_args(
            Path::new("tmp"),
            5000,
            Path::new("resources"),
            Path::new("resources/references/cornell/scene.yaml"),
        );
        let args: Vec<&str> = args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(
            args,
            [
                "--output",
                "tmp",
                "--samples",
                "5000",
                "--resources",
                "resources",
                "--reference_scene",
                "resources/references/cornell/scene.yaml",
            ]
        );
    }

    #[test]
    fn output_name_includes_sample_count() {
        assert_eq!(output_file_name(1000), "1000_ref.png");
    }

    #[test]
    fn process_output_success() {
        assert!(ProcessOutput::success().succeeded());
        let failed = ProcessOutput::failure(3, "boom");
        assert!(!failed.succeeded());
        assert_eq!(failed.exit_code_text(), "3");
        let killed = ProcessOutput {
            exit_code: None,
            ..ProcessOutput::default()
        };
        assert!(!killed.succeeded());
        assert_eq!(killed.exit_code_text(), "signal");
    }

    #[test]
    fn missing_program_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Subprocess::new(dir.path().join("no-such-renderer"));
        let result = renderer.invoke(&[]);
        assert!(
            matches!(result, Err(RenderError::ProgramNotFound(_))),
            "got {result:?}"
        );
    }

    #[cfg(unix)]
    #[test]
    fn captures_exit_status_and_streams() {
        let renderer = Subprocess::new("sh");
        let args: Vec<OsString> = vec!["-c".into(), "echo out; echo err >&2; exit 4".into()];
        let output = renderer.invoke(&args).unwrap();
        assert_eq!(output.exit_code, Some(4));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn deadline_captures_streams() {
        let renderer = Subprocess::new("sh").with_timeout(Some(Duration::from_secs(30)));
        let args: Vec<OsString> = vec!["-c".into(), "echo done".into()];
        let output = renderer.invoke(&args).unwrap();
        assert!(output.succeeded());
        assert_eq!(output.stdout.trim(), "done");
    }

    #[cfg(unix)]
    #[test]
    fn hung_renderer_is_killed() {
        let renderer = Subprocess::new("sh").with_timeout(Some(Duration::from_millis(200)));
        let args: Vec<OsString> = vec!["-c".into(), "sleep 30".into()];
        let started = Instant::now();
        let result = renderer.invoke(&args);
        assert!(matches!(result, Err(RenderError::TimedOut { .. })), "got {result:?}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn hung_renderer_keeps_partial_diagnostics() {
        let renderer = Subprocess::new("sh").with_timeout(Some(Duration::from_millis(500)));
        let args: Vec<OsString> = vec!["-c".into(), "echo loading scene >&2; sleep 30".into()];
        let Err(RenderError::TimedOut { stderr, .. }) = renderer.invoke(&args) else {
            unreachable!("renderer should time out")
        };
        assert_eq!(stderr.trim(), "loading scene");
    }

    #[test]
    fn stale_output_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(output_file_name(1000));
        std::fs::write(&path, b"old").unwrap();
        discard_output(&path);
        assert!(!path.exists());
        // Already gone is fine.
        discard_output(&path);
    }
}
