//! Reference accumulation: render in batches, merge, clean up.
//!
//! A reference at `total_samples` is built from `total / per_batch`
//! independent renderer runs at `per_batch` samples each. Every batch is
//! renamed to `<output>/<i>.png` as soon as it lands, so the next run
//! cannot overwrite it. Batches that fail are skipped: the reference is
//! merged from whatever survived and the shortfall is reported.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use groundtruth_pipeline::{
    Clock, Dimensions, MergeArena, RemainingEstimate, RgbImage, merge_batches_in,
};
use serde::Serialize;

use crate::config::RenderConfig;
use crate::error::{RunError, create_dir};
use crate::image_io::{self, ImageIoError};
use crate::renderer::{ProcessOutput, RenderError, RenderProcess, discard_output, render_args};
use crate::sink::LogSink;

/// Why a batch produced no image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The renderer exited unsuccessfully (`None`: killed by a signal).
    ExitStatus(Option<i32>),
    /// The renderer could not be started or waited on.
    Invocation(String),
    /// The renderer exceeded its deadline.
    TimedOut(Duration),
    /// The renderer reported success but wrote no image.
    MissingOutput(PathBuf),
    /// The batch image exists but cannot be used.
    Unreadable(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExitStatus(Some(code)) => write!(f, "renderer exited with code {code}"),
            Self::ExitStatus(None) => f.write_str("renderer was terminated by a signal"),
            Self::Invocation(msg) | Self::Unreadable(msg) => f.write_str(msg),
            Self::TimedOut(timeout) => write!(f, "renderer timed out after {timeout:?}"),
            Self::MissingOutput(path) => write!(f, "renderer wrote no {}", path.display()),
        }
    }
}

/// A batch that produced no image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    /// Batch index in render order.
    pub index: u32,
    /// What went wrong.
    pub reason: FailureReason,
}

/// Outcome of rendering every batch of a run.
#[derive(Debug, Clone)]
pub struct BatchRun {
    /// Number of batches attempted.
    pub requested: u32,
    /// Samples rendered per batch.
    pub samples_per_batch: u32,
    /// Surviving batch images, in render order.
    pub images: Vec<RgbImage>,
    /// Artifact path of each surviving image.
    pub artifacts: Vec<PathBuf>,
    /// Batches that produced no image, in render order.
    pub failures: Vec<BatchFailure>,
}

impl BatchRun {
    /// Samples contained in the surviving batches.
    #[must_use]
    pub fn accumulated_samples(&self) -> u64 {
        self.images.len() as u64 * u64::from(self.samples_per_batch)
    }

    /// Whether every requested batch survived.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of removing batch artifacts after a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Artifacts removed.
    pub deleted: Vec<PathBuf>,
    /// Artifacts that did not exist.
    pub missing: Vec<PathBuf>,
    /// Artifacts that exist but could not be removed.
    pub failed: Vec<PathBuf>,
}

/// Summary of a completed reference run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceReport {
    /// Where the reference was written.
    pub reference_path: PathBuf,
    /// Size of the reference.
    pub dimensions: Dimensions,
    /// Samples the run was configured for.
    pub requested_samples: u64,
    /// Samples actually contained in the reference.
    pub accumulated_samples: u64,
    /// Batches that produced no image.
    pub failures: Vec<BatchFailure>,
    /// Reduction passes the merge took.
    pub merge_passes: usize,
    /// Artifact removal.
    pub cleanup: CleanupReport,
}

impl ReferenceReport {
    /// Human-readable one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Reference {} ({}): {}/{} samples",
            self.reference_path.display(),
            self.dimensions,
            self.accumulated_samples,
            self.requested_samples,
        )
    }
}

/// Run the renderer once per batch and collect the surviving images.
///
/// A progress line is written to `sink` after every batch. Failed batches
/// are reported to `sink` and recorded in [`BatchRun::failures`].
///
/// # Errors
///
/// Returns [`RunError::Config`] before any renderer runs if the sample
/// budgets are invalid, [`RunError::OutputDir`] if the output directory
/// cannot be created, and [`RunError::Render`] if the renderer program
/// does not exist.
pub fn render_batches<R, C>(
    config: &RenderConfig,
    renderer: &R,
    clock: &C,
    sink: &mut dyn LogSink,
) -> Result<BatchRun, RunError>
where
    R: RenderProcess + ?Sized,
    C: Clock,
{
    let requested = config.batch_count()?;
    create_dir(&config.output_dir)?;

    let args = render_args(
        &config.output_dir,
        config.samples_per_batch,
        &config.resource_dir,
        &config.scene_ref,
    );
    let mut run = BatchRun {
        requested,
        samples_per_batch: config.samples_per_batch,
        images: Vec::new(),
        artifacts: Vec::new(),
        failures: Vec::new(),
    };

    let rendered = config.renderer_output();
    let started = clock.now();
    for index in 0..requested {
        discard_output(&rendered);
        let outcome = match renderer.invoke(&args) {
            Ok(output) => collect_batch(config, index, &output, sink),
            Err(e @ RenderError::ProgramNotFound(_)) => {
                sink.write_line(&format!("Error: {e}"));
                return Err(e.into());
            }
            Err(RenderError::TimedOut {
                timeout, stderr, ..
            }) => {
                write_diagnostics(&stderr, sink);
                Err(FailureReason::TimedOut(timeout))
            }
            Err(e) => Err(FailureReason::Invocation(e.to_string())),
        };
        if outcome.is_err() {
            // A failed batch contributes nothing, not even a partial image.
            discard_output(&rendered);
        }

        match outcome {
            Ok((image, artifact)) => {
                tracing::debug!(index, path = %artifact.display(), "batch rendered");
                run.images.push(image);
                run.artifacts.push(artifact);
            }
            Err(reason) => {
                sink.write_line(&format!("Batch {index} failed: {reason}"));
                run.failures.push(BatchFailure { index, reason });
            }
        }

        let estimate = RemainingEstimate {
            completed: index + 1,
            total: requested,
            elapsed: clock.elapsed(&started),
        };
        sink.write_line(&estimate.to_string());
    }

    Ok(run)
}

/// Turn one finished renderer invocation into a batch image.
fn collect_batch(
    config: &RenderConfig,
    index: u32,
    output: &ProcessOutput,
    sink: &mut dyn LogSink,
) -> Result<(RgbImage, PathBuf), FailureReason> {
    if !output.succeeded() {
        write_diagnostics(&output.stderr, sink);
        sink.write_line(&format!("Exit Code: {}", output.exit_code_text()));
        return Err(FailureReason::ExitStatus(output.exit_code));
    }

    let rendered = config.renderer_output();
    let artifact = config.batch_artifact(index);
    std::fs::rename(&rendered, &artifact).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            FailureReason::MissingOutput(rendered.clone())
        } else {
            FailureReason::Unreadable(format!(
                "cannot move {} to {}: {e}",
                rendered.display(),
                artifact.display()
            ))
        }
    })?;

    match image_io::load(&artifact) {
        Ok(image) => Ok((image, artifact)),
        Err(ImageIoError::NotFound(path)) => Err(FailureReason::MissingOutput(path)),
        Err(e) => Err(FailureReason::Unreadable(e.to_string())),
    }
}

fn write_diagnostics(stderr: &str, sink: &mut dyn LogSink) {
    sink.write_line("Error:");
    sink.write_line(stderr.trim_end());
}

/// Render every batch, merge the survivors, and write the reference.
///
/// Batch artifacts are removed once the reference is saved. If the merge
/// or the save fails they are kept, so the rendered batches can be
/// inspected or merged by hand.
///
/// # Errors
///
/// Propagates errors from [`render_batches`]. Returns
/// [`RunError::Pipeline`] if no batch survived or the batches differ in
/// size, and [`RunError::Image`] if the reference cannot be written.
pub fn accumulate_reference<R, C>(
    config: &RenderConfig,
    renderer: &R,
    clock: &C,
    sink: &mut dyn LogSink,
) -> Result<ReferenceReport, RunError>
where
    R: RenderProcess + ?Sized,
    C: Clock,
{
    let run = render_batches(config, renderer, clock, sink)?;
    let requested_samples = u64::from(config.total_samples);

    if !run.is_complete() {
        sink.write_line(&format!(
            "Warning: {}/{} samples achieved ({} of {} batches failed)",
            run.accumulated_samples(),
            requested_samples,
            run.failures.len(),
            run.requested,
        ));
    }

    let mut arena = MergeArena::new();
    let reference = merge_batches_in(&run.images, &mut arena)?;
    sink.write_line(&format!(
        "Averaged {} images in {} passes",
        run.images.len(),
        arena.passes()
    ));

    let reference_path = config.reference_path();
    image_io::save(&reference, &reference_path)?;
    sink.write_line(&format!("Image saved as {}", reference_path.display()));

    let cleanup = cleanup_batches(config, run.requested, sink);

    let report = ReferenceReport {
        reference_path,
        dimensions: Dimensions::of(&reference),
        requested_samples,
        accumulated_samples: run.accumulated_samples(),
        failures: run.failures,
        merge_passes: arena.passes(),
        cleanup,
    };
    sink.write_line(&report.summary());
    Ok(report)
}

/// Remove `<output>/<i>.png` for every `i` in `0..requested`.
///
/// Best-effort: a missing or undeletable artifact is reported to `sink`
/// and recorded, never returned as an error.
pub fn cleanup_batches(
    config: &RenderConfig,
    requested: u32,
    sink: &mut dyn LogSink,
) -> CleanupReport {
    let mut report = CleanupReport::default();
    for index in 0..requested {
        let path = config.batch_artifact(index);
        remove_artifact(&path, &mut report, sink);
    }
    report
}

fn remove_artifact(path: &Path, report: &mut CleanupReport, sink: &mut dyn LogSink) {
    match std::fs::remove_file(path) {
        Ok(()) => {
            sink.write_line(&format!("Deleted {}", path.display()));
            report.deleted.push(path.to_path_buf());
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            sink.write_line(&format!("Warning: {} not found.", path.display()));
            report.missing.push(path.to_path_buf());
        }
        Err(e) => {
            sink.write_line(&format!(
                "Warning: cannot delete {}: {e}",
                path.display()
            ));
            report.failed.push(path.to_path_buf());
        }
    }
}
