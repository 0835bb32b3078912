//! Convergence benchmark: render a scene at increasing sample counts and
//! score each render against a stored reference.
//!
//! Renders land in `<reference_dir>/benchmark/`, next to the log and the
//! heatmap of the last render. Renderer diagnostics are echoed to the sink
//! for every invocation so the log is a complete record of the sweep.

use std::fmt::Write as _;
use std::path::PathBuf;

use groundtruth_pipeline::metric::DynamicRange;
use groundtruth_pipeline::{ComparisonDomain, MetricResult, PerceptualMetric, RgbImage, compare};
use serde::{Deserialize, Serialize};

use crate::config::SweepConfig;
use crate::error::{RunError, create_dir};
use crate::image_io;
use crate::renderer::{ProcessOutput, RenderError, RenderProcess, discard_output, render_args};
use crate::sink::LogSink;

/// Dashes on each side of the results banner.
const BANNER_WIDTH: usize = 50;

/// Scores for one sample count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepRow {
    /// Samples the render was made with.
    pub sample_count: u32,
    /// Error against the reference.
    #[serde(flatten)]
    pub result: MetricResult,
}

/// Everything a sweep measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResultTable {
    /// Domain of the numeric error.
    pub domain: ComparisonDomain,
    /// Reference every render was compared against.
    pub reference: PathBuf,
    /// Scored renders, in configuration order.
    pub rows: Vec<SweepRow>,
    /// Sample counts whose render could not be scored.
    pub failed: Vec<u32>,
    /// Heatmap of the last scored render.
    pub heatmap: PathBuf,
}

impl SweepResultTable {
    /// The results banner followed by one line per row.
    #[must_use]
    pub fn report(&self) -> String {
        let dashes = "-".repeat(BANNER_WIDTH);
        let mut out = format!("\n{dashes} RESULTS: {dashes}\n\n");
        for row in &self.rows {
            let _ = writeln!(
                out,
                "{} samples; MSE: {}; Flip: {}",
                row.sample_count, row.result.numeric_error, row.result.perceptual_error
            );
        }
        for samples in &self.failed {
            let _ = writeln!(out, "{samples} samples; render failed");
        }
        out
    }
}

/// Render every configured sample count and score it against the
/// reference.
///
/// Exactly one heatmap is written, for the last render that could be
/// scored. The report is written to `sink` at the end.
///
/// # Errors
///
/// Returns [`RunError::Config`] if the sample counts are invalid,
/// [`RunError::Image`] if the reference cannot be loaded or the heatmap
/// cannot be written, [`RunError::Render`] if the renderer program does
/// not exist, [`RunError::Pipeline`] if a render differs in size from the
/// reference, and [`RunError::NoRenders`] if no render could be scored.
pub fn run_sweep<R, M>(
    config: &SweepConfig,
    renderer: &R,
    metric: &M,
    sink: &mut dyn LogSink,
) -> Result<SweepResultTable, RunError>
where
    R: RenderProcess + ?Sized,
    M: PerceptualMetric + ?Sized,
{
    config.validate()?;
    let reference_path = config.reference_path();
    let reference = image_io::load(&reference_path)?;

    let benchmark_dir = config.benchmark_dir();
    create_dir(&benchmark_dir)?;
    let scene = config.scene_path();

    let mut rows = Vec::with_capacity(config.sample_counts.len());
    let mut failed = Vec::new();
    let mut last: Option<RgbImage> = None;

    for &samples in &config.sample_counts {
        let args = render_args(&benchmark_dir, samples, &config.resource_dir, &scene);
        let Some(render) = render_once(config, renderer, &args, samples, sink)? else {
            failed.push(samples);
            continue;
        };

        let result = compare(&reference, &render, config.domain, metric)?;
        tracing::debug!(samples, ?result, "scored render");
        rows.push(SweepRow {
            sample_count: samples,
            result,
        });
        last = Some(render);
    }

    let last = last.ok_or(RunError::NoRenders)?;
    let outcome = metric.evaluate(&reference, &last, DynamicRange::Ldr)?;
    let heatmap = config.heatmap_path();
    image_io::save(&metric.visualize(&outcome.error_map), &heatmap)?;

    let table = SweepResultTable {
        domain: config.domain,
        reference: reference_path,
        rows,
        failed,
        heatmap,
    };
    for line in table.report().lines() {
        sink.write_line(line);
    }
    Ok(table)
}

/// Run the renderer once and load its output.
///
/// `Ok(None)` means this sample count failed and the sweep goes on.
fn render_once<R: RenderProcess + ?Sized>(
    config: &SweepConfig,
    renderer: &R,
    args: &[std::ffi::OsString],
    samples: u32,
    sink: &mut dyn LogSink,
) -> Result<Option<RgbImage>, RunError> {
    let render_path = config.render_path(samples);
    discard_output(&render_path);

    let output = match renderer.invoke(args) {
        Ok(output) => output,
        Err(e @ RenderError::ProgramNotFound(_)) => {
            sink.write_line(&format!("Error: {e}"));
            return Err(e.into());
        }
        Err(e) => {
            sink.write_line(&format!("Error: {e}"));
            if let RenderError::TimedOut { stderr, .. } = &e {
                sink.write_line(stderr.trim_end());
            }
            discard_output(&render_path);
            return Ok(None);
        }
    };
    echo(&output, sink);
    if !output.succeeded() {
        discard_output(&render_path);
        return Ok(None);
    }

    match image_io::load(&render_path) {
        Ok(render) => Ok(Some(render)),
        Err(e) => {
            sink.write_line(&format!("Warning: {e}"));
            Ok(None)
        }
    }
}

fn echo(output: &ProcessOutput, sink: &mut dyn LogSink) {
    sink.write_line("Output:");
    sink.write_line(output.stdout.trim_end());
    sink.write_line("Error:");
    sink.write_line(output.stderr.trim_end());
    sink.write_line(&format!("Exit Code: {}", output.exit_code_text()));
}
