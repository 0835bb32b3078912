#![allow(clippy::unwrap_used, dead_code)]

use std::cell::{Cell, RefCell};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use groundtruth_io::{ProcessOutput, RenderError, RenderProcess};
use groundtruth_pipeline::metric::{DynamicRange, PerceptualOutcome, PerceptualParameters};
use groundtruth_pipeline::{Clock, Dimensions, ErrorMap, PerceptualMetric, PipelineError, RgbImage};

/// Value of `flag` in a renderer argument list.
pub fn arg(args: &[OsString], flag: &str) -> OsString {
    let position = args.iter().position(|a| a == flag).unwrap();
    args[position + 1].clone()
}

/// A renderer that writes a constant gray image per invocation.
///
/// Invocation `i` paints `values[i]`. Invocations listed in `failing`
/// exit with code 1, writing their image first when `write_on_failure`
/// is set. Invocations listed in `silent` exit 0 without writing.
pub struct FakeRenderer {
    pub size: u32,
    pub values: Vec<u8>,
    pub failing: Vec<usize>,
    pub silent: Vec<usize>,
    pub write_on_failure: bool,
    pub calls: Cell<usize>,
    pub seen: RefCell<Vec<Vec<OsString>>>,
}

impl FakeRenderer {
    pub fn new(values: Vec<u8>) -> Self {
        Self {
            size: 4,
            values,
            failing: Vec::new(),
            silent: Vec::new(),
            write_on_failure: false,
            calls: Cell::new(0),
            seen: RefCell::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn failing(mut self, calls: &[usize]) -> Self {
        self.failing = calls.to_vec();
        self
    }

    #[must_use]
    pub fn silent(mut self, calls: &[usize]) -> Self {
        self.silent = calls.to_vec();
        self
    }

    #[must_use]
    pub const fn writing_on_failure(mut self) -> Self {
        self.write_on_failure = true;
        self
    }

    fn paint(&self, call: usize, args: &[OsString]) -> String {
        let output_dir = PathBuf::from(arg(args, "--output"));
        let samples = arg(args, "--samples").into_string().unwrap();
        let value = self.values[call % self.values.len()];
        let image = RgbImage::from_pixel(self.size, self.size, image::Rgb([value; 3]));
        image
            .save(output_dir.join(format!("{samples}_ref.png")))
            .unwrap();
        samples
    }
}

impl RenderProcess for FakeRenderer {
    fn invoke(&self, args: &[OsString]) -> Result<ProcessOutput, RenderError> {
        let call = self.calls.get();
        self.calls.set(call + 1);
        self.seen.borrow_mut().push(args.to_vec());

        if self.failing.contains(&call) {
            if self.write_on_failure {
                self.paint(call, args);
            }
            return Ok(ProcessOutput::failure(1, "out of memory"));
        }
        if self.silent.contains(&call) {
            return Ok(ProcessOutput::success());
        }

        let samples = self.paint(call, args);

        Ok(ProcessOutput {
            exit_code: Some(0),
            stdout: format!("rendered {samples} samples"),
            stderr: String::new(),
        })
    }
}

/// Renderer whose executable is missing.
pub struct MissingProgram;

impl RenderProcess for MissingProgram {
    fn invoke(&self, _args: &[OsString]) -> Result<ProcessOutput, RenderError> {
        Err(RenderError::ProgramNotFound(PathBuf::from("buildDir/renderer")))
    }
}

/// Renderer that reports success but writes nothing.
pub struct SilentRenderer;

impl RenderProcess for SilentRenderer {
    fn invoke(&self, _args: &[OsString]) -> Result<ProcessOutput, RenderError> {
        Ok(ProcessOutput::success())
    }
}

/// Renderer that always hits its deadline after printing a little.
pub struct HungRenderer;

impl RenderProcess for HungRenderer {
    fn invoke(&self, _args: &[OsString]) -> Result<ProcessOutput, RenderError> {
        Err(RenderError::TimedOut {
            program: PathBuf::from("buildDir/renderer"),
            timeout: Duration::from_secs(30),
            stderr: String::from("building BVH"),
        })
    }
}

/// Clock that advances one second per reading.
#[derive(Default)]
pub struct TickClock {
    ticks: Cell<u64>,
}

impl Clock for TickClock {
    type Instant = u64;

    fn now(&self) -> u64 {
        let t = self.ticks.get();
        self.ticks.set(t + 1);
        t
    }

    fn elapsed(&self, since: &u64) -> Duration {
        Duration::from_secs(self.now() - since)
    }
}

/// Perceptual metric scoring the mean absolute difference of the red
/// channel, scaled to `[0, 1]`.
pub struct AbsoluteDifference;

impl PerceptualMetric for AbsoluteDifference {
    fn evaluate(
        &self,
        reference: &RgbImage,
        test: &RgbImage,
        mode: DynamicRange,
    ) -> Result<PerceptualOutcome, PipelineError> {
        let values = reference
            .pixels()
            .zip(test.pixels())
            .map(|(a, b)| f32::from(a[0].abs_diff(b[0])) / 255.0)
            .collect();
        let error_map = ErrorMap::new(Dimensions::of(reference), values)?;
        let mean = error_map.mean();
        Ok(PerceptualOutcome {
            error_map,
            mean,
            parameters: PerceptualParameters {
                mode,
                pixels_per_degree: 67.0,
            },
        })
    }
}

pub fn write_gray(path: &Path, size: u32, value: u8) {
    RgbImage::from_pixel(size, size, image::Rgb([value; 3]))
        .save(path)
        .unwrap();
}
