//! groundtruth-bench: accumulate reference images and measure convergence.
//!
//! Drives an external renderer to build low-noise references from many
//! short batches, and benchmarks renders at increasing sample counts
//! against a stored reference. Also exposes the building blocks
//! (`compare`, `merge`, `gamma`) for ad-hoc use on image files.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin groundtruth-bench -- reference --total-samples 100000
//! cargo run --release --bin groundtruth-bench -- sweep --reference-dir <DIR> \
//!     --reference-name 100000_ref.png --samples 1000,2000 --domain linear
//! ```
//!
//! Set `RUST_LOG=debug` for internal diagnostics on stderr.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use groundtruth_io::config::{from_json_file, from_json_str};
use groundtruth_io::sink::{self, Stream, Tee};
use groundtruth_io::{
    FlipMetric, RenderConfig, RunError, StdClock, Subprocess, SweepConfig, accumulate_reference,
    image_io, run_sweep,
};
use groundtruth_pipeline::colorspace::{self, DEFAULT_GAMMA};
use groundtruth_pipeline::{ComparisonDomain, MergeArena, PerceptualMetric, merge_batches_in};
use tracing_subscriber::EnvFilter;

type CliResult = Result<(), Box<dyn Error>>;

/// Reference accumulation and convergence benchmarking for a stochastic
/// renderer.
#[derive(Parser)]
#[command(name = "groundtruth-bench", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render in batches and merge them into one reference image.
    Reference(ReferenceArgs),
    /// Render at several sample counts and score each against a reference.
    Sweep(SweepArgs),
    /// Score one image against another.
    Compare(CompareArgs),
    /// Average equally sized images with the pairwise reducer.
    Merge(MergeArgs),
    /// Gamma-encode (or decode) an image.
    Gamma(GammaArgs),
}

#[derive(Args)]
struct ReferenceArgs {
    /// Renderer executable.
    #[arg(long, default_value = RenderConfig::DEFAULT_PROGRAM_PATH)]
    program: PathBuf,

    /// Target accumulated sample count.
    #[arg(long, default_value_t = RenderConfig::DEFAULT_TOTAL_SAMPLES)]
    total_samples: u32,

    /// Samples per renderer invocation.
    #[arg(long, default_value_t = RenderConfig::DEFAULT_SAMPLES_PER_BATCH)]
    samples_per_batch: u32,

    /// Resource directory passed to the renderer.
    #[arg(long, default_value = RenderConfig::DEFAULT_RESOURCE_DIR)]
    resources: PathBuf,

    /// Scene to render.
    #[arg(long, default_value = RenderConfig::DEFAULT_SCENE_REF)]
    scene: PathBuf,

    /// Directory for batch artifacts and the reference.
    #[arg(long, default_value = RenderConfig::DEFAULT_OUTPUT_DIR)]
    output: PathBuf,

    /// Kill a renderer invocation after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Also write run output to this file.
    #[arg(long)]
    log: Option<PathBuf>,

    /// Print the run report as JSON on stdout; progress moves to stderr.
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    config: ConfigSource,
}

#[derive(Args)]
struct SweepArgs {
    /// Renderer executable.
    #[arg(long, default_value = RenderConfig::DEFAULT_PROGRAM_PATH)]
    program: PathBuf,

    /// Resource directory passed to the renderer.
    #[arg(long, default_value = RenderConfig::DEFAULT_RESOURCE_DIR)]
    resources: PathBuf,

    /// Directory holding the reference image and the scene.
    #[arg(long, required_unless_present_any = ["config", "config_json"])]
    reference_dir: Option<PathBuf>,

    /// Reference image file name inside the reference directory.
    #[arg(long, required_unless_present_any = ["config", "config_json"])]
    reference_name: Option<String>,

    /// Scene file name inside the reference directory.
    #[arg(long, default_value = SweepConfig::DEFAULT_SCENE_NAME)]
    scene_name: String,

    /// Sample counts to render, comma separated.
    #[arg(long, value_delimiter = ',', required_unless_present_any = ["config", "config_json"])]
    samples: Vec<u32>,

    /// Domain of the numeric error.
    #[arg(long, value_enum, required_unless_present_any = ["config", "config_json"])]
    domain: Option<Domain>,

    /// Kill a renderer invocation after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// FLIP observer resolution in pixels per degree.
    #[arg(long)]
    pixels_per_degree: Option<f32>,

    /// Print the result table as JSON on stdout; progress moves to stderr.
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    config: ConfigSource,
}

/// Full configuration from JSON; overrides every individual flag.
#[derive(Args)]
struct ConfigSource {
    /// Configuration JSON file.
    #[arg(long, conflicts_with = "config_json")]
    config: Option<PathBuf>,

    /// Configuration as a JSON string.
    #[arg(long)]
    config_json: Option<String>,
}

#[derive(Args)]
struct CompareArgs {
    /// Reference image.
    reference: PathBuf,

    /// Image to score.
    test: PathBuf,

    /// Domain of the numeric error.
    #[arg(long, value_enum)]
    domain: Domain,

    /// FLIP observer resolution in pixels per degree.
    #[arg(long)]
    pixels_per_degree: Option<f32>,

    /// Write the FLIP error map visualization here.
    #[arg(long)]
    heatmap: Option<PathBuf>,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct MergeArgs {
    /// Images to average, all the same size.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Where to write the average.
    #[arg(long)]
    output: PathBuf,
}

#[derive(Args)]
struct GammaArgs {
    /// Image to transform.
    input: PathBuf,

    /// Where to write the result.
    output: PathBuf,

    /// Gamma exponent.
    #[arg(long, default_value_t = DEFAULT_GAMMA)]
    gamma: f32,

    /// Decode to linear instead of encoding.
    #[arg(long)]
    inverse: bool,
}

/// Numeric error domain selection.
#[derive(Clone, Copy, ValueEnum)]
enum Domain {
    /// Compare stored values directly.
    Linear,
    /// Gamma-encode both images before comparing.
    Perceptual,
}

impl From<Domain> for ComparisonDomain {
    fn from(domain: Domain) -> Self {
        match domain {
            Domain::Linear => Self::Linear,
            Domain::Perceptual => Self::Perceptual,
        }
    }
}

impl ConfigSource {
    /// The configuration from `--config` or `--config-json`, if given.
    fn load<T: serde::de::DeserializeOwned>(&self) -> Result<Option<T>, Box<dyn Error>> {
        if let Some(ref path) = self.config {
            return Ok(Some(from_json_file(path)?));
        }
        if let Some(ref json) = self.config_json {
            return Ok(Some(from_json_str(json)?));
        }
        Ok(None)
    }
}

/// Build a [`RenderConfig`] from CLI arguments.
fn render_config(args: &ReferenceArgs) -> Result<RenderConfig, Box<dyn Error>> {
    if let Some(config) = args.config.load()? {
        return Ok(config);
    }
    Ok(RenderConfig {
        program_path: args.program.clone(),
        total_samples: args.total_samples,
        samples_per_batch: args.samples_per_batch,
        resource_dir: args.resources.clone(),
        scene_ref: args.scene.clone(),
        output_dir: args.output.clone(),
        timeout_secs: args.timeout_secs,
    })
}

/// Build a [`SweepConfig`] from CLI arguments.
fn sweep_config(args: &SweepArgs) -> Result<SweepConfig, Box<dyn Error>> {
    if let Some(config) = args.config.load()? {
        return Ok(config);
    }
    let (Some(reference_dir), Some(reference_name), Some(domain)) = (
        args.reference_dir.clone(),
        args.reference_name.clone(),
        args.domain,
    ) else {
        return Err("--reference-dir, --reference-name and --domain are required".into());
    };
    Ok(SweepConfig {
        program_path: args.program.clone(),
        resource_dir: args.resources.clone(),
        reference_dir,
        reference_name,
        scene_name: args.scene_name.clone(),
        sample_counts: args.samples.clone(),
        domain: domain.into(),
        timeout_secs: args.timeout_secs,
    })
}

fn flip_metric(pixels_per_degree: Option<f32>) -> FlipMetric {
    pixels_per_degree.map_or_else(FlipMetric::default, FlipMetric::with_pixels_per_degree)
}

/// Where run progress goes: stderr when stdout carries the JSON result.
const fn console_stream(json: bool) -> Stream {
    if json {
        Stream::Stderr
    } else {
        Stream::Stdout
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_reference(args: &ReferenceArgs) -> CliResult {
    let config = render_config(args)?;
    tracing::debug!(?config, "reference run");
    let renderer = Subprocess::new(&config.program_path).with_timeout(config.timeout());

    let mut tee = Tee::new().with(sink::console(console_stream(args.json)));
    if let Some(ref path) = args.log {
        tee.attach(sink::open_log(path).map_err(RunError::Log)?);
    }
    let report = accumulate_reference(&config, &renderer, &StdClock, &mut tee)?;

    if args.json {
        print_json(&report)?;
    }
    Ok(())
}

fn run_benchmark(args: &SweepArgs) -> CliResult {
    let config = sweep_config(args)?;
    config.validate()?;
    tracing::debug!(?config, "sweep");
    let renderer = Subprocess::new(&config.program_path).with_timeout(config.timeout());
    let metric = flip_metric(args.pixels_per_degree);

    let log = sink::open_log(&config.log_path()).map_err(RunError::Log)?;
    let mut tee = Tee::new()
        .with(sink::console(console_stream(args.json)))
        .with(log);
    let table = run_sweep(&config, &renderer, &metric, &mut tee)?;

    if args.json {
        print_json(&table)?;
    }
    Ok(())
}

fn run_compare(args: &CompareArgs) -> CliResult {
    let reference = image_io::load(&args.reference)?;
    let test = image_io::load(&args.test)?;
    let metric = flip_metric(args.pixels_per_degree);

    let result = groundtruth_pipeline::compare(&reference, &test, args.domain.into(), &metric)?;

    if let Some(ref path) = args.heatmap {
        let outcome = metric.evaluate(
            &reference,
            &test,
            groundtruth_pipeline::DynamicRange::Ldr,
        )?;
        image_io::save(&metric.visualize(&outcome.error_map), path)?;
        eprintln!("Heatmap written to {}", path.display());
    }

    if args.json {
        print_json(&result)?;
    } else {
        println!(
            "MSE: {}; Flip: {}",
            result.numeric_error, result.perceptual_error
        );
    }
    Ok(())
}

fn run_merge(args: &MergeArgs) -> CliResult {
    let images = args
        .inputs
        .iter()
        .map(|path| image_io::load(path))
        .collect::<Result<Vec<_>, _>>()?;

    let mut arena = MergeArena::new();
    let merged = merge_batches_in(&images, &mut arena)?;
    image_io::save(&merged, &args.output)?;

    eprintln!(
        "Averaged {} images in {} passes into {}",
        images.len(),
        arena.passes(),
        args.output.display()
    );
    Ok(())
}

fn run_gamma(args: &GammaArgs) -> CliResult {
    if !(args.gamma.is_finite() && args.gamma > 0.0) {
        return Err(format!("gamma must be a positive number, got {}", args.gamma).into());
    }
    let input = colorspace::normalize(&image_io::load(&args.input)?);
    let transformed = if args.inverse {
        colorspace::to_linear(&input, args.gamma)
    } else {
        colorspace::to_perceptual(&input, args.gamma)
    };
    image_io::save(&colorspace::quantize(&transformed), &args.output)?;
    eprintln!("Image saved as {}", args.output.display());
    Ok(())
}

/// Install the `tracing` subscriber: `RUST_LOG` filter, `warn` by default,
/// formatted to stderr so stdout stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match &cli.command {
        Command::Reference(args) => run_reference(args),
        Command::Sweep(args) => run_benchmark(args),
        Command::Compare(args) => run_compare(args),
        Command::Merge(args) => run_merge(args),
        Command::Gamma(args) => run_gamma(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::Path;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("groundtruth-bench").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn json_output_moves_progress_to_stderr() {
        assert_eq!(console_stream(true), Stream::Stderr);
        assert_eq!(console_stream(false), Stream::Stdout);
    }

    #[test]
    fn reference_flags_fill_config() {
        let Command::Reference(args) = parse(&[
            "reference",
            "--total-samples",
            "4000",
            "--samples-per-batch",
            "1000",
            "--timeout-secs",
            "60",
        ])
        .command
        else {
            unreachable!()
        };
        let config = render_config(&args).unwrap();
        assert_eq!(config.batch_count().unwrap(), 4);
        assert_eq!(config.timeout_secs, Some(60));
        assert_eq!(config.output_dir, Path::new("tmp"));
    }

    #[test]
    fn config_json_overrides_flags() {
        let Command::Reference(args) = parse(&[
            "reference",
            "--total-samples",
            "4000",
            "--config-json",
            r#"{"total_samples": 9000, "samples_per_batch": 3000}"#,
        ])
        .command
        else {
            unreachable!()
        };
        let config = render_config(&args).unwrap();
        assert_eq!(config.total_samples, 9000);
        assert_eq!(config.batch_count().unwrap(), 3);
    }

    #[test]
    fn sweep_samples_are_comma_separated() {
        let Command::Sweep(args) = parse(&[
            "sweep",
            "--reference-dir",
            "refs/cornell",
            "--reference-name",
            "100000_ref.png",
            "--samples",
            "1000,2000,4000",
            "--domain",
            "perceptual",
        ])
        .command
        else {
            unreachable!()
        };
        let config = sweep_config(&args).unwrap();
        assert_eq!(config.sample_counts, [1000, 2000, 4000]);
        assert_eq!(config.domain, ComparisonDomain::Perceptual);
        assert_eq!(config.scene_path(), Path::new("refs/cornell/scene.yaml"));
        assert_eq!(
            config.log_path(),
            Path::new("refs/cornell/benchmark/log.txt")
        );
    }

    #[test]
    fn sweep_requires_domain() {
        let result = Cli::try_parse_from([
            "groundtruth-bench",
            "sweep",
            "--reference-dir",
            "r",
            "--reference-name",
            "x.png",
            "--samples",
            "1000",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn sweep_accepts_config_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.json");
        std::fs::write(
            &path,
            r#"{"reference_dir": "r", "reference_name": "x.png", "sample_counts": [500], "domain": "linear"}"#,
        )
        .unwrap();

        let Command::Sweep(args) = parse(&["sweep", "--config", path.to_str().unwrap()]).command
        else {
            unreachable!()
        };
        let config = sweep_config(&args).unwrap();
        assert_eq!(config.sample_counts, [500]);
        assert_eq!(config.domain, ComparisonDomain::Linear);
    }
}
