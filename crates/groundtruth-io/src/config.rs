//! Run configuration for reference accumulation and benchmark sweeps.
//!
//! Both configurations serialize to JSON so a run can be reproduced from
//! a file. Missing optional fields fall back to the defaults below, which
//! match the repository layout the renderer ships with.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use groundtruth_pipeline::ComparisonDomain;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::renderer::output_file_name;

/// Errors in run configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A sample budget is zero.
    #[error("{0} must be greater than zero")]
    ZeroSamples(&'static str),

    /// The total budget cannot be split into whole batches.
    #[error(
        "total samples ({total}) must be a multiple of samples per batch ({per_batch})"
    )]
    NotDivisible {
        /// Requested total samples.
        total: u32,
        /// Requested samples per batch.
        per_batch: u32,
    },

    /// A sweep needs at least one sample count.
    #[error("sample count list is empty")]
    EmptySweep,

    /// A sweep sample count is zero.
    #[error("sample count at position {0} is zero")]
    NonPositiveSampleCount(usize),

    /// The configuration file could not be read.
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The configuration JSON is malformed.
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Parse a configuration from a JSON string.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] if the JSON does not describe a `T`.
pub fn from_json_str<T: DeserializeOwned>(json: &str) -> Result<T, ConfigError> {
    Ok(serde_json::from_str(json)?)
}

/// Parse a configuration from a JSON file.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] if the file cannot be read and
/// [`ConfigError::Parse`] if its contents are not a valid `T`.
pub fn from_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    from_json_str(&json)
}

/// Everything needed to accumulate one reference image.
///
/// # Invariants
///
/// `total_samples` and `samples_per_batch` are positive and
/// `total_samples` is a whole multiple of `samples_per_batch`. These are
/// checked by [`batch_count`](Self::batch_count), which the orchestrator
/// calls before launching any renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Renderer executable.
    pub program_path: PathBuf,
    /// Target accumulated sample count.
    pub total_samples: u32,
    /// Samples rendered per renderer invocation.
    pub samples_per_batch: u32,
    /// Shared asset directory passed to the renderer.
    pub resource_dir: PathBuf,
    /// Scene description rendered for every batch.
    pub scene_ref: PathBuf,
    /// Directory receiving batch artifacts and the final reference.
    pub output_dir: PathBuf,
    /// Kill a renderer invocation after this many seconds.
    ///
    /// `None` waits indefinitely.
    pub timeout_secs: Option<u64>,
}

impl RenderConfig {
    /// Default renderer executable.
    pub const DEFAULT_PROGRAM_PATH: &'static str = "buildDir/renderer";
    /// Default total sample count.
    pub const DEFAULT_TOTAL_SAMPLES: u32 = 100_000;
    /// Default samples per batch.
    pub const DEFAULT_SAMPLES_PER_BATCH: u32 = 5000;
    /// Default resource directory.
    pub const DEFAULT_RESOURCE_DIR: &'static str = "resources";
    /// Default scene.
    pub const DEFAULT_SCENE_REF: &'static str =
        "resources/references/simple_cornell/ExtraCornell.yaml";
    /// Default artifact directory.
    pub const DEFAULT_OUTPUT_DIR: &'static str = "tmp";

    /// Number of batches the run consists of.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroSamples`] if either budget is zero and
    /// [`ConfigError::NotDivisible`] if the total is not a whole number of
    /// batches.
    pub const fn batch_count(&self) -> Result<u32, ConfigError> {
        if self.samples_per_batch == 0 {
            return Err(ConfigError::ZeroSamples("samples per batch"));
        }
        if self.total_samples == 0 {
            return Err(ConfigError::ZeroSamples("total samples"));
        }
        if self.total_samples % self.samples_per_batch != 0 {
            return Err(ConfigError::NotDivisible {
                total: self.total_samples,
                per_batch: self.samples_per_batch,
            });
        }
        Ok(self.total_samples / self.samples_per_batch)
    }

    /// Renderer deadline, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Where the renderer writes each batch before it is renamed.
    #[must_use]
    pub fn renderer_output(&self) -> PathBuf {
        self.output_dir
            .join(output_file_name(self.samples_per_batch))
    }

    /// Where batch `index` is kept until the merge completes.
    #[must_use]
    pub fn batch_artifact(&self, index: u32) -> PathBuf {
        self.output_dir.join(format!("{index}.png"))
    }

    /// Where the accumulated reference is written.
    #[must_use]
    pub fn reference_path(&self) -> PathBuf {
        self.output_dir.join(output_file_name(self.total_samples))
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            program_path: PathBuf::from(Self::DEFAULT_PROGRAM_PATH),
            total_samples: Self::DEFAULT_TOTAL_SAMPLES,
            samples_per_batch: Self::DEFAULT_SAMPLES_PER_BATCH,
            resource_dir: PathBuf::from(Self::DEFAULT_RESOURCE_DIR),
            scene_ref: PathBuf::from(Self::DEFAULT_SCENE_REF),
            output_dir: PathBuf::from(Self::DEFAULT_OUTPUT_DIR),
            timeout_secs: None,
        }
    }
}

/// Everything needed to benchmark renders against a stored reference.
///
/// `domain` has no default: whether the numeric error is computed on raw
/// or gamma-encoded values must be chosen per sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    /// Renderer executable.
    #[serde(default = "default_program_path")]
    pub program_path: PathBuf,
    /// Shared asset directory passed to the renderer.
    #[serde(default = "default_resource_dir")]
    pub resource_dir: PathBuf,
    /// Directory holding the reference image and the scene.
    pub reference_dir: PathBuf,
    /// Reference image file name inside `reference_dir`.
    pub reference_name: String,
    /// Scene file name inside `reference_dir`.
    #[serde(default = "default_scene_name")]
    pub scene_name: String,
    /// Sample counts to render, in order.
    pub sample_counts: Vec<u32>,
    /// Domain of the numeric error.
    pub domain: ComparisonDomain,
    /// Kill a renderer invocation after this many seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl SweepConfig {
    /// Default scene file name.
    pub const DEFAULT_SCENE_NAME: &'static str = "scene.yaml";
    /// Subdirectory of `reference_dir` receiving sweep output.
    pub const BENCHMARK_DIR: &'static str = "benchmark";
    /// Log file name inside the benchmark directory.
    pub const LOG_FILE: &'static str = "log.txt";
    /// Heatmap file name inside the benchmark directory.
    pub const HEATMAP_FILE: &'static str = "heatmap.png";

    /// Check the sample count list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptySweep`] for an empty list and
    /// [`ConfigError::NonPositiveSampleCount`] for a zero entry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_counts.is_empty() {
            return Err(ConfigError::EmptySweep);
        }
        if let Some(position) = self.sample_counts.iter().position(|&n| n == 0) {
            return Err(ConfigError::NonPositiveSampleCount(position));
        }
        Ok(())
    }

    /// Renderer deadline, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Stored reference image.
    #[must_use]
    pub fn reference_path(&self) -> PathBuf {
        self.reference_dir.join(&self.reference_name)
    }

    /// Scene rendered at every sample count.
    #[must_use]
    pub fn scene_path(&self) -> PathBuf {
        self.reference_dir.join(&self.scene_name)
    }

    /// Directory receiving renders, the log, and the heatmap.
    #[must_use]
    pub fn benchmark_dir(&self) -> PathBuf {
        self.reference_dir.join(Self::BENCHMARK_DIR)
    }

    /// Persisted copy of the sweep log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.benchmark_dir().join(Self::LOG_FILE)
    }

    /// Difference visualization written after the sweep.
    #[must_use]
    pub fn heatmap_path(&self) -> PathBuf {
        self.benchmark_dir().join(Self::HEATMAP_FILE)
    }

    /// Render written for `samples`.
    #[must_use]
    pub fn render_path(&self, samples: u32) -> PathBuf {
        self.benchmark_dir().join(output_file_name(samples))
    }
}

fn default_program_path() -> PathBuf {
    PathBuf::from(RenderConfig::DEFAULT_PROGRAM_PATH)
}

fn default_resource_dir() -> PathBuf {
    PathBuf::from(RenderConfig::DEFAULT_RESOURCE_DIR)
}

fn default_scene_name() -> String {
    String::from(SweepConfig::DEFAULT_SCENE_NAME)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn render_config(total: u32, per_batch: u32) -> RenderConfig {
        RenderConfig {
            total_samples: total,
            samples_per_batch: per_batch,
            ..RenderConfig::default()
        }
    }

    #[test]
    fn default_splits_into_twenty_batches() {
        assert_eq!(RenderConfig::default().batch_count().unwrap(), 20);
    }

    #[test]
    fn exact_multiple_is_accepted() {
        assert_eq!(render_config(4000, 1000).batch_count().unwrap(), 4);
        assert_eq!(render_config(1000, 1000).batch_count().unwrap(), 1);
    }

    #[test]
    fn remainder_is_rejected() {
        let result = render_config(4000, 3000).batch_count();
        assert!(matches!(
            result,
            Err(ConfigError::NotDivisible {
                total: 4000,
                per_batch: 3000
            })
        ));
    }

    #[test]
    fn zero_budgets_are_rejected() {
        assert!(matches!(
            render_config(4000, 0).batch_count(),
            Err(ConfigError::ZeroSamples(_))
        ));
        assert!(matches!(
            render_config(0, 1000).batch_count(),
            Err(ConfigError::ZeroSamples(_))
        ));
    }

    #[test]
    fn artifact_paths() {
        let config = RenderConfig {
            output_dir: PathBuf::from("out"),
            ..render_config(4000, 1000)
        };
        assert_eq!(config.renderer_output(), Path::new("out/1000_ref.png"));
        assert_eq!(config.batch_artifact(2), Path::new("out/2.png"));
        assert_eq!(config.reference_path(), Path::new("out/4000_ref.png"));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: RenderConfig =
            from_json_str(r#"{"total_samples": 8000, "samples_per_batch": 2000}"#).unwrap();
        assert_eq!(config.batch_count().unwrap(), 4);
        assert_eq!(config.program_path, Path::new("buildDir/renderer"));
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<RenderConfig, _> = from_json_str(r#"{"total_sample": 8000}"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render.json");
        let config = RenderConfig {
            timeout_secs: Some(600),
            ..render_config(6000, 2000)
        };
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        let loaded: RenderConfig = from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn missing_config_file_is_a_read_error() {
        let result: Result<RenderConfig, _> = from_json_file(Path::new("/nonexistent/cfg.json"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn sweep_requires_domain() {
        let result: Result<SweepConfig, _> = from_json_str(
            r#"{"reference_dir": "r", "reference_name": "ref.png", "sample_counts": [1000]}"#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn sweep_paths_and_defaults() {
        let config: SweepConfig = from_json_str(
            r#"{
                "reference_dir": "resources/references/big_light_cornell",
                "reference_name": "100000_ref_sphere.png",
                "sample_counts": [1000, 2000],
                "domain": "linear"
            }"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.scene_name, "scene.yaml");
        assert_eq!(
            config.render_path(2000),
            Path::new("resources/references/big_light_cornell/benchmark/2000_ref.png")
        );
        assert_eq!(
            config.log_path(),
            Path::new("resources/references/big_light_cornell/benchmark/log.txt")
        );
    }

    #[test]
    fn sweep_sample_counts_are_validated() {
        let mut config: SweepConfig = from_json_str(
            r#"{"reference_dir": "r", "reference_name": "x.png", "sample_counts": [], "domain": "perceptual"}"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::EmptySweep)));
        config.sample_counts = vec![100, 0];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositiveSampleCount(1))
        ));
    }
}
