//! groundtruth-io: the filesystem and process boundary.
//!
//! Everything that touches the outside world lives here, on top of the
//! pure core in `groundtruth-pipeline`:
//!
//! - [`image_io`]: PNG/JPEG/BMP load and save as 8-bit RGB
//! - [`renderer`]: the external renderer behind [`RenderProcess`]
//! - [`orchestrator`]: batch rendering and reference accumulation
//! - [`sweep`]: convergence benchmark against a stored reference
//! - [`flip`]: NVIDIA FLIP as a [`PerceptualMetric`](groundtruth_pipeline::PerceptualMetric)
//! - [`sink`]: where run output goes
//! - [`config`]: JSON-loadable run configuration

pub mod clock;
pub mod config;
pub mod error;
pub mod flip;
pub mod image_io;
pub mod orchestrator;
pub mod renderer;
pub mod sink;
pub mod sweep;

pub use clock::StdClock;
pub use config::{ConfigError, RenderConfig, SweepConfig};
pub use error::RunError;
pub use flip::FlipMetric;
pub use image_io::ImageIoError;
pub use orchestrator::{
    BatchFailure, BatchRun, CleanupReport, FailureReason, ReferenceReport, accumulate_reference,
    cleanup_batches, render_batches,
};
pub use renderer::{ProcessOutput, RenderError, RenderProcess, Subprocess};
pub use sink::{LogSink, MemorySink, Tee};
pub use sweep::{SweepResultTable, SweepRow, run_sweep};
