use std::io;
use std::path::PathBuf;

use groundtruth_pipeline::PipelineError;

use crate::config::ConfigError;
use crate::image_io::ImageIoError;
use crate::renderer::RenderError;

/// Errors that abort a reference run or a sweep.
///
/// Failures of individual renderer invocations are not errors at this
/// level: they are logged and recorded in the run result.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The renderer cannot be run at all.
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Reading or writing a required image failed.
    #[error(transparent)]
    Image(#[from] ImageIoError),

    /// Merging or comparing images failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// An output directory could not be created.
    #[error("cannot create output directory {}: {source}", path.display())]
    OutputDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The run log could not be opened.
    #[error("cannot open log: {0}")]
    Log(#[source] io::Error),

    /// No render in a sweep could be evaluated.
    #[error("no render could be evaluated against the reference")]
    NoRenders,
}

pub(crate) fn create_dir(path: &std::path::Path) -> Result<(), RunError> {
    std::fs::create_dir_all(path).map_err(|source| RunError::OutputDir {
        path: path.to_path_buf(),
        source,
    })
}
