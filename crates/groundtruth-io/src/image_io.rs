//! Image file loading and saving.
//!
//! Every image is held in one canonical layout: 8-bit RGB. Files with
//! alpha, grayscale, or 16-bit channels are converted on load.

use std::io;
use std::path::{Path, PathBuf};

use groundtruth_pipeline::RgbImage;

/// Errors that can occur while reading or writing image files.
#[derive(Debug, thiserror::Error)]
pub enum ImageIoError {
    /// No file exists at the path.
    #[error("{} not found", .0.display())]
    NotFound(PathBuf),

    /// The file exists but could not be opened.
    #[error("cannot open {}: {source}", path.display())]
    Open {
        /// Path that was opened.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The file is not a supported image or is corrupt.
    #[error("cannot decode {}: {source}", path.display())]
    Decode {
        /// Path that was decoded.
        path: PathBuf,
        /// Underlying decoder error.
        source: image::ImageError,
    },

    /// The image could not be written.
    #[error("cannot write {}: {source}", path.display())]
    Write {
        /// Destination path.
        path: PathBuf,
        /// Underlying encoder or I/O error.
        source: image::ImageError,
    },
}

/// Load an image file as 8-bit RGB.
///
/// The format is detected from the file contents, not the extension.
///
/// # Errors
///
/// Returns [`ImageIoError::NotFound`] if `path` does not exist,
/// [`ImageIoError::Open`] for other I/O failures, and
/// [`ImageIoError::Decode`] if the contents are not a supported image.
pub fn load(path: &Path) -> Result<RgbImage, ImageIoError> {
    let open_error = |source: io::Error| {
        if source.kind() == io::ErrorKind::NotFound {
            ImageIoError::NotFound(path.to_path_buf())
        } else {
            ImageIoError::Open {
                path: path.to_path_buf(),
                source,
            }
        }
    };

    let reader = image::ImageReader::open(path)
        .map_err(open_error)?
        .with_guessed_format()
        .map_err(open_error)?;
    let decoded = reader.decode().map_err(|source| ImageIoError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!(
        path = %path.display(),
        width = decoded.width(),
        height = decoded.height(),
        "loaded image"
    );
    Ok(decoded.to_rgb8())
}

/// Save an 8-bit RGB image, creating or overwriting `path`.
///
/// The encoding is chosen from the file extension.
///
/// # Errors
///
/// Returns [`ImageIoError::Write`] if the extension is not a supported
/// format or the destination is not writable.
pub fn save(image: &RgbImage, path: &Path) -> Result<(), ImageIoError> {
    image.save(path).map_err(|source| ImageIoError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "saved image");
    Ok(())
}
