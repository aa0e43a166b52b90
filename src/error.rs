//! Error types for the page archiver

use thiserror::Error;

/// Result type alias for archive operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading, capturing or packaging a page
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to load the page document
    #[error("Failed to load page: {0}")]
    LoadError(String),

    /// Network error while fetching a page or subresource
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The resource has not finished loading or has no pixels
    #[error("Resource not available: {0}")]
    ResourceUnavailable(String),

    /// Pixel data cannot be read back (cross-origin without CORS approval)
    #[error("Security error: {0}")]
    SecurityError(String),

    /// Failed to rasterize or encode a resource
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Failed to clone or serialize the document
    #[error("Snapshot failed: {0}")]
    SnapshotError(String),

    /// Failed to build the archive container
    #[error("Packaging failed: {0}")]
    PackagingError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::RenderError(err.to_string())
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Error::PackagingError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::PackagingError(format!("manifest serialization: {}", err))
    }
}
