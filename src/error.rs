//! Custom error types and result handling for kaiso operations.
//!
//! All operations return a [`Result<T>`] which is a type alias for `std::result::Result<T, Error>`.
//! Errors fall into three groups:
//!
//! - **Page-local** ([`Error::UnreadableImage`], [`Error::UnsupportedFormat`]): a single page
//!   could not be read. Depending on the configured policy the page is skipped and recorded,
//!   or the whole batch fails. See [`Error::is_page_local`].
//! - **Cancellation** ([`Error::Cancelled`]): an operator interrupt stopped the work. This is
//!   an expected termination, not a failure.
//! - **Fatal**: everything else (bad containers, I/O, encoding).
use std::path::PathBuf;

/// Type alias for Results with kaiso errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all kaiso operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O errors from the standard library
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Image processing errors
    #[error(transparent)]
    Image(#[from] image::ImageError),
    /// EPUB generation errors
    #[error(transparent)]
    Epub(#[from] epub_builder::Error),
    /// ZIP file operation errors
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    /// Blocking task join errors
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    /// Worker thread pool could not be started
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    /// Errors while walking the working cache
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    ConfigBuilder(#[from] crate::repack::RepackConfigBuilderError),
    /// The source is not a readable zip-family container
    #[error("'{0:?}' is not a valid container: {1}")]
    InvalidContainer(PathBuf, String),
    /// The source container holds no files
    #[error("'{0:?}' contains no files")]
    EmptyArchive(PathBuf),
    /// The page could not be decoded as an image
    #[error("can't open '{0:?}' as an image: {1}")]
    UnreadableImage(PathBuf, String),
    /// The page decoded, but its format is not one we can handle
    #[error("'{0:?}': unsupported image format '{1}'")]
    UnsupportedFormat(PathBuf, String),
    /// The container is too small for the requested benchmark sample
    #[error("'{path:?}' has {entries} entries, a sample needs at least {required}")]
    InsufficientSample {
        path: PathBuf,
        entries: usize,
        required: usize,
    },
    /// The operation was interrupted by the operator
    #[error("cancelled ({completed} of {total} tasks completed)")]
    Cancelled { completed: usize, total: usize },
    /// A recognised but unimplemented output format
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    /// Error for unsupported options or names (e.g. an unknown format name)
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// A worker panicked while running a task
    #[error("worker panicked: {0}")]
    WorkerPanic(String),
    /// The encoder rejected the image
    #[error("encoding failed: {0}")]
    Encode(String),
    /// Error for invalid file or directory paths
    #[error("The given path '{0:?}' is invalid: {1}")]
    InvalidPath(PathBuf, String),
    /// Other errors that don't fit into specific categories
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Whether this error concerns a single page only, and may be skipped
    /// when the batch tolerates page errors.
    pub fn is_page_local(&self) -> bool {
        matches!(
            self,
            Error::UnreadableImage(..) | Error::UnsupportedFormat(..)
        )
    }

    /// Whether this error is an operator cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

impl From<String> for Error {
    fn from(error: String) -> Self {
        Error::Other(error)
    }
}

impl From<&str> for Error {
    fn from(error: &str) -> Self {
        Error::Other(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_local_classification() {
        assert!(Error::UnreadableImage(PathBuf::from("a.png"), "bad".into()).is_page_local());
        assert!(Error::UnsupportedFormat(PathBuf::from("a.gif"), "GIF".into()).is_page_local());
        assert!(!Error::EmptyArchive(PathBuf::from("a.cbz")).is_page_local());
        assert!(!Error::Cancelled { completed: 1, total: 2 }.is_page_local());
        assert!(Error::Cancelled { completed: 1, total: 2 }.is_cancelled());
    }
}
