//! Error types for the tail library.

use std::sync::Arc;
use thiserror::Error;

/// The main error type for tail operations.
///
/// Errors are cheap to clone so the terminal error of a tail can be observed
/// from every handle that waits on it.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The configuration contradicts itself.
    #[error("Invalid config: {0}")]
    InvalidConfig(&'static str),

    /// The file could not be opened, or waiting for it to appear failed.
    #[error("Unable to open {path}: {source}")]
    FileOpen {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The initial seek position could not be applied.
    #[error("Seek error on {path}: {source}")]
    Seek {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A read failed for a reason other than end of data.
    #[error("Error reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The watched file disappeared and reopening was not requested.
    #[error("The tail should now stop")]
    Stop,

    /// File watching errors from the notify crate.
    #[error("File watcher error: {0}")]
    Watcher(Arc<notify::Error>),

    /// File path errors.
    #[error("Invalid file path: {message}")]
    InvalidPath { message: String },

    /// Any other I/O error.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// A line was not valid UTF-8 and was decoded lossily.
    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl Error {
    pub(crate) fn file_open(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        Error::FileOpen {
            path: path.to_string(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn seek(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        Error::Seek {
            path: path.to_string(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn read(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        Error::Read {
            path: path.to_string(),
            source: Arc::new(source),
        }
    }

    /// Whether this is the clean-termination sentinel rather than a failure.
    pub fn is_stop(&self) -> bool {
        matches!(self, Error::Stop)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Error::Watcher(Arc::new(err))
    }
}

/// A convenient Result type for tail operations.
pub type Result<T> = std::result::Result<T, Error>;
