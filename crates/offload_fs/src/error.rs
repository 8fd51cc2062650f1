// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;
use std::path::Path;

use thiserror::Error;

/// A specialized `Result` type for filesystem operations that return an
/// [`Error`][enum@Error] on failure.
pub type Result<T> = std::result::Result<T, Error>;

/// A classified filesystem failure.
///
/// Every operation exposed by [`FileSystem`](crate::FileSystem) reports
/// failures through this type, whether the operation was run blocking or
/// delivered through a completion callback. Native [`std::io::Error`] values
/// never cross the facade directly; they are classified by kind and, where no
/// specific classification applies, preserved as the source of [`Error::Io`].
///
/// Each variant carries the subject of the failure, usually the path that the
/// failing native call was operating on.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The target of the operation does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The target already exists where the operation needed to create it.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The process lacks the privileges required by the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The operation or attribute is not supported by the target filesystem
    /// or platform.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A caller-supplied value failed a precondition. These failures are
    /// raised before any native call is attempted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Any other native I/O failure.
    ///
    /// The original error is available through [`std::error::Error::source`].
    #[error("I/O failure on {subject}: {source}")]
    Io {
        /// What the failing native call was operating on.
        subject: String,
        /// The native error.
        #[source]
        source: io::Error,
    },
}

/// The classification of an [`Error`][enum@Error], without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// See [`Error::NotFound`].
    NotFound,
    /// See [`Error::AlreadyExists`].
    AlreadyExists,
    /// See [`Error::AccessDenied`].
    AccessDenied,
    /// See [`Error::Unsupported`].
    Unsupported,
    /// See [`Error::InvalidArgument`].
    InvalidArgument,
    /// See [`Error::Io`].
    Io,
}

impl Error {
    /// Returns the classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    #[cfg(not(unix))]
    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    pub(crate) fn already_exists(path: &Path) -> Self {
        Self::AlreadyExists(path.display().to_string())
    }

    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            subject: path.display().to_string(),
            source,
        }
    }
}

/// Classifies a native I/O error raised while operating on `path`.
pub(crate) fn translate(err: io::Error, path: &Path) -> Error {
    classify(err, path.display().to_string())
}

/// Classifies a native I/O error raised while operating on `subject`, which
/// may be something other than a path, such as a user or group name.
///
/// This is the only place where native errors are mapped onto the
/// [`Error`][enum@Error] taxonomy.
pub(crate) fn classify(err: io::Error, subject: String) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::NotFound(subject),
        io::ErrorKind::AlreadyExists => Error::AlreadyExists(subject),
        io::ErrorKind::PermissionDenied => Error::AccessDenied(subject),
        io::ErrorKind::Unsupported => Error::Unsupported(subject),
        _ => Error::Io { subject, source: err },
    }
}

/// Attaches the subject path to native results and translates their errors.
pub(crate) trait NativeResultExt<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> NativeResultExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|err| translate(err, path))
    }
}
