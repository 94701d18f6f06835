//! Error types for the symdrop-core library.
//!
//! Failures coming out of the filesystem and the Mach-O parser are classified
//! into a closed [`ErrorKind`] taxonomy and carried as a [`WrappedError`],
//! which keeps the original low-level failure's diagnostic trace so it can be
//! printed when verbose output is requested. Upload-side failures live on the
//! crate-level [`Error`] enum.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for symdrop operations
pub type Result<T> = std::result::Result<T, Error>;

/// Hint appended to user-facing messages when verbose output is off
pub const VERBOSE_HINT: &str = "For additional details, rerun command with --verbose";

/// Closed set of failure kinds produced by file access and parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Permission denied while accessing a file
    Access,
    /// The file or directory does not exist
    FileNotFound,
    /// The operating system timed out the operation
    TimedOut,
    /// A read ran past the end of the file or a computed boundary
    OutOfRange,
    /// Any other I/O failure
    ReadFile,
    /// The leading magic number is not a recognised Mach-O or fat magic
    MagicNumber,
    /// A load command record is structurally invalid
    LoadCommand,
    /// No `LC_UUID` command was found in an architecture slice
    MissingUuid,
    /// A fixed-width field could not be decoded
    DataView,
    /// A fixed-width field lies outside the buffer it is decoded from
    BufferRange,
}

impl ErrorKind {
    /// Returns the stable name of this kind, used as the trace header
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Access => "AccessError",
            ErrorKind::FileNotFound => "FileNotFoundError",
            ErrorKind::TimedOut => "TimedOutError",
            ErrorKind::OutOfRange => "OutOfRangeError",
            ErrorKind::ReadFile => "ReadFileError",
            ErrorKind::MagicNumber => "MagicNumberError",
            ErrorKind::LoadCommand => "LoadCommandError",
            ErrorKind::MissingUuid => "MissingUUIDError",
            ErrorKind::DataView => "DataViewError",
            ErrorKind::BufferRange => "BufferRangeError",
        }
    }

    /// Returns the human message shown to users for a debug file failing with this kind
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::Access => "Incorrect permissions for",
            ErrorKind::FileNotFound => "No such file or directory",
            ErrorKind::TimedOut => "Operation timed out while parsing debug file",
            ErrorKind::OutOfRange => {
                "An out of range error occurred while trying to read bytes from debug file"
            }
            ErrorKind::ReadFile => "An error occurred while trying to read from debug file",
            ErrorKind::MagicNumber => "Unrecognized Mach-O magic number in debug file",
            ErrorKind::LoadCommand => "Invalid load command size in debug file",
            ErrorKind::MissingUuid => "No uuid found for debug file",
            ErrorKind::DataView => "An error occurred while parsing bytes from debug file",
            ErrorKind::BufferRange => {
                "Attempted to access bytes outside of range while parsing debug file"
            }
        }
    }

    /// Returns true for kinds produced by classifying a filesystem failure
    pub fn is_file_access(self) -> bool {
        matches!(
            self,
            ErrorKind::Access | ErrorKind::FileNotFound | ErrorKind::TimedOut | ErrorKind::ReadFile
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A classified failure that keeps the original failure's trace verbatim
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct WrappedError {
    kind: ErrorKind,
    message: String,
    original: Option<String>,
}

impl WrappedError {
    /// Wraps a lower-level failure, capturing its debug representation as the trace
    pub fn new(kind: ErrorKind, message: impl Into<String>, original: &dyn fmt::Debug) -> Self {
        Self {
            kind,
            message: message.into(),
            original: Some(format!("{original:?}")),
        }
    }

    /// Creates a failure detected directly by this crate, with no lower-level cause
    pub fn bare(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            original: None,
        }
    }

    /// Returns the failure kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the original failure's trace, if one was wrapped
    pub fn original(&self) -> Option<&str> {
        self.original.as_deref()
    }

    /// Full diagnostic trace: kind, message and the original failure
    pub fn trace(&self) -> String {
        match &self.original {
            Some(original) => format!(
                "{}: {}\n\nOriginal error: {}",
                self.kind, self.message, original
            ),
            None => format!("{}: {}", self.kind, self.message),
        }
    }

    /// Prefixes the message with the slice it was raised in
    pub fn in_slice(mut self, index: usize, arch: impl fmt::Display) -> Self {
        self.message = format!("slice {index} ({arch}): {}", self.message);
        self
    }
}

/// Classifies a raw filesystem failure by its OS-level error kind
pub fn classify_io(message: impl Into<String>, err: io::Error) -> WrappedError {
    let kind = match err.kind() {
        io::ErrorKind::PermissionDenied => ErrorKind::Access,
        io::ErrorKind::NotFound => ErrorKind::FileNotFound,
        io::ErrorKind::TimedOut => ErrorKind::TimedOut,
        io::ErrorKind::UnexpectedEof => ErrorKind::OutOfRange,
        _ => ErrorKind::ReadFile,
    };
    WrappedError::new(kind, message, &err)
}

/// Comprehensive error type for all symdrop operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Classified filesystem or parser failure
    #[error(transparent)]
    Wrapped(#[from] WrappedError),

    /// Transport-level HTTP failure (connection, TLS, body read)
    #[error("request to '{url}' failed: {source}")]
    Http {
        /// URL of the failed request
        url: String,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },

    /// The control plane accepted the upload but returned no signed URL
    #[error("Could not get upload url for: {filepath}")]
    MissingSignedUrl {
        /// Artifact path the upload was registered under
        filepath: String,
    },

    /// The API key is not of the form `<org>:<app>:<key>`
    #[error("invalid API key: expected '<org>:<app>:<key>'")]
    InvalidApiKey,

    /// The file name pattern could not be compiled
    #[error("invalid file pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The rejected pattern
        pattern: String,
        /// Underlying glob error
        #[source]
        source: globset::Error,
    },

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The CLI status endpoint rejected this client
    #[error("{message}")]
    StatusCheck {
        /// Message returned by the service
        message: String,
    },

    /// No candidate debug files were found under the input paths
    #[error("no debug information files found")]
    NoDebugFiles,

    /// One or more debug files could not be parsed
    #[error("failed to parse {failed} debug file(s)")]
    ParseFailed {
        /// Number of files that failed
        failed: usize,
    },

    /// One or more uploads were rejected by the server
    #[error("failed to upload {failed} debug file(s)")]
    UploadFailed {
        /// Number of architecture entries that failed
        failed: usize,
    },

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new transport error
    pub fn http(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            url: url.into(),
            source,
        }
    }

    /// Creates a new missing signed URL error
    pub fn missing_signed_url(filepath: impl Into<String>) -> Self {
        Self::MissingSignedUrl {
            filepath: filepath.into(),
        }
    }

    /// Creates a new status check error
    pub fn status_check(message: impl Into<String>) -> Self {
        Self::StatusCheck {
            message: message.into(),
        }
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the taxonomy kind for classified failures
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Wrapped(wrapped) => Some(wrapped.kind()),
            _ => None,
        }
    }

    /// Renders the error for the console.
    ///
    /// Verbose output appends the full trace of classified failures; otherwise
    /// a hint to rerun with `--verbose` is appended instead.
    pub fn report(&self, verbose: bool) -> String {
        match self {
            Self::Wrapped(wrapped) if verbose => format!("{wrapped}\n{}", wrapped.trace()),
            Self::Wrapped(wrapped) => format!("{wrapped}\n{VERBOSE_HINT}"),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_io_by_kind() {
        let cases = [
            (io::ErrorKind::PermissionDenied, ErrorKind::Access),
            (io::ErrorKind::NotFound, ErrorKind::FileNotFound),
            (io::ErrorKind::TimedOut, ErrorKind::TimedOut),
            (io::ErrorKind::UnexpectedEof, ErrorKind::OutOfRange),
            (io::ErrorKind::Interrupted, ErrorKind::ReadFile),
            (io::ErrorKind::Other, ErrorKind::ReadFile),
        ];
        for (io_kind, expected) in cases {
            let err = classify_io("reading", io::Error::new(io_kind, "boom"));
            assert_eq!(err.kind(), expected, "{io_kind:?}");
        }
    }

    #[test]
    fn test_classify_keeps_original_trace() {
        let err = classify_io("gathering", io::Error::new(io::ErrorKind::NotFound, "no such dir"));
        let trace = err.trace();
        assert!(trace.starts_with("FileNotFoundError: gathering"));
        assert!(trace.contains("Original error:"));
        assert!(trace.contains("no such dir"));
        assert!(err.original().unwrap().contains("no such dir"));
    }

    #[test]
    fn test_bare_trace_has_no_original() {
        let err = WrappedError::bare(ErrorKind::MissingUuid, "no LC_UUID");
        assert_eq!(err.original(), None);
        assert_eq!(err.trace(), "MissingUUIDError: no LC_UUID");
    }

    #[test]
    fn test_in_slice_prefixes_message() {
        let err = WrappedError::bare(ErrorKind::LoadCommand, "size 4").in_slice(2, "arm64");
        assert_eq!(err.message(), "slice 2 (arm64): size 4");
        assert_eq!(err.kind(), ErrorKind::LoadCommand);
    }

    #[test]
    fn test_report_verbosity() {
        let err: Error =
            classify_io("reading", io::Error::new(io::ErrorKind::PermissionDenied, "denied")).into();
        assert_eq!(err.kind(), Some(ErrorKind::Access));

        let quiet = err.report(false);
        assert!(quiet.starts_with("reading\n"));
        assert!(quiet.ends_with(VERBOSE_HINT));

        let verbose = err.report(true);
        assert!(verbose.contains("AccessError: reading"));
        assert!(verbose.contains("denied"));
        assert!(!verbose.contains(VERBOSE_HINT));
    }

    #[test]
    fn test_error_display() {
        let err = Error::missing_signed_url("ab/cdef/debuginfo");
        assert!(err.to_string().contains("ab/cdef/debuginfo"));
        assert_eq!(err.kind(), None);
        assert!(ErrorKind::ReadFile.is_file_access());
        assert!(!ErrorKind::MagicNumber.is_file_access());
    }
}
