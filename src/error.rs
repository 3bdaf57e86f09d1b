//! Error types for archive path resolution and mutation.
//!
//! Every fallible operation returns [`Result<T>`]. The variants keep the
//! offending path so wrapper commands can print a precise diagnostic.

use std::io;

/// The error type for resolver, locator and mutation operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An entry or a path segment does not exist.
    #[error("{path}: No such file or directory")]
    NotFound {
        /// The path that could not be found.
        path: String,
    },

    /// A non-terminal segment is neither a directory nor an archive.
    #[error("{path}: Not a directory")]
    NotADirectory {
        /// The offending path.
        path: String,
    },

    /// The operation requires a non-directory.
    #[error("{path}: Is a directory")]
    IsADirectory {
        /// The offending path.
        path: String,
    },

    /// The entry exists but holds no content of its own, e.g. a symlink or
    /// a device node.
    #[error("{path}: Not a regular file")]
    NotARegularFile {
        /// The offending entry.
        path: String,
    },

    /// A canonical path or an entry name exceeds the supported length.
    #[error("File name too long ({len} > {max})")]
    NameTooLong {
        /// Length of the rejected name in bytes.
        len: usize,
        /// The configured ceiling.
        max: usize,
    },

    /// A header checksum mismatch or a short block read.
    #[error("Corrupt archive at offset {offset:#x}: {reason}")]
    Corrupt {
        /// Byte offset of the block where corruption was detected.
        offset: u64,
        /// A description of the corruption.
        reason: String,
    },

    /// The access-mode check on an entry failed.
    #[error("{path}: Permission denied")]
    PermissionDenied {
        /// The entry that was checked.
        path: String,
    },

    /// The path handed to the resolver is empty or not absolute.
    #[error("{path}: Invalid argument")]
    InvalidPath {
        /// The rejected input.
        path: String,
    },

    /// A numeric value does not fit into its octal header field.
    #[error("Value {value} does not fit into the {field} field")]
    FieldOverflow {
        /// Header field name.
        field: &'static str,
        /// The value that overflowed.
        value: u64,
    },

    /// Compressed archives can be read but not mutated in place.
    #[error("{path}: Read-only archive")]
    ReadOnly {
        /// The compressed archive.
        path: String,
    },

    /// An underlying read, write or seek failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns true when the error is a definite absence rather than a failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound { path: path.into() }
    }

    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Error::Corrupt {
            offset,
            reason: reason.into(),
        }
    }
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
