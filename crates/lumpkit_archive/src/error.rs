//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// the container does not start with a valid header
    #[error("invalid {format} header: {reason}")]
    #[diagnostic(code(lumpkit::invalid_header))]
    InvalidHeader {
        /// Identifier of the format that rejected the data
        format: &'static str,
        /// What was wrong with the header
        reason: String,
    },

    /// an entry in the directory table points outside of the container
    #[error("entry {index} ({name:?}) is corrupt: {reason}")]
    #[diagnostic(
        code(lumpkit::corrupt_entry),
        help("the archive is invalid and/or truncated")
    )]
    CorruptEntry {
        /// Position of the entry in the directory table
        index: usize,
        /// Name of the entry as read from the table
        name: String,
        /// What was wrong with the entry
        reason: String,
    },

    /// the tree holds more entries than the format can store
    #[error("{format} archives can contain no more than {max} entries, tree has {count}")]
    #[diagnostic(code(lumpkit::too_many_entries))]
    TooManyEntries {
        /// Identifier of the format that rejected the tree
        format: &'static str,
        /// Number of entries in the tree
        count: usize,
        /// Maximum supported by the format
        max: usize,
    },

    /// a cursor access went past the end of its buffer
    #[error("access of {requested} bytes at {position} is out of bounds (length {len})")]
    #[diagnostic(code(lumpkit::out_of_bounds))]
    OutOfBounds {
        /// Cursor position at the time of the access
        position: usize,
        /// Number of bytes requested
        requested: usize,
        /// Length of the underlying buffer
        len: usize,
    },

    /// an entry name did not fit the format's name field
    #[error("entry name {name:?} is too long, truncated to {truncated:?}")]
    #[diagnostic(code(lumpkit::name_too_long), severity(Warning))]
    NameTooLong {
        /// The name as it was in the tree
        name: String,
        /// The name as it was written
        truncated: String,
    },

    /// no registered format recognised the data
    #[error("unable to detect archive format")]
    #[diagnostic(code(lumpkit::unknown_format))]
    UnknownFormat,

    /// the requested format identifier is not registered
    #[error("no format registered with id {0:?}")]
    #[diagnostic(code(lumpkit::unsupported_format))]
    UnsupportedFormat(String),

    /// the operation is not supported by the bound format
    #[error("{format} archives do not support {operation}")]
    Unsupported {
        /// Identifier of the bound format
        format: &'static str,
        /// The operation that was refused
        operation: &'static str,
    },

    /// unable to find requested entry
    #[error("unable to find requested entry")]
    EntryNotFound(#[from] EntryNotFoundError),

    /// a sibling with the same name already exists
    #[error("{path:?} already contains an entry or directory named {name:?}")]
    DuplicateName {
        /// The directory the name was inserted into
        path: String,
        /// The conflicting name
        name: String,
    },

    /// the name cannot be used for an entry or directory
    #[error("invalid name {0:?}")]
    #[diagnostic(help("names must be non-empty and must not contain '/'"))]
    InvalidName(String),

    /// an entry property required by the format is missing or has the wrong kind
    #[error("entry {entry:?} has no usable {key:?} property")]
    MissingProperty {
        /// Name of the entry
        entry: String,
        /// The property key
        key: &'static str,
    },

    /// an entry has to be loaded before this operation
    #[error("entry {0:?} has no data loaded")]
    NotLoaded(String),

    /// the archive was created in memory and has no file to save to
    #[error("archive has no file path")]
    #[diagnostic(help("use `Archive::save_as` to choose a destination"))]
    NoPath,

    /// the archive has no backing store to load data from
    #[error("archive has no backing store")]
    NoBackingStore,

    /// the backing file changed since the archive was opened
    #[error("backing store changed since the archive was opened, rescan required")]
    #[diagnostic(help("reopen the archive with `Archive::rescan`"))]
    StaleBackingStore,

    /// the operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,
}

/// Error type to provide further information when an entry has not been found
#[derive(Error, Diagnostic, Debug)]
#[error("unable to find requested entry")]
pub enum EntryNotFoundError {
    /// at index {0}
    #[error("at index {0}")]
    Index(usize),

    /// by path {0}
    #[error("by path {0}")]
    Path(String),
}

impl Error {
    pub(crate) fn invalid_header(format: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidHeader {
            format,
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Error::EntryNotFound(EntryNotFoundError::Path(path.into()))
    }
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
