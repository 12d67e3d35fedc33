//! Error kinds shared by every reader, engine and orchestrator.
//!
//! Each subsystem owns its own `thiserror` enum; all of them classify into
//! [`ErrorKind`] and render as `<component>: <reason> at <location>`. The
//! crate-level [`Error`] wraps them so callers that mix subsystems (the
//! table-function orchestrators, the CLI) can use a single `?`.

use std::fmt;
use std::path::{Path, PathBuf};

/// Closed set of failure categories surfaced to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A named input does not exist or cannot be opened.
    FileNotFound,
    /// Input violates its format.
    MalformedInput,
    /// Compressed payload failed to inflate.
    Corrupt,
    /// Byte or element counts disagree.
    SizeMismatch,
    /// Format version or variant is not supported.
    UnsupportedVersion,
    /// An external engine is not installed or not compiled in.
    EngineUnavailable,
    /// An external engine returned a failure.
    EngineFailed,
    /// An input relation lacks required columns or has wrong types.
    SchemaMismatch,
    /// A named parameter has an invalid value.
    ParameterError,
    /// A placement refers to an edge id absent from the tree.
    UnknownEdge,
    /// A placement's distal length lies outside its edge.
    DistalOutOfRange,
    /// The host interrupted the query.
    CancelledByHost,
}

impl ErrorKind {
    /// Stable name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FileNotFound => "FileNotFound",
            ErrorKind::MalformedInput => "MalformedInput",
            ErrorKind::Corrupt => "Corrupt",
            ErrorKind::SizeMismatch => "SizeMismatch",
            ErrorKind::UnsupportedVersion => "UnsupportedVersion",
            ErrorKind::EngineUnavailable => "EngineUnavailable",
            ErrorKind::EngineFailed => "EngineFailed",
            ErrorKind::SchemaMismatch => "SchemaMismatch",
            ErrorKind::ParameterError => "ParameterError",
            ErrorKind::UnknownEdge => "UnknownEdge",
            ErrorKind::DistalOutOfRange => "DistalOutOfRange",
            ErrorKind::CancelledByHost => "CancelledByHost",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position inside an input where a failure was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offset {
    /// Byte offset from the start of the stream.
    Byte(u64),
    /// Zero-based record number.
    Record(u64),
    /// Zero-based row of an input relation.
    Row(u64),
    /// Character offset inside an in-memory string.
    Char(u64),
}

/// Where a failure happened: an optional path plus an optional offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    /// File the failure relates to.
    pub path: Option<PathBuf>,
    /// Offset inside that file or relation.
    pub offset: Option<Offset>,
}

impl Location {
    /// Location with no information.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Location naming a file only.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            offset: None,
        }
    }

    /// Location with a path and a byte offset.
    pub fn byte(path: impl AsRef<Path>, offset: u64) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            offset: Some(Offset::Byte(offset)),
        }
    }

    /// Location with a path and a record number.
    pub fn record(path: impl AsRef<Path>, record: u64) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            offset: Some(Offset::Record(record)),
        }
    }

    /// Location of a row in an input relation.
    pub fn row(row: u64) -> Self {
        Self {
            path: None,
            offset: Some(Offset::Row(row)),
        }
    }

    /// Location of a character in an in-memory text.
    pub fn char(offset: u64) -> Self {
        Self {
            path: None,
            offset: Some(Offset::Char(offset)),
        }
    }

    /// Replace the offset, keeping the path.
    pub fn with_offset(mut self, offset: Offset) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.path, self.offset) {
            (None, None) => f.write_str("<unknown>"),
            (Some(path), None) => write!(f, "{}", path.display()),
            (path, Some(offset)) => {
                if let Some(path) = path {
                    write!(f, "{}:", path.display())?;
                }
                match offset {
                    Offset::Byte(b) => write!(f, "byte {b}"),
                    Offset::Record(r) => write!(f, "record {r}"),
                    Offset::Row(r) => write!(f, "row {r}"),
                    Offset::Char(c) => write!(f, "char {c}"),
                }
            }
        }
    }
}

/// Crate-level error wrapping every subsystem error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Base64 / zlib / float reinterpretation failure.
    #[cfg(feature = "mzml")]
    #[error(transparent)]
    Binary(#[from] crate::mzml::BinaryDecodeError),

    /// mzML reader failure.
    #[cfg(feature = "mzml")]
    #[error(transparent)]
    MzML(#[from] crate::mzml::MzMLError),

    /// GenBank XML, FASTA or feature-table text failure.
    #[cfg(feature = "ncbi")]
    #[error(transparent)]
    Ncbi(#[from] crate::ncbi::NcbiError),

    /// SFF reader failure.
    #[error(transparent)]
    Sff(#[from] crate::sff::SffError),

    /// FASTA/FASTQ reader or writer failure.
    #[error(transparent)]
    Fastx(#[from] crate::fastx::FastxError),

    /// SAM/BAM reader failure.
    #[error(transparent)]
    Alignment(#[from] crate::sam::AlignmentReadError),

    /// Newick parse, build or placement failure.
    #[error(transparent)]
    Newick(#[from] crate::newick::NewickError),

    /// Aligner engine failure.
    #[error(transparent)]
    Aligner(#[from] crate::align::AlignerError),

    /// Columnar sink failure.
    #[error(transparent)]
    Sink(#[from] crate::sink::SinkError),

    /// Orchestrator failure (parameters, schema, cancellation).
    #[error(transparent)]
    Table(#[from] crate::table::TableError),
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            #[cfg(feature = "mzml")]
            Error::Binary(e) => e.kind(),
            #[cfg(feature = "mzml")]
            Error::MzML(e) => e.kind(),
            #[cfg(feature = "ncbi")]
            Error::Ncbi(e) => e.kind(),
            Error::Sff(e) => e.kind(),
            Error::Fastx(e) => e.kind(),
            Error::Alignment(e) => e.kind(),
            Error::Newick(e) => e.kind(),
            Error::Aligner(e) => e.kind(),
            Error::Sink(e) => e.kind(),
            Error::Table(e) => e.kind(),
        }
    }
}

/// Result alias over the crate-level [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Map an `io::Error` raised while opening `path` to the matching kind.
pub(crate) fn open_kind(err: &std::io::Error) -> ErrorKind {
    match err.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            ErrorKind::FileNotFound
        }
        _ => ErrorKind::MalformedInput,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        assert_eq!(Location::unknown().to_string(), "<unknown>");
        assert_eq!(Location::file("a.sff").to_string(), "a.sff");
        assert_eq!(Location::byte("a.mzML", 42).to_string(), "a.mzML:byte 42");
        assert_eq!(Location::row(3).to_string(), "row 3");
    }

    #[test]
    fn test_open_kind() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(open_kind(&err), ErrorKind::FileNotFound);
    }
}
