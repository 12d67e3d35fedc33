//! FASTA / FASTQ reading and writing.
//!
//! Reading goes through `needletail`, which detects the format and gzip
//! compression from the leading bytes. Writing supports plain, gzip and
//! zstd output and split paired-end files through an `{ORIENTATION}` token.

mod reader;
mod writer;

use std::io;
use std::path::PathBuf;

use crate::error::{open_kind, ErrorKind, Location};
use crate::quality::QualityError;

pub use reader::SequenceReader;
pub use writer::{
    has_orientation_placeholder, substitute_orientation, FastxFormat, FastxWriter,
    FastxWriterOptions, OutputCompression, ORIENTATION_TOKEN,
};

/// Errors raised while reading or writing FASTA / FASTQ.
#[derive(Debug, thiserror::Error)]
pub enum FastxError {
    /// An input could not be opened or an output could not be created.
    #[error("fastx: cannot open file: {source} at {}", path.display())]
    Open {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The parser rejected the input.
    #[error("fastx: {source} at {location}")]
    Parse {
        /// Underlying error
        #[source]
        source: needletail::errors::ParseError,
        /// File and record number
        location: Location,
    },

    /// The input holds no records.
    #[error("fastx: Empty file at {location}")]
    Empty {
        /// Offending file
        location: Location,
    },

    /// Structural problem in otherwise parseable input.
    #[error("fastx: {reason} at {location}")]
    Malformed {
        /// What was wrong
        reason: String,
        /// File and record number
        location: Location,
    },

    /// A stored quality string cannot be converted.
    #[error("fastx: {source} at {location}")]
    Quality {
        /// Underlying error
        #[source]
        source: QualityError,
        /// File and record number
        location: Location,
    },

    /// An option value or combination is invalid.
    #[error("fastx: {0}")]
    Parameter(String),

    /// Writing output failed.
    #[error("fastx: write failed: {source} at {}", path.display())]
    Write {
        /// Output path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl FastxError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FastxError::Open { source, .. } => open_kind(source),
            FastxError::Parse { .. }
            | FastxError::Empty { .. }
            | FastxError::Malformed { .. }
            | FastxError::Quality { .. } => ErrorKind::MalformedInput,
            FastxError::Parameter(_) => ErrorKind::ParameterError,
            FastxError::Write { .. } => ErrorKind::EngineFailed,
        }
    }
}

/// Read id with any comment and a trailing `/1`..`/9` mate suffix removed.
///
/// The suffix is only stripped from ids of at least three characters, so
/// `/1` alone stays as is.
pub fn base_read_id(id: &str) -> &str {
    let base = id.split(' ').next().unwrap_or(id);
    let bytes = base.as_bytes();
    let n = bytes.len();
    if n >= 3 && bytes[n - 2] == b'/' && (b'1'..=b'9').contains(&bytes[n - 1]) {
        &base[..n - 2]
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_read_id() {
        assert_eq!(base_read_id("read/1"), "read");
        assert_eq!(base_read_id("read/2 comment here"), "read");
        assert_eq!(base_read_id("read/0"), "read/0");
        assert_eq!(base_read_id("/1"), "/1");
        assert_eq!(base_read_id("x/1"), "x");
        assert_eq!(base_read_id("plain"), "plain");
        assert_eq!(base_read_id(""), "");
    }
}
