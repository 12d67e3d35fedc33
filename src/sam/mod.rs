//! SAM / BAM alignment reading.
//!
//! Decoding is delegated to `noodles`; this module adds format sniffing,
//! headerless input with a caller-supplied reference table, and conversion
//! of each record into an [`AlignmentRecord`](crate::batch::AlignmentRecord)
//! with the fixed tag set.

mod convert;
mod reader;
mod references;

use std::io;
use std::path::PathBuf;

use crate::error::{open_kind, ErrorKind, Location};
use crate::quality::QualityError;

pub use convert::{cigar_string, record_from_buf};
pub use reader::{AlignmentFormat, AlignmentReader};
pub use references::{synthesize_header, validate_reference_name, ReferenceLengths};

/// Errors raised while reading SAM / BAM input.
#[derive(Debug, thiserror::Error)]
pub enum AlignmentReadError {
    /// The input could not be opened.
    #[error("sam: cannot open file: {source} at {}", path.display())]
    Open {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The decoder rejected a header or a record.
    #[error("sam: {source} at {location}")]
    Decode {
        /// Underlying error
        #[source]
        source: io::Error,
        /// File and record number
        location: Location,
    },

    /// Structural problem in decodable input.
    #[error("sam: {reason} at {location}")]
    Malformed {
        /// What was wrong
        reason: String,
        /// File and record number
        location: Location,
    },

    /// CRAM or another container this reader does not handle.
    #[error("sam: unsupported alignment format ({format}) at {location}")]
    UnsupportedFormat {
        /// Detected container
        format: &'static str,
        /// Offending file
        location: Location,
    },

    /// A caller-supplied reference name or length is invalid.
    #[error("sam: invalid reference '{name}': {reason}")]
    InvalidReference {
        /// Reference name as given
        name: String,
        /// What was wrong
        reason: String,
    },

    /// Stored qualities fall outside the Phred range.
    #[error("sam: {source} at {location}")]
    Quality {
        /// Underlying error
        #[source]
        source: QualityError,
        /// File and record number
        location: Location,
    },
}

impl AlignmentReadError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AlignmentReadError::Open { source, .. } => open_kind(source),
            AlignmentReadError::Decode { .. }
            | AlignmentReadError::Malformed { .. }
            | AlignmentReadError::Quality { .. } => ErrorKind::MalformedInput,
            AlignmentReadError::UnsupportedFormat { .. } => ErrorKind::UnsupportedVersion,
            AlignmentReadError::InvalidReference { .. } => ErrorKind::ParameterError,
        }
    }
}
