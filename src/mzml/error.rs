use std::path::PathBuf;

use crate::error::{open_kind, ErrorKind, Location};

use super::binary::BinaryDecodeError;

/// Errors raised by [`MzMLReader`](super::MzMLReader).
///
/// Every error is fatal to the reader that produced it.
#[derive(Debug, thiserror::Error)]
pub enum MzMLError {
    /// The file could not be opened.
    #[error("mzml: cannot open file: {source} at {}", path.display())]
    Open {
        /// Path given to the reader
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The XML is not well formed.
    #[error("mzml: XML parse error: {source} at {location}")]
    Xml {
        /// Underlying error
        #[source]
        source: quick_xml::Error,
        /// Byte offset of the failure
        location: Location,
    },

    /// The document is well formed but violates mzML structure.
    #[error("mzml: {reason} at {location}")]
    Malformed {
        /// What was wrong
        reason: String,
        /// Byte offset of the failure
        location: Location,
    },

    /// A binary data array failed to decode.
    #[error("mzml: {source} at {location}")]
    Binary {
        /// Underlying error
        #[source]
        source: BinaryDecodeError,
        /// Byte offset of the `</binary>` end tag
        location: Location,
    },

    /// The reader already failed and cannot continue.
    #[error("mzml: reader is unusable after an earlier error at {location}")]
    Poisoned {
        /// File of the reader
        location: Location,
    },
}

impl MzMLError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MzMLError::Open { source, .. } => open_kind(source),
            MzMLError::Xml { .. } | MzMLError::Malformed { .. } | MzMLError::Poisoned { .. } => {
                ErrorKind::MalformedInput
            }
            MzMLError::Binary { source, .. } => source.kind(),
        }
    }
}
