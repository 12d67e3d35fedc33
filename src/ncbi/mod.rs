//! Parsers for text returned by NCBI services.
//!
//! Nothing here talks to the network. Callers hand over the body of an
//! E-utilities or Datasets response (or a saved copy of one) and get back
//! batches the rest of the crate already knows how to emit:
//!
//! - **accessions**: classify `GCF_`/`GCA_` assemblies versus RefSeq and
//!   GenBank sequences, and pull the accession out of NCBI FASTA ids
//! - **GenBank XML** (`GBSet`/`GBSeq`) into [`GenBankMetadata`] rows
//! - **INSDC feature tables** (`>Feature ...` five-column text) into
//!   GFF3-style [`FeatureAnnotation`] rows
//!
//! Feature-table locations written as `join(...)`, `complement(...)` or
//! `order(...)` are reduced to their outer bounds; the first one found in a
//! table raises a user-visible warning.

mod accession;
mod feature_table;
mod genbank;

use std::io;
use std::path::{Path, PathBuf};

use crate::error::{open_kind, ErrorKind, Location};
use crate::table::is_stdin_path;

pub use accession::{
    detect_accession_type, extract_accession_from_fasta_id, is_assembly_accession, parse_fasta,
    AccessionType,
};
pub use feature_table::{parse_feature_table, FeatureAnnotation, FeatureAnnotationBatch};
pub use genbank::{parse_genbank_records, parse_genbank_xml, GenBankMetadata};

/// Errors raised by the NCBI parsers.
#[derive(Debug, thiserror::Error)]
pub enum NcbiError {
    /// A saved response could not be read.
    #[error("ncbi: cannot open file: {source} at {}", path.display())]
    Open {
        /// Path given
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// GenBank XML is not well formed.
    #[error("ncbi: XML parse error: {source} at {location}")]
    Xml {
        /// Underlying error
        #[source]
        source: quick_xml::Error,
        /// Character offset of the failure
        location: Location,
    },

    /// FASTA text rejected by the parser.
    #[error("ncbi: {source} at {location}")]
    Fasta {
        /// Underlying error
        #[source]
        source: needletail::errors::ParseError,
        /// Record number
        location: Location,
    },
}

impl NcbiError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NcbiError::Open { source, .. } => open_kind(source),
            NcbiError::Xml { .. } | NcbiError::Fasta { .. } => ErrorKind::MalformedInput,
        }
    }
}

/// Read a saved response into memory; `-` reads stdin.
pub(crate) fn read_text(path: &Path) -> Result<String, NcbiError> {
    let text = if is_stdin_path(path) {
        io::read_to_string(io::stdin())
    } else {
        std::fs::read_to_string(path)
    };
    text.map_err(|source| NcbiError::Open {
        path: path.to_path_buf(),
        source,
    })
}
