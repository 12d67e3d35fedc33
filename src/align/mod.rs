//! Aligner engines.
//!
//! Two read aligners share one batched contract ([`Aligner`]): build or load
//! an index once, then feed query batches and collect SAM rows. The
//! in-process [`Minimap2Aligner`] converts engine regions through the
//! engine-neutral [`Region`] type; the out-of-process [`Bowtie2Aligner`]
//! drives a `bowtie2` child and parses its SAM output on a reader thread.
//! [`PairwiseAligner`] scores and aligns single query/subject pairs.

mod bowtie2;
mod minimap2;
mod pairwise;
mod region;

use std::io;
use std::path::{Path, PathBuf};

use crate::batch::{AlignmentBatch, SequenceBatch};
use crate::error::ErrorKind;
use crate::sam::AlignmentReadError;

pub use bowtie2::{is_index_prefix as is_bowtie2_index, Bowtie2Aligner, Bowtie2Config};
pub use minimap2::{Minimap2Aligner, Minimap2Config, SharedMinimap2Index};
pub use pairwise::{
    reconstruct_aligned, CigarAlignment, FullAlignment, GapAffineAligner, PairwiseAligner,
    PairwiseBackend, PairwiseConfig, Penalties, Scope,
};
pub use region::{
    paired_end_rows, single_end_rows, template_length, CigarOp, CigarStats, MateInfo, Region,
};

/// A reference sequence an index is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentSubject {
    /// Reference name, reported in the `reference` column
    pub name: String,
    /// Nucleotide sequence
    pub sequence: String,
}

impl AlignmentSubject {
    /// Pair a name with its sequence.
    pub fn new(name: impl Into<String>, sequence: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sequence: sequence.into(),
        }
    }
}

/// Batched index-once / query-many contract shared by the read aligners.
pub trait Aligner {
    /// Build an index over `subjects`, replacing any current one.
    fn build_index(&mut self, subjects: &[AlignmentSubject]) -> Result<(), AlignerError>;

    /// Build an index over one subject.
    fn build_single_index(&mut self, subject: &AlignmentSubject) -> Result<(), AlignerError> {
        self.build_index(std::slice::from_ref(subject))
    }

    /// Use an index previously written to disk.
    fn load_index(&mut self, path: &Path) -> Result<(), AlignerError>;

    /// Align `queries` and append the resulting rows to `output`.
    ///
    /// Engines that stream may hold rows back until [`Aligner::finish`].
    fn align(
        &mut self,
        queries: &SequenceBatch,
        output: &mut AlignmentBatch,
    ) -> Result<(), AlignerError>;

    /// Flush rows still held by the engine.
    fn finish(&mut self, _output: &mut AlignmentBatch) -> Result<(), AlignerError> {
        Ok(())
    }
}

/// Errors raised by the aligner engines.
#[derive(Debug, thiserror::Error)]
pub enum AlignerError {
    /// The engine is not compiled in or not installed.
    #[error("{engine}: engine unavailable: {reason}")]
    Unavailable {
        /// Engine name
        engine: &'static str,
        /// What is missing
        reason: String,
    },

    /// The engine reported a failure.
    #[error("{engine}: {reason}")]
    Failed {
        /// Engine name
        engine: &'static str,
        /// What went wrong
        reason: String,
    },

    /// Invalid configuration or call sequence.
    #[error("{engine}: {reason}")]
    Parameter {
        /// Engine name
        engine: &'static str,
        /// What was wrong
        reason: String,
    },

    /// An index file or prefix does not exist.
    #[error("{engine}: no index found at {}", path.display())]
    IndexNotFound {
        /// Engine name
        engine: &'static str,
        /// Path or prefix given
        path: PathBuf,
    },

    /// Talking to the engine (pipes, temp files) failed.
    #[error("{engine}: {context}: {source}")]
    Io {
        /// Engine name
        engine: &'static str,
        /// Operation that failed
        context: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The engine's SAM output could not be parsed.
    #[error("{engine}: unreadable engine output: {source}")]
    Output {
        /// Engine name
        engine: &'static str,
        /// Parser error
        #[source]
        source: AlignmentReadError,
    },

    /// The host cancelled the query.
    #[error("{engine}: cancelled by host")]
    Cancelled {
        /// Engine name
        engine: &'static str,
    },
}

impl AlignerError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AlignerError::Unavailable { .. } => ErrorKind::EngineUnavailable,
            AlignerError::Failed { .. }
            | AlignerError::Io { .. }
            | AlignerError::Output { .. } => ErrorKind::EngineFailed,
            AlignerError::Parameter { .. } => ErrorKind::ParameterError,
            AlignerError::IndexNotFound { .. } => ErrorKind::FileNotFound,
            AlignerError::Cancelled { .. } => ErrorKind::CancelledByHost,
        }
    }

    pub(crate) fn parameter(engine: &'static str, reason: impl Into<String>) -> Self {
        AlignerError::Parameter {
            engine,
            reason: reason.into(),
        }
    }

    pub(crate) fn failed(engine: &'static str, reason: impl Into<String>) -> Self {
        AlignerError::Failed {
            engine,
            reason: reason.into(),
        }
    }
}

/// Reject an empty subject list or an empty subject sequence.
pub(crate) fn check_subjects(
    engine: &'static str,
    subjects: &[AlignmentSubject],
) -> Result<(), AlignerError> {
    if subjects.is_empty() {
        return Err(AlignerError::parameter(
            engine,
            "cannot build an index from an empty subject list",
        ));
    }
    if let Some(empty) = subjects.iter().find(|s| s.sequence.is_empty()) {
        return Err(AlignerError::parameter(
            engine,
            format!("cannot build an index: subject '{}' is empty", empty.name),
        ));
    }
    Ok(())
}
