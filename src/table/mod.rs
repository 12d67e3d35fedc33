//! Table-function orchestrators.
//!
//! Every function follows the same life-cycle. `bind` validates parameters,
//! expands globs, loads mandatory inputs and fixes the output schema; the
//! bound value is the global state shared by all workers. Each worker then
//! creates its own local state and calls [`TableFunction::execute`] until it
//! reports exhaustion. Work units (files, query batches, shards) are claimed
//! under a mutex and processed without it.
//!
//! [`collect`] plays the host: it runs the workers on scoped threads, each
//! writing into its own [`ArrowSink`](crate::sink::ArrowSink).

mod align;
mod copy;
mod pairwise;
mod params;
mod paths;
mod read;
pub mod relation;
mod state;

use arrow::record_batch::RecordBatch;

use crate::error::{ErrorKind, Result};
use crate::sink::{ArrowSink, ColumnarSink, OutputSchema};

pub use align::{
    AlignBowtie2, AlignBowtie2Sharded, AlignMinimap2, AlignMinimap2Sharded, SaveMinimap2Index,
};
pub use copy::{copy_fastx, copy_newick};
pub use pairwise::{align_pairwise_cigar, align_pairwise_full, align_pairwise_score};
pub use params::{
    AlignBowtie2Params, AlignMinimap2Params, AlignPairwiseParams, CopyFastxParams,
    CopyNewickParams, ReadAlignmentsParams, ReadFastxParams, ReadMzmlParams, ReadNcbiParams,
    ReadNewickParams, ReadSffParams, SaveMinimap2IndexParams, ShardedAlignParams,
};
pub use paths::{expand_glob, is_stdin_path, FilePaths};
#[cfg(feature = "mzml")]
pub use read::{ReadMzml, ReadMzmlChromatograms};
#[cfg(feature = "ncbi")]
pub use read::{ReadFeatureTable, ReadGenBank};
pub use read::{ReadAlignments, ReadFastx, ReadNewick, ReadSff};
pub use state::{CancellationToken, Warnings, WorkClaimer};

/// Errors raised by the orchestrators themselves.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// A named parameter has an invalid value or combination.
    #[error("table: {0}")]
    Parameter(String),

    /// An input relation lacks a column or has the wrong types.
    #[error("table: {relation}: {reason}")]
    Schema {
        /// Relation name
        relation: String,
        /// What was wrong
        reason: String,
    },

    /// NULL in a column that requires a value.
    #[error("table: NULL in required column '{column}' of {relation} at row {row}")]
    NullValue {
        /// Relation name
        relation: String,
        /// Column name
        column: String,
        /// Zero-based row
        row: u64,
    },

    /// A glob pattern matched nothing.
    #[error("table: no files matched pattern: {pattern}")]
    NoFiles {
        /// Pattern given
        pattern: String,
    },

    /// The host interrupted the query.
    #[error("table: cancelled by host")]
    Cancelled,

    /// A worker thread panicked.
    #[error("table: worker thread panicked")]
    WorkerPanicked,
}

impl TableError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TableError::Parameter(_) | TableError::NullValue { .. } => ErrorKind::ParameterError,
            TableError::Schema { .. } => ErrorKind::SchemaMismatch,
            TableError::NoFiles { .. } => ErrorKind::FileNotFound,
            TableError::Cancelled => ErrorKind::CancelledByHost,
            TableError::WorkerPanicked => ErrorKind::EngineFailed,
        }
    }

    pub(crate) fn at_row(self, row: usize) -> Self {
        match self {
            TableError::NullValue {
                relation, column, ..
            } => TableError::NullValue {
                relation,
                column,
                row: row as u64,
            },
            other => other,
        }
    }
}

/// A bound table function: its global state plus the per-worker contract.
pub trait TableFunction: Sync {
    /// Per-worker scratch state.
    type Local: Send;

    /// Output columns.
    fn schema(&self) -> &OutputSchema;

    /// Upper bound on concurrent workers.
    fn max_workers(&self) -> usize {
        1
    }

    /// Create one worker's local state.
    fn init_local(&self) -> Result<Self::Local>;

    /// Emit at most one batch into `sink`; `Ok(false)` once this worker
    /// has nothing left to do.
    fn execute(&self, local: &mut Self::Local, sink: &mut dyn ColumnarSink) -> Result<bool>;
}

fn run_worker<F: TableFunction>(function: &F) -> Result<Vec<RecordBatch>> {
    let mut local = function.init_local()?;
    let mut sink = ArrowSink::new(function.schema().clone());
    while function.execute(&mut local, &mut sink)? {}
    Ok(sink.take_batches())
}

/// Run `function` to completion on up to `threads` workers.
///
/// Batches from one worker keep their order; batches from different workers
/// are concatenated in worker order.
pub fn collect<F: TableFunction>(function: &F, threads: usize) -> Result<Vec<RecordBatch>> {
    let workers = threads.clamp(1, function.max_workers().max(1));
    if workers == 1 {
        return run_worker(function);
    }
    log::debug!("table: running {workers} workers");
    let results: Vec<Result<Vec<RecordBatch>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| scope.spawn(|| run_worker(function)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(Err(TableError::WorkerPanicked.into())))
            .collect()
    });
    let mut batches = Vec::new();
    for result in results {
        batches.extend(result?);
    }
    Ok(batches)
}
