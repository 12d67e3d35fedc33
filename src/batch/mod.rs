//! Columnar batch containers shared by readers and aligners.
//!
//! A batch is created by a reader or aligner inside one execute call, emitted
//! into a [`ColumnarSink`](crate::sink::ColumnarSink) and dropped.

pub mod alignment;
pub mod sequence;
pub mod spectrum;

pub use alignment::{flags, AlignmentBatch, AlignmentRecord, AlignmentTags};
pub use sequence::SequenceBatch;
pub use spectrum::{ChromatogramBatch, ChromatogramRecord, SpectrumBatch, SpectrumRecord};

/// Default records per batch pulled from a reader.
pub const DEFAULT_BATCH_SIZE: usize = 2048;

/// Options shared by every batched reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Records per batch
    pub batch_size: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}
