//! # biocolumns - Columnar Readers and Aligners for Bioinformatics Files
//!
//! `biocolumns` turns sequence, alignment, mass-spectrometry and tree files
//! into columnar record batches, and drives alignment engines over tables of
//! reads. Every reader fills a [`sink::ColumnarSink`] one batch at a time, so
//! the same code feeds Arrow, Parquet, or a host database.
//!
//! ## Formats
//!
//! - **FASTA / FASTQ** (plain or gzip), single or paired-end, with
//!   FASTA/FASTQ writers for the reverse direction ([`fastx`])
//! - **SFF v1** flowgram files with optional quality/adapter clipping ([`sff`])
//! - **SAM / BAM** with header synthesis for headerless input ([`sam`])
//! - **mzML** spectra and chromatograms, base64 + zlib arrays ([`mzml`])
//! - **Newick** trees with `{n}` edge ids and placement grafting ([`newick`])
//! - **NCBI** GenBank XML, efetch FASTA and feature tables (`ncbi`)
//!
//! ## Engines
//!
//! - **minimap2**, in process, behind the `minimap2` feature
//! - **bowtie2**, as a subprocess found on `PATH`
//! - **gap-affine pairwise** alignment, always available
//!
//! See [`align`] for the engine interface and [`table`] for the
//! bind / init / execute orchestration that hosts drive.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use biocolumns::table::{collect, ReadFastx, ReadFastxParams};
//!
//! let params = ReadFastxParams::new(["reads_R1.fq.gz"]);
//! let function = ReadFastx::bind(&params)?;
//! let batches = collect(&function, 4)?;
//! let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
//! println!("{rows} reads");
//! # Ok::<(), biocolumns::Error>(())
//! ```
//!
//! ## Feature Flags
//!
//! - `mzml` (default): mzML parsing via `quick-xml`
//! - `ncbi` (default): GenBank XML and feature-table parsing
//! - `colorized_output` (default): coloured CLI summaries
//! - `minimap2`: link the bundled minimap2 C library
//! - `parallel`: spread pairwise alignment rows over `rayon`

#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

pub mod align;
pub mod batch;
pub mod error;
pub mod fastx;
#[cfg(feature = "mzml")]
pub mod mzml;
#[cfg(feature = "ncbi")]
pub mod ncbi;
pub mod newick;
pub mod quality;
pub mod sam;
pub mod sff;
pub mod sink;
pub mod table;

pub use error::{Error, ErrorKind, Location, Result};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::align::{
        Aligner, AlignmentSubject, Bowtie2Aligner, Bowtie2Config, Minimap2Aligner,
        Minimap2Config, PairwiseAligner, PairwiseConfig, SharedMinimap2Index,
    };
    pub use crate::batch::{AlignmentBatch, ChromatogramBatch, SequenceBatch, SpectrumBatch};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::fastx::{FastxFormat, FastxWriter, FastxWriterOptions, SequenceReader};
    #[cfg(feature = "mzml")]
    pub use crate::mzml::MzMLReader;
    #[cfg(feature = "ncbi")]
    pub use crate::ncbi::{FeatureAnnotation, GenBankMetadata};
    pub use crate::newick::{NewickTree, Placement};
    pub use crate::quality::{QualOffset, QualityScore};
    pub use crate::sam::AlignmentReader;
    pub use crate::sff::SffReader;
    pub use crate::sink::{ArrowSink, ColumnarSink, OutputConfig, ParquetOutput};
    pub use crate::table::{collect, CancellationToken, TableFunction};
}
