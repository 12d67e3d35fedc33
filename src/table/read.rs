//! File-reading table functions.
//!
//! Every reader shares one scan loop: a worker claims the next unread file,
//! opens it without holding the claim lock, and pulls batches from it until
//! it is exhausted before claiming another one.

use std::path::{Path, PathBuf};

use crate::batch::{AlignmentBatch, SequenceBatch};
use crate::error::Result;
use crate::fastx::SequenceReader;
use crate::newick::{read_tree_file, NodeRow};
use crate::quality::QualOffset;
use crate::sam::AlignmentReader;
use crate::sff::SffReader;
use crate::sink::{
    write_opt_f64, write_opt_i64, ColumnSpec, ColumnType, ColumnarSink, OutputSchema, SinkError,
};

use super::params::{ReadAlignmentsParams, ReadFastxParams, ReadNewickParams, ReadSffParams};
use super::relation::reference_lengths;
use super::{CancellationToken, FilePaths, TableError, TableFunction, WorkClaimer};

/// An open file plus the path reported in the `filepath` column.
pub struct Cursor<R> {
    path: String,
    reader: R,
}

/// Claim-and-drain loop shared by the file readers.
struct FileScan {
    files: FilePaths,
    claimer: WorkClaimer,
    schema: OutputSchema,
    include_filepath: bool,
    batch_size: usize,
    cancel: CancellationToken,
}

impl FileScan {
    fn new(files: FilePaths, schema: OutputSchema, include_filepath: bool, batch_size: usize) -> Self {
        let claimer = WorkClaimer::new(files.len());
        Self {
            files,
            claimer,
            schema,
            include_filepath,
            batch_size: batch_size.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Emit the next non-empty batch, claiming new files as needed.
    ///
    /// `emit` returns `false` once its reader is exhausted.
    fn step<R, O, E>(
        &self,
        local: &mut Option<Cursor<R>>,
        sink: &mut dyn ColumnarSink,
        open: O,
        mut emit: E,
    ) -> Result<bool>
    where
        O: Fn(usize, &Path) -> Result<R>,
        E: FnMut(&mut R, usize, &mut dyn ColumnarSink, Option<&str>) -> Result<bool>,
    {
        loop {
            self.cancel.check()?;
            if local.is_none() {
                let Some(index) = self.claimer.claim() else {
                    return Ok(false);
                };
                let path = &self.files.paths()[index];
                log::info!("table: reading {}", path.display());
                *local = Some(Cursor {
                    path: path.display().to_string(),
                    reader: open(index, path)?,
                });
            }
            let Some(cursor) = local.as_mut() else {
                continue;
            };
            let filepath = self.include_filepath.then_some(cursor.path.as_str());
            if emit(&mut cursor.reader, self.batch_size, sink, filepath)? {
                return Ok(true);
            }
            log::debug!("table: finished {}", cursor.path);
            *local = None;
        }
    }
}

macro_rules! file_scan_accessors {
    ($ty:ty) => {
        impl $ty {
            /// Share `token` so the host can interrupt the scan.
            pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
                self.scan.cancel = token;
                self
            }

            /// Expanded input files.
            pub fn files(&self) -> &[PathBuf] {
                self.scan.files.paths()
            }
        }
    };
}

/// Bound `read_fastx`.
pub struct ReadFastx {
    scan: FileScan,
    mates: Option<Vec<PathBuf>>,
    offset: QualOffset,
    single_worker: bool,
}

impl ReadFastx {
    /// Validate parameters and expand globs.
    pub fn bind(params: &ReadFastxParams) -> Result<Self> {
        params.validate()?;
        let offset = params.offset()?;
        let files = FilePaths::parse(&params.paths)?;
        let mates = if params.sequence2.is_empty() {
            None
        } else {
            let mates = FilePaths::parse(&params.sequence2)?;
            if mates.len() != files.len() {
                return Err(TableError::Parameter(format!(
                    "sequence1 and sequence2 must list the same number of files ({} vs {})",
                    files.len(),
                    mates.len()
                ))
                .into());
            }
            if mates.uses_stdin() && files.uses_stdin() {
                return Err(TableError::Parameter(
                    "sequence1 and sequence2 cannot both read stdin".into(),
                )
                .into());
            }
            Some(mates.paths().to_vec())
        };
        let single_worker = files.uses_stdin()
            || mates
                .as_ref()
                .is_some_and(|m| m.iter().any(|p| super::is_stdin_path(p)));
        let schema = SequenceBatch::schema(params.include_filepath);
        Ok(Self {
            scan: FileScan::new(files, schema, params.include_filepath, params.batch_size),
            mates,
            offset,
            single_worker,
        })
    }
}

file_scan_accessors!(ReadFastx);

impl TableFunction for ReadFastx {
    type Local = Option<Cursor<SequenceReader>>;

    fn schema(&self) -> &OutputSchema {
        &self.scan.schema
    }

    fn max_workers(&self) -> usize {
        if self.single_worker {
            1
        } else {
            self.scan.files.max_workers()
        }
    }

    fn init_local(&self) -> Result<Self::Local> {
        Ok(None)
    }

    fn execute(&self, local: &mut Self::Local, sink: &mut dyn ColumnarSink) -> Result<bool> {
        self.scan.step(
            local,
            sink,
            |index, path| {
                let mate = self.mates.as_ref().map(|m| m[index].as_path());
                Ok(SequenceReader::open(path, mate)?)
            },
            |reader, n, sink, filepath| {
                let batch = reader.read(n)?;
                if batch.is_empty() {
                    return Ok(false);
                }
                batch.emit(sink, self.offset, filepath)?;
                Ok(true)
            },
        )
    }
}

/// Bound `read_sequences_sff`.
pub struct ReadSff {
    scan: FileScan,
    trim: bool,
}

impl ReadSff {
    /// Validate parameters and expand globs.
    pub fn bind(params: &ReadSffParams) -> Result<Self> {
        params.validate()?;
        let files = FilePaths::parse(&params.paths)?;
        let schema = SequenceBatch::schema(params.include_filepath);
        Ok(Self {
            scan: FileScan::new(files, schema, params.include_filepath, params.batch_size),
            trim: params.trim,
        })
    }
}

file_scan_accessors!(ReadSff);

impl TableFunction for ReadSff {
    type Local = Option<Cursor<SffReader>>;

    fn schema(&self) -> &OutputSchema {
        &self.scan.schema
    }

    fn max_workers(&self) -> usize {
        self.scan.files.max_workers()
    }

    fn init_local(&self) -> Result<Self::Local> {
        Ok(None)
    }

    fn execute(&self, local: &mut Self::Local, sink: &mut dyn ColumnarSink) -> Result<bool> {
        self.scan.step(
            local,
            sink,
            |_, path| Ok(SffReader::open(path, self.trim)?),
            |reader, n, sink, filepath| {
                let batch = reader.read(n)?;
                if batch.is_empty() {
                    return Ok(false);
                }
                batch.emit(sink, QualOffset::Phred33, filepath)?;
                Ok(true)
            },
        )
    }
}

/// Bound `read_alignments`.
pub struct ReadAlignments {
    scan: FileScan,
    references: Option<Vec<(String, u64)>>,
    include_seq_qual: bool,
}

impl ReadAlignments {
    /// Validate parameters, expand globs and load the reference table.
    pub fn bind(params: &ReadAlignmentsParams) -> Result<Self> {
        params.validate()?;
        let files = FilePaths::parse(&params.paths)?;
        let references = params
            .reference_lengths
            .as_deref()
            .map(|batches| reference_lengths(batches, "reference_lengths"))
            .transpose()?;
        let schema = AlignmentBatch::schema(params.include_seq_qual, params.include_filepath);
        Ok(Self {
            scan: FileScan::new(files, schema, params.include_filepath, params.batch_size),
            references,
            include_seq_qual: params.include_seq_qual,
        })
    }
}

file_scan_accessors!(ReadAlignments);

impl TableFunction for ReadAlignments {
    type Local = Option<Cursor<AlignmentReader>>;

    fn schema(&self) -> &OutputSchema {
        &self.scan.schema
    }

    fn max_workers(&self) -> usize {
        self.scan.files.max_workers()
    }

    fn init_local(&self) -> Result<Self::Local> {
        Ok(None)
    }

    fn execute(&self, local: &mut Self::Local, sink: &mut dyn ColumnarSink) -> Result<bool> {
        self.scan.step(
            local,
            sink,
            |_, path| {
                let reader = match &self.references {
                    Some(refs) => AlignmentReader::with_references(path, refs, self.include_seq_qual)?,
                    None => AlignmentReader::open(path, self.include_seq_qual)?,
                };
                Ok(reader)
            },
            |reader, n, sink, filepath| {
                let batch = reader.read(n)?;
                if batch.is_empty() {
                    return Ok(false);
                }
                batch.emit(sink, self.include_seq_qual, filepath)?;
                Ok(true)
            },
        )
    }
}

#[cfg(feature = "mzml")]
mod mzml_scan {
    use super::*;
    use crate::batch::{ChromatogramBatch, SpectrumBatch};
    use crate::mzml::MzMLReader;
    use crate::table::params::ReadMzmlParams;

    fn bind_scan(params: &ReadMzmlParams, schema: OutputSchema) -> Result<FileScan> {
        params.validate()?;
        let files = FilePaths::parse(&params.paths)?;
        Ok(FileScan::new(files, schema, params.include_filepath, params.batch_size))
    }

    /// Bound `read_mzml`.
    pub struct ReadMzml {
        pub(super) scan: FileScan,
    }

    impl ReadMzml {
        /// Validate parameters and expand globs.
        pub fn bind(params: &ReadMzmlParams) -> Result<Self> {
            let schema = SpectrumBatch::schema(params.include_filepath);
            Ok(Self {
                scan: bind_scan(params, schema)?,
            })
        }
    }

    file_scan_accessors!(ReadMzml);

    impl TableFunction for ReadMzml {
        type Local = Option<Cursor<MzMLReader>>;

        fn schema(&self) -> &OutputSchema {
            &self.scan.schema
        }

        fn max_workers(&self) -> usize {
            self.scan.files.max_workers()
        }

        fn init_local(&self) -> Result<Self::Local> {
            Ok(None)
        }

        fn execute(&self, local: &mut Self::Local, sink: &mut dyn ColumnarSink) -> Result<bool> {
            self.scan.step(
                local,
                sink,
                |_, path| Ok(MzMLReader::open(path)?),
                |reader, n, sink, filepath| {
                    let batch = reader.read_spectra(n)?;
                    if batch.is_empty() {
                        return Ok(false);
                    }
                    batch.emit(sink, filepath)?;
                    Ok(true)
                },
            )
        }
    }

    /// Bound `read_mzml_chromatograms`.
    pub struct ReadMzmlChromatograms {
        pub(super) scan: FileScan,
    }

    impl ReadMzmlChromatograms {
        /// Validate parameters and expand globs.
        pub fn bind(params: &ReadMzmlParams) -> Result<Self> {
            let schema = ChromatogramBatch::schema(params.include_filepath);
            Ok(Self {
                scan: bind_scan(params, schema)?,
            })
        }
    }

    file_scan_accessors!(ReadMzmlChromatograms);

    impl TableFunction for ReadMzmlChromatograms {
        type Local = Option<Cursor<MzMLReader>>;

        fn schema(&self) -> &OutputSchema {
            &self.scan.schema
        }

        fn max_workers(&self) -> usize {
            self.scan.files.max_workers()
        }

        fn init_local(&self) -> Result<Self::Local> {
            Ok(None)
        }

        fn execute(&self, local: &mut Self::Local, sink: &mut dyn ColumnarSink) -> Result<bool> {
            self.scan.step(
                local,
                sink,
                |_, path| Ok(MzMLReader::open(path)?),
                |reader, n, sink, filepath| {
                    let batch = reader.read_chromatograms(n)?;
                    if batch.is_empty() {
                        return Ok(false);
                    }
                    batch.emit(sink, filepath)?;
                    Ok(true)
                },
            )
        }
    }
}

#[cfg(feature = "mzml")]
pub use mzml_scan::{ReadMzml, ReadMzmlChromatograms};

#[cfg(feature = "ncbi")]
mod ncbi_scan {
    use super::*;
    use crate::ncbi::{
        parse_feature_table, parse_genbank_records, read_text, FeatureAnnotation,
        FeatureAnnotationBatch, GenBankMetadata,
    };
    use crate::table::params::ReadNcbiParams;
    use crate::table::Warnings;

    /// Parsed rows of one file, handed out in slices.
    pub struct PendingRows<T> {
        rows: Vec<T>,
        next: usize,
    }

    impl<T> PendingRows<T> {
        fn new(rows: Vec<T>) -> Self {
            Self { rows, next: 0 }
        }

        fn next_slice(&mut self, n: usize) -> Option<&[T]> {
            if self.next >= self.rows.len() {
                return None;
            }
            let start = self.next;
            self.next = (start + n).min(self.rows.len());
            Some(&self.rows[start..self.next])
        }
    }

    fn bind_scan(params: &ReadNcbiParams, schema: OutputSchema) -> Result<FileScan> {
        params.validate()?;
        let files = FilePaths::parse(&params.paths)?;
        Ok(FileScan::new(
            files,
            schema,
            params.include_filepath,
            crate::batch::DEFAULT_BATCH_SIZE,
        ))
    }

    /// Bound `read_genbank`: one row per `GBSeq` of saved GenBank XML.
    pub struct ReadGenBank {
        pub(super) scan: FileScan,
    }

    impl ReadGenBank {
        /// Validate parameters and expand globs.
        pub fn bind(params: &ReadNcbiParams) -> Result<Self> {
            let schema = GenBankMetadata::schema(params.include_filepath);
            Ok(Self {
                scan: bind_scan(params, schema)?,
            })
        }
    }

    file_scan_accessors!(ReadGenBank);

    impl TableFunction for ReadGenBank {
        type Local = Option<Cursor<PendingRows<GenBankMetadata>>>;

        fn schema(&self) -> &OutputSchema {
            &self.scan.schema
        }

        fn max_workers(&self) -> usize {
            self.scan.files.max_workers()
        }

        fn init_local(&self) -> Result<Self::Local> {
            Ok(None)
        }

        fn execute(&self, local: &mut Self::Local, sink: &mut dyn ColumnarSink) -> Result<bool> {
            self.scan.step(
                local,
                sink,
                |_, path| {
                    let records = parse_genbank_records(&read_text(path)?)?;
                    log::debug!("ncbi: {} GenBank records in {}", records.len(), path.display());
                    Ok(PendingRows::new(records))
                },
                |rows, n, sink, filepath| match rows.next_slice(n) {
                    Some(slice) => {
                        GenBankMetadata::emit(slice, sink, filepath)?;
                        Ok(true)
                    }
                    None => Ok(false),
                },
            )
        }
    }

    /// Bound `read_feature_table`: GFF3-style rows of saved feature tables.
    pub struct ReadFeatureTable {
        pub(super) scan: FileScan,
        warnings: Warnings,
    }

    impl ReadFeatureTable {
        /// Validate parameters and expand globs.
        pub fn bind(params: &ReadNcbiParams) -> Result<Self> {
            let schema = FeatureAnnotationBatch::schema(params.include_filepath);
            Ok(Self {
                scan: bind_scan(params, schema)?,
                warnings: Warnings::default(),
            })
        }

        /// Warnings raised while parsing, across every file read so far.
        pub fn warnings(&self) -> Vec<String> {
            self.warnings.snapshot()
        }
    }

    file_scan_accessors!(ReadFeatureTable);

    impl TableFunction for ReadFeatureTable {
        type Local = Option<Cursor<PendingRows<FeatureAnnotation>>>;

        fn schema(&self) -> &OutputSchema {
            &self.scan.schema
        }

        fn max_workers(&self) -> usize {
            self.scan.files.max_workers()
        }

        fn init_local(&self) -> Result<Self::Local> {
            Ok(None)
        }

        fn execute(&self, local: &mut Self::Local, sink: &mut dyn ColumnarSink) -> Result<bool> {
            self.scan.step(
                local,
                sink,
                |_, path| {
                    let batch = parse_feature_table(&read_text(path)?, &self.warnings);
                    Ok(PendingRows::new(batch.features))
                },
                |rows, n, sink, filepath| match rows.next_slice(n) {
                    Some(slice) => {
                        FeatureAnnotationBatch::emit(slice, sink, filepath)?;
                        Ok(true)
                    }
                    None => Ok(false),
                },
            )
        }
    }
}

#[cfg(feature = "ncbi")]
pub use ncbi_scan::{ReadFeatureTable, ReadGenBank};

mod node_columns {
    pub const NODE_INDEX: usize = 0;
    pub const NAME: usize = 1;
    pub const BRANCH_LENGTH: usize = 2;
    pub const EDGE_ID: usize = 3;
    pub const PARENT_INDEX: usize = 4;
    pub const IS_TIP: usize = 5;
    pub const FILEPATH: usize = 6;
}

/// Output schema of `read_newick`.
pub fn node_schema(include_filepath: bool) -> OutputSchema {
    let mut schema = OutputSchema::new(vec![
        ColumnSpec::required("node_index", ColumnType::Int64),
        ColumnSpec::required("name", ColumnType::Utf8),
        ColumnSpec::nullable("branch_length", ColumnType::Float64),
        ColumnSpec::nullable("edge_id", ColumnType::Int64),
        ColumnSpec::nullable("parent_index", ColumnType::Int64),
        ColumnSpec::required("is_tip", ColumnType::Bool),
    ]);
    if include_filepath {
        schema.push(ColumnSpec::required("filepath", ColumnType::Utf8));
    }
    schema
}

fn emit_nodes(
    rows: &[NodeRow],
    sink: &mut dyn ColumnarSink,
    filepath: Option<&str>,
) -> Result<(), SinkError> {
    use node_columns::*;
    for (row, node) in rows.iter().enumerate() {
        sink.write_i64(NODE_INDEX, row, node.node_index)?;
        sink.write_str(NAME, row, &node.name)?;
        write_opt_f64(sink, BRANCH_LENGTH, row, node.branch_length)?;
        write_opt_i64(sink, EDGE_ID, row, node.edge_id)?;
        write_opt_i64(sink, PARENT_INDEX, row, node.parent_index)?;
        sink.write_bool(IS_TIP, row, node.is_tip)?;
        if let Some(path) = filepath {
            sink.write_str(FILEPATH, row, path)?;
        }
    }
    sink.set_cardinality(rows.len())
}

/// Node rows of one parsed tree, handed out in slices.
pub struct NodeRows {
    rows: Vec<NodeRow>,
    next: usize,
}

/// Bound `read_newick`.
pub struct ReadNewick {
    scan: FileScan,
}

impl ReadNewick {
    /// Validate parameters and expand globs.
    pub fn bind(params: &ReadNewickParams) -> Result<Self> {
        params.validate()?;
        let files = FilePaths::parse(&params.paths)?;
        let schema = node_schema(params.include_filepath);
        Ok(Self {
            scan: FileScan::new(
                files,
                schema,
                params.include_filepath,
                crate::batch::DEFAULT_BATCH_SIZE,
            ),
        })
    }
}

file_scan_accessors!(ReadNewick);

impl TableFunction for ReadNewick {
    type Local = Option<Cursor<NodeRows>>;

    fn schema(&self) -> &OutputSchema {
        &self.scan.schema
    }

    fn max_workers(&self) -> usize {
        self.scan.files.max_workers()
    }

    fn init_local(&self) -> Result<Self::Local> {
        Ok(None)
    }

    fn execute(&self, local: &mut Self::Local, sink: &mut dyn ColumnarSink) -> Result<bool> {
        self.scan.step(
            local,
            sink,
            |_, path| {
                let tree = read_tree_file(path)?;
                log::debug!("newick: {} nodes in {}", tree.num_nodes(), path.display());
                Ok(NodeRows {
                    rows: tree.to_rows(),
                    next: 0,
                })
            },
            |nodes, n, sink, filepath| {
                if nodes.next >= nodes.rows.len() {
                    return Ok(false);
                }
                let end = (nodes.next + n).min(nodes.rows.len());
                emit_nodes(&nodes.rows[nodes.next..end], sink, filepath)?;
                nodes.next = end;
                Ok(true)
            },
        )
    }
}
