//! Named parameters of the table functions.
//!
//! Input relations arrive as Arrow record batches. Each struct is checked by
//! `validate` during bind, before any file is opened or engine started.

use arrow::record_batch::RecordBatch;

use crate::align::{Bowtie2Config, Minimap2Config, PairwiseConfig};
use crate::batch::DEFAULT_BATCH_SIZE;
use crate::quality::QualOffset;

use super::TableError;

fn check_batch_size(batch_size: usize) -> Result<(), TableError> {
    if batch_size == 0 {
        return Err(TableError::Parameter("batch_size must be positive".into()));
    }
    Ok(())
}

fn check_paths(paths: &[String]) -> Result<(), TableError> {
    if paths.is_empty() {
        return Err(TableError::Parameter(
            "at least one file path must be provided".into(),
        ));
    }
    if let Some(empty) = paths.iter().position(String::is_empty) {
        return Err(TableError::Parameter(format!("file path {empty} is empty")));
    }
    Ok(())
}

fn check_output_path(path: &str) -> Result<(), TableError> {
    if path.trim().is_empty() {
        return Err(TableError::Parameter("output path must not be empty".into()));
    }
    Ok(())
}

/// `read_fastx(paths, sequence2 := ..., include_filepath := ..., qual_offset := ...)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadFastxParams {
    /// First-mate paths or glob patterns
    pub paths: Vec<String>,
    /// Second-mate paths, one per expanded first-mate path
    pub sequence2: Vec<String>,
    /// Append a `filepath` column
    pub include_filepath: bool,
    /// 33 or 64
    pub qual_offset: i64,
    /// Records per emitted batch
    pub batch_size: usize,
}

impl Default for ReadFastxParams {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            sequence2: Vec::new(),
            include_filepath: false,
            qual_offset: 33,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ReadFastxParams {
    /// Parameters reading `paths` with defaults.
    pub fn new<S: Into<String>>(paths: impl IntoIterator<Item = S>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), TableError> {
        check_paths(&self.paths)?;
        check_batch_size(self.batch_size)?;
        self.offset().map(|_| ())
    }

    pub(crate) fn offset(&self) -> Result<QualOffset, TableError> {
        QualOffset::from_value(self.qual_offset).ok_or_else(|| {
            TableError::Parameter(format!(
                "qual_offset must be 33 or 64, got {}",
                self.qual_offset
            ))
        })
    }
}

/// `read_sequences_sff(paths, include_filepath := ..., trim := ...)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadSffParams {
    /// Paths or glob patterns
    pub paths: Vec<String>,
    /// Append a `filepath` column
    pub include_filepath: bool,
    /// Apply the clip points stored in each read header
    pub trim: bool,
    /// Records per emitted batch
    pub batch_size: usize,
}

impl Default for ReadSffParams {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            include_filepath: false,
            trim: true,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ReadSffParams {
    /// Parameters reading `paths` with defaults.
    pub fn new<S: Into<String>>(paths: impl IntoIterator<Item = S>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), TableError> {
        check_paths(&self.paths)?;
        check_batch_size(self.batch_size)
    }
}

/// `read_alignments(paths, reference_lengths := ..., include_filepath := ...,
/// include_seq_qual := ...)`
#[derive(Debug, Clone)]
pub struct ReadAlignmentsParams {
    /// Paths or glob patterns
    pub paths: Vec<String>,
    /// `(name, length)` table for headerless inputs
    pub reference_lengths: Option<Vec<RecordBatch>>,
    /// Append a `filepath` column
    pub include_filepath: bool,
    /// Add `sequence` and `qual` columns
    pub include_seq_qual: bool,
    /// Records per emitted batch
    pub batch_size: usize,
}

impl Default for ReadAlignmentsParams {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            reference_lengths: None,
            include_filepath: false,
            include_seq_qual: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ReadAlignmentsParams {
    /// Parameters reading `paths` with defaults.
    pub fn new<S: Into<String>>(paths: impl IntoIterator<Item = S>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), TableError> {
        check_paths(&self.paths)?;
        check_batch_size(self.batch_size)
    }
}

/// `read_mzml` / `read_mzml_chromatograms(paths, include_filepath := ...)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMzmlParams {
    /// Paths or glob patterns
    pub paths: Vec<String>,
    /// Append a `filepath` column
    pub include_filepath: bool,
    /// Records per emitted batch
    pub batch_size: usize,
}

impl Default for ReadMzmlParams {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            include_filepath: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl ReadMzmlParams {
    /// Parameters reading `paths` with defaults.
    pub fn new<S: Into<String>>(paths: impl IntoIterator<Item = S>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), TableError> {
        check_paths(&self.paths)?;
        check_batch_size(self.batch_size)
    }
}

/// `read_newick(paths, include_filepath := ...)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadNewickParams {
    /// Paths or glob patterns
    pub paths: Vec<String>,
    /// Append a `filepath` column
    pub include_filepath: bool,
}

impl ReadNewickParams {
    /// Parameters reading `paths` with defaults.
    pub fn new<S: Into<String>>(paths: impl IntoIterator<Item = S>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            include_filepath: false,
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), TableError> {
        check_paths(&self.paths)
    }
}

/// `read_genbank(paths, ...)` and `read_feature_table(paths, ...)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadNcbiParams {
    /// Paths or glob patterns of saved NCBI responses
    pub paths: Vec<String>,
    /// Append a `filepath` column
    pub include_filepath: bool,
}

impl ReadNcbiParams {
    /// Parameters reading `paths` with defaults.
    pub fn new<S: Into<String>>(paths: impl IntoIterator<Item = S>) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            include_filepath: false,
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), TableError> {
        check_paths(&self.paths)
    }
}

/// `align_minimap2(query_table, subject_table := ... | index_path := ..., ...)`
#[derive(Debug, Clone, Default)]
pub struct AlignMinimap2Params {
    /// Reads to align (`read_id`, `sequence1`, optional mates and qualities)
    pub query_table: Vec<RecordBatch>,
    /// References (`read_id`, `sequence1`)
    pub subject_table: Option<Vec<RecordBatch>>,
    /// Prebuilt `.mmi` index instead of a subject table
    pub index_path: Option<String>,
    /// Align each batch against every subject separately
    pub per_subject_database: bool,
    /// Engine settings
    pub config: Minimap2Config,
}

impl AlignMinimap2Params {
    /// Check that exactly one subject source is given.
    pub fn validate(&self) -> Result<(), TableError> {
        match (&self.subject_table, &self.index_path) {
            (Some(_), Some(_)) => Err(TableError::Parameter(
                "align_minimap2: subject_table and index_path are mutually exclusive".into(),
            )),
            (None, None) => Err(TableError::Parameter(
                "align_minimap2 requires either subject_table or index_path".into(),
            )),
            (None, Some(_)) if self.per_subject_database => Err(TableError::Parameter(
                "align_minimap2: per_subject_database cannot be used with index_path".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// `align_bowtie2(query_table, subject_table := ... | index_path := ..., ...)`
#[derive(Debug, Clone, Default)]
pub struct AlignBowtie2Params {
    /// Reads to align
    pub query_table: Vec<RecordBatch>,
    /// References (`read_id`, `sequence1`)
    pub subject_table: Option<Vec<RecordBatch>>,
    /// Prebuilt index prefix instead of a subject table
    pub index_path: Option<String>,
    /// Engine settings
    pub config: Bowtie2Config,
}

impl AlignBowtie2Params {
    /// Check that exactly one subject source is given.
    pub fn validate(&self) -> Result<(), TableError> {
        match (&self.subject_table, &self.index_path) {
            (Some(_), Some(_)) => Err(TableError::Parameter(
                "align_bowtie2: subject_table and index_path are mutually exclusive".into(),
            )),
            (None, None) => Err(TableError::Parameter(
                "align_bowtie2 requires either subject_table or index_path".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Inputs of `align_minimap2_sharded` and `align_bowtie2_sharded`.
#[derive(Debug, Clone, Default)]
pub struct ShardedAlignParams {
    /// Reads to align
    pub query_table: Vec<RecordBatch>,
    /// `read_id` to `shard_name` assignment
    pub read_to_shard: Vec<RecordBatch>,
    /// Directory holding one index per shard
    pub shard_directory: String,
}

impl ShardedAlignParams {
    /// Check that the shard directory exists.
    pub fn validate(&self) -> Result<(), TableError> {
        if self.shard_directory.is_empty() {
            return Err(TableError::Parameter("shard_directory must not be empty".into()));
        }
        if !std::path::Path::new(&self.shard_directory).is_dir() {
            return Err(TableError::Parameter(format!(
                "shard directory does not exist: {}",
                self.shard_directory
            )));
        }
        Ok(())
    }
}

/// `align_pairwise_score/cigar/full(query, subject, ...)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignPairwiseParams {
    /// Method and penalties
    pub config: PairwiseConfig,
}

impl AlignPairwiseParams {
    /// Check method and penalties.
    pub fn validate(&self) -> Result<(), TableError> {
        self.config
            .validate()
            .map_err(|e| TableError::Parameter(e.to_string()))
    }
}

/// `save_minimap2_index(subject_table, output_path, ...)`
#[derive(Debug, Clone, Default)]
pub struct SaveMinimap2IndexParams {
    /// References (`read_id`, `sequence1`)
    pub subject_table: Vec<RecordBatch>,
    /// Destination `.mmi` file
    pub output_path: String,
    /// Engine settings; `max_secondary` is irrelevant here
    pub config: Minimap2Config,
}

impl SaveMinimap2IndexParams {
    /// Check the output path.
    pub fn validate(&self) -> Result<(), TableError> {
        check_output_path(&self.output_path)
    }
}

/// `COPY nodes TO path (FORMAT newick, EDGE_IDS ..., COMPRESSION ..., PLACEMENTS ...)`
#[derive(Debug, Clone, Default)]
pub struct CopyNewickParams {
    /// Node rows as produced by `read_newick`
    pub nodes: Vec<RecordBatch>,
    /// Output file
    pub output_path: String,
    /// Write `{n}` edge ids; by default whenever the rows carry an `edge_id` column
    pub edge_ids: Option<bool>,
    /// `gzip`/`gz`, `none`, or detected from a `.gz` suffix
    pub compression: Option<String>,
    /// Placement rows to graft before writing
    pub placements: Option<Vec<RecordBatch>>,
    /// Placement TSV or jplace file to graft before writing
    pub placements_path: Option<String>,
}

impl CopyNewickParams {
    /// Check the output path and placement sources.
    pub fn validate(&self) -> Result<(), TableError> {
        check_output_path(&self.output_path)?;
        if self.placements.is_some() && self.placements_path.is_some() {
            return Err(TableError::Parameter(
                "PLACEMENTS accepts either a table or a file, not both".into(),
            ));
        }
        if let Some(c) = &self.compression {
            if !matches!(c.to_ascii_lowercase().as_str(), "gzip" | "gz" | "none" | "auto") {
                return Err(TableError::Parameter(format!(
                    "unsupported COMPRESSION '{c}' for newick output"
                )));
            }
        }
        Ok(())
    }
}

/// `COPY reads TO path (FORMAT fasta|fastq, ...)`
#[derive(Debug, Clone, Default)]
pub struct CopyFastxParams {
    /// Sequence rows as produced by `read_fastx`, optionally with `sequence_index`
    pub reads: Vec<RecordBatch>,
    /// Output path; may contain `{ORIENTATION}`
    pub output_path: String,
    /// FASTQ instead of FASTA
    pub fastq: bool,
    /// Paired output layout; required for paired rows
    pub interleave: Option<bool>,
    /// Write `sequence_index` as the record id
    pub id_as_sequence_index: bool,
    /// Write the `comment` column after the id
    pub include_comment: bool,
    /// `gzip`, `zstd`, `none`, or detected from the extension
    pub compression: Option<String>,
    /// 33 or 64
    pub qual_offset: Option<i64>,
}

impl CopyFastxParams {
    /// Check the output path and quality offset.
    pub fn validate(&self) -> Result<(), TableError> {
        check_output_path(&self.output_path)?;
        self.offset().map(|_| ())
    }

    pub(crate) fn offset(&self) -> Result<QualOffset, TableError> {
        let value = self.qual_offset.unwrap_or(33);
        if !self.fastq && self.qual_offset.is_some() {
            return Err(TableError::Parameter(
                "QUAL_OFFSET only applies to FASTQ output".into(),
            ));
        }
        QualOffset::from_value(value).ok_or_else(|| {
            TableError::Parameter(format!("QUAL_OFFSET must be 33 or 64, got {value}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fastx_offsets() {
        let mut params = ReadFastxParams::new(["reads.fq"]);
        assert!(params.validate().is_ok());
        params.qual_offset = 64;
        assert_eq!(params.offset().unwrap(), QualOffset::Phred64);
        params.qual_offset = 50;
        assert!(params.validate().is_err());
        assert!(ReadFastxParams::default().validate().is_err());
    }

    #[test]
    fn test_minimap2_subject_sources() {
        let mut params = AlignMinimap2Params::default();
        assert!(params.validate().is_err());
        params.index_path = Some("ref.mmi".into());
        assert!(params.validate().is_ok());
        params.per_subject_database = true;
        let err = params.validate().unwrap_err();
        assert!(err.to_string().contains("per_subject_database"), "{err}");
        params.subject_table = Some(Vec::new());
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_pairwise_method() {
        let mut params = AlignPairwiseParams::default();
        assert!(params.validate().is_ok());
        params.config.method = "nw".into();
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_copy_fastx_qual_offset_requires_fastq() {
        let params = CopyFastxParams {
            output_path: "out.fa".into(),
            qual_offset: Some(64),
            ..Default::default()
        };
        assert!(params.validate().is_err());
        let params = CopyFastxParams {
            fastq: true,
            ..params
        };
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_copy_newick_compression() {
        let params = CopyNewickParams {
            output_path: "tree.nwk".into(),
            compression: Some("zstd".into()),
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }
}
