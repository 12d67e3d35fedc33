//! Aligner table functions.
//!
//! Query relations are regrouped into [`SequenceBatch`]es at bind. minimap2
//! runs one aligner per worker against an index shared by all of them;
//! bowtie2 runs a single worker driving one child process. The sharded
//! variants claim whole shards: each worker loads that shard's index and
//! aligns the reads assigned to it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::align::{
    is_bowtie2_index, Aligner, AlignerError, AlignmentSubject, Bowtie2Aligner, Bowtie2Config,
    Minimap2Aligner, Minimap2Config, SharedMinimap2Index,
};
use crate::batch::{AlignmentBatch, SequenceBatch, DEFAULT_BATCH_SIZE};
use crate::error::Result;
use crate::sink::{ColumnSpec, ColumnType, ColumnarSink, OutputSchema};

use super::params::{
    AlignBowtie2Params, AlignMinimap2Params, SaveMinimap2IndexParams, ShardedAlignParams,
};
use super::relation::{read_to_shard, sequence_batches, subjects};
use super::{CancellationToken, TableError, TableFunction, Warnings, WorkClaimer};

const QUERY_TABLE: &str = "query_table";
const SUBJECT_TABLE: &str = "subject_table";

/// Move up to `limit` pending rows into `sink`; `false` when none are left.
fn emit_pending(
    pending: &mut AlignmentBatch,
    sink: &mut dyn ColumnarSink,
    limit: usize,
) -> Result<bool> {
    if pending.is_empty() {
        return Ok(false);
    }
    if pending.len() <= limit {
        pending.emit(sink, false, None)?;
        pending.records.clear();
    } else {
        let chunk = AlignmentBatch {
            records: pending.records.drain(..limit).collect(),
        };
        chunk.emit(sink, false, None)?;
    }
    Ok(true)
}

/// Per-worker rows waiting to be emitted.
#[derive(Debug, Default)]
pub struct Pending {
    rows: AlignmentBatch,
}

/// Bound `align_minimap2`.
pub struct AlignMinimap2 {
    config: Minimap2Config,
    queries: Vec<SequenceBatch>,
    indices: Vec<Arc<SharedMinimap2Index>>,
    claimer: WorkClaimer,
    schema: OutputSchema,
    cancel: CancellationToken,
}

impl AlignMinimap2 {
    /// Validate parameters, regroup the queries and build or load the
    /// shared index (one per subject with `per_subject_database`).
    pub fn bind(params: &AlignMinimap2Params) -> Result<Self> {
        params.validate()?;
        params.config.validate()?;
        let queries = sequence_batches(&params.query_table, QUERY_TABLE, DEFAULT_BATCH_SIZE)?;
        let indices = match (&params.subject_table, &params.index_path) {
            (_, Some(path)) => vec![SharedMinimap2Index::load(&params.config, path)?],
            (Some(table), None) => {
                let subjects = subjects(table, SUBJECT_TABLE)?;
                if params.per_subject_database {
                    subjects
                        .iter()
                        .map(|s| {
                            SharedMinimap2Index::build(&params.config, std::slice::from_ref(s))
                        })
                        .collect::<Result<Vec<_>, _>>()?
                } else {
                    vec![SharedMinimap2Index::build(&params.config, &subjects)?]
                }
            }
            (None, None) => Vec::new(),
        };
        log::info!(
            "align_minimap2: {} query batches against {} index(es)",
            queries.len(),
            indices.len()
        );
        Ok(Self {
            config: params.config.clone(),
            claimer: WorkClaimer::new(queries.len()),
            queries,
            indices,
            schema: AlignmentBatch::schema(false, false),
            cancel: CancellationToken::new(),
        })
    }

    /// Share `token` so the host can interrupt alignment.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

/// Worker state of `align_minimap2`: its own aligner and pending rows.
pub struct Minimap2Local {
    aligner: Minimap2Aligner,
    pending: Pending,
}

impl TableFunction for AlignMinimap2 {
    type Local = Minimap2Local;

    fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    fn max_workers(&self) -> usize {
        self.queries.len().max(1)
    }

    fn init_local(&self) -> Result<Minimap2Local> {
        Ok(Minimap2Local {
            aligner: Minimap2Aligner::new(self.config.clone())?,
            pending: Pending::default(),
        })
    }

    fn execute(&self, local: &mut Minimap2Local, sink: &mut dyn ColumnarSink) -> Result<bool> {
        loop {
            self.cancel.check()?;
            if emit_pending(&mut local.pending.rows, sink, DEFAULT_BATCH_SIZE)? {
                return Ok(true);
            }
            let Some(unit) = self.claimer.claim() else {
                return Ok(false);
            };
            let batch = &self.queries[unit];
            for index in &self.indices {
                local.aligner.attach_shared_index(Arc::clone(index));
                local.aligner.align(batch, &mut local.pending.rows)?;
            }
            local.aligner.detach_shared_index();
            log::debug!(
                "align_minimap2: batch {unit} ({} reads) gave {} rows",
                batch.len(),
                local.pending.rows.len()
            );
        }
    }
}

/// Worker state of `align_bowtie2`.
pub struct Bowtie2Local {
    aligner: Bowtie2Aligner,
    pending: Pending,
    finished: bool,
}

/// Bound `align_bowtie2`.
///
/// Runs on one worker; the aligner built at bind is handed to it.
pub struct AlignBowtie2 {
    queries: Vec<SequenceBatch>,
    aligner: Mutex<Option<Bowtie2Aligner>>,
    claimer: WorkClaimer,
    schema: OutputSchema,
    cancel: CancellationToken,
}

impl AlignBowtie2 {
    /// Validate parameters, regroup the queries and build or load the index.
    pub fn bind(params: &AlignBowtie2Params) -> Result<Self> {
        params.validate()?;
        let queries = sequence_batches(&params.query_table, QUERY_TABLE, DEFAULT_BATCH_SIZE)?;
        let mut aligner = Bowtie2Aligner::new(params.config.clone())?;
        match (&params.subject_table, &params.index_path) {
            (_, Some(prefix)) => aligner.load_index(Path::new(prefix))?,
            (Some(table), None) => aligner.build_index(&subjects(table, SUBJECT_TABLE)?)?,
            (None, None) => {}
        }
        Ok(Self {
            claimer: WorkClaimer::new(queries.len()),
            queries,
            aligner: Mutex::new(Some(aligner)),
            schema: AlignmentBatch::schema(false, false),
            cancel: CancellationToken::new(),
        })
    }

    /// Share `token` with the worker and the bowtie2 reader thread.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        if let Some(aligner) = self
            .aligner
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
        {
            aligner.set_cancellation(token.clone());
        }
        self.cancel = token;
        self
    }
}

impl TableFunction for AlignBowtie2 {
    type Local = Bowtie2Local;

    fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    fn init_local(&self) -> Result<Bowtie2Local> {
        let aligner = self
            .aligner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| TableError::Parameter("align_bowtie2 runs on a single worker".into()))?;
        Ok(Bowtie2Local {
            aligner,
            pending: Pending::default(),
            finished: false,
        })
    }

    fn execute(&self, local: &mut Bowtie2Local, sink: &mut dyn ColumnarSink) -> Result<bool> {
        loop {
            self.cancel.check()?;
            if emit_pending(&mut local.pending.rows, sink, DEFAULT_BATCH_SIZE)? {
                return Ok(true);
            }
            if let Some(unit) = self.claimer.claim() {
                local
                    .aligner
                    .align(&self.queries[unit], &mut local.pending.rows)?;
                continue;
            }
            if local.finished {
                return Ok(false);
            }
            local.aligner.finish(&mut local.pending.rows)?;
            local.finished = true;
        }
    }
}

/// Reads assigned to one shard plus the index serving them.
struct Shard {
    name: String,
    index: PathBuf,
    batches: Vec<SequenceBatch>,
}

/// Regroup the records named by `ids` into batches of `batch_size`.
///
/// Ids absent from the query relation are skipped.
fn select_reads(
    queries: &[SequenceBatch],
    lookup: &HashMap<&str, (usize, usize)>,
    ids: &[String],
    batch_size: usize,
) -> Vec<SequenceBatch> {
    let paired = queries.first().is_some_and(|b| b.is_paired);
    let fresh = || {
        if paired {
            SequenceBatch::paired()
        } else {
            SequenceBatch::unpaired()
        }
    };
    let mut out = Vec::new();
    let mut current = fresh();
    for id in ids {
        let Some(&(b, row)) = lookup.get(id.as_str()) else {
            continue;
        };
        let src = &queries[b];
        let comment = src.comments[row].clone();
        let mate1 = (src.sequences1[row].clone(), src.quals1[row].clone());
        if paired {
            let mate2 = (src.sequences2[row].clone(), src.quals2[row].clone());
            current.push_pair(id.clone(), comment, mate1, mate2);
        } else {
            current.push(id.clone(), comment, mate1.0, mate1.1);
        }
        if current.len() == batch_size {
            out.push(std::mem::replace(&mut current, fresh()));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Shared bind of the sharded aligners; `locate` maps a shard name to its
/// index path or fails.
fn bind_shards(
    params: &ShardedAlignParams,
    locate: impl Fn(&Path, &str) -> Result<PathBuf, TableError>,
) -> Result<Vec<Shard>> {
    params.validate()?;
    let queries = sequence_batches(&params.query_table, QUERY_TABLE, DEFAULT_BATCH_SIZE)?;
    let assignment = read_to_shard(&params.read_to_shard, "read_to_shard")?;
    let mut lookup = HashMap::new();
    for (b, batch) in queries.iter().enumerate() {
        for (row, id) in batch.read_ids.iter().enumerate() {
            lookup.insert(id.as_str(), (b, row));
        }
    }
    let dir = Path::new(&params.shard_directory);
    let mut shards = Vec::with_capacity(assignment.len());
    for (name, ids) in assignment {
        let index = locate(dir, &name)?;
        let batches = select_reads(&queries, &lookup, &ids, DEFAULT_BATCH_SIZE);
        log::debug!(
            "sharded: shard '{name}' has {} assigned reads, {} present",
            ids.len(),
            batches.iter().map(SequenceBatch::len).sum::<usize>()
        );
        shards.push(Shard {
            name,
            index,
            batches,
        });
    }
    Ok(shards)
}

/// Bound `align_minimap2_sharded`.
pub struct AlignMinimap2Sharded {
    config: Minimap2Config,
    shards: Vec<Shard>,
    claimer: WorkClaimer,
    schema: OutputSchema,
    cancel: CancellationToken,
}

impl AlignMinimap2Sharded {
    /// Validate parameters and check that every shard has a `<shard>.mmi`.
    pub fn bind(params: &ShardedAlignParams, config: Minimap2Config) -> Result<Self> {
        config.validate()?;
        let shards = bind_shards(params, |dir, name| {
            let path = dir.join(format!("{name}.mmi"));
            if !path.is_file() {
                return Err(TableError::Parameter(format!(
                    "shard index file does not exist: {}",
                    path.display()
                )));
            }
            if !Minimap2Aligner::is_index_file(&path) {
                return Err(TableError::Parameter(format!(
                    "file is not a valid minimap2 index: {}",
                    path.display()
                )));
            }
            Ok(path)
        })?;
        Ok(Self {
            config,
            claimer: WorkClaimer::new(shards.len()),
            shards,
            schema: AlignmentBatch::schema(false, false),
            cancel: CancellationToken::new(),
        })
    }

    /// Share `token` so the host can interrupt alignment.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

impl TableFunction for AlignMinimap2Sharded {
    type Local = Minimap2Local;

    fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    fn max_workers(&self) -> usize {
        self.shards.len().max(1)
    }

    fn init_local(&self) -> Result<Minimap2Local> {
        Ok(Minimap2Local {
            aligner: Minimap2Aligner::new(self.config.clone())?,
            pending: Pending::default(),
        })
    }

    fn execute(&self, local: &mut Minimap2Local, sink: &mut dyn ColumnarSink) -> Result<bool> {
        loop {
            self.cancel.check()?;
            if emit_pending(&mut local.pending.rows, sink, DEFAULT_BATCH_SIZE)? {
                return Ok(true);
            }
            let Some(unit) = self.claimer.claim() else {
                return Ok(false);
            };
            let shard = &self.shards[unit];
            if shard.batches.is_empty() {
                continue;
            }
            log::info!("align_minimap2_sharded: aligning shard '{}'", shard.name);
            local.aligner.load_index(&shard.index)?;
            for batch in &shard.batches {
                self.cancel.check()?;
                local.aligner.align(batch, &mut local.pending.rows)?;
            }
        }
    }
}

/// Bound `align_bowtie2_sharded`.
pub struct AlignBowtie2Sharded {
    config: Bowtie2Config,
    shards: Vec<Shard>,
    claimer: WorkClaimer,
    schema: OutputSchema,
    warnings: Warnings,
    cancel: CancellationToken,
}

impl AlignBowtie2Sharded {
    /// Validate parameters and check that every shard has a bowtie2 index.
    ///
    /// Each shard runs one single-threaded bowtie2; `threads` is ignored.
    pub fn bind(params: &ShardedAlignParams, mut config: Bowtie2Config) -> Result<Self> {
        let warnings = Warnings::default();
        if config.threads != 1 {
            warnings.push(
                "align_bowtie2_sharded: parameter 'threads' is ignored in sharded mode; \
                 each shard runs one single-threaded bowtie2",
            );
            config.threads = 1;
        }
        if !Bowtie2Aligner::is_available() {
            return Err(AlignerError::Unavailable {
                engine: "bowtie2",
                reason: "bowtie2 not found in PATH".to_string(),
            }
            .into());
        }
        let shards = bind_shards(params, |dir, name| {
            let prefix = dir.join(name);
            if !is_bowtie2_index(&prefix) {
                return Err(TableError::Parameter(format!(
                    "shard index does not exist: {}; expected files like {0}.1.bt2, {0}.rev.1.bt2",
                    prefix.display()
                )));
            }
            Ok(prefix)
        })?;
        Ok(Self {
            config,
            claimer: WorkClaimer::new(shards.len()),
            shards,
            schema: AlignmentBatch::schema(false, false),
            warnings,
            cancel: CancellationToken::new(),
        })
    }

    /// Share `token` with every worker and bowtie2 reader thread.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Warnings raised during bind.
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.snapshot()
    }
}

impl TableFunction for AlignBowtie2Sharded {
    type Local = Pending;

    fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    fn max_workers(&self) -> usize {
        self.shards.len().max(1)
    }

    fn init_local(&self) -> Result<Pending> {
        Ok(Pending::default())
    }

    fn execute(&self, local: &mut Pending, sink: &mut dyn ColumnarSink) -> Result<bool> {
        loop {
            self.cancel.check()?;
            if emit_pending(&mut local.rows, sink, DEFAULT_BATCH_SIZE)? {
                return Ok(true);
            }
            let Some(unit) = self.claimer.claim() else {
                return Ok(false);
            };
            let shard = &self.shards[unit];
            if shard.batches.is_empty() {
                continue;
            }
            log::info!("align_bowtie2_sharded: aligning shard '{}'", shard.name);
            let mut aligner = Bowtie2Aligner::new(self.config.clone())?;
            aligner.set_cancellation(self.cancel.clone());
            aligner.load_index(&shard.index)?;
            for batch in &shard.batches {
                aligner.align(batch, &mut local.rows)?;
            }
            aligner.finish(&mut local.rows)?;
        }
    }
}

/// Bound `save_minimap2_index`.
pub struct SaveMinimap2Index {
    config: Minimap2Config,
    subjects: Vec<AlignmentSubject>,
    output: PathBuf,
    schema: OutputSchema,
    done: Mutex<bool>,
}

impl SaveMinimap2Index {
    /// Validate parameters and load the subjects.
    pub fn bind(params: &SaveMinimap2IndexParams) -> Result<Self> {
        params.validate()?;
        params.config.validate()?;
        let subjects = subjects(&params.subject_table, SUBJECT_TABLE)?;
        Ok(Self {
            config: params.config.clone(),
            subjects,
            output: PathBuf::from(&params.output_path),
            schema: OutputSchema::new(vec![
                ColumnSpec::required("success", ColumnType::Bool),
                ColumnSpec::required("index_path", ColumnType::Utf8),
                ColumnSpec::required("num_subjects", ColumnType::Int64),
            ]),
            done: Mutex::new(false),
        })
    }
}

impl TableFunction for SaveMinimap2Index {
    type Local = ();

    fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    fn init_local(&self) -> Result<()> {
        Ok(())
    }

    fn execute(&self, _: &mut (), sink: &mut dyn ColumnarSink) -> Result<bool> {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        if *done {
            return Ok(false);
        }
        *done = true;
        let mut aligner = Minimap2Aligner::new(self.config.clone())?;
        aligner.build_index(&self.subjects)?;
        aligner.save_index(&self.output)?;
        sink.write_bool(0, 0, true)?;
        sink.write_str(1, 0, &self.output.display().to_string())?;
        sink.write_i64(2, 0, self.subjects.len() as i64)?;
        sink.set_cardinality(1)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::table::relation::tests::query_batch;
    use arrow::array::{ArrayRef, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;

    fn shard_table(rows: &[(&str, &str)]) -> RecordBatch {
        let ids: Vec<&str> = rows.iter().map(|r| r.0).collect();
        let shards: Vec<&str> = rows.iter().map(|r| r.1).collect();
        RecordBatch::try_new(
            Arc::new(Schema::new(vec![
                Field::new("read_id", DataType::Utf8, false),
                Field::new("shard_name", DataType::Utf8, false),
            ])),
            vec![
                Arc::new(StringArray::from(ids)) as ArrayRef,
                Arc::new(StringArray::from(shards)) as ArrayRef,
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_select_reads_follows_assignment() {
        let batches = sequence_batches(
            &[query_batch(&["a", "b", "c"], &["AA", "CC", "GG"], None)],
            "q",
            10,
        )
        .unwrap();
        let mut lookup = HashMap::new();
        for (row, id) in batches[0].read_ids.iter().enumerate() {
            lookup.insert(id.as_str(), (0, row));
        }
        let ids = vec!["c".to_string(), "missing".to_string(), "a".to_string()];
        let selected = select_reads(&batches, &lookup, &ids, 1);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].read_ids, ["c"]);
        assert_eq!(selected[1].sequences1, ["AA"]);
    }

    #[test]
    fn test_emit_pending_in_chunks() {
        let mut pending = AlignmentBatch::new();
        for i in 0..5 {
            pending.push(crate::batch::AlignmentRecord {
                read_id: format!("r{i}"),
                ..Default::default()
            });
        }
        let mut sink = crate::sink::ArrowSink::new(AlignmentBatch::schema(false, false));
        assert!(emit_pending(&mut pending, &mut sink, 2).unwrap());
        assert!(emit_pending(&mut pending, &mut sink, 2).unwrap());
        assert!(emit_pending(&mut pending, &mut sink, 2).unwrap());
        assert!(!emit_pending(&mut pending, &mut sink, 2).unwrap());
        let sizes: Vec<usize> = sink.batches().iter().map(|b| b.num_rows()).collect();
        assert_eq!(sizes, [2, 2, 1]);
    }

    #[test]
    fn test_sharded_missing_directory() {
        let params = ShardedAlignParams {
            query_table: vec![query_batch(&["a"], &["ACGT"], None)],
            read_to_shard: vec![shard_table(&[("a", "s1")])],
            shard_directory: "/nonexistent/shards".into(),
        };
        let err = AlignMinimap2Sharded::bind(&params, Minimap2Config::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::ParameterError);
    }

    #[test]
    fn test_sharded_missing_index_file() {
        let dir = tempfile::tempdir().unwrap();
        let params = ShardedAlignParams {
            query_table: vec![query_batch(&["a"], &["ACGT"], None)],
            read_to_shard: vec![shard_table(&[("a", "s1")])],
            shard_directory: dir.path().display().to_string(),
        };
        let err = AlignMinimap2Sharded::bind(&params, Minimap2Config::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("s1.mmi"), "{err}");
    }

    #[test]
    fn test_align_minimap2_requires_subjects() {
        let params = AlignMinimap2Params {
            query_table: vec![query_batch(&["a"], &["ACGT"], None)],
            ..Default::default()
        };
        let err = AlignMinimap2::bind(&params).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ParameterError);
    }

    #[cfg(not(feature = "minimap2"))]
    #[test]
    fn test_align_minimap2_without_engine() {
        let params = AlignMinimap2Params {
            query_table: vec![query_batch(&["a"], &["ACGT"], None)],
            subject_table: Some(vec![query_batch(&["chr1"], &["ACGTACGT"], None)]),
            ..Default::default()
        };
        let err = AlignMinimap2::bind(&params).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::EngineUnavailable);
    }
}
