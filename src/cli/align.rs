//! Alignment commands.

use anyhow::{Context, Result};
use std::path::Path;

use biocolumns::align::{Bowtie2Config, Minimap2Config, PairwiseAligner, PairwiseConfig};
use biocolumns::sink::OutputConfig;
use biocolumns::table::{
    collect, AlignBowtie2, AlignBowtie2Params, AlignMinimap2, AlignMinimap2Params,
    SaveMinimap2Index, SaveMinimap2IndexParams, TableFunction,
};

use super::output::{write_parquet, Summary};
use super::read::fastx_table;

/// Where the reference comes from.
#[derive(Debug, Clone)]
pub struct Subjects {
    /// FASTA of references
    pub fasta: Option<String>,
    /// Prebuilt index (minimap2 `.mmi` or bowtie2 prefix)
    pub index: Option<String>,
}

fn subject_table(
    subjects: &Subjects,
    threads: usize,
) -> Result<Option<Vec<arrow::record_batch::RecordBatch>>> {
    subjects
        .fasta
        .as_ref()
        .map(|path| fastx_table(std::slice::from_ref(path), &[], threads))
        .transpose()
}

pub fn minimap2(
    queries: &[String],
    queries2: &[String],
    subjects: &Subjects,
    per_subject_database: bool,
    engine: Minimap2Config,
    output: &Path,
    threads: usize,
    config: &OutputConfig,
) -> Result<Summary> {
    let params = AlignMinimap2Params {
        query_table: fastx_table(queries, queries2, threads)?,
        subject_table: subject_table(subjects, threads)?,
        index_path: subjects.index.clone(),
        per_subject_database,
        config: engine,
    };
    let function = AlignMinimap2::bind(&params).context("align-minimap2 failed")?;
    let batches = collect(&function, threads).context("align-minimap2 failed")?;
    let rows = write_parquet(output, function.schema(), &batches, config)?;
    Ok(Summary::new("align-minimap2", output, rows, "alignments"))
}

pub fn bowtie2(
    queries: &[String],
    queries2: &[String],
    subjects: &Subjects,
    engine: Bowtie2Config,
    output: &Path,
    threads: usize,
    config: &OutputConfig,
) -> Result<Summary> {
    let params = AlignBowtie2Params {
        query_table: fastx_table(queries, queries2, threads)?,
        subject_table: subject_table(subjects, threads)?,
        index_path: subjects.index.clone(),
        config: engine,
    };
    let function = AlignBowtie2::bind(&params).context("align-bowtie2 failed")?;
    let batches = collect(&function, 1).context("align-bowtie2 failed")?;
    let rows = write_parquet(output, function.schema(), &batches, config)?;
    Ok(Summary::new("align-bowtie2", output, rows, "alignments"))
}

pub fn save_minimap2_index(
    subjects: &str,
    engine: Minimap2Config,
    output: &Path,
    threads: usize,
) -> Result<Summary> {
    let params = SaveMinimap2IndexParams {
        subject_table: fastx_table(&[subjects.to_string()], &[], threads)?,
        output_path: output.display().to_string(),
        config: engine,
    };
    let function = SaveMinimap2Index::bind(&params)?;
    collect(&function, 1).context("save-minimap2-index failed")?;
    let count = params
        .subject_table
        .iter()
        .map(|b| b.num_rows())
        .sum::<usize>();
    Ok(Summary::new("save-minimap2-index", output, count, "subjects"))
}

/// Align one pair and print the result as tab-separated fields.
pub fn pairwise(query: &str, subject: &str, engine: PairwiseConfig) -> Result<()> {
    let mut aligner = PairwiseAligner::new(engine)?;
    match aligner.align_full(query, subject)? {
        Some(alignment) => {
            println!("score\t{}", alignment.score);
            println!("cigar\t{}", alignment.cigar);
            println!("query\t{}", alignment.query_aligned);
            println!("subject\t{}", alignment.subject_aligned);
        }
        None => anyhow::bail!("align-pairwise: engine gave up on this pair"),
    }
    Ok(())
}
