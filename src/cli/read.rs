//! `read-*` commands: scan files into a Parquet table.

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::path::Path;
use std::sync::Arc;

use biocolumns::sink::OutputConfig;
use biocolumns::table::{
    collect, ReadAlignments, ReadAlignmentsParams, ReadFastx, ReadFastxParams, ReadNewick,
    ReadNewickParams, ReadSff, ReadSffParams, TableFunction,
};
#[cfg(feature = "mzml")]
use biocolumns::table::{ReadMzml, ReadMzmlChromatograms, ReadMzmlParams};
#[cfg(feature = "ncbi")]
use biocolumns::table::{ReadFeatureTable, ReadGenBank, ReadNcbiParams};

use super::output::{write_parquet, Summary};

/// Run a bound function to completion and write its rows to `output`.
fn run_to_parquet<F: TableFunction>(
    command: &'static str,
    function: &F,
    threads: usize,
    output: &Path,
    config: &OutputConfig,
) -> Result<Summary> {
    let batches = collect(function, threads).with_context(|| format!("{command} failed"))?;
    let rows = write_parquet(output, function.schema(), &batches, config)?;
    Ok(Summary::new(command, output, rows, "rows"))
}

/// Sequence rows of `paths` (and their mates), as consumed by the aligners.
pub fn fastx_table(paths: &[String], sequence2: &[String], threads: usize) -> Result<Vec<RecordBatch>> {
    let params = ReadFastxParams {
        paths: paths.to_vec(),
        sequence2: sequence2.to_vec(),
        ..ReadFastxParams::default()
    };
    let function = ReadFastx::bind(&params).context("Failed to open sequence input")?;
    collect(&function, threads).context("Failed to read sequence input")
}

pub fn fastx(
    paths: Vec<String>,
    sequence2: Vec<String>,
    qual_offset: i64,
    include_filepath: bool,
    output: &Path,
    threads: usize,
    config: &OutputConfig,
) -> Result<Summary> {
    let params = ReadFastxParams {
        paths,
        sequence2,
        include_filepath,
        qual_offset,
        ..ReadFastxParams::default()
    };
    let function = ReadFastx::bind(&params)?;
    run_to_parquet("read-fastx", &function, threads, output, config)
}

pub fn sff(
    paths: Vec<String>,
    trim: bool,
    include_filepath: bool,
    output: &Path,
    threads: usize,
    config: &OutputConfig,
) -> Result<Summary> {
    let params = ReadSffParams {
        paths,
        trim,
        include_filepath,
        ..ReadSffParams::default()
    };
    let function = ReadSff::bind(&params)?;
    run_to_parquet("read-sff", &function, threads, output, config)
}

/// `name<TAB>length` lines as a two-column reference table.
pub fn reference_table(path: &Path) -> Result<RecordBatch> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut names = Vec::new();
    let mut lengths = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("{}: line {}", path.display(), line + 1))?;
        let name = record.get(0).unwrap_or_default();
        let length: i64 = record
            .get(1)
            .unwrap_or_default()
            .trim()
            .parse()
            .with_context(|| format!("{}: bad length on line {}", path.display(), line + 1))?;
        names.push(name.to_string());
        lengths.push(length);
    }
    let schema = Schema::new(vec![
        Field::new("name", DataType::Utf8, false),
        Field::new("length", DataType::Int64, false),
    ]);
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(names)),
        Arc::new(Int64Array::from(lengths)),
    ];
    Ok(RecordBatch::try_new(Arc::new(schema), columns)?)
}

pub fn alignments(
    paths: Vec<String>,
    reference_lengths: Option<&Path>,
    include_seq_qual: bool,
    include_filepath: bool,
    output: &Path,
    threads: usize,
    config: &OutputConfig,
) -> Result<Summary> {
    let params = ReadAlignmentsParams {
        paths,
        reference_lengths: reference_lengths
            .map(reference_table)
            .transpose()?
            .map(|batch| vec![batch]),
        include_seq_qual,
        include_filepath,
        ..ReadAlignmentsParams::default()
    };
    let function = ReadAlignments::bind(&params)?;
    run_to_parquet("read-alignments", &function, threads, output, config)
}

#[cfg(feature = "mzml")]
pub fn mzml(
    paths: Vec<String>,
    chromatograms: bool,
    include_filepath: bool,
    output: &Path,
    threads: usize,
    config: &OutputConfig,
) -> Result<Summary> {
    let params = ReadMzmlParams {
        paths,
        include_filepath,
        ..ReadMzmlParams::default()
    };
    if chromatograms {
        let function = ReadMzmlChromatograms::bind(&params)?;
        run_to_parquet("read-mzml-chromatograms", &function, threads, output, config)
    } else {
        let function = ReadMzml::bind(&params)?;
        run_to_parquet("read-mzml", &function, threads, output, config)
    }
}

pub fn newick(
    paths: Vec<String>,
    include_filepath: bool,
    output: &Path,
    threads: usize,
    config: &OutputConfig,
) -> Result<Summary> {
    let params = ReadNewickParams {
        paths,
        include_filepath,
    };
    let function = ReadNewick::bind(&params)?;
    run_to_parquet("read-newick", &function, threads, output, config)
}

/// Saved GenBank XML or feature tables; feature-table warnings go to the log.
#[cfg(feature = "ncbi")]
pub fn ncbi(
    paths: Vec<String>,
    feature_tables: bool,
    include_filepath: bool,
    output: &Path,
    threads: usize,
    config: &OutputConfig,
) -> Result<Summary> {
    let params = ReadNcbiParams {
        paths,
        include_filepath,
    };
    if feature_tables {
        let function = ReadFeatureTable::bind(&params)?;
        run_to_parquet("read-feature-table", &function, threads, output, config)
    } else {
        let function = ReadGenBank::bind(&params)?;
        run_to_parquet("read-genbank", &function, threads, output, config)
    }
}
