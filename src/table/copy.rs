//! COPY targets: Newick trees and FASTA / FASTQ files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use arrow::array::Array;
use arrow::record_batch::RecordBatch;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::batch::DEFAULT_BATCH_SIZE;
use crate::error::Result;
use crate::fastx::{FastxFormat, FastxWriter, FastxWriterOptions};
use crate::newick::{read_placements, NewickTree, Placement};
use crate::quality::QualOffset;
use crate::sink::SinkError;

use super::params::{CopyFastxParams, CopyNewickParams};
use super::relation::{get_int64_column, node_inputs, placements, sequence_batches};
use super::TableError;

fn has_column(batches: &[RecordBatch], name: &str) -> bool {
    batches.first().is_some_and(|b| {
        b.schema()
            .fields()
            .iter()
            .any(|f| f.name().eq_ignore_ascii_case(name))
    })
}

fn use_gzip(compression: Option<&str>, path: &str) -> bool {
    match compression.map(str::to_ascii_lowercase).as_deref() {
        Some("gzip" | "gz") => true,
        Some("none") => false,
        _ => path.ends_with(".gz"),
    }
}

fn write_text(path: &str, text: &str, gzip: bool) -> Result<(), SinkError> {
    let file = BufWriter::new(File::create(Path::new(path))?);
    if gzip {
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(text.as_bytes())?;
        encoder.finish()?.flush()?;
    } else {
        let mut file = file;
        file.write_all(text.as_bytes())?;
        file.flush()?;
    }
    Ok(())
}

/// Write node rows as a Newick file, grafting placements first when given.
///
/// Returns the number of nodes written.
pub fn copy_newick(params: &CopyNewickParams) -> Result<usize> {
    params.validate()?;
    let has_edge_column = has_column(&params.nodes, "edge_id");
    let include_edge_ids = match params.edge_ids {
        Some(true) if !has_edge_column => {
            return Err(TableError::Parameter(
                "EDGE_IDS option requires 'edge_id' column in input".into(),
            )
            .into())
        }
        Some(flag) => flag,
        None => has_edge_column,
    };

    let rows = node_inputs(&params.nodes, "nodes")?;
    let mut tree = NewickTree::build(&rows)?;

    let grafts: Vec<Placement> = match (&params.placements, &params.placements_path) {
        (Some(table), _) => placements(table, "placements")?,
        (None, Some(path)) => read_placements(path)?,
        (None, None) => Vec::new(),
    };
    if !grafts.is_empty() {
        if !tree.has_edge_ids() {
            return Err(TableError::Parameter(
                "PLACEMENTS requires a tree with edge_id values".into(),
            )
            .into());
        }
        tree.insert_fully_resolved(&grafts)?;
        log::info!("newick: grafted {} placements", grafts.len());
    }
    if !include_edge_ids {
        tree.clear_edge_ids();
    }

    let mut text = tree.to_newick();
    text.push('\n');
    let gzip = use_gzip(params.compression.as_deref(), &params.output_path);
    write_text(&params.output_path, &text, gzip)?;
    log::info!(
        "newick: wrote {} nodes to {}",
        tree.num_nodes(),
        params.output_path
    );
    Ok(tree.num_nodes())
}

/// `sequence_index` values of every row, in order.
fn sequence_index(batches: &[RecordBatch]) -> Result<Vec<i64>, TableError> {
    let mut out = Vec::new();
    for batch in batches {
        let values = get_int64_column(batch, "reads", "sequence_index")?;
        for row in 0..values.len() {
            if values.is_null(row) {
                return Err(TableError::NullValue {
                    relation: "reads".into(),
                    column: "sequence_index".into(),
                    row: out.len() as u64,
                });
            }
            out.push(values.value(row));
        }
    }
    Ok(out)
}

/// Write sequence rows as FASTA or FASTQ.
///
/// Returns the number of records written (a pair counts once).
pub fn copy_fastx(params: &CopyFastxParams) -> Result<u64> {
    params.validate()?;
    let qual_offset = params.offset()?;
    let batches = sequence_batches(&params.reads, "reads", DEFAULT_BATCH_SIZE)?;
    let has_index = has_column(&params.reads, "sequence_index");
    let index = if params.id_as_sequence_index && has_index {
        Some(sequence_index(&params.reads)?)
    } else {
        None
    };
    let is_paired = batches.first().is_some_and(|b| b.is_paired);
    let format = if params.fastq {
        FastxFormat::Fastq
    } else {
        FastxFormat::Fasta
    };
    let mut writer = FastxWriter::create(
        &params.output_path,
        format,
        is_paired,
        has_index,
        FastxWriterOptions {
            interleave: params.interleave,
            id_as_sequence_index: params.id_as_sequence_index,
            include_comment: params.include_comment,
            compression: params.compression.clone(),
            qual_offset,
        },
    )?;
    let mut start = 0;
    for batch in &batches {
        let end = start + batch.len();
        let ids = index.as_deref().map(|all| &all[start..end]);
        // Relation qualities are decoded from Phred lists with offset 33.
        writer.write_batch(batch, QualOffset::Phred33, ids)?;
        start = end;
    }
    Ok(writer.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::table::relation::tests::query_batch;
    use crate::table::{collect, ReadNewick, ReadNewickParams};
    use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::sync::Arc;

    fn tree_rows(dir: &Path, text: &str) -> Vec<RecordBatch> {
        let path = dir.join("in.nwk");
        std::fs::write(&path, text).unwrap();
        let function = ReadNewick::bind(&ReadNewickParams::new([path.display().to_string()])).unwrap();
        collect(&function, 1).unwrap()
    }

    fn placement_table(rows: &[(&str, i64, f64, f64)]) -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("fragment_id", DataType::Utf8, false),
            Field::new("edge_id", DataType::Int64, false),
            Field::new("like_weight_ratio", DataType::Float64, false),
            Field::new("distal_length", DataType::Float64, false),
            Field::new("pendant_length", DataType::Float64, false),
        ]);
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(rows.iter().map(|r| r.0).collect::<Vec<_>>())),
            Arc::new(Int64Array::from(rows.iter().map(|r| r.1).collect::<Vec<_>>())),
            Arc::new(Float64Array::from(vec![1.0; rows.len()])),
            Arc::new(Float64Array::from(rows.iter().map(|r| r.2).collect::<Vec<_>>())),
            Arc::new(Float64Array::from(rows.iter().map(|r| r.3).collect::<Vec<_>>())),
        ];
        RecordBatch::try_new(Arc::new(schema), columns).unwrap()
    }

    #[test]
    fn test_copy_newick_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = tree_rows(dir.path(), "((A:1{0},B:2{1}):0.5{2},C:3{3});");
        let out = dir.path().join("out.nwk").display().to_string();
        let params = CopyNewickParams {
            nodes,
            output_path: out.clone(),
            ..Default::default()
        };
        assert_eq!(copy_newick(&params).unwrap(), 5);
        let text = std::fs::read_to_string(&out).unwrap();
        assert_eq!(text.trim_end(), "((A:1{0},B:2{1}):0.5{2},C:3{3});");
    }

    #[test]
    fn test_copy_newick_strips_edge_ids_and_gzips() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = tree_rows(dir.path(), "(A:1{0},B:2{1});");
        let out = dir.path().join("out.nwk.gz").display().to_string();
        let params = CopyNewickParams {
            nodes,
            output_path: out.clone(),
            edge_ids: Some(false),
            ..Default::default()
        };
        copy_newick(&params).unwrap();
        let mut text = String::new();
        GzDecoder::new(File::open(&out).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text.trim_end(), "(A:1,B:2);");
    }

    #[test]
    fn test_copy_newick_with_placements() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = tree_rows(dir.path(), "(A:1{0},B:2{1});");
        let out = dir.path().join("placed.nwk").display().to_string();
        let params = CopyNewickParams {
            nodes,
            output_path: out.clone(),
            placements: Some(vec![placement_table(&[("q1", 1, 0.5, 0.1)])]),
            edge_ids: Some(false),
            ..Default::default()
        };
        // Root, A, B plus one split node and one fragment.
        assert_eq!(copy_newick(&params).unwrap(), 5);
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains("q1:0.1"), "{text}");
    }

    #[test]
    fn test_copy_newick_unknown_edge() {
        let dir = tempfile::tempdir().unwrap();
        let nodes = tree_rows(dir.path(), "(A:1{0},B:2{1});");
        let params = CopyNewickParams {
            nodes,
            output_path: dir.path().join("x.nwk").display().to_string(),
            placements: Some(vec![placement_table(&[("q1", 9, 0.0, 0.1)])]),
            ..Default::default()
        };
        let err = copy_newick(&params).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownEdge);
    }

    #[test]
    fn test_copy_fastx_split_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let reads = vec![query_batch(&["p1"], &["AAAA"], Some(&["CCCC"]))];
        let path = format!("{}/out_{{ORIENTATION}}.fa", dir.path().display());
        let params = CopyFastxParams {
            reads,
            output_path: path,
            interleave: Some(false),
            ..Default::default()
        };
        assert_eq!(copy_fastx(&params).unwrap(), 1);
        let r1 = std::fs::read_to_string(dir.path().join("out_R1.fa")).unwrap();
        let r2 = std::fs::read_to_string(dir.path().join("out_R2.fa")).unwrap();
        assert_eq!(r1, ">p1\nAAAA\n");
        assert_eq!(r2, ">p1\nCCCC\n");
    }

    #[test]
    fn test_copy_fastx_paired_requires_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let params = CopyFastxParams {
            reads: vec![query_batch(&["p1"], &["AAAA"], Some(&["CCCC"]))],
            output_path: dir.path().join("out.fa").display().to_string(),
            ..Default::default()
        };
        let err = copy_fastx(&params).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParameterError);
    }
}
