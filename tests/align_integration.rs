//! Aligner engines end to end, plus reading alignments back from SAM.
//!
//! minimap2 tests need the `minimap2` feature; bowtie2 tests return early
//! when `bowtie2` is not on `PATH`.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Int64Type, Schema, UInt16Type};
use arrow::record_batch::RecordBatch;
use tempfile::tempdir;

use biocolumns::align::{Bowtie2Aligner, Bowtie2Config};
use biocolumns::table::{
    collect, AlignBowtie2, AlignBowtie2Params, ReadAlignments, ReadAlignmentsParams,
};

/// Deterministic, non-repetitive 100 bp reference.
fn reference() -> String {
    let mut state: u32 = 0x2545_F491;
    (0..100)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            b"ACGT"[(state % 4) as usize] as char
        })
        .collect()
}

fn sequence_table(rows: &[(&str, &str)]) -> RecordBatch {
    let schema = Schema::new(vec![
        Field::new("read_id", DataType::Utf8, false),
        Field::new("sequence1", DataType::Utf8, false),
    ]);
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(rows.iter().map(|r| r.0).collect::<Vec<_>>())),
        Arc::new(StringArray::from(rows.iter().map(|r| r.1).collect::<Vec<_>>())),
    ];
    RecordBatch::try_new(Arc::new(schema), columns).unwrap()
}

struct Hit {
    reference: String,
    position: i64,
    cigar: String,
    flags: u16,
}

fn hits(batches: &[RecordBatch]) -> Vec<Hit> {
    let mut out = Vec::new();
    for batch in batches {
        let reference = batch.column_by_name("reference").unwrap().as_string::<i32>();
        let position = batch.column_by_name("position").unwrap().as_primitive::<Int64Type>();
        let cigar = batch.column_by_name("cigar").unwrap().as_string::<i32>();
        let flags = batch.column_by_name("flags").unwrap().as_primitive::<UInt16Type>();
        for row in 0..batch.num_rows() {
            out.push(Hit {
                reference: reference.value(row).to_string(),
                position: position.value(row),
                cigar: cigar.value(row).to_string(),
                flags: flags.value(row),
            });
        }
    }
    out
}

#[cfg(feature = "minimap2")]
#[test]
fn test_minimap2_exact_match() {
    use biocolumns::align::Minimap2Config;
    use biocolumns::table::{AlignMinimap2, AlignMinimap2Params};

    let reference = reference();
    let params = AlignMinimap2Params {
        query_table: vec![sequence_table(&[("q1", &reference[..52])])],
        subject_table: Some(vec![sequence_table(&[("ref1", &reference)])]),
        config: Minimap2Config::default(),
        ..Default::default()
    };
    let function = AlignMinimap2::bind(&params).unwrap();
    let found = hits(&collect(&function, 2).unwrap());
    let hit = found
        .iter()
        .find(|h| h.flags & 0x4 == 0)
        .expect("no mapped row");
    assert_eq!(hit.reference, "ref1");
    assert_eq!(hit.position, 1);
    assert!(hit.cigar.contains('='));
    assert!(!hit.cigar.contains('M'));
}

#[cfg(feature = "minimap2")]
#[test]
fn test_minimap2_saved_index_is_reusable() {
    use biocolumns::align::Minimap2Config;
    use biocolumns::table::{
        AlignMinimap2, AlignMinimap2Params, SaveMinimap2Index, SaveMinimap2IndexParams,
    };

    let dir = tempdir().unwrap();
    let index = dir.path().join("ref.mmi").display().to_string();
    let reference = reference();
    let save = SaveMinimap2Index::bind(&SaveMinimap2IndexParams {
        subject_table: vec![sequence_table(&[("ref1", &reference)])],
        output_path: index.clone(),
        config: Minimap2Config::default(),
    })
    .unwrap();
    let rows = collect(&save, 1).unwrap();
    assert_eq!(rows.iter().map(|b| b.num_rows()).sum::<usize>(), 1);

    let params = AlignMinimap2Params {
        query_table: vec![sequence_table(&[("q1", &reference[10..70])])],
        index_path: Some(index),
        ..Default::default()
    };
    let function = AlignMinimap2::bind(&params).unwrap();
    let found = hits(&collect(&function, 1).unwrap());
    assert!(found.iter().any(|h| h.flags & 0x4 == 0 && h.position == 11));
}

#[test]
fn test_bowtie2_exact_match() {
    if !Bowtie2Aligner::is_available() {
        eprintln!("bowtie2 not on PATH; skipping");
        return;
    }
    let reference = reference();
    let params = AlignBowtie2Params {
        query_table: vec![sequence_table(&[("q1", &reference[..52])])],
        subject_table: Some(vec![sequence_table(&[("ref1", &reference)])]),
        config: Bowtie2Config::default(),
        ..Default::default()
    };
    let function = AlignBowtie2::bind(&params).unwrap();
    let found = hits(&collect(&function, 1).unwrap());
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].reference, "ref1");
    assert_eq!(found[0].position, 1);
    assert_eq!(found[0].flags & 0x4, 0);
}

#[test]
fn test_read_headerless_sam_with_reference_table() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("hits.sam");
    std::fs::write(
        &path,
        "r1\t0\tchr1\t5\t60\t4M\t*\t0\t0\tACGT\tIIII\tNM:i:0\n\
         r2\t4\t*\t0\t0\t*\t*\t0\t0\tGGGG\tIIII\n",
    )
    .unwrap();

    let lengths = RecordBatch::try_new(
        Arc::new(Schema::new(vec![
            Field::new("name", DataType::Utf8, false),
            Field::new("length", DataType::Int64, false),
        ])),
        vec![
            Arc::new(StringArray::from(vec!["chr1"])) as ArrayRef,
            Arc::new(Int64Array::from(vec![100])) as ArrayRef,
        ],
    )
    .unwrap();
    let params = ReadAlignmentsParams {
        reference_lengths: Some(vec![lengths]),
        include_seq_qual: true,
        ..ReadAlignmentsParams::new([path.display().to_string()])
    };
    let function = ReadAlignments::bind(&params).unwrap();
    let batches = collect(&function, 1).unwrap();
    let found = hits(&batches);
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].reference, "chr1");
    assert_eq!(found[0].position, 5);
    assert_eq!(found[0].cigar, "4M");
    assert_eq!(found[1].flags & 0x4, 0x4);
    assert_eq!(found[1].reference, "*");
    assert_eq!(found[1].position, 0);

    let nm = batches[0].column_by_name("tag_nm").unwrap().as_primitive::<Int64Type>();
    assert_eq!(nm.value(0), 0);
    let seq = batches[0].column_by_name("sequence").unwrap().as_string::<i32>();
    assert_eq!(seq.value(1), "GGGG");
    assert!(batches[0].column_by_name("tag_md").unwrap().is_null(0));
}
