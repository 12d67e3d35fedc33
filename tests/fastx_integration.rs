//! FASTA / FASTQ reading through the table layer, and the copy round trip.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use arrow::array::{Array, AsArray, ListArray};
use arrow::datatypes::UInt8Type;
use arrow::record_batch::RecordBatch;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::tempdir;

use biocolumns::error::ErrorKind;
use biocolumns::fastx::SequenceReader;
use biocolumns::table::{collect, copy_fastx, CopyFastxParams, ReadFastx, ReadFastxParams};

fn write_gz(path: &Path, text: &str) {
    let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap();
}

fn read_table(params: &ReadFastxParams) -> Vec<RecordBatch> {
    let function = ReadFastx::bind(params).unwrap();
    collect(&function, 1).unwrap()
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> &'a dyn Array {
    batch.column_by_name(name).unwrap().as_ref()
}

fn phred_at(list: &ListArray, row: usize) -> Vec<u8> {
    list.value(row).as_primitive::<UInt8Type>().values().to_vec()
}

#[test]
fn test_gzipped_fastq_unpaired() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("reads.fq.gz");
    write_gz(
        &path,
        "@r1\nACGT\n+\nIIII\n@r2 desc\nGG\n+\n#5\n@r3\nT\n+\n!\n",
    );

    let batches = read_table(&ReadFastxParams::new([path.display().to_string()]));
    assert_eq!(batches.len(), 1);
    let batch = &batches[0];
    assert_eq!(batch.num_rows(), 3);

    let ids = column(batch, "read_id").as_string::<i32>();
    assert_eq!(
        (0..3).map(|i| ids.value(i)).collect::<Vec<_>>(),
        vec!["r1", "r2", "r3"]
    );
    let quals = column(batch, "qual1").as_list::<i32>();
    assert_eq!(phred_at(quals, 0), vec![40, 40, 40, 40]);
    assert_eq!(phred_at(quals, 1), vec![2, 20]);
    assert_eq!(phred_at(quals, 2), vec![0]);

    let seq2 = column(batch, "sequence2");
    let qual2 = column(batch, "qual2");
    assert_eq!(seq2.null_count(), 3);
    assert_eq!(qual2.null_count(), 3);
}

#[test]
fn test_fasta_paired() {
    let dir = tempdir().unwrap();
    let r1 = dir.path().join("x_R1.fa");
    let r2 = dir.path().join("x_R2.fa");
    std::fs::write(&r1, ">x/1\nACGT\n>y\nACGT\n").unwrap();
    std::fs::write(&r2, ">x/2\nTGCA\n>y\nTGCA\n").unwrap();

    let params = ReadFastxParams {
        sequence2: vec![r2.display().to_string()],
        ..ReadFastxParams::new([r1.display().to_string()])
    };
    let batches = read_table(&params);
    let batch = &batches[0];
    assert_eq!(batch.num_rows(), 2);

    let ids = column(batch, "read_id").as_string::<i32>();
    assert_eq!(ids.value(0), "x");
    assert_eq!(ids.value(1), "y");
    let seq2 = column(batch, "sequence2").as_string::<i32>();
    assert_eq!(seq2.value(0), "TGCA");
    assert_eq!(column(batch, "qual1").null_count(), 2);
    assert_eq!(column(batch, "qual2").null_count(), 2);
}

#[test]
fn test_fasta_paired_mismatch_is_fatal() {
    let dir = tempdir().unwrap();
    let r1 = dir.path().join("x_R1.fa");
    let r2 = dir.path().join("x_R2.fa");
    std::fs::write(&r1, ">x/1\nACGT\n").unwrap();
    std::fs::write(&r2, ">z/2\nTGCA\n").unwrap();

    let params = ReadFastxParams {
        sequence2: vec![r2.display().to_string()],
        ..ReadFastxParams::new([r1.display().to_string()])
    };
    let function = ReadFastx::bind(&params).unwrap();
    let err = collect(&function, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
}

#[test]
fn test_copy_then_read_back() {
    let dir = tempdir().unwrap();
    let r1 = dir.path().join("in_R1.fq");
    let r2 = dir.path().join("in_R2.fq");
    std::fs::write(&r1, "@a/1\nACGT\n+\nIIII\n@b/1\nGGCC\n+\n#5#5\n").unwrap();
    std::fs::write(&r2, "@a/2\nTTTT\n+\nAAAA\n@b/2\nCCGG\n+\n5#5#\n").unwrap();

    let params = ReadFastxParams {
        sequence2: vec![r2.display().to_string()],
        ..ReadFastxParams::new([r1.display().to_string()])
    };
    let reads = read_table(&params);

    let pattern = format!("{}/out_{{ORIENTATION}}.fq.gz", dir.path().display());
    let copy = CopyFastxParams {
        reads,
        output_path: pattern,
        fastq: true,
        interleave: Some(false),
        ..Default::default()
    };
    assert_eq!(copy_fastx(&copy).unwrap(), 2);

    let out1 = dir.path().join("out_R1.fq.gz");
    let out2 = dir.path().join("out_R2.fq.gz");
    let mut reader = SequenceReader::open(&out1, Some(out2.as_path())).unwrap();
    let batch = reader.read(10).unwrap();
    assert!(batch.is_paired);
    assert_eq!(batch.read_ids, vec!["a", "b"]);
    assert_eq!(batch.sequences1, vec!["ACGT", "GGCC"]);
    assert_eq!(batch.sequences2, vec!["TTTT", "CCGG"]);
    assert_eq!(batch.quals1[1].as_ref().unwrap().as_bytes(), b"#5#5");
    assert_eq!(batch.quals2[0].as_ref().unwrap().as_bytes(), b"AAAA");
    assert!(reader.read(10).unwrap().is_empty());
}

#[test]
fn test_glob_reads_files_in_sorted_order() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("b.fa"), ">b\nA\n").unwrap();
    std::fs::write(dir.path().join("a.fa"), ">a\nC\n").unwrap();
    let pattern = format!("{}/*.fa", dir.path().display());
    let params = ReadFastxParams {
        include_filepath: true,
        ..ReadFastxParams::new([pattern])
    };
    let batches = read_table(&params);
    let ids: Vec<String> = batches
        .iter()
        .flat_map(|b| {
            let ids = column(b, "read_id").as_string::<i32>();
            (0..b.num_rows()).map(|i| ids.value(i).to_string()).collect::<Vec<_>>()
        })
        .collect();
    assert_eq!(ids, vec!["a", "b"]);
    let paths = column(&batches[0], "filepath").as_string::<i32>();
    assert!(paths.value(0).ends_with("a.fa"));
}
