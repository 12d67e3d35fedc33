//! SFF clipping through the reader and the `read_sequences_sff` table.

use arrow::array::{Array, AsArray};
use arrow::datatypes::UInt8Type;
use tempfile::tempdir;

use biocolumns::error::ErrorKind;
use biocolumns::quality::QualOffset;
use biocolumns::sff::fixture::{encode, FixtureRead};
use biocolumns::sff::SffReader;
use biocolumns::table::{collect, ReadSff, ReadSffParams};

const BASES: &str = "ACGTACGTACGTACGTACGT";

fn fixture_read(clips: (u16, u16, u16, u16)) -> FixtureRead {
    FixtureRead {
        name: "read1".to_string(),
        bases: BASES.to_string(),
        quals: (0..20).collect(),
        clips,
    }
}

#[test]
fn test_quality_clip_trimming() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("one.sff");
    std::fs::write(&path, encode(&[fixture_read((3, 15, 0, 0))], 8)).unwrap();

    let mut reader = SffReader::open(&path, true).unwrap();
    let batch = reader.read(10).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.sequences1[0], &BASES[2..15]);
    assert_eq!(batch.sequences1[0].len(), 13);
    let phred = batch.quals1[0]
        .as_ref()
        .unwrap()
        .to_phred(QualOffset::Phred33)
        .unwrap();
    assert_eq!(phred, (2..15).collect::<Vec<u8>>());
    assert!(reader.read(10).unwrap().is_empty());
}

#[test]
fn test_untrimmed_table() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("one.sff");
    std::fs::write(&path, encode(&[fixture_read((3, 15, 0, 0))], 8)).unwrap();

    let params = ReadSffParams {
        trim: false,
        ..ReadSffParams::new([path.display().to_string()])
    };
    let function = ReadSff::bind(&params).unwrap();
    let batches = collect(&function, 1).unwrap();
    let batch = &batches[0];
    let seq = batch.column_by_name("sequence1").unwrap().as_string::<i32>();
    assert_eq!(seq.value(0), BASES);
    let quals = batch.column_by_name("qual1").unwrap().as_list::<i32>();
    let values = quals.value(0);
    assert_eq!(values.as_primitive::<UInt8Type>().len(), 20);
    assert_eq!(batch.column_by_name("sequence2").unwrap().null_count(), 1);
}

#[test]
fn test_bad_magic() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.sff");
    let mut bytes = encode(&[fixture_read((0, 0, 0, 0))], 4);
    bytes[0] = b'X';
    std::fs::write(&path, bytes).unwrap();
    let err = SffReader::open(&path, true).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
}
