//! mzML spectra and chromatograms read from disk.

#![cfg(feature = "mzml")]

use arrow::array::{Array, AsArray};
use arrow::datatypes::{Float64Type, Int32Type};
use tempfile::tempdir;

use biocolumns::error::ErrorKind;
use biocolumns::mzml::binary::encode_f64;
use biocolumns::mzml::MzMLReader;
use biocolumns::table::{collect, ReadMzml, ReadMzmlChromatograms, ReadMzmlParams};

fn binary_array(accession: &str, values: &[f64]) -> String {
    format!(
        r#"<binaryDataArray encodedLength="0">
            <cvParam cvRef="MS" accession="MS:1000523" name="64-bit float"/>
            <cvParam cvRef="MS" accession="MS:1000574" name="zlib compression"/>
            <cvParam cvRef="MS" accession="{accession}"/>
            <binary>{}</binary>
          </binaryDataArray>"#,
        encode_f64(values, true).unwrap()
    )
}

fn two_spectrum_run() -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<indexedmzML xmlns="http://psi.hupo.org/ms/mzml">
<mzML version="1.1.0">
  <run id="run1">
    <spectrumList count="2">
      <spectrum index="0" id="scan=1" defaultArrayLength="2">
        <cvParam cvRef="MS" accession="MS:1000511" name="ms level" value="1"/>
        <cvParam cvRef="MS" accession="MS:1000127" name="centroid spectrum"/>
        <scanList count="1">
          <scan>
            <cvParam cvRef="MS" accession="MS:1000016" value="90" unitAccession="UO:0000010"/>
          </scan>
        </scanList>
        <binaryDataArrayList count="2">
          {ms1_mz}
          {ms1_int}
        </binaryDataArrayList>
      </spectrum>
      <spectrum index="1" id="scan=2" defaultArrayLength="1">
        <cvParam cvRef="MS" accession="MS:1000511" name="ms level" value="2"/>
        <precursorList count="1">
          <precursor>
            <selectedIonList count="1">
              <selectedIon>
                <cvParam cvRef="MS" accession="MS:1000744" name="selected ion m/z" value="150.0"/>
              </selectedIon>
            </selectedIonList>
          </precursor>
        </precursorList>
        <binaryDataArrayList count="2">
          {ms2_mz}
          {ms2_int}
        </binaryDataArrayList>
      </spectrum>
    </spectrumList>
    <chromatogramList count="1">
      <chromatogram index="0" id="TIC" defaultArrayLength="2">
        <binaryDataArrayList count="2">
          {time}
          {tic}
        </binaryDataArrayList>
      </chromatogram>
    </chromatogramList>
  </run>
</mzML>
</indexedmzML>
"#,
        ms1_mz = binary_array("MS:1000514", &[100.0, 200.0]),
        ms1_int = binary_array("MS:1000515", &[10.0, 20.0]),
        ms2_mz = binary_array("MS:1000514", &[75.0]),
        ms2_int = binary_array("MS:1000515", &[5.0]),
        time = binary_array("MS:1000595", &[0.5, 1.0]),
        tic = binary_array("MS:1000515", &[30.0, 5.0]),
    )
}

#[test]
fn test_two_spectrum_run() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("run.mzML");
    std::fs::write(&path, two_spectrum_run()).unwrap();

    let mut reader = MzMLReader::open(&path).unwrap();
    let batch = reader.read_spectra(10).unwrap();
    assert_eq!(batch.len(), 2);

    let ms1 = &batch.records[0];
    assert_eq!(ms1.ms_level, 1);
    assert_eq!(ms1.ms1_scan_index, None);
    assert_eq!(ms1.mz_array, vec![100.0, 200.0]);
    assert_eq!(ms1.intensity_array, vec![10.0, 20.0]);
    assert_eq!(ms1.retention_time, Some(1.5));

    let ms2 = &batch.records[1];
    assert_eq!(ms2.ms_level, 2);
    assert_eq!(ms2.ms1_scan_index, Some(0));
    assert_eq!(ms2.precursor_mz, Some(150.0));

    assert!(reader.read_spectra(10).unwrap().is_empty());
}

#[test]
fn test_spectrum_table() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("run.mzML");
    std::fs::write(&path, two_spectrum_run()).unwrap();

    let params = ReadMzmlParams {
        include_filepath: true,
        ..ReadMzmlParams::new([path.display().to_string()])
    };
    let function = ReadMzml::bind(&params).unwrap();
    let batches = collect(&function, 1).unwrap();
    let batch = &batches[0];
    assert_eq!(batch.num_rows(), 2);

    let levels = batch.column_by_name("ms_level").unwrap().as_primitive::<Int32Type>();
    assert_eq!(levels.value(1), 2);
    let ms1_index = batch
        .column_by_name("ms1_scan_index")
        .unwrap()
        .as_primitive::<Int32Type>();
    assert!(ms1_index.is_null(0));
    assert_eq!(ms1_index.value(1), 0);
    let mz = batch.column_by_name("mz_array").unwrap().as_list::<i32>();
    let first = mz.value(0);
    assert_eq!(first.as_primitive::<Float64Type>().values().to_vec(), vec![100.0, 200.0]);
    let paths = batch.column_by_name("filepath").unwrap().as_string::<i32>();
    assert!(paths.value(0).ends_with("run.mzML"));
}

#[test]
fn test_chromatogram_table() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("run.mzML");
    std::fs::write(&path, two_spectrum_run()).unwrap();

    let function =
        ReadMzmlChromatograms::bind(&ReadMzmlParams::new([path.display().to_string()])).unwrap();
    let batches = collect(&function, 1).unwrap();
    assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 1);
    let ids = batches[0].column_by_name("chromatogram_id").unwrap().as_string::<i32>();
    assert_eq!(ids.value(0), "TIC");
}

#[test]
fn test_truncated_file_is_malformed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cut.mzML");
    let text = two_spectrum_run();
    std::fs::write(&path, &text[..text.len() / 2]).unwrap();

    let function = ReadMzml::bind(&ReadMzmlParams::new([path.display().to_string()])).unwrap();
    let err = collect(&function, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedInput);
}
