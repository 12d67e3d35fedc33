#![no_main]

use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

use biocolumns::mzml::MzMLReader;

fuzz_target!(|data: &[u8]| {
    // Any input must end in a batch or an error, never a panic.
    let mut reader = MzMLReader::from_reader(Cursor::new(data), "fuzz.mzML");
    for _ in 0..100 {
        match reader.read_spectra(16) {
            Ok(batch) if batch.is_empty() => break,
            Ok(_) => {}
            Err(_) => return,
        }
    }
    for _ in 0..100 {
        match reader.read_chromatograms(16) {
            Ok(batch) if batch.is_empty() => break,
            Ok(_) => {}
            Err(_) => return,
        }
    }
});
