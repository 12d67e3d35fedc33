//! Spectrum and chromatogram rows decoded from mzML.
//!
//! mzML leaves most CV parameters optional, so every scalar except the index,
//! id, MS level and default array length is an `Option` and is emitted as
//! NULL when absent.

use crate::sink::{
    write_opt_f64, write_opt_str, ColumnSpec, ColumnType, ColumnarSink, OutputSchema, SinkError,
};

/// A single spectrum.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrumRecord {
    /// Spectrum index (0-based, from the `index` attribute)
    pub index: i32,
    /// Native spectrum ID
    pub id: String,
    /// MS level; 0 when the file does not say
    pub ms_level: i32,
    /// Retention time in minutes
    pub retention_time: Option<f64>,
    /// `centroid` or `profile`
    pub spectrum_type: Option<String>,
    /// `positive` or `negative`
    pub polarity: Option<String>,
    /// Base peak m/z
    pub base_peak_mz: Option<f64>,
    /// Base peak intensity
    pub base_peak_intensity: Option<f64>,
    /// Total ion current
    pub total_ion_current: Option<f64>,
    /// Lowest observed m/z
    pub lowest_mz: Option<f64>,
    /// Highest observed m/z
    pub highest_mz: Option<f64>,
    /// Declared peak count
    pub default_array_length: i32,
    /// Selected ion m/z
    pub precursor_mz: Option<f64>,
    /// Selected ion charge state
    pub precursor_charge: Option<i32>,
    /// Selected ion intensity
    pub precursor_intensity: Option<f64>,
    /// Isolation window target m/z
    pub isolation_window_target: Option<f64>,
    /// Isolation window lower offset
    pub isolation_window_lower: Option<f64>,
    /// Isolation window upper offset
    pub isolation_window_upper: Option<f64>,
    /// `CID`, `HCD` or `ETD`
    pub activation_method: Option<String>,
    /// Collision energy
    pub collision_energy: Option<f64>,
    /// Decoded m/z values
    pub mz_array: Vec<f64>,
    /// Decoded intensities
    pub intensity_array: Vec<f64>,
    /// Vendor filter string
    pub filter_string: Option<String>,
    /// Scan window lower limit
    pub scan_window_lower: Option<f64>,
    /// Scan window upper limit
    pub scan_window_upper: Option<f64>,
    /// Index of the nearest preceding MS1 spectrum (MS2+ only)
    pub ms1_scan_index: Option<i32>,
}

/// A single chromatogram.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChromatogramRecord {
    /// Chromatogram index
    pub index: i32,
    /// Native chromatogram ID
    pub id: String,
    /// `TIC`, `BPC`, `SRM` or `SIC`
    pub chromatogram_type: Option<String>,
    /// Precursor isolation target m/z
    pub precursor_mz: Option<f64>,
    /// Product isolation target m/z
    pub product_mz: Option<f64>,
    /// Time values
    pub time_array: Vec<f64>,
    /// Intensities
    pub intensity_array: Vec<f64>,
}

/// Spectra returned by one `read_spectra` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrumBatch {
    /// Spectra in file order
    pub records: Vec<SpectrumRecord>,
}

/// Chromatograms returned by one `read_chromatograms` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChromatogramBatch {
    /// Chromatograms in file order
    pub records: Vec<ChromatogramRecord>,
}

impl SpectrumBatch {
    /// Number of spectra.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True at end of stream.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Output schema of a spectrum table.
    pub fn schema(include_filepath: bool) -> OutputSchema {
        use ColumnType::*;
        let mut schema = OutputSchema::new(vec![
            ColumnSpec::required("spectrum_index", Int32),
            ColumnSpec::required("spectrum_id", Utf8),
            ColumnSpec::required("ms_level", Int32),
            ColumnSpec::nullable("retention_time", Float64),
            ColumnSpec::nullable("spectrum_type", Utf8),
            ColumnSpec::nullable("polarity", Utf8),
            ColumnSpec::nullable("base_peak_mz", Float64),
            ColumnSpec::nullable("base_peak_intensity", Float64),
            ColumnSpec::nullable("total_ion_current", Float64),
            ColumnSpec::nullable("lowest_mz", Float64),
            ColumnSpec::nullable("highest_mz", Float64),
            ColumnSpec::required("default_array_length", Int32),
            ColumnSpec::nullable("precursor_mz", Float64),
            ColumnSpec::nullable("precursor_charge", Int32),
            ColumnSpec::nullable("precursor_intensity", Float64),
            ColumnSpec::nullable("isolation_window_target", Float64),
            ColumnSpec::nullable("isolation_window_lower", Float64),
            ColumnSpec::nullable("isolation_window_upper", Float64),
            ColumnSpec::nullable("activation_method", Utf8),
            ColumnSpec::nullable("collision_energy", Float64),
            ColumnSpec::required("mz_array", ListFloat64),
            ColumnSpec::required("intensity_array", ListFloat64),
            ColumnSpec::nullable("filter_string", Utf8),
            ColumnSpec::nullable("scan_window_lower", Float64),
            ColumnSpec::nullable("scan_window_upper", Float64),
            ColumnSpec::nullable("ms1_scan_index", Int32),
        ]);
        if include_filepath {
            schema.push(ColumnSpec::required("filepath", Utf8));
        }
        schema
    }

    /// Write every spectrum into `sink` and close the batch.
    pub fn emit(&self, sink: &mut dyn ColumnarSink, filepath: Option<&str>) -> Result<(), SinkError> {
        for (row, s) in self.records.iter().enumerate() {
            sink.write_i32(0, row, s.index)?;
            sink.write_str(1, row, &s.id)?;
            sink.write_i32(2, row, s.ms_level)?;
            write_opt_f64(sink, 3, row, s.retention_time)?;
            write_opt_str(sink, 4, row, s.spectrum_type.as_deref())?;
            write_opt_str(sink, 5, row, s.polarity.as_deref())?;
            write_opt_f64(sink, 6, row, s.base_peak_mz)?;
            write_opt_f64(sink, 7, row, s.base_peak_intensity)?;
            write_opt_f64(sink, 8, row, s.total_ion_current)?;
            write_opt_f64(sink, 9, row, s.lowest_mz)?;
            write_opt_f64(sink, 10, row, s.highest_mz)?;
            sink.write_i32(11, row, s.default_array_length)?;
            write_opt_f64(sink, 12, row, s.precursor_mz)?;
            match s.precursor_charge {
                Some(z) => sink.write_i32(13, row, z)?,
                None => sink.write_null(13, row)?,
            }
            write_opt_f64(sink, 14, row, s.precursor_intensity)?;
            write_opt_f64(sink, 15, row, s.isolation_window_target)?;
            write_opt_f64(sink, 16, row, s.isolation_window_lower)?;
            write_opt_f64(sink, 17, row, s.isolation_window_upper)?;
            write_opt_str(sink, 18, row, s.activation_method.as_deref())?;
            write_opt_f64(sink, 19, row, s.collision_energy)?;
            sink.reserve_list(20, s.mz_array.len())?;
            sink.append_list_f64(20, row, &s.mz_array)?;
            sink.reserve_list(21, s.intensity_array.len())?;
            sink.append_list_f64(21, row, &s.intensity_array)?;
            write_opt_str(sink, 22, row, s.filter_string.as_deref())?;
            write_opt_f64(sink, 23, row, s.scan_window_lower)?;
            write_opt_f64(sink, 24, row, s.scan_window_upper)?;
            match s.ms1_scan_index {
                Some(i) => sink.write_i32(25, row, i)?,
                None => sink.write_null(25, row)?,
            }
            if let Some(path) = filepath {
                sink.write_str(26, row, path)?;
            }
        }
        sink.set_cardinality(self.len())
    }
}

impl ChromatogramBatch {
    /// Number of chromatograms.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True at end of stream.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Output schema of a chromatogram table.
    pub fn schema(include_filepath: bool) -> OutputSchema {
        let mut schema = OutputSchema::new(vec![
            ColumnSpec::required("chromatogram_index", ColumnType::Int32),
            ColumnSpec::required("chromatogram_id", ColumnType::Utf8),
            ColumnSpec::nullable("chromatogram_type", ColumnType::Utf8),
            ColumnSpec::nullable("precursor_mz", ColumnType::Float64),
            ColumnSpec::nullable("product_mz", ColumnType::Float64),
            ColumnSpec::required("time_array", ColumnType::ListFloat64),
            ColumnSpec::required("intensity_array", ColumnType::ListFloat64),
        ]);
        if include_filepath {
            schema.push(ColumnSpec::required("filepath", ColumnType::Utf8));
        }
        schema
    }

    /// Write every chromatogram into `sink` and close the batch.
    pub fn emit(&self, sink: &mut dyn ColumnarSink, filepath: Option<&str>) -> Result<(), SinkError> {
        for (row, c) in self.records.iter().enumerate() {
            sink.write_i32(0, row, c.index)?;
            sink.write_str(1, row, &c.id)?;
            write_opt_str(sink, 2, row, c.chromatogram_type.as_deref())?;
            write_opt_f64(sink, 3, row, c.precursor_mz)?;
            write_opt_f64(sink, 4, row, c.product_mz)?;
            sink.append_list_f64(5, row, &c.time_array)?;
            sink.append_list_f64(6, row, &c.intensity_array)?;
            if let Some(path) = filepath {
                sink.write_str(7, row, path)?;
            }
        }
        sink.set_cardinality(self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ArrowSink;
    use arrow::array::{Array, AsArray};
    use arrow::datatypes::{Float64Type, Int32Type};

    #[test]
    fn test_spectrum_emit() {
        let batch = SpectrumBatch {
            records: vec![
                SpectrumRecord {
                    index: 0,
                    id: "scan=1".into(),
                    ms_level: 1,
                    mz_array: vec![100.0, 200.0],
                    intensity_array: vec![10.0, 20.0],
                    ..Default::default()
                },
                SpectrumRecord {
                    index: 1,
                    id: "scan=2".into(),
                    ms_level: 2,
                    precursor_mz: Some(150.0),
                    ms1_scan_index: Some(0),
                    ..Default::default()
                },
            ],
        };
        let mut sink = ArrowSink::new(SpectrumBatch::schema(false));
        batch.emit(&mut sink, None).unwrap();
        let out = &sink.batches()[0];
        assert_eq!(out.num_rows(), 2);
        let ms1 = out.column(25).as_primitive::<Int32Type>();
        assert!(ms1.is_null(0));
        assert_eq!(ms1.value(1), 0);
        let mz = out.column(20).as_list::<i32>().value(0);
        assert_eq!(mz.as_primitive::<Float64Type>().values(), &[100.0, 200.0]);
        assert_eq!(out.column(12).as_primitive::<Float64Type>().value(1), 150.0);
    }

    #[test]
    fn test_chromatogram_emit() {
        let batch = ChromatogramBatch {
            records: vec![ChromatogramRecord {
                index: 0,
                id: "TIC".into(),
                chromatogram_type: Some("TIC".into()),
                time_array: vec![0.5, 1.0],
                intensity_array: vec![3.0, 4.0],
                ..Default::default()
            }],
        };
        let mut sink = ArrowSink::new(ChromatogramBatch::schema(true));
        batch.emit(&mut sink, Some("run.mzML")).unwrap();
        let out = &sink.batches()[0];
        assert!(out.column(3).is_null(0));
        assert_eq!(out.column(7).as_string::<i32>().value(0), "run.mzML");
    }
}
