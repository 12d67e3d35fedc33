//! Pull-based mzML reader producing spectrum and chromatogram batches.
//!
//! The reader walks the document once. Completed spectra and chromatograms
//! are queued and handed out in batches; asking for chromatograms while
//! spectra are still pending fast-forwards through the spectrum list and
//! discards it.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::batch::{ChromatogramBatch, ChromatogramRecord, SpectrumBatch, SpectrumRecord};
use crate::error::Location;

use super::binary::{self, ArrayEncoding};
use super::context::{ContextStack, ParseContext, MAX_CONTEXT_DEPTH};
use super::cv_params::{accessions as cv, parse_i32, CvParam};
use super::error::MzMLError;

/// Read buffer size for mzML files.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// What the caller is currently pulling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Spectra,
    Chromatograms,
}

/// Encoding flags and text of the `<binaryDataArray>` being read.
#[derive(Debug)]
struct ArrayState {
    compressed: bool,
    encoding: ArrayEncoding,
    is_mz: bool,
    is_intensity: bool,
    is_time: bool,
    text: String,
}

impl Default for ArrayState {
    fn default() -> Self {
        Self {
            compressed: false,
            encoding: ArrayEncoding::Float64,
            is_mz: false,
            is_intensity: false,
            is_time: false,
            text: String::new(),
        }
    }
}

impl ArrayState {
    fn apply(&mut self, param: &CvParam) {
        match param.accession.as_str() {
            cv::ZLIB_COMPRESSION => self.compressed = true,
            cv::NO_COMPRESSION => self.compressed = false,
            cv::FLOAT_64_BIT => self.encoding = ArrayEncoding::Float64,
            cv::FLOAT_32_BIT => self.encoding = ArrayEncoding::Float32,
            cv::INT_32_BIT => self.encoding = ArrayEncoding::Int32,
            cv::INT_64_BIT => self.encoding = ArrayEncoding::Int64,
            cv::MZ_ARRAY => self.is_mz = true,
            cv::INTENSITY_ARRAY => self.is_intensity = true,
            cv::TIME_ARRAY => self.is_time = true,
            _ => {}
        }
    }
}

/// Streaming mzML reader.
///
/// ```no_run
/// use biocolumns::mzml::MzMLReader;
///
/// let mut reader = MzMLReader::open("run.mzML")?;
/// loop {
///     let batch = reader.read_spectra(1024)?;
///     if batch.is_empty() {
///         break;
///     }
///     println!("{} spectra", batch.len());
/// }
/// # Ok::<(), biocolumns::mzml::MzMLError>(())
/// ```
pub struct MzMLReader<R: BufRead = BufReader<File>> {
    path: PathBuf,
    reader: Reader<R>,
    buf: Vec<u8>,
    stack: ContextStack,

    param_groups: HashMap<String, Vec<CvParam>>,
    current_group: String,

    spectrum: SpectrumRecord,
    chromatogram: ChromatogramRecord,
    array: ArrayState,
    last_ms1_index: Option<i32>,

    spectra: VecDeque<SpectrumRecord>,
    chromatograms: VecDeque<ChromatogramRecord>,

    mode: Mode,
    discard_spectra: bool,
    seen_element: bool,
    has_spectrum_list: bool,
    has_chromatogram_list: bool,
    spectra_done: bool,
    chromatograms_done: bool,
    parse_done: bool,
    poisoned: bool,
}

impl MzMLReader<BufReader<File>> {
    /// Open an mzML file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MzMLError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| MzMLError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_reader(
            BufReader::with_capacity(READ_BUFFER_SIZE, file),
            path,
        ))
    }
}

impl<R: BufRead> MzMLReader<R> {
    /// Wrap any buffered source; `name` is used in error locations.
    pub fn from_reader(source: R, name: impl AsRef<Path>) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(true);
        Self {
            path: name.as_ref().to_path_buf(),
            reader,
            buf: Vec::with_capacity(8 * 1024),
            stack: ContextStack::default(),
            param_groups: HashMap::new(),
            current_group: String::new(),
            spectrum: SpectrumRecord::default(),
            chromatogram: ChromatogramRecord::default(),
            array: ArrayState::default(),
            last_ms1_index: None,
            spectra: VecDeque::new(),
            chromatograms: VecDeque::new(),
            mode: Mode::Spectra,
            discard_spectra: false,
            seen_element: false,
            has_spectrum_list: false,
            has_chromatogram_list: false,
            spectra_done: false,
            chromatograms_done: false,
            parse_done: false,
            poisoned: false,
        }
    }

    /// Path or name the reader was created with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a `<spectrumList>` has been seen so far.
    pub fn has_spectra(&self) -> bool {
        self.has_spectrum_list
    }

    /// Whether a `<chromatogramList>` has been seen so far.
    pub fn has_chromatograms(&self) -> bool {
        self.has_chromatogram_list
    }

    /// Return up to `n` spectra; an empty batch means no more spectra.
    pub fn read_spectra(&mut self, n: usize) -> Result<SpectrumBatch, MzMLError> {
        self.check_usable()?;
        if n == 0 {
            return Ok(SpectrumBatch::default());
        }
        if self.spectra.len() < n && !self.spectra_done {
            self.mode = Mode::Spectra;
            self.guarded_pump(n)?;
        }
        let take = n.min(self.spectra.len());
        Ok(SpectrumBatch {
            records: self.spectra.drain(..take).collect(),
        })
    }

    /// Return up to `n` chromatograms; an empty batch means no more.
    ///
    /// Spectra not yet read are skipped and cannot be read afterwards.
    pub fn read_chromatograms(&mut self, n: usize) -> Result<ChromatogramBatch, MzMLError> {
        self.check_usable()?;
        if n == 0 {
            return Ok(ChromatogramBatch::default());
        }
        if !self.spectra_done {
            log::debug!(
                "mzml: skipping remaining spectra in {} to reach chromatograms",
                self.path.display()
            );
            self.discard_spectra = true;
            self.mode = Mode::Spectra;
            self.guarded_pump(usize::MAX)?;
        }
        self.spectra.clear();
        if self.chromatograms.len() < n && !self.chromatograms_done {
            self.mode = Mode::Chromatograms;
            self.guarded_pump(n)?;
        }
        let take = n.min(self.chromatograms.len());
        Ok(ChromatogramBatch {
            records: self.chromatograms.drain(..take).collect(),
        })
    }

    fn check_usable(&self) -> Result<(), MzMLError> {
        if self.poisoned {
            return Err(MzMLError::Poisoned {
                location: Location::file(&self.path),
            });
        }
        Ok(())
    }

    fn guarded_pump(&mut self, needed: usize) -> Result<(), MzMLError> {
        let result = self.pump(needed);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn satisfied(&self, needed: usize) -> bool {
        if self.parse_done {
            return true;
        }
        match self.mode {
            Mode::Spectra => self.spectra_done || self.spectra.len() >= needed,
            Mode::Chromatograms => self.chromatograms_done || self.chromatograms.len() >= needed,
        }
    }

    fn pump(&mut self, needed: usize) -> Result<(), MzMLError> {
        let mut buf = std::mem::take(&mut self.buf);
        let result = self.pump_with(&mut buf, needed);
        buf.clear();
        self.buf = buf;
        result
    }

    fn pump_with(&mut self, buf: &mut Vec<u8>, needed: usize) -> Result<(), MzMLError> {
        while !self.satisfied(needed) {
            buf.clear();
            let event = match self.reader.read_event_into(buf) {
                Ok(event) => event,
                Err(source) => {
                    return Err(MzMLError::Xml {
                        source,
                        location: self.location_at(self.reader.error_position() as u64),
                    })
                }
            };
            match event {
                Event::Start(e) => {
                    self.seen_element = true;
                    self.on_start(&e)?;
                }
                Event::Empty(e) => {
                    self.seen_element = true;
                    self.on_start(&e)?;
                    self.on_end(e.local_name().as_ref())?;
                }
                Event::End(e) => self.on_end(e.local_name().as_ref())?,
                Event::Text(t) if self.stack.top().is_binary() => {
                    let text = t.unescape().map_err(|source| self.xml_error(source))?;
                    self.array.text.push_str(&text);
                }
                Event::CData(c) if self.stack.top().is_binary() => {
                    self.array.text.push_str(&String::from_utf8_lossy(&c));
                }
                Event::Eof => return self.on_eof(),
                _ => {}
            }
        }
        Ok(())
    }

    fn on_eof(&mut self) -> Result<(), MzMLError> {
        self.parse_done = true;
        if !self.seen_element {
            return Err(self.malformed("document contains no elements"));
        }
        if self.stack.top() != ParseContext::None {
            let open = String::from_utf8_lossy(self.stack.top().element_name()).into_owned();
            return Err(self.malformed(format!("unexpected end of file inside <{open}>")));
        }
        self.spectra_done = true;
        self.chromatograms_done = true;
        Ok(())
    }

    fn on_start(&mut self, e: &BytesStart<'_>) -> Result<(), MzMLError> {
        let ctx = self.stack.top();
        let local = e.local_name();
        let name = local.as_ref();

        if let Some(next) = ctx.child(name) {
            if !self.stack.push(next) {
                return Err(self.malformed(format!(
                    "XML nesting too deep (more than {MAX_CONTEXT_DEPTH} levels)"
                )));
            }
            return self.enter(next, e);
        }

        match name {
            b"cvParam" => {
                let param = self.parse_cv_param(e)?;
                if ctx == ParseContext::ParamGroup {
                    self.param_groups
                        .entry(self.current_group.clone())
                        .or_default()
                        .push(param);
                } else {
                    self.apply(ctx, &param);
                }
            }
            b"referenceableParamGroupRef" => {
                if let Some(group_ref) = self.attribute(e, b"ref")? {
                    // Take the group out so `apply` can borrow self mutably.
                    if let Some(group) = self.param_groups.remove(&group_ref) {
                        for param in &group {
                            self.apply(ctx, param);
                        }
                        self.param_groups.insert(group_ref, group);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn enter(&mut self, ctx: ParseContext, e: &BytesStart<'_>) -> Result<(), MzMLError> {
        match ctx {
            ParseContext::ParamGroup => {
                let id = self.attribute(e, b"id")?.unwrap_or_default();
                self.param_groups.insert(id.clone(), Vec::new());
                self.current_group = id;
            }
            ParseContext::SpectrumList => self.has_spectrum_list = true,
            ParseContext::Spectrum => {
                self.spectrum = SpectrumRecord::default();
                if let Some(index) = self.attribute(e, b"index")? {
                    self.spectrum.index = parse_i32(&index).unwrap_or_default();
                }
                self.spectrum.id = self.attribute(e, b"id")?.unwrap_or_default();
                if let Some(len) = self.attribute(e, b"defaultArrayLength")? {
                    self.spectrum.default_array_length = parse_i32(&len).unwrap_or_default();
                }
            }
            ParseContext::ChromatogramList => {
                self.has_chromatogram_list = true;
                self.spectra_done = true;
            }
            ParseContext::Chromatogram => {
                self.chromatogram = ChromatogramRecord::default();
                if let Some(index) = self.attribute(e, b"index")? {
                    self.chromatogram.index = parse_i32(&index).unwrap_or_default();
                }
                self.chromatogram.id = self.attribute(e, b"id")?.unwrap_or_default();
            }
            ParseContext::SpectrumArray | ParseContext::ChromatogramArray => {
                self.array = ArrayState::default();
            }
            ParseContext::SpectrumBinary | ParseContext::ChromatogramBinary => {
                self.array.text.clear();
            }
            _ => {}
        }
        Ok(())
    }

    fn on_end(&mut self, name: &[u8]) -> Result<(), MzMLError> {
        let ctx = self.stack.top();
        if ctx == ParseContext::None || ctx.element_name() != name {
            return Ok(());
        }
        self.stack.pop();

        match ctx {
            ParseContext::Run => {
                self.spectra_done = true;
                self.chromatograms_done = true;
            }
            ParseContext::SpectrumList => self.spectra_done = true,
            ParseContext::ChromatogramList => self.chromatograms_done = true,
            ParseContext::Spectrum => self.finish_spectrum(),
            ParseContext::Chromatogram => {
                let done = std::mem::take(&mut self.chromatogram);
                self.chromatograms.push_back(done);
            }
            ParseContext::SpectrumBinary => {
                if !self.discard_spectra && (self.array.is_mz || self.array.is_intensity) {
                    let values = self.decode_array()?;
                    if self.array.is_mz {
                        self.spectrum.mz_array = values;
                    } else {
                        self.spectrum.intensity_array = values;
                    }
                }
            }
            ParseContext::ChromatogramBinary => {
                if self.array.is_time || self.array.is_intensity {
                    let values = self.decode_array()?;
                    if self.array.is_time {
                        self.chromatogram.time_array = values;
                    } else {
                        self.chromatogram.intensity_array = values;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn finish_spectrum(&mut self) {
        let mut done = std::mem::take(&mut self.spectrum);
        if done.ms_level == 1 {
            self.last_ms1_index = Some(done.index);
            done.ms1_scan_index = None;
        } else {
            done.ms1_scan_index = self.last_ms1_index;
        }
        if !self.discard_spectra {
            self.spectra.push_back(done);
        }
    }

    fn decode_array(&mut self) -> Result<Vec<f64>, MzMLError> {
        let text = std::mem::take(&mut self.array.text);
        binary::decode(&text, self.array.compressed, self.array.encoding).map_err(|source| {
            MzMLError::Binary {
                source,
                location: self.location_at(self.reader.buffer_position() as u64),
            }
        })
    }

    fn apply(&mut self, ctx: ParseContext, param: &CvParam) {
        use ParseContext as C;
        match ctx {
            C::Spectrum => self.apply_spectrum(param),
            C::Scan => {
                if param.accession == cv::SCAN_START_TIME {
                    self.spectrum.retention_time = param.value_f64().map(|rt| {
                        if param.unit_accession == cv::UNIT_SECOND {
                            rt / 60.0
                        } else {
                            rt
                        }
                    });
                }
            }
            C::ScanWindow => match param.accession.as_str() {
                cv::SCAN_WINDOW_LOWER_LIMIT => self.spectrum.scan_window_lower = param.value_f64(),
                cv::SCAN_WINDOW_UPPER_LIMIT => self.spectrum.scan_window_upper = param.value_f64(),
                _ => {}
            },
            C::IsolationWindow => match param.accession.as_str() {
                cv::ISOLATION_WINDOW_TARGET_MZ => {
                    self.spectrum.isolation_window_target = param.value_f64()
                }
                cv::ISOLATION_WINDOW_LOWER_OFFSET => {
                    self.spectrum.isolation_window_lower = param.value_f64()
                }
                cv::ISOLATION_WINDOW_UPPER_OFFSET => {
                    self.spectrum.isolation_window_upper = param.value_f64()
                }
                _ => {}
            },
            C::SelectedIon => match param.accession.as_str() {
                cv::SELECTED_ION_MZ => self.spectrum.precursor_mz = param.value_f64(),
                cv::CHARGE_STATE => self.spectrum.precursor_charge = param.value_i32(),
                cv::PEAK_INTENSITY => self.spectrum.precursor_intensity = param.value_f64(),
                _ => {}
            },
            C::Activation => match param.accession.as_str() {
                cv::CID => self.spectrum.activation_method = Some("CID".into()),
                cv::HCD => self.spectrum.activation_method = Some("HCD".into()),
                cv::ETD => self.spectrum.activation_method = Some("ETD".into()),
                cv::COLLISION_ENERGY => self.spectrum.collision_energy = param.value_f64(),
                _ => {}
            },
            C::SpectrumArray | C::ChromatogramArray => self.array.apply(param),
            C::Chromatogram => {
                let kind = match param.accession.as_str() {
                    cv::TIC_CHROMATOGRAM => "TIC",
                    cv::BPC_CHROMATOGRAM => "BPC",
                    cv::SRM_CHROMATOGRAM | cv::SRM_CHROMATOGRAM_LEGACY => "SRM",
                    cv::SIC_CHROMATOGRAM => "SIC",
                    _ => return,
                };
                self.chromatogram.chromatogram_type = Some(kind.into());
            }
            C::ChromatogramPrecursorWindow => {
                if param.accession == cv::ISOLATION_WINDOW_TARGET_MZ {
                    self.chromatogram.precursor_mz = param.value_f64();
                }
            }
            C::ChromatogramProductWindow => {
                if param.accession == cv::ISOLATION_WINDOW_TARGET_MZ {
                    self.chromatogram.product_mz = param.value_f64();
                }
            }
            _ => {}
        }
    }

    fn apply_spectrum(&mut self, param: &CvParam) {
        let s = &mut self.spectrum;
        match param.accession.as_str() {
            cv::MS_LEVEL => s.ms_level = param.value_i32().unwrap_or_default(),
            cv::CENTROID_SPECTRUM => s.spectrum_type = Some("centroid".into()),
            cv::PROFILE_SPECTRUM => s.spectrum_type = Some("profile".into()),
            cv::POSITIVE_SCAN => s.polarity = Some("positive".into()),
            cv::NEGATIVE_SCAN => s.polarity = Some("negative".into()),
            cv::BASE_PEAK_MZ => s.base_peak_mz = param.value_f64(),
            cv::BASE_PEAK_INTENSITY => s.base_peak_intensity = param.value_f64(),
            cv::TOTAL_ION_CURRENT => s.total_ion_current = param.value_f64(),
            cv::LOWEST_OBSERVED_MZ => s.lowest_mz = param.value_f64(),
            cv::HIGHEST_OBSERVED_MZ => s.highest_mz = param.value_f64(),
            cv::FILTER_STRING => s.filter_string = Some(param.value.clone()),
            _ => {}
        }
    }

    fn parse_cv_param(&self, e: &BytesStart<'_>) -> Result<CvParam, MzMLError> {
        let mut param = CvParam::default();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| self.xml_error(err.into()))?;
            let slot = match attr.key.local_name().as_ref() {
                b"accession" => &mut param.accession,
                b"value" => &mut param.value,
                b"unitAccession" => &mut param.unit_accession,
                _ => continue,
            };
            *slot = attr
                .unescape_value()
                .map_err(|err| self.xml_error(err))?
                .into_owned();
        }
        Ok(param)
    }

    fn attribute(&self, e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, MzMLError> {
        for attr in e.attributes() {
            let attr = attr.map_err(|err| self.xml_error(err.into()))?;
            if attr.key.local_name().as_ref() == key {
                let value = attr.unescape_value().map_err(|err| self.xml_error(err))?;
                return Ok(Some(value.into_owned()));
            }
        }
        Ok(None)
    }

    fn location_at(&self, offset: u64) -> Location {
        Location::byte(&self.path, offset)
    }

    fn xml_error(&self, source: quick_xml::Error) -> MzMLError {
        MzMLError::Xml {
            source,
            location: self.location_at(self.reader.buffer_position() as u64),
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> MzMLError {
        MzMLError::Malformed {
            reason: reason.into(),
            location: self.location_at(self.reader.buffer_position() as u64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mzml::binary::encode_f64;
    use std::io::Cursor;

    fn reader(xml: &str) -> MzMLReader<Cursor<Vec<u8>>> {
        MzMLReader::from_reader(Cursor::new(xml.as_bytes().to_vec()), "test.mzML")
    }

    fn array(kind: &str, values: &[f64], compressed: bool) -> String {
        let compression = if compressed { "MS:1000574" } else { "MS:1000576" };
        format!(
            r#"<binaryDataArray>
                 <cvParam accession="{compression}"/>
                 <cvParam accession="MS:1000523"/>
                 <cvParam accession="{kind}"/>
                 <binary>{}</binary>
               </binaryDataArray>"#,
            encode_f64(values, compressed).unwrap()
        )
    }

    fn two_spectrum_run() -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<mzML>
  <referenceableParamGroupList count="1">
    <referenceableParamGroup id="mzArray">
      <cvParam accession="MS:1000514" name="m/z array"/>
      <cvParam accession="MS:1000523" name="64-bit float"/>
    </referenceableParamGroup>
  </referenceableParamGroupList>
  <run id="r1">
    <spectrumList count="2">
      <spectrum index="0" id="scan=1" defaultArrayLength="2">
        <cvParam accession="MS:1000511" value="1"/>
        <cvParam accession="MS:1000127"/>
        <cvParam accession="MS:1000130"/>
        <scanList>
          <scan>
            <cvParam accession="MS:1000016" value="60" unitAccession="UO:0000010"/>
            <scanWindowList>
              <scanWindow>
                <cvParam accession="MS:1000501" value="100"/>
                <cvParam accession="MS:1000500" value="2000"/>
              </scanWindow>
            </scanWindowList>
          </scan>
        </scanList>
        <binaryDataArrayList count="3">
          <binaryDataArray>
            <referenceableParamGroupRef ref="mzArray"/>
            <cvParam accession="MS:1000574"/>
            <binary>{mz}</binary>
          </binaryDataArray>
          {intensity}
          <binaryDataArray>
            <cvParam accession="MS:1000523"/>
            <cvParam accession="MS:1000786" name="non-standard data array"/>
            <binary>!!not base64 but never decoded!!</binary>
          </binaryDataArray>
        </binaryDataArrayList>
      </spectrum>
      <spectrum index="1" id="scan=2" defaultArrayLength="1">
        <cvParam accession="MS:1000511" value="2"/>
        <precursorList>
          <precursor>
            <isolationWindow>
              <cvParam accession="MS:1000827" value="445.3"/>
            </isolationWindow>
            <selectedIonList>
              <selectedIon>
                <cvParam accession="MS:1000744" value="445.34"/>
                <cvParam accession="MS:1000041" value="2"/>
              </selectedIon>
            </selectedIonList>
            <activation>
              <cvParam accession="MS:1000422"/>
              <cvParam accession="MS:1000045" value="30"/>
            </activation>
          </precursor>
        </precursorList>
        <binaryDataArrayList count="2">
          {mz2}
          <binaryDataArray>
            <cvParam accession="MS:1000515"/>
            <binary/>
          </binaryDataArray>
        </binaryDataArrayList>
      </spectrum>
    </spectrumList>
    <chromatogramList count="1">
      <chromatogram index="0" id="TIC">
        <cvParam accession="MS:1000235"/>
        <binaryDataArrayList count="2">
          {time}
          {tic}
        </binaryDataArrayList>
      </chromatogram>
    </chromatogramList>
  </run>
</mzML>"#,
            mz = encode_f64(&[100.0, 200.0], true).unwrap(),
            intensity = array("MS:1000515", &[10.0, 20.0], false),
            mz2 = array("MS:1000514", &[150.5], false),
            time = array("MS:1000595", &[0.0, 1.0], true),
            tic = array("MS:1000515", &[5.0, 6.0], false),
        )
    }

    #[test]
    fn test_reads_spectra_in_order() {
        let mut r = reader(&two_spectrum_run());
        let batch = r.read_spectra(10).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(r.has_spectra());

        let ms1 = &batch.records[0];
        assert_eq!(ms1.id, "scan=1");
        assert_eq!(ms1.ms_level, 1);
        assert_eq!(ms1.retention_time, Some(1.0));
        assert_eq!(ms1.spectrum_type.as_deref(), Some("centroid"));
        assert_eq!(ms1.polarity.as_deref(), Some("positive"));
        assert_eq!(ms1.mz_array, vec![100.0, 200.0]);
        assert_eq!(ms1.intensity_array, vec![10.0, 20.0]);
        assert_eq!(ms1.scan_window_lower, Some(100.0));
        assert_eq!(ms1.scan_window_upper, Some(2000.0));
        assert_eq!(ms1.ms1_scan_index, None);

        let ms2 = &batch.records[1];
        assert_eq!(ms2.ms_level, 2);
        assert_eq!(ms2.precursor_mz, Some(445.34));
        assert_eq!(ms2.precursor_charge, Some(2));
        assert_eq!(ms2.isolation_window_target, Some(445.3));
        assert_eq!(ms2.activation_method.as_deref(), Some("HCD"));
        assert_eq!(ms2.collision_energy, Some(30.0));
        assert_eq!(ms2.mz_array, vec![150.5]);
        assert!(ms2.intensity_array.is_empty());
        assert_eq!(ms2.ms1_scan_index, Some(0));

        assert!(r.read_spectra(10).unwrap().is_empty());
    }

    #[test]
    fn test_batches_respect_limit() {
        let mut r = reader(&two_spectrum_run());
        assert_eq!(r.read_spectra(1).unwrap().records[0].id, "scan=1");
        assert_eq!(r.read_spectra(1).unwrap().records[0].id, "scan=2");
        assert!(r.read_spectra(1).unwrap().is_empty());
        assert!(r.read_spectra(0).unwrap().is_empty());
    }

    #[test]
    fn test_chromatograms_skip_spectra() {
        let mut r = reader(&two_spectrum_run());
        let batch = r.read_chromatograms(10).unwrap();
        assert_eq!(batch.len(), 1);
        let tic = &batch.records[0];
        assert_eq!(tic.id, "TIC");
        assert_eq!(tic.chromatogram_type.as_deref(), Some("TIC"));
        assert_eq!(tic.time_array, vec![0.0, 1.0]);
        assert_eq!(tic.intensity_array, vec![5.0, 6.0]);
        assert!(r.has_chromatograms());
        assert!(r.read_spectra(10).unwrap().is_empty());
        assert!(r.read_chromatograms(10).unwrap().is_empty());
    }

    #[test]
    fn test_retention_time_in_minutes_untouched() {
        let xml = r#"<mzML><run><spectrumList><spectrum index="0" id="s">
            <scanList><scan><cvParam accession="MS:1000016" value="2.5" unitAccession="UO:0000031"/></scan></scanList>
            </spectrum></spectrumList></run></mzML>"#;
        let batch = reader(xml).read_spectra(5).unwrap();
        assert_eq!(batch.records[0].retention_time, Some(2.5));
        assert_eq!(batch.records[0].ms_level, 0);
    }

    #[test]
    fn test_bad_numeric_value_is_absent() {
        let xml = r#"<mzML><run><spectrumList><spectrum index="0" id="s">
            <cvParam accession="MS:1000504" value="abc"/>
            </spectrum></spectrumList></run></mzML>"#;
        let batch = reader(xml).read_spectra(5).unwrap();
        assert_eq!(batch.records[0].base_peak_mz, None);
    }

    #[test]
    fn test_integer_arrays_are_widened() {
        let mut ints = Vec::new();
        for v in [100i32, 250] {
            ints.extend_from_slice(&v.to_le_bytes());
        }
        let xml = format!(
            r#"<mzML><run><spectrumList><spectrum index="0" id="s" defaultArrayLength="2">
            <binaryDataArrayList count="2">
              <binaryDataArray>
                <cvParam accession="MS:1000514"/><cvParam accession="MS:1000523"/>
                <binary>{mz}</binary>
              </binaryDataArray>
              <binaryDataArray>
                <cvParam accession="MS:1000515"/><cvParam accession="MS:1000519" name="32-bit integer"/>
                <binary>{int32}</binary>
              </binaryDataArray>
            </binaryDataArrayList>
            </spectrum></spectrumList></run></mzML>"#,
            mz = encode_f64(&[100.0, 200.0], false).unwrap(),
            int32 = binary::base64_encode(&ints),
        );
        let batch = reader(&xml).read_spectra(5).unwrap();
        assert_eq!(batch.records[0].intensity_array, vec![100.0, 250.0]);
    }

    #[test]
    fn test_corrupt_binary_is_fatal() {
        let xml = r#"<mzML><run><spectrumList><spectrum index="0" id="s">
            <binaryDataArrayList><binaryDataArray>
              <cvParam accession="MS:1000514"/><cvParam accession="MS:1000574"/>
              <binary>AAAAAAAAAAA=</binary>
            </binaryDataArray></binaryDataArrayList>
            </spectrum></spectrumList></run></mzML>"#;
        let mut r = reader(xml);
        let err = r.read_spectra(5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupt);
        assert!(matches!(r.read_spectra(5), Err(MzMLError::Poisoned { .. })));
    }

    #[test]
    fn test_empty_document_is_malformed() {
        let err = reader("").read_spectra(5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }

    #[test]
    fn test_truncated_document_is_malformed() {
        let xml = r#"<mzML><run><spectrumList><spectrum index="0" id="s">"#;
        let err = reader(xml).read_spectra(5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }

    #[test]
    fn test_unknown_nesting_does_not_count() {
        let mut xml = String::from("<mzML>");
        for _ in 0..100 {
            xml.push_str("<userParam>");
        }
        for _ in 0..100 {
            xml.push_str("</userParam>");
        }
        xml.push_str("</mzML>");
        assert!(reader(&xml).read_spectra(5).unwrap().is_empty());
    }

    #[test]
    fn test_tracked_nesting_too_deep() {
        let mut xml = String::new();
        for _ in 0..70 {
            xml.push_str("<mzML>");
        }
        for _ in 0..70 {
            xml.push_str("</mzML>");
        }
        let err = reader(&xml).read_spectra(5).unwrap_err();
        assert!(err.to_string().contains("nesting too deep"), "{err}");
    }

    #[test]
    fn test_open_missing_file() {
        let err = MzMLReader::open("/nonexistent/run.mzML").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }
}
