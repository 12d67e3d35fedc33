//! Controlled vocabulary (CV) parameters read from mzML.
//!
//! Only the accessions the reader acts on are listed; every other `cvParam`
//! is ignored.

/// The three `cvParam` attributes the reader uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CvParam {
    /// Accession number (e.g., "MS:1000511")
    pub accession: String,
    /// Value attribute, empty when absent
    pub value: String,
    /// Unit accession, empty when absent
    pub unit_accession: String,
}

impl CvParam {
    /// Value as f64; `None` when empty or not a complete number.
    pub fn value_f64(&self) -> Option<f64> {
        parse_f64(&self.value)
    }

    /// Value as i32; `None` when empty, malformed or out of range.
    pub fn value_i32(&self) -> Option<i32> {
        parse_i32(&self.value)
    }
}

/// Parse a whole string as f64.
pub(crate) fn parse_f64(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse().ok()
}

/// Parse a whole string as i32.
pub(crate) fn parse_i32(s: &str) -> Option<i32> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse().ok()
}

/// PSI-MS and UO accessions used by the reader.
pub mod accessions {
    /// MS level
    pub const MS_LEVEL: &str = "MS:1000511";
    /// Centroid spectrum
    pub const CENTROID_SPECTRUM: &str = "MS:1000127";
    /// Profile spectrum
    pub const PROFILE_SPECTRUM: &str = "MS:1000128";
    /// Negative scan
    pub const NEGATIVE_SCAN: &str = "MS:1000129";
    /// Positive scan
    pub const POSITIVE_SCAN: &str = "MS:1000130";
    /// Base peak m/z
    pub const BASE_PEAK_MZ: &str = "MS:1000504";
    /// Base peak intensity
    pub const BASE_PEAK_INTENSITY: &str = "MS:1000505";
    /// Total ion current
    pub const TOTAL_ION_CURRENT: &str = "MS:1000285";
    /// Lowest observed m/z
    pub const LOWEST_OBSERVED_MZ: &str = "MS:1000528";
    /// Highest observed m/z
    pub const HIGHEST_OBSERVED_MZ: &str = "MS:1000527";
    /// Filter string
    pub const FILTER_STRING: &str = "MS:1000512";

    /// Scan start time
    pub const SCAN_START_TIME: &str = "MS:1000016";
    /// Scan window lower limit
    pub const SCAN_WINDOW_LOWER_LIMIT: &str = "MS:1000501";
    /// Scan window upper limit
    pub const SCAN_WINDOW_UPPER_LIMIT: &str = "MS:1000500";

    /// Selected ion m/z
    pub const SELECTED_ION_MZ: &str = "MS:1000744";
    /// Charge state
    pub const CHARGE_STATE: &str = "MS:1000041";
    /// Peak intensity
    pub const PEAK_INTENSITY: &str = "MS:1000042";
    /// Isolation window target m/z
    pub const ISOLATION_WINDOW_TARGET_MZ: &str = "MS:1000827";
    /// Isolation window lower offset
    pub const ISOLATION_WINDOW_LOWER_OFFSET: &str = "MS:1000828";
    /// Isolation window upper offset
    pub const ISOLATION_WINDOW_UPPER_OFFSET: &str = "MS:1000829";

    /// Collision-induced dissociation
    pub const CID: &str = "MS:1000133";
    /// Beam-type collision-induced dissociation
    pub const HCD: &str = "MS:1000422";
    /// Electron transfer dissociation
    pub const ETD: &str = "MS:1000598";
    /// Collision energy
    pub const COLLISION_ENERGY: &str = "MS:1000045";

    /// 32-bit integer
    pub const INT_32_BIT: &str = "MS:1000519";
    /// 64-bit integer
    pub const INT_64_BIT: &str = "MS:1000522";
    /// 32-bit float
    pub const FLOAT_32_BIT: &str = "MS:1000521";
    /// 64-bit float
    pub const FLOAT_64_BIT: &str = "MS:1000523";
    /// zlib compression
    pub const ZLIB_COMPRESSION: &str = "MS:1000574";
    /// No compression
    pub const NO_COMPRESSION: &str = "MS:1000576";
    /// m/z array
    pub const MZ_ARRAY: &str = "MS:1000514";
    /// Intensity array
    pub const INTENSITY_ARRAY: &str = "MS:1000515";
    /// Time array
    pub const TIME_ARRAY: &str = "MS:1000595";

    /// Total ion current chromatogram
    pub const TIC_CHROMATOGRAM: &str = "MS:1000235";
    /// Basepeak chromatogram
    pub const BPC_CHROMATOGRAM: &str = "MS:1000628";
    /// Selected reaction monitoring chromatogram
    pub const SRM_CHROMATOGRAM: &str = "MS:1001473";
    /// Selected reaction monitoring chromatogram (legacy term)
    pub const SRM_CHROMATOGRAM_LEGACY: &str = "MS:1000789";
    /// Selected ion current chromatogram
    pub const SIC_CHROMATOGRAM: &str = "MS:1000627";

    /// Unit: second
    pub const UNIT_SECOND: &str = "UO:0000010";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_parsing() {
        let cv = CvParam {
            accession: accessions::MS_LEVEL.into(),
            value: "2".into(),
            unit_accession: String::new(),
        };
        assert_eq!(cv.value_i32(), Some(2));
        assert_eq!(cv.value_f64(), Some(2.0));
        assert_eq!(parse_f64(""), None);
        assert_eq!(parse_f64("1.5x"), None);
        assert_eq!(parse_i32("99999999999"), None);
    }
}
