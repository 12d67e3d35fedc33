//! Per-base quality scores.
//!
//! Qualities are kept as the ASCII string found in the input and decoded to
//! raw Phred values only when emitted, so the same record can be written with
//! either offset.

use std::borrow::Cow;
use std::fmt;

/// Quality offsets accepted by readers and writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualOffset {
    /// Sanger / Illumina 1.8+ (`!` = 0)
    #[default]
    Phred33,
    /// Illumina 1.3 to 1.7 (`@` = 0)
    Phred64,
}

impl QualOffset {
    /// Numeric offset.
    pub fn value(self) -> u8 {
        match self {
            QualOffset::Phred33 => 33,
            QualOffset::Phred64 => 64,
        }
    }

    /// Parse a user-supplied offset; only 33 and 64 are valid.
    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            33 => Some(QualOffset::Phred33),
            64 => Some(QualOffset::Phred64),
            _ => None,
        }
    }
}

/// Highest Phred value representable in printable ASCII with offset 33.
pub const MAX_PHRED: u8 = 93;

/// Failure converting between ASCII and Phred.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QualityError {
    /// Raw value plus offset leaves printable ASCII.
    #[error("quality: invalid quality score {value} for offset {offset}")]
    InvalidScore {
        /// Raw Phred value
        value: u8,
        /// Offset in use
        offset: u8,
    },
    /// Stored character decodes outside 0..=93.
    #[error("quality: stored quality character {character:?} out of range for offset {offset}")]
    OutOfRange {
        /// Offending character
        character: char,
        /// Offset in use
        offset: u8,
    },
}

/// A read's qualities as stored ASCII.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QualityScore {
    ascii: Vec<u8>,
}

impl QualityScore {
    /// Wrap stored ASCII qualities.
    pub fn from_ascii(ascii: impl Into<Vec<u8>>) -> Self {
        Self {
            ascii: ascii.into(),
        }
    }

    /// Encode raw Phred values with the given offset.
    pub fn from_phred(values: &[u8], offset: QualOffset) -> Result<Self, QualityError> {
        let off = offset.value();
        let mut ascii = Vec::with_capacity(values.len());
        for &value in values {
            let encoded = u16::from(value) + u16::from(off);
            if encoded > 126 {
                return Err(QualityError::InvalidScore { value, offset: off });
            }
            ascii.push(encoded as u8);
        }
        Ok(Self { ascii })
    }

    /// Stored ASCII bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.ascii
    }

    /// Stored ASCII as text.
    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.ascii)
    }

    /// Number of bases.
    pub fn len(&self) -> usize {
        self.ascii.len()
    }

    /// True when no qualities are stored (FASTA input).
    pub fn is_empty(&self) -> bool {
        self.ascii.is_empty()
    }

    /// Decode into `dest`, which must hold at least `len()` values.
    pub fn write_phred(&self, dest: &mut [u8], offset: QualOffset) -> Result<usize, QualityError> {
        let off = offset.value();
        for (slot, &c) in dest.iter_mut().zip(self.ascii.iter()) {
            *slot = decode(c, off)?;
        }
        Ok(self.ascii.len().min(dest.len()))
    }

    /// Decode to raw Phred values.
    pub fn to_phred(&self, offset: QualOffset) -> Result<Vec<u8>, QualityError> {
        let off = offset.value();
        self.ascii.iter().map(|&c| decode(c, off)).collect()
    }
}

impl fmt::Display for QualityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

fn decode(c: u8, offset: u8) -> Result<u8, QualityError> {
    match c.checked_sub(offset) {
        Some(v) if v <= MAX_PHRED => Ok(v),
        _ => Err(QualityError::OutOfRange {
            character: c as char,
            offset,
        }),
    }
}

/// Start of the first run of `window_length` consecutive values below
/// `min_quality`, or `phred.len() + 1` when there is none.
pub fn find_low_quality_window(phred: &[u8], min_quality: u8, window_length: usize) -> usize {
    let n = phred.len();
    if window_length == 0 || window_length > n {
        return n + 1;
    }
    let mut run = 0usize;
    for (i, &q) in phred.iter().enumerate() {
        if q < min_quality {
            run += 1;
            if run >= window_length {
                return i + 1 - window_length;
            }
        } else {
            run = 0;
        }
    }
    n + 1
}
