//! 454 Standard Flowgram Format (SFF) reader.
//!
//! SFF is big-endian throughout. Layout:
//!
//! ```text
//! file header   31 fixed bytes + flow_chars + key_sequence, padded to 8
//! read header   16 fixed bytes + name, padded to 8
//! read data     flowgram (2 * flows) + flow_index + bases + quals, padded to 8
//! index block   optional, at index_offset, skipped when reached
//! ```
//!
//! Flowgram values and flow indices are skipped; only names, bases and
//! qualities are returned.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder};

use crate::batch::SequenceBatch;
use crate::error::{open_kind, ErrorKind, Location};
use crate::quality::{QualOffset, QualityScore};
use crate::table::is_stdin_path;

/// Magic number, ".sff" as a big-endian u32.
pub const SFF_MAGIC: u32 = 0x2E73_6666;
/// Only supported version.
pub const SFF_VERSION: [u8; 4] = [0, 0, 0, 1];
/// Only supported flowgram format code.
pub const SFF_FLOWGRAM_FORMAT: u8 = 1;
/// Upper bound on a read's `seq_len`.
pub const SFF_MAX_SEQ_LEN: u32 = 10 * 1024 * 1024;

const HEADER_FIXED_SIZE: usize = 31;
const READ_HEADER_FIXED_SIZE: usize = 16;
const FLOWGRAM_VALUE_SIZE: u64 = 2;
const PER_BASE_FIELDS: u64 = 3;

/// Errors raised by [`SffReader`].
#[derive(Debug, thiserror::Error)]
pub enum SffError {
    /// The file could not be opened.
    #[error("sff: cannot open file: {source} at {}", path.display())]
    Open {
        /// Path given to the reader
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The file ended inside a structure.
    #[error("sff: file truncated reading {what} at {location}")]
    Truncated {
        /// Structure being read
        what: &'static str,
        /// Start of that structure
        location: Location,
    },

    /// Wrong magic number.
    #[error("sff: invalid magic number (expected 0x2E736666, got 0x{found:08X}) at {location}")]
    BadMagic {
        /// Value found
        found: u32,
        /// Start of file
        location: Location,
    },

    /// Version other than 0.0.0.1.
    #[error("sff: unsupported version {}.{}.{}.{} (expected 0.0.0.1) at {location}", version[0], version[1], version[2], version[3])]
    UnsupportedVersion {
        /// Version bytes found
        version: [u8; 4],
        /// Start of file
        location: Location,
    },

    /// Flowgram format code other than 1.
    #[error("sff: unsupported flowgram format code {code} (expected 1) at {location}")]
    UnsupportedFlowgramFormat {
        /// Code found
        code: u8,
        /// Start of file
        location: Location,
    },

    /// A read header carries impossible values.
    #[error("sff: {reason} at {location}")]
    Invalid {
        /// What was wrong
        reason: String,
        /// Start of the read header
        location: Location,
    },

    /// Any other I/O failure.
    #[error("sff: I/O error: {source} at {location}")]
    Io {
        /// Underlying error
        #[source]
        source: io::Error,
        /// Position of the failing operation
        location: Location,
    },
}

impl SffError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SffError::Open { source, .. } => open_kind(source),
            SffError::UnsupportedVersion { .. } | SffError::UnsupportedFlowgramFormat { .. } => {
                ErrorKind::UnsupportedVersion
            }
            SffError::Truncated { .. }
            | SffError::BadMagic { .. }
            | SffError::Invalid { .. }
            | SffError::Io { .. } => ErrorKind::MalformedInput,
        }
    }
}

/// Values of the file header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SffHeader {
    /// Offset of the index block, 0 when absent
    pub index_offset: u64,
    /// Unpadded index length
    pub index_length: u32,
    /// Reads in the file
    pub number_of_reads: u32,
    /// Declared header length including padding
    pub header_length: u16,
    /// Flows per read
    pub number_of_flows: u16,
    /// Nucleotide flowed at each flow
    pub flow_chars: String,
    /// Key sequence
    pub key_sequence: String,
}

/// Fixed part of one read header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ReadHeader {
    header_length: u16,
    name_length: u16,
    seq_len: u32,
    clip_qual_left: u16,
    clip_qual_right: u16,
    clip_adapter_left: u16,
    clip_adapter_right: u16,
}

impl ReadHeader {
    fn parse(buf: &[u8; READ_HEADER_FIXED_SIZE]) -> Self {
        Self {
            header_length: BigEndian::read_u16(&buf[0..2]),
            name_length: BigEndian::read_u16(&buf[2..4]),
            seq_len: BigEndian::read_u32(&buf[4..8]),
            clip_qual_left: BigEndian::read_u16(&buf[8..10]),
            clip_qual_right: BigEndian::read_u16(&buf[10..12]),
            clip_adapter_left: BigEndian::read_u16(&buf[12..14]),
            clip_adapter_right: BigEndian::read_u16(&buf[14..16]),
        }
    }

    /// Half-open 0-based range kept by trimming; empty when clips overlap.
    ///
    /// A clip of 0 means "no clip". Left clips are 1-based, right clips are
    /// 1-based inclusive.
    fn trim_range(&self) -> (usize, usize) {
        let seq_len = self.seq_len as usize;
        let left = usize::from(self.clip_qual_left.max(1)).max(usize::from(self.clip_adapter_left.max(1))) - 1;
        let right_or_end = |clip: u16| if clip == 0 { seq_len } else { usize::from(clip) };
        let right = right_or_end(self.clip_qual_right).min(right_or_end(self.clip_adapter_right));
        if left >= right {
            (0, 0)
        } else {
            (left, right)
        }
    }
}

fn pad_to_8(len: u64) -> u64 {
    len.div_ceil(8) * 8
}

/// Streaming SFF reader returning unpaired [`SequenceBatch`]es.
pub struct SffReader<R: Read = Box<dyn Read + Send>> {
    path: PathBuf,
    inner: R,
    trim: bool,
    header: SffHeader,
    reads_parsed: u32,
    index_skipped: bool,
    /// Bytes consumed from `inner`.
    offset: u64,
}

impl SffReader {
    /// Open an SFF file, or stdin for `-`; `trim` applies the clip coordinates.
    pub fn open(path: impl AsRef<Path>, trim: bool) -> Result<Self, SffError> {
        let path = path.as_ref();
        let inner: Box<dyn Read + Send> = if is_stdin_path(path) {
            Box::new(BufReader::new(io::stdin()))
        } else {
            let file = File::open(path).map_err(|source| SffError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            Box::new(BufReader::new(file))
        };
        Self::new(inner, path, trim)
    }
}

impl<R: Read> SffReader<R> {
    /// Parse the file header from `inner`; `name` is used in error locations.
    pub fn new(mut inner: R, name: impl AsRef<Path>, trim: bool) -> Result<Self, SffError> {
        let path = name.as_ref().to_path_buf();
        let at_start = Location::byte(&path, 0);

        let mut fixed = [0u8; HEADER_FIXED_SIZE];
        read_exact_or(&mut inner, &mut fixed, "file header", &at_start)?;

        let magic = BigEndian::read_u32(&fixed[0..4]);
        if magic != SFF_MAGIC {
            return Err(SffError::BadMagic {
                found: magic,
                location: at_start,
            });
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&fixed[4..8]);
        if version != SFF_VERSION {
            return Err(SffError::UnsupportedVersion {
                version,
                location: at_start,
            });
        }

        let mut header = SffHeader {
            index_offset: BigEndian::read_u64(&fixed[8..16]),
            index_length: BigEndian::read_u32(&fixed[16..20]),
            number_of_reads: BigEndian::read_u32(&fixed[20..24]),
            header_length: BigEndian::read_u16(&fixed[24..26]),
            number_of_flows: BigEndian::read_u16(&fixed[28..30]),
            ..SffHeader::default()
        };
        let key_length = BigEndian::read_u16(&fixed[26..28]);
        let format = fixed[30];
        if format != SFF_FLOWGRAM_FORMAT {
            return Err(SffError::UnsupportedFlowgramFormat {
                code: format,
                location: at_start,
            });
        }

        let mut flow_chars = vec![0u8; usize::from(header.number_of_flows)];
        read_exact_or(&mut inner, &mut flow_chars, "flow_chars", &at_start)?;
        let mut key = vec![0u8; usize::from(key_length)];
        read_exact_or(&mut inner, &mut key, "key_sequence", &at_start)?;
        let flow_chars_len = flow_chars.len();
        header.flow_chars = String::from_utf8_lossy(&flow_chars).into_owned();
        header.key_sequence = String::from_utf8_lossy(&key).into_owned();

        let mut reader = Self {
            path,
            inner,
            trim,
            header,
            reads_parsed: 0,
            index_skipped: false,
            offset: (HEADER_FIXED_SIZE + flow_chars_len + usize::from(key_length)) as u64,
        };
        let header_length = u64::from(reader.header.header_length);
        reader.skip_to(header_length, &Location::byte(&reader.path, 0))?;
        log::debug!(
            "sff: {} declares {} reads with {} flows",
            reader.path.display(),
            reader.header.number_of_reads,
            reader.header.number_of_flows
        );
        Ok(reader)
    }

    /// File header values.
    pub fn header(&self) -> &SffHeader {
        &self.header
    }

    /// Return up to `n` reads; an empty batch means end of file.
    pub fn read(&mut self, n: usize) -> Result<SequenceBatch, SffError> {
        let mut batch = SequenceBatch::unpaired();
        let remaining = (self.header.number_of_reads - self.reads_parsed) as usize;
        let to_read = n.min(remaining);
        for _ in 0..to_read {
            self.skip_index_if_needed()?;
            let (name, bases, quals) = self.read_one()?;
            batch.push(name, None, bases, Some(quals));
            self.reads_parsed += 1;
        }
        Ok(batch)
    }

    fn read_one(&mut self) -> Result<(String, String, QualityScore), SffError> {
        let start = self.offset;
        let at_header = Location::byte(&self.path, start);

        let mut fixed = [0u8; READ_HEADER_FIXED_SIZE];
        self.read_exact(&mut fixed, "read header", &at_header)?;
        let rh = ReadHeader::parse(&fixed);
        self.validate(&rh, &at_header)?;

        let mut name = vec![0u8; usize::from(rh.name_length)];
        self.read_exact(&mut name, "read name", &at_header)?;

        let data_start = start + u64::from(rh.header_length);
        self.skip_to(data_start, &at_header)?;

        let at_data = Location::byte(&self.path, data_start);
        let flowgram_len = u64::from(self.header.number_of_flows) * FLOWGRAM_VALUE_SIZE;
        let seq_len = u64::from(rh.seq_len);
        self.skip_to(data_start + flowgram_len + seq_len, &at_data)?;

        let mut bases = vec![0u8; rh.seq_len as usize];
        self.read_exact(&mut bases, "sequence data", &at_data)?;
        let mut quals = vec![0u8; rh.seq_len as usize];
        self.read_exact(&mut quals, "quality data", &at_data)?;

        let padded_end = data_start + pad_to_8(flowgram_len + seq_len * PER_BASE_FIELDS);
        self.skip_to(padded_end, &at_data)?;

        if self.trim {
            let (left, right) = rh.trim_range();
            bases.truncate(right);
            bases.drain(..left);
            quals.truncate(right);
            quals.drain(..left);
        }

        let quals = QualityScore::from_phred(&quals, QualOffset::Phred33).map_err(|e| {
            SffError::Invalid {
                reason: e.to_string(),
                location: at_data.clone(),
            }
        })?;
        Ok((
            String::from_utf8_lossy(&name).into_owned(),
            String::from_utf8_lossy(&bases).into_owned(),
            quals,
        ))
    }

    fn validate(&self, rh: &ReadHeader, location: &Location) -> Result<(), SffError> {
        let minimum = READ_HEADER_FIXED_SIZE + usize::from(rh.name_length);
        if usize::from(rh.header_length) < minimum {
            return Err(SffError::Invalid {
                reason: format!(
                    "read header_length={} is shorter than 16 + name_length={}",
                    rh.header_length, rh.name_length
                ),
                location: location.clone(),
            });
        }
        if rh.seq_len > SFF_MAX_SEQ_LEN {
            return Err(SffError::Invalid {
                reason: format!(
                    "seq_len={} exceeds maximum ({SFF_MAX_SEQ_LEN}), file is likely corrupted",
                    rh.seq_len
                ),
                location: location.clone(),
            });
        }
        let clips = [
            ("clip_qual_left", rh.clip_qual_left),
            ("clip_qual_right", rh.clip_qual_right),
            ("clip_adapter_left", rh.clip_adapter_left),
            ("clip_adapter_right", rh.clip_adapter_right),
        ];
        for (field, value) in clips {
            if u32::from(value) > rh.seq_len {
                return Err(SffError::Invalid {
                    reason: format!("{field}={value} > seq_len={}", rh.seq_len),
                    location: location.clone(),
                });
            }
        }
        Ok(())
    }

    fn skip_index_if_needed(&mut self) -> Result<(), SffError> {
        if self.header.index_offset == 0 || self.index_skipped {
            return Ok(());
        }
        if self.offset >= self.header.index_offset {
            let padded = if self.header.index_length > 0 {
                pad_to_8(u64::from(self.header.index_length))
            } else {
                0
            };
            let at_index = Location::byte(&self.path, self.header.index_offset);
            self.skip_to(self.header.index_offset + padded, &at_index)?;
            self.index_skipped = true;
        }
        Ok(())
    }

    fn read_exact(
        &mut self,
        buf: &mut [u8],
        what: &'static str,
        location: &Location,
    ) -> Result<(), SffError> {
        read_exact_or(&mut self.inner, buf, what, location)?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    /// Advance to `target`, discarding the bytes in between.
    ///
    /// Reads stay sequential so a buffered source keeps its buffer.
    fn skip_to(&mut self, target: u64, location: &Location) -> Result<(), SffError> {
        if target < self.offset {
            return Err(SffError::Invalid {
                reason: format!(
                    "structure ends at byte {} but the next one starts at byte {target}",
                    self.offset
                ),
                location: location.clone(),
            });
        }
        let gap = target - self.offset;
        let skipped = io::copy(&mut (&mut self.inner).take(gap), &mut io::sink()).map_err(
            |source| SffError::Io {
                source,
                location: location.clone(),
            },
        )?;
        self.offset += skipped;
        if skipped < gap {
            return Err(SffError::Truncated {
                what: "padding",
                location: location.clone(),
            });
        }
        Ok(())
    }
}

fn read_exact_or<R: Read>(
    inner: &mut R,
    buf: &mut [u8],
    what: &'static str,
    location: &Location,
) -> Result<(), SffError> {
    inner.read_exact(buf).map_err(|source| {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            SffError::Truncated {
                what,
                location: location.clone(),
            }
        } else {
            SffError::Io {
                source,
                location: location.clone(),
            }
        }
    })
}

/// Builders for SFF fixtures, shared with integration tests.
#[doc(hidden)]
pub mod fixture {
    use byteorder::{BigEndian, WriteBytesExt};

    /// One read to encode.
    #[derive(Debug, Clone, Default)]
    pub struct FixtureRead {
        /// Read name
        pub name: String,
        /// Bases
        pub bases: String,
        /// Raw Phred values, one per base
        pub quals: Vec<u8>,
        /// `(qual_left, qual_right, adapter_left, adapter_right)`
        pub clips: (u16, u16, u16, u16),
    }

    fn pad(buf: &mut Vec<u8>) {
        while buf.len() % 8 != 0 {
            buf.push(0);
        }
    }

    /// Encode a complete SFF v1 file with `flows` flows and no index.
    pub fn encode(reads: &[FixtureRead], flows: u16) -> Vec<u8> {
        let key = b"TCAG";
        let header_length = (super::HEADER_FIXED_SIZE + usize::from(flows) + key.len()).div_ceil(8) * 8;
        let mut out = Vec::new();
        out.write_u32::<BigEndian>(super::SFF_MAGIC).ok();
        out.extend_from_slice(&super::SFF_VERSION);
        out.write_u64::<BigEndian>(0).ok();
        out.write_u32::<BigEndian>(0).ok();
        out.write_u32::<BigEndian>(reads.len() as u32).ok();
        out.write_u16::<BigEndian>(header_length as u16).ok();
        out.write_u16::<BigEndian>(key.len() as u16).ok();
        out.write_u16::<BigEndian>(flows).ok();
        out.push(super::SFF_FLOWGRAM_FORMAT);
        out.extend((0..flows).map(|i| b"TACG"[usize::from(i) % 4]));
        out.extend_from_slice(key);
        pad(&mut out);

        for read in reads {
            let read_header_length = (super::READ_HEADER_FIXED_SIZE + read.name.len()).div_ceil(8) * 8;
            out.write_u16::<BigEndian>(read_header_length as u16).ok();
            out.write_u16::<BigEndian>(read.name.len() as u16).ok();
            out.write_u32::<BigEndian>(read.bases.len() as u32).ok();
            out.write_u16::<BigEndian>(read.clips.0).ok();
            out.write_u16::<BigEndian>(read.clips.1).ok();
            out.write_u16::<BigEndian>(read.clips.2).ok();
            out.write_u16::<BigEndian>(read.clips.3).ok();
            out.extend_from_slice(read.name.as_bytes());
            pad(&mut out);

            for _ in 0..flows {
                out.write_u16::<BigEndian>(100).ok();
            }
            out.extend((0..read.bases.len()).map(|_| 1u8));
            out.extend_from_slice(read.bases.as_bytes());
            out.extend_from_slice(&read.quals);
            pad(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::{encode, FixtureRead};
    use super::*;
    use std::io::Cursor;

    fn twenty_base_read(clips: (u16, u16, u16, u16)) -> FixtureRead {
        FixtureRead {
            name: "read1".into(),
            bases: "ACGTACGTACGTACGTACGT".into(),
            quals: (0..20).collect(),
            clips,
        }
    }

    fn open(bytes: Vec<u8>, trim: bool) -> SffReader<Cursor<Vec<u8>>> {
        SffReader::new(Cursor::new(bytes), "test.sff", trim).unwrap()
    }

    #[test]
    fn test_reads_untrimmed() {
        let bytes = encode(&[twenty_base_read((3, 15, 0, 0))], 8);
        let mut reader = open(bytes, false);
        assert_eq!(reader.header().number_of_reads, 1);
        assert_eq!(reader.header().key_sequence, "TCAG");
        let batch = reader.read(10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.read_ids[0], "read1");
        assert_eq!(batch.sequences1[0].len(), 20);
        assert!(reader.read(10).unwrap().is_empty());
    }

    #[test]
    fn test_trim_uses_clip_coordinates() {
        let bytes = encode(&[twenty_base_read((3, 15, 0, 0))], 8);
        let batch = open(bytes, true).read(1).unwrap();
        assert_eq!(batch.sequences1[0], "GTACGTACGTACG");
        let quals = batch.quals1[0].as_ref().unwrap();
        assert_eq!(quals.to_phred(QualOffset::Phred33).unwrap(), (2..15).collect::<Vec<u8>>());
    }

    #[test]
    fn test_trim_takes_tighter_clip() {
        let bytes = encode(&[twenty_base_read((3, 15, 5, 10))], 4);
        let batch = open(bytes, true).read(1).unwrap();
        assert_eq!(batch.sequences1[0], "ACGTAC");
    }

    #[test]
    fn test_zero_clips_keep_everything() {
        let bytes = encode(&[twenty_base_read((0, 0, 0, 0))], 4);
        let batch = open(bytes, true).read(1).unwrap();
        assert_eq!(batch.sequences1[0], "ACGTACGTACGTACGTACGT");
    }

    #[test]
    fn test_overlapping_clips_give_empty_read() {
        let bytes = encode(&[twenty_base_read((12, 0, 0, 5))], 4);
        let batch = open(bytes, true).read(1).unwrap();
        assert_eq!(batch.sequences1[0], "");
        assert!(batch.quals1[0].as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_batches_split_reads() {
        let reads: Vec<FixtureRead> = (0..5)
            .map(|i| FixtureRead {
                name: format!("r{i}"),
                bases: "ACGTA".repeat(i + 1),
                quals: vec![30; 5 * (i + 1)],
                clips: (0, 0, 0, 0),
            })
            .collect();
        let mut reader = open(encode(&reads, 12), false);
        assert_eq!(reader.read(2).unwrap().read_ids, vec!["r0", "r1"]);
        assert_eq!(reader.read(2).unwrap().read_ids, vec!["r2", "r3"]);
        let last = reader.read(2).unwrap();
        assert_eq!(last.read_ids, vec!["r4"]);
        assert_eq!(last.sequences1[0].len(), 25);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = encode(&[], 4);
        bytes[0] = b'X';
        let err = SffReader::new(Cursor::new(bytes), "bad.sff", false).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut bytes = encode(&[], 4);
        bytes[7] = 2;
        let err = SffReader::new(Cursor::new(bytes), "v2.sff", false).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedVersion);
    }

    #[test]
    fn test_truncated_read_is_malformed() {
        let mut bytes = encode(&[twenty_base_read((0, 0, 0, 0))], 4);
        bytes.truncate(bytes.len() - 16);
        let err = open(bytes, false).read(1).unwrap_err();
        assert!(matches!(err, SffError::Truncated { .. }), "{err}");
    }

    #[test]
    fn test_clip_beyond_seq_len_is_rejected() {
        let bytes = encode(&[twenty_base_read((0, 21, 0, 0))], 4);
        let err = open(bytes, true).read(1).unwrap_err();
        assert!(err.to_string().contains("clip_qual_right=21"), "{err}");
    }

    #[test]
    fn test_short_read_header_length_is_rejected() {
        let mut bytes = encode(&[twenty_base_read((0, 0, 0, 0))], 4);
        // File header is 31 + 4 flows + 4 key bytes, padded to 40.
        assert_eq!(BigEndian::read_u16(&bytes[40..42]), 24);
        BigEndian::write_u16(&mut bytes[40..42], 16);
        let err = open(bytes, false).read(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
        assert!(err.to_string().contains("header_length=16"), "{err}");
    }

    #[test]
    fn test_reads_after_an_index_block() {
        let reads = [twenty_base_read((0, 0, 0, 0)), twenty_base_read((0, 0, 0, 0))];
        let plain = encode(&reads, 4);
        let first_read_len = (plain.len() - 40) / 2;
        let index_offset = 40 + first_read_len;

        let mut bytes = plain[..index_offset].to_vec();
        bytes.extend_from_slice(&[0xAB; 5]);
        bytes.extend_from_slice(&[0; 3]);
        bytes.extend_from_slice(&plain[index_offset..]);
        BigEndian::write_u64(&mut bytes[8..16], index_offset as u64);
        BigEndian::write_u32(&mut bytes[16..20], 5);

        let batch = open(bytes, false).read(5).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.sequences1[1], "ACGTACGTACGTACGTACGT");
    }

    #[test]
    fn test_open_missing_file() {
        let err = SffReader::open("/nonexistent/reads.sff", false).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }
}
