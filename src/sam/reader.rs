use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use noodles::bam;
use noodles::sam;
use noodles::sam::alignment::RecordBuf;

use crate::batch::AlignmentBatch;
use crate::error::Location;
use crate::table::is_stdin_path;

use super::convert::record_from_buf;
use super::references::synthesize_header;
use super::AlignmentReadError;

type Source = Box<dyn BufRead + Send>;

const BGZF_MAGIC: [u8; 2] = [0x1f, 0x8b];
const CRAM_MAGIC: &[u8; 4] = b"CRAM";

/// Container detected from the leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentFormat {
    /// Plain text SAM
    Sam,
    /// BGZF-compressed BAM
    Bam,
}

enum Decoder {
    Sam(sam::io::Reader<Source>),
    Bam(bam::io::Reader<MultiGzDecoder<Source>>),
}

impl Decoder {
    fn read_header(&mut self) -> io::Result<sam::Header> {
        match self {
            Decoder::Sam(r) => r.read_header(),
            Decoder::Bam(r) => r.read_header(),
        }
    }

    fn read_record(&mut self, header: &sam::Header, record: &mut RecordBuf) -> io::Result<usize> {
        match self {
            Decoder::Sam(r) => r.read_record_buf(header, record),
            Decoder::Bam(r) => r.read_record_buf(header, record),
        }
    }
}

fn sniff(source: &mut Source, path: &Path) -> Result<AlignmentFormat, AlignmentReadError> {
    let head = source.fill_buf().map_err(|e| AlignmentReadError::Decode {
        source: e,
        location: Location::byte(path, 0),
    })?;
    if head.starts_with(&BGZF_MAGIC) {
        Ok(AlignmentFormat::Bam)
    } else if head.starts_with(CRAM_MAGIC) {
        Err(AlignmentReadError::UnsupportedFormat {
            format: "CRAM",
            location: Location::file(path),
        })
    } else {
        Ok(AlignmentFormat::Sam)
    }
}

/// Batched SAM / BAM reader.
///
/// The header must name at least one reference, either in the file itself
/// or through [`AlignmentReader::with_references`] for headerless SAM.
pub struct AlignmentReader {
    path: PathBuf,
    format: AlignmentFormat,
    decoder: Decoder,
    header: sam::Header,
    include_seq_qual: bool,
    records: u64,
    record: RecordBuf,
    done: bool,
}

impl AlignmentReader {
    /// Open a SAM or BAM file (or stdin) whose header lists the references.
    pub fn open(path: impl AsRef<Path>, include_seq_qual: bool) -> Result<Self, AlignmentReadError> {
        let path = path.as_ref();
        Self::from_source(open_source(path)?, path, None, include_seq_qual)
    }

    /// Open a file whose references come from `references` instead of its
    /// header. The table replaces any `@SQ` lines the file carries.
    pub fn with_references(
        path: impl AsRef<Path>,
        references: &[(String, u64)],
        include_seq_qual: bool,
    ) -> Result<Self, AlignmentReadError> {
        let path = path.as_ref();
        let header = synthesize_header(references)?;
        Self::from_source(open_source(path)?, path, Some(header), include_seq_qual)
    }

    /// Read from an arbitrary byte stream, such as a subprocess pipe.
    /// `name` is only used in error locations.
    pub fn from_stream<R>(
        reader: R,
        name: impl AsRef<Path>,
        include_seq_qual: bool,
    ) -> Result<Self, AlignmentReadError>
    where
        R: BufRead + Send + 'static,
    {
        Self::from_source(Box::new(reader), name.as_ref(), None, include_seq_qual)
    }

    fn from_source(
        mut source: Source,
        path: &Path,
        override_header: Option<sam::Header>,
        include_seq_qual: bool,
    ) -> Result<Self, AlignmentReadError> {
        let format = sniff(&mut source, path)?;
        let mut decoder = match format {
            AlignmentFormat::Sam => Decoder::Sam(sam::io::Reader::new(source)),
            AlignmentFormat::Bam => Decoder::Bam(bam::io::Reader::from(MultiGzDecoder::new(source))),
        };
        let file_header = decoder
            .read_header()
            .map_err(|e| AlignmentReadError::Decode {
                source: e,
                location: Location::record(path, 0),
            })?;
        let header = match override_header {
            Some(header) => {
                if !file_header.reference_sequences().is_empty() {
                    log::debug!(
                        "sam: {} carries its own references; using the supplied table",
                        path.display()
                    );
                }
                header
            }
            None => file_header,
        };
        if header.reference_sequences().is_empty() {
            return Err(AlignmentReadError::Malformed {
                reason: "header declares no reference sequences; supply reference lengths"
                    .to_string(),
                location: Location::file(path),
            });
        }
        log::debug!(
            "sam: opened {} ({:?}, {} references)",
            path.display(),
            format,
            header.reference_sequences().len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            format,
            decoder,
            header,
            include_seq_qual,
            records: 0,
            record: RecordBuf::default(),
            done: false,
        })
    }

    /// Detected container.
    pub fn format(&self) -> AlignmentFormat {
        self.format
    }

    /// Header in effect, file-provided or synthesised.
    pub fn header(&self) -> &sam::Header {
        &self.header
    }

    /// Names of the references, in id order.
    pub fn reference_names(&self) -> Vec<String> {
        self.header
            .reference_sequences()
            .keys()
            .map(|name| name.to_string())
            .collect()
    }

    /// Whether rows carry the `sequence` and `qual` columns.
    pub fn include_seq_qual(&self) -> bool {
        self.include_seq_qual
    }

    /// Return up to `n` rows; an empty batch means end of input.
    pub fn read(&mut self, n: usize) -> Result<AlignmentBatch, AlignmentReadError> {
        let mut batch = AlignmentBatch::new();
        while !self.done && batch.len() < n {
            let read = self
                .decoder
                .read_record(&self.header, &mut self.record)
                .map_err(|e| AlignmentReadError::Decode {
                    source: e,
                    location: Location::record(&self.path, self.records),
                })?;
            if read == 0 {
                self.done = true;
                break;
            }
            let row = record_from_buf(&self.record, &self.header, self.include_seq_qual)
                .map_err(|source| AlignmentReadError::Quality {
                    source,
                    location: Location::record(&self.path, self.records),
                })?;
            self.records += 1;
            batch.push(row);
        }
        Ok(batch)
    }
}

fn open_source(path: &Path) -> Result<Source, AlignmentReadError> {
    if is_stdin_path(path) {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path).map_err(|source| AlignmentReadError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Box::new(BufReader::new(file)))
}
