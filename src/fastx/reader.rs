use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use needletail::errors::ParseErrorKind;
use needletail::{parse_fastx_reader, FastxReader};

use crate::batch::SequenceBatch;
use crate::error::Location;
use crate::quality::QualityScore;
use crate::table::is_stdin_path;

use super::{base_read_id, FastxError};

/// One parsed record detached from the parser's buffer.
#[derive(Debug, Clone)]
struct OwnedRecord {
    name: String,
    comment: Option<String>,
    sequence: String,
    qual: Option<QualityScore>,
}

impl OwnedRecord {
    fn is_fasta(&self) -> bool {
        self.qual.is_none()
    }
}

/// One input file plus its record counter.
struct Source {
    path: PathBuf,
    parser: Box<dyn FastxReader>,
    records: u64,
    pending: Option<OwnedRecord>,
}

impl Source {
    fn open(path: &Path) -> Result<Self, FastxError> {
        let parsed = if is_stdin_path(path) {
            parse_fastx_reader(io::stdin())
        } else {
            let file = File::open(path).map_err(|source| FastxError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            parse_fastx_reader(file)
        };
        let parser = parsed.map_err(|source| {
            if matches!(source.kind, ParseErrorKind::EmptyFile) {
                FastxError::Empty {
                    location: Location::file(path),
                }
            } else {
                FastxError::Parse {
                    source,
                    location: Location::record(path, 0),
                }
            }
        })?;
        let mut src = Self {
            path: path.to_path_buf(),
            parser,
            records: 0,
            pending: None,
        };
        // Buffer the first record to detect the format and empty inputs.
        match src.next_record()? {
            Some(first) => src.pending = Some(first),
            None => {
                return Err(FastxError::Empty {
                    location: Location::file(path),
                })
            }
        }
        Ok(src)
    }

    fn location(&self) -> Location {
        Location::record(&self.path, self.records)
    }

    fn next_record(&mut self) -> Result<Option<OwnedRecord>, FastxError> {
        if let Some(pending) = self.pending.take() {
            return Ok(Some(pending));
        }
        let record = match self.parser.next() {
            None => return Ok(None),
            Some(Err(source)) => {
                return Err(FastxError::Parse {
                    source,
                    location: self.location(),
                })
            }
            Some(Ok(record)) => record,
        };
        let header = String::from_utf8_lossy(record.id());
        let (name, comment) = match header.split_once(|c: char| c == ' ' || c == '\t') {
            Some((name, comment)) => (name.to_string(), Some(comment.to_string())),
            None => (header.to_string(), None),
        };
        let owned = OwnedRecord {
            name,
            comment,
            sequence: String::from_utf8_lossy(&record.seq()).into_owned(),
            qual: record.qual().map(QualityScore::from_ascii),
        };
        self.records += 1;
        Ok(Some(owned))
    }

    fn peek_is_fasta(&self) -> bool {
        self.pending.as_ref().is_some_and(OwnedRecord::is_fasta)
    }
}

/// FASTA / FASTQ reader over one file or a pair of mate files.
///
/// Records come back in file order. For paired input the mate ids must
/// agree once their `/1`, `/2` suffixes are removed.
pub struct SequenceReader {
    first: Source,
    second: Option<Source>,
    is_fasta: bool,
}

impl SequenceReader {
    /// Open `path1` and, for paired input, `path2`.
    pub fn open(path1: impl AsRef<Path>, path2: Option<&Path>) -> Result<Self, FastxError> {
        let first = Source::open(path1.as_ref())?;
        let is_fasta = first.peek_is_fasta();
        let second = match path2 {
            Some(p) if !p.as_os_str().is_empty() => {
                let second = Source::open(p)?;
                if second.peek_is_fasta() != is_fasta {
                    let name = |fasta: bool| if fasta { "FASTA" } else { "FASTQ" };
                    return Err(FastxError::Malformed {
                        reason: format!(
                            "Cannot mix FASTA and FASTQ formats: sequence1 is {}, sequence2 is {}",
                            name(is_fasta),
                            name(second.peek_is_fasta())
                        ),
                        location: Location::file(p),
                    });
                }
                Some(second)
            }
            _ => None,
        };
        log::debug!(
            "fastx: opened {} ({}, {})",
            first.path.display(),
            if is_fasta { "FASTA" } else { "FASTQ" },
            if second.is_some() { "paired" } else { "single-end" }
        );
        Ok(Self {
            first,
            second,
            is_fasta,
        })
    }

    /// Whether records carry two mates.
    pub fn is_paired(&self) -> bool {
        self.second.is_some()
    }

    /// Whether the input is FASTA (no qualities).
    pub fn is_fasta(&self) -> bool {
        self.is_fasta
    }

    /// Return up to `n` records; an empty batch means end of input.
    pub fn read(&mut self, n: usize) -> Result<SequenceBatch, FastxError> {
        match self.second.as_mut() {
            None => Self::read_single(&mut self.first, n),
            Some(second) => Self::read_paired(&mut self.first, second, n),
        }
    }

    fn read_single(first: &mut Source, n: usize) -> Result<SequenceBatch, FastxError> {
        let mut batch = SequenceBatch::unpaired();
        while batch.len() < n {
            let Some(rec) = first.next_record()? else {
                break;
            };
            batch.push(
                base_read_id(&rec.name).to_string(),
                rec.comment,
                rec.sequence,
                rec.qual,
            );
        }
        Ok(batch)
    }

    fn read_paired(
        first: &mut Source,
        second: &mut Source,
        n: usize,
    ) -> Result<SequenceBatch, FastxError> {
        let mut batch = SequenceBatch::paired();
        while batch.len() < n {
            let (rec1, rec2) = match (first.next_record()?, second.next_record()?) {
                (None, None) => break,
                (Some(rec1), Some(rec2)) => (rec1, rec2),
                (Some(rec), None) => {
                    return Err(FastxError::Malformed {
                        reason: format!("Mismatched number of records: missing mate for {}", rec.name),
                        location: second.location(),
                    })
                }
                (None, Some(rec)) => {
                    return Err(FastxError::Malformed {
                        reason: format!("Mismatched number of records: missing mate for {}", rec.name),
                        location: first.location(),
                    })
                }
            };
            let id1 = base_read_id(&rec1.name);
            if id1 != base_read_id(&rec2.name) {
                return Err(FastxError::Malformed {
                    reason: format!("Mismatched read IDs: {} vs {}", rec1.name, rec2.name),
                    location: first.location(),
                });
            }
            batch.push_pair(
                id1.to_string(),
                rec1.comment,
                (rec1.sequence, rec1.qual),
                (rec2.sequence, rec2.qual),
            );
        }
        Ok(batch)
    }
}
