use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::batch::SequenceBatch;
use crate::error::Location;
use crate::quality::QualOffset;

use super::FastxError;

/// Placeholder replaced by `R1` / `R2` for split paired-end output.
pub const ORIENTATION_TOKEN: &str = "{ORIENTATION}";

const WRITE_BUFFER_SIZE: usize = 1024 * 1024;

/// True when `path` contains [`ORIENTATION_TOKEN`].
pub fn has_orientation_placeholder(path: &str) -> bool {
    path.contains(ORIENTATION_TOKEN)
}

/// Replace the first [`ORIENTATION_TOKEN`] in `path` with `orientation`.
pub fn substitute_orientation(path: &str, orientation: &str) -> String {
    path.replacen(ORIENTATION_TOKEN, orientation, 1)
}

/// Output record syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastxFormat {
    /// `>id comment\nSEQ\n`
    Fasta,
    /// `@id comment\nSEQ\n+\nQUAL\n`
    Fastq,
}

/// Output compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCompression {
    /// Plain text
    #[default]
    None,
    /// gzip
    Gzip,
    /// Zstandard
    Zstd,
}

impl OutputCompression {
    /// Resolve an explicit name, or detect from the path extension.
    pub fn resolve(name: Option<&str>, path: &str) -> Result<Self, FastxError> {
        match name.map(str::to_ascii_lowercase).as_deref() {
            Some("gzip" | "gz") => Ok(OutputCompression::Gzip),
            Some("zstd" | "zst") => Ok(OutputCompression::Zstd),
            Some("none") => Ok(OutputCompression::None),
            Some(other) => Err(FastxError::Parameter(format!(
                "compression must be 'gzip', 'gz', 'zstd', 'zst' or 'none', got '{other}'"
            ))),
            None if path.ends_with(".gz") => Ok(OutputCompression::Gzip),
            None if path.ends_with(".zst") => Ok(OutputCompression::Zstd),
            None => Ok(OutputCompression::None),
        }
    }
}

/// Options of a FASTA / FASTQ copy.
#[derive(Debug, Clone, Default)]
pub struct FastxWriterOptions {
    /// Required for paired input; `false` splits mates into two files
    pub interleave: Option<bool>,
    /// Write the `sequence_index` value instead of the read id
    pub id_as_sequence_index: bool,
    /// Append the comment to the header line
    pub include_comment: bool,
    /// Explicit compression name; detected from the path when absent
    pub compression: Option<String>,
    /// Offset of written qualities (FASTQ only)
    pub qual_offset: QualOffset,
}

enum Output {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
    Zstd(zstd::Encoder<'static, BufWriter<File>>),
}

impl Output {
    fn create(path: &Path, compression: OutputCompression) -> Result<Self, FastxError> {
        let file = File::create(path).map_err(|source| FastxError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let buffered = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
        Ok(match compression {
            OutputCompression::None => Output::Plain(buffered),
            OutputCompression::Gzip => Output::Gzip(GzEncoder::new(buffered, Compression::default())),
            OutputCompression::Zstd => Output::Zstd(
                zstd::Encoder::new(buffered, zstd::DEFAULT_COMPRESSION_LEVEL).map_err(|source| {
                    FastxError::Write {
                        path: path.to_path_buf(),
                        source,
                    }
                })?,
            ),
        })
    }

    fn finish(self) -> io::Result<()> {
        let mut inner = match self {
            Output::Plain(w) => w,
            Output::Gzip(w) => w.finish()?,
            Output::Zstd(w) => w.finish()?,
        };
        inner.flush()
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Output::Plain(w) => w.write(buf),
            Output::Gzip(w) => w.write(buf),
            Output::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Output::Plain(w) => w.flush(),
            Output::Gzip(w) => w.flush(),
            Output::Zstd(w) => w.flush(),
        }
    }
}

struct Target {
    path: PathBuf,
    out: Output,
}

/// FASTA / FASTQ writer for [`SequenceBatch`]es.
pub struct FastxWriter {
    format: FastxFormat,
    options: FastxWriterOptions,
    is_paired: bool,
    primary: Target,
    mate: Option<Target>,
    records_written: u64,
}

impl FastxWriter {
    /// Validate options against the data shape and create the output file(s).
    pub fn create(
        path: &str,
        format: FastxFormat,
        is_paired: bool,
        has_sequence_index: bool,
        options: FastxWriterOptions,
    ) -> Result<Self, FastxError> {
        if is_paired && options.interleave.is_none() {
            return Err(FastxError::Parameter(
                "INTERLEAVE parameter required for paired-end data".into(),
            ));
        }
        let interleave = options.interleave.unwrap_or(false);
        let has_orientation = has_orientation_placeholder(path);
        if is_paired && !interleave && !has_orientation {
            return Err(FastxError::Parameter(format!(
                "Paired-end data with INTERLEAVE=false requires {ORIENTATION_TOKEN} in file path"
            )));
        }
        if !is_paired && has_orientation {
            return Err(FastxError::Parameter(format!(
                "Single-end data cannot use {ORIENTATION_TOKEN} in file path"
            )));
        }
        if options.id_as_sequence_index && !has_sequence_index {
            return Err(FastxError::Parameter(
                "ID_AS_SEQUENCE_INDEX=true requires 'sequence_index' column".into(),
            ));
        }
        let compression = OutputCompression::resolve(options.compression.as_deref(), path)?;

        let open = |p: String| -> Result<Target, FastxError> {
            let path = PathBuf::from(p);
            let out = Output::create(&path, compression)?;
            Ok(Target { path, out })
        };
        let (primary, mate) = if is_paired && !interleave {
            (
                open(substitute_orientation(path, "R1"))?,
                Some(open(substitute_orientation(path, "R2"))?),
            )
        } else {
            (open(path.to_string())?, None)
        };
        log::info!(
            "fastx: writing {:?} to {}{}",
            format,
            primary.path.display(),
            mate.as_ref()
                .map(|m| format!(" and {}", m.path.display()))
                .unwrap_or_default()
        );
        Ok(Self {
            format,
            options,
            is_paired,
            primary,
            mate,
            records_written: 0,
        })
    }

    /// Records written so far (a pair counts once).
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Write every record of `batch`.
    ///
    /// `source_offset` is the offset the batch's stored qualities use;
    /// `sequence_index` supplies ids when `id_as_sequence_index` is set.
    pub fn write_batch(
        &mut self,
        batch: &SequenceBatch,
        source_offset: QualOffset,
        sequence_index: Option<&[i64]>,
    ) -> Result<(), FastxError> {
        if batch.is_paired != self.is_paired {
            return Err(FastxError::Parameter(
                "batch pairing does not match the writer".into(),
            ));
        }
        let mut record = Vec::with_capacity(1024);
        for row in 0..batch.len() {
            let id: Cow<'_, str> = match (self.options.id_as_sequence_index, sequence_index) {
                (true, Some(index)) => Cow::Owned(index[row].to_string()),
                _ => Cow::Borrowed(&batch.read_ids[row]),
            };
            let comment = if self.options.include_comment {
                batch.comments[row].as_deref()
            } else {
                None
            };

            record.clear();
            self.format_record(
                &mut record,
                &id,
                comment,
                &batch.sequences1[row],
                batch.quals1[row].as_ref(),
                source_offset,
                row,
            )?;
            write_to(&mut self.primary, &record)?;

            if self.is_paired {
                record.clear();
                self.format_record(
                    &mut record,
                    &id,
                    comment,
                    &batch.sequences2[row],
                    batch.quals2[row].as_ref(),
                    source_offset,
                    row,
                )?;
                let target = self.mate.as_mut().unwrap_or(&mut self.primary);
                write_to(target, &record)?;
            }
            self.records_written += 1;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn format_record(
        &self,
        out: &mut Vec<u8>,
        id: &str,
        comment: Option<&str>,
        sequence: &str,
        qual: Option<&crate::quality::QualityScore>,
        source_offset: QualOffset,
        row: usize,
    ) -> Result<(), FastxError> {
        let marker = match self.format {
            FastxFormat::Fasta => b'>',
            FastxFormat::Fastq => b'@',
        };
        out.push(marker);
        out.extend_from_slice(id.as_bytes());
        if let Some(comment) = comment.filter(|c| !c.is_empty()) {
            out.push(b' ');
            out.extend_from_slice(comment.as_bytes());
        }
        out.push(b'\n');
        out.extend_from_slice(sequence.as_bytes());
        out.push(b'\n');

        if self.format == FastxFormat::Fastq {
            let location = Location::row(row as u64);
            let qual = qual.ok_or_else(|| FastxError::Malformed {
                reason: format!("record {id} has no qualities for FASTQ output"),
                location: location.clone(),
            })?;
            out.extend_from_slice(b"+\n");
            if source_offset == self.options.qual_offset {
                out.extend_from_slice(qual.as_bytes());
            } else {
                let target = self.options.qual_offset.value();
                let phred = qual
                    .to_phred(source_offset)
                    .map_err(|source| FastxError::Quality {
                        source,
                        location: location.clone(),
                    })?;
                out.extend(phred.iter().map(|q| q + target));
            }
            out.push(b'\n');
        }
        Ok(())
    }

    /// Flush and close all outputs; returns the record count.
    pub fn finish(self) -> Result<u64, FastxError> {
        for target in std::iter::once(self.primary).chain(self.mate) {
            let Target { path, out } = target;
            out.finish()
                .map_err(|source| FastxError::Write { path, source })?;
        }
        Ok(self.records_written)
    }
}

fn write_to(target: &mut Target, bytes: &[u8]) -> Result<(), FastxError> {
    target.out.write_all(bytes).map_err(|source| FastxError::Write {
        path: target.path.clone(),
        source,
    })
}
