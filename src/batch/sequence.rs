//! Sequence rows read from FASTA/FASTQ and SFF.

use crate::quality::{QualOffset, QualityScore};
use crate::sink::{write_opt_str, ColumnSpec, ColumnType, ColumnarSink, OutputSchema, SinkError};

/// Column positions of a sequence batch in the sink.
pub mod columns {
    /// read_id
    pub const READ_ID: usize = 0;
    /// comment
    pub const COMMENT: usize = 1;
    /// sequence1
    pub const SEQUENCE1: usize = 2;
    /// sequence2
    pub const SEQUENCE2: usize = 3;
    /// qual1
    pub const QUAL1: usize = 4;
    /// qual2
    pub const QUAL2: usize = 5;
    /// filepath, when requested
    pub const FILEPATH: usize = 6;
}

/// A batch of sequence records, all paired or all unpaired.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequenceBatch {
    /// Read identifiers with any mate suffix removed
    pub read_ids: Vec<String>,
    /// Header text after the first space
    pub comments: Vec<Option<String>>,
    /// First (or only) mate
    pub sequences1: Vec<String>,
    /// Second mate; empty when unpaired
    pub sequences2: Vec<String>,
    /// First-mate qualities; `None` for FASTA
    pub quals1: Vec<Option<QualityScore>>,
    /// Second-mate qualities; empty when unpaired
    pub quals2: Vec<Option<QualityScore>>,
    /// Whether the records carry two mates
    pub is_paired: bool,
}

impl SequenceBatch {
    /// Empty unpaired batch.
    pub fn unpaired() -> Self {
        Self::default()
    }

    /// Empty paired batch.
    pub fn paired() -> Self {
        Self {
            is_paired: true,
            ..Self::default()
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.read_ids.len()
    }

    /// True when the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.read_ids.is_empty()
    }

    /// Append a single-mate record.
    pub fn push(
        &mut self,
        read_id: String,
        comment: Option<String>,
        sequence: String,
        qual: Option<QualityScore>,
    ) {
        debug_assert!(!self.is_paired);
        self.read_ids.push(read_id);
        self.comments.push(comment.filter(|c| !c.is_empty()));
        self.sequences1.push(sequence);
        self.quals1.push(qual);
    }

    /// Append a two-mate record.
    pub fn push_pair(
        &mut self,
        read_id: String,
        comment: Option<String>,
        mate1: (String, Option<QualityScore>),
        mate2: (String, Option<QualityScore>),
    ) {
        debug_assert!(self.is_paired);
        self.read_ids.push(read_id);
        self.comments.push(comment.filter(|c| !c.is_empty()));
        self.sequences1.push(mate1.0);
        self.quals1.push(mate1.1);
        self.sequences2.push(mate2.0);
        self.quals2.push(mate2.1);
    }

    /// True when any record of the batch lacks first-mate qualities.
    pub fn lacks_qualities(&self) -> bool {
        self.quals1.iter().any(Option::is_none)
    }

    /// Output schema of a sequence table.
    pub fn schema(include_filepath: bool) -> OutputSchema {
        let mut schema = OutputSchema::new(vec![
            ColumnSpec::required("read_id", ColumnType::Utf8),
            ColumnSpec::nullable("comment", ColumnType::Utf8),
            ColumnSpec::required("sequence1", ColumnType::Utf8),
            ColumnSpec::nullable("sequence2", ColumnType::Utf8),
            ColumnSpec::nullable("qual1", ColumnType::ListUInt8),
            ColumnSpec::nullable("qual2", ColumnType::ListUInt8),
        ]);
        if include_filepath {
            schema.push(ColumnSpec::required("filepath", ColumnType::Utf8));
        }
        schema
    }

    /// Write every record into `sink` and close the batch.
    pub fn emit(
        &self,
        sink: &mut dyn ColumnarSink,
        offset: QualOffset,
        filepath: Option<&str>,
    ) -> Result<(), SinkError> {
        let mut phred = Vec::new();
        for row in 0..self.len() {
            sink.write_str(columns::READ_ID, row, &self.read_ids[row])?;
            write_opt_str(sink, columns::COMMENT, row, self.comments[row].as_deref())?;
            sink.write_str(columns::SEQUENCE1, row, &self.sequences1[row])?;
            if self.is_paired {
                sink.write_str(columns::SEQUENCE2, row, &self.sequences2[row])?;
            } else {
                sink.write_null(columns::SEQUENCE2, row)?;
            }
            emit_qual(sink, columns::QUAL1, row, self.quals1[row].as_ref(), offset, &mut phred)?;
            let qual2 = if self.is_paired {
                self.quals2[row].as_ref()
            } else {
                None
            };
            emit_qual(sink, columns::QUAL2, row, qual2, offset, &mut phred)?;
            if let Some(path) = filepath {
                sink.write_str(columns::FILEPATH, row, path)?;
            }
        }
        sink.set_cardinality(self.len())
    }
}

fn emit_qual(
    sink: &mut dyn ColumnarSink,
    column: usize,
    row: usize,
    qual: Option<&QualityScore>,
    offset: QualOffset,
    scratch: &mut Vec<u8>,
) -> Result<(), SinkError> {
    let Some(qual) = qual else {
        return sink.write_null(column, row);
    };
    scratch.clear();
    scratch.resize(qual.len(), 0);
    qual.write_phred(scratch, offset)
        .map_err(|e| SinkError::InvalidValue {
            name: if column == columns::QUAL1 { "qual1" } else { "qual2" }.to_string(),
            row,
            reason: e.to_string(),
        })?;
    sink.reserve_list(column, scratch.len())?;
    sink.append_list_u8(column, row, scratch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ArrowSink;
    use arrow::array::{Array, AsArray};
    use arrow::datatypes::UInt8Type;

    #[test]
    fn test_emit_unpaired_nulls_second_mate() {
        let mut batch = SequenceBatch::unpaired();
        batch.push(
            "r1".into(),
            Some(String::new()),
            "ACGT".into(),
            Some(QualityScore::from_ascii(b"!!II".to_vec())),
        );
        let mut sink = ArrowSink::new(SequenceBatch::schema(false));
        batch.emit(&mut sink, QualOffset::Phred33, None).unwrap();
        let out = &sink.batches()[0];
        assert!(out.column(columns::COMMENT).is_null(0));
        assert!(out.column(columns::SEQUENCE2).is_null(0));
        assert!(out.column(columns::QUAL2).is_null(0));
        let quals = out.column(columns::QUAL1).as_list::<i32>().value(0);
        assert_eq!(quals.as_primitive::<UInt8Type>().values(), &[0, 0, 40, 40]);
    }

    #[test]
    fn test_emit_reports_bad_quality() {
        let mut batch = SequenceBatch::unpaired();
        batch.push(
            "r1".into(),
            None,
            "A".into(),
            Some(QualityScore::from_ascii(b" ".to_vec())),
        );
        let mut sink = ArrowSink::new(SequenceBatch::schema(false));
        let err = batch.emit(&mut sink, QualOffset::Phred33, None).unwrap_err();
        assert!(matches!(err, SinkError::InvalidValue { .. }));
    }

    #[test]
    fn test_emit_with_filepath() {
        let mut batch = SequenceBatch::paired();
        batch.push_pair(
            "x".into(),
            None,
            ("ACGT".into(), None),
            ("TGCA".into(), None),
        );
        let mut sink = ArrowSink::new(SequenceBatch::schema(true));
        batch.emit(&mut sink, QualOffset::Phred33, Some("x_R1.fa")).unwrap();
        let out = &sink.batches()[0];
        assert_eq!(out.num_columns(), 7);
        assert_eq!(out.column(columns::SEQUENCE2).as_string::<i32>().value(0), "TGCA");
    }
}
