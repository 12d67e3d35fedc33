//! Alignment rows read from SAM/BAM or produced by the aligners.

use crate::quality::{QualOffset, QualityScore};
use crate::sink::{ColumnSpec, ColumnType, ColumnarSink, OutputSchema, SinkError};

/// SAM flag bits.
pub mod flags {
    /// Template has multiple segments
    pub const PAIRED: u16 = 0x1;
    /// Each segment properly aligned
    pub const PROPER_PAIR: u16 = 0x2;
    /// Segment unmapped
    pub const UNMAPPED: u16 = 0x4;
    /// Next segment unmapped
    pub const MATE_UNMAPPED: u16 = 0x8;
    /// Sequence reverse complemented
    pub const REVERSE: u16 = 0x10;
    /// Next segment reverse complemented
    pub const MATE_REVERSE: u16 = 0x20;
    /// First segment in the template
    pub const FIRST_IN_PAIR: u16 = 0x40;
    /// Last segment in the template
    pub const SECOND_IN_PAIR: u16 = 0x80;
    /// Secondary alignment
    pub const SECONDARY: u16 = 0x100;
    /// Not passing quality controls
    pub const QC_FAIL: u16 = 0x200;
    /// PCR or optical duplicate
    pub const DUPLICATE: u16 = 0x400;
    /// Supplementary alignment
    pub const SUPPLEMENTARY: u16 = 0x800;
}

/// Optional SAM tags carried by every row. Integers use -1 and strings use
/// the empty string for "absent".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentTags {
    /// AS
    pub alignment_score: i64,
    /// XS
    pub suboptimal_score: i64,
    /// YS
    pub mate_score: i64,
    /// XN
    pub ambiguous_bases: i64,
    /// XM
    pub mismatches: i64,
    /// XO
    pub gap_opens: i64,
    /// XG
    pub gap_extends: i64,
    /// NM
    pub edit_distance: i64,
    /// YT: UU, CP, DP or UP
    pub pair_type: String,
    /// MD
    pub mismatch_string: String,
    /// SA
    pub supplementary_alignments: String,
}

impl Default for AlignmentTags {
    fn default() -> Self {
        Self {
            alignment_score: -1,
            suboptimal_score: -1,
            mate_score: -1,
            ambiguous_bases: -1,
            mismatches: -1,
            gap_opens: -1,
            gap_extends: -1,
            edit_distance: -1,
            pair_type: String::new(),
            mismatch_string: String::new(),
            supplementary_alignments: String::new(),
        }
    }
}

/// One SAM row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentRecord {
    /// Query name
    pub read_id: String,
    /// Bitwise flags
    pub flags: u16,
    /// Reference name or `*`
    pub reference: String,
    /// 1-based leftmost position, 0 when unmapped
    pub position: i64,
    /// 1-based inclusive end, 0 when unmapped
    pub stop_position: i64,
    /// Mapping quality
    pub mapq: u8,
    /// CIGAR or `*`
    pub cigar: String,
    /// `=`, `*` or a reference name
    pub mate_reference: String,
    /// 1-based mate position, 0 when unavailable
    pub mate_position: i64,
    /// Signed observed template length
    pub template_length: i64,
    /// Optional tags
    pub tags: AlignmentTags,
    /// Read bases, when requested
    pub sequence: Option<String>,
    /// Read qualities, when requested
    pub qual: Option<QualityScore>,
}

impl Default for AlignmentRecord {
    fn default() -> Self {
        Self {
            read_id: String::new(),
            flags: flags::UNMAPPED,
            reference: "*".to_string(),
            position: 0,
            stop_position: 0,
            mapq: 0,
            cigar: "*".to_string(),
            mate_reference: "*".to_string(),
            mate_position: 0,
            template_length: 0,
            tags: AlignmentTags::default(),
            sequence: None,
            qual: None,
        }
    }
}

impl AlignmentRecord {
    /// True when the unmapped bit is set.
    pub fn is_unmapped(&self) -> bool {
        self.flags & flags::UNMAPPED != 0
    }

    /// True when the secondary bit is set.
    pub fn is_secondary(&self) -> bool {
        self.flags & flags::SECONDARY != 0
    }
}

/// Rows produced by a SAM/BAM reader or an aligner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignmentBatch {
    /// Rows in source order
    pub records: Vec<AlignmentRecord>,
}

const REQUIRED_COLUMNS: [(&str, ColumnType); 10] = [
    ("read_id", ColumnType::Utf8),
    ("flags", ColumnType::UInt16),
    ("reference", ColumnType::Utf8),
    ("position", ColumnType::Int64),
    ("stop_position", ColumnType::Int64),
    ("mapq", ColumnType::UInt8),
    ("cigar", ColumnType::Utf8),
    ("mate_reference", ColumnType::Utf8),
    ("mate_position", ColumnType::Int64),
    ("template_length", ColumnType::Int64),
];

const INT_TAG_COLUMNS: [&str; 8] = [
    "tag_as", "tag_xs", "tag_ys", "tag_xn", "tag_xm", "tag_xo", "tag_xg", "tag_nm",
];

const STR_TAG_COLUMNS: [&str; 3] = ["tag_yt", "tag_md", "tag_sa"];

impl AlignmentBatch {
    /// Empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a row.
    pub fn push(&mut self, record: AlignmentRecord) {
        self.records.push(record);
    }

    /// Move every row of `other` onto the end of this batch.
    pub fn append(&mut self, other: &mut AlignmentBatch) {
        self.records.append(&mut other.records);
    }

    /// Output schema of an alignment table.
    pub fn schema(include_seq_qual: bool, include_filepath: bool) -> OutputSchema {
        let mut schema = OutputSchema::default();
        for (name, ty) in REQUIRED_COLUMNS {
            schema.push(ColumnSpec::required(name, ty));
        }
        for name in INT_TAG_COLUMNS {
            schema.push(ColumnSpec::nullable(name, ColumnType::Int64));
        }
        for name in STR_TAG_COLUMNS {
            schema.push(ColumnSpec::nullable(name, ColumnType::Utf8));
        }
        if include_seq_qual {
            schema.push(ColumnSpec::nullable("sequence", ColumnType::Utf8));
            schema.push(ColumnSpec::nullable("qual", ColumnType::ListUInt8));
        }
        if include_filepath {
            schema.push(ColumnSpec::required("filepath", ColumnType::Utf8));
        }
        schema
    }

    /// Write every row into `sink` and close the batch.
    pub fn emit(
        &self,
        sink: &mut dyn ColumnarSink,
        include_seq_qual: bool,
        filepath: Option<&str>,
    ) -> Result<(), SinkError> {
        let mut phred = Vec::new();
        for (row, rec) in self.records.iter().enumerate() {
            sink.write_str(0, row, &rec.read_id)?;
            sink.write_u16(1, row, rec.flags)?;
            sink.write_str(2, row, &rec.reference)?;
            sink.write_i64(3, row, rec.position)?;
            sink.write_i64(4, row, rec.stop_position)?;
            sink.write_u8(5, row, rec.mapq)?;
            sink.write_str(6, row, &rec.cigar)?;
            sink.write_str(7, row, &rec.mate_reference)?;
            sink.write_i64(8, row, rec.mate_position)?;
            sink.write_i64(9, row, rec.template_length)?;

            let t = &rec.tags;
            let ints = [
                t.alignment_score,
                t.suboptimal_score,
                t.mate_score,
                t.ambiguous_bases,
                t.mismatches,
                t.gap_opens,
                t.gap_extends,
                t.edit_distance,
            ];
            let mut col = 10;
            for value in ints {
                if value < 0 {
                    sink.write_null(col, row)?;
                } else {
                    sink.write_i64(col, row, value)?;
                }
                col += 1;
            }
            for value in [&t.pair_type, &t.mismatch_string, &t.supplementary_alignments] {
                if value.is_empty() {
                    sink.write_null(col, row)?;
                } else {
                    sink.write_str(col, row, value)?;
                }
                col += 1;
            }

            if include_seq_qual {
                match rec.sequence.as_deref() {
                    Some(seq) if !seq.is_empty() && seq != "*" => sink.write_str(col, row, seq)?,
                    _ => sink.write_null(col, row)?,
                }
                col += 1;
                match &rec.qual {
                    Some(q) if !q.is_empty() => {
                        phred.clear();
                        phred.resize(q.len(), 0);
                        q.write_phred(&mut phred, QualOffset::Phred33).map_err(|e| {
                            SinkError::InvalidValue {
                                name: "qual".to_string(),
                                row,
                                reason: e.to_string(),
                            }
                        })?;
                        sink.reserve_list(col, phred.len())?;
                        sink.append_list_u8(col, row, &phred)?;
                    }
                    _ => sink.write_null(col, row)?,
                }
                col += 1;
            }
            if let Some(path) = filepath {
                sink.write_str(col, row, path)?;
            }
        }
        sink.set_cardinality(self.len())
    }
}
