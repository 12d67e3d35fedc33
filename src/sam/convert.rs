use noodles::sam;
use noodles::sam::alignment::record::cigar::op::Kind;
use noodles::sam::alignment::record::data::field::Tag;
use noodles::sam::alignment::record_buf::data::field::Value;
use noodles::sam::alignment::record_buf::{Cigar, RecordBuf};

use crate::batch::{flags, AlignmentRecord, AlignmentTags};
use crate::quality::{QualOffset, QualityError, QualityScore};

const TAG_AS: Tag = Tag::new(b'A', b'S');
const TAG_XS: Tag = Tag::new(b'X', b'S');
const TAG_YS: Tag = Tag::new(b'Y', b'S');
const TAG_XN: Tag = Tag::new(b'X', b'N');
const TAG_XM: Tag = Tag::new(b'X', b'M');
const TAG_XO: Tag = Tag::new(b'X', b'O');
const TAG_XG: Tag = Tag::new(b'X', b'G');
const TAG_NM: Tag = Tag::new(b'N', b'M');
const TAG_YT: Tag = Tag::new(b'Y', b'T');
const TAG_MD: Tag = Tag::new(b'M', b'D');
const TAG_SA: Tag = Tag::new(b'S', b'A');

fn op_char(kind: Kind) -> char {
    match kind {
        Kind::Match => 'M',
        Kind::Insertion => 'I',
        Kind::Deletion => 'D',
        Kind::Skip => 'N',
        Kind::SoftClip => 'S',
        Kind::HardClip => 'H',
        Kind::Pad => 'P',
        Kind::SequenceMatch => '=',
        Kind::SequenceMismatch => 'X',
    }
}

/// Render a CIGAR as `<len><op>` runs, or `*` when it has no operations.
pub fn cigar_string(cigar: &Cigar) -> String {
    let ops = cigar.as_ref();
    if ops.is_empty() {
        return "*".to_string();
    }
    let mut out = String::with_capacity(ops.len() * 4);
    for op in ops {
        out.push_str(&op.len().to_string());
        out.push(op_char(op.kind()));
    }
    out
}

fn int_tag(record: &RecordBuf, tag: Tag) -> i64 {
    record
        .data()
        .get(&tag)
        .and_then(Value::as_int)
        .unwrap_or(-1)
}

fn str_tag(record: &RecordBuf, tag: Tag) -> String {
    match record.data().get(&tag) {
        Some(Value::String(s)) => s.to_string(),
        Some(Value::Character(c)) => char::from(*c).to_string(),
        _ => String::new(),
    }
}

fn reference_name(header: &sam::Header, id: Option<usize>) -> Option<String> {
    let id = id?;
    header
        .reference_sequences()
        .get_index(id)
        .map(|(name, _)| name.to_string())
}

/// Convert one decoded record into a row.
///
/// Unmapped records always come out with reference `*`, cigar `*` and
/// position 0, whatever placement the input carried.
pub fn record_from_buf(
    record: &RecordBuf,
    header: &sam::Header,
    include_seq_qual: bool,
) -> Result<AlignmentRecord, QualityError> {
    let flag_bits = record.flags().bits();
    let unmapped = flag_bits & flags::UNMAPPED != 0;

    let reference_id = record.reference_sequence_id();
    let reference = reference_name(header, reference_id);
    let (reference, position, stop_position, cigar) = match reference {
        Some(name) if !unmapped => {
            let position = record
                .alignment_start()
                .map(usize::from)
                .map_or(0, |start| start as i64);
            let stop = record
                .alignment_end()
                .map(usize::from)
                .map_or(position, |end| end as i64);
            (name, position, stop, cigar_string(record.cigar()))
        }
        _ => ("*".to_string(), 0, 0, "*".to_string()),
    };

    let mate_id = record.mate_reference_sequence_id();
    let mate_reference = match mate_id {
        None => "*".to_string(),
        Some(id) if Some(id) == reference_id && !unmapped => "=".to_string(),
        Some(_) => reference_name(header, mate_id).unwrap_or_else(|| "*".to_string()),
    };
    let mate_position = record.mate_alignment_start().map_or(0, usize::from) as i64;

    let tags = AlignmentTags {
        alignment_score: int_tag(record, TAG_AS),
        suboptimal_score: int_tag(record, TAG_XS),
        mate_score: int_tag(record, TAG_YS),
        ambiguous_bases: int_tag(record, TAG_XN),
        mismatches: int_tag(record, TAG_XM),
        gap_opens: int_tag(record, TAG_XO),
        gap_extends: int_tag(record, TAG_XG),
        edit_distance: int_tag(record, TAG_NM),
        pair_type: str_tag(record, TAG_YT),
        mismatch_string: str_tag(record, TAG_MD),
        supplementary_alignments: str_tag(record, TAG_SA),
    };

    let (sequence, qual) = if include_seq_qual {
        let bases = record.sequence().as_ref();
        let raw = record.quality_scores().as_ref();
        let qual = if raw.is_empty() {
            None
        } else {
            Some(QualityScore::from_phred(raw, QualOffset::Phred33)?)
        };
        (Some(String::from_utf8_lossy(bases).into_owned()), qual)
    } else {
        (None, None)
    };

    Ok(AlignmentRecord {
        read_id: record.name().map(|n| n.to_string()).unwrap_or_default(),
        flags: flag_bits,
        reference,
        position,
        stop_position,
        mapq: record.mapping_quality().map_or(255, |mq| mq.get()),
        cigar,
        mate_reference,
        mate_position,
        template_length: i64::from(record.template_length()),
        tags,
        sequence,
        qual,
    })
}
