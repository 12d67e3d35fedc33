//! Engine-neutral alignment regions and their conversion into SAM rows.
//!
//! A [`Region`] mirrors the fields of a minimap2 hit that matter for SAM
//! output. Keeping the conversion here, away from the FFI, lets flag,
//! template-length, tag and secondary-cap logic be exercised without the
//! engine compiled in.

use std::fmt::Write as _;

use crate::batch::{flags, AlignmentBatch, AlignmentRecord, AlignmentTags};

/// CIGAR operation in engine code order (`MIDNSHP=X`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOp {
    /// `M`
    Match,
    /// `I`
    Insertion,
    /// `D`
    Deletion,
    /// `N`
    Skip,
    /// `S`
    SoftClip,
    /// `H`
    HardClip,
    /// `P`
    Pad,
    /// `=`
    Equal,
    /// `X`
    Diff,
}

impl CigarOp {
    /// Decode an engine op code; unknown codes yield `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => CigarOp::Match,
            1 => CigarOp::Insertion,
            2 => CigarOp::Deletion,
            3 => CigarOp::Skip,
            4 => CigarOp::SoftClip,
            5 => CigarOp::HardClip,
            6 => CigarOp::Pad,
            7 => CigarOp::Equal,
            8 => CigarOp::Diff,
            _ => return None,
        })
    }

    /// SAM character.
    pub fn as_char(self) -> char {
        match self {
            CigarOp::Match => 'M',
            CigarOp::Insertion => 'I',
            CigarOp::Deletion => 'D',
            CigarOp::Skip => 'N',
            CigarOp::SoftClip => 'S',
            CigarOp::HardClip => 'H',
            CigarOp::Pad => 'P',
            CigarOp::Equal => '=',
            CigarOp::Diff => 'X',
        }
    }

    /// True when the op consumes query bases.
    pub fn consumes_query(self) -> bool {
        matches!(
            self,
            CigarOp::Match | CigarOp::Insertion | CigarOp::SoftClip | CigarOp::Equal | CigarOp::Diff
        )
    }
}

/// Render `(length, op)` runs as CIGAR text; `*` when there are none.
pub fn cigar_text(ops: &[(u32, CigarOp)]) -> String {
    if ops.is_empty() {
        return "*".to_string();
    }
    let mut out = String::with_capacity(ops.len() * 4);
    for &(len, op) in ops {
        let _ = write!(out, "{len}{}", op.as_char());
    }
    out
}

/// Mismatch and gap counts derived from a CIGAR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CigarStats {
    /// XM: bases under `X`
    pub mismatches: i64,
    /// XO: one per `I` or `D` run
    pub gap_opens: i64,
    /// XG: run length minus one, summed over `I` and `D` runs
    pub gap_extends: i64,
    /// NM: `X` + `I` + `D` lengths
    pub edit_distance: i64,
}

impl CigarStats {
    /// Count over `ops`. `M` runs contribute nothing since they may hide
    /// mismatches.
    pub fn from_cigar(ops: &[(u32, CigarOp)]) -> Self {
        let mut stats = Self::default();
        for &(len, op) in ops {
            let len = i64::from(len);
            match op {
                CigarOp::Diff => {
                    stats.mismatches += len;
                    stats.edit_distance += len;
                }
                CigarOp::Insertion | CigarOp::Deletion => {
                    stats.gap_opens += 1;
                    stats.gap_extends += (len - 1).max(0);
                    stats.edit_distance += len;
                }
                _ => {}
            }
        }
        stats
    }
}

/// One hit of a query against the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Hit id within the query
    pub id: i32,
    /// Id of the primary hit this one is secondary to; equal to `id` for
    /// primaries
    pub parent: i32,
    /// Reference index, negative when unmapped
    pub rid: i32,
    /// 0-based reference start
    pub rs: i64,
    /// 0-based exclusive reference end
    pub re: i64,
    /// Reverse strand
    pub rev: bool,
    /// Mapping quality
    pub mapq: u8,
    /// DP alignment score
    pub score: i32,
    /// Best score among suboptimal hits, 0 when none
    pub subsc: i32,
    /// Mates form a proper pair
    pub proper_frag: bool,
    /// Split type; 2 marks a supplementary hit
    pub split: u8,
    /// CIGAR runs, empty when the engine produced none
    pub cigar: Vec<(u32, CigarOp)>,
    /// MD string, empty when unavailable
    pub md: String,
}

impl Region {
    /// True for the primary hit of its chain.
    pub fn is_primary(&self) -> bool {
        self.parent == self.id
    }

    fn is_unmapped(&self) -> bool {
        self.rid < 0
    }

    /// Reference name for this hit; `None` when the id is out of range.
    fn reference<'a>(&self, names: &'a [String]) -> Option<&'a str> {
        usize::try_from(self.rid)
            .ok()
            .and_then(|rid| names.get(rid))
            .map(String::as_str)
    }
}

/// Mate-linked fields of one segment of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MateInfo {
    /// 0 for read 1, 1 for read 2
    pub segment: usize,
    /// The other segment has a primary hit
    pub mate_mapped: bool,
    /// The other segment's primary hit is reversed
    pub mate_rev: bool,
    /// Reference index of the other segment's primary hit, -1 when none
    pub mate_rid: i32,
    /// 1-based start of the other segment's primary hit, 0 when none
    pub mate_pos: i64,
    /// Template length reported for this segment
    pub tlen: i64,
}

impl MateInfo {
    /// Mate fields for both segments from their primary hits.
    pub fn for_pair(primary: [Option<&Region>; 2]) -> [MateInfo; 2] {
        let tlen = match primary {
            [Some(a), Some(b)] if a.rid == b.rid => template_length(a, b),
            _ => 0,
        };
        let describe = |segment: usize, mate: Option<&Region>, tlen: i64| MateInfo {
            segment,
            mate_mapped: mate.is_some(),
            mate_rev: mate.is_some_and(|m| m.rev),
            mate_rid: mate.map_or(-1, |m| m.rid),
            mate_pos: mate.map_or(0, |m| m.rs + 1),
            tlen,
        };
        [describe(0, primary[1], tlen), describe(1, primary[0], -tlen)]
    }
}

/// Signed template length of a pair on one reference, from read 1's view:
/// rightmost end minus leftmost start, negative when read 1 starts after
/// read 2.
pub fn template_length(read1: &Region, read2: &Region) -> i64 {
    let span = read1.re.max(read2.re) - read1.rs.min(read2.rs);
    if read1.rs > read2.rs {
        -span
    } else {
        span
    }
}

fn compute_flags(region: &Region, mate: Option<&MateInfo>) -> u16 {
    let mut bits = 0u16;
    let unmapped = region.is_unmapped();
    if let Some(mate) = mate {
        bits |= flags::PAIRED;
        bits |= if mate.segment == 0 {
            flags::FIRST_IN_PAIR
        } else {
            flags::SECOND_IN_PAIR
        };
        if region.proper_frag && mate.mate_mapped && !unmapped {
            bits |= flags::PROPER_PAIR;
        }
        if !mate.mate_mapped {
            bits |= flags::MATE_UNMAPPED;
        }
        if mate.mate_rev {
            bits |= flags::MATE_REVERSE;
        }
    }
    if unmapped {
        bits |= flags::UNMAPPED;
    } else if region.rev {
        bits |= flags::REVERSE;
    }
    if !region.is_primary() {
        bits |= flags::SECONDARY;
    }
    if region.split == 2 {
        bits |= flags::SUPPLEMENTARY;
    }
    bits
}

fn pair_type(region: &Region, mate: Option<&MateInfo>) -> &'static str {
    match mate {
        None => "UU",
        Some(m) if m.mate_mapped && !region.is_unmapped() && region.proper_frag => "CP",
        Some(m) if m.mate_mapped && !region.is_unmapped() => "DP",
        Some(_) => "UP",
    }
}

/// Build one SAM row from a hit.
///
/// Returns `None` when the hit names a reference index outside `names`.
/// A negative reference index yields an unmapped row.
pub fn region_to_row(
    region: &Region,
    read_id: &str,
    names: &[String],
    mate: Option<&MateInfo>,
) -> Option<AlignmentRecord> {
    let unmapped = region.is_unmapped();
    let reference = if unmapped {
        "*"
    } else {
        region.reference(names)?
    };

    let mut rec = AlignmentRecord {
        read_id: read_id.to_string(),
        flags: compute_flags(region, mate),
        reference: reference.to_string(),
        ..AlignmentRecord::default()
    };
    if !unmapped {
        rec.position = region.rs + 1;
        // A 0-based exclusive end is the 1-based inclusive end.
        rec.stop_position = region.re;
        rec.mapq = region.mapq;
        rec.cigar = cigar_text(&region.cigar);
    }

    if let Some(m) = mate.filter(|m| m.mate_mapped && m.mate_rid >= 0) {
        let mate_ref = usize::try_from(m.mate_rid)
            .ok()
            .and_then(|rid| names.get(rid))
            .map_or("*", String::as_str);
        rec.mate_reference = if !unmapped && mate_ref == rec.reference {
            "=".to_string()
        } else {
            mate_ref.to_string()
        };
        rec.mate_position = m.mate_pos;
    }
    rec.template_length = mate.map_or(0, |m| m.tlen);

    let stats = CigarStats::from_cigar(&region.cigar);
    rec.tags = AlignmentTags {
        alignment_score: i64::from(region.score),
        suboptimal_score: if region.subsc > 0 {
            i64::from(region.subsc)
        } else {
            -1
        },
        pair_type: pair_type(region, mate).to_string(),
        ..AlignmentTags::default()
    };
    if !unmapped {
        rec.tags.mismatches = stats.mismatches;
        rec.tags.gap_opens = stats.gap_opens;
        rec.tags.gap_extends = stats.gap_extends;
        rec.tags.edit_distance = stats.edit_distance;
        rec.tags.mismatch_string = region.md.clone();
    }
    Some(rec)
}

fn in_bounds(region: &Region, names: &[String]) -> bool {
    let ok = region.reference(names).is_some();
    if !ok {
        log::warn!(
            "align: skipping hit with reference index {} outside {} subjects",
            region.rid,
            names.len()
        );
    }
    ok
}

/// Append rows for an unpaired query. `regions` are in descending score
/// order; at most `max_secondary` non-primary hits are kept.
pub fn single_end_rows(
    read_id: &str,
    regions: &[Region],
    names: &[String],
    max_secondary: usize,
    output: &mut AlignmentBatch,
) {
    let mut secondaries = 0usize;
    for region in regions {
        if !in_bounds(region, names) {
            continue;
        }
        if !region.is_primary() {
            if secondaries >= max_secondary {
                continue;
            }
            secondaries += 1;
        }
        if let Some(row) = region_to_row(region, read_id, names, None) {
            output.push(row);
        }
    }
}

/// Append rows for a pair aligned in fragment mode. Each segment keeps at
/// most `max_secondary` non-primary hits.
pub fn paired_end_rows(
    read_id: &str,
    regions: [&[Region]; 2],
    names: &[String],
    max_secondary: usize,
    output: &mut AlignmentBatch,
) {
    let primary = regions.map(|segment| {
        segment
            .iter()
            .find(|r| r.reference(names).is_some() && r.is_primary())
    });
    let mates = MateInfo::for_pair(primary);

    for (segment, hits) in regions.iter().enumerate() {
        let mut secondaries = 0usize;
        for region in hits.iter() {
            if !in_bounds(region, names) {
                continue;
            }
            if !region.is_primary() {
                if secondaries >= max_secondary {
                    continue;
                }
                secondaries += 1;
            }
            if let Some(row) = region_to_row(region, read_id, names, Some(&mates[segment])) {
                output.push(row);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names() -> Vec<String> {
        vec!["chr1".to_string(), "chr2".to_string()]
    }

    fn hit(id: i32, parent: i32, rid: i32, rs: i64, re: i64) -> Region {
        Region {
            id,
            parent,
            rid,
            rs,
            re,
            rev: false,
            mapq: 60,
            score: 100,
            subsc: 0,
            proper_frag: false,
            split: 0,
            cigar: vec![((re - rs) as u32, CigarOp::Equal)],
            md: String::new(),
        }
    }

    #[test]
    fn test_cigar_text_and_stats() {
        let ops = [
            (3, CigarOp::SoftClip),
            (10, CigarOp::Equal),
            (1, CigarOp::Diff),
            (3, CigarOp::Insertion),
            (5, CigarOp::Equal),
            (1, CigarOp::Deletion),
            (4, CigarOp::Match),
        ];
        assert_eq!(cigar_text(&ops), "3S10=1X3I5=1D4M");
        assert_eq!(cigar_text(&[]), "*");
        let stats = CigarStats::from_cigar(&ops);
        assert_eq!(
            stats,
            CigarStats {
                mismatches: 1,
                gap_opens: 2,
                gap_extends: 2,
                edit_distance: 5,
            }
        );
        assert_eq!(CigarOp::from_code(7), Some(CigarOp::Equal));
        assert_eq!(CigarOp::from_code(9), None);
    }

    #[test]
    fn test_single_end_row_fields() {
        let mut region = hit(0, 0, 1, 9, 61);
        region.rev = true;
        region.subsc = 42;
        region.md = "52".into();
        let row = region_to_row(&region, "q", &names(), None).unwrap();
        assert_eq!(row.reference, "chr2");
        assert_eq!(row.position, 10);
        assert_eq!(row.stop_position, 61);
        assert_eq!(row.cigar, "52=");
        assert_eq!(row.flags, flags::REVERSE);
        assert_eq!(row.mate_reference, "*");
        assert_eq!(row.tags.suboptimal_score, 42);
        assert_eq!(row.tags.pair_type, "UU");
        assert_eq!(row.tags.edit_distance, 0);
        assert_eq!(row.tags.mismatch_string, "52");
    }

    #[test]
    fn test_out_of_range_reference_is_skipped() {
        assert!(region_to_row(&hit(0, 0, 5, 0, 10), "q", &names(), None).is_none());
        let mut out = AlignmentBatch::new();
        single_end_rows("q", &[hit(0, 0, 5, 0, 10), hit(1, 1, 0, 0, 10)], &names(), 5, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out.records[0].reference, "chr1");
    }

    #[test]
    fn test_unmapped_region_row() {
        let mut region = hit(0, 0, -1, 0, 0);
        region.cigar.clear();
        let row = region_to_row(&region, "q", &names(), None).unwrap();
        assert!(row.is_unmapped());
        assert_eq!((row.reference.as_str(), row.position, row.cigar.as_str()), ("*", 0, "*"));
        assert_eq!(row.tags.mismatches, -1);
    }

    #[test]
    fn test_secondary_cap() {
        let regions = [hit(0, 0, 0, 0, 50), hit(1, 0, 0, 100, 150), hit(2, 0, 1, 0, 50)];
        let mut out = AlignmentBatch::new();
        single_end_rows("q", &regions, &names(), 1, &mut out);
        assert_eq!(out.len(), 2);
        assert!(!out.records[0].is_secondary());
        assert!(out.records[1].is_secondary());

        let mut none = AlignmentBatch::new();
        single_end_rows("q", &regions, &names(), 0, &mut none);
        assert_eq!(none.len(), 1);
    }

    #[test]
    fn test_template_length_sign() {
        let r1 = hit(0, 0, 0, 100, 150);
        let r2 = hit(0, 0, 0, 300, 350);
        assert_eq!(template_length(&r1, &r2), 250);
        assert_eq!(template_length(&r2, &r1), -250);
        let same = hit(0, 0, 0, 100, 140);
        assert_eq!(template_length(&r1, &same), 50);
    }

    #[test]
    fn test_proper_pair_rows() {
        let mut r1 = hit(0, 0, 0, 100, 150);
        r1.proper_frag = true;
        let mut r2 = hit(0, 0, 0, 300, 350);
        r2.proper_frag = true;
        r2.rev = true;
        let mut out = AlignmentBatch::new();
        paired_end_rows("p", [&[r1][..], &[r2][..]], &names(), 5, &mut out);
        assert_eq!(out.len(), 2);
        let (a, b) = (&out.records[0], &out.records[1]);
        assert_eq!(
            a.flags,
            flags::PAIRED | flags::PROPER_PAIR | flags::FIRST_IN_PAIR | flags::MATE_REVERSE
        );
        assert_eq!(
            b.flags,
            flags::PAIRED | flags::PROPER_PAIR | flags::SECOND_IN_PAIR | flags::REVERSE
        );
        assert_eq!((a.mate_reference.as_str(), a.mate_position), ("=", 301));
        assert_eq!((b.mate_reference.as_str(), b.mate_position), ("=", 101));
        assert_eq!((a.template_length, b.template_length), (250, -250));
        assert_eq!((a.tags.pair_type.as_str(), b.tags.pair_type.as_str()), ("CP", "CP"));
    }

    #[test]
    fn test_pair_with_unmapped_mate_and_other_reference() {
        let r1 = hit(0, 0, 0, 10, 60);
        let mut out = AlignmentBatch::new();
        paired_end_rows("p", [&[r1.clone()][..], &[][..]], &names(), 5, &mut out);
        assert_eq!(out.len(), 1);
        let row = &out.records[0];
        assert_ne!(row.flags & flags::MATE_UNMAPPED, 0);
        assert_eq!(row.flags & flags::PROPER_PAIR, 0);
        assert_eq!(row.mate_reference, "*");
        assert_eq!(row.template_length, 0);
        assert_eq!(row.tags.pair_type, "UP");

        let r2 = hit(0, 0, 1, 10, 60);
        let mut out = AlignmentBatch::new();
        paired_end_rows("p", [&[r1][..], &[r2][..]], &names(), 5, &mut out);
        assert_eq!(out.records[0].mate_reference, "chr2");
        assert_eq!(out.records[0].template_length, 0);
        assert_eq!(out.records[0].tags.pair_type, "DP");
    }

    fn arb_region() -> impl Strategy<Value = Region> {
        (
            0i32..4,
            -1i32..3,
            0i64..1000,
            1i64..200,
            any::<bool>(),
            any::<bool>(),
            0u8..3,
        )
            .prop_map(|(parent, rid, rs, len, rev, proper, split)| Region {
                id: 0,
                parent,
                rid,
                rs,
                re: rs + len,
                rev,
                mapq: 30,
                score: 10,
                subsc: 0,
                proper_frag: proper,
                split,
                cigar: vec![(len as u32, CigarOp::Match)],
                md: String::new(),
            })
    }

    proptest! {
        #[test]
        fn prop_flag_consistency_and_cap(
            seg1 in prop::collection::vec(arb_region(), 0..8),
            seg2 in prop::collection::vec(arb_region(), 0..8),
            max_secondary in 0usize..3,
        ) {
            let mut out = AlignmentBatch::new();
            paired_end_rows("p", [seg1.as_slice(), seg2.as_slice()], &names(), max_secondary, &mut out);
            single_end_rows("s", &seg1, &names(), max_secondary, &mut out);
            for row in &out.records {
                let unmapped = row.flags & flags::UNMAPPED != 0;
                prop_assert_eq!(
                    unmapped,
                    row.reference == "*" && row.cigar == "*" && row.position == 0
                );
                if row.flags & flags::PROPER_PAIR != 0 {
                    prop_assert!(row.flags & flags::PAIRED != 0);
                    prop_assert!(!unmapped);
                    prop_assert!(row.flags & flags::MATE_UNMAPPED == 0);
                }
                if !unmapped {
                    prop_assert!(row.stop_position >= row.position);
                }
            }
            for segment_bit in [flags::FIRST_IN_PAIR, flags::SECOND_IN_PAIR] {
                let secondary = out
                    .records
                    .iter()
                    .filter(|r| r.read_id == "p" && r.flags & segment_bit != 0 && r.is_secondary())
                    .count();
                prop_assert!(secondary <= max_secondary);
            }
            let unpaired_secondary =
                out.records.iter().filter(|r| r.read_id == "s" && r.is_secondary()).count();
            prop_assert!(unpaired_secondary <= max_secondary);
        }
    }
}
