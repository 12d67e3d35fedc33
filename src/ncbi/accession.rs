use needletail::errors::ParseErrorKind;
use needletail::parse_fastx_reader;

use crate::batch::SequenceBatch;
use crate::error::{Location, Offset};
use crate::quality::QualityScore;

use super::NcbiError;

/// RefSeq and GenBank sequence prefixes routed to E-utilities.
pub(super) const SEQUENCE_PREFIXES: [&str; 12] = [
    "NC_", "NM_", "NP_", "NR_", "XM_", "XP_", "XR_", "NG_", "NT_", "NW_", "NZ_", "AC_",
];

/// FASTA id fields that precede an accession.
const DATABASE_TAGS: [&str; 4] = ["ref", "gb", "emb", "dbj"];

/// Which NCBI service an accession belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessionType {
    /// `GCF_` / `GCA_` genome assembly
    Assembly,
    /// RefSeq / GenBank sequence record
    Sequence,
    /// Anything else
    Unknown,
}

/// Classify an accession by its prefix.
///
/// ```
/// use biocolumns::ncbi::{detect_accession_type, AccessionType};
///
/// assert_eq!(detect_accession_type("GCF_000005845.2"), AccessionType::Assembly);
/// assert_eq!(detect_accession_type("NC_001416.1"), AccessionType::Sequence);
/// assert_eq!(detect_accession_type("P12345"), AccessionType::Unknown);
/// ```
pub fn detect_accession_type(accession: &str) -> AccessionType {
    if accession.starts_with("GCF_") || accession.starts_with("GCA_") {
        AccessionType::Assembly
    } else if SEQUENCE_PREFIXES.iter().any(|p| accession.starts_with(p)) {
        AccessionType::Sequence
    } else {
        AccessionType::Unknown
    }
}

/// True for `GCF_` / `GCA_` accessions.
pub fn is_assembly_accession(accession: &str) -> bool {
    detect_accession_type(accession) == AccessionType::Assembly
}

/// Split an NCBI FASTA id into its accession and the remaining text.
///
/// Handles plain ids (`NC_001416.1 description`) and pipe-delimited ones
/// (`gi|9626243|ref|NC_001416.1| description`). In the pipe form the field
/// after `ref`, `gb`, `emb` or `dbj` is the accession; failing that, the
/// first field containing `_` or `.` is.
pub fn extract_accession_from_fasta_id(fasta_id: &str) -> (String, Option<String>) {
    if fasta_id.contains('|') {
        let parts: Vec<&str> = fasta_id.split('|').collect();
        for (i, window) in parts.windows(2).enumerate() {
            if DATABASE_TAGS.contains(&window[0]) {
                let rest: Vec<&str> = parts[i + 2..]
                    .iter()
                    .map(|p| p.trim())
                    .filter(|p| !p.is_empty())
                    .collect();
                let remainder = (!rest.is_empty()).then(|| rest.join(" "));
                return (window[1].to_string(), remainder);
            }
        }
        let fallback = parts.iter().find(|p| {
            !p.is_empty() && !matches!(**p, "gi" | "ref" | "gb") && (p.contains('_') || p.contains('.'))
        });
        if let Some(accession) = fallback {
            return (accession.to_string(), None);
        }
    }
    match fasta_id.split_once(' ') {
        Some((accession, rest)) => {
            let rest = rest.trim();
            (accession.to_string(), (!rest.is_empty()).then(|| rest.to_string()))
        }
        None => (fasta_id.to_string(), None),
    }
}

/// Parse an efetch FASTA response into an unpaired batch.
///
/// Read ids are accessions; the rest of the header becomes the comment.
/// Empty text gives an empty batch.
pub fn parse_fasta(text: &str) -> Result<SequenceBatch, NcbiError> {
    let mut batch = SequenceBatch::unpaired();
    let mut parser = match parse_fastx_reader(text.as_bytes()) {
        Ok(parser) => parser,
        Err(e) if matches!(e.kind, ParseErrorKind::EmptyFile) => return Ok(batch),
        Err(source) => {
            return Err(NcbiError::Fasta {
                source,
                location: Location::unknown().with_offset(Offset::Record(0)),
            })
        }
    };
    let mut records = 0u64;
    while let Some(record) = parser.next() {
        let record = record.map_err(|source| NcbiError::Fasta {
            source,
            location: Location::unknown().with_offset(Offset::Record(records)),
        })?;
        let header = String::from_utf8_lossy(record.id());
        let (accession, comment) = extract_accession_from_fasta_id(header.trim_end());
        batch.push(
            accession,
            comment,
            String::from_utf8_lossy(&record.seq()).into_owned(),
            record.qual().map(QualityScore::from_ascii),
        );
        records += 1;
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accession_types() {
        for assembly in ["GCF_000005845.2", "GCA_000001405.29"] {
            assert_eq!(detect_accession_type(assembly), AccessionType::Assembly);
            assert!(is_assembly_accession(assembly));
        }
        for sequence in SEQUENCE_PREFIXES.iter().map(|p| format!("{p}000001.1")) {
            assert_eq!(detect_accession_type(&sequence), AccessionType::Sequence, "{sequence}");
            assert!(!is_assembly_accession(&sequence));
        }
        for unknown in ["", "U00096", "gcf_000005845", "GC_1"] {
            assert_eq!(detect_accession_type(unknown), AccessionType::Unknown, "{unknown}");
        }
    }

    #[test]
    fn test_pipe_delimited_ids() {
        assert_eq!(
            extract_accession_from_fasta_id("gi|9626243|ref|NC_001416.1| Enterobacteria phage lambda"),
            ("NC_001416.1".to_string(), Some("Enterobacteria phage lambda".to_string()))
        );
        assert_eq!(
            extract_accession_from_fasta_id("ref|NC_001416.1|"),
            ("NC_001416.1".to_string(), None)
        );
        assert_eq!(
            extract_accession_from_fasta_id("emb|X56734.1|TRBEGF"),
            ("X56734.1".to_string(), Some("TRBEGF".to_string()))
        );
        assert_eq!(
            extract_accession_from_fasta_id("gi|123|NZ_CP0001.1"),
            ("NZ_CP0001.1".to_string(), None)
        );
    }

    #[test]
    fn test_plain_ids() {
        assert_eq!(
            extract_accession_from_fasta_id("NC_045512.2 Severe acute respiratory syndrome"),
            ("NC_045512.2".to_string(), Some("Severe acute respiratory syndrome".to_string()))
        );
        assert_eq!(extract_accession_from_fasta_id("NC_045512.2"), ("NC_045512.2".to_string(), None));
        assert_eq!(extract_accession_from_fasta_id(""), (String::new(), None));
    }

    #[test]
    fn test_parse_fasta_response() {
        let text = ">gi|9626243|ref|NC_001416.1| phage lambda\nGGGCGG\nCGACCT\n>NC_045512.2 SARS-CoV-2\r\nATTAAAGG\r\n";
        let batch = parse_fasta(text).unwrap();
        assert_eq!(batch.read_ids, vec!["NC_001416.1", "NC_045512.2"]);
        assert_eq!(batch.comments[0].as_deref(), Some("phage lambda"));
        assert_eq!(batch.comments[1].as_deref(), Some("SARS-CoV-2"));
        assert_eq!(batch.sequences1, vec!["GGGCGGCGACCT", "ATTAAAGG"]);
        assert!(batch.quals1.iter().all(Option::is_none));
        assert!(!batch.is_paired);
    }

    #[test]
    fn test_parse_empty_fasta() {
        assert!(parse_fasta("").unwrap().is_empty());
    }
}
