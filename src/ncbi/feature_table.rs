use std::collections::BTreeMap;

use crate::sink::{write_opt_f64, ColumnSpec, ColumnType, ColumnarSink, OutputSchema, SinkError};
use crate::table::Warnings;

use super::accession::SEQUENCE_PREFIXES;

/// One feature of an INSDC feature table, shaped like a GFF3 row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureAnnotation {
    /// Sequence the feature lies on
    pub seqid: String,
    /// `RefSeq`, `GenBank`, `NCBI`, or `unknown` without a header
    pub source: String,
    /// Feature key (`gene`, `CDS`, `tRNA`, ...)
    pub feature_type: String,
    /// 1-based start, the smaller coordinate
    pub position: i64,
    /// 1-based inclusive end, the larger coordinate
    pub stop_position: i64,
    /// Never set by feature tables
    pub score: Option<f64>,
    /// `+`, or `-` when the table lists the coordinates descending
    pub strand: String,
    /// CDS reading frame offset; `None` for other features
    pub phase: Option<i32>,
    /// Qualifiers in table order; keys may repeat
    pub attributes: Vec<(String, String)>,
}

impl FeatureAnnotation {
    /// Qualifiers as a JSON object with sorted keys; repeated keys join
    /// their values with `,` the way GFF3 does.
    pub fn attributes_json(&self) -> String {
        let mut merged: BTreeMap<&str, String> = BTreeMap::new();
        for (key, value) in &self.attributes {
            merged
                .entry(key.as_str())
                .and_modify(|existing| {
                    existing.push(',');
                    existing.push_str(value);
                })
                .or_insert_with(|| value.clone());
        }
        serde_json::to_string(&merged).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Column positions of [`FeatureAnnotationBatch::schema`].
pub mod columns {
    #![allow(missing_docs)]
    pub const SEQID: usize = 0;
    pub const SOURCE: usize = 1;
    pub const TYPE: usize = 2;
    pub const POSITION: usize = 3;
    pub const STOP_POSITION: usize = 4;
    pub const SCORE: usize = 5;
    pub const STRAND: usize = 6;
    pub const PHASE: usize = 7;
    pub const ATTRIBUTES: usize = 8;
    pub const FILEPATH: usize = 9;
}

/// Features parsed from one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureAnnotationBatch {
    /// Features in table order
    pub features: Vec<FeatureAnnotation>,
}

impl FeatureAnnotationBatch {
    /// Number of features.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// True when no features were parsed.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Output schema of an annotation table.
    pub fn schema(include_filepath: bool) -> OutputSchema {
        let mut schema = OutputSchema::new(vec![
            ColumnSpec::required("seqid", ColumnType::Utf8),
            ColumnSpec::required("source", ColumnType::Utf8),
            ColumnSpec::required("type", ColumnType::Utf8),
            ColumnSpec::required("position", ColumnType::Int64),
            ColumnSpec::required("stop_position", ColumnType::Int64),
            ColumnSpec::nullable("score", ColumnType::Float64),
            ColumnSpec::required("strand", ColumnType::Utf8),
            ColumnSpec::nullable("phase", ColumnType::Int32),
            ColumnSpec::required("attributes", ColumnType::Utf8),
        ]);
        if include_filepath {
            schema.push(ColumnSpec::required("filepath", ColumnType::Utf8));
        }
        schema
    }

    /// Write `features` into `sink` and close the batch.
    pub fn emit(
        features: &[FeatureAnnotation],
        sink: &mut dyn ColumnarSink,
        filepath: Option<&str>,
    ) -> Result<(), SinkError> {
        use columns::*;
        for (row, feature) in features.iter().enumerate() {
            sink.write_str(SEQID, row, &feature.seqid)?;
            sink.write_str(SOURCE, row, &feature.source)?;
            sink.write_str(TYPE, row, &feature.feature_type)?;
            sink.write_i64(POSITION, row, feature.position)?;
            sink.write_i64(STOP_POSITION, row, feature.stop_position)?;
            write_opt_f64(sink, SCORE, row, feature.score)?;
            sink.write_str(STRAND, row, &feature.strand)?;
            match feature.phase {
                Some(phase) => sink.write_i32(PHASE, row, phase)?,
                None => sink.write_null(PHASE, row)?,
            }
            sink.write_str(ATTRIBUTES, row, &feature.attributes_json())?;
            if let Some(path) = filepath {
                sink.write_str(FILEPATH, row, path)?;
            }
        }
        sink.set_cardinality(features.len())
    }
}

/// Annotation source implied by an accession.
fn detect_source(seqid: &str) -> &'static str {
    if seqid.is_empty() {
        return "unknown";
    }
    if SEQUENCE_PREFIXES[..11].iter().any(|p| seqid.starts_with(p)) {
        return "RefSeq";
    }
    // INSDC: one or two letters, then digits.
    if seqid.len() >= 5 {
        let letters = seqid.bytes().take_while(u8::is_ascii_alphabetic).count();
        let next = seqid.as_bytes().get(letters);
        if (1..=2).contains(&letters) && next.map_or(true, |b| b.is_ascii_digit() || *b == b'.') {
            return "GenBank";
        }
    }
    "NCBI"
}

/// Sequence id from `>Feature ref|NC_001416.1|` style headers.
fn header_seqid(header: &str) -> String {
    let header = header.trim();
    let mut fields = header.split('|');
    match (fields.next(), fields.next()) {
        (Some("ref" | "gb" | "emb" | "dbj"), Some(accession)) => accession.to_string(),
        _ => header.to_string(),
    }
}

fn is_complex_location(location: &str) -> bool {
    ["join", "order", "complement", "..", ","]
        .iter()
        .any(|marker| location.contains(marker))
}

/// First run of digits in a coordinate, past any `join(`, `<` or `>` prefix.
fn coordinate(text: &str) -> i64 {
    let digits = text.trim_start_matches(|c: char| !c.is_ascii_digit());
    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse().unwrap_or(0)
}

/// GFF3 phase for a CDS `codon_start` qualifier.
fn phase_from_codon_start(value: &str) -> Option<i32> {
    match value.trim() {
        "1" => Some(0),
        "2" => Some(1),
        "3" => Some(2),
        _ => None,
    }
}

/// Parse a five-column INSDC feature table.
///
/// Feature lines are `start<TAB>stop<TAB>key`; qualifier lines are
/// `<TAB><TAB><TAB>name<TAB>value` and attach to the preceding feature.
/// Continuation interval lines (two columns) and anything else that is not a
/// feature or qualifier are skipped.
///
/// Locations that are not a plain coordinate pair are reduced to their outer
/// bounds; the first one raises a warning on `warnings`. Qualifier lines
/// indented with other than three tabs also raise a warning each.
pub fn parse_feature_table(text: &str, warnings: &Warnings) -> FeatureAnnotationBatch {
    let mut batch = FeatureAnnotationBatch::default();
    let mut seqid = String::new();
    let mut source = detect_source("");
    let mut warned_complex = false;

    for line in text.lines() {
        let line = line.trim_end_matches([' ', '\r']);
        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix('>') {
            if let Some(rest) = header.strip_prefix("Feature") {
                seqid = header_seqid(rest);
                source = detect_source(&seqid);
            }
            continue;
        }

        if line.starts_with('\t') {
            let Some(feature) = batch.features.last_mut() else {
                continue;
            };
            let tabs = line.bytes().take_while(|&b| b == b'\t').count();
            if tabs != 3 {
                warnings.push(format!(
                    "ncbi: unexpected indentation ({tabs} tabs) in feature table, expected 3"
                ));
            }
            let qualifier = &line[tabs..];
            let (key, value) = qualifier.split_once('\t').unwrap_or((qualifier, ""));
            if feature.feature_type == "CDS" && key == "codon_start" {
                if let Some(phase) = phase_from_codon_start(value) {
                    feature.phase = Some(phase);
                }
            }
            feature.attributes.push((key.to_string(), value.to_string()));
            continue;
        }

        let mut columns = line.split_whitespace();
        let (Some(start), Some(stop), Some(key)) = (columns.next(), columns.next(), columns.next())
        else {
            continue;
        };
        if !warned_complex && (is_complex_location(start) || is_complex_location(stop)) {
            warnings.push(
                "ncbi: complex feature location (join/complement/order) reduced to its outer \
                 bounds; use the GenBank flat file for full locations",
            );
            warned_complex = true;
        }

        let (a, b) = (coordinate(start), coordinate(stop));
        let (position, stop_position, strand) = if a > b { (b, a, "-") } else { (a, b, "+") };
        batch.features.push(FeatureAnnotation {
            seqid: seqid.clone(),
            source: source.to_string(),
            feature_type: key.to_string(),
            position,
            stop_position,
            score: None,
            strand: strand.to_string(),
            phase: (key == "CDS").then_some(0),
            attributes: Vec::new(),
        });
    }
    batch
}
