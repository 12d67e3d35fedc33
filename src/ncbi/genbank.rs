use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::Location;
use crate::sink::{
    write_opt_i64, write_opt_str, ColumnSpec, ColumnType, ColumnarSink, OutputSchema, SinkError,
};

use super::NcbiError;

/// Summary of one `GBSeq` record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenBankMetadata {
    /// `accession.version`, or the primary accession when unversioned
    pub accession: String,
    /// Number after the last `.` of the accession, 0 when absent
    pub version: i32,
    /// `GBSeq_definition`
    pub description: String,
    /// `GBSeq_organism`
    pub organism: String,
    /// From the first `taxon:N` cross-reference
    pub taxonomy_id: Option<i64>,
    /// `GBSeq_length`, 0 when absent or not a number
    pub length: i64,
    /// `GBSeq_moltype`
    pub molecule_type: String,
    /// `GBSeq_update-date` as `YYYY-MM-DD`; `None` when absent or invalid
    pub update_date: Option<String>,
}

/// Column positions of [`GenBankMetadata::schema`].
pub mod columns {
    #![allow(missing_docs)]
    pub const ACCESSION: usize = 0;
    pub const VERSION: usize = 1;
    pub const DESCRIPTION: usize = 2;
    pub const ORGANISM: usize = 3;
    pub const TAXONOMY_ID: usize = 4;
    pub const LENGTH: usize = 5;
    pub const MOLECULE_TYPE: usize = 6;
    pub const UPDATE_DATE: usize = 7;
    pub const FILEPATH: usize = 8;
}

impl GenBankMetadata {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Output schema of a metadata table.
    pub fn schema(include_filepath: bool) -> OutputSchema {
        let mut schema = OutputSchema::new(vec![
            ColumnSpec::required("accession", ColumnType::Utf8),
            ColumnSpec::required("version", ColumnType::Int32),
            ColumnSpec::nullable("description", ColumnType::Utf8),
            ColumnSpec::nullable("organism", ColumnType::Utf8),
            ColumnSpec::nullable("taxonomy_id", ColumnType::Int64),
            ColumnSpec::required("length", ColumnType::Int64),
            ColumnSpec::nullable("molecule_type", ColumnType::Utf8),
            ColumnSpec::nullable("update_date", ColumnType::Utf8),
        ]);
        if include_filepath {
            schema.push(ColumnSpec::required("filepath", ColumnType::Utf8));
        }
        schema
    }

    /// Write `records` into `sink` and close the batch.
    pub fn emit(
        records: &[GenBankMetadata],
        sink: &mut dyn ColumnarSink,
        filepath: Option<&str>,
    ) -> Result<(), SinkError> {
        fn non_empty(s: &str) -> Option<&str> {
            (!s.is_empty()).then_some(s)
        }
        for (row, record) in records.iter().enumerate() {
            sink.write_str(columns::ACCESSION, row, &record.accession)?;
            sink.write_i32(columns::VERSION, row, record.version)?;
            write_opt_str(sink, columns::DESCRIPTION, row, non_empty(&record.description))?;
            write_opt_str(sink, columns::ORGANISM, row, non_empty(&record.organism))?;
            write_opt_i64(sink, columns::TAXONOMY_ID, row, record.taxonomy_id)?;
            sink.write_i64(columns::LENGTH, row, record.length)?;
            write_opt_str(sink, columns::MOLECULE_TYPE, row, non_empty(&record.molecule_type))?;
            write_opt_str(sink, columns::UPDATE_DATE, row, record.update_date.as_deref())?;
            if let Some(path) = filepath {
                sink.write_str(columns::FILEPATH, row, path)?;
            }
        }
        sink.set_cardinality(records.len())
    }
}

/// `GBSeq_*` element whose text is being collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    AccessionVersion,
    PrimaryAccession,
    Definition,
    Organism,
    Length,
    MoleculeType,
    UpdateDate,
}

impl Field {
    fn from_element(name: &[u8]) -> Option<Self> {
        Some(match name {
            b"GBSeq_accession-version" => Field::AccessionVersion,
            b"GBSeq_primary-accession" => Field::PrimaryAccession,
            b"GBSeq_definition" => Field::Definition,
            b"GBSeq_organism" => Field::Organism,
            b"GBSeq_length" => Field::Length,
            b"GBSeq_moltype" => Field::MoleculeType,
            b"GBSeq_update-date" => Field::UpdateDate,
            _ => return None,
        })
    }
}

/// Raw text of one record, first occurrence of each field wins.
#[derive(Debug, Default)]
struct RawRecord {
    accession_version: Option<String>,
    primary_accession: Option<String>,
    definition: Option<String>,
    organism: Option<String>,
    length: Option<String>,
    molecule_type: Option<String>,
    update_date: Option<String>,
    taxonomy_id: Option<i64>,
}

impl RawRecord {
    fn slot(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::AccessionVersion => &mut self.accession_version,
            Field::PrimaryAccession => &mut self.primary_accession,
            Field::Definition => &mut self.definition,
            Field::Organism => &mut self.organism,
            Field::Length => &mut self.length,
            Field::MoleculeType => &mut self.molecule_type,
            Field::UpdateDate => &mut self.update_date,
        }
    }

    fn finish(self) -> GenBankMetadata {
        let accession = self
            .accession_version
            .filter(|a| !a.is_empty())
            .or(self.primary_accession)
            .unwrap_or_default();
        GenBankMetadata {
            version: accession_version(&accession),
            accession,
            description: self.definition.unwrap_or_default(),
            organism: self.organism.unwrap_or_default(),
            taxonomy_id: self.taxonomy_id,
            length: self
                .length
                .and_then(|l| l.trim().parse().ok())
                .unwrap_or(0),
            molecule_type: self.molecule_type.unwrap_or_default(),
            update_date: self.update_date.as_deref().and_then(iso_date),
        }
    }
}

fn accession_version(accession: &str) -> i32 {
    accession
        .rsplit_once('.')
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0)
}

/// Number following `taxon:` in a `db_xref` value.
fn taxon_id(text: &str) -> Option<i64> {
    let (_, rest) = text.split_once("taxon:")?;
    let end = rest.bytes().position(|b| !b.is_ascii_digit()).unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// `DD-MON-YYYY` to `YYYY-MM-DD`, rejecting impossible dates.
fn iso_date(text: &str) -> Option<String> {
    const MONTHS: [&str; 12] = [
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ];
    const DAYS_IN_MONTH: [u32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

    let mut parts = text.trim().split('-');
    let (day, month, year) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some()
        || !(1..=2).contains(&day.len())
        || month.len() != 3
        || year.len() != 4
        || !day.bytes().chain(year.bytes()).all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let day: u32 = day.parse().ok()?;
    let year: u32 = year.parse().ok()?;
    let month = MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(month))?;
    if !(1900..=2100).contains(&year) || day == 0 || day > DAYS_IN_MONTH[month] {
        return None;
    }
    Some(format!("{year:04}-{:02}-{day:02}", month + 1))
}

/// Every `GBSeq` record of a GenBank XML document, in order.
///
/// Field elements outside any `GBSeq` are gathered into one trailing
/// record, so a bare fragment still yields a row. Empty input yields none.
pub fn parse_genbank_records(xml: &str) -> Result<Vec<GenBankMetadata>, NcbiError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<RawRecord> = None;
    let mut field: Option<Field> = None;
    loop {
        let event = reader.read_event().map_err(|source| NcbiError::Xml {
            source,
            location: Location::char(reader.error_position() as u64),
        })?;
        match event {
            Event::Start(e) => {
                let name = e.local_name();
                if name.as_ref() == b"GBSeq" {
                    if let Some(done) = current.take() {
                        records.push(done.finish());
                    }
                    current = Some(RawRecord::default());
                }
                field = Field::from_element(name.as_ref());
            }
            Event::End(e) => {
                if e.local_name().as_ref() == b"GBSeq" {
                    if let Some(done) = current.take() {
                        records.push(done.finish());
                    }
                }
                field = None;
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|source| NcbiError::Xml {
                    source,
                    location: Location::char(reader.buffer_position() as u64),
                })?;
                let record = current.get_or_insert_with(RawRecord::default);
                if let Some(field) = field {
                    let slot = record.slot(field);
                    if slot.is_none() {
                        *slot = Some(text.into_owned());
                    }
                } else if record.taxonomy_id.is_none() {
                    record.taxonomy_id = taxon_id(&text);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if let Some(done) = current.take() {
        let done = done.finish();
        if !done.is_empty() {
            records.push(done);
        }
    }
    Ok(records)
}

/// Metadata of the first record in a GenBank XML document.
///
/// Empty input or a document without any `GBSeq` fields gives the default
/// (empty) metadata.
pub fn parse_genbank_xml(xml: &str) -> Result<GenBankMetadata, NcbiError> {
    Ok(parse_genbank_records(xml)?
        .into_iter()
        .next()
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const LAMBDA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE GBSet PUBLIC "-//NCBI//NCBI GBSeq/EN" "https://www.ncbi.nlm.nih.gov/dtd/NCBI_GBSeq.dtd">
<GBSet>
  <GBSeq>
    <GBSeq_locus>NC_001416</GBSeq_locus>
    <GBSeq_length>48502</GBSeq_length>
    <GBSeq_moltype>DNA</GBSeq_moltype>
    <GBSeq_update-date>05-jun-2023</GBSeq_update-date>
    <GBSeq_definition>Escherichia phage Lambda, complete genome</GBSeq_definition>
    <GBSeq_primary-accession>NC_001416</GBSeq_primary-accession>
    <GBSeq_accession-version>NC_001416.1</GBSeq_accession-version>
    <GBSeq_organism>Escherichia phage Lambda</GBSeq_organism>
    <GBSeq_feature-table>
      <GBFeature>
        <GBFeature_key>source</GBFeature_key>
        <GBFeature_quals>
          <GBQualifier>
            <GBQualifier_name>db_xref</GBQualifier_name>
            <GBQualifier_value>taxon:10710</GBQualifier_value>
          </GBQualifier>
        </GBFeature_quals>
      </GBFeature>
    </GBSeq_feature-table>
  </GBSeq>
  <GBSeq>
    <GBSeq_length>29903</GBSeq_length>
    <GBSeq_primary-accession>NC_045512</GBSeq_primary-accession>
    <GBSeq_update-date>31-FEB-2020</GBSeq_update-date>
    <GBSeq_organism>Severe acute respiratory syndrome coronavirus 2 &amp; friends</GBSeq_organism>
  </GBSeq>
</GBSet>"#;

    #[test]
    fn test_first_record() {
        let meta = parse_genbank_xml(LAMBDA).unwrap();
        assert_eq!(meta.accession, "NC_001416.1");
        assert_eq!(meta.version, 1);
        assert_eq!(meta.description, "Escherichia phage Lambda, complete genome");
        assert_eq!(meta.organism, "Escherichia phage Lambda");
        assert_eq!(meta.taxonomy_id, Some(10710));
        assert_eq!(meta.length, 48502);
        assert_eq!(meta.molecule_type, "DNA");
        assert_eq!(meta.update_date.as_deref(), Some("2023-06-05"));
    }

    #[test]
    fn test_every_record() {
        let records = parse_genbank_records(LAMBDA).unwrap();
        assert_eq!(records.len(), 2);
        let second = &records[1];
        assert_eq!(second.accession, "NC_045512");
        assert_eq!(second.version, 0);
        assert_eq!(second.organism, "Severe acute respiratory syndrome coronavirus 2 & friends");
        assert_eq!(second.taxonomy_id, None);
        assert_eq!(second.update_date, None);
    }

    #[test]
    fn test_empty_and_fieldless_input() {
        assert_eq!(parse_genbank_xml("").unwrap(), GenBankMetadata::default());
        assert!(parse_genbank_records("<eSearchResult/>").unwrap().is_empty());
    }

    #[test]
    fn test_mismatched_tags_are_malformed() {
        let err = parse_genbank_xml("<GBSet><GBSeq></GBSet>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
    }

    #[test]
    fn test_dates() {
        assert_eq!(iso_date("1-JAN-2000").as_deref(), Some("2000-01-01"));
        assert_eq!(iso_date("29-Feb-2024").as_deref(), Some("2024-02-29"));
        assert_eq!(iso_date("31-APR-2024"), None);
        assert_eq!(iso_date("01-XYZ-2024"), None);
        assert_eq!(iso_date("01-JAN-1850"), None);
        assert_eq!(iso_date("2024-01-01"), None);
    }
}
