//! Input relations handed to the orchestrators as Arrow record batches.

use std::collections::BTreeMap;

use arrow::array::{Array, Float64Array, Int64Array, ListArray, StringArray, UInt8Array};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;

use crate::align::AlignmentSubject;
use crate::batch::SequenceBatch;
use crate::newick::{NodeInput, Placement};
use crate::quality::{QualOffset, QualityScore};

use super::TableError;

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Option<&'a dyn Array> {
    let index = batch
        .schema()
        .fields()
        .iter()
        .position(|f| f.name().eq_ignore_ascii_case(name))?;
    Some(batch.column(index).as_ref())
}

fn downcast<'a, T: 'static>(
    array: &'a dyn Array,
    relation: &str,
    name: &str,
    expected: &str,
) -> Result<&'a T, TableError> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| TableError::Schema {
        relation: relation.to_string(),
        reason: format!("column '{name}' must be {expected}, found {}", array.data_type()),
    })
}

fn missing(relation: &str, name: &str) -> TableError {
    TableError::Schema {
        relation: relation.to_string(),
        reason: format!("missing required column '{name}'"),
    }
}

/// Get a required Utf8 column by name (case-insensitive).
pub(crate) fn get_utf8_column<'a>(
    batch: &'a RecordBatch,
    relation: &str,
    name: &str,
) -> Result<&'a StringArray, TableError> {
    let array = column(batch, name).ok_or_else(|| missing(relation, name))?;
    downcast(array, relation, name, "VARCHAR")
}

/// Get an optional Utf8 column by name.
pub(crate) fn get_optional_utf8_column<'a>(
    batch: &'a RecordBatch,
    relation: &str,
    name: &str,
) -> Result<Option<&'a StringArray>, TableError> {
    column(batch, name)
        .map(|a| downcast(a, relation, name, "VARCHAR"))
        .transpose()
}

/// Get a required Int64 column by name.
pub(crate) fn get_int64_column<'a>(
    batch: &'a RecordBatch,
    relation: &str,
    name: &str,
) -> Result<&'a Int64Array, TableError> {
    let array = column(batch, name).ok_or_else(|| missing(relation, name))?;
    downcast(array, relation, name, "BIGINT")
}

/// Get an optional Int64 column by name.
pub(crate) fn get_optional_int64_column<'a>(
    batch: &'a RecordBatch,
    relation: &str,
    name: &str,
) -> Result<Option<&'a Int64Array>, TableError> {
    column(batch, name)
        .map(|a| downcast(a, relation, name, "BIGINT"))
        .transpose()
}

/// Get a required Float64 column by name.
pub(crate) fn get_float64_column<'a>(
    batch: &'a RecordBatch,
    relation: &str,
    name: &str,
) -> Result<&'a Float64Array, TableError> {
    let array = column(batch, name).ok_or_else(|| missing(relation, name))?;
    downcast(array, relation, name, "DOUBLE")
}

/// Get an optional Float64 column by name.
pub(crate) fn get_optional_float64_column<'a>(
    batch: &'a RecordBatch,
    relation: &str,
    name: &str,
) -> Result<Option<&'a Float64Array>, TableError> {
    column(batch, name)
        .map(|a| downcast(a, relation, name, "DOUBLE"))
        .transpose()
}

/// Get an optional list-of-UInt8 column by name.
pub(crate) fn get_optional_qual_column<'a>(
    batch: &'a RecordBatch,
    relation: &str,
    name: &str,
) -> Result<Option<&'a ListArray>, TableError> {
    let Some(array) = column(batch, name) else {
        return Ok(None);
    };
    let list: &ListArray = downcast(array, relation, name, "UTINYINT[]")?;
    if list.value_type() != DataType::UInt8 {
        return Err(TableError::Schema {
            relation: relation.to_string(),
            reason: format!("column '{name}' must be UTINYINT[], found {}", list.data_type()),
        });
    }
    Ok(Some(list))
}

/// Value of a non-nullable text cell.
pub(crate) fn required_str<'a>(
    array: &'a StringArray,
    relation: &str,
    name: &str,
    row: usize,
) -> Result<&'a str, TableError> {
    if array.is_null(row) {
        return Err(TableError::NullValue {
            relation: relation.to_string(),
            column: name.to_string(),
            row: row as u64,
        });
    }
    Ok(array.value(row))
}

/// Optional f64 from a nullable column.
pub(crate) fn get_optional_f64(array: Option<&Float64Array>, row: usize) -> Option<f64> {
    array.and_then(|a| if a.is_null(row) { None } else { Some(a.value(row)) })
}

/// Optional i64 from a nullable column.
pub(crate) fn get_optional_i64(array: Option<&Int64Array>, row: usize) -> Option<i64> {
    array.and_then(|a| if a.is_null(row) { None } else { Some(a.value(row)) })
}

fn qual_at(
    list: Option<&ListArray>,
    relation: &str,
    name: &str,
    row: usize,
) -> Result<Option<QualityScore>, TableError> {
    let Some(list) = list else {
        return Ok(None);
    };
    if list.is_null(row) {
        return Ok(None);
    }
    let values = list.value(row);
    let values = values
        .as_any()
        .downcast_ref::<UInt8Array>()
        .ok_or_else(|| TableError::Schema {
            relation: relation.to_string(),
            reason: format!("column '{name}' must be UTINYINT[]"),
        })?;
    let phred: Vec<u8> = values.iter().map(|v| v.unwrap_or(0)).collect();
    QualityScore::from_phred(&phred, QualOffset::Phred33)
        .map(Some)
        .map_err(|e| TableError::Parameter(format!("{relation}: {name} at row {row}: {e}")))
}

/// Sequence rows (`read_id`, `sequence1`, optional `comment`, `sequence2`, `qual1`,
/// `qual2`) regrouped into batches of at most `batch_size` records.
///
/// The relation is paired when `sequence2` exists and is non-NULL on every
/// row; a column that is NULL on some rows only is rejected.
pub fn sequence_batches(
    batches: &[RecordBatch],
    relation: &str,
    batch_size: usize,
) -> Result<Vec<SequenceBatch>, TableError> {
    let batch_size = batch_size.max(1);
    let mut paired: Option<bool> = None;
    let mut out: Vec<SequenceBatch> = Vec::new();
    let mut row_base = 0usize;
    for batch in batches {
        let ids = get_utf8_column(batch, relation, "read_id")?;
        let seq1 = get_utf8_column(batch, relation, "sequence1")?;
        let seq2 = get_optional_utf8_column(batch, relation, "sequence2")?;
        let qual1 = get_optional_qual_column(batch, relation, "qual1")?;
        let qual2 = get_optional_qual_column(batch, relation, "qual2")?;
        let comments = get_optional_utf8_column(batch, relation, "comment")?;

        let batch_paired = match seq2 {
            None => false,
            Some(s) if s.null_count() == s.len() => false,
            Some(s) if s.null_count() == 0 => true,
            Some(_) => {
                return Err(TableError::Schema {
                    relation: relation.to_string(),
                    reason: "column 'sequence2' is NULL on some rows only".into(),
                })
            }
        };
        if batch.num_rows() > 0 {
            match paired {
                None => paired = Some(batch_paired),
                Some(p) if p != batch_paired => {
                    return Err(TableError::Schema {
                        relation: relation.to_string(),
                        reason: "cannot mix paired and unpaired rows".into(),
                    })
                }
                Some(_) => {}
            }
        }

        for row in 0..batch.num_rows() {
            let global = row_base + row;
            let needs_new = out.last().map_or(true, |b| b.len() >= batch_size);
            if needs_new {
                out.push(if batch_paired {
                    SequenceBatch::paired()
                } else {
                    SequenceBatch::unpaired()
                });
            }
            let Some(current) = out.last_mut() else {
                continue;
            };
            let id = required_str(ids, relation, "read_id", row)
                .map_err(|e| e.at_row(global))?
                .to_string();
            let s1 = required_str(seq1, relation, "sequence1", row)
                .map_err(|e| e.at_row(global))?
                .to_string();
            let q1 = qual_at(qual1, relation, "qual1", row)?;
            let comment = comments
                .filter(|c| !c.is_null(row))
                .map(|c| c.value(row).to_string());
            match seq2.filter(|_| batch_paired) {
                Some(seq2) => {
                    let q2 = qual_at(qual2, relation, "qual2", row)?;
                    current.push_pair(id, comment, (s1, q1), (seq2.value(row).to_string(), q2));
                }
                None => current.push(id, comment, s1, q1),
            }
        }
        row_base += batch.num_rows();
    }
    Ok(out)
}

/// Subjects (`read_id` as the name, `sequence1`) of a reference table.
pub fn subjects(batches: &[RecordBatch], relation: &str) -> Result<Vec<AlignmentSubject>, TableError> {
    let mut out = Vec::new();
    let mut row_base = 0usize;
    for batch in batches {
        if column(batch, "sequence2").is_some() {
            return Err(TableError::Schema {
                relation: relation.to_string(),
                reason: "has a sequence2 column but subjects cannot be paired-end".into(),
            });
        }
        let ids = get_utf8_column(batch, relation, "read_id")?;
        let seqs = get_utf8_column(batch, relation, "sequence1")?;
        for row in 0..batch.num_rows() {
            let global = row_base + row;
            let name = required_str(ids, relation, "read_id", row).map_err(|e| e.at_row(global))?;
            let seq = required_str(seqs, relation, "sequence1", row).map_err(|e| e.at_row(global))?;
            out.push(AlignmentSubject::new(name, seq));
        }
        row_base += batch.num_rows();
    }
    if out.is_empty() {
        return Err(TableError::Parameter(format!("subject table '{relation}' is empty")));
    }
    Ok(out)
}

/// Tree node rows as produced by `read_newick`.
pub fn node_inputs(batches: &[RecordBatch], relation: &str) -> Result<Vec<NodeInput>, TableError> {
    let mut out = Vec::new();
    let mut row_base = 0usize;
    for batch in batches {
        let ids = get_int64_column(batch, relation, "node_index")?;
        let parents = get_optional_int64_column(batch, relation, "parent_index")?;
        let names = get_optional_utf8_column(batch, relation, "name")?;
        let lengths = get_optional_float64_column(batch, relation, "branch_length")?;
        let edges = get_optional_int64_column(batch, relation, "edge_id")?;
        for row in 0..batch.num_rows() {
            if ids.is_null(row) {
                return Err(TableError::NullValue {
                    relation: relation.to_string(),
                    column: "node_index".into(),
                    row: (row_base + row) as u64,
                });
            }
            out.push(NodeInput {
                node_id: ids.value(row),
                parent_id: get_optional_i64(parents, row),
                name: names
                    .filter(|n| !n.is_null(row))
                    .map(|n| n.value(row).to_string())
                    .unwrap_or_default(),
                branch_length: get_optional_f64(lengths, row).unwrap_or(f64::NAN),
                edge_id: get_optional_i64(edges, row),
            });
        }
        row_base += batch.num_rows();
    }
    Ok(out)
}

/// Placement rows (`fragment_id`, `edge_id`, `like_weight_ratio`,
/// `distal_length`, `pendant_length`).
pub fn placements(batches: &[RecordBatch], relation: &str) -> Result<Vec<Placement>, TableError> {
    let mut out = Vec::new();
    let mut row_base = 0usize;
    for batch in batches {
        let fragments = get_utf8_column(batch, relation, "fragment_id")?;
        let edges = get_int64_column(batch, relation, "edge_id")?;
        let lwr = get_float64_column(batch, relation, "like_weight_ratio")?;
        let distal = get_float64_column(batch, relation, "distal_length")?;
        let pendant = get_float64_column(batch, relation, "pendant_length")?;
        for row in 0..batch.num_rows() {
            let global = (row_base + row) as u64;
            let null = |column: &str| TableError::NullValue {
                relation: relation.to_string(),
                column: column.to_string(),
                row: global,
            };
            if edges.is_null(row) {
                return Err(null("edge_id"));
            }
            if distal.is_null(row) {
                return Err(null("distal_length"));
            }
            if pendant.is_null(row) {
                return Err(null("pendant_length"));
            }
            out.push(Placement {
                fragment_id: required_str(fragments, relation, "fragment_id", row)
                    .map_err(|e| e.at_row(row_base + row))?
                    .to_string(),
                edge_id: edges.value(row),
                like_weight_ratio: if lwr.is_null(row) { 0.0 } else { lwr.value(row) },
                distal_length: distal.value(row),
                pendant_length: pendant.value(row),
            });
        }
        row_base += batch.num_rows();
    }
    Ok(out)
}

/// `(name, length)` pairs from the first two columns of a reference table.
pub fn reference_lengths(
    batches: &[RecordBatch],
    relation: &str,
) -> Result<Vec<(String, u64)>, TableError> {
    let mut out = Vec::new();
    for batch in batches {
        if batch.num_columns() < 2 {
            return Err(TableError::Schema {
                relation: relation.to_string(),
                reason: "needs a name column and a length column".into(),
            });
        }
        let names: &StringArray = downcast(batch.column(0).as_ref(), relation, "name", "VARCHAR")?;
        let lengths: &Int64Array =
            downcast(batch.column(1).as_ref(), relation, "length", "BIGINT")?;
        for row in 0..batch.num_rows() {
            let name = required_str(names, relation, "name", row)?;
            if lengths.is_null(row) || lengths.value(row) < 0 {
                return Err(TableError::Parameter(format!(
                    "{relation}: length of reference '{name}' must be a non-negative integer"
                )));
            }
            out.push((name.to_string(), lengths.value(row) as u64));
        }
    }
    Ok(out)
}

/// Read ids grouped by `shard_name`, largest shard first (ties by name).
pub fn read_to_shard(
    batches: &[RecordBatch],
    relation: &str,
) -> Result<Vec<(String, Vec<String>)>, TableError> {
    let mut shards: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut row_base = 0usize;
    for batch in batches {
        let ids = get_utf8_column(batch, relation, "read_id")?;
        let names = get_utf8_column(batch, relation, "shard_name")?;
        for row in 0..batch.num_rows() {
            let global = row_base + row;
            let shard = required_str(names, relation, "shard_name", row).map_err(|e| e.at_row(global))?;
            let id = required_str(ids, relation, "read_id", row).map_err(|e| e.at_row(global))?;
            shards
                .entry(shard.to_string())
                .or_default()
                .push(id.to_string());
        }
        row_base += batch.num_rows();
    }
    if shards.is_empty() {
        return Err(TableError::Parameter(format!("read_to_shard table '{relation}' is empty")));
    }
    let mut ordered: Vec<_> = shards.into_iter().collect();
    ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
    Ok(ordered)
}
