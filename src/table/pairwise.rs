//! Scalar pairwise alignment over two string columns.
//!
//! Rows are independent. With the `parallel` feature they are spread over
//! the rayon pool, each rayon job keeping its own aligner.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int32Array, StringArray, StructArray};
use arrow::buffer::NullBuffer;
use arrow::datatypes::{DataType, Field, Fields};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::align::{FullAlignment, PairwiseAligner};
use crate::error::Result;
use crate::sink::SinkError;

use super::params::AlignPairwiseParams;
use super::TableError;

fn check_inputs(
    query: &StringArray,
    subject: &StringArray,
    params: &AlignPairwiseParams,
) -> Result<()> {
    params.validate()?;
    if query.len() != subject.len() {
        return Err(TableError::Parameter(format!(
            "align_pairwise: query has {} rows but subject has {}",
            query.len(),
            subject.len()
        ))
        .into());
    }
    Ok(())
}

fn pair_at<'a>(
    query: &'a StringArray,
    subject: &'a StringArray,
    row: usize,
) -> Option<(&'a str, &'a str)> {
    if query.is_null(row) || subject.is_null(row) {
        return None;
    }
    Some((query.value(row), subject.value(row)))
}

#[cfg(feature = "parallel")]
fn collect_rows<A, T, I, R>(rows: usize, init: I, run: R) -> Vec<Option<T>>
where
    T: Send,
    I: Fn() -> A + Sync + Send,
    R: Fn(&mut A, usize) -> Option<T> + Sync + Send,
{
    (0..rows).into_par_iter().map_init(init, run).collect()
}

#[cfg(not(feature = "parallel"))]
fn collect_rows<A, T, I, R>(rows: usize, init: I, run: R) -> Vec<Option<T>>
where
    I: Fn() -> A,
    R: Fn(&mut A, usize) -> Option<T>,
{
    let mut state = init();
    (0..rows).map(|row| run(&mut state, row)).collect()
}

/// Apply `f` to every non-NULL pair; NULL inputs and failed rows give `None`.
fn map_rows<T, F>(
    query: &StringArray,
    subject: &StringArray,
    params: &AlignPairwiseParams,
    f: F,
) -> Vec<Option<T>>
where
    T: Send,
    F: Fn(&mut PairwiseAligner, &str, &str) -> Option<T> + Sync + Send,
{
    collect_rows(
        query.len(),
        || PairwiseAligner::new(params.config.clone()).ok(),
        |aligner: &mut Option<PairwiseAligner>, row| {
            let (q, s) = pair_at(query, subject, row)?;
            f(aligner.as_mut()?, q, s)
        },
    )
}

fn struct_array(
    fields: Vec<Field>,
    columns: Vec<ArrayRef>,
    valid: Vec<bool>,
) -> Result<StructArray> {
    let nulls = NullBuffer::from(valid);
    StructArray::try_new(Fields::from(fields), columns, Some(nulls))
        .map_err(|e| SinkError::Arrow(e).into())
}

/// `align_pairwise_score(query, subject)`: one `Int32` cost per row.
pub fn align_pairwise_score(
    query: &StringArray,
    subject: &StringArray,
    params: &AlignPairwiseParams,
) -> Result<Int32Array> {
    check_inputs(query, subject, params)?;
    let scores = map_rows(query, subject, params, |aligner, q, s| aligner.align_score(q, s));
    Ok(Int32Array::from(scores))
}

/// `align_pairwise_cigar(query, subject)`: struct of `score` and `cigar`.
pub fn align_pairwise_cigar(
    query: &StringArray,
    subject: &StringArray,
    params: &AlignPairwiseParams,
) -> Result<StructArray> {
    check_inputs(query, subject, params)?;
    let rows = map_rows(query, subject, params, |aligner, q, s| aligner.align_cigar(q, s));
    let valid: Vec<bool> = rows.iter().map(Option::is_some).collect();
    let scores: Int32Array = rows.iter().map(|r| r.as_ref().map(|a| a.score)).collect();
    let cigars: StringArray = rows
        .iter()
        .map(|r| r.as_ref().map(|a| a.cigar.as_str()))
        .collect();
    struct_array(
        vec![
            Field::new("score", DataType::Int32, true),
            Field::new("cigar", DataType::Utf8, true),
        ],
        vec![Arc::new(scores), Arc::new(cigars)],
        valid,
    )
}

/// `align_pairwise_full(query, subject)`: struct of `score`, `cigar`,
/// `query_aligned` and `subject_aligned`.
pub fn align_pairwise_full(
    query: &StringArray,
    subject: &StringArray,
    params: &AlignPairwiseParams,
) -> Result<StructArray> {
    check_inputs(query, subject, params)?;
    let rows: Vec<Option<FullAlignment>> = map_rows(query, subject, params, |aligner, q, s| {
        aligner.align_full(q, s).unwrap_or_else(|e| {
            log::debug!("align_pairwise_full: {e}");
            None
        })
    });
    let valid: Vec<bool> = rows.iter().map(Option::is_some).collect();
    let scores: Int32Array = rows.iter().map(|r| r.as_ref().map(|a| a.score)).collect();
    let text = |pick: fn(&FullAlignment) -> &str| -> StringArray {
        rows.iter().map(|r| r.as_ref().map(pick)).collect()
    };
    let cigars = text(|a| a.cigar.as_str());
    let query_aligned = text(|a| a.query_aligned.as_str());
    let subject_aligned = text(|a| a.subject_aligned.as_str());
    struct_array(
        vec![
            Field::new("score", DataType::Int32, true),
            Field::new("cigar", DataType::Utf8, true),
            Field::new("query_aligned", DataType::Utf8, true),
            Field::new("subject_aligned", DataType::Utf8, true),
        ],
        vec![
            Arc::new(scores),
            Arc::new(cigars),
            Arc::new(query_aligned),
            Arc::new(subject_aligned),
        ],
        valid,
    )
}
