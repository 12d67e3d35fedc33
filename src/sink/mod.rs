//! Columnar sink: the boundary every reader and aligner writes into.
//!
//! A sink receives one value per (column, row) plus `set_cardinality` once per
//! batch. Hosts adapt [`ColumnarSink`] to their own vector containers; this
//! crate ships [`ArrowSink`], which builds Arrow `RecordBatch`es, and
//! [`ParquetOutput`] for writing those batches to disk.

mod arrow_sink;
mod config;
mod parquet_output;
mod schema;

pub use arrow_sink::ArrowSink;
pub use config::{CompressionType, OutputConfig};
pub use parquet_output::ParquetOutput;
pub use schema::{ColumnSpec, ColumnType, OutputSchema};

use crate::error::ErrorKind;

/// Errors raised while writing into a sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Column index outside the schema.
    #[error("sink: unknown column {column} at row {row}")]
    UnknownColumn {
        /// Column index
        column: usize,
        /// Row being written
        row: usize,
    },

    /// Value type does not match the column type.
    #[error("sink: column '{name}' has type {expected:?} but received {received} at row {row}")]
    TypeMismatch {
        /// Column name
        name: String,
        /// Declared type
        expected: ColumnType,
        /// Type of the offered value
        received: &'static str,
        /// Row being written
        row: usize,
    },

    /// Rows must be written in order within a batch.
    #[error("sink: column '{name}' expected row {expected} but received row {row}")]
    OutOfOrder {
        /// Column name
        name: String,
        /// Next row the column can accept
        expected: usize,
        /// Row offered
        row: usize,
    },

    /// A column's length disagrees with the batch cardinality.
    #[error("sink: column '{name}' holds {len} rows but cardinality is {cardinality}")]
    LengthMismatch {
        /// Column name
        name: String,
        /// Rows written to the column
        len: usize,
        /// Declared cardinality
        cardinality: usize,
    },

    /// A value could not be converted for output.
    #[error("sink: invalid value in column '{name}' at row {row}: {reason}")]
    InvalidValue {
        /// Column name
        name: String,
        /// Row being written
        row: usize,
        /// What was wrong
        reason: String,
    },

    /// Error from the Arrow library.
    #[error("sink: arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from the Parquet library.
    #[error("sink: parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// I/O error while writing output.
    #[error("sink: I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SinkError::UnknownColumn { .. }
            | SinkError::TypeMismatch { .. }
            | SinkError::OutOfOrder { .. }
            | SinkError::LengthMismatch { .. } => ErrorKind::SizeMismatch,
            SinkError::InvalidValue { .. } => ErrorKind::MalformedInput,
            SinkError::Arrow(_) | SinkError::Parquet(_) | SinkError::Io(_) => {
                ErrorKind::EngineFailed
            }
        }
    }
}

/// Row-at-a-time columnar output.
///
/// Each batch is written as a sequence of `write_*` calls with rows counted
/// from zero, closed by [`set_cardinality`](ColumnarSink::set_cardinality).
/// List-valued columns support a capacity reservation followed by
/// per-row child appends.
pub trait ColumnarSink {
    /// Write a text value.
    fn write_str(&mut self, column: usize, row: usize, value: &str) -> Result<(), SinkError>;
    /// Write a boolean value.
    fn write_bool(&mut self, column: usize, row: usize, value: bool) -> Result<(), SinkError>;
    /// Write an unsigned 8-bit value.
    fn write_u8(&mut self, column: usize, row: usize, value: u8) -> Result<(), SinkError>;
    /// Write an unsigned 16-bit value.
    fn write_u16(&mut self, column: usize, row: usize, value: u16) -> Result<(), SinkError>;
    /// Write a signed 32-bit value.
    fn write_i32(&mut self, column: usize, row: usize, value: i32) -> Result<(), SinkError>;
    /// Write a signed 64-bit value.
    fn write_i64(&mut self, column: usize, row: usize, value: i64) -> Result<(), SinkError>;
    /// Write a double.
    fn write_f64(&mut self, column: usize, row: usize, value: f64) -> Result<(), SinkError>;
    /// Write NULL into a nullable column of any type.
    fn write_null(&mut self, column: usize, row: usize) -> Result<(), SinkError>;
    /// Reserve room for `additional` child values of a list column.
    fn reserve_list(&mut self, column: usize, additional: usize) -> Result<(), SinkError>;
    /// Append one list of octets as the value of `row`.
    fn append_list_u8(&mut self, column: usize, row: usize, values: &[u8])
        -> Result<(), SinkError>;
    /// Append one list of doubles as the value of `row`.
    fn append_list_f64(
        &mut self,
        column: usize,
        row: usize,
        values: &[f64],
    ) -> Result<(), SinkError>;
    /// Close the current batch with `n` rows.
    fn set_cardinality(&mut self, n: usize) -> Result<(), SinkError>;
}

/// Write an optional text value, mapping `None` to NULL.
pub fn write_opt_str(
    sink: &mut dyn ColumnarSink,
    column: usize,
    row: usize,
    value: Option<&str>,
) -> Result<(), SinkError> {
    match value {
        Some(v) => sink.write_str(column, row, v),
        None => sink.write_null(column, row),
    }
}

/// Write an optional i64, mapping `None` to NULL.
pub fn write_opt_i64(
    sink: &mut dyn ColumnarSink,
    column: usize,
    row: usize,
    value: Option<i64>,
) -> Result<(), SinkError> {
    match value {
        Some(v) => sink.write_i64(column, row, v),
        None => sink.write_null(column, row),
    }
}

/// Write an optional f64, mapping `None` to NULL.
pub fn write_opt_f64(
    sink: &mut dyn ColumnarSink,
    column: usize,
    row: usize,
    value: Option<f64>,
) -> Result<(), SinkError> {
    match value {
        Some(v) => sink.write_f64(column, row, v),
        None => sink.write_null(column, row),
    }
}
