use std::sync::Arc;

use arrow::array::{
    ArrayBuilder, ArrayRef, ArrowPrimitiveType, BooleanBuilder, Float64Builder, Int32Builder,
    Int64Builder, ListArray, PrimitiveArray, StringBuilder, UInt16Builder, UInt8Builder,
};
use arrow::buffer::{NullBuffer, OffsetBuffer, ScalarBuffer};
use arrow::datatypes::{ArrowNativeType, DataType, Field, Float64Type, SchemaRef, UInt8Type};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};

use super::schema::{ColumnSpec, ColumnType, OutputSchema};
use super::{ColumnarSink, SinkError};

/// Child values, offsets and validity of one list column.
#[derive(Debug)]
struct ListBuffer<T> {
    values: Vec<T>,
    offsets: Vec<i32>,
    validity: Vec<bool>,
}

impl<T: ArrowNativeType> ListBuffer<T> {
    fn new() -> Self {
        Self {
            values: Vec::new(),
            offsets: vec![0],
            validity: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.validity.len()
    }

    fn append(&mut self, values: &[T]) -> Result<(), usize> {
        let end = self.values.len() + values.len();
        let end = i32::try_from(end).map_err(|_| end)?;
        self.values.extend_from_slice(values);
        self.offsets.push(end);
        self.validity.push(true);
        Ok(())
    }

    fn append_null(&mut self) {
        let last = self.offsets.last().copied().unwrap_or(0);
        self.offsets.push(last);
        self.validity.push(false);
    }

    fn finish<P>(&mut self, item: DataType) -> Result<ArrayRef, SinkError>
    where
        P: ArrowPrimitiveType<Native = T>,
    {
        let values = std::mem::take(&mut self.values);
        let offsets = std::mem::replace(&mut self.offsets, vec![0]);
        let validity = std::mem::take(&mut self.validity);
        let nulls = if validity.iter().all(|v| *v) {
            None
        } else {
            Some(NullBuffer::from(validity))
        };
        let child: PrimitiveArray<P> = PrimitiveArray::new(ScalarBuffer::from(values), None);
        let array = ListArray::try_new(
            Arc::new(Field::new("item", item, true)),
            OffsetBuffer::new(ScalarBuffer::from(offsets)),
            Arc::new(child),
            nulls,
        )?;
        Ok(Arc::new(array))
    }
}

#[derive(Debug)]
enum ColumnBuffer {
    Utf8(StringBuilder),
    Bool(BooleanBuilder),
    UInt8(UInt8Builder),
    UInt16(UInt16Builder),
    Int32(Int32Builder),
    Int64(Int64Builder),
    Float64(Float64Builder),
    ListUInt8(ListBuffer<u8>),
    ListFloat64(ListBuffer<f64>),
}

impl ColumnBuffer {
    fn new(ty: ColumnType, capacity: usize) -> Self {
        match ty {
            ColumnType::Utf8 => Self::Utf8(StringBuilder::with_capacity(capacity, capacity * 16)),
            ColumnType::Bool => Self::Bool(BooleanBuilder::with_capacity(capacity)),
            ColumnType::UInt8 => Self::UInt8(UInt8Builder::with_capacity(capacity)),
            ColumnType::UInt16 => Self::UInt16(UInt16Builder::with_capacity(capacity)),
            ColumnType::Int32 => Self::Int32(Int32Builder::with_capacity(capacity)),
            ColumnType::Int64 => Self::Int64(Int64Builder::with_capacity(capacity)),
            ColumnType::Float64 => Self::Float64(Float64Builder::with_capacity(capacity)),
            ColumnType::ListUInt8 => Self::ListUInt8(ListBuffer::new()),
            ColumnType::ListFloat64 => Self::ListFloat64(ListBuffer::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Utf8(b) => b.len(),
            Self::Bool(b) => b.len(),
            Self::UInt8(b) => b.len(),
            Self::UInt16(b) => b.len(),
            Self::Int32(b) => b.len(),
            Self::Int64(b) => b.len(),
            Self::Float64(b) => b.len(),
            Self::ListUInt8(b) => b.len(),
            Self::ListFloat64(b) => b.len(),
        }
    }

    fn append_null(&mut self) {
        match self {
            Self::Utf8(b) => b.append_null(),
            Self::Bool(b) => b.append_null(),
            Self::UInt8(b) => b.append_null(),
            Self::UInt16(b) => b.append_null(),
            Self::Int32(b) => b.append_null(),
            Self::Int64(b) => b.append_null(),
            Self::Float64(b) => b.append_null(),
            Self::ListUInt8(b) => b.append_null(),
            Self::ListFloat64(b) => b.append_null(),
        }
    }

    fn finish(&mut self) -> Result<ArrayRef, SinkError> {
        Ok(match self {
            Self::Utf8(b) => Arc::new(b.finish()),
            Self::Bool(b) => Arc::new(b.finish()),
            Self::UInt8(b) => Arc::new(b.finish()),
            Self::UInt16(b) => Arc::new(b.finish()),
            Self::Int32(b) => Arc::new(b.finish()),
            Self::Int64(b) => Arc::new(b.finish()),
            Self::Float64(b) => Arc::new(b.finish()),
            Self::ListUInt8(b) => b.finish::<UInt8Type>(DataType::UInt8)?,
            Self::ListFloat64(b) => b.finish::<Float64Type>(DataType::Float64)?,
        })
    }
}

/// [`ColumnarSink`] that accumulates rows into Arrow builders and produces
/// one `RecordBatch` per [`set_cardinality`](ColumnarSink::set_cardinality).
#[derive(Debug)]
pub struct ArrowSink {
    schema: OutputSchema,
    arrow_schema: SchemaRef,
    buffers: Vec<ColumnBuffer>,
    batches: Vec<RecordBatch>,
}

impl ArrowSink {
    /// Sink for `schema`.
    pub fn new(schema: OutputSchema) -> Self {
        Self::with_capacity(schema, 0)
    }

    /// Sink whose builders start with room for `capacity` rows.
    pub fn with_capacity(schema: OutputSchema, capacity: usize) -> Self {
        let buffers = schema
            .columns()
            .iter()
            .map(|c| ColumnBuffer::new(c.ty, capacity))
            .collect();
        let arrow_schema = schema.to_arrow();
        Self {
            schema,
            arrow_schema,
            buffers,
            batches: Vec::new(),
        }
    }

    /// Output schema.
    pub fn schema(&self) -> &OutputSchema {
        &self.schema
    }

    /// Arrow form of the output schema.
    pub fn arrow_schema(&self) -> SchemaRef {
        self.arrow_schema.clone()
    }

    /// Completed batches so far.
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Take completed batches, leaving the sink ready for more.
    pub fn take_batches(&mut self) -> Vec<RecordBatch> {
        std::mem::take(&mut self.batches)
    }

    /// Total rows across completed batches.
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    fn slot(
        &mut self,
        column: usize,
        row: usize,
    ) -> Result<(&ColumnSpec, &mut ColumnBuffer), SinkError> {
        let spec = self
            .schema
            .columns()
            .get(column)
            .ok_or(SinkError::UnknownColumn { column, row })?;
        let buffer = self
            .buffers
            .get_mut(column)
            .ok_or(SinkError::UnknownColumn { column, row })?;
        let expected = buffer.len();
        if row != expected {
            return Err(SinkError::OutOfOrder {
                name: spec.name.clone(),
                expected,
                row,
            });
        }
        Ok((spec, buffer))
    }
}

fn mismatch(spec: &ColumnSpec, received: &'static str, row: usize) -> SinkError {
    SinkError::TypeMismatch {
        name: spec.name.clone(),
        expected: spec.ty,
        received,
        row,
    }
}

fn list_overflow(spec: &ColumnSpec, row: usize, len: usize) -> SinkError {
    SinkError::InvalidValue {
        name: spec.name.clone(),
        row,
        reason: format!("list child length {len} exceeds 32-bit offsets"),
    }
}

impl ColumnarSink for ArrowSink {
    fn write_str(&mut self, column: usize, row: usize, value: &str) -> Result<(), SinkError> {
        match self.slot(column, row)? {
            (_, ColumnBuffer::Utf8(b)) => b.append_value(value),
            (spec, _) => return Err(mismatch(spec, "text", row)),
        }
        Ok(())
    }

    fn write_bool(&mut self, column: usize, row: usize, value: bool) -> Result<(), SinkError> {
        match self.slot(column, row)? {
            (_, ColumnBuffer::Bool(b)) => b.append_value(value),
            (spec, _) => return Err(mismatch(spec, "bool", row)),
        }
        Ok(())
    }

    fn write_u8(&mut self, column: usize, row: usize, value: u8) -> Result<(), SinkError> {
        match self.slot(column, row)? {
            (_, ColumnBuffer::UInt8(b)) => b.append_value(value),
            (spec, _) => return Err(mismatch(spec, "u8", row)),
        }
        Ok(())
    }

    fn write_u16(&mut self, column: usize, row: usize, value: u16) -> Result<(), SinkError> {
        match self.slot(column, row)? {
            (_, ColumnBuffer::UInt16(b)) => b.append_value(value),
            (spec, _) => return Err(mismatch(spec, "u16", row)),
        }
        Ok(())
    }

    fn write_i32(&mut self, column: usize, row: usize, value: i32) -> Result<(), SinkError> {
        match self.slot(column, row)? {
            (_, ColumnBuffer::Int32(b)) => b.append_value(value),
            (spec, _) => return Err(mismatch(spec, "i32", row)),
        }
        Ok(())
    }

    fn write_i64(&mut self, column: usize, row: usize, value: i64) -> Result<(), SinkError> {
        match self.slot(column, row)? {
            (_, ColumnBuffer::Int64(b)) => b.append_value(value),
            (spec, _) => return Err(mismatch(spec, "i64", row)),
        }
        Ok(())
    }

    fn write_f64(&mut self, column: usize, row: usize, value: f64) -> Result<(), SinkError> {
        match self.slot(column, row)? {
            (_, ColumnBuffer::Float64(b)) => b.append_value(value),
            (spec, _) => return Err(mismatch(spec, "f64", row)),
        }
        Ok(())
    }

    fn write_null(&mut self, column: usize, row: usize) -> Result<(), SinkError> {
        let (spec, buffer) = self.slot(column, row)?;
        if !spec.nullable {
            return Err(SinkError::InvalidValue {
                name: spec.name.clone(),
                row,
                reason: "NULL written to a non-nullable column".to_string(),
            });
        }
        buffer.append_null();
        Ok(())
    }

    fn reserve_list(&mut self, column: usize, additional: usize) -> Result<(), SinkError> {
        let row = self.buffers.get(column).map(ColumnBuffer::len).unwrap_or(0);
        match self.slot(column, row)? {
            (_, ColumnBuffer::ListUInt8(b)) => b.values.reserve(additional),
            (_, ColumnBuffer::ListFloat64(b)) => b.values.reserve(additional),
            (spec, _) => return Err(mismatch(spec, "list", row)),
        }
        Ok(())
    }

    fn append_list_u8(
        &mut self,
        column: usize,
        row: usize,
        values: &[u8],
    ) -> Result<(), SinkError> {
        match self.slot(column, row)? {
            (spec, ColumnBuffer::ListUInt8(b)) => b
                .append(values)
                .map_err(|len| list_overflow(spec, row, len)),
            (spec, _) => Err(mismatch(spec, "list<u8>", row)),
        }
    }

    fn append_list_f64(
        &mut self,
        column: usize,
        row: usize,
        values: &[f64],
    ) -> Result<(), SinkError> {
        match self.slot(column, row)? {
            (spec, ColumnBuffer::ListFloat64(b)) => b
                .append(values)
                .map_err(|len| list_overflow(spec, row, len)),
            (spec, _) => Err(mismatch(spec, "list<f64>", row)),
        }
    }

    fn set_cardinality(&mut self, n: usize) -> Result<(), SinkError> {
        for (spec, buffer) in self.schema.columns().iter().zip(self.buffers.iter()) {
            if buffer.len() != n {
                return Err(SinkError::LengthMismatch {
                    name: spec.name.clone(),
                    len: buffer.len(),
                    cardinality: n,
                });
            }
        }
        let arrays = self
            .buffers
            .iter_mut()
            .map(ColumnBuffer::finish)
            .collect::<Result<Vec<_>, _>>()?;
        let options = RecordBatchOptions::new().with_row_count(Some(n));
        let batch = RecordBatch::try_new_with_options(self.arrow_schema.clone(), arrays, &options)?;
        log::debug!("sink: closed batch of {} rows", n);
        self.batches.push(batch);
        Ok(())
    }
}
