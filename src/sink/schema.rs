use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema, SchemaRef};

/// Logical type of an output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// UTF-8 text
    Utf8,
    /// Boolean
    Bool,
    /// Unsigned 8-bit
    UInt8,
    /// Unsigned 16-bit
    UInt16,
    /// Signed 32-bit
    Int32,
    /// Signed 64-bit
    Int64,
    /// Double
    Float64,
    /// List of unsigned 8-bit values (quality scores)
    ListUInt8,
    /// List of doubles (spectrum arrays)
    ListFloat64,
}

impl ColumnType {
    /// Arrow type this column is materialised as.
    pub fn to_arrow(self) -> DataType {
        match self {
            ColumnType::Utf8 => DataType::Utf8,
            ColumnType::Bool => DataType::Boolean,
            ColumnType::UInt8 => DataType::UInt8,
            ColumnType::UInt16 => DataType::UInt16,
            ColumnType::Int32 => DataType::Int32,
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Float64 => DataType::Float64,
            ColumnType::ListUInt8 => {
                DataType::List(Arc::new(Field::new("item", DataType::UInt8, true)))
            }
            ColumnType::ListFloat64 => {
                DataType::List(Arc::new(Field::new("item", DataType::Float64, true)))
            }
        }
    }
}

/// One output column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name
    pub name: String,
    /// Column type
    pub ty: ColumnType,
    /// Whether NULL may be written
    pub nullable: bool,
}

impl ColumnSpec {
    /// Non-nullable column.
    pub fn required(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            nullable: false,
        }
    }

    /// Nullable column.
    pub fn nullable(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            nullable: true,
        }
    }
}

/// Ordered set of output columns produced by a table function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSchema {
    columns: Vec<ColumnSpec>,
}

impl OutputSchema {
    /// Schema from a column list.
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    /// Append a column, returning its index.
    pub fn push(&mut self, column: ColumnSpec) -> usize {
        self.columns.push(column);
        self.columns.len() - 1
    }

    /// Columns in order.
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True when there are no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Index of the named column.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Arrow schema.
    pub fn to_arrow(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(&c.name, c.ty.to_arrow(), c.nullable))
            .collect();
        Arc::new(Schema::new(fields))
    }
}
