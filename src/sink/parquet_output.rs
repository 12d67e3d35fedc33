use std::fs::File;
use std::path::Path;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use super::config::OutputConfig;
use super::SinkError;

/// Writes record batches produced by an [`ArrowSink`](super::ArrowSink) to a
/// Parquet file.
pub struct ParquetOutput {
    writer: ArrowWriter<File>,
    rows_written: usize,
}

impl ParquetOutput {
    /// Create `path` with the given schema and output settings.
    pub fn create(
        path: impl AsRef<Path>,
        schema: SchemaRef,
        config: &OutputConfig,
    ) -> Result<Self, SinkError> {
        let file = File::create(path.as_ref())?;
        let writer = ArrowWriter::try_new(file, schema, Some(config.to_writer_properties()))?;
        Ok(Self {
            writer,
            rows_written: 0,
        })
    }

    /// Append one batch.
    pub fn write(&mut self, batch: &RecordBatch) -> Result<(), SinkError> {
        self.writer.write(batch)?;
        self.rows_written += batch.num_rows();
        Ok(())
    }

    /// Append every batch in order.
    pub fn write_all(&mut self, batches: &[RecordBatch]) -> Result<(), SinkError> {
        for batch in batches {
            self.write(batch)?;
        }
        Ok(())
    }

    /// Rows written so far.
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Flush and close the file, returning the row count.
    pub fn finish(self) -> Result<usize, SinkError> {
        self.writer.close()?;
        Ok(self.rows_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ArrowSink, ColumnSpec, ColumnType, ColumnarSink, OutputSchema};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        let schema = OutputSchema::new(vec![ColumnSpec::required("x", ColumnType::Float64)]);
        let mut sink = ArrowSink::new(schema);
        for row in 0..3 {
            sink.write_f64(0, row, row as f64).unwrap();
        }
        sink.set_cardinality(3).unwrap();

        let mut out = ParquetOutput::create(&path, sink.arrow_schema(), &OutputConfig::default())
            .unwrap();
        out.write_all(sink.batches()).unwrap();
        assert_eq!(out.finish().unwrap(), 3);

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 3);
    }
}
