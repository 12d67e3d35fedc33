//! Parquet output and the end-of-run summary.

use anyhow::{Context, Result};
use arrow::record_batch::RecordBatch;
use std::fmt;
use std::path::{Path, PathBuf};

use biocolumns::sink::{OutputConfig, OutputSchema, ParquetOutput};

/// Write `batches` to `path`; the schema is taken from the producing function
/// so that an empty result still yields a valid file.
pub fn write_parquet(
    path: &Path,
    schema: &OutputSchema,
    batches: &[RecordBatch],
    config: &OutputConfig,
) -> Result<usize> {
    let mut output = ParquetOutput::create(path, schema.to_arrow(), config)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    output
        .write_all(batches)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    let rows = output.finish().context("Failed to finalize Parquet file")?;
    log::info!("wrote {rows} rows to {}", path.display());
    Ok(rows)
}

/// What a command produced.
#[derive(Debug)]
pub struct Summary {
    pub command: &'static str,
    pub output: PathBuf,
    pub count: usize,
    pub unit: &'static str,
}

impl Summary {
    pub fn new(command: &'static str, output: &Path, count: usize, unit: &'static str) -> Self {
        Self {
            command,
            output: output.to_path_buf(),
            count,
            unit,
        }
    }

    /// Print to stdout, in colour when built with `colorized_output`.
    pub fn print(&self) {
        #[cfg(feature = "colorized_output")]
        {
            println!("{}", self.format_colored());
        }

        #[cfg(not(feature = "colorized_output"))]
        {
            println!("{self}");
        }
    }

    #[cfg(feature = "colorized_output")]
    fn format_colored(&self) -> String {
        use console::{style, Emoji};

        static OK: Emoji<'_, '_> = Emoji("✓", "[OK]");

        format!(
            "[{}] {}: {} {} -> {}",
            OK,
            style(self.command).bold().cyan(),
            style(self.count).green(),
            self.unit,
            self.output.display()
        )
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} {} -> {}",
            self.command,
            self.count,
            self.unit,
            self.output.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biocolumns::sink::{ColumnSpec, ColumnType};
    use parquet::file::reader::{FileReader, SerializedFileReader};

    #[test]
    fn test_write_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.parquet");
        let schema = OutputSchema::new(vec![ColumnSpec::required("read_id", ColumnType::Utf8)]);
        let rows = write_parquet(&path, &schema, &[], &OutputConfig::default()).unwrap();
        assert_eq!(rows, 0);

        let reader = SerializedFileReader::new(std::fs::File::open(&path).unwrap()).unwrap();
        let descr = reader.metadata().file_metadata().schema_descr();
        assert_eq!(descr.num_columns(), 1);
        assert_eq!(descr.column(0).name(), "read_id");
    }

    #[test]
    fn test_summary_text() {
        let summary = Summary::new("read-fastx", Path::new("out.parquet"), 3, "rows");
        assert_eq!(summary.to_string(), "read-fastx: 3 rows -> out.parquet");
    }
}
