use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use serde::Deserialize;

/// Parquet compression for CLI output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    /// ZSTD at the given level
    Zstd(i32),
    /// Snappy
    Snappy,
    /// No compression
    Uncompressed,
}

impl Default for CompressionType {
    fn default() -> Self {
        Self::Zstd(3)
    }
}

impl CompressionType {
    /// Parse a user-facing name (`zstd`, `snappy`, `none`).
    pub fn parse(name: &str, level: i32) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "zstd" | "zst" => Some(Self::Zstd(level)),
            "snappy" => Some(Self::Snappy),
            "none" | "uncompressed" => Some(Self::Uncompressed),
            _ => None,
        }
    }
}

/// Output file settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Compression codec name
    pub compression: String,
    /// ZSTD level
    pub compression_level: i32,
    /// Rows per Parquet row group
    pub row_group_size: usize,
    /// Write column chunk statistics
    pub write_statistics: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            compression: "zstd".to_string(),
            compression_level: 3,
            row_group_size: 64 * 1024,
            write_statistics: true,
        }
    }
}

impl OutputConfig {
    /// Resolved compression, falling back to the default on unknown names.
    pub fn compression_type(&self) -> CompressionType {
        CompressionType::parse(&self.compression, self.compression_level).unwrap_or_default()
    }

    pub(super) fn to_writer_properties(&self) -> WriterProperties {
        let compression = match self.compression_type() {
            CompressionType::Zstd(level) => {
                Compression::ZSTD(ZstdLevel::try_new(level).unwrap_or(ZstdLevel::default()))
            }
            CompressionType::Snappy => Compression::SNAPPY,
            CompressionType::Uncompressed => Compression::UNCOMPRESSED,
        };

        let statistics = if self.write_statistics {
            EnabledStatistics::Chunk
        } else {
            EnabledStatistics::None
        };

        WriterProperties::builder()
            .set_compression(compression)
            .set_max_row_group_size(self.row_group_size.max(1))
            .set_statistics_enabled(statistics)
            .set_created_by(format!("biocolumns {}", env!("CARGO_PKG_VERSION")))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_parse() {
        assert_eq!(CompressionType::parse("ZSTD", 5), Some(CompressionType::Zstd(5)));
        assert_eq!(CompressionType::parse("none", 0), Some(CompressionType::Uncompressed));
        assert_eq!(CompressionType::parse("lz4", 0), None);
    }

    #[test]
    fn test_unknown_compression_falls_back() {
        let cfg = OutputConfig {
            compression: "brotli".into(),
            ..Default::default()
        };
        assert_eq!(cfg.compression_type(), CompressionType::Zstd(3));
    }
}
