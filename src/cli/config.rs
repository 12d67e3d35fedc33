//! TOML configuration file support.
//!
//! Engine and output settings can live in a config file instead of flags:
//!
//! ```toml
//! # biocolumns.toml
//! [minimap2]
//! preset = "map-ont"
//! max_secondary = 2
//!
//! [bowtie2]
//! preset = "very-sensitive"
//! threads = 4
//!
//! [pairwise]
//! mismatch = 3
//!
//! [output]
//! compression = "zstd"
//! compression_level = 9
//! ```
//!
//! Command-line flags override values from the file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use biocolumns::align::{Bowtie2Config, Minimap2Config, PairwiseConfig};
use biocolumns::sink::OutputConfig;

/// File read from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "biocolumns.toml";

/// Root of a `biocolumns.toml` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub minimap2: Minimap2Config,
    pub bowtie2: Bowtie2Config,
    pub pairwise: PairwiseConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Load `path`, or `biocolumns.toml` when present, or the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    log::info!("using {}", fallback.display());
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }
}
