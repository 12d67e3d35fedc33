//! Tree and placement files.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use serde::Deserialize;

use crate::error::Location;

use super::placement::Placement;
use super::tree::NewickTree;
use super::NewickError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn open(path: &Path) -> Result<File, NewickError> {
    File::open(path).map_err(|source| NewickError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a whole file as text, inflating it when it starts with the gzip
/// magic.
fn read_text(path: &Path) -> Result<String, NewickError> {
    let io_err = |source| NewickError::Open {
        path: path.to_path_buf(),
        source,
    };
    let mut raw = Vec::new();
    open(path)?.read_to_end(&mut raw).map_err(io_err)?;
    let bytes = if raw.starts_with(&GZIP_MAGIC) {
        let mut inflated = Vec::new();
        MultiGzDecoder::new(raw.as_slice())
            .read_to_end(&mut inflated)
            .map_err(io_err)?;
        inflated
    } else {
        raw
    };
    String::from_utf8(bytes).map_err(|e| NewickError::Parse {
        reason: format!("file is not valid UTF-8: {e}"),
        location: Location::byte(path, e.utf8_error().valid_up_to() as u64),
    })
}

/// Parse the tree stored in `path`, plain or gzip-compressed.
pub fn read_tree_file(path: impl AsRef<Path>) -> Result<NewickTree, NewickError> {
    let path = path.as_ref();
    let text = read_text(path)?;
    NewickTree::parse(&text).map_err(|e| e.with_path(path))
}

/// Read placements from a tab-separated file with a header naming
/// `fragment_id`, `edge_id`, `like_weight_ratio`, `distal_length` and
/// `pendant_length`. Extra columns are ignored.
pub fn read_placements_tsv(path: impl AsRef<Path>) -> Result<Vec<Placement>, NewickError> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(BufReader::new(open(path)?));
    let mut placements = Vec::new();
    for (row, record) in reader.deserialize::<Placement>().enumerate() {
        let placement = record.map_err(|e| {
            let line = e.position().map_or(row as u64 + 1, |pos| pos.line());
            NewickError::Placements {
                reason: e.to_string(),
                location: Location::record(path, line),
            }
        })?;
        placements.push(placement);
    }
    log::debug!("newick: {} placements from {}", placements.len(), path.display());
    Ok(placements)
}

#[derive(Debug, Deserialize)]
struct Jplace {
    fields: Vec<String>,
    placements: Vec<JplaceEntry>,
}

#[derive(Debug, Deserialize)]
struct JplaceEntry {
    p: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    n: Vec<String>,
    #[serde(default)]
    nm: Vec<(String, serde_json::Value)>,
}

/// Read placements from a jplace document.
///
/// Columns are located through the `fields` header. Each fragment named
/// under `n` or `nm` takes the first row of its entry's `p` list.
pub fn read_placements_jplace(path: impl AsRef<Path>) -> Result<Vec<Placement>, NewickError> {
    let path = path.as_ref();
    let text = read_text(path)?;
    let doc: Jplace = serde_json::from_str(&text).map_err(|e| NewickError::Placements {
        reason: format!("invalid jplace document: {e}"),
        location: Location::record(path, e.line() as u64),
    })?;

    let column = |name: &str| {
        doc.fields
            .iter()
            .position(|f| f == name)
            .ok_or_else(|| NewickError::Placements {
                reason: format!("jplace fields lack '{name}'"),
                location: Location::file(path),
            })
    };
    let edge_col = column("edge_num")?;
    let lwr_col = column("like_weight_ratio")?;
    let distal_col = column("distal_length")?;
    let pendant_col = column("pendant_length")?;

    let mut placements = Vec::new();
    for (entry_no, entry) in doc.placements.iter().enumerate() {
        let bad = |reason: String| NewickError::Placements {
            reason,
            location: Location::record(path, entry_no as u64),
        };
        let Some(first) = entry.p.first() else {
            return Err(bad("placement entry has an empty 'p' list".to_string()));
        };
        let number = |col: usize, field: &str| {
            first
                .get(col)
                .and_then(serde_json::Value::as_f64)
                .ok_or_else(|| bad(format!("'{field}' is missing or not a number")))
        };
        let edge_id = first
            .get(edge_col)
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| bad("'edge_num' is missing or not an integer".to_string()))?;
        let like_weight_ratio = number(lwr_col, "like_weight_ratio")?;
        let distal_length = number(distal_col, "distal_length")?;
        let pendant_length = number(pendant_col, "pendant_length")?;

        let names = entry
            .n
            .iter()
            .cloned()
            .chain(entry.nm.iter().map(|(name, _)| name.clone()));
        for fragment_id in names {
            placements.push(Placement {
                fragment_id,
                edge_id,
                like_weight_ratio,
                distal_length,
                pendant_length,
            });
        }
    }
    log::debug!("newick: {} placements from {}", placements.len(), path.display());
    Ok(placements)
}

/// Read placements from `path`, choosing jplace for `.jplace` (optionally
/// `.gz`) files and tab-separated text otherwise.
pub fn read_placements(path: impl AsRef<Path>) -> Result<Vec<Placement>, NewickError> {
    let path = path.as_ref();
    let name = path.to_string_lossy();
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    if name.ends_with(".jplace") {
        read_placements_jplace(path)
    } else {
        read_placements_tsv(path)
    }
}
