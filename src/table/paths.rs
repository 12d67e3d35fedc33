use std::path::{Path, PathBuf};

use super::TableError;

const STDIN_PATHS: [&str; 4] = ["-", "/dev/stdin", "/dev/fd/0", "/proc/self/fd/0"];

/// True when `path` names standard input.
pub fn is_stdin_path(path: &Path) -> bool {
    path.to_str().is_some_and(|p| STDIN_PATHS.contains(&p))
}

fn has_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

fn glob_could_match_stdin(pattern: &str) -> bool {
    pattern.starts_with('-')
        || pattern.contains("/dev/std")
        || pattern.contains("/dev/fd/")
        || pattern.contains("/proc/self/fd/")
}

/// Expand one pattern into sorted matching files. Plain paths pass through.
pub fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>, TableError> {
    if !has_glob(pattern) {
        return Ok(vec![PathBuf::from(pattern)]);
    }
    if glob_could_match_stdin(pattern) {
        return Err(TableError::Parameter(format!(
            "glob pattern '{pattern}' cannot include stdin paths"
        )));
    }
    let entries = glob::glob(pattern).map_err(|e| {
        TableError::Parameter(format!("invalid glob pattern '{pattern}': {e}"))
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => paths.push(path),
            Ok(_) => {}
            Err(e) => log::debug!("table: skipping unreadable glob entry: {e}"),
        }
    }
    if paths.is_empty() {
        return Err(TableError::NoFiles {
            pattern: pattern.to_string(),
        });
    }
    paths.sort();
    Ok(paths)
}

/// Resolved input paths of a reader table function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePaths {
    paths: Vec<PathBuf>,
    stdin: bool,
}

impl FilePaths {
    /// Expand a single path or a list of paths and patterns.
    pub fn parse<I, S>(inputs: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut paths = Vec::new();
        for input in inputs {
            paths.extend(expand_glob(input.as_ref())?);
        }
        if paths.is_empty() {
            return Err(TableError::Parameter(
                "at least one file path must be provided".into(),
            ));
        }
        let stdin = paths.iter().any(|p| is_stdin_path(p));
        Ok(Self { paths, stdin })
    }

    /// Expanded paths in the order they will be read.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Number of files.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Always false for a parsed value.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Whether any path reads standard input.
    pub fn uses_stdin(&self) -> bool {
        self.stdin
    }

    /// Worker cap: one per file, or one when reading stdin.
    pub fn max_workers(&self) -> usize {
        if self.stdin {
            1
        } else {
            self.paths.len().max(1)
        }
    }
}
