//! Newick phylogenetic trees.
//!
//! Trees are stored as an arena of [`Node`]s addressed by index. Parsing is
//! strict, serialisation round-trips labels, branch lengths and the `{n}`
//! edge identifiers used by jplace placements, and
//! [`NewickTree::insert_fully_resolved`] grafts placed fragments onto their
//! edges.

mod parser;
mod placement;
mod source;
mod tree;
mod writer;

use std::io;
use std::path::PathBuf;

use crate::error::{open_kind, ErrorKind, Location};

pub use placement::Placement;
pub use source::{read_placements, read_placements_jplace, read_placements_tsv, read_tree_file};
pub use tree::{NewickTree, Node, NodeInput, NodeRow};

/// Largest node count a tree may hold.
pub const MAX_NODES: usize = u32::MAX as usize;

/// Errors raised while parsing, building or mutating trees.
#[derive(Debug, thiserror::Error)]
pub enum NewickError {
    /// The Newick text is not well formed.
    #[error("newick: {reason} at {location}")]
    Parse {
        /// What was wrong
        reason: String,
        /// Character offset (and file, when known)
        location: Location,
    },

    /// Node rows do not describe a single rooted tree.
    #[error("newick: cannot build tree: {0}")]
    Build(String),

    /// The tree would exceed [`MAX_NODES`].
    #[error("newick: tree too large: {0} nodes exceeds the maximum of {MAX_NODES}")]
    TooLarge(usize),

    /// A node index is outside the tree or the operation is not allowed on it.
    #[error("newick: invalid node {index}: {reason}")]
    InvalidNode {
        /// Offending index
        index: usize,
        /// What was wrong
        reason: &'static str,
    },

    /// A placement names an edge the tree does not carry.
    #[error("newick: unknown edge_id {edge_id} for fragment '{fragment_id}'")]
    UnknownEdge {
        /// Edge id from the placement
        edge_id: i64,
        /// Fragment being placed
        fragment_id: String,
    },

    /// A placement's distal length is negative or longer than its edge.
    #[error(
        "newick: distal_length {distal_length} outside edge of length {edge_length} for fragment '{fragment_id}'"
    )]
    DistalOutOfRange {
        /// Fragment being placed
        fragment_id: String,
        /// Requested distal length
        distal_length: f64,
        /// Length of the target edge
        edge_length: f64,
    },

    /// A placement value is otherwise invalid.
    #[error("newick: invalid placement for fragment '{fragment_id}': {reason}")]
    InvalidPlacement {
        /// Fragment being placed
        fragment_id: String,
        /// What was wrong
        reason: String,
    },

    /// A tree or placement file could not be opened or read.
    #[error("newick: cannot read file: {source} at {}", path.display())]
    Open {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// A placement file is not valid TSV or jplace.
    #[error("newick: {reason} at {location}")]
    Placements {
        /// What was wrong
        reason: String,
        /// File and record
        location: Location,
    },
}

impl NewickError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            NewickError::Parse { .. }
            | NewickError::Build(_)
            | NewickError::TooLarge(_)
            | NewickError::Placements { .. } => ErrorKind::MalformedInput,
            NewickError::InvalidNode { .. } | NewickError::InvalidPlacement { .. } => {
                ErrorKind::ParameterError
            }
            NewickError::UnknownEdge { .. } => ErrorKind::UnknownEdge,
            NewickError::DistalOutOfRange { .. } => ErrorKind::DistalOutOfRange,
            NewickError::Open { source, .. } => open_kind(source),
        }
    }

    pub(crate) fn with_path(self, path: &std::path::Path) -> Self {
        match self {
            NewickError::Parse { reason, location } => NewickError::Parse {
                reason,
                location: Location {
                    path: Some(path.to_path_buf()),
                    offset: location.offset,
                },
            },
            other => other,
        }
    }
}
