//! Stand-in used when the `minimap2` feature is off.

use std::path::Path;

use crate::align::region::Region;
use crate::align::{AlignerError, AlignmentSubject};

use super::{Minimap2Config, ENGINE};

fn unavailable() -> AlignerError {
    AlignerError::Unavailable {
        engine: ENGINE,
        reason: "built without the `minimap2` feature".to_string(),
    }
}

pub(super) struct Options;

impl Options {
    pub(super) fn new(_config: &Minimap2Config) -> Result<Self, AlignerError> {
        Ok(Options)
    }
}

/// No value of this type can exist without the engine.
pub(super) enum Index {}

impl Index {
    pub(super) fn build(
        _options: &Options,
        _subjects: &[AlignmentSubject],
    ) -> Result<Self, AlignerError> {
        Err(unavailable())
    }

    pub(super) fn load(_options: &Options, _path: &Path) -> Result<Self, AlignerError> {
        Err(unavailable())
    }

    pub(super) fn dump(&self, _path: &Path) -> Result<(), AlignerError> {
        match *self {}
    }

    pub(super) fn names(&self) -> &[String] {
        match *self {}
    }
}

pub(super) struct ThreadBuffer;

impl ThreadBuffer {
    pub(super) fn new() -> Result<Self, AlignerError> {
        Ok(ThreadBuffer)
    }
}

pub(super) fn is_index_file(_path: &Path) -> bool {
    false
}

pub(super) fn map_single(
    index: &Index,
    _buffer: &mut ThreadBuffer,
    _name: &str,
    _seq: &str,
) -> Result<Vec<Region>, AlignerError> {
    match *index {}
}

pub(super) fn map_pair(
    index: &Index,
    _buffer: &mut ThreadBuffer,
    _name: &str,
    _seq1: &str,
    _seq2: &str,
) -> Result<[Vec<Region>; 2], AlignerError> {
    match *index {}
}
