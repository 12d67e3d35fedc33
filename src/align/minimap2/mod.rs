//! In-process minimap2 aligner.
//!
//! The engine itself is linked only with the `minimap2` feature. Without it
//! the aligner can still be configured, but building or loading an index
//! fails with [`ErrorKind::EngineUnavailable`](crate::error::ErrorKind).

#[cfg(feature = "minimap2")]
mod engine;
#[cfg(not(feature = "minimap2"))]
#[path = "unavailable.rs"]
mod engine;

use std::path::Path;
use std::sync::Arc;

use crate::batch::{AlignmentBatch, SequenceBatch};

use super::region::{paired_end_rows, single_end_rows};
use super::{check_subjects, Aligner, AlignerError, AlignmentSubject};

pub(crate) const ENGINE: &str = "minimap2";

/// Options consumed by [`Minimap2Aligner`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Minimap2Config {
    /// Preset name (`sr`, `map-ont`, `asm5`, ...)
    pub preset: String,
    /// Secondary hits kept per query
    pub max_secondary: usize,
    /// Emit `=`/`X` instead of `M`
    pub eqx: bool,
    /// k-mer size override, 0 keeps the preset's
    pub k: u32,
    /// Minimizer window override, 0 keeps the preset's
    pub w: u32,
}

impl Default for Minimap2Config {
    fn default() -> Self {
        Self {
            preset: "sr".to_string(),
            max_secondary: 5,
            eqx: true,
            k: 0,
            w: 0,
        }
    }
}

impl Minimap2Config {
    /// Check the ranges the engine accepts.
    pub fn validate(&self) -> Result<(), AlignerError> {
        if self.preset.is_empty() {
            return Err(AlignerError::parameter(ENGINE, "preset must not be empty"));
        }
        if self.k > 28 {
            return Err(AlignerError::parameter(
                ENGINE,
                format!("k-mer size must be <= 28 (got {})", self.k),
            ));
        }
        if self.w >= 256 {
            return Err(AlignerError::parameter(
                ENGINE,
                format!("window size must be < 256 (got {})", self.w),
            ));
        }
        Ok(())
    }
}

/// An index shared read-only by several aligners.
///
/// Each aligner that attaches it keeps its own thread buffer, so aligners on
/// different threads may query one shared index concurrently.
pub struct SharedMinimap2Index {
    index: engine::Index,
}

impl SharedMinimap2Index {
    /// Build a shareable index over `subjects`.
    pub fn build(
        config: &Minimap2Config,
        subjects: &[AlignmentSubject],
    ) -> Result<Arc<Self>, AlignerError> {
        config.validate()?;
        check_subjects(ENGINE, subjects)?;
        let options = engine::Options::new(config)?;
        let index = engine::Index::build(&options, subjects)?;
        log::info!("minimap2: built shared index over {} subjects", subjects.len());
        Ok(Arc::new(Self { index }))
    }

    /// Load a shareable index from an `.mmi` file.
    pub fn load(config: &Minimap2Config, path: impl AsRef<Path>) -> Result<Arc<Self>, AlignerError> {
        config.validate()?;
        let options = engine::Options::new(config)?;
        let index = engine::Index::load(&options, path.as_ref())?;
        log::info!(
            "minimap2: loaded shared index {} ({} subjects)",
            path.as_ref().display(),
            index.names().len()
        );
        Ok(Arc::new(Self { index }))
    }

    /// Reference names in index order.
    pub fn subject_names(&self) -> &[String] {
        self.index.names()
    }
}

impl std::fmt::Debug for SharedMinimap2Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedMinimap2Index")
            .field("subjects", &self.index.names().len())
            .finish()
    }
}

enum IndexSlot {
    Empty,
    Owned(engine::Index),
    Shared(Arc<SharedMinimap2Index>),
}

/// minimap2 aligner with an owned or shared index.
///
/// One instance must not be used from two threads at once; give each worker
/// its own aligner and share the index through [`SharedMinimap2Index`].
pub struct Minimap2Aligner {
    config: Minimap2Config,
    options: engine::Options,
    index: IndexSlot,
    buffer: engine::ThreadBuffer,
}

impl Minimap2Aligner {
    /// Aligner with no index yet.
    pub fn new(config: Minimap2Config) -> Result<Self, AlignerError> {
        config.validate()?;
        let options = engine::Options::new(&config)?;
        Ok(Self {
            config,
            options,
            index: IndexSlot::Empty,
            buffer: engine::ThreadBuffer::new()?,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &Minimap2Config {
        &self.config
    }

    /// True when `path` holds a serialised minimap2 index.
    pub fn is_index_file(path: impl AsRef<Path>) -> bool {
        engine::is_index_file(path.as_ref())
    }

    /// Write the owned index to `path` as an `.mmi` file.
    pub fn save_index(&self, path: impl AsRef<Path>) -> Result<(), AlignerError> {
        match &self.index {
            IndexSlot::Owned(index) => {
                index.dump(path.as_ref())?;
                log::info!("minimap2: index written to {}", path.as_ref().display());
                Ok(())
            }
            IndexSlot::Shared(_) => Err(AlignerError::parameter(
                ENGINE,
                "cannot save a shared index through an aligner; save requires an owned index",
            )),
            IndexSlot::Empty => Err(AlignerError::parameter(ENGINE, "no index to save")),
        }
    }

    /// Use `shared` for alignment, dropping any owned index.
    pub fn attach_shared_index(&mut self, shared: Arc<SharedMinimap2Index>) {
        self.index = IndexSlot::Shared(shared);
    }

    /// Release the shared index, if any.
    pub fn detach_shared_index(&mut self) {
        if matches!(self.index, IndexSlot::Shared(_)) {
            self.index = IndexSlot::Empty;
        }
    }

    /// True when an owned or shared index is present.
    pub fn has_index(&self) -> bool {
        !matches!(self.index, IndexSlot::Empty)
    }

    /// Reference names of the active index.
    pub fn subject_names(&self) -> &[String] {
        match &self.index {
            IndexSlot::Empty => &[],
            IndexSlot::Owned(index) => index.names(),
            IndexSlot::Shared(shared) => shared.subject_names(),
        }
    }

    fn active_index(&self) -> Result<&engine::Index, AlignerError> {
        match &self.index {
            IndexSlot::Owned(index) => Ok(index),
            IndexSlot::Shared(shared) => Ok(&shared.index),
            IndexSlot::Empty => Err(AlignerError::parameter(
                ENGINE,
                "no index built; call build_index or attach a shared index first",
            )),
        }
    }
}

impl Aligner for Minimap2Aligner {
    fn build_index(&mut self, subjects: &[AlignmentSubject]) -> Result<(), AlignerError> {
        check_subjects(ENGINE, subjects)?;
        let index = engine::Index::build(&self.options, subjects)?;
        log::debug!("minimap2: built index over {} subjects", subjects.len());
        self.index = IndexSlot::Owned(index);
        Ok(())
    }

    fn load_index(&mut self, path: &Path) -> Result<(), AlignerError> {
        let index = engine::Index::load(&self.options, path)?;
        log::info!(
            "minimap2: loaded index {} ({} subjects)",
            path.display(),
            index.names().len()
        );
        self.index = IndexSlot::Owned(index);
        Ok(())
    }

    fn align(
        &mut self,
        queries: &SequenceBatch,
        output: &mut AlignmentBatch,
    ) -> Result<(), AlignerError> {
        if queries.is_empty() {
            return Ok(());
        }
        let max_secondary = self.config.max_secondary;
        // Borrow the index and the buffer separately.
        let index = match &self.index {
            IndexSlot::Owned(index) => index,
            IndexSlot::Shared(shared) => &shared.index,
            IndexSlot::Empty => return self.active_index().map(|_| ()),
        };
        let names = index.names();
        for row in 0..queries.len() {
            let read_id = &queries.read_ids[row];
            let seq1 = &queries.sequences1[row];
            let seq2 = queries
                .sequences2
                .get(row)
                .filter(|s| queries.is_paired && !s.is_empty());
            match seq2 {
                Some(seq2) => {
                    if seq1.is_empty() && seq2.is_empty() {
                        continue;
                    }
                    let [hits1, hits2] =
                        engine::map_pair(index, &mut self.buffer, read_id, seq1, seq2)?;
                    paired_end_rows(
                        read_id,
                        [hits1.as_slice(), hits2.as_slice()],
                        names,
                        max_secondary,
                        output,
                    );
                }
                None => {
                    if seq1.is_empty() {
                        continue;
                    }
                    let hits = engine::map_single(index, &mut self.buffer, read_id, seq1)?;
                    single_end_rows(read_id, &hits, names, max_secondary, output);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_and_validation() {
        let config = Minimap2Config::default();
        assert_eq!(config.preset, "sr");
        assert_eq!(config.max_secondary, 5);
        assert!(config.eqx);
        assert!(config.validate().is_ok());
        let bad_k = Minimap2Config {
            k: 29,
            ..Minimap2Config::default()
        };
        assert!(bad_k.validate().unwrap_err().to_string().contains("<= 28"));
        let bad_w = Minimap2Config {
            w: 256,
            ..Minimap2Config::default()
        };
        assert!(bad_w.validate().is_err());
    }

    #[test]
    fn test_align_without_index() {
        let mut aligner = Minimap2Aligner::new(Minimap2Config::default()).unwrap();
        assert!(!aligner.has_index());
        let mut queries = SequenceBatch::unpaired();
        queries.push("q".into(), None, "ACGT".into(), None);
        let err = aligner.align(&queries, &mut AlignmentBatch::new()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ParameterError);
        assert!(aligner.save_index("/tmp/never.mmi").is_err());
    }

    #[cfg(not(feature = "minimap2"))]
    #[test]
    fn test_engine_unavailable() {
        let mut aligner = Minimap2Aligner::new(Minimap2Config::default()).unwrap();
        let err = aligner
            .build_single_index(&AlignmentSubject::new("ref", "ACGTACGT"))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::EngineUnavailable);
        assert!(!Minimap2Aligner::is_index_file("/nonexistent.mmi"));
    }

    #[cfg(feature = "minimap2")]
    mod engine_tests {
        use super::*;
        use crate::batch::flags;

        // 100 bp pseudo-random reference without long repeats.
        const REFERENCE: &str = "ATGCGTACGTTAGCCTAGGCTAACGTTGCAATCGGATCCGTAGCTAGGCATCGATCGGCTAAGCTTGCAGTCCAGTTAGCGATCGTACGATCGGCTAGTA";

        fn subject() -> AlignmentSubject {
            AlignmentSubject::new("ref1", REFERENCE)
        }

        #[test]
        fn test_exact_prefix_match() {
            let mut aligner = Minimap2Aligner::new(Minimap2Config::default()).unwrap();
            aligner.build_single_index(&subject()).unwrap();
            let mut queries = SequenceBatch::unpaired();
            queries.push("q1".into(), None, REFERENCE[..52].to_string(), None);
            let mut out = AlignmentBatch::new();
            aligner.align(&queries, &mut out).unwrap();
            let hit = out
                .records
                .iter()
                .find(|r| r.reference == "ref1" && r.position == 1)
                .expect("expected a hit at position 1");
            assert!(hit.cigar.contains('='));
            assert!(!hit.cigar.contains('M'));
            assert_eq!(hit.flags & flags::UNMAPPED, 0);
        }

        #[test]
        fn test_shared_index_and_save() {
            let shared =
                SharedMinimap2Index::build(&Minimap2Config::default(), &[subject()]).unwrap();
            let mut a = Minimap2Aligner::new(Minimap2Config::default()).unwrap();
            a.attach_shared_index(Arc::clone(&shared));
            assert_eq!(a.subject_names(), ["ref1".to_string()]);
            assert!(a.save_index("/tmp/never.mmi").is_err());
            a.detach_shared_index();
            assert!(!a.has_index());

            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("ref.mmi");
            a.build_single_index(&subject()).unwrap();
            a.save_index(&path).unwrap();
            assert!(Minimap2Aligner::is_index_file(&path));
            let mut b = Minimap2Aligner::new(Minimap2Config::default()).unwrap();
            b.load_index(&path).unwrap();
            assert_eq!(b.subject_names(), ["ref1".to_string()]);
        }
    }
}
