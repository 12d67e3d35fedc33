//! # mzML Reader
//!
//! Streaming reader for mzML, the HUPO-PSI XML format for mass spectrometry
//! data. Only the elements below are tracked; everything else is skipped
//! without affecting nesting limits.
//!
//! ```text
//! mzML
//! ├── referenceableParamGroupList
//! │   └── referenceableParamGroup* (cvParam*)
//! └── run
//!     ├── spectrumList
//!     │   └── spectrum*
//!     │       ├── cvParam*
//!     │       ├── scanList / scan / scanWindow
//!     │       ├── precursorList / precursor
//!     │       │   ├── isolationWindow
//!     │       │   ├── selectedIonList / selectedIon
//!     │       │   └── activation
//!     │       └── binaryDataArrayList / binaryDataArray / binary
//!     └── chromatogramList
//!         └── chromatogram*
//!             ├── precursor / isolationWindow
//!             ├── product / isolationWindow
//!             └── binaryDataArrayList / binaryDataArray / binary
//! ```
//!
//! A `referenceableParamGroupRef` expands to the group's parameters in
//! whatever element it appears.

pub mod binary;
mod context;
pub mod cv_params;
mod error;
mod reader;

pub use binary::{ArrayEncoding, BinaryDecodeError};
pub use context::MAX_CONTEXT_DEPTH;
pub use cv_params::CvParam;
pub use error::MzMLError;
pub use reader::MzMLReader;
