//! FFI layer over the minimap2 C library.
//!
//! Raw engine objects are wrapped in owning types that free them on drop.
//! Every `unsafe` block relies on the same contract: pointers come from the
//! library, are non-null (checked on creation) and are only read while the
//! owning wrapper is alive.

use std::ffi::{c_char, c_int, CStr, CString};
use std::path::Path;
use std::ptr::{self, NonNull};

use minimap2_sys as mm;

use crate::align::region::{CigarOp, Region};
use crate::align::{AlignerError, AlignmentSubject};

use super::{Minimap2Config, ENGINE};

// Mapping flags from minimap.h.
const MM_F_CIGAR: i64 = 0x004;
const MM_F_FRAG_MODE: i64 = 0x20000;
const MM_F_OUT_MD: i64 = 0x1000000;
const MM_F_EQX: i64 = 0x4000000;
// Index flag bit for homopolymer-compressed minimizers.
const MM_I_HPC: i16 = 0x1;

fn c_string(what: &str, value: &str) -> Result<CString, AlignerError> {
    CString::new(value).map_err(|_| {
        AlignerError::parameter(ENGINE, format!("{what} '{value}' contains a NUL byte"))
    })
}

fn c_path(path: &Path) -> Result<CString, AlignerError> {
    c_string("path", &path.to_string_lossy())
}

/// Indexing and mapping options resolved from a preset.
pub(super) struct Options {
    idxopt: mm::mm_idxopt_t,
    mapopt: mm::mm_mapopt_t,
}

// SAFETY: the only pointer fields (split prefix, junction bed) stay null;
// the structs are plain option values.
unsafe impl Send for Options {}

impl Options {
    pub(super) fn new(config: &Minimap2Config) -> Result<Self, AlignerError> {
        let preset = c_string("preset", &config.preset)?;
        // SAFETY: zeroed structs are valid inputs; mm_set_opt(NULL) fills
        // in defaults before the preset is applied.
        let (mut idxopt, mut mapopt) = unsafe {
            let mut idxopt: mm::mm_idxopt_t = std::mem::zeroed();
            let mut mapopt: mm::mm_mapopt_t = std::mem::zeroed();
            mm::mm_set_opt(ptr::null(), &mut idxopt, &mut mapopt);
            if mm::mm_set_opt(preset.as_ptr(), &mut idxopt, &mut mapopt) != 0 {
                return Err(AlignerError::parameter(
                    ENGINE,
                    format!("unknown preset '{}'", config.preset),
                ));
            }
            (idxopt, mapopt)
        };
        if idxopt.k <= 0 || idxopt.k > 28 {
            return Err(AlignerError::parameter(
                ENGINE,
                format!("preset '{}' set invalid k-mer size {}", config.preset, idxopt.k),
            ));
        }
        if idxopt.w <= 0 || idxopt.w >= 256 {
            return Err(AlignerError::parameter(
                ENGINE,
                format!("preset '{}' set invalid window size {}", config.preset, idxopt.w),
            ));
        }
        if config.k > 0 {
            idxopt.k = config.k as i16;
        }
        if config.w > 0 {
            idxopt.w = config.w as i16;
        }
        mapopt.flag |= MM_F_CIGAR | MM_F_OUT_MD;
        if config.eqx {
            mapopt.flag |= MM_F_EQX;
        }
        mapopt.best_n = c_int::try_from(config.max_secondary + 1).unwrap_or(c_int::MAX);
        Ok(Self { idxopt, mapopt })
    }
}

/// An owned engine index plus the mapping options tuned to it.
pub(super) struct Index {
    raw: NonNull<mm::mm_idx_t>,
    mapopt: mm::mm_mapopt_t,
    names: Vec<String>,
}

// SAFETY: the index is immutable after construction and minimap2 allows
// concurrent mapping against one index with per-thread buffers.
unsafe impl Send for Index {}
unsafe impl Sync for Index {}

impl Drop for Index {
    fn drop(&mut self) {
        // SAFETY: `raw` came from mm_idx_str or mm_idx_reader_read.
        unsafe { mm::mm_idx_destroy(self.raw.as_ptr()) }
    }
}

impl Index {
    fn finish(raw: *mut mm::mm_idx_t, options: &Options, what: &str) -> Result<Self, AlignerError> {
        let raw = NonNull::new(raw)
            .ok_or_else(|| AlignerError::failed(ENGINE, format!("failed to {what}")))?;
        let mut index = Self {
            raw,
            mapopt: options.mapopt,
            names: Vec::new(),
        };
        // SAFETY: `raw` is a live index; seq holds n_seq entries.
        unsafe {
            let idx = index.raw.as_ref();
            index.names.reserve(idx.n_seq as usize);
            for i in 0..idx.n_seq as usize {
                let name = (*idx.seq.add(i)).name;
                if name.is_null() {
                    return Err(AlignerError::failed(
                        ENGINE,
                        format!("index contains an unnamed sequence at position {i}"),
                    ));
                }
                index
                    .names
                    .push(CStr::from_ptr(name).to_string_lossy().into_owned());
            }
            mm::mm_mapopt_update(&mut index.mapopt, index.raw.as_ptr());
        }
        Ok(index)
    }

    pub(super) fn build(
        options: &Options,
        subjects: &[AlignmentSubject],
    ) -> Result<Self, AlignerError> {
        let seqs = subjects
            .iter()
            .map(|s| c_string("subject sequence", &s.sequence))
            .collect::<Result<Vec<_>, _>>()?;
        let names = subjects
            .iter()
            .map(|s| c_string("subject name", &s.name))
            .collect::<Result<Vec<_>, _>>()?;
        let mut seq_ptrs: Vec<*const c_char> = seqs.iter().map(|s| s.as_ptr()).collect();
        let mut name_ptrs: Vec<*const c_char> = names.iter().map(|s| s.as_ptr()).collect();
        let count = c_int::try_from(subjects.len())
            .map_err(|_| AlignerError::parameter(ENGINE, "too many subjects for one index"))?;
        let io = &options.idxopt;
        // SAFETY: both pointer arrays hold `count` NUL-terminated strings
        // that outlive the call; minimap2 copies what it keeps.
        let raw = unsafe {
            mm::mm_idx_str(
                c_int::from(io.w),
                c_int::from(io.k),
                c_int::from(io.flag & MM_I_HPC),
                c_int::from(io.bucket_bits),
                count,
                seq_ptrs.as_mut_ptr(),
                name_ptrs.as_mut_ptr(),
            )
        };
        Self::finish(raw, options, "build the index")
    }

    pub(super) fn load(options: &Options, path: &Path) -> Result<Self, AlignerError> {
        if !path.exists() {
            return Err(AlignerError::IndexNotFound {
                engine: ENGINE,
                path: path.to_path_buf(),
            });
        }
        let c_path = c_path(path)?;
        // SAFETY: reader is checked for null and closed before returning.
        let raw = unsafe {
            let reader = mm::mm_idx_reader_open(c_path.as_ptr(), &options.idxopt, ptr::null());
            if reader.is_null() {
                return Err(AlignerError::failed(
                    ENGINE,
                    format!("cannot open index file {}", path.display()),
                ));
            }
            let raw = mm::mm_idx_reader_read(reader, 1);
            mm::mm_idx_reader_close(reader);
            raw
        };
        Self::finish(raw, options, &format!("load the index from {}", path.display()))
    }

    pub(super) fn dump(&self, path: &Path) -> Result<(), AlignerError> {
        let c_path = c_path(path)?;
        // SAFETY: the FILE is checked for null and closed after the dump.
        unsafe {
            let fp = libc::fopen(c_path.as_ptr(), b"wb\0".as_ptr().cast());
            if fp.is_null() {
                return Err(AlignerError::Io {
                    engine: ENGINE,
                    context: format!("cannot create {}", path.display()),
                    source: std::io::Error::last_os_error(),
                });
            }
            mm::mm_idx_dump(fp.cast(), self.raw.as_ptr());
            if libc::fclose(fp) != 0 {
                return Err(AlignerError::Io {
                    engine: ENGINE,
                    context: format!("cannot finish writing {}", path.display()),
                    source: std::io::Error::last_os_error(),
                });
            }
        }
        Ok(())
    }

    pub(super) fn names(&self) -> &[String] {
        &self.names
    }
}

pub(super) fn is_index_file(path: &Path) -> bool {
    let Ok(c_path) = c_path(path) else {
        return false;
    };
    // SAFETY: mm_idx_is_idx only opens and reads the file header.
    unsafe { mm::mm_idx_is_idx(c_path.as_ptr()) > 0 }
}

/// Per-aligner scratch space.
pub(super) struct ThreadBuffer {
    raw: NonNull<mm::mm_tbuf_t>,
}

// SAFETY: the buffer is only used through `&mut self`.
unsafe impl Send for ThreadBuffer {}

impl ThreadBuffer {
    pub(super) fn new() -> Result<Self, AlignerError> {
        // SAFETY: plain allocation.
        let raw = unsafe { mm::mm_tbuf_init() };
        NonNull::new(raw)
            .map(|raw| Self { raw })
            .ok_or_else(|| AlignerError::failed(ENGINE, "cannot allocate a thread buffer"))
    }
}

impl Drop for ThreadBuffer {
    fn drop(&mut self) {
        // SAFETY: `raw` came from mm_tbuf_init.
        unsafe { mm::mm_tbuf_destroy(self.raw.as_ptr()) }
    }
}

/// Regions returned by one mapping call, freed on drop.
struct RawRegions {
    ptr: *mut mm::mm_reg1_t,
    len: usize,
}

impl RawRegions {
    fn as_slice(&self) -> &[mm::mm_reg1_t] {
        if self.ptr.is_null() || self.len == 0 {
            return &[];
        }
        // SAFETY: minimap2 returns `len` contiguous regions.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl Drop for RawRegions {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        // SAFETY: each region's extra block and the array were malloc'd by
        // minimap2.
        unsafe {
            for reg in std::slice::from_raw_parts(self.ptr, self.len) {
                libc::free(reg.p.cast());
            }
            libc::free(self.ptr.cast());
        }
    }
}

fn convert(index: &Index, reg: &mm::mm_reg1_t, seq: &CStr) -> Region {
    let mut cigar = Vec::new();
    let mut md = String::new();
    if !reg.p.is_null() && reg.rid >= 0 {
        // SAFETY: `p` points to an extra block holding n_cigar packed ops.
        unsafe {
            let extra = &*reg.p;
            for &packed in extra.cigar.as_slice(extra.n_cigar as usize) {
                if let Some(op) = CigarOp::from_code(packed & 0xf) {
                    cigar.push((packed >> 4, op));
                }
            }
            let mut buf: *mut c_char = ptr::null_mut();
            let mut cap: c_int = 0;
            let len = mm::mm_gen_MD(
                ptr::null_mut(),
                &mut buf,
                &mut cap,
                index.raw.as_ptr(),
                reg as *const mm::mm_reg1_t as *mut mm::mm_reg1_t,
                seq.as_ptr(),
            );
            if len > 0 && !buf.is_null() {
                let bytes = std::slice::from_raw_parts(buf.cast::<u8>(), len as usize);
                md = String::from_utf8_lossy(bytes).into_owned();
            }
            libc::free(buf.cast());
        }
    }
    Region {
        id: reg.id,
        parent: reg.parent,
        rid: reg.rid,
        rs: i64::from(reg.rs),
        re: i64::from(reg.re),
        rev: reg.rev() != 0,
        mapq: reg.mapq() as u8,
        score: reg.score,
        subsc: reg.subsc,
        proper_frag: reg.proper_frag() != 0,
        split: reg.split() as u8,
        cigar,
        md,
    }
}

fn query_len(seq: &str) -> Result<c_int, AlignerError> {
    c_int::try_from(seq.len())
        .map_err(|_| AlignerError::parameter(ENGINE, "query sequence too long"))
}

pub(super) fn map_single(
    index: &Index,
    buffer: &mut ThreadBuffer,
    name: &str,
    seq: &str,
) -> Result<Vec<Region>, AlignerError> {
    let c_seq = c_string("query sequence", seq)?;
    let c_name = c_string("query name", name)?;
    let mut n_regs: c_int = 0;
    // SAFETY: inputs are NUL-terminated and live across the call; the
    // returned array is owned by RawRegions.
    let regions = unsafe {
        let ptr = mm::mm_map(
            index.raw.as_ptr(),
            query_len(seq)?,
            c_seq.as_ptr(),
            &mut n_regs,
            buffer.raw.as_ptr(),
            &index.mapopt,
            c_name.as_ptr(),
        );
        RawRegions {
            ptr,
            len: usize::try_from(n_regs).unwrap_or(0),
        }
    };
    Ok(regions
        .as_slice()
        .iter()
        .map(|reg| convert(index, reg, &c_seq))
        .collect())
}

pub(super) fn map_pair(
    index: &Index,
    buffer: &mut ThreadBuffer,
    name: &str,
    seq1: &str,
    seq2: &str,
) -> Result<[Vec<Region>; 2], AlignerError> {
    let c_seqs = [c_string("query sequence", seq1)?, c_string("query sequence", seq2)?];
    let c_name = c_string("query name", name)?;
    let qlens = [query_len(seq1)?, query_len(seq2)?];
    let mut seq_ptrs = [c_seqs[0].as_ptr(), c_seqs[1].as_ptr()];
    let mut n_regs: [c_int; 2] = [0, 0];
    let mut regs: [*mut mm::mm_reg1_t; 2] = [ptr::null_mut(), ptr::null_mut()];
    let mut opt = index.mapopt;
    opt.flag |= MM_F_FRAG_MODE;
    // SAFETY: two segments, each NUL-terminated; both result arrays are
    // owned by RawRegions right after the call.
    let regions = unsafe {
        mm::mm_map_frag(
            index.raw.as_ptr(),
            2,
            qlens.as_ptr(),
            seq_ptrs.as_mut_ptr(),
            n_regs.as_mut_ptr(),
            regs.as_mut_ptr(),
            buffer.raw.as_ptr(),
            &opt,
            c_name.as_ptr(),
        );
        [0, 1].map(|seg| RawRegions {
            ptr: regs[seg],
            len: usize::try_from(n_regs[seg]).unwrap_or(0),
        })
    };
    Ok([0, 1].map(|seg| {
        regions[seg]
            .as_slice()
            .iter()
            .map(|reg| convert(index, reg, &c_seqs[seg]))
            .collect()
    }))
}
