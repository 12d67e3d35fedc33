//! Pairwise query/subject alignment.
//!
//! Scores are end-to-end gap-affine costs: a match is free, a mismatch costs
//! `mismatch`, and a gap of length `L` costs `gap_open + L * gap_extend`.
//! Lower is more similar. CIGARs use the extended alphabet (`=`/`X`), with
//! `I` consuming the query and `D` consuming the subject.

use serde::{Deserialize, Serialize};

use super::AlignerError;

const ENGINE: &str = "wfa2";

/// Default cap on traceback matrix cells (one byte each).
pub const DEFAULT_MAX_CELLS: usize = 1 << 26;

/// Gap-affine penalty set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Penalties {
    /// Cost of a mismatching position
    pub mismatch: i32,
    /// Cost paid once per gap
    pub gap_open: i32,
    /// Cost paid per gap position
    pub gap_extend: i32,
}

impl Default for Penalties {
    fn default() -> Self {
        Self {
            mismatch: 4,
            gap_open: 6,
            gap_extend: 2,
        }
    }
}

impl Penalties {
    /// Check `mismatch > 0`, `gap_open >= 0` and `gap_extend > 0`.
    pub fn validate(&self) -> Result<(), AlignerError> {
        if self.mismatch <= 0 {
            return Err(AlignerError::parameter(
                ENGINE,
                format!("mismatch must be > 0, got {}", self.mismatch),
            ));
        }
        if self.gap_open < 0 {
            return Err(AlignerError::parameter(
                ENGINE,
                format!("gap_open must be >= 0, got {}", self.gap_open),
            ));
        }
        if self.gap_extend <= 0 {
            return Err(AlignerError::parameter(
                ENGINE,
                format!("gap_extend must be > 0, got {}", self.gap_extend),
            ));
        }
        Ok(())
    }
}

/// Pairwise settings as accepted by the `align_pairwise_*` functions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairwiseConfig {
    /// Engine name; only `wfa2` is recognised
    pub method: String,
    /// Mismatch penalty
    pub mismatch: i32,
    /// Gap open penalty
    pub gap_open: i32,
    /// Gap extension penalty
    pub gap_extend: i32,
}

impl Default for PairwiseConfig {
    fn default() -> Self {
        let p = Penalties::default();
        Self {
            method: ENGINE.to_string(),
            mismatch: p.mismatch,
            gap_open: p.gap_open,
            gap_extend: p.gap_extend,
        }
    }
}

impl PairwiseConfig {
    /// Penalties carried by this config.
    pub fn penalties(&self) -> Penalties {
        Penalties {
            mismatch: self.mismatch,
            gap_open: self.gap_open,
            gap_extend: self.gap_extend,
        }
    }

    /// Check the method name and the penalties.
    pub fn validate(&self) -> Result<(), AlignerError> {
        if self.method != ENGINE {
            return Err(AlignerError::parameter(
                ENGINE,
                format!("unsupported method '{}', expected 'wfa2'", self.method),
            ));
        }
        self.penalties().validate()
    }
}

/// What an engine instance computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Cost only, in linear memory
    Score,
    /// Cost plus traceback
    Alignment,
}

/// Score and extended CIGAR of one alignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CigarAlignment {
    /// Non-negative cost
    pub score: i32,
    /// Extended CIGAR; empty when both inputs are empty
    pub cigar: String,
}

/// Alignment with gapped renderings of both sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullAlignment {
    /// Non-negative cost
    pub score: i32,
    /// Extended CIGAR
    pub cigar: String,
    /// Query with `-` where the subject has extra bases
    pub query_aligned: String,
    /// Subject with `-` where the query has extra bases
    pub subject_aligned: String,
}

/// An engine able to align one query against one subject.
pub trait PairwiseBackend: Send {
    /// Scope this instance was created for.
    fn scope(&self) -> Scope;

    /// Cost of the best alignment, or `None` when the engine gives up.
    fn score(&mut self, query: &[u8], subject: &[u8]) -> Option<i32>;

    /// Cost and CIGAR, or `None` when the engine gives up or was created
    /// with [`Scope::Score`].
    fn align(&mut self, query: &[u8], subject: &[u8]) -> Option<CigarAlignment>;
}

const INF: i64 = i64::MAX / 4;

// Traceback byte layout.
const FROM_DIAG: u8 = 0;
const FROM_INS: u8 = 1;
const FROM_DEL: u8 = 2;
const H_MASK: u8 = 0b11;
const INS_EXTENDS: u8 = 0b100;
const DEL_EXTENDS: u8 = 0b1000;

/// Exact end-to-end gap-affine dynamic programming (Gotoh).
#[derive(Debug, Clone)]
pub struct GapAffineAligner {
    penalties: Penalties,
    scope: Scope,
    max_cells: usize,
}

impl GapAffineAligner {
    /// New engine instance for `scope`.
    pub fn new(penalties: Penalties, scope: Scope) -> Self {
        Self {
            penalties,
            scope,
            max_cells: DEFAULT_MAX_CELLS,
        }
    }

    /// Cap the traceback matrix size; larger problems return `None`.
    pub fn with_max_cells(mut self, max_cells: usize) -> Self {
        self.max_cells = max_cells;
        self
    }

    fn gap(&self, len: usize) -> i64 {
        i64::from(self.penalties.gap_open) + len as i64 * i64::from(self.penalties.gap_extend)
    }

    fn substitution(&self, a: u8, b: u8) -> i64 {
        if a == b {
            0
        } else {
            i64::from(self.penalties.mismatch)
        }
    }

    fn cost(total: i64) -> Option<i32> {
        i32::try_from(total).ok()
    }

    fn score_linear(&self, query: &[u8], subject: &[u8]) -> Option<i32> {
        let open = i64::from(self.penalties.gap_open);
        let extend = i64::from(self.penalties.gap_extend);
        let m = query.len();
        let mut h: Vec<i64> = (0..=m).map(|j| if j == 0 { 0 } else { self.gap(j) }).collect();
        let mut del = vec![INF; m + 1];
        for (i, &s) in subject.iter().enumerate() {
            let mut diag = h[0];
            h[0] = self.gap(i + 1);
            del[0] = h[0];
            let mut ins = INF;
            for j in 1..=m {
                ins = (ins + extend).min(h[j - 1] + open + extend);
                del[j] = (del[j] + extend).min(h[j] + open + extend);
                let best = (diag + self.substitution(s, query[j - 1]))
                    .min(ins)
                    .min(del[j]);
                diag = h[j];
                h[j] = best;
            }
        }
        Self::cost(h[m])
    }

    fn align_traceback(&self, query: &[u8], subject: &[u8]) -> Option<CigarAlignment> {
        let (n, m) = (subject.len(), query.len());
        let cells = (n + 1).checked_mul(m + 1)?;
        if cells > self.max_cells {
            log::debug!("{ENGINE}: {n}x{m} alignment exceeds {} cells", self.max_cells);
            return None;
        }
        let open = i64::from(self.penalties.gap_open);
        let extend = i64::from(self.penalties.gap_extend);
        let width = m + 1;
        let mut trace = vec![0u8; cells];

        let mut h: Vec<i64> = (0..=m).map(|j| if j == 0 { 0 } else { self.gap(j) }).collect();
        let mut del = vec![INF; m + 1];
        for j in 1..=m {
            trace[j] = FROM_INS | if j > 1 { INS_EXTENDS } else { 0 };
        }
        for i in 1..=n {
            let row = i * width;
            let mut diag = h[0];
            h[0] = self.gap(i);
            del[0] = h[0];
            trace[row] = FROM_DEL | if i > 1 { DEL_EXTENDS } else { 0 };
            let mut ins = INF;
            for j in 1..=m {
                let mut bits = 0u8;

                let ins_ext = ins + extend;
                let ins_open = h[j - 1] + open + extend;
                if ins_ext <= ins_open {
                    ins = ins_ext;
                    bits |= INS_EXTENDS;
                } else {
                    ins = ins_open;
                }

                let del_ext = del[j] + extend;
                let del_open = h[j] + open + extend;
                if del_ext <= del_open {
                    del[j] = del_ext;
                    bits |= DEL_EXTENDS;
                } else {
                    del[j] = del_open;
                }

                let matched = diag + self.substitution(subject[i - 1], query[j - 1]);
                let (best, from) = if matched <= ins && matched <= del[j] {
                    (matched, FROM_DIAG)
                } else if ins <= del[j] {
                    (ins, FROM_INS)
                } else {
                    (del[j], FROM_DEL)
                };
                trace[row + j] = bits | from;
                diag = h[j];
                h[j] = best;
            }
        }

        let score = Self::cost(h[m])?;
        let mut ops = Vec::with_capacity(n + m);
        let (mut i, mut j) = (n, m);
        let mut state = FROM_DIAG;
        while i > 0 || j > 0 {
            let bits = trace[i * width + j];
            match state {
                FROM_INS => {
                    ops.push(b'I');
                    state = if bits & INS_EXTENDS != 0 { FROM_INS } else { FROM_DIAG };
                    j -= 1;
                }
                FROM_DEL => {
                    ops.push(b'D');
                    state = if bits & DEL_EXTENDS != 0 { FROM_DEL } else { FROM_DIAG };
                    i -= 1;
                }
                _ => match bits & H_MASK {
                    FROM_DIAG => {
                        ops.push(if subject[i - 1] == query[j - 1] { b'=' } else { b'X' });
                        i -= 1;
                        j -= 1;
                    }
                    from => state = from,
                },
            }
        }
        ops.reverse();
        Some(CigarAlignment {
            score,
            cigar: run_length(&ops),
        })
    }
}

impl PairwiseBackend for GapAffineAligner {
    fn scope(&self) -> Scope {
        self.scope
    }

    fn score(&mut self, query: &[u8], subject: &[u8]) -> Option<i32> {
        self.score_linear(query, subject)
    }

    fn align(&mut self, query: &[u8], subject: &[u8]) -> Option<CigarAlignment> {
        match self.scope {
            Scope::Score => None,
            Scope::Alignment => self.align_traceback(query, subject),
        }
    }
}

fn run_length(ops: &[u8]) -> String {
    let mut cigar = String::new();
    let mut start = 0;
    while start < ops.len() {
        let op = ops[start];
        let len = ops[start..].iter().take_while(|&&o| o == op).count();
        cigar.push_str(&len.to_string());
        cigar.push(char::from(op));
        start += len;
    }
    cigar
}

/// Score-only and full-alignment engines behind one front.
///
/// Reported scores always come from the score-only instance.
pub struct PairwiseAligner {
    config: PairwiseConfig,
    score_engine: Box<dyn PairwiseBackend>,
    alignment_engine: Box<dyn PairwiseBackend>,
}

impl std::fmt::Debug for PairwiseAligner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairwiseAligner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PairwiseAligner {
    /// Validate `config` and create both engine instances.
    pub fn new(config: PairwiseConfig) -> Result<Self, AlignerError> {
        config.validate()?;
        let penalties = config.penalties();
        Ok(Self::with_backends(
            config,
            Box::new(GapAffineAligner::new(penalties, Scope::Score)),
            Box::new(GapAffineAligner::new(penalties, Scope::Alignment)),
        ))
    }

    /// Use caller-supplied engines.
    pub fn with_backends(
        config: PairwiseConfig,
        score_engine: Box<dyn PairwiseBackend>,
        alignment_engine: Box<dyn PairwiseBackend>,
    ) -> Self {
        Self {
            config,
            score_engine,
            alignment_engine,
        }
    }

    /// Settings in use.
    pub fn config(&self) -> &PairwiseConfig {
        &self.config
    }

    /// Alignment cost.
    pub fn align_score(&mut self, query: &str, subject: &str) -> Option<i32> {
        self.score_engine.score(query.as_bytes(), subject.as_bytes())
    }

    /// Cost and CIGAR.
    pub fn align_cigar(&mut self, query: &str, subject: &str) -> Option<CigarAlignment> {
        let aligned = self
            .alignment_engine
            .align(query.as_bytes(), subject.as_bytes())?;
        let score = self.align_score(query, subject)?;
        Some(CigarAlignment {
            score,
            cigar: aligned.cigar,
        })
    }

    /// Cost, CIGAR and both gapped strings.
    pub fn align_full(
        &mut self,
        query: &str,
        subject: &str,
    ) -> Result<Option<FullAlignment>, AlignerError> {
        let Some(CigarAlignment { score, cigar }) = self.align_cigar(query, subject) else {
            return Ok(None);
        };
        let (query_aligned, subject_aligned) = reconstruct_aligned(query, subject, &cigar)?;
        Ok(Some(FullAlignment {
            score,
            cigar,
            query_aligned,
            subject_aligned,
        }))
    }
}

/// Walk `cigar` over both sequences and render the gapped alignment.
///
/// `=`, `X` and `M` consume one character from each sequence, `I` consumes
/// from the query only and `D` from the subject only. Both sequences must be
/// consumed exactly.
pub fn reconstruct_aligned(
    query: &str,
    subject: &str,
    cigar: &str,
) -> Result<(String, String), AlignerError> {
    let mut q = query.chars();
    let mut s = subject.chars();
    let mut query_out = String::with_capacity(query.len());
    let mut subject_out = String::with_capacity(subject.len());
    let mut count: Option<usize> = None;

    let overrun = |which: &str, op: char| {
        AlignerError::failed(ENGINE, format!("CIGAR '{cigar}' overruns the {which} at '{op}'"))
    };

    for c in cigar.chars() {
        if let Some(digit) = c.to_digit(10) {
            let next = count
                .unwrap_or(0)
                .checked_mul(10)
                .and_then(|n| n.checked_add(digit as usize))
                .ok_or_else(|| {
                    AlignerError::failed(ENGINE, format!("CIGAR '{cigar}' has an oversized count"))
                })?;
            count = Some(next);
            continue;
        }
        let len = match count.take() {
            Some(0) | None => {
                return Err(AlignerError::failed(
                    ENGINE,
                    format!("CIGAR '{cigar}' has a missing or zero count before '{c}'"),
                ))
            }
            Some(len) => len,
        };
        for _ in 0..len {
            match c {
                '=' | 'X' | 'M' => {
                    query_out.push(q.next().ok_or_else(|| overrun("query", c))?);
                    subject_out.push(s.next().ok_or_else(|| overrun("subject", c))?);
                }
                'I' => {
                    query_out.push(q.next().ok_or_else(|| overrun("query", c))?);
                    subject_out.push('-');
                }
                'D' => {
                    query_out.push('-');
                    subject_out.push(s.next().ok_or_else(|| overrun("subject", c))?);
                }
                other => {
                    return Err(AlignerError::failed(
                        ENGINE,
                        format!("CIGAR '{cigar}' has unknown operation '{other}'"),
                    ))
                }
            }
        }
    }
    if count.is_some() {
        return Err(AlignerError::failed(
            ENGINE,
            format!("CIGAR '{cigar}' ends with a count and no operation"),
        ));
    }
    if q.next().is_some() || s.next().is_some() {
        return Err(AlignerError::failed(
            ENGINE,
            format!("CIGAR '{cigar}' does not cover both sequences"),
        ));
    }
    Ok((query_out, subject_out))
}
