//! Out-of-process bowtie2 driver.
//!
//! Reads are streamed to the child's stdin as FASTA or FASTQ while a named
//! reader thread parses SAM from its stdout into an unbounded channel. The
//! two-thread layout keeps the parent from blocking on a full stdout pipe
//! while it is still writing stdin.

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::batch::{AlignmentBatch, SequenceBatch};
use crate::sam::{AlignmentReadError, AlignmentReader};
use crate::table::CancellationToken;

use super::{check_subjects, Aligner, AlignerError, AlignmentSubject};

const ENGINE: &str = "bowtie2";

/// SAM rows parsed per reader-thread batch.
const READER_BATCH: usize = 1000;

const INDEX_SUFFIXES: [&str; 4] = [".1.bt2", ".2.bt2", ".rev.1.bt2", ".rev.2.bt2"];
const LARGE_INDEX_SUFFIXES: [&str; 4] = [".1.bt2l", ".2.bt2l", ".rev.1.bt2l", ".rev.2.bt2l"];

/// bowtie2 settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bowtie2Config {
    /// Preset name without dashes, e.g. `very-sensitive`; empty for none
    pub preset: String,
    /// Local instead of end-to-end alignment
    pub local: bool,
    /// Threads passed with `-p` when greater than one
    pub threads: usize,
    /// Passed with `-k` when greater than zero
    pub max_secondary: usize,
    /// Additional whitespace-separated arguments
    pub extra_args: String,
    /// Discard bowtie2's stderr
    pub quiet: bool,
}

impl Default for Bowtie2Config {
    fn default() -> Self {
        Self {
            preset: String::new(),
            local: false,
            threads: 1,
            max_secondary: 0,
            extra_args: String::new(),
            quiet: true,
        }
    }
}

/// Argument list for one alignment session (excluding the program name).
pub(crate) fn command_line(
    config: &Bowtie2Config,
    prefix: &Path,
    fasta: bool,
    interleaved: bool,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-x".into(), prefix.into()];
    if fasta {
        args.push("-f".into());
    }
    if interleaved {
        args.push("--interleaved".into());
    }
    args.push("-".into());
    if !config.preset.is_empty() {
        args.push(format!("--{}", config.preset).into());
    }
    if config.local {
        args.push("--local".into());
    }
    if config.threads > 1 {
        args.push("-p".into());
        args.push(config.threads.to_string().into());
    }
    if config.max_secondary > 0 {
        args.push("-k".into());
        args.push(config.max_secondary.to_string().into());
    }
    args.extend(config.extra_args.split_whitespace().map(OsString::from));
    args
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// True when `prefix` names a complete bowtie2 index (small or large).
pub fn is_index_prefix(prefix: &Path) -> bool {
    let complete = |suffixes: &[&str]| suffixes.iter().all(|s| with_suffix(prefix, s).is_file());
    complete(&INDEX_SUFFIXES) || complete(&LARGE_INDEX_SUFFIXES)
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

/// Locate `program` on `PATH`.
fn find_program(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn ignore_sigpipe() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        // SAFETY: installing SIG_IGN has no preconditions. Writes to a closed
        // pipe then fail with EPIPE instead of terminating the process.
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        }
    });
}

#[cfg(not(unix))]
fn ignore_sigpipe() {}

fn io_error(context: impl Into<String>, source: io::Error) -> AlignerError {
    if source.kind() == io::ErrorKind::BrokenPipe {
        return AlignerError::failed(ENGINE, "bowtie2 stopped reading its input (broken pipe)");
    }
    AlignerError::Io {
        engine: ENGINE,
        context: context.into(),
        source,
    }
}

fn exit_error(status: ExitStatus) -> Option<AlignerError> {
    if status.success() {
        return None;
    }
    if let Some(code) = status.code() {
        return Some(AlignerError::failed(ENGINE, format!("bowtie2 exited with code {code}")));
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(AlignerError::failed(
                ENGINE,
                format!("bowtie2 killed by signal {signal}"),
            ));
        }
    }
    Some(AlignerError::failed(ENGINE, format!("bowtie2 failed: {status}")))
}

enum IndexLocation {
    /// Built by this aligner; removed with the directory
    Built { _dir: TempDir, prefix: PathBuf },
    /// Supplied by the caller
    External(PathBuf),
}

impl IndexLocation {
    fn prefix(&self) -> &Path {
        match self {
            IndexLocation::Built { prefix, .. } => prefix,
            IndexLocation::External(prefix) => prefix,
        }
    }
}

type RowMessage = Result<AlignmentBatch, AlignmentReadError>;

/// One running bowtie2 child and its reader thread.
struct Session {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    rows: Receiver<RowMessage>,
    reader: Option<JoinHandle<()>>,
    paired: bool,
    fasta: bool,
}

impl Session {
    fn spawn(
        program: &Path,
        config: &Bowtie2Config,
        prefix: &Path,
        paired: bool,
        fasta: bool,
        cancel: CancellationToken,
    ) -> Result<Self, AlignerError> {
        ignore_sigpipe();
        let args = command_line(config, prefix, fasta, paired);
        log::info!(
            "bowtie2: spawning {} {}",
            program.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );
        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if config.quiet {
                Stdio::null()
            } else {
                Stdio::inherit()
            })
            .spawn()
            .map_err(|e| io_error("cannot start bowtie2", e))?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                // Spawned with piped stdio, so this only happens on a broken runtime.
                let _ = child.kill();
                let _ = child.wait();
                return Err(AlignerError::failed(ENGINE, "bowtie2 pipes unavailable"));
            }
        };

        let (sender, rows) = unbounded::<RowMessage>();
        let spawned = thread::Builder::new()
            .name("bowtie2-reader".to_string())
            .spawn(move || {
                let mut reader =
                    match AlignmentReader::from_stream(BufReader::new(stdout), "<bowtie2>", false) {
                        Ok(reader) => reader,
                        Err(e) => {
                            let _ = sender.send(Err(e));
                            return;
                        }
                    };
                while !cancel.is_cancelled() {
                    match reader.read(READER_BATCH) {
                        Ok(batch) if batch.is_empty() => break,
                        Ok(batch) => {
                            if sender.send(Ok(batch)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = sender.send(Err(e));
                            break;
                        }
                    }
                }
            });
        let reader = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io_error("cannot spawn the SAM reader thread", e));
            }
        };

        Ok(Self {
            child,
            stdin: Some(BufWriter::new(stdin)),
            rows,
            reader: Some(reader),
            paired,
            fasta,
        })
    }

    fn write(&mut self, queries: &SequenceBatch) -> Result<(), AlignerError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AlignerError::failed(ENGINE, "bowtie2 input already closed"))?;
        write_reads(stdin, queries, self.fasta).map_err(|e| io_error("cannot write reads", e))?;
        stdin.flush().map_err(|e| io_error("cannot write reads", e))
    }

    /// Move every batch already parsed into `output`.
    fn drain_ready(&mut self, output: &mut AlignmentBatch) -> Result<(), AlignerError> {
        loop {
            match self.rows.try_recv() {
                Ok(message) => output.append(&mut parsed(message)?),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    /// Close stdin, collect the remaining rows and reap the child.
    fn finish(mut self, output: &mut AlignmentBatch) -> Result<(), AlignerError> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush().map_err(|e| io_error("cannot write reads", e))?;
        }
        for message in self.rows.iter() {
            output.append(&mut parsed(message)?);
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                return Err(AlignerError::failed(ENGINE, "SAM reader thread panicked"));
            }
        }
        let status = self
            .child
            .wait()
            .map_err(|e| io_error("cannot wait for bowtie2", e))?;
        match exit_error(status) {
            Some(err) => Err(err),
            None => {
                log::debug!("bowtie2: child exited cleanly");
                Ok(())
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            // Still running: stop the child so the reader sees EOF.
            let _ = self.child.kill();
            self.stdin.take();
            let _ = self.child.wait();
            let _ = reader.join();
        }
    }
}

fn parsed(message: RowMessage) -> Result<AlignmentBatch, AlignerError> {
    message.map_err(|source| AlignerError::Output {
        engine: ENGINE,
        source,
    })
}

fn write_record<W: Write>(
    out: &mut W,
    name: &str,
    mate: &str,
    seq: &str,
    qual: Option<&[u8]>,
    fasta: bool,
) -> io::Result<()> {
    if fasta {
        writeln!(out, ">{name}{mate}\n{seq}")
    } else {
        writeln!(out, "@{name}{mate}\n{seq}\n+")?;
        out.write_all(qual.unwrap_or_default())?;
        out.write_all(b"\n")
    }
}

/// Serialise a batch the way bowtie2 reads it from `-`.
fn write_reads<W: Write>(out: &mut W, queries: &SequenceBatch, fasta: bool) -> io::Result<()> {
    for i in 0..queries.len() {
        let id = &queries.read_ids[i];
        let qual1 = queries.quals1[i].as_ref().map(|q| q.as_bytes());
        if queries.is_paired {
            let qual2 = queries.quals2[i].as_ref().map(|q| q.as_bytes());
            write_record(out, id, "/1", &queries.sequences1[i], qual1, fasta)?;
            write_record(out, id, "/2", &queries.sequences2[i], qual2, fasta)?;
        } else {
            write_record(out, id, "", &queries.sequences1[i], qual1, fasta)?;
        }
    }
    Ok(())
}

fn lacks_qualities(queries: &SequenceBatch) -> bool {
    queries.lacks_qualities() || (queries.is_paired && queries.quals2.iter().any(Option::is_none))
}

/// bowtie2 behind the batched [`Aligner`] contract.
///
/// The child process is started on the first non-empty [`Aligner::align`]
/// call and reaped by [`Aligner::finish`]. The first batch fixes whether the
/// session is paired and whether reads are sent as FASTA (when qualities are
/// missing) or FASTQ.
///
/// The first use installs `SIG_IGN` for `SIGPIPE` process-wide so that an
/// early bowtie2 exit surfaces as an error instead of killing the host.
pub struct Bowtie2Aligner {
    config: Bowtie2Config,
    program: PathBuf,
    build_program: Option<PathBuf>,
    index: Option<IndexLocation>,
    session: Option<Session>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Bowtie2Aligner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bowtie2Aligner")
            .field("config", &self.config)
            .field("program", &self.program)
            .field("index", &self.index.as_ref().map(IndexLocation::prefix))
            .field("running", &self.session.is_some())
            .finish()
    }
}

impl Bowtie2Aligner {
    /// Locate `bowtie2` on `PATH`.
    pub fn new(config: Bowtie2Config) -> Result<Self, AlignerError> {
        let program = find_program("bowtie2").ok_or_else(|| AlignerError::Unavailable {
            engine: ENGINE,
            reason: "bowtie2 not found in PATH".to_string(),
        })?;
        Ok(Self {
            config,
            program,
            build_program: find_program("bowtie2-build"),
            index: None,
            session: None,
            cancel: CancellationToken::new(),
        })
    }

    /// True when `bowtie2` can be found on `PATH`.
    pub fn is_available() -> bool {
        find_program("bowtie2").is_some()
    }

    /// Settings in use.
    pub fn config(&self) -> &Bowtie2Config {
        &self.config
    }

    /// Share the host's cancellation flag with the reader thread.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    /// Prefix of the current index, if any.
    pub fn index_prefix(&self) -> Option<&Path> {
        self.index.as_ref().map(IndexLocation::prefix)
    }

    /// Stop any running child and forget the index.
    pub fn reset(&mut self) {
        self.session = None;
        self.index = None;
    }

    fn write_reference(dir: &Path, subjects: &[AlignmentSubject]) -> Result<PathBuf, AlignerError> {
        let path = dir.join("reference.fasta");
        let file = File::create(&path)
            .map_err(|e| io_error(format!("cannot create {}", path.display()), e))?;
        let mut out = BufWriter::new(file);
        for subject in subjects {
            writeln!(out, ">{}\n{}", subject.name, subject.sequence)
                .map_err(|e| io_error("cannot write reference FASTA", e))?;
        }
        out.flush()
            .map_err(|e| io_error("cannot write reference FASTA", e))?;
        Ok(path)
    }
}

impl Aligner for Bowtie2Aligner {
    fn build_index(&mut self, subjects: &[AlignmentSubject]) -> Result<(), AlignerError> {
        check_subjects(ENGINE, subjects)?;
        let build_program = self.build_program.clone().ok_or_else(|| AlignerError::Unavailable {
            engine: ENGINE,
            reason: "bowtie2-build not found in PATH".to_string(),
        })?;
        self.reset();

        let dir = tempfile::Builder::new()
            .prefix("biocolumns-bowtie2-")
            .tempdir()
            .map_err(|e| io_error("cannot create index directory", e))?;
        let reference = Self::write_reference(dir.path(), subjects)?;
        let prefix = dir.path().join("index");
        log::info!(
            "bowtie2: building index over {} subject(s) in {}",
            subjects.len(),
            dir.path().display()
        );
        let output = Command::new(&build_program)
            .arg("--quiet")
            .arg(&reference)
            .arg(&prefix)
            .output()
            .map_err(|e| io_error("cannot run bowtie2-build", e))?;
        if !output.status.success() {
            let detail = String::from_utf8_lossy(&output.stderr);
            let detail = if detail.trim().is_empty() {
                String::from_utf8_lossy(&output.stdout)
            } else {
                detail
            };
            return Err(AlignerError::failed(
                ENGINE,
                format!("bowtie2-build failed ({}): {}", output.status, detail.trim()),
            ));
        }
        self.index = Some(IndexLocation::Built { _dir: dir, prefix });
        Ok(())
    }

    fn load_index(&mut self, prefix: &Path) -> Result<(), AlignerError> {
        if !is_index_prefix(prefix) {
            return Err(AlignerError::IndexNotFound {
                engine: ENGINE,
                path: prefix.to_path_buf(),
            });
        }
        self.reset();
        log::info!("bowtie2: using index {}", prefix.display());
        self.index = Some(IndexLocation::External(prefix.to_path_buf()));
        Ok(())
    }

    fn align(
        &mut self,
        queries: &SequenceBatch,
        output: &mut AlignmentBatch,
    ) -> Result<(), AlignerError> {
        if self.cancel.is_cancelled() {
            self.session = None;
            return Err(AlignerError::Cancelled { engine: ENGINE });
        }
        if queries.is_empty() {
            return Ok(());
        }
        let prefix = self
            .index
            .as_ref()
            .map(|index| index.prefix().to_path_buf())
            .ok_or_else(|| {
                AlignerError::parameter(ENGINE, "no index; build or load one before aligning")
            })?;

        let missing_quals = lacks_qualities(queries);
        if self.session.is_none() {
            self.session = Some(Session::spawn(
                &self.program,
                &self.config,
                &prefix,
                queries.is_paired,
                missing_quals,
                self.cancel.clone(),
            )?);
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if session.paired != queries.is_paired {
            return Err(AlignerError::parameter(
                ENGINE,
                "cannot mix paired and unpaired batches in one session",
            ));
        }
        if !session.fasta && missing_quals {
            return Err(AlignerError::parameter(
                ENGINE,
                "batch lacks qualities but the session was started with FASTQ input",
            ));
        }
        session.write(queries)?;
        session.drain_ready(output)
    }

    fn finish(&mut self, output: &mut AlignmentBatch) -> Result<(), AlignerError> {
        match self.session.take() {
            Some(session) => {
                let result = session.finish(output);
                if self.cancel.is_cancelled() {
                    return Err(AlignerError::Cancelled { engine: ENGINE });
                }
                result
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::quality::QualityScore;

    fn args(config: &Bowtie2Config, fasta: bool, interleaved: bool) -> Vec<String> {
        command_line(config, Path::new("/idx/ref"), fasta, interleaved)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_command_line_defaults() {
        assert_eq!(
            args(&Bowtie2Config::default(), false, false),
            ["-x", "/idx/ref", "-"]
        );
    }

    #[test]
    fn test_command_line_all_options() {
        let config = Bowtie2Config {
            preset: "very-sensitive".into(),
            local: true,
            threads: 4,
            max_secondary: 3,
            extra_args: "  --no-unal   --seed 7 ".into(),
            quiet: true,
        };
        assert_eq!(
            args(&config, true, true),
            [
                "-x",
                "/idx/ref",
                "-f",
                "--interleaved",
                "-",
                "--very-sensitive",
                "--local",
                "-p",
                "4",
                "-k",
                "3",
                "--no-unal",
                "--seed",
                "7"
            ]
        );
        let single_thread = Bowtie2Config {
            threads: 1,
            ..Default::default()
        };
        assert!(!args(&single_thread, false, false).contains(&"-p".to_string()));
    }

    #[test]
    fn test_is_index_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("ref");
        assert!(!is_index_prefix(&prefix));
        for suffix in &INDEX_SUFFIXES[..3] {
            File::create(with_suffix(&prefix, suffix)).unwrap();
        }
        assert!(!is_index_prefix(&prefix));
        File::create(with_suffix(&prefix, INDEX_SUFFIXES[3])).unwrap();
        assert!(is_index_prefix(&prefix));

        let large = dir.path().join("big");
        for suffix in LARGE_INDEX_SUFFIXES {
            File::create(with_suffix(&large, suffix)).unwrap();
        }
        assert!(is_index_prefix(&large));
    }

    #[test]
    fn test_write_reads_formats() {
        let mut batch = SequenceBatch::paired();
        batch.push_pair(
            "p".into(),
            None,
            ("AC".into(), Some(QualityScore::from_ascii("II"))),
            ("GT".into(), Some(QualityScore::from_ascii("##"))),
        );
        let mut out = Vec::new();
        write_reads(&mut out, &batch, false).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "@p/1\nAC\n+\nII\n@p/2\nGT\n+\n##\n"
        );

        let mut single = SequenceBatch::unpaired();
        single.push("s".into(), None, "ACGT".into(), None);
        assert!(lacks_qualities(&single));
        let mut out = Vec::new();
        write_reads(&mut out, &single, true).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), ">s\nACGT\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_status_messages() {
        use std::os::unix::process::ExitStatusExt;
        let err = exit_error(ExitStatus::from_raw(1 << 8)).unwrap();
        assert_eq!(err.to_string(), "bowtie2: bowtie2 exited with code 1");
        let err = exit_error(ExitStatus::from_raw(9)).unwrap();
        assert_eq!(err.to_string(), "bowtie2: bowtie2 killed by signal 9");
        assert!(exit_error(ExitStatus::from_raw(0)).is_none());
    }

    fn aligner() -> Option<Bowtie2Aligner> {
        match Bowtie2Aligner::new(Bowtie2Config::default()) {
            Ok(aligner) => Some(aligner),
            Err(e) => {
                assert_eq!(e.kind(), ErrorKind::EngineUnavailable);
                eprintln!("skipping: {e}");
                None
            }
        }
    }

    #[test]
    fn test_align_requires_index() {
        let Some(mut aligner) = aligner() else { return };
        let mut batch = SequenceBatch::unpaired();
        batch.push("r".into(), None, "ACGT".into(), None);
        let err = aligner
            .align(&batch, &mut AlignmentBatch::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParameterError);
    }

    #[test]
    fn test_load_missing_index() {
        let Some(mut aligner) = aligner() else { return };
        let err = aligner
            .load_index(Path::new("/nonexistent/prefix"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }

    #[test]
    fn test_exact_match_end_to_end() {
        let Some(mut aligner) = aligner() else { return };
        if aligner.build_program.is_none() {
            return;
        }
        let reference: String = "ACGTTGCAAGGCTTACCGATCGGATCCTAGGCATCGATCGTAGCTAGCTAGGCTAACGTAGCTAGCATCGACTGACTAGCATCGATGCA"
            .to_string();
        aligner
            .build_single_index(&AlignmentSubject::new("chr1", reference.clone()))
            .unwrap();
        let mut batch = SequenceBatch::unpaired();
        batch.push("q".into(), None, reference[10..60].to_string(), None);
        let mut out = AlignmentBatch::new();
        aligner.align(&batch, &mut out).unwrap();
        aligner.finish(&mut out).unwrap();
        let row = out
            .records
            .iter()
            .find(|r| !r.is_unmapped())
            .expect("mapped row");
        assert_eq!(row.reference, "chr1");
        assert_eq!(row.position, 11);
    }
}
