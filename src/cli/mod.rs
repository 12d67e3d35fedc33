use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use biocolumns::align::{Bowtie2Config, Minimap2Config, PairwiseConfig};

mod align;
mod config;
mod copy;
mod output;
mod read;

use config::Config;

/// biocolumns - columnar readers and aligners for bioinformatics files
#[derive(Parser)]
#[command(name = "biocolumns")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Load settings from a TOML config file (default: ./biocolumns.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Worker threads
    #[arg(short = 't', long, default_value_t = 1, global = true)]
    threads: usize,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by the `read-*` commands.
#[derive(Args)]
struct ReadArgs {
    /// Input paths or glob patterns
    #[arg(value_name = "PATH", required = true)]
    paths: Vec<String>,

    /// Output Parquet file
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Add a filepath column
    #[arg(long)]
    include_filepath: bool,
}

/// Query and subject inputs of the aligner commands.
#[derive(Args)]
struct AlignInputs {
    /// Query FASTA/FASTQ files (first mates)
    #[arg(long, value_name = "FASTX", required = true)]
    queries: Vec<String>,

    /// Second-mate files, one per query file
    #[arg(long, value_name = "FASTX")]
    queries2: Vec<String>,

    /// Reference FASTA
    #[arg(long, value_name = "FASTA", conflicts_with = "index")]
    subjects: Option<String>,

    /// Prebuilt index instead of --subjects
    #[arg(long, value_name = "INDEX", required_unless_present = "subjects")]
    index: Option<String>,

    /// Output Parquet file
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,
}

impl AlignInputs {
    fn subjects(&self) -> align::Subjects {
        align::Subjects {
            fasta: self.subjects.clone(),
            index: self.index.clone(),
        }
    }
}

/// minimap2 overrides on top of the config file.
#[derive(Args, Default)]
struct Minimap2Args {
    /// Preset (sr, map-ont, map-pb, asm5, ...)
    #[arg(long)]
    preset: Option<String>,

    /// Secondary alignments kept per query
    #[arg(long)]
    max_secondary: Option<usize>,

    /// k-mer size (0 keeps the preset's)
    #[arg(short = 'k', long)]
    k: Option<u32>,

    /// Minimizer window (0 keeps the preset's)
    #[arg(short = 'w', long)]
    w: Option<u32>,

    /// Write =/X instead of M in CIGAR strings
    #[arg(long)]
    eqx: Option<bool>,
}

impl Minimap2Args {
    fn apply(self, mut config: Minimap2Config) -> Minimap2Config {
        if let Some(preset) = self.preset {
            config.preset = preset;
        }
        if let Some(n) = self.max_secondary {
            config.max_secondary = n;
        }
        if let Some(k) = self.k {
            config.k = k;
        }
        if let Some(w) = self.w {
            config.w = w;
        }
        if let Some(eqx) = self.eqx {
            config.eqx = eqx;
        }
        config
    }
}

/// bowtie2 overrides on top of the config file.
#[derive(Args)]
struct Bowtie2Args {
    /// Preset without dashes (very-fast, sensitive, ...)
    #[arg(long)]
    preset: Option<String>,

    /// Local instead of end-to-end alignment
    #[arg(long)]
    local: bool,

    /// Report up to N alignments per read (-k)
    #[arg(long)]
    max_secondary: Option<usize>,

    /// Extra arguments passed to bowtie2
    #[arg(long, allow_hyphen_values = true)]
    extra_args: Option<String>,

    /// Show bowtie2's stderr
    #[arg(long)]
    show_engine_log: bool,
}

impl Bowtie2Args {
    fn apply(self, mut config: Bowtie2Config, threads: usize) -> Bowtie2Config {
        if let Some(preset) = self.preset {
            config.preset = preset;
        }
        config.local |= self.local;
        if let Some(n) = self.max_secondary {
            config.max_secondary = n;
        }
        if let Some(args) = self.extra_args {
            config.extra_args = args;
        }
        if self.show_engine_log {
            config.quiet = false;
        }
        if threads > 1 {
            config.threads = threads;
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Read FASTA/FASTQ files into a table
    ReadFastx {
        #[command(flatten)]
        args: ReadArgs,

        /// Second-mate files, one per input path
        #[arg(long, value_name = "PATH")]
        sequence2: Vec<String>,

        /// Quality offset of the input (33 or 64)
        #[arg(long, default_value_t = 33)]
        qual_offset: i64,
    },

    /// Read SFF files into a table
    ReadSff {
        #[command(flatten)]
        args: ReadArgs,

        /// Keep the full read instead of applying clip points
        #[arg(long)]
        no_trim: bool,
    },

    /// Read SAM/BAM files into a table
    ReadAlignments {
        #[command(flatten)]
        args: ReadArgs,

        /// name<TAB>length file for headerless input
        #[arg(long, value_name = "TSV")]
        reference_lengths: Option<PathBuf>,

        /// Add sequence and qual columns
        #[arg(long)]
        include_seq_qual: bool,
    },

    /// Read mzML spectra into a table
    #[cfg(feature = "mzml")]
    ReadMzml {
        #[command(flatten)]
        args: ReadArgs,
    },

    /// Read mzML chromatograms into a table
    #[cfg(feature = "mzml")]
    ReadMzmlChromatograms {
        #[command(flatten)]
        args: ReadArgs,
    },

    /// Read Newick trees into node rows
    ReadNewick {
        #[command(flatten)]
        args: ReadArgs,
    },

    /// Read saved GenBank XML (efetch rettype=gb retmode=xml) into a table
    #[cfg(feature = "ncbi")]
    ReadGenbank {
        #[command(flatten)]
        args: ReadArgs,
    },

    /// Read saved five-column feature tables into GFF3-style rows
    #[cfg(feature = "ncbi")]
    ReadFeatureTable {
        #[command(flatten)]
        args: ReadArgs,
    },

    /// Align reads with minimap2
    AlignMinimap2 {
        #[command(flatten)]
        inputs: AlignInputs,

        #[command(flatten)]
        engine: Minimap2Args,

        /// Build one index per subject and align every read against each
        #[arg(long)]
        per_subject_database: bool,
    },

    /// Align reads with bowtie2
    AlignBowtie2 {
        #[command(flatten)]
        inputs: AlignInputs,

        #[command(flatten)]
        engine: Bowtie2Args,
    },

    /// Align two sequences with the gap-affine aligner
    AlignPairwise {
        /// Query sequence
        #[arg(long)]
        query: String,

        /// Subject sequence
        #[arg(long)]
        subject: String,

        /// Mismatch penalty
        #[arg(long)]
        mismatch: Option<i32>,

        /// Gap open penalty
        #[arg(long)]
        gap_open: Option<i32>,

        /// Gap extension penalty
        #[arg(long)]
        gap_extend: Option<i32>,
    },

    /// Build a minimap2 index and save it
    SaveMinimap2Index {
        /// Reference FASTA
        #[arg(long, value_name = "FASTA")]
        subjects: String,

        /// Index file to write
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        #[command(flatten)]
        engine: Minimap2Args,
    },

    /// Write a Newick tree, optionally grafting placements
    CopyNewick {
        /// Input Newick file
        #[arg(value_name = "TREE")]
        tree: String,

        /// Output Newick file (.gz compresses)
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Placement TSV or jplace file
        #[arg(long, value_name = "FILE")]
        placements: Option<String>,

        /// Write {n} edge ids (default: when the input has them)
        #[arg(long)]
        edge_ids: Option<bool>,

        /// gzip or none (default: from the output extension)
        #[arg(long)]
        compression: Option<String>,
    },

    /// Rewrite FASTA/FASTQ files
    CopyFastx {
        /// Input paths or glob patterns
        #[arg(value_name = "PATH", required = true)]
        paths: Vec<String>,

        /// Second-mate files, one per input path
        #[arg(long, value_name = "PATH")]
        sequence2: Vec<String>,

        /// Output path; may contain {ORIENTATION} for split mates
        #[arg(short, long, value_name = "PATH")]
        output: String,

        /// Write FASTQ instead of FASTA
        #[arg(long)]
        fastq: bool,

        /// Interleave mates in one file (required for paired input)
        #[arg(long)]
        interleave: Option<bool>,

        /// Keep header comments
        #[arg(long)]
        include_comment: bool,

        /// gzip, zstd or none (default: from the output extension)
        #[arg(long)]
        compression: Option<String>,

        /// Quality offset of the output (33 or 64)
        #[arg(long)]
        qual_offset: Option<i64>,
    },
}

impl Cli {
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

pub fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
}

pub fn dispatch(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let threads = cli.threads.max(1);
    let out = &config.output;

    let summary = match cli.command {
        Commands::ReadFastx {
            args,
            sequence2,
            qual_offset,
        } => read::fastx(
            args.paths,
            sequence2,
            qual_offset,
            args.include_filepath,
            &args.output,
            threads,
            out,
        )?,
        Commands::ReadSff { args, no_trim } => read::sff(
            args.paths,
            !no_trim,
            args.include_filepath,
            &args.output,
            threads,
            out,
        )?,
        Commands::ReadAlignments {
            args,
            reference_lengths,
            include_seq_qual,
        } => read::alignments(
            args.paths,
            reference_lengths.as_deref(),
            include_seq_qual,
            args.include_filepath,
            &args.output,
            threads,
            out,
        )?,
        #[cfg(feature = "mzml")]
        Commands::ReadMzml { args } => read::mzml(
            args.paths,
            false,
            args.include_filepath,
            &args.output,
            threads,
            out,
        )?,
        #[cfg(feature = "mzml")]
        Commands::ReadMzmlChromatograms { args } => read::mzml(
            args.paths,
            true,
            args.include_filepath,
            &args.output,
            threads,
            out,
        )?,
        Commands::ReadNewick { args } => {
            read::newick(args.paths, args.include_filepath, &args.output, threads, out)?
        }
        #[cfg(feature = "ncbi")]
        Commands::ReadGenbank { args } => read::ncbi(
            args.paths,
            false,
            args.include_filepath,
            &args.output,
            threads,
            out,
        )?,
        #[cfg(feature = "ncbi")]
        Commands::ReadFeatureTable { args } => read::ncbi(
            args.paths,
            true,
            args.include_filepath,
            &args.output,
            threads,
            out,
        )?,
        Commands::AlignMinimap2 {
            inputs,
            engine,
            per_subject_database,
        } => align::minimap2(
            &inputs.queries,
            &inputs.queries2,
            &inputs.subjects(),
            per_subject_database,
            engine.apply(config.minimap2.clone()),
            &inputs.output,
            threads,
            out,
        )?,
        Commands::AlignBowtie2 { inputs, engine } => align::bowtie2(
            &inputs.queries,
            &inputs.queries2,
            &inputs.subjects(),
            engine.apply(config.bowtie2.clone(), threads),
            &inputs.output,
            threads,
            out,
        )?,
        Commands::AlignPairwise {
            query,
            subject,
            mismatch,
            gap_open,
            gap_extend,
        } => {
            let mut engine: PairwiseConfig = config.pairwise.clone();
            if let Some(x) = mismatch {
                engine.mismatch = x;
            }
            if let Some(o) = gap_open {
                engine.gap_open = o;
            }
            if let Some(e) = gap_extend {
                engine.gap_extend = e;
            }
            return align::pairwise(&query, &subject, engine);
        }
        Commands::SaveMinimap2Index {
            subjects,
            output,
            engine,
        } => align::save_minimap2_index(
            &subjects,
            engine.apply(config.minimap2.clone()),
            &output,
            threads,
        )?,
        Commands::CopyNewick {
            tree,
            output,
            placements,
            edge_ids,
            compression,
        } => copy::newick(&tree, &output, placements, edge_ids, compression)?,
        Commands::CopyFastx {
            paths,
            sequence2,
            output,
            fastq,
            interleave,
            include_comment,
            compression,
            qual_offset,
        } => copy::fastx(
            &paths,
            &sequence2,
            &output,
            copy::FastxOutput {
                fastq,
                interleave,
                include_comment,
                compression,
                qual_offset,
            },
            threads,
        )?,
    };
    summary.print();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_minimap2_overrides() {
        let args = Minimap2Args {
            preset: Some("map-ont".into()),
            k: Some(15),
            ..Default::default()
        };
        let config = args.apply(Minimap2Config::default());
        assert_eq!(config.preset, "map-ont");
        assert_eq!(config.k, 15);
        assert_eq!(config.max_secondary, 5);
    }

    #[test]
    fn test_parse_copy_fastx() {
        let cli = Cli::try_parse_from([
            "biocolumns",
            "copy-fastx",
            "in_R1.fq",
            "--sequence2",
            "in_R2.fq",
            "-o",
            "out_{ORIENTATION}.fq",
            "--fastq",
            "--interleave",
            "false",
        ])
        .unwrap();
        let Commands::CopyFastx {
            interleave, fastq, ..
        } = cli.command
        else {
            panic!("wrong subcommand");
        };
        assert_eq!(interleave, Some(false));
        assert!(fastq);
    }
}
