//! # biocolumns
//!
//! Command-line front end: reads bioinformatics files into Parquet tables,
//! aligns reads, and writes trees and sequences back out.
//!
//! ## Usage
//!
//! ```bash
//! # FASTQ pair to Parquet
//! biocolumns read-fastx reads_R1.fq.gz --sequence2 reads_R2.fq.gz -o reads.parquet
//!
//! # Align against a reference with minimap2
//! biocolumns align-minimap2 --queries reads.fq --subjects ref.fa -o hits.parquet
//!
//! # Graft placements onto a reference tree
//! biocolumns copy-newick ref.nwk --placements placed.jplace -o placed.nwk
//! ```

use anyhow::Result;
use clap::Parser;

mod cli;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli::init_logging(cli.verbosity());
    cli::dispatch(cli)
}
