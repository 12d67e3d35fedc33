//! `copy-*` commands: write tables back out as Newick or FASTA / FASTQ.

use anyhow::{Context, Result};
use std::path::Path;

use biocolumns::table::{
    collect, copy_fastx, copy_newick, CopyFastxParams, CopyNewickParams, ReadNewick,
    ReadNewickParams,
};

use super::output::Summary;
use super::read::fastx_table;

pub fn newick(
    tree: &str,
    output: &Path,
    placements: Option<String>,
    edge_ids: Option<bool>,
    compression: Option<String>,
) -> Result<Summary> {
    let function = ReadNewick::bind(&ReadNewickParams::new([tree]))?;
    let nodes = collect(&function, 1).with_context(|| format!("Failed to read {tree}"))?;
    let params = CopyNewickParams {
        nodes,
        output_path: output.display().to_string(),
        edge_ids,
        compression,
        placements: None,
        placements_path: placements,
    };
    let count = copy_newick(&params).context("copy-newick failed")?;
    Ok(Summary::new("copy-newick", output, count, "nodes"))
}

pub struct FastxOutput {
    pub fastq: bool,
    pub interleave: Option<bool>,
    pub include_comment: bool,
    pub compression: Option<String>,
    pub qual_offset: Option<i64>,
}

pub fn fastx(
    paths: &[String],
    sequence2: &[String],
    output: &str,
    options: FastxOutput,
    threads: usize,
) -> Result<Summary> {
    let params = CopyFastxParams {
        reads: fastx_table(paths, sequence2, threads)?,
        output_path: output.to_string(),
        fastq: options.fastq,
        interleave: options.interleave,
        id_as_sequence_index: false,
        include_comment: options.include_comment,
        compression: options.compression,
        qual_offset: options.qual_offset,
    };
    let count = copy_fastx(&params).context("copy-fastx failed")?;
    Ok(Summary::new("copy-fastx", Path::new(output), count as usize, "records"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fastq_to_fasta() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.fq");
        std::fs::write(&input, "@r1 first\nACGT\n+\nIIII\n").unwrap();
        let output = dir.path().join("out.fa").display().to_string();
        let options = FastxOutput {
            fastq: false,
            interleave: None,
            include_comment: true,
            compression: None,
            qual_offset: None,
        };
        let summary = fastx(&[input.display().to_string()], &[], &output, options, 1).unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), ">r1 first\nACGT\n");
    }

    #[test]
    fn test_newick_strip_edge_ids() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.nwk");
        std::fs::write(&input, "(A:1{0},B:2{1});\n").unwrap();
        let output = dir.path().join("out.nwk");
        let summary = newick(
            &input.display().to_string(),
            &output,
            None,
            Some(false),
            None,
        )
        .unwrap();
        assert_eq!(summary.count, 3);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "(A:1,B:2);\n");
    }
}
