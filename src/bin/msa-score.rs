use anyhow::Result;
use arbophyl::{
    msa_qc::{score_file, write_scores},
    open_for_write,
};
use clap::Parser;
use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

/// Sum-of-pairs score of aligned FASTA files, without moving them
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Aligned FASTA files
    #[arg(value_name = "ALIGNMENTS", required = true, num_args = 1..)]
    pub alignments: Vec<PathBuf>,

    /// Output filename
    #[arg(short, long, value_name = "OUTPUT", default_value = "-")]
    pub output: String,
}

// --------------------------------------------------
fn main() {
    if let Err(e) = run(Args::parse()) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

// --------------------------------------------------
pub fn run(args: Args) -> Result<()> {
    let output: Box<dyn Write> = match args.output.as_str() {
        "-" => Box::new(io::stdout()),
        out_name => open_for_write(Path::new(out_name))?,
    };

    let scores = args
        .alignments
        .iter()
        .map(|path| score_file(path))
        .collect::<Result<Vec<_>>>()?;
    write_scores(output, &scores)
}
