pub mod busco;
pub mod config;
pub mod filter;
pub mod msa_qc;
pub mod partition;
pub mod tools;

use anyhow::{anyhow, bail, Result};
use clap::{builder::PossibleValue, Parser, ValueEnum};
use config::Config;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use kseq::parse_reader;
use log::{debug, info};
use serde::Serialize;
use std::{
    fmt,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    time::Instant,
};

pub const BUSCO_DIR: &str = "BUSCO_output";
pub const DOWNLOADS_DIR: &str = "busco_downloads";
pub const FILTERED_DIR: &str = "Filtered_BUSCOs";
pub const MAFFT_DIR: &str = "MAFFT_output";
pub const TRIMMED_DIR: &str = "Trimmed_MSAs";
pub const PASSED_DIR: &str = "Passed_MSA";
pub const FAILED_DIR: &str = "Failed_MSA";
pub const MODELS_DIR: &str = "Models";
pub const LOG_FILE: &str = "arbophyl.log";
pub const COMPLETENESS_FILE: &str = "BUSCO_completeness.tsv";
pub const OCCUPANCY_FILE: &str = "BUSCO_occupancy.tsv";
pub const SCORES_FILE: &str = "MSA_scores.tsv";

/// Width of sequence lines in every FASTA file we write
pub const LINE_WIDTH: usize = 60;

/// ArboPhyl: BUSCO-based phylogenomic tree pipeline
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Folder of genome assemblies or proteomes (required for "busco")
    #[arg(short, long, value_name = "INPUT")]
    pub input: Option<PathBuf>,

    /// Output folder, shared by every step
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Steps to run, comma separated by name or number (e.g., 2,3,4 or all).
    /// 0 all, 1 busco, 2 filter, 3 mafft, 4 trimal, 5 models, 6 partition,
    /// 7 iqtree; msa-qc has no number
    #[arg(
        short,
        long,
        value_name = "STEPS",
        value_delimiter = ',',
        required = true
    )]
    pub pipeline: Vec<Step>,

    /// Sequence mode
    #[arg(short, long, value_name = "MODE")]
    pub mode: SequenceMode,

    /// BUSCO lineage (e.g., ascomycota)
    #[arg(short, long, value_name = "LINEAGE")]
    pub lineage: Option<String>,

    /// Percentage of species that must share a BUSCO gene
    #[arg(short, long, value_name = "SHARED", default_value = "100")]
    pub shared: f64,

    /// Minimum BUSCO completeness of a genome, keeps all when absent
    #[arg(short, long, value_name = "COMPLETE")]
    pub complete: Option<f64>,

    /// Number of CPUs handed to the external tools [default: all]
    #[arg(short, long, value_name = "THREADS")]
    pub threads: Option<usize>,

    /// TOML file with tool locations and arguments
    #[arg(long, value_name = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(long)]
    pub log: Option<LogLevel>,
}

#[derive(Debug, Clone)]
pub enum LogLevel {
    Info,
    Debug,
}

impl ValueEnum for LogLevel {
    fn value_variants<'a>() -> &'a [Self] {
        &[LogLevel::Info, LogLevel::Debug]
    }

    fn to_possible_value<'a>(&self) -> Option<PossibleValue> {
        Some(match self {
            LogLevel::Info => PossibleValue::new("info"),
            LogLevel::Debug => PossibleValue::new("debug"),
        })
    }
}

/// Whether the pipeline works on nucleotide or amino acid BUSCOs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceMode {
    Genome,
    Proteins,
}

impl SequenceMode {
    /// File extension of the BUSCO sequences for this mode
    pub fn extension(&self) -> &'static str {
        match self {
            SequenceMode::Genome => "fna",
            SequenceMode::Proteins => "faa",
        }
    }

    /// Value of BUSCO's `-m` option
    pub fn busco_mode(&self) -> &'static str {
        match self {
            SequenceMode::Genome => "genome",
            SequenceMode::Proteins => "proteins",
        }
    }
}

impl ValueEnum for SequenceMode {
    fn value_variants<'a>() -> &'a [Self] {
        &[SequenceMode::Genome, SequenceMode::Proteins]
    }

    fn to_possible_value<'a>(&self) -> Option<PossibleValue> {
        Some(PossibleValue::new(self.busco_mode()))
    }
}

/// Pipeline steps in the order they must run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Step {
    /// Every step below
    #[value(alias = "0")]
    All,
    /// Predict single-copy orthologs with BUSCO
    #[value(alias = "1")]
    Busco,
    /// Gate on completeness and write shared BUSCOs per gene
    #[value(alias = "2")]
    Filter,
    /// Align the filtered BUSCOs with MAFFT
    #[value(alias = "3")]
    Mafft,
    /// Trim alignments with trimAl
    #[value(alias = "4")]
    Trimal,
    /// Sort trimmed alignments by sum-of-pairs score (by name only)
    MsaQc,
    /// Select substitution models with IQ-TREE
    #[value(alias = "5")]
    Models,
    /// Write the NEXUS partition file
    #[value(alias = "6")]
    Partition,
    /// Build the tree with IQ-TREE
    #[value(alias = "7")]
    Iqtree,
}

impl Step {
    fn title(&self) -> &'static str {
        match self {
            Step::All => "Full pipeline",
            Step::Busco => "BUSCO",
            Step::Filter => "Filter BUSCOs",
            Step::Mafft => "MAFFT",
            Step::Trimal => "TrimAl",
            Step::MsaQc => "MSA QC",
            Step::Models => "IQ-TREE model prediction",
            Step::Partition => "Partition file creation",
            Step::Iqtree => "IQ-TREE",
        }
    }
}

/// An ortholog's key across species: the file name of its BUSCO sequence,
/// extension included (e.g., "1234at4751.fna")
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
)]
pub struct OrthologId(String);

impl OrthologId {
    /// Take the final component of a path
    pub fn from_path(path: &Path) -> Result<Self> {
        path.file_name()
            .map(|name| OrthologId(name.to_string_lossy().to_string()))
            .ok_or_else(|| {
                anyhow!("Cannot get ortholog ID from {}", path.display())
            })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The ID without its file extension
    pub fn stem(&self) -> &str {
        match self.0.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.0,
        }
    }
}

impl fmt::Display for OrthologId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrthologId {
    fn from(value: &str) -> Self {
        OrthologId(value.to_string())
    }
}

// --------------------------------------------------
pub fn run(args: Args) -> Result<()> {
    let start = Instant::now();
    info!("args = {args:#?}");

    let steps = resolve_steps(&args.pipeline);
    validate(&args, &steps)?;

    let config = Config::load(args.config.as_deref())?;
    debug!("config = {config:#?}");

    let threads = args.threads.unwrap_or_else(num_cpus::get);

    for step in steps {
        println!("\n>>> {} <<<\n", step.title());
        info!("Starting step {step:?}");
        match step {
            Step::Busco => {
                // Validated above
                let input = args.input.as_deref().unwrap_or(Path::new("."));
                let lineage = args.lineage.as_deref().unwrap_or_default();
                tools::run_busco(
                    &config.busco,
                    input,
                    &args.output,
                    lineage,
                    args.mode,
                    threads,
                )?
            }
            Step::Filter => filter_buscos(&args)?,
            Step::Mafft => {
                tools::run_mafft(&config.mafft, &args.output, args.mode, threads)?
            }
            Step::Trimal => {
                tools::run_trimal(&config.trimal, &args.output, args.mode)?
            }
            Step::MsaQc => {
                let trimmed = args.output.join(TRIMMED_DIR);
                let scores = msa_qc::route_alignments(&trimmed, args.mode)?;
                msa_qc::write_scores(
                    open_for_write(&trimmed.join(SCORES_FILE))?,
                    &scores,
                )?;
                let passed = scores.iter().filter(|s| s.passed).count();
                println!(
                    "{passed} of {} alignments passed quality control.",
                    scores.len()
                );
            }
            Step::Models => tools::run_model_finder(
                &config.iqtree,
                &args.output,
                args.mode,
                threads,
            )?,
            Step::Partition => {
                let path = partition::create_partition(&args.output, args.mode)?;
                println!(r#"Wrote partition file "{}""#, path.display());
            }
            Step::Iqtree => {
                tools::run_iqtree(&config.iqtree, &args.output, threads)?
            }
            Step::All => unreachable!(),
        }
    }

    println!(
        r#"Finished in {} seconds, see output in "{}""#,
        start.elapsed().as_secs(),
        args.output.display()
    );

    Ok(())
}

// --------------------------------------------------
fn filter_buscos(args: &Args) -> Result<()> {
    let busco_dir = args.output.join(BUSCO_DIR);
    println!("Retrieving BUSCOs...\n");
    let inventory = busco::inventory(&busco_dir, args.mode)?;

    let completeness = busco::completeness(&busco_dir, inventory.keys())?;
    print!("{}", busco::render_table(&completeness, args.complete, true));
    busco::write_completeness(
        &args.output.join(COMPLETENESS_FILE),
        &completeness,
        args.complete,
    )?;

    let inventory = busco::gate(inventory, &completeness, args.complete)?;
    let occupancy = filter::occupancy(&inventory);
    filter::write_occupancy(
        &args.output.join(OCCUPANCY_FILE),
        &occupancy,
        args.shared,
    )?;

    println!("Filtering BUSCOs...\n");
    let written = filter::assemble(
        &occupancy,
        &inventory,
        args.shared,
        args.mode,
        &args.output.join(FILTERED_DIR),
    )?;
    println!(
        "Wrote {} BUSCO genes shared by at least {}% of {} species.",
        written.len(),
        args.shared,
        inventory.len()
    );

    Ok(())
}

// --------------------------------------------------
/// Expand "all" and put the requested steps in pipeline order
pub fn resolve_steps(requested: &[Step]) -> Vec<Step> {
    let all = [
        Step::Busco,
        Step::Filter,
        Step::Mafft,
        Step::Trimal,
        Step::MsaQc,
        Step::Models,
        Step::Partition,
        Step::Iqtree,
    ];

    if requested.contains(&Step::All) {
        all.to_vec()
    } else {
        requested.iter().copied().sorted().dedup().collect()
    }
}

// --------------------------------------------------
fn validate(args: &Args, steps: &[Step]) -> Result<()> {
    if steps.contains(&Step::Busco) {
        if args.input.is_none() {
            bail!("The busco step requires an input folder (--input)");
        }
        if args.lineage.is_none() {
            bail!("The busco step requires a lineage (--lineage)");
        }
    }
    Ok(())
}

// --------------------------------------------------
/// Read the first record of a FASTA file as an upper-case sequence
pub fn read_sequence(filename: &Path) -> Result<String> {
    let mut reader = parse_reader(open(filename)?)?;
    match reader.iter_record()? {
        Some(rec) => Ok(rec.seq().to_uppercase()),
        _ => bail!("No sequence found in {}", filename.display()),
    }
}

// --------------------------------------------------
/// Break a sequence into lines of at most `width` characters
pub fn wrap_sequence(seq: &str, width: usize) -> String {
    if width == 0 {
        return seq.to_string();
    }
    seq.as_bytes()
        .chunks(width)
        .map(String::from_utf8_lossy)
        .join("\n")
}

// --------------------------------------------------
/// The last component of the output folder names the partition file
pub fn output_name(output: &Path) -> Result<String> {
    let canonical;
    let path = if output.file_name().is_some() {
        output
    } else {
        canonical = output.canonicalize()?;
        &canonical
    };

    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| anyhow!("Cannot name output folder {}", output.display()))
}

// --------------------------------------------------
/// Files directly inside `dir` with the given extension, sorted by name
pub fn files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| anyhow!("Cannot read {}: {e}", dir.display()))?;

    let mut files = vec![];
    for entry in entries {
        let path = entry?.path();
        if path.is_file()
            && path.extension().is_some_and(|ext| ext == extension)
        {
            files.push(path);
        }
    }
    files.sort();

    Ok(files)
}

// --------------------------------------------------
/// Immediate subfolders of `dir`, sorted by name
pub fn subfolders(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| anyhow!("Cannot read {}: {e}", dir.display()))?;

    let mut folders = vec![];
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            folders.push(path);
        }
    }
    folders.sort();

    Ok(folders)
}

// --------------------------------------------------
pub(crate) fn progress_bar(len: usize) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap(),
    );
    bar
}

// --------------------------------------------------
pub fn open(filename: &Path) -> Result<Box<dyn BufRead>> {
    Ok(Box::new(BufReader::new(File::open(filename).map_err(
        |e| anyhow!("Cannot read {}: {e}", filename.display()),
    )?)))
}

// --------------------------------------------------
pub fn open_for_write(filename: &Path) -> Result<Box<dyn Write>> {
    Ok(Box::new(BufWriter::new(File::create(filename).map_err(
        |e| anyhow!("Cannot write {}: {e}", filename.display()),
    )?)))
}
