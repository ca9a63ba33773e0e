use crate::{
    config::{IqTree, Tool},
    files_with_extension, open_for_write, output_name, partition::trimmed_name,
    SequenceMode, BUSCO_DIR, DOWNLOADS_DIR, FILTERED_DIR, MAFFT_DIR,
    MODELS_DIR, PASSED_DIR, TRIMMED_DIR,
};
use anyhow::{anyhow, bail, Result};
use log::{debug, info};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Output},
};

/// Extensions of the assemblies/proteomes handed to BUSCO
const INPUT_EXTENSIONS: &[&str] = &["fa", "fas", "fasta", "fna", "faa"];

// --------------------------------------------------
fn locate(binary: &str) -> Result<PathBuf> {
    which::which(binary)
        .map_err(|e| anyhow!(r#"Cannot find "{binary}" ({e}), is it installed?"#))
}

// --------------------------------------------------
fn execute(binary: &Path, args: &[String], dir: Option<&Path>) -> Result<Output> {
    info!(r#"Running "{} {}""#, binary.display(), args.join(" "));

    let mut cmd = Command::new(binary);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }

    let res = cmd.args(args).output()?;
    if !res.status.success() {
        debug!("{}", String::from_utf8_lossy(&res.stdout));
        bail!(
            "{} failed: {}",
            binary.display(),
            String::from_utf8_lossy(&res.stderr).trim()
        );
    }

    Ok(res)
}

// --------------------------------------------------
fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

// --------------------------------------------------
/// Species name BUSCO writes under, the file name up to the first "_"
pub fn species_name(input: &Path) -> Option<String> {
    input
        .file_stem()
        .and_then(|stem| stem.to_string_lossy().split('_').next().map(String::from))
        .filter(|name| !name.is_empty())
}

// --------------------------------------------------
/// BUSCO lineage dataset, e.g., "Fungi" => "fungi_odb10"
pub fn lineage_dataset(lineage: &str) -> String {
    let lineage = lineage.to_lowercase();
    if lineage.ends_with("_odb10") {
        lineage
    } else {
        format!("{lineage}_odb10")
    }
}

// --------------------------------------------------
/// Strip the suffix a previous step appended to the ortholog ID
fn ortholog_stem<'a>(file: &'a Path, suffix: &str) -> Option<&'a str> {
    file.file_stem()?.to_str()?.strip_suffix(suffix)
}

// --------------------------------------------------
pub fn run_busco(
    tool: &Tool,
    input: &Path,
    output: &Path,
    lineage: &str,
    mode: SequenceMode,
    threads: usize,
) -> Result<()> {
    let binary = locate(&tool.binary)?;
    let mut inputs = vec![];
    for ext in INPUT_EXTENSIONS {
        inputs.extend(files_with_extension(input, ext)?);
    }
    inputs.sort();

    if inputs.is_empty() {
        bail!("No sequence files found in {}", input.display());
    }

    let out_path = output.join(BUSCO_DIR);
    fs::create_dir_all(&out_path)?;
    for file in inputs {
        let species = species_name(&file).ok_or_else(|| {
            anyhow!("Cannot name species from {}", file.display())
        })?;
        println!("BUSCO: {species}");

        let mut args = vec![
            "-i".to_string(),
            path_arg(&file),
            "-o".to_string(),
            species,
            "--out_path".to_string(),
            path_arg(&out_path),
            "--download_path".to_string(),
            path_arg(&output.join(DOWNLOADS_DIR)),
            "-l".to_string(),
            lineage_dataset(lineage),
            "-m".to_string(),
            mode.busco_mode().to_string(),
            "-c".to_string(),
            threads.to_string(),
        ];
        args.extend_from_slice(&tool.args);
        execute(&binary, &args, None)?;
    }

    Ok(())
}

// --------------------------------------------------
pub fn run_mafft(
    tool: &Tool,
    output: &Path,
    mode: SequenceMode,
    threads: usize,
) -> Result<()> {
    let binary = locate(&tool.binary)?;
    let files = files_with_extension(&output.join(FILTERED_DIR), mode.extension())?;
    let outdir = output.join(MAFFT_DIR);
    fs::create_dir_all(&outdir)?;

    for file in files {
        let Some(ortholog) = ortholog_stem(&file, "_MS") else {
            debug!("Skipping {}", file.display());
            continue;
        };

        let mut args = tool.args.clone();
        args.extend_from_slice(&[
            "--thread".to_string(),
            threads.to_string(),
            path_arg(&file),
        ]);
        let res = execute(&binary, &args, None)?;

        let msa = outdir.join(format!("{ortholog}_MSA.{}", mode.extension()));
        let mut out = open_for_write(&msa)?;
        out.write_all(&res.stdout)?;
    }

    Ok(())
}

// --------------------------------------------------
pub fn run_trimal(tool: &Tool, output: &Path, mode: SequenceMode) -> Result<()> {
    let binary = locate(&tool.binary)?;
    let files = files_with_extension(&output.join(MAFFT_DIR), mode.extension())?;
    let outdir = output.join(TRIMMED_DIR);
    fs::create_dir_all(&outdir)?;

    for file in files {
        let Some(ortholog) = ortholog_stem(&file, "_MSA") else {
            debug!("Skipping {}", file.display());
            continue;
        };

        let mut args = vec![
            "-in".to_string(),
            path_arg(&file),
            "-out".to_string(),
            path_arg(&outdir.join(trimmed_name(ortholog, mode))),
        ];
        args.extend_from_slice(&tool.args);
        execute(&binary, &args, None)?;
    }

    Ok(())
}

// --------------------------------------------------
/// Copy each passed alignment into "Models/{ortholog}/" and select its
/// substitution model there
pub fn run_model_finder(
    tool: &IqTree,
    output: &Path,
    mode: SequenceMode,
    threads: usize,
) -> Result<()> {
    let binary = locate(&tool.binary)?;
    let passed = output.join(TRIMMED_DIR).join(PASSED_DIR);
    let files = files_with_extension(&passed, mode.extension())?;
    if files.is_empty() {
        bail!("No alignments passed quality control in {}", passed.display());
    }

    for file in files {
        let Some(ortholog) = ortholog_stem(&file, "_trimmed") else {
            debug!("Skipping {}", file.display());
            continue;
        };

        let dir = output.join(MODELS_DIR).join(ortholog);
        fs::create_dir_all(&dir)?;
        let alignment = dir.join(trimmed_name(ortholog, mode));
        fs::copy(&file, &alignment)?;

        let mut args = vec!["-s".to_string(), path_arg(&alignment)];
        args.extend_from_slice(&tool.model_args);
        args.extend_from_slice(&["-T".to_string(), threads.to_string()]);
        execute(&binary, &args, None)?;
    }

    Ok(())
}

// --------------------------------------------------
/// Build the tree from the partition file, inside the output folder so the
/// relative charset paths resolve
pub fn run_iqtree(tool: &IqTree, output: &Path, threads: usize) -> Result<()> {
    let binary = locate(&tool.binary)?;
    let partition = format!("{}.nex", output_name(output)?);
    if !output.join(&partition).is_file() {
        bail!(
            "Missing partition file {}",
            output.join(&partition).display()
        );
    }

    let mut args = vec![
        "-p".to_string(),
        partition,
        "-T".to_string(),
        threads.to_string(),
    ];
    args.extend_from_slice(&tool.tree_args);
    execute(&binary, &args, Some(output))?;

    Ok(())
}
