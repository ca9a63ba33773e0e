use crate::{
    open, open_for_write, output_name, subfolders, SequenceMode, MODELS_DIR,
};
use anyhow::{anyhow, bail, Result};
use itertools::Itertools;
use log::{debug, info};
use std::{
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

/// Report line naming the model chosen by the Bayesian information criterion
const MARKER: &str = "BIC:";

/// Name of the partition scheme in the `charpartition` line
const PARTITION_NAME: &str = "mine";

/// One ortholog's trimmed alignment and its best-fit model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelAssignment {
    pub ortholog: String,
    pub model: String,
}

// --------------------------------------------------
/// Alignment file name used for an ortholog inside its models folder
pub fn trimmed_name(ortholog: &str, mode: SequenceMode) -> String {
    format!("{ortholog}_trimmed.{}", mode.extension())
}

// --------------------------------------------------
/// Find the best-fit model in an IQ-TREE report: the text after ": " on
/// the first line mentioning "BIC:"
pub fn parse_model(report: &Path) -> Result<String> {
    for line in open(report)?.lines() {
        let line = line?;
        if line.contains(MARKER) {
            return line
                .split(": ")
                .nth(1)
                .map(|model| model.trim().to_string())
                .filter(|model| !model.is_empty())
                .ok_or_else(|| {
                    anyhow!(r#"Cannot read model from "{}" in {}"#, line.trim(), report.display())
                });
        }
    }

    bail!(
        "No best-fit model ({MARKER}) in {}, did model selection finish?",
        report.display()
    )
}

// --------------------------------------------------
/// Read the model of every ortholog folder in `models_dir`, in name order
pub fn model_assignments(
    models_dir: &Path,
    mode: SequenceMode,
) -> Result<Vec<ModelAssignment>> {
    let mut assignments = vec![];
    for dir in subfolders(models_dir)? {
        let ortholog = dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("Bad models folder {}", dir.display()))?;

        let report = dir.join(format!("{}.iqtree", trimmed_name(&ortholog, mode)));
        let model = parse_model(&report)?;
        debug!("{ortholog} => {model}");
        assignments.push(ModelAssignment { ortholog, model });
    }

    if assignments.is_empty() {
        bail!("No model folders found in {}", models_dir.display());
    }

    Ok(assignments)
}

// --------------------------------------------------
/// Write the NEXUS sets block; charsets and the charpartition list follow
/// the same ortholog order
pub fn write_partition(
    mut output: impl Write,
    assignments: &[ModelAssignment],
    mode: SequenceMode,
) -> Result<()> {
    writeln!(output, "#nexus\nbegin sets;")?;
    for ModelAssignment { ortholog, .. } in assignments {
        writeln!(
            output,
            "\tcharset {ortholog} = {MODELS_DIR}/{ortholog}/{}: *;",
            trimmed_name(ortholog, mode)
        )?;
    }
    writeln!(
        output,
        "\tcharpartition {PARTITION_NAME} = {};",
        assignments
            .iter()
            .map(|a| format!("{}:{}", a.model, a.ortholog))
            .join(", ")
    )?;
    writeln!(output, "end;")?;

    Ok(())
}

// --------------------------------------------------
/// Create "{output}/{output name}.nex" from the reports under "{output}/Models"
pub fn create_partition(output: &Path, mode: SequenceMode) -> Result<PathBuf> {
    let assignments = model_assignments(&output.join(MODELS_DIR), mode)?;
    let outfile = output.join(format!("{}.nex", output_name(output)?));

    info!(
        r#"Writing {} partitions to "{}""#,
        assignments.len(),
        outfile.display()
    );
    let mut out = open_for_write(&outfile)?;
    write_partition(&mut out, &assignments, mode)?;
    out.flush()?;

    Ok(outfile)
}
