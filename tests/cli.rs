use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tempfile::{tempdir, TempDir};
use walkdir::WalkDir;

const PRG: &str = "arbophyl";
const SCORER: &str = "msa-score";

// --------------------------------------------------
/// Copy a fixture tree from tests/inputs into the output folder
fn copy_fixture(name: &str, output: &Path) -> Result<()> {
    let src = Path::new("tests/inputs").join(name);
    for entry in WalkDir::new(&src) {
        let entry = entry?;
        let dest = output.join(name).join(entry.path().strip_prefix(&src)?);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

// --------------------------------------------------
fn output_dir(fixtures: &[&str]) -> Result<(TempDir, PathBuf)> {
    let dir = tempdir()?;
    let output = dir.path().join("fungi_tree");
    fs::create_dir_all(&output)?;
    for fixture in fixtures {
        copy_fixture(fixture, &output)?;
    }
    Ok((dir, output))
}

// --------------------------------------------------
fn headers(path: &Path) -> Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .filter_map(|line| line.strip_prefix('>'))
        .map(String::from)
        .collect())
}

// --------------------------------------------------
#[test]
fn usage() -> Result<()> {
    for flag in &["-h", "--help"] {
        Command::cargo_bin(PRG)?
            .arg(flag)
            .assert()
            .stdout(predicate::str::contains("Usage"));
    }
    Ok(())
}

// --------------------------------------------------
#[test]
fn busco_requires_lineage() -> Result<()> {
    let (_dir, output) = output_dir(&[])?;
    Command::cargo_bin(PRG)?
        .args(["-i", "tests/inputs", "-m", "genome", "-p", "1", "-o"])
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("requires a lineage"));
    Ok(())
}

// --------------------------------------------------
#[test]
fn filter_all_shared() -> Result<()> {
    let (_dir, output) = output_dir(&["BUSCO_output"])?;
    Command::cargo_bin(PRG)?
        .args(["-m", "genome", "-p", "filter", "-o"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("BUSCO COMPLETENESS OF GENOMES"))
        .stdout(predicate::str::contains("keeping all genomes"));

    let filtered = output.join("Filtered_BUSCOs");
    assert_eq!(headers(&filtered.join("X_MS.fna"))?, vec!["A", "B", "C"]);
    assert!(!filtered.join("Y_MS.fna").exists());

    assert_eq!(
        fs::read_to_string(output.join("BUSCO_occupancy.tsv"))?,
        "ortholog\toccupancy\tselected\nX.fna\t100.0\ttrue\nY.fna\t66.7\tfalse\n"
    );
    assert!(output.join("arbophyl.log").is_file());
    Ok(())
}

// --------------------------------------------------
#[test]
fn filter_gap_fill() -> Result<()> {
    let (_dir, output) = output_dir(&["BUSCO_output"])?;
    Command::cargo_bin(PRG)?
        .args(["-m", "genome", "-p", "2", "-s", "60", "-o"])
        .arg(&output)
        .assert()
        .success();

    let y = output.join("Filtered_BUSCOs/Y_MS.fna");
    assert_eq!(headers(&y)?, vec!["A", "B", "C"]);

    let contents = fs::read_to_string(&y)?;
    let (_, gap) = contents.split_once(">C\n").unwrap_or_default();
    assert_eq!(gap.replace('\n', ""), "-".repeat(75));
    Ok(())
}

// --------------------------------------------------
#[test]
fn filter_minimum_completeness() -> Result<()> {
    let (_dir, output) = output_dir(&["BUSCO_output"])?;
    Command::cargo_bin(PRG)?
        .args(["-m", "genome", "-p", "filter", "-c", "90", "-o"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Skipping following genomes: 'C'"));

    // Occupancy is over the remaining two species, so Y is shared by all
    let filtered = output.join("Filtered_BUSCOs");
    assert_eq!(headers(&filtered.join("X_MS.fna"))?, vec!["A", "B"]);
    assert_eq!(headers(&filtered.join("Y_MS.fna"))?, vec!["A", "B"]);

    assert_eq!(
        fs::read_to_string(output.join("BUSCO_completeness.tsv"))?,
        "species\tcompleteness\tstatus\nA\t96.0\tkept\nB\t92.0\tkept\nC\t85.0\tskipped\n"
    );
    Ok(())
}

// --------------------------------------------------
#[test]
fn filter_nothing_shared() -> Result<()> {
    let (_dir, output) = output_dir(&["BUSCO_output"])?;
    fs::remove_file(output.join(
        "BUSCO_output/C/run_fungi_odb10/busco_sequences/single_copy_busco_sequences/X.fna",
    ))?;

    Command::cargo_bin(PRG)?
        .args(["-m", "genome", "-p", "filter", "-o"])
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "please lower shared percentage to at least 66.7%",
        ));
    Ok(())
}

// --------------------------------------------------
#[test]
fn filter_all_below_minimum() -> Result<()> {
    let (_dir, output) = output_dir(&["BUSCO_output"])?;
    Command::cargo_bin(PRG)?
        .args(["-m", "genome", "-p", "filter", "-c", "99", "-o"])
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "All species are below the minimum completeness of 99%",
        ));
    assert!(!output.join("Filtered_BUSCOs").exists());
    Ok(())
}

// --------------------------------------------------
#[test]
fn creates_output_dir() -> Result<()> {
    let dir = tempdir()?;
    let output = dir.path().join("new/fungi_tree");
    Command::cargo_bin(PRG)?
        .args(["-m", "proteins", "-p", "partition", "-o"])
        .arg(&output)
        .assert()
        .failure();
    assert!(output.join("arbophyl.log").is_file());
    Ok(())
}

// --------------------------------------------------
#[test]
fn msa_qc() -> Result<()> {
    let (_dir, output) = output_dir(&["Trimmed_MSAs"])?;
    Command::cargo_bin(PRG)?
        .args(["-m", "genome", "-p", "msa-qc", "-o"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 of 2 alignments passed"));

    let trimmed = output.join("Trimmed_MSAs");
    assert!(trimmed.join("Passed_MSA/X_trimmed.fna").is_file());
    assert!(trimmed.join("Failed_MSA/Y_trimmed.fna").is_file());

    let scores = fs::read_to_string(trimmed.join("MSA_scores.tsv"))?;
    assert!(scores.starts_with("alignment\tscore\tstatus\n"));
    assert!(scores.contains("Y_trimmed.fna\t0.0\tfailed\n"));
    Ok(())
}

// --------------------------------------------------
#[test]
fn partition() -> Result<()> {
    let (_dir, output) = output_dir(&["Models"])?;
    Command::cargo_bin(PRG)?
        .args(["-m", "proteins", "-p", "partition", "-o"])
        .arg(&output)
        .assert()
        .success();

    assert_eq!(
        fs::read_to_string(output.join("fungi_tree.nex"))?,
        "#nexus\n\
        begin sets;\n\
        \tcharset 1001at4751 = Models/1001at4751/1001at4751_trimmed.faa: *;\n\
        \tcharset 2042at4751 = Models/2042at4751/2042at4751_trimmed.faa: *;\n\
        \tcharset 317at4751 = Models/317at4751/317at4751_trimmed.faa: *;\n\
        \tcharpartition mine = LG+F+I+G4:1001at4751, WAG+I+G4:2042at4751, JTT+F+G4:317at4751;\n\
        end;\n"
    );
    Ok(())
}

// --------------------------------------------------
#[test]
fn partition_missing_model() -> Result<()> {
    let (_dir, output) = output_dir(&["Models"])?;
    fs::write(
        output.join("Models/2042at4751/2042at4751_trimmed.faa.iqtree"),
        "IQ-TREE 2.2.0\n\nERROR: killed\n",
    )?;

    Command::cargo_bin(PRG)?
        .args(["-m", "proteins", "-p", "6", "-o"])
        .arg(&output)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No best-fit model (BIC:)"))
        .stderr(predicate::str::contains("2042at4751"));
    Ok(())
}

// --------------------------------------------------
#[test]
fn scorer() -> Result<()> {
    let output = Command::cargo_bin(SCORER)?
        .args([
            "tests/inputs/Trimmed_MSAs/X_trimmed.fna",
            "tests/inputs/Trimmed_MSAs/Y_trimmed.fna",
        ])
        .output()?;
    assert!(output.status.success());

    // Same rows as the msa-qc step writes to MSA_scores.tsv
    let stdout = String::from_utf8(output.stdout)?;
    let lines: Vec<_> = stdout.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "alignment\tscore\tstatus");
    assert!(lines[1].starts_with("X_trimmed.fna\t"));
    assert!(lines[1].ends_with("\tpassed"));
    assert_eq!(lines[2], "Y_trimmed.fna\t0.0\tfailed");

    // Scoring leaves the files where they are
    assert!(Path::new("tests/inputs/Trimmed_MSAs/X_trimmed.fna").is_file());
    Ok(())
}

// --------------------------------------------------
#[test]
fn scorer_outfile() -> Result<()> {
    let dir = tempdir()?;
    let outfile = dir.path().join("scores.tsv");
    Command::cargo_bin(SCORER)?
        .args(["tests/inputs/Trimmed_MSAs/Y_trimmed.fna", "-o"])
        .arg(&outfile)
        .assert()
        .success()
        .stdout("");

    assert_eq!(
        fs::read_to_string(&outfile)?,
        "alignment\tscore\tstatus\nY_trimmed.fna\t0.0\tfailed\n"
    );
    Ok(())
}
