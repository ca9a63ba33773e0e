use crate::{
    files_with_extension, open, progress_bar, SequenceMode, FAILED_DIR,
    PASSED_DIR,
};
use anyhow::{anyhow, bail, Result};
use csv::WriterBuilder;
use itertools::Itertools;
use kseq::parse_reader;
use log::{debug, info};
use serde::Serialize;
use std::{fs, io::Write, path::Path};

/// Minimum sum-of-pairs score for an alignment to pass
pub const PASS_THRESHOLD: f64 = 0.45;

/// Score given to an alignment of a single taxon, which has no pairs
pub const SINGLE_TAXON_SCORE: f64 = 1.;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentScore {
    pub alignment: String,
    pub score: f64,
    #[serde(rename = "status", serialize_with = "serialize_status")]
    pub passed: bool,
}

fn serialize_status<S>(passed: &bool, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_str(if *passed { "passed" } else { "failed" })
}

// --------------------------------------------------
/// Fraction of all pairs of residues in one column that are identical
pub fn column_identity(column: &[u8]) -> f64 {
    let num_pairs = column.len() * column.len().saturating_sub(1) / 2;
    if num_pairs == 0 {
        return SINGLE_TAXON_SCORE;
    }

    let matches = column
        .iter()
        .tuple_combinations()
        .filter(|(a, b)| a == b)
        .count();

    matches as f64 / num_pairs as f64
}

// --------------------------------------------------
/// Mean column identity over an alignment given as equal-length rows
pub fn sum_of_pairs(rows: &[Vec<u8>]) -> Result<f64> {
    let num_cols = match rows.first() {
        Some(row) => row.len(),
        _ => bail!("Alignment has no sequences"),
    };

    if let Some(row) = rows.iter().find(|row| row.len() != num_cols) {
        bail!(
            "Alignment rows differ in length ({} and {num_cols})",
            row.len()
        );
    }

    if num_cols == 0 {
        return Ok(0.);
    }

    let total: f64 = (0..num_cols)
        .map(|col| {
            let column: Vec<u8> = rows.iter().map(|row| row[col]).collect();
            column_identity(&column)
        })
        .sum();

    Ok(total / num_cols as f64)
}

// --------------------------------------------------
/// Read the upper-cased rows of an aligned FASTA file
pub fn read_alignment(filename: &Path) -> Result<Vec<Vec<u8>>> {
    let mut reader = parse_reader(open(filename)?)?;
    let mut rows = vec![];
    while let Some(rec) = reader.iter_record()? {
        rows.push(rec.seq().to_ascii_uppercase().into_bytes());
    }
    Ok(rows)
}

// --------------------------------------------------
pub fn score_file(filename: &Path) -> Result<AlignmentScore> {
    let rows = read_alignment(filename)?;
    let score = sum_of_pairs(&rows)
        .map_err(|e| anyhow!("{}: {e}", filename.display()))?;

    Ok(AlignmentScore {
        alignment: filename
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
        score,
        passed: score >= PASS_THRESHOLD,
    })
}

// --------------------------------------------------
/// Score every alignment in `dir` and move it into the passed or failed
/// folder beneath it
pub fn route_alignments(
    dir: &Path,
    mode: SequenceMode,
) -> Result<Vec<AlignmentScore>> {
    let files = files_with_extension(dir, mode.extension())?;
    if files.is_empty() {
        bail!("No trimmed alignments (*.{}) in {}", mode.extension(), dir.display());
    }

    let passed_dir = dir.join(PASSED_DIR);
    let failed_dir = dir.join(FAILED_DIR);
    for out in [&passed_dir, &failed_dir] {
        if out.is_dir() && fs::read_dir(out)?.next().is_some() {
            bail!(
                "{} already exists and is not empty, remove it before rerunning",
                out.display()
            );
        }
        fs::create_dir_all(out)?;
    }

    let bar = progress_bar(files.len());
    let mut scores = vec![];
    for file in files {
        let score = score_file(&file)?;
        debug!("{} = {:0.04}", score.alignment, score.score);

        let dest = if score.passed { &passed_dir } else { &failed_dir };
        fs::rename(&file, dest.join(&score.alignment))?;
        scores.push(score);
        bar.inc(1);
    }
    bar.finish();

    info!(
        "{} of {} alignments passed",
        scores.iter().filter(|s| s.passed).count(),
        scores.len()
    );

    Ok(scores)
}

// --------------------------------------------------
/// Tab-separated "alignment, score, status" rows with a header
pub fn write_scores(out: impl Write, scores: &[AlignmentScore]) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .has_headers(true)
        .delimiter(b'\t')
        .from_writer(out);

    for score in scores {
        wtr.serialize(score)?;
    }
    wtr.flush()?;

    Ok(())
}
