use crate::{files_with_extension, open, progress_bar, subfolders, SequenceMode};
use anyhow::{anyhow, bail, Result};
use colored::Colorize;
use csv::WriterBuilder;
use itertools::Itertools;
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    io::BufRead,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// Species name to the paths of its single-copy BUSCO sequences
pub type Inventory = BTreeMap<String, Vec<PathBuf>>;

/// Species name to BUSCO completeness percentage
pub type Completeness = BTreeMap<String, f64>;

/// Zero-based line of the short summary holding "C:xx.x%[S:..."
const SUMMARY_LINE: usize = 8;

/// Default colour bands when no minimum completeness is given
const HIGH_COMPLETENESS: f64 = 95.;
const MEDIUM_COMPLETENESS: f64 = 90.;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Serialize)]
struct CompletenessRow<'a> {
    species: &'a str,
    completeness: f64,
    status: &'a str,
}

// --------------------------------------------------
/// Collect the BUSCO sequences of every species folder under `busco_dir`.
///
/// Each species must contain `*_odb10/busco*/single*/`; a species without it
/// never finished its BUSCO run, which is fatal.
pub fn inventory(busco_dir: &Path, mode: SequenceMode) -> Result<Inventory> {
    let species_dirs = subfolders(busco_dir)?;
    if species_dirs.is_empty() {
        bail!("No BUSCO results found in {}", busco_dir.display());
    }

    let bar = progress_bar(species_dirs.len());
    let mut inventory = Inventory::new();
    for dir in species_dirs {
        let species = dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("Bad species folder {}", dir.display()))?;

        let single_copy = single_copy_dir(&dir)?;
        debug!("{species}: {}", single_copy.display());
        let paths = files_with_extension(&single_copy, mode.extension())?;
        info!("{species}: {} single-copy BUSCOs", paths.len());

        inventory.insert(species, paths);
        bar.inc(1);
    }
    bar.finish();

    Ok(inventory)
}

// --------------------------------------------------
/// Find `*_odb10/busco*/single*` below a species folder
fn single_copy_dir(species_dir: &Path) -> Result<PathBuf> {
    let mut found: Vec<PathBuf> = vec![];
    for entry in WalkDir::new(species_dir)
        .min_depth(3)
        .max_depth(3)
        .sort_by_file_name()
    {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }

        let names: Vec<_> = entry
            .path()
            .strip_prefix(species_dir)?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();

        if let [lineage, sequences, single] = &names[..] {
            if lineage.ends_with("_odb10")
                && sequences.starts_with("busco")
                && single.starts_with("single")
            {
                found.push(entry.into_path());
            }
        }
    }

    match found.len() {
        0 => bail!(
            "Missing single-copy BUSCO folder (*_odb10/busco*/single*) in {}",
            species_dir.display()
        ),
        1 => Ok(found.remove(0)),
        _ => {
            warn!(
                "Multiple single-copy BUSCO folders in {}, using {}",
                species_dir.display(),
                found[0].display()
            );
            Ok(found.remove(0))
        }
    }
}

// --------------------------------------------------
/// Read the completeness of the given species from their short summaries
pub fn completeness<'a>(
    busco_dir: &Path,
    species: impl IntoIterator<Item = &'a String>,
) -> Result<Completeness> {
    let mut completeness = Completeness::new();
    for name in species {
        let dir = busco_dir.join(name);
        let summary = files_with_extension(&dir, "txt")?
            .into_iter()
            .sorted_by_key(|path| {
                !path
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with("short_summary"))
            })
            .next()
            .ok_or_else(|| {
                anyhow!("Missing BUSCO summary (*.txt) in {}", dir.display())
            })?;

        let pct = parse_summary(&summary)?;
        debug!("{name}: {pct}% complete");
        completeness.insert(name.to_string(), pct);
    }

    Ok(completeness)
}

// --------------------------------------------------
/// Pull the completeness percentage out of a BUSCO short summary
pub fn parse_summary(filename: &Path) -> Result<f64> {
    let line = open(filename)?
        .lines()
        .nth(SUMMARY_LINE)
        .transpose()?
        .ok_or_else(|| {
            anyhow!("BUSCO summary {} is truncated", filename.display())
        })?;

    let complete = Regex::new(r"C:\s*(\d+(?:\.\d+)?)%").unwrap();
    match complete.captures(&line) {
        Some(caps) => Ok(caps[1].parse()?),
        _ => bail!(
            r#"Cannot find completeness in {} line {}: "{}""#,
            filename.display(),
            SUMMARY_LINE + 1,
            line.trim()
        ),
    }
}

// --------------------------------------------------
/// Drop species below the minimum completeness, keeping all without one
pub fn gate(
    mut inventory: Inventory,
    completeness: &Completeness,
    minimum: Option<f64>,
) -> Result<Inventory> {
    if let Some(minimum) = minimum {
        inventory.retain(|species, _| {
            let keep = completeness.get(species).is_some_and(|&v| v >= minimum);
            if !keep {
                info!("Skipping {species} (below {minimum}% complete)");
            }
            keep
        });

        if inventory.is_empty() {
            bail!(
                "All species are below the minimum completeness of {minimum}%, \
                please lower the 'complete' option"
            );
        }
    }
    Ok(inventory)
}

// --------------------------------------------------
pub fn severity(value: f64, minimum: Option<f64>) -> Severity {
    let (high, medium) = match minimum {
        Some(minimum) => (minimum, minimum),
        _ => (HIGH_COMPLETENESS, MEDIUM_COMPLETENESS),
    };

    if value >= high {
        Severity::High
    } else if value >= medium {
        Severity::Medium
    } else {
        Severity::Low
    }
}

// --------------------------------------------------
fn is_kept(value: f64, minimum: Option<f64>) -> bool {
    minimum.map_or(true, |minimum| value >= minimum)
}

// --------------------------------------------------
/// Render the completeness box shown after the inventory scan
pub fn render_table(
    completeness: &Completeness,
    minimum: Option<f64>,
    colorize: bool,
) -> String {
    let name_width = completeness.keys().map(|k| k.len()).max().unwrap_or(0);
    let values: Vec<_> = completeness.values().map(|v| format!("{v:.1}%")).collect();
    let value_width = values.iter().map(|v| v.len()).max().unwrap_or(0);
    let status_width = "skipped".len();

    let title = "BUSCO COMPLETENESS OF GENOMES";
    let inner = (name_width + 4 + value_width + 2 + status_width).max(title.len());
    let frame_width = inner + 4;
    let mut out = format!(
        "{}{title}\n+{}+\n",
        " ".repeat((frame_width + 2 - title.len()) / 2),
        "-".repeat(frame_width)
    );

    let mut skipped = vec![];
    for ((species, &value), shown) in completeness.iter().zip(&values) {
        let status = if is_kept(value, minimum) {
            "kept"
        } else {
            skipped.push(species.as_str());
            "skipped"
        };

        let row = format!(
            "{species:<name_width$}    {shown:>value_width$}  {status:<status_width$}"
        );
        let row = format!("{row:<inner$}");
        let row = if colorize {
            match severity(value, minimum) {
                Severity::High => row.green().to_string(),
                Severity::Medium => row.yellow().to_string(),
                Severity::Low => row.red().to_string(),
            }
        } else {
            row
        };
        out.push_str(&format!("|  {row}  |\n"));
    }
    out.push_str(&format!("+{}+\n\n", "-".repeat(frame_width)));

    match minimum {
        None => out.push_str(
            "'Complete' option set to default, keeping all genomes.\n\n",
        ),
        Some(_) if !skipped.is_empty() => out.push_str(&format!(
            "Skipping following genomes: {}\n\n",
            skipped.iter().map(|s| format!("'{s}'")).join(", ")
        )),
        _ => (),
    }

    out
}

// --------------------------------------------------
pub fn write_completeness(
    filename: &Path,
    completeness: &Completeness,
    minimum: Option<f64>,
) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .has_headers(true)
        .delimiter(b'\t')
        .from_path(filename)?;

    for (species, &value) in completeness {
        wtr.serialize(CompletenessRow {
            species,
            completeness: value,
            status: if is_kept(value, minimum) { "kept" } else { "skipped" },
        })?;
    }
    wtr.flush()?;

    Ok(())
}

// --------------------------------------------------
#[cfg(test)]
mod busco_tests {
    use super::{
        completeness, gate, inventory, parse_summary, render_table, severity,
        write_completeness, Completeness, Severity,
    };
    use crate::{OrthologId, SequenceMode};
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use std::{fs, path::Path};
    use tempfile::tempdir;

    const BUSCO_DIR: &str = "tests/inputs/BUSCO_output";

    fn scores(pairs: &[(&str, f64)]) -> Completeness {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_inventory() -> Result<()> {
        let inventory = inventory(Path::new(BUSCO_DIR), SequenceMode::Genome)?;
        let species: Vec<_> = inventory.keys().cloned().collect();
        assert_eq!(species, vec!["A", "B", "C"]);

        let ids = |name: &str| -> Result<Vec<String>> {
            inventory[name]
                .iter()
                .map(|p| Ok(OrthologId::from_path(p)?.to_string()))
                .collect()
        };
        assert_eq!(ids("A")?, vec!["X.fna", "Y.fna"]);
        assert_eq!(ids("B")?, vec!["X.fna", "Y.fna"]);
        assert_eq!(ids("C")?, vec!["X.fna"]);

        // The protein files sit next to the nucleotide ones
        let proteins = super::inventory(Path::new(BUSCO_DIR), SequenceMode::Proteins)?;
        assert_eq!(proteins["A"].len(), 1);
        assert_eq!(proteins["C"].len(), 0);

        Ok(())
    }

    #[test]
    fn test_inventory_missing_busco_folder() -> Result<()> {
        let dir = tempdir()?;
        let nested = dir
            .path()
            .join("A/run_fungi_odb10/busco_sequences/single_copy_busco_sequences");
        fs::create_dir_all(&nested)?;
        fs::write(nested.join("X.fna"), ">x\nACGT\n")?;
        fs::create_dir_all(dir.path().join("B/run_fungi_odb10"))?;

        let res = inventory(dir.path(), SequenceMode::Genome);
        assert!(res.is_err());
        let msg = res.unwrap_err().to_string();
        assert!(msg.starts_with("Missing single-copy BUSCO folder"));
        assert!(msg.contains("B"));
        Ok(())
    }

    #[test]
    fn test_parse_summary() -> Result<()> {
        let summary = Path::new(BUSCO_DIR).join("A/short_summary.specific.fungi_odb10.A.txt");
        assert_eq!(parse_summary(&summary)?, 96.0);

        let dir = tempdir()?;
        let short = dir.path().join("short.txt");
        fs::write(&short, "# BUSCO version is: 5.4.3\n")?;
        let res = parse_summary(&short);
        assert!(res.is_err());
        assert!(res.unwrap_err().to_string().ends_with("is truncated"));
        Ok(())
    }

    #[test]
    fn test_completeness() -> Result<()> {
        let species = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let res = completeness(Path::new(BUSCO_DIR), &species)?;
        assert_eq!(res, scores(&[("A", 96.0), ("B", 92.0), ("C", 85.0)]));
        Ok(())
    }

    #[test]
    fn test_gate() -> Result<()> {
        let inventory = inventory(Path::new(BUSCO_DIR), SequenceMode::Genome)?;
        let completeness = scores(&[("A", 96.0), ("B", 92.0), ("C", 85.0)]);

        let kept = gate(inventory.clone(), &completeness, None)?;
        assert_eq!(kept.len(), 3);

        let kept = gate(inventory.clone(), &completeness, Some(90.))?;
        let species: Vec<_> = kept.keys().cloned().collect();
        assert_eq!(species, vec!["A", "B"]);

        let res = gate(inventory, &completeness, Some(99.));
        assert!(res.is_err());
        assert!(res
            .unwrap_err()
            .to_string()
            .starts_with("All species are below the minimum completeness of 99%"));
        Ok(())
    }

    #[test]
    fn test_severity() {
        assert_eq!(severity(96., None), Severity::High);
        assert_eq!(severity(95., None), Severity::High);
        assert_eq!(severity(92., None), Severity::Medium);
        assert_eq!(severity(85., None), Severity::Low);
        assert_eq!(severity(92., Some(90.)), Severity::High);
        assert_eq!(severity(89.9, Some(90.)), Severity::Low);
    }

    #[test]
    fn test_render_table() {
        let completeness = scores(&[("A", 96.0), ("B", 92.0), ("Cglab", 85.0)]);
        let table = render_table(&completeness, Some(90.), false);
        let expected = [
            "   BUSCO COMPLETENESS OF GENOMES",
            "+---------------------------------+",
            "|  A        96.0%  kept           |",
            "|  B        92.0%  kept           |",
            "|  Cglab    85.0%  skipped        |",
            "+---------------------------------+",
            "",
            "Skipping following genomes: 'Cglab'",
            "",
        ]
        .join("\n");
        assert_eq!(table, expected + "\n");

        let table = render_table(&completeness, None, false);
        assert!(!table.contains("skipped"));
        assert!(table.ends_with("keeping all genomes.\n\n"));
    }

    #[test]
    fn test_write_completeness() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("completeness.tsv");
        let completeness = scores(&[("A", 96.0), ("B", 92.5), ("C", 85.0)]);
        write_completeness(&path, &completeness, Some(90.))?;
        assert_eq!(
            fs::read_to_string(&path)?,
            "species\tcompleteness\tstatus\nA\t96.0\tkept\nB\t92.5\tkept\nC\t85.0\tskipped\n"
        );
        Ok(())
    }
}
