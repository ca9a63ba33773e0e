use crate::{
    busco::Inventory, open_for_write, progress_bar, read_sequence,
    wrap_sequence, OrthologId, SequenceMode, LINE_WIDTH,
};
use anyhow::{bail, Result};
use csv::WriterBuilder;
use log::{debug, info, warn};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

/// Ortholog to the percentage of species that carry it
pub type Occupancy = BTreeMap<OrthologId, f64>;

#[derive(Debug, Serialize)]
struct OccupancyRow<'a> {
    ortholog: &'a OrthologId,
    occupancy: f64,
    selected: bool,
}

// --------------------------------------------------
/// Percentage of the species in `inventory` having each ortholog,
/// rounded to one decimal
pub fn occupancy(inventory: &Inventory) -> Occupancy {
    let mut counts: BTreeMap<OrthologId, usize> = BTreeMap::new();
    for path in inventory.values().flatten() {
        match OrthologId::from_path(path) {
            Ok(id) => *counts.entry(id).or_default() += 1,
            Err(e) => warn!("{e}"),
        }
    }

    let num_species = inventory.len() as f64;
    counts
        .into_iter()
        .map(|(id, count)| (id, round1(count as f64 / num_species * 100.)))
        .collect()
}

// --------------------------------------------------
fn round1(val: f64) -> f64 {
    (val * 10.).round() / 10.
}

// --------------------------------------------------
/// Name of the filtered file for an ortholog, e.g., "X.fna" => "X_MS.fna"
pub fn filtered_name(id: &OrthologId, mode: SequenceMode) -> String {
    format!("{}_MS.{}", id.stem(), mode.extension())
}

// --------------------------------------------------
/// Write one FASTA per ortholog shared by at least `shared` percent of
/// the species, with a gap run standing in for species that lack it.
///
/// Returns the files written, in ortholog order.
pub fn assemble(
    occupancy: &Occupancy,
    inventory: &Inventory,
    shared: f64,
    mode: SequenceMode,
    outdir: &Path,
) -> Result<Vec<PathBuf>> {
    let max = occupancy.values().copied().fold(None, |acc: Option<f64>, v| {
        Some(acc.map_or(v, |m| m.max(v)))
    });

    match max {
        None => bail!("No BUSCOs found for any species"),
        Some(max) if max < shared => bail!(
            "No BUSCOs detected that matched the submitted shared \
            percentage ({shared}%), please lower shared percentage \
            to at least {max}%."
        ),
        _ => (),
    }

    fs::create_dir_all(outdir)?;

    let selected: Vec<_> = occupancy
        .iter()
        .filter_map(|(id, &pct)| (pct >= shared).then_some(id))
        .collect();
    info!(
        "{} of {} BUSCOs are shared by at least {shared}% of species",
        selected.len(),
        occupancy.len()
    );

    let bar = progress_bar(selected.len());
    let mut written = vec![];
    for id in selected {
        let outfile = outdir.join(filtered_name(id, mode));
        write_filtered(id, inventory, &outfile)?;
        written.push(outfile);
        bar.inc(1);
    }
    bar.finish();

    Ok(written)
}

// --------------------------------------------------
fn write_filtered(
    id: &OrthologId,
    inventory: &Inventory,
    outfile: &Path,
) -> Result<()> {
    // Species in name order with their sequence if they have this ortholog
    let mut entries: Vec<(&str, Option<String>)> = vec![];
    for (species, paths) in inventory {
        let seq = match paths.iter().find(|p| p.ends_with(id.as_str())) {
            Some(path) => Some(read_sequence(path)?),
            _ => None,
        };
        entries.push((species, seq));
    }

    let present: Vec<usize> =
        entries.iter().filter_map(|(_, seq)| seq.as_ref().map(|s| s.len())).collect();

    let gap_len = match present.first() {
        Some(&len) => len,
        _ => bail!("No species has BUSCO {id}"),
    };

    if present.iter().any(|&len| len != gap_len) {
        warn!("{id}: sequence lengths differ ({present:?}), gaps use {gap_len}");
    }
    debug!("{id}: {} of {} species present", present.len(), entries.len());

    let mut output = open_for_write(outfile)?;
    for (species, seq) in entries {
        let seq = seq.unwrap_or_else(|| "-".repeat(gap_len));
        writeln!(output, ">{species}\n{}", wrap_sequence(&seq, LINE_WIDTH))?;
    }

    Ok(())
}

// --------------------------------------------------
pub fn write_occupancy(
    filename: &Path,
    occupancy: &Occupancy,
    shared: f64,
) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .has_headers(true)
        .delimiter(b'\t')
        .from_path(filename)?;

    for (ortholog, &pct) in occupancy {
        wtr.serialize(OccupancyRow {
            ortholog,
            occupancy: pct,
            selected: pct >= shared,
        })?;
    }
    wtr.flush()?;

    Ok(())
}
