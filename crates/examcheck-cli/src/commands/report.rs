//! The `examcheck report` command.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};
use serde::Serialize;

use examcheck_store::{CoverageReport, RunDetail, Store};

/// Everything `--format json` prints.
#[derive(Serialize)]
struct Summary {
    counts: std::collections::BTreeMap<String, usize>,
    runs: Vec<RunDetail>,
    coverage: CoverageReport,
    performance: Option<Timing>,
}

#[derive(Serialize)]
struct Timing {
    samples: usize,
    mean_ms: f64,
    median_ms: u64,
    max_ms: u64,
}

pub fn execute(
    database: PathBuf,
    format: String,
    extract: Option<String>,
    output: PathBuf,
    clear: bool,
) -> Result<()> {
    anyhow::ensure!(
        database.exists(),
        "results database not found: {}",
        database.display()
    );
    let store = Store::open(&database)?;

    if clear {
        store.clear()?;
        println!("Cleared results in {}", database.display());
        return Ok(());
    }

    if let Some(batch) = extract {
        return extract_files(&store, &batch, &output);
    }

    let summary = Summary {
        counts: store.counts()?,
        runs: store.details()?,
        coverage: store.coverage()?,
        performance: timing(store.performance()?),
    };

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => print_text(&summary),
    }
    Ok(())
}

fn timing(mut samples: Vec<u64>) -> Option<Timing> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_unstable();
    let total: u64 = samples.iter().sum();
    Some(Timing {
        samples: samples.len(),
        mean_ms: total as f64 / samples.len() as f64,
        median_ms: samples[samples.len() / 2],
        max_ms: samples[samples.len() - 1],
    })
}

fn print_text(summary: &Summary) {
    let total: usize = summary.counts.values().sum();
    println!("Runs: {total}");

    let mut counts = Table::new();
    counts.set_header(vec!["Status", "Runs"]);
    for (status, n) in &summary.counts {
        counts.add_row(vec![Cell::new(status), Cell::new(n)]);
    }
    println!("{counts}");

    let mut runs = Table::new();
    runs.set_header(vec!["Created", "Batch", "Status", "Users", "Elapsed"]);
    for run in summary.runs.iter().take(20) {
        runs.add_row(vec![
            Cell::new(&run.created),
            Cell::new(&run.batch),
            Cell::new(&run.success),
            Cell::new(run.nusers),
            Cell::new(format!("{}s", run.elapsed_secs)),
        ]);
    }
    println!("\n{runs}");

    let mut coverage = Table::new();
    coverage.set_header(vec!["Question", "Cases", "Covered", "%"]);
    for q in &summary.coverage.questions {
        let pct = if q.cases == 0 {
            0.0
        } else {
            q.occurred as f64 * 100.0 / q.cases as f64
        };
        coverage.add_row(vec![
            Cell::new(&q.question),
            Cell::new(q.cases),
            Cell::new(q.occurred),
            Cell::new(format!("{pct:.1}")),
        ]);
    }
    println!("\n{coverage}");
    println!("Coverage: {:.1}%", summary.coverage.percentage);

    if let Some(t) = &summary.performance {
        println!(
            "Timing: {} samples, mean {:.0}ms, median {}ms, max {}ms",
            t.samples, t.mean_ms, t.median_ms, t.max_ms
        );
    }
}

fn extract_files(store: &Store, batch: &str, output: &Path) -> Result<()> {
    let files = store
        .files(batch)?
        .with_context(|| format!("no run with batch id {batch}"))?;
    for (name, content) in &files {
        let path = output.join(safe_relative(name));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Wrote {}", path.display());
    }
    println!("{} file(s) from {batch}", files.len());
    Ok(())
}

/// Bundle names may nest, but must stay below the output directory.
fn safe_relative(name: &str) -> PathBuf {
    Path::new(name)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_names_cannot_escape() {
        assert_eq!(safe_relative("../../etc/passwd"), PathBuf::from("etc/passwd"));
        assert_eq!(
            safe_relative("test/v1 [initial]/archive.zip"),
            PathBuf::from("test/v1 [initial]/archive.zip")
        );
        assert_eq!(safe_relative("/abs/protocol.txt"), PathBuf::from("abs/protocol.txt"));
    }

    #[test]
    fn timing_of_samples() {
        assert!(timing(Vec::new()).is_none());
        let t = timing(vec![30, 10, 20]).unwrap();
        assert_eq!(t.samples, 3);
        assert_eq!(t.median_ms, 20);
        assert_eq!(t.max_ms, 30);
        assert!((t.mean_ms - 20.0).abs() < 1e-9);
    }
}
