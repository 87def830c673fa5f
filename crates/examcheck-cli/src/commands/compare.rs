//! The `examcheck compare` command.

use std::path::PathBuf;

use anyhow::Result;

use examcheck_core::result::{ExamResult, RowStatus};
use examcheck_machines::load_config_from;

pub fn execute(
    expected_path: PathBuf,
    actual_path: PathBuf,
    config_path: Option<PathBuf>,
    fail_on_mismatch: bool,
    format: String,
) -> Result<()> {
    let expected = ExamResult::load_json(&expected_path)?;
    let actual = ExamResult::load_json(&actual_path)?;
    let workarounds = match config_path {
        Some(path) => load_config_from(Some(&path))?.workarounds,
        None => Default::default(),
    };

    let comparison = expected.compare(&actual, &workarounds);

    match format.as_str() {
        "markdown" | "md" => {
            println!("{}", comparison.to_markdown());
        }
        "json" => {
            println!("{}", serde_json::to_string_pretty(&comparison)?);
        }
        _ => {
            let count = |status: RowStatus| comparison.rows.iter().filter(|r| r.status == status).count();
            println!(
                "Comparison: {} matching, {} differing, {} ignored",
                count(RowStatus::Ok),
                count(RowStatus::Fail),
                count(RowStatus::Ignored)
            );

            let failures: Vec<_> = comparison.failures().collect();
            if !failures.is_empty() {
                println!("\nDifferences ({} / {}):", comparison.mine, comparison.theirs);
                for row in failures {
                    println!("  {}: {} != {}", row.key, row.mine, row.theirs);
                }
            }

            if !comparison.errors.is_empty() {
                println!("\nErrors:");
                for error in &comparison.errors {
                    println!("  {error}");
                }
            }

            if comparison.success {
                println!("\nResults match.");
            }
        }
    }

    if fail_on_mismatch && !comparison.success {
        std::process::exit(1);
    }

    Ok(())
}
