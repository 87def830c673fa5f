//! The `examcheck probe` command.
//!
//! Sends a demo exam to every remote machine of the configuration. Each
//! worker answers it against its own simulated server, so this checks the
//! wiring and the session engine, not a live exam server.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use examcheck_core::batch::new_batch_id;
use examcheck_core::command::{TakeExamCommand, TAKE_EXAM};
use examcheck_core::exam::ExamConfiguration;
use examcheck_core::orchestration::Orchestration;
use examcheck_core::question::QuestionSet;
use examcheck_core::result::ExamResult;
use examcheck_core::settings::Settings;
use examcheck_core::traits::{Machine, ProgressReporter};
use examcheck_machines::load_config_from;

struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn report(&self, origin: &str, message: &str) {
        eprintln!("  [{origin}] {message}");
    }
}

pub async fn execute(config_path: Option<PathBuf>, wait_time: f64) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    config.validate()?;
    anyhow::ensure!(
        !config.machines.is_empty(),
        "no [machines] configured; run `examcheck init` for a template"
    );

    let machines = config.http_machines()?;
    let orchestration = Orchestration::new();
    let reporter = ConsoleReporter;
    let batch_id = new_batch_id();

    let mut table = Table::new();
    table.set_header(vec!["Machine", "Status", "Answers", "Detail"]);
    let mut failed = 0;

    for (i, machine) in machines.iter().enumerate() {
        let command = probe_command(machine.name(), i as u32 + 1, wait_time, &config.settings);
        eprintln!("Probing {}...", machine.name());
        match machine.take_exam(&batch_id, &command, &orchestration, &reporter).await {
            Ok(result) if !result.has_errors() => {
                table.add_row(vec![
                    Cell::new(machine.name()),
                    Cell::new("OK"),
                    Cell::new(result.answers().len()),
                    Cell::new(""),
                ]);
            }
            Ok(result) => {
                failed += 1;
                table.add_row(vec![
                    Cell::new(machine.name()),
                    Cell::new(format!("FAIL/{}", result.most_severe_error_domain())),
                    Cell::new(result.answers().len()),
                    Cell::new(first_error(&result)),
                ]);
            }
            Err(e) => {
                failed += 1;
                table.add_row(vec![
                    Cell::new(machine.name()),
                    Cell::new("UNREACHABLE"),
                    Cell::new("-"),
                    Cell::new(format!("{e:#}")),
                ]);
            }
        }
    }

    println!("{table}");
    anyhow::ensure!(failed == 0, "{failed} of {} machine(s) failed the probe", machines.len());
    Ok(())
}

fn probe_command(
    machine: &str,
    machine_index: u32,
    wait_time: f64,
    settings: &Settings,
) -> TakeExamCommand {
    let test_id = "probe".to_string();
    TakeExamCommand {
        command: TAKE_EXAM.to_string(),
        machine: machine.to_string(),
        machine_index,
        username: format!("probe{machine_index}"),
        password: uuid::Uuid::new_v4().to_string(),
        test_url: format!("sim://exam/test/{test_id}"),
        test_id,
        server_url: "sim://exam".to_string(),
        wait_time,
        admin_lang: Default::default(),
        questions: QuestionSet::demo(),
        exam_configuration: ExamConfiguration::default(),
        settings: settings.clone(),
        workarounds: Default::default(),
    }
}

fn first_error(result: &ExamResult) -> String {
    result
        .errors()
        .values()
        .next()
        .cloned()
        .unwrap_or_default()
}
