//! The `examcheck master` command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use comfy_table::{Cell, Table};

use examcheck_core::batch::{Batch, BatchEvent};
use examcheck_core::exam::ExamConfiguration;
use examcheck_core::orchestration::Orchestration;
use examcheck_core::question::QuestionSet;
use examcheck_core::traits::Machine;
use examcheck_machines::load_config_from;
use examcheck_runner::{LocalMachine, SimulatedServer};
use examcheck_store::Store;

use super::{fault_set, Fault};

pub struct MasterArgs {
    pub config: Option<PathBuf>,
    pub machines: Option<usize>,
    pub faults: Vec<Fault>,
    pub looping: bool,
    pub database: Option<PathBuf>,
    pub seed: Option<u64>,
    pub wait_time: Option<f64>,
}

pub async fn execute(args: MasterArgs) -> Result<()> {
    let config = load_config_from(args.config.as_deref())?;
    config.validate()?;

    let count = args.machines.unwrap_or(config.machines.len().max(2));
    anyhow::ensure!(count >= 1, "at least one machine is needed");

    let mut run_config = config.run_config();
    if run_config.test_title.is_empty() {
        run_config.test_title = "Demo".to_string();
    }
    if let Some(seed) = args.seed {
        run_config.master_seed = Some(seed);
    }
    if let Some(wait_time) = args.wait_time {
        anyhow::ensure!(wait_time >= 0.0, "wait time must not be negative");
        run_config.wait_time = wait_time;
    }

    let server = SimulatedServer::with_faults(run_config.admin_lang, fault_set(&args.faults));
    run_config.test_id = server.create_test(
        &run_config.test_title,
        QuestionSet::demo(),
        ExamConfiguration::default(),
    );
    run_config.server_url = "sim://exam".to_string();

    let machines: Vec<Arc<dyn Machine>> = (1..=count)
        .map(|i| {
            let connector = Arc::new(server.clone());
            Arc::new(LocalMachine::supervised(format!("machine{i}"), connector)) as Arc<dyn Machine>
        })
        .collect();

    let database = args.database.unwrap_or_else(|| config.run.database.clone());
    let store = Store::open(&database)?;

    eprintln!(
        "examcheck v{}: {} machine(s) on test '{}'{}",
        env!("CARGO_PKG_VERSION"),
        count,
        run_config.test_title,
        if args.looping { ", looping" } else { "" }
    );
    for line in run_config.settings.status_lines() {
        eprintln!("  {line}");
    }
    eprintln!();

    let orchestration = Orchestration::new();
    let batch = Batch::new(run_config, Arc::new(server), machines, orchestration.clone())
        .with_store(Arc::new(store.clone()))
        .looping(args.looping || config.run.looping);

    let interrupt = orchestration.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, finishing the current run...");
            interrupt.cancel();
        }
    });

    let (_, mut events) = batch.subscribe();
    let collector = tokio::spawn(async move {
        let mut errors = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                BatchEvent::Message { origin, message } if origin == "error" => errors.push(message),
                BatchEvent::Message { .. } => {}
                BatchEvent::Done { .. } => break,
            }
        }
        errors
    });

    let success = batch.run().await;
    let errors = collector.await.unwrap_or_default();

    print_summary(batch.id(), &success, count, &errors, &store)?;
    eprintln!("Results saved to: {}", database.display());

    anyhow::ensure!(success == "OK", "run finished with {success}");
    Ok(())
}

fn print_summary(
    batch: &str,
    success: &str,
    machines: usize,
    errors: &[String],
    store: &Store,
) -> Result<()> {
    let mut table = Table::new();
    table.set_header(vec!["Batch", "Status", "Machines", "Errors"]);
    table.add_row(vec![
        Cell::new(batch),
        Cell::new(success),
        Cell::new(machines),
        Cell::new(errors.len()),
    ]);
    eprintln!("\n{table}");

    for error in errors {
        eprintln!("  ERROR: {error}");
    }

    let coverage = store.coverage()?;
    eprintln!("Coverage so far: {:.1}%", coverage.percentage);
    Ok(())
}
