//! The `examcheck session` command: one isolated exam session.
//!
//! Reads a take-exam command from stdin and writes one JSON record per line
//! to stdout, ending with `DONE` or `ERROR`.

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt, Stdout};

use examcheck_core::command::TakeExamCommand;
use examcheck_runner::{run_session, SessionRecord, SessionReporter, StandaloneSimulation};

use super::{fault_set, Fault};

pub async fn execute(faults: Vec<Fault>) -> Result<()> {
    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("failed to read command from stdin")?;
    let mut stdout = tokio::io::stdout();

    let command = match TakeExamCommand::from_json(&input) {
        Ok(command) => command,
        Err(e) => {
            write_record(&mut stdout, &SessionRecord::Error(format!("{e:#}"))).await?;
            return Err(e.context("invalid take-exam command"));
        }
    };

    let connector = StandaloneSimulation {
        faults: fault_set(&faults),
    };
    let (reporter, mut records) = SessionReporter::channel();
    let session = tokio::spawn(async move {
        run_session(&connector, &command, &reporter).await.to_json()
    });

    while let Some(record) = records.recv().await {
        write_record(&mut stdout, &record).await?;
    }

    let last = match session.await {
        Ok(Ok(json)) => SessionRecord::Done(json),
        Ok(Err(e)) => SessionRecord::Error(format!("cannot serialize result: {e:#}")),
        Err(e) => SessionRecord::Error(format!("session panicked: {e}")),
    };
    write_record(&mut stdout, &last).await
}

async fn write_record(stdout: &mut Stdout, record: &SessionRecord) -> Result<()> {
    let mut line = record.to_line()?;
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}
