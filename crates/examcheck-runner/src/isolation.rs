//! Session isolation.
//!
//! A session either runs in a child process (`examcheck session`, command
//! JSON on stdin, one record per stdout line) or in a supervised task. Either
//! way a crash can not take the worker down: a child that exits without a
//! terminal record and a task that panics both end in `ERROR`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use examcheck_core::command::TakeExamCommand;

use crate::session::{run_session, SessionRecord, SessionReporter, UiConnector};

/// How sessions are started.
#[derive(Clone)]
pub enum Launcher {
    /// Run `program args...` and talk to it over stdin/stdout.
    Subprocess { program: PathBuf, args: Vec<String> },
    /// Run in-process on a supervised task.
    Supervised { connector: Arc<dyn UiConnector> },
}

impl std::fmt::Debug for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Launcher::Subprocess { program, args } => f
                .debug_struct("Subprocess")
                .field("program", program)
                .field("args", args)
                .finish(),
            Launcher::Supervised { .. } => f.write_str("Supervised"),
        }
    }
}

impl Launcher {
    /// Re-run the current executable's `session` subcommand, followed by
    /// `extra` arguments.
    pub fn current_exe(extra: impl IntoIterator<Item = String>) -> Result<Self> {
        let program = std::env::current_exe().context("cannot locate current executable")?;
        let mut args = vec!["session".to_string()];
        args.extend(extra);
        Ok(Launcher::Subprocess { program, args })
    }

    /// Start a session. The stream always ends with exactly one terminal
    /// record, unless `cancel` fires first.
    pub fn launch(
        &self,
        command: TakeExamCommand,
        cancel: CancellationToken,
    ) -> mpsc::UnboundedReceiver<SessionRecord> {
        let (reporter, rx) = SessionReporter::channel();
        match self.clone() {
            Launcher::Subprocess { program, args } => {
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            reporter.send(SessionRecord::Error("session cancelled".to_string()));
                        }
                        outcome = run_child(&program, &args, &command, &reporter) => {
                            if let Err(e) = outcome {
                                tracing::error!("session process failed: {e:#}");
                                reporter.send(SessionRecord::Error(format!("{e:#}")));
                            }
                        }
                    }
                });
            }
            Launcher::Supervised { connector } => {
                let session_reporter = reporter.clone();
                let task = tokio::spawn(async move {
                    let result = run_session(connector.as_ref(), &command, &session_reporter).await;
                    result.to_json()
                });
                let abort = task.abort_handle();
                tokio::spawn(async move {
                    let record = tokio::select! {
                        _ = cancel.cancelled() => {
                            abort.abort();
                            SessionRecord::Error("session cancelled".to_string())
                        }
                        joined = task => match joined {
                            Ok(Ok(json)) => SessionRecord::Done(json),
                            Ok(Err(e)) => SessionRecord::Error(format!("{e:#}")),
                            Err(e) if e.is_panic() => {
                                tracing::error!("session panicked: {e}");
                                SessionRecord::Error(format!("session panicked: {e}"))
                            }
                            Err(e) => SessionRecord::Error(format!("session aborted: {e}")),
                        },
                    };
                    reporter.send(record);
                });
            }
        }
        rx
    }
}

/// Drive one child process to completion. Returns an error if it ended
/// without a terminal record.
async fn run_child(
    program: &Path,
    args: &[String],
    command: &TakeExamCommand,
    reporter: &SessionReporter,
) -> Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to start {}", program.display()))?;

    let mut stdin = child.stdin.take().context("child has no stdin")?;
    stdin.write_all(command.to_json()?.as_bytes()).await?;
    stdin.shutdown().await?;
    drop(stdin);

    let stdout = child.stdout.take().context("child has no stdout")?;
    let mut lines = BufReader::new(stdout).lines();
    let mut terminal = false;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match SessionRecord::from_line(&line) {
            Ok(record) => {
                terminal |= record.is_terminal();
                reporter.send(record);
            }
            Err(e) => tracing::warn!("ignoring malformed session output {line:?}: {e:#}"),
        }
    }

    let status = child.wait().await?;
    if !terminal {
        anyhow::bail!("session process exited ({status}) without reporting a result");
    }
    Ok(())
}
