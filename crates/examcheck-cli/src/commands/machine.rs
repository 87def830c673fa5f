//! The `examcheck machine` command.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use examcheck_runner::{Launcher, StandaloneSimulation, WorkerMachine, WorkerServer};

use super::{fault_args, fault_set, Fault};

pub async fn execute(listen: SocketAddr, supervised: bool, faults: Vec<Fault>) -> Result<()> {
    let launcher = if supervised {
        Launcher::Supervised {
            connector: Arc::new(StandaloneSimulation {
                faults: fault_set(&faults),
            }),
        }
    } else {
        Launcher::current_exe(fault_args(&faults))?
    };
    tracing::info!(?launcher, "starting worker machine");

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let worker = Arc::new(WorkerMachine::new(launcher));
    WorkerServer::new(worker).serve(listen, shutdown).await
}
