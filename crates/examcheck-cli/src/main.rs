//! examcheck CLI: the user-facing command-line interface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use commands::Fault;

mod commands;

#[derive(Parser)]
#[command(
    name = "examcheck",
    version,
    about = "Randomized e-exam orchestration and scoring verification"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run exams against the simulated exam server and verify the scoring
    Master {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Number of in-process machines (default: one per configured machine, at least 2)
        #[arg(long)]
        machines: Option<usize>,

        /// Defect to inject into the simulated server (repeatable)
        #[arg(long = "fault", value_enum)]
        faults: Vec<Fault>,

        /// Keep starting runs until interrupted
        #[arg(long)]
        looping: bool,

        /// Results database (overrides [run] database)
        #[arg(long)]
        database: Option<PathBuf>,

        /// Seed for the master's random decisions
        #[arg(long)]
        seed: Option<u64>,

        /// Factor applied to every simulated wait (overrides [run] wait_time)
        #[arg(long)]
        wait_time: Option<f64>,
    },

    /// Serve take-exam sessions over HTTP
    Machine {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8888")]
        listen: SocketAddr,

        /// Run sessions on supervised tasks instead of child processes
        #[arg(long)]
        supervised: bool,

        /// Defect to inject into each session's simulated server (repeatable)
        #[arg(long = "fault", value_enum)]
        faults: Vec<Fault>,
    },

    /// Take one exam: command JSON on stdin, one record per stdout line
    Session {
        /// Defect to inject into the simulated server (repeatable)
        #[arg(long = "fault", value_enum)]
        faults: Vec<Fault>,
    },

    /// Send a demo exam to every configured remote machine
    Probe {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,

        /// Factor applied to every simulated wait on the workers
        #[arg(long, default_value = "0.0")]
        wait_time: f64,
    },

    /// Summarize the results database
    Report {
        /// Results database
        #[arg(long, default_value = "examcheck.db")]
        database: PathBuf,

        /// Output format: text, json
        #[arg(long, default_value = "text")]
        format: String,

        /// Write the files of this batch into --output
        #[arg(long)]
        extract: Option<String>,

        /// Directory for --extract
        #[arg(long, default_value = ".")]
        output: PathBuf,

        /// Delete all results except the long-term history
        #[arg(long)]
        clear: bool,
    },

    /// Compare two exam results
    Compare {
        /// Expected result JSON
        #[arg(long)]
        expected: PathBuf,

        /// Actual result JSON
        #[arg(long)]
        actual: PathBuf,

        /// Config file with [workarounds]
        #[arg(long)]
        config: Option<PathBuf>,

        /// Exit code 1 if any value differs
        #[arg(long)]
        fail_on_mismatch: bool,

        /// Output format: text, json, markdown
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Validate the configuration
    Validate {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create a starter examcheck.toml
    Init,
}

#[tokio::main]
async fn main() {
    // Session records own stdout.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("examcheck=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Master {
            config,
            machines,
            faults,
            looping,
            database,
            seed,
            wait_time,
        } => {
            commands::master::execute(commands::master::MasterArgs {
                config,
                machines,
                faults,
                looping,
                database,
                seed,
                wait_time,
            })
            .await
        }
        Commands::Machine {
            listen,
            supervised,
            faults,
        } => commands::machine::execute(listen, supervised, faults).await,
        Commands::Session { faults } => commands::session::execute(faults).await,
        Commands::Probe { config, wait_time } => commands::probe::execute(config, wait_time).await,
        Commands::Report {
            database,
            format,
            extract,
            output,
            clear,
        } => commands::report::execute(database, format, extract, output, clear),
        Commands::Compare {
            expected,
            actual,
            config,
            fail_on_mismatch,
            format,
        } => commands::compare::execute(expected, actual, config, fail_on_mismatch, format),
        Commands::Validate { config } => commands::validate::execute(config),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
