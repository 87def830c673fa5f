pub mod compare;
pub mod init;
pub mod machine;
pub mod master;
pub mod probe;
pub mod report;
pub mod session;
pub mod validate;

use clap::ValueEnum;

use examcheck_runner::Faults;

/// A defect of the simulated exam server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Fault {
    /// Reloads lose answers that were only autosaved.
    DropAutosave,
    /// Invalid answers are saved instead of rejected.
    AcceptInvalidSaves,
    /// The spreadsheet export is off by a quarter point.
    CorruptExport,
    /// Reimported tests keep stale scores.
    StaleImport,
}

pub fn fault_set(faults: &[Fault]) -> Faults {
    let mut set = Faults::default();
    for fault in faults {
        match fault {
            Fault::DropAutosave => set.drop_autosave = true,
            Fault::AcceptInvalidSaves => set.accept_invalid_saves = true,
            Fault::CorruptExport => set.corrupt_exported_scores = true,
            Fault::StaleImport => set.stale_scores_on_import = true,
        }
    }
    set
}

/// `--fault` arguments that recreate `faults` on a child `session`.
pub fn fault_args(faults: &[Fault]) -> Vec<String> {
    faults
        .iter()
        .filter_map(|f| f.to_possible_value())
        .flat_map(|v| ["--fault".to_string(), v.get_name().to_string()])
        .collect()
}
