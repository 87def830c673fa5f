//! `examcheck.toml` loading.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use examcheck_core::context::Language;
use examcheck_core::run::RunConfig;
use examcheck_core::settings::{Settings, Workarounds};
use examcheck_core::traits::Machine;

use crate::http::HttpMachine;

/// The exam server and the test every run copies.
///
/// Note: Custom Debug impl masks the admin password.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestSection {
    pub id: String,
    pub title: String,
    pub server_url: String,
    pub admin_lang: Language,
    pub admin_user: String,
    pub admin_password: String,
}

impl Default for TestSection {
    fn default() -> Self {
        Self {
            id: String::new(),
            title: String::new(),
            server_url: "http://localhost:8080".to_string(),
            admin_lang: Language::En,
            admin_user: "root".to_string(),
            admin_password: String::new(),
        }
    }
}

impl std::fmt::Debug for TestSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSection")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("server_url", &self.server_url)
            .field("admin_lang", &self.admin_lang)
            .field("admin_user", &self.admin_user)
            .field("admin_password", &"***")
            .finish()
    }
}

/// How runs are driven.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Factor applied to every simulated wait on the workers.
    pub wait_time: f64,
    /// Pause before each monitor poll, in milliseconds.
    pub poll_interval_ms: u64,
    /// Retries for unreachable machines.
    pub max_retries: u32,
    /// First retry delay in milliseconds; doubled per retry.
    pub retry_delay_ms: u64,
    /// Start a new run after each finished one until interrupted.
    pub looping: bool,
    pub recycle_users: bool,
    /// SQLite results database.
    pub database: PathBuf,
    /// Fixed seed for the master's random decisions.
    pub master_seed: Option<u64>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            wait_time: 1.0,
            poll_interval_ms: 500,
            max_retries: 5,
            retry_delay_ms: 1000,
            looping: false,
            recycle_users: false,
            database: PathBuf::from("examcheck.db"),
            master_seed: None,
        }
    }
}

/// Top-level examcheck configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExamcheckConfig {
    /// Worker machine base URLs keyed by name.
    #[serde(default)]
    pub machines: BTreeMap<String, String>,
    #[serde(default)]
    pub test: TestSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub workarounds: Workarounds,
}

/// Starting point written by `examcheck init`.
pub const TEMPLATE: &str = r#"# examcheck configuration

[machines]
machine1 = "http://localhost:8888"
machine2 = "http://localhost:8889"

[test]
id = "1"
title = "Demo"
server_url = "http://localhost:8080"
admin_lang = "en"
admin_user = "root"
admin_password = "${EXAMCHECK_ADMIN_PASSWORD}"

[run]
wait_time = 1.0
poll_interval_ms = 500
max_retries = 5
looping = false
recycle_users = false
database = "examcheck.db"

[settings]
crash_frequency = 1
num_readjustments = 1
test_passes = "AVR"

[workarounds]
sloppy_whitespace = false
"#;

impl ExamcheckConfig {
    /// Run configuration shared by all runs of a batch.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            test_id: self.test.id.clone(),
            test_title: self.test.title.clone(),
            server_url: self.test.server_url.clone(),
            admin_lang: self.test.admin_lang,
            settings: self.settings.clone(),
            workarounds: self.workarounds.clone(),
            wait_time: self.run.wait_time,
            recycle_users: self.run.recycle_users,
            master_seed: self.run.master_seed,
        }
    }

    /// One [`HttpMachine`] per configured machine, in name order.
    pub fn http_machines(&self) -> Result<Vec<Arc<dyn Machine>>> {
        self.machines
            .iter()
            .map(|(name, url)| {
                let machine = HttpMachine::new(name, url)?
                    .with_poll_interval(Duration::from_millis(self.run.poll_interval_ms))
                    .with_retries(self.run.max_retries, Duration::from_millis(self.run.retry_delay_ms));
                Ok(Arc::new(machine) as Arc<dyn Machine>)
            })
            .collect()
    }

    /// Problems that would make every run fail.
    pub fn validate(&self) -> Result<()> {
        self.settings
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid [settings]: {e}"))?;
        if self.run.wait_time < 0.0 {
            anyhow::bail!("invalid [run]: wait_time must not be negative");
        }
        for (name, url) in &self.machines {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("invalid [machines]: {name} has no http(s) URL: '{url}'");
            }
        }
        Ok(())
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut from = 0;
    while let Some(offset) = result[from..].find("${") {
        let start = from + offset;
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var_name = &result[start + 2..start + end];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
        from = start + value.len();
    }
    result
}

fn resolve(config: &mut ExamcheckConfig) {
    for url in config.machines.values_mut() {
        *url = resolve_env_vars(url);
    }
    let test = &mut config.test;
    test.server_url = resolve_env_vars(&test.server_url);
    test.admin_user = resolve_env_vars(&test.admin_user);
    test.admin_password = resolve_env_vars(&test.admin_password);
    let database = resolve_env_vars(&config.run.database.to_string_lossy());
    config.run.database = PathBuf::from(database);
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `examcheck.toml` in the current directory
/// 2. `~/.config/examcheck/config.toml`
///
/// Environment variable overrides: `EXAMCHECK_ADMIN_PASSWORD`, `EXAMCHECK_DATABASE`.
pub fn load_config() -> Result<ExamcheckConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<ExamcheckConfig> {
    let config_path = match path {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => anyhow::bail!("config file not found: {}", p.display()),
        None => {
            let local = PathBuf::from("examcheck.toml");
            if local.exists() {
                Some(local)
            } else {
                dirs_path()
                    .map(|home| home.join("config.toml"))
                    .filter(|global| global.exists())
            }
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            parse(&content).with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => ExamcheckConfig::default(),
    };

    resolve(&mut config);

    // Environment overrides win over the file
    if let Ok(password) = std::env::var("EXAMCHECK_ADMIN_PASSWORD") {
        config.test.admin_password = password;
    }
    if let Ok(database) = std::env::var("EXAMCHECK_DATABASE") {
        config.run.database = PathBuf::from(database);
    }

    Ok(config)
}

pub fn parse(content: &str) -> Result<ExamcheckConfig> {
    Ok(toml::from_str::<ExamcheckConfig>(content)?)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("examcheck"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_EXAMCHECK_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_EXAMCHECK_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_EXAMCHECK_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        assert_eq!(resolve_env_vars("${_EXAMCHECK_UNSET_VAR}x"), "x");
        assert_eq!(resolve_env_vars("open ${brace"), "open ${brace");
        std::env::remove_var("_EXAMCHECK_TEST_VAR");
    }

    #[test]
    fn template_parses_and_validates() {
        let config = parse(TEMPLATE).unwrap();
        assert_eq!(config.machines.len(), 2);
        assert_eq!(config.test.title, "Demo");
        assert_eq!(config.settings.test_passes, "AVR");
        assert_eq!(config.settings.autosave_duration, Settings::default().autosave_duration);
        config.validate().unwrap();
        assert_eq!(config.http_machines().unwrap().len(), 2);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse("").unwrap();
        assert!(config.machines.is_empty());
        assert_eq!(config.run.poll_interval_ms, 500);
        assert_eq!(config.run_config().wait_time, 1.0);
    }

    #[test]
    fn password_is_masked() {
        let mut config = ExamcheckConfig::default();
        config.test.admin_password = "hunter2".into();
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("***"));
    }

    #[test]
    fn bad_machine_url_is_rejected() {
        let config = parse("[machines]\nm1 = \"localhost:1\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_file_resolves_variables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("examcheck.toml");
        std::env::set_var("_EXAMCHECK_TEST_HOST", "worker1");
        std::fs::write(
            &path,
            "[machines]\nm1 = \"http://${_EXAMCHECK_TEST_HOST}:8888\"\n[run]\nmaster_seed = 7\n",
        )
        .unwrap();
        let config = load_config_from(Some(&path)).unwrap();
        assert_eq!(config.machines["m1"], "http://worker1:8888");
        assert_eq!(config.run_config().master_seed, Some(7));
        std::env::remove_var("_EXAMCHECK_TEST_HOST");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = load_config_from(Some(Path::new("/nonexistent/examcheck.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
