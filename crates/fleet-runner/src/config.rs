//! Runner configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `FLEET_*` environment variables. The CLI applies its own flags last.

use crate::error::{FleetError, Result};
use serde::Deserialize;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Execution slots of the host: one per available hardware thread.
pub fn default_max_processes() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Root holding one directory per dataset id.
    pub data_dir: PathBuf,
    pub sharer_program: PathBuf,
    pub verifier_program: PathBuf,
    /// Execution slots available to a single request; each shard needs two.
    pub max_processes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            sharer_program: PathBuf::from("./sharer"),
            verifier_program: PathBuf::from("./verifier"),
            max_processes: default_max_processes(),
        }
    }
}

impl RunnerConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| FleetError::io(path, e))?;
        Self::from_yaml_str(&raw)
            .map_err(|e| FleetError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| FleetError::Config(e.to_string()))
    }

    /// Applies `FLEET_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("FLEET_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(prog) = lookup("FLEET_SHARER") {
            self.sharer_program = PathBuf::from(prog);
        }
        if let Some(prog) = lookup("FLEET_VERIFIER") {
            self.verifier_program = PathBuf::from(prog);
        }
        if let Some(raw) = lookup("FLEET_MAX_PROCESSES") {
            self.max_processes = raw.trim().parse().map_err(|_| {
                FleetError::Config(format!("FLEET_MAX_PROCESSES must be an integer: {}", raw))
            })?;
        }
        Ok(())
    }

    pub fn dataset_dir(&self, id: &str) -> PathBuf {
        self.data_dir.join(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn yaml_fills_missing_fields_with_defaults() {
        let config = RunnerConfig::from_yaml_str("data_dir: /srv/mpc\nmax_processes: 8\n")
            .expect("parse yaml");
        assert_eq!(config.data_dir, PathBuf::from("/srv/mpc"));
        assert_eq!(config.max_processes, 8);
        assert_eq!(config.sharer_program, PathBuf::from("./sharer"));
        assert_eq!(config.verifier_program, PathBuf::from("./verifier"));
    }

    #[test]
    fn yaml_rejects_unknown_keys() {
        let err = RunnerConfig::from_yaml_str("workers: 3\n").expect_err("unknown key");
        assert!(matches!(err, FleetError::Config(_)), "unexpected: {}", err);
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let mut config = RunnerConfig::from_yaml_str("data_dir: from_file\n").expect("yaml");
        let env: BTreeMap<&str, &str> = [
            ("FLEET_DATA_DIR", "from_env"),
            ("FLEET_VERIFIER", "/opt/bin/verifier"),
            ("FLEET_MAX_PROCESSES", "32"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .expect("apply env");
        assert_eq!(config.data_dir, PathBuf::from("from_env"));
        assert_eq!(config.verifier_program, PathBuf::from("/opt/bin/verifier"));
        assert_eq!(config.sharer_program, PathBuf::from("./sharer"));
        assert_eq!(config.max_processes, 32);
    }

    #[test]
    fn env_rejects_non_numeric_process_count() {
        let mut config = RunnerConfig::default();
        let err = config
            .apply_env(|k| (k == "FLEET_MAX_PROCESSES").then(|| "many".to_string()))
            .expect_err("should fail");
        assert!(err.to_string().contains("FLEET_MAX_PROCESSES"));
    }

    #[test]
    fn default_process_slots_track_host_parallelism() {
        let host = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        assert_eq!(RunnerConfig::default().max_processes, host);
        let config = RunnerConfig::from_yaml_str("data_dir: x\n").expect("yaml");
        assert_eq!(config.max_processes, host);
        let pinned = RunnerConfig::from_yaml_str("max_processes: 64\n").expect("yaml");
        assert_eq!(pinned.max_processes, 64);
    }

    #[test]
    fn dataset_dir_joins_id() {
        let config = RunnerConfig::default();
        assert_eq!(config.dataset_dir("42"), PathBuf::from("data").join("42"));
    }
}
