pub mod config;
pub mod error;
pub mod fleet;
pub mod output;
pub mod process;
pub mod records;
pub mod shards;
pub mod verify;

pub use config::RunnerConfig;
pub use error::{FleetError, Result};
pub use fleet::{
    aggregate_stage, dispatch_pair, run_stage, MetricsSummary, Role, RoleReport, Stage,
    StageContext, StageReport,
};
pub use output::{parse_worker_output, RoleMetrics};
pub use process::{CommandRunner, ProcessResult, ProcessRunner, WorkerArg};
pub use shards::{merge_shards, split_csv, MergeSummary};
pub use verify::{compare_results, convert_results, log_transform, significant_digits_match};

use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::info;

pub const GROUND_TRUTH_FILE: &str = "ResultData.csv";
pub const FINAL_REPORT_FILE: &str = "finalResult.csv";

/// Operation whose values are compared with a looser tolerance.
pub const LOOSE_OPERATION: u32 = 1;
/// Log-domain request: inputs are log-transformed, then run as [`LOG_BASE_OPERATION`].
pub const LOG_OPERATION: u32 = 6;
pub const LOG_BASE_OPERATION: u32 = 2;
const LOOSE_SCALE: f64 = 10.0;

/// One verification request.
#[derive(Debug, Clone, PartialEq)]
pub struct RunParameters {
    pub id: String,
    pub address: String,
    pub port: u16,
    pub operation: u32,
    pub workers: usize,
    /// Tolerance override; values below 1 are ignored.
    pub scale: Option<f64>,
}

impl Default for RunParameters {
    fn default() -> Self {
        Self {
            id: "1".to_string(),
            address: "127.0.0.1".to_string(),
            port: 8001,
            operation: 3,
            workers: 1,
            scale: None,
        }
    }
}

impl RunParameters {
    pub fn validate(&self, max_processes: usize) -> Result<()> {
        let slots = self.workers.checked_mul(2).unwrap_or(usize::MAX);
        if self.workers < 1 || slots > max_processes {
            return Err(FleetError::InvalidParameters(format!(
                "workers must be between 1 and {}",
                max_processes / 2
            )));
        }
        let last_port = u32::from(self.port) + self.workers as u32 - 1;
        if last_port > u32::from(u16::MAX) {
            return Err(FleetError::InvalidParameters(format!(
                "port range {}..={} exceeds {}",
                self.port,
                last_port,
                u16::MAX
            )));
        }
        if !is_plain_dataset_id(&self.id) {
            return Err(FleetError::InvalidParameters(format!(
                "invalid dataset id '{}'",
                self.id
            )));
        }
        Ok(())
    }

    pub fn effective_scale(&self) -> f64 {
        match self.scale {
            Some(scale) if scale >= 1.0 => scale,
            _ if self.operation == LOOSE_OPERATION => LOOSE_SCALE,
            _ => verify::DEFAULT_SCALE,
        }
    }
}

/// A dataset id must name exactly one directory below the data root.
fn is_plain_dataset_id(id: &str) -> bool {
    if id.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(id).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    pub share: StageReport,
    pub verify: StageReport,
    /// `None` when the dataset has no ground truth and the results were only converted.
    pub checked_errors: Option<usize>,
    pub report_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Runs the share and verify stages for `params.id` and reconciles the results.
pub fn run_verification(
    config: &RunnerConfig,
    params: &RunParameters,
    runner: &dyn ProcessRunner,
) -> Result<VerificationOutcome> {
    let started_at = Utc::now();
    let base = config.dataset_dir(&params.id);
    params.validate(config.max_processes)?;

    for role in Role::ALL {
        if !base.join(role.input_file()).is_file() {
            return Err(FleetError::MissingInput(format!(
                "no {}'s data on server",
                role
            )));
        }
    }
    let truth_path = base.join(GROUND_TRUTH_FILE);
    let has_truth = truth_path.is_file();

    let mut operation = params.operation;
    if operation == LOG_OPERATION {
        log_transform(&base.join(Role::Alice.input_file()))?;
        if has_truth {
            log_transform(&truth_path)?;
        }
        operation = LOG_BASE_OPERATION;
    }

    runner.ensure_available(&config.sharer_program)?;
    runner.ensure_available(&config.verifier_program)?;

    let ctx = StageContext {
        sharer_program: config.sharer_program.clone(),
        verifier_program: config.verifier_program.clone(),
        address: params.address.clone(),
        base_port: params.port,
        operation,
        work_dir: format!("{}/", base.display()),
    };
    info!(id = %params.id, workers = params.workers, operation, "starting verification");

    let (share, verify) = if params.workers == 1 {
        let share = run_stage(runner, &ctx, Stage::Share, 1);
        let verify = run_stage(runner, &ctx, Stage::Verify, 1);
        (share, verify)
    } else {
        for role in Role::ALL {
            split_csv(&base, role.input_file(), params.workers)?;
        }
        let share = run_stage(runner, &ctx, Stage::Share, params.workers);
        let verify = run_stage(runner, &ctx, Stage::Verify, params.workers);
        merge_shards(&base, fleet::RESULT_FILE, params.workers)?;
        (share, verify)
    };

    let computed = base.join(fleet::RESULT_FILE);
    let report_path = base.join(FINAL_REPORT_FILE);
    let checked_errors = if has_truth {
        Some(compare_results(
            &truth_path,
            &computed,
            &report_path,
            params.effective_scale(),
        )?)
    } else {
        convert_results(&computed, &report_path)?;
        None
    };
    info!(id = %params.id, checked_errors = ?checked_errors, "verification finished");

    Ok(VerificationOutcome {
        share,
        verify,
        checked_errors,
        report_path,
        started_at,
        finished_at: Utc::now(),
    })
}

/// Removes every file of a dataset.
pub fn delete_dataset(config: &RunnerConfig, id: &str) -> Result<PathBuf> {
    let probe = RunParameters {
        id: id.to_string(),
        ..RunParameters::default()
    };
    probe.validate(usize::MAX)?;
    let dir = config.dataset_dir(id);
    fs::remove_dir_all(&dir).map_err(|e| FleetError::io(&dir, e))?;
    Ok(dir)
}

pub fn final_report_path(config: &RunnerConfig, id: &str) -> PathBuf {
    config.dataset_dir(id).join(FINAL_REPORT_FILE)
}
