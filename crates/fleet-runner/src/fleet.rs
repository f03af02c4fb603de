//! Worker-pair dispatch and per-stage aggregation across shards.

use crate::output::{parse_worker_output, RoleMetrics};
use crate::process::{ProcessResult, ProcessRunner, WorkerArg};
use crate::shards::shard_file_name;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{info, warn};

pub const SHARE_FILE: &str = "Share.bin";
pub const RESULT_FILE: &str = "CalResult.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Alice,
    Bob,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Alice, Role::Bob];

    /// Value of the `ro` worker argument.
    pub fn code(self) -> u8 {
        match self {
            Role::Alice => 1,
            Role::Bob => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Alice => "Alice",
            Role::Bob => "Bob",
        }
    }

    pub fn input_file(self) -> &'static str {
        match self {
            Role::Alice => "AliceData.csv",
            Role::Bob => "BobData.csv",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Share,
    Verify,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Share => "share",
            Stage::Verify => "verify",
        }
    }
}

/// Everything a stage needs to build worker command lines.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub sharer_program: PathBuf,
    pub verifier_program: PathBuf,
    pub address: String,
    pub base_port: u16,
    pub operation: u32,
    /// Passed verbatim as `pth`; workers expect a trailing separator.
    pub work_dir: String,
}

impl StageContext {
    pub fn program(&self, stage: Stage) -> &Path {
        match stage {
            Stage::Share => &self.sharer_program,
            Stage::Verify => &self.verifier_program,
        }
    }

    /// Both roles of a shard meet on the same port.
    pub fn port(&self, shard: Option<usize>) -> u32 {
        u32::from(self.base_port) + shard.unwrap_or(0) as u32
    }

    pub fn worker_args(&self, stage: Stage, role: Role, shard: Option<usize>) -> Vec<WorkerArg> {
        let mut args = vec![
            WorkerArg::new("ro", role.code().to_string()),
            WorkerArg::new("ip", self.address.clone()),
            WorkerArg::new("pt", self.port(shard).to_string()),
        ];
        match stage {
            Stage::Share => {
                args.push(WorkerArg::new("csv", shard_file_name(shard, role.input_file())));
                args.push(WorkerArg::new("shr", shard_file_name(shard, SHARE_FILE)));
            }
            Stage::Verify => {
                args.push(WorkerArg::new("op", self.operation.to_string()));
                args.push(WorkerArg::new("shr", shard_file_name(shard, SHARE_FILE)));
                args.push(WorkerArg::new("res", shard_file_name(shard, RESULT_FILE)));
            }
        }
        args.push(WorkerArg::new("pth", self.work_dir.clone()));
        args
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoleOutcome {
    pub process: ProcessResult,
    pub metrics: Option<RoleMetrics>,
}

impl RoleOutcome {
    pub fn from_process(process: ProcessResult) -> Self {
        let metrics = parse_worker_output(&process.stdout);
        Self { process, metrics }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShardOutcome {
    pub alice: RoleOutcome,
    pub bob: RoleOutcome,
}

impl ShardOutcome {
    pub fn role(&self, role: Role) -> &RoleOutcome {
        match role {
            Role::Alice => &self.alice,
            Role::Bob => &self.bob,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.alice.process.succeeded() && self.bob.process.succeeded()
    }
}

/// Runs both roles of one shard concurrently and waits for both.
pub fn dispatch_pair(
    runner: &dyn ProcessRunner,
    ctx: &StageContext,
    stage: Stage,
    shard: Option<usize>,
) -> ShardOutcome {
    let program = ctx.program(stage);
    let alice_args = ctx.worker_args(stage, Role::Alice, shard);
    let bob_args = ctx.worker_args(stage, Role::Bob, shard);

    let (alice, bob) = thread::scope(|s| {
        let alice = s.spawn(|| runner.run(program, &alice_args));
        let bob = s.spawn(|| runner.run(program, &bob_args));
        (join_worker(alice), join_worker(bob))
    });
    ShardOutcome {
        alice: RoleOutcome::from_process(alice),
        bob: RoleOutcome::from_process(bob),
    }
}

fn join_worker(handle: thread::ScopedJoinHandle<'_, ProcessResult>) -> ProcessResult {
    handle
        .join()
        .unwrap_or_else(|_| ProcessResult::launch_failure("worker thread panicked"))
}

/// Dispatches every shard of a stage concurrently and aggregates the outcomes.
/// A single shard runs on the unsharded file names.
pub fn run_stage(
    runner: &dyn ProcessRunner,
    ctx: &StageContext,
    stage: Stage,
    shards: usize,
) -> StageReport {
    info!(stage = stage.as_str(), shards, "dispatching stage");
    let outcomes: Vec<ShardOutcome> = if shards <= 1 {
        vec![dispatch_pair(runner, ctx, stage, None)]
    } else {
        thread::scope(|s| {
            let handles: Vec<_> = (0..shards)
                .map(|index| s.spawn(move || dispatch_pair(runner, ctx, stage, Some(index))))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        let failed =
                            RoleOutcome::from_process(ProcessResult::launch_failure("shard thread panicked"));
                        ShardOutcome {
                            alice: failed.clone(),
                            bob: failed,
                        }
                    })
                })
                .collect()
        })
    };
    let report = aggregate_stage(&outcomes);
    for role in Role::ALL {
        for message in &report.role(role).errors {
            warn!(stage = stage.as_str(), "{}", message);
        }
    }
    report
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub comm_cost: u64,
    pub total_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleReport {
    /// Present only when `errors` is empty.
    pub metrics: Option<MetricsSummary>,
    pub errors: Vec<String>,
    pub exit_codes: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageReport {
    pub alice: RoleReport,
    pub bob: RoleReport,
}

impl StageReport {
    pub fn role(&self, role: Role) -> &RoleReport {
        match role {
            Role::Alice => &self.alice,
            Role::Bob => &self.bob,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.alice.errors.is_empty() && self.bob.errors.is_empty()
    }
}

/// Folds per-shard outcomes (indexed by shard) into one report per role.
///
/// Metrics are summed over shards where both roles succeeded, counting only
/// positive values, and divided by the total shard count.
pub fn aggregate_stage(outcomes: &[ShardOutcome]) -> StageReport {
    StageReport {
        alice: aggregate_role(outcomes, Role::Alice),
        bob: aggregate_role(outcomes, Role::Bob),
    }
}

fn aggregate_role(outcomes: &[ShardOutcome], role: Role) -> RoleReport {
    let mut report = RoleReport::default();
    let mut comm_sum: u64 = 0;
    let mut time_sum = 0.0;

    for (index, shard) in outcomes.iter().enumerate() {
        let outcome = shard.role(role);
        if !outcome.process.succeeded() {
            report
                .errors
                .push(format!("Worker {} - {}: {}", index, role, outcome.process.stderr));
            report.exit_codes.push(outcome.process.exit_code);
        }
        if !shard.succeeded() {
            continue;
        }
        if let Some(metrics) = outcome.metrics {
            comm_sum = comm_sum.saturating_add(metrics.comm_cost);
            if metrics.total_time > 0.0 {
                time_sum += metrics.total_time;
            }
        }
    }

    if report.errors.is_empty() && !outcomes.is_empty() {
        let n = outcomes.len();
        report.metrics = Some(MetricsSummary {
            comm_cost: comm_sum / n as u64,
            total_time: time_sum / n as f64,
        });
    }
    report
}
