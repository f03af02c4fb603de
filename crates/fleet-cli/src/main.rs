use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use fleet_runner::{
    CommandRunner, MergeSummary, RoleReport, RunParameters, RunnerConfig, StageReport,
    VerificationOutcome,
};
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fleet", version = "0.3.0", about = "Two-party MPC worker fleet runner")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// YAML runner configuration.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, short = 'd', global = true)]
    data_dir: Option<PathBuf>,
    #[arg(long, short = 'c', global = true)]
    max_processes: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    Verify {
        #[arg(long, default_value = "1")]
        id: String,
        #[arg(long, default_value = "127.0.0.1")]
        address: String,
        #[arg(long, default_value_t = 8001)]
        port: u16,
        #[arg(long, default_value_t = 3)]
        operate: u32,
        #[arg(long, default_value_t = 1)]
        workers: usize,
        #[arg(long)]
        scale: Option<f64>,
        #[arg(long)]
        json: bool,
    },
    Split {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        file: String,
        #[arg(long)]
        parts: usize,
        #[arg(long)]
        json: bool,
    },
    Merge {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        file: String,
        #[arg(long)]
        parts: usize,
        #[arg(long)]
        json: bool,
    },
    Compare {
        #[arg(long)]
        truth: PathBuf,
        #[arg(long)]
        computed: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = 1.0)]
        scale: f64,
        #[arg(long)]
        json: bool,
    },
    Convert {
        #[arg(long)]
        computed: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        json: bool,
    },
    Report {
        #[arg(long)]
        id: String,
    },
    Delete {
        #[arg(long)]
        id: String,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = load_config(&cli.global).and_then(|config| run_command(&config, cli.command));
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error(error_code(&err), err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fleet_runner=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(global: &GlobalArgs) -> Result<RunnerConfig> {
    let mut config = RunnerConfig::load(global.config.as_deref())?;
    if let Some(dir) = &global.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(max) = global.max_processes {
        config.max_processes = max;
    }
    tracing::debug!(data_dir = %config.data_dir.display(), max_processes = config.max_processes, "loaded config");
    Ok(config)
}

fn run_command(config: &RunnerConfig, command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Verify {
            id,
            address,
            port,
            operate,
            workers,
            scale,
            json,
        } => {
            let params = RunParameters {
                id,
                address,
                port,
                operation: operate,
                workers,
                scale,
            };
            let outcome = fleet_runner::run_verification(config, &params, &CommandRunner)?;
            if json {
                return Ok(Some(outcome_to_json(&outcome)));
            }
            print_stage("share", &outcome.share);
            print_stage("verify", &outcome.verify);
            match outcome.checked_errors {
                Some(n) => println!("checked_errors: {}", n),
                None => println!("checked_errors: none (no ground truth)"),
            }
            println!("report: {}", outcome.report_path.display());
        }
        Commands::Split {
            dir,
            file,
            parts,
            json,
        } => {
            let counts = fleet_runner::split_csv(&dir, &file, parts)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "split",
                    "rows_per_shard": counts,
                })));
            }
            for (index, rows) in counts.iter().enumerate() {
                println!("{}{}: {} rows", index, file, rows);
            }
        }
        Commands::Merge {
            dir,
            file,
            parts,
            json,
        } => {
            let summary = fleet_runner::merge_shards(&dir, &file, parts)?;
            if json {
                return Ok(Some(merge_summary_to_json(&summary)));
            }
            println!("merged: {}", summary.output.display());
            println!("lines: {}", summary.lines_per_shard.iter().sum::<usize>());
            if !summary.missing_shards.is_empty() {
                println!("missing_shards: {:?}", summary.missing_shards);
            }
        }
        Commands::Compare {
            truth,
            computed,
            out,
            scale,
            json,
        } => {
            let mismatches = fleet_runner::compare_results(&truth, &computed, &out, scale)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "compare",
                    "checked_errors": mismatches,
                    "report": out.display().to_string(),
                })));
            }
            println!("checked_errors: {}", mismatches);
            println!("report: {}", out.display());
        }
        Commands::Convert {
            computed,
            out,
            json,
        } => {
            let rows = fleet_runner::convert_results(&computed, &out)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "convert",
                    "rows": rows,
                    "report": out.display().to_string(),
                })));
            }
            println!("rows: {}", rows);
            println!("report: {}", out.display());
        }
        Commands::Report { id } => {
            let path = fleet_runner::final_report_path(config, &id);
            let body = std::fs::read_to_string(&path)
                .map_err(|_| anyhow::anyhow!("no result for id {}", id))?;
            print!("{}", body);
        }
        Commands::Delete { id, json } => {
            let dir = fleet_runner::delete_dataset(config, &id)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "delete",
                    "dirpath": dir.display().to_string(),
                })));
            }
            println!("deleted: {}", dir.display());
        }
    }
    Ok(None)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn error_code(err: &anyhow::Error) -> &'static str {
    match err.downcast_ref::<fleet_runner::FleetError>() {
        Some(fleet_runner::FleetError::Io { .. }) => "io_error",
        Some(fleet_runner::FleetError::Format { .. }) => "format_error",
        Some(fleet_runner::FleetError::ProcessLaunch { .. }) => "process_launch_error",
        Some(fleet_runner::FleetError::InvalidParameters(_)) => "invalid_parameters",
        Some(fleet_runner::FleetError::MissingInput(_)) => "missing_input",
        Some(fleet_runner::FleetError::Config(_)) => "config_error",
        None => "command_failed",
    }
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Verify { json, .. }
        | Commands::Split { json, .. }
        | Commands::Merge { json, .. }
        | Commands::Compare { json, .. }
        | Commands::Convert { json, .. }
        | Commands::Delete { json, .. } => *json,
        Commands::Report { .. } => false,
    }
}

fn role_report_json(report: &RoleReport) -> (Value, Value, Value) {
    let output = match &report.metrics {
        Some(m) => json!(m),
        None => json!({}),
    };
    (output, json!(report.errors), json!(report.exit_codes))
}

fn stage_to_json(stage: &StageReport) -> Value {
    let (output_alice, error_alice, exitcode_alice) = role_report_json(&stage.alice);
    let (output_bob, error_bob, exitcode_bob) = role_report_json(&stage.bob);
    json!({
        "output_alice": output_alice,
        "error_alice": error_alice,
        "exitcode_alice": exitcode_alice,
        "output_bob": output_bob,
        "error_bob": error_bob,
        "exitcode_bob": exitcode_bob,
    })
}

fn outcome_to_json(outcome: &VerificationOutcome) -> Value {
    json!({
        "ok": true,
        "command": "verify",
        "share_info": stage_to_json(&outcome.share),
        "verify_info": stage_to_json(&outcome.verify),
        // -2 marks "no ground truth" for existing consumers.
        "checked_errors": outcome.checked_errors.map(|n| n as i64).unwrap_or(-2),
        "report": outcome.report_path.display().to_string(),
        "started_at": outcome.started_at.to_rfc3339(),
        "finished_at": outcome.finished_at.to_rfc3339(),
    })
}

fn merge_summary_to_json(summary: &MergeSummary) -> Value {
    json!({
        "ok": true,
        "command": "merge",
        "output": summary.output.display().to_string(),
        "lines_per_shard": summary.lines_per_shard,
        "missing_shards": summary.missing_shards,
    })
}

fn print_stage(name: &str, stage: &StageReport) {
    for (role, report) in [("alice", &stage.alice), ("bob", &stage.bob)] {
        match &report.metrics {
            Some(m) => println!(
                "{} {}: comm_cost={} bytes total_time={:.3} ms",
                name, role, m.comm_cost, m.total_time
            ),
            None => println!("{} {}: {} failed shard(s)", name, role, report.errors.len()),
        }
        for (message, code) in report.errors.iter().zip(&report.exit_codes) {
            println!("  [exit {}] {}", code, message);
        }
    }
}
