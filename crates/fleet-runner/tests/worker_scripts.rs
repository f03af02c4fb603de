//! End-to-end runs against shell scripts that honor the worker process contract.
#![cfg(unix)]

use chrono::Utc;
use fleet_runner::{run_verification, CommandRunner, FleetError, RunParameters, RunnerConfig};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const ARG_PARSER: &str = r#"for arg in "$@"; do
  case "$arg" in
    ro=*) ro="${arg#ro=}" ;;
    pt=*) pt="${arg#pt=}" ;;
    res=*) res="${arg#res=}" ;;
    pth=*) pth="${arg#pth=}" ;;
  esac
done
"#;

struct Fixture {
    root: PathBuf,
    config: RunnerConfig,
}

impl Fixture {
    fn new(tag: &str, failing_bob_port: Option<u16>) -> Self {
        let root = std::env::temp_dir().join(format!(
            "fleet_scripts_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        let bin = root.join("bin");
        fs::create_dir_all(&bin).expect("bin dir");

        let sharer = format!(
            "#!/bin/sh\n{}echo \"Communication Cost: 512 bytes\"\necho \"Total Time: 1.5 ms\"\n",
            ARG_PARSER
        );
        let failure = match failing_bob_port {
            Some(port) => format!(
                "if [ \"$ro\" = \"2\" ] && [ \"$pt\" = \"{}\" ]; then echo \"connection refused\" >&2; exit 3; fi\n",
                port
            ),
            None => String::new(),
        };
        let verifier = format!(
            "#!/bin/sh\n{}{}if [ \"$ro\" = \"1\" ]; then\n  prefix=\"${{res%CalResult.txt}}\"\n  tail -n +2 \"${{pth}}${{prefix}}AliceData.csv\" | cut -d, -f2 > \"${{pth}}${{res}}\"\nfi\necho \"Communication Cost: 2048 bytes\"\nprintf 'Total Time:\\t4.0 ms\\n'\n",
            ARG_PARSER, failure
        );
        write_script(&bin.join("sharer"), &sharer);
        write_script(&bin.join("verifier"), &verifier);

        let config = RunnerConfig {
            data_dir: root.join("data"),
            sharer_program: bin.join("sharer"),
            verifier_program: bin.join("verifier"),
            max_processes: 16,
        };
        Self { root, config }
    }

    fn seed(&self, id: &str, rows: usize) -> PathBuf {
        let dir = self.config.data_dir.join(id);
        fs::create_dir_all(&dir).expect("dataset dir");
        let mut alice = String::from("number,data\n");
        let mut truth = String::from("number,data\n");
        for i in 1..=rows {
            alice.push_str(&format!("{},{}.25\n", i, i));
            truth.push_str(&format!("{},{}.25\n", i, i));
        }
        fs::write(dir.join("AliceData.csv"), alice).expect("alice");
        fs::write(dir.join("BobData.csv"), "number,data\n").expect("bob");
        fs::write(dir.join("ResultData.csv"), truth).expect("truth");
        dir
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("write script");
    let mut perms = fs::metadata(path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

#[test]
fn sharded_run_against_worker_scripts() {
    let fixture = Fixture::new("clean", None);
    let dir = fixture.seed("11", 7);
    let params = RunParameters {
        id: "11".to_string(),
        port: 9100,
        workers: 3,
        ..RunParameters::default()
    };

    let outcome = run_verification(&fixture.config, &params, &CommandRunner).expect("run");
    assert!(outcome.share.is_clean(), "{:?}", outcome.share);
    assert!(outcome.verify.is_clean(), "{:?}", outcome.verify);
    let share_alice = outcome.share.alice.metrics.expect("share metrics");
    assert_eq!(share_alice.comm_cost, 512);
    assert_eq!(share_alice.total_time, 1.5);
    let verify_bob = outcome.verify.bob.metrics.expect("verify metrics");
    assert_eq!(verify_bob.comm_cost, 2048);
    assert_eq!(verify_bob.total_time, 4.0);

    assert_eq!(outcome.checked_errors, Some(0));
    let merged = fs::read_to_string(dir.join("CalResult.txt")).expect("merged");
    assert_eq!(merged.lines().count(), 7);
    assert!(dir.join("2BobData.csv").exists());
}

#[test]
fn failing_worker_is_folded_into_report() {
    let fixture = Fixture::new("failing", Some(9201));
    fixture.seed("12", 6);
    let params = RunParameters {
        id: "12".to_string(),
        port: 9200,
        workers: 2,
        ..RunParameters::default()
    };

    let outcome = run_verification(&fixture.config, &params, &CommandRunner).expect("run");
    assert!(outcome.share.is_clean());
    assert_eq!(outcome.verify.bob.metrics, None);
    assert_eq!(outcome.verify.bob.errors.len(), 1);
    assert_eq!(
        outcome.verify.bob.errors[0].trim_end(),
        "Worker 1 - Bob: connection refused"
    );
    assert_eq!(outcome.verify.bob.exit_codes, vec![3]);
    // Shard 1 is skipped in the sum but counted in the denominator.
    assert_eq!(outcome.verify.alice.metrics.map(|m| m.comm_cost), Some(1024));
    assert_eq!(outcome.checked_errors, Some(0));
}

#[test]
fn missing_worker_program_aborts_request() {
    let mut fixture = Fixture::new("nobin", None);
    fixture.seed("13", 2);
    fixture.config.verifier_program = fixture.root.join("bin").join("absent-verifier");
    let params = RunParameters {
        id: "13".to_string(),
        ..RunParameters::default()
    };
    let err = run_verification(&fixture.config, &params, &CommandRunner).expect_err("must fail");
    assert!(matches!(err, FleetError::ProcessLaunch { .. }), "{}", err);
}
