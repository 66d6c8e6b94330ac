//! Integration tests against fake oracle executables (shell scripts).

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use num_bigint::BigUint;

use ads_batch::config::{BatchConfig, OracleConfig, VerifyConfig};
use ads_batch::oracle::{CancelToken, CardinalityOracle, OracleError, SubprocessOracle};
use ads_batch::pipeline;
use ads_batch::runner::BatchError;
use ads_batch::sink;
use ads_batch::verify::Verdict;
use ads_batch::ParamPair;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn oracle_at(program: PathBuf, timeout: Option<Duration>) -> SubprocessOracle {
    SubprocessOracle::new(&OracleConfig { program, timeout })
}

/// Prints chatter like the real program, then `n, n, 2n-1`.
const ARITHMETIC_ORACLE: &str = r#"echo "Computing for n = $2, p = $1..."
echo "n = $2: |A| = $2"
echo ""
echo "n, |A|, |A+A|"
echo "$2, $2, $(( 2 * $2 - 1 ))""#;

#[test]
fn test_query_parses_final_record() {
    let dir = tempfile::tempdir().unwrap();
    let oracle = oracle_at(write_script(dir.path(), "ads_p", ARITHMETIC_ORACLE), None);

    let cards = oracle
        .query(ParamPair::new(2, 14), &CancelToken::new())
        .unwrap();
    assert_eq!(cards.a_size, BigUint::from(14u32));
    assert_eq!(cards.aa_size, BigUint::from(27u32));
}

#[test]
fn test_nonzero_exit_is_execution_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "ads_p",
        "echo 'Error: p must be an integer >= 2' >&2\nexit 3",
    );
    let err = oracle_at(script, None)
        .query(ParamPair::new(2, 5), &CancelToken::new())
        .unwrap_err();
    match err {
        OracleError::Execution { status, diagnostic } => {
            assert_eq!(status, Some(3));
            assert!(diagnostic.contains("p must be an integer"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_missing_record_is_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "ads_p", "echo '4, 10, 40'");
    let err = oracle_at(script, None)
        .query(ParamPair::new(2, 5), &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, OracleError::Parse { n: 5, .. }));
}

#[test]
fn test_timeout_kills_child() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "ads_p", "sleep 5\necho \"$2, 1, 1\"");
    let oracle = oracle_at(script, Some(Duration::from_millis(200)));

    let start = Instant::now();
    let err = oracle
        .query(ParamPair::new(2, 1), &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, OracleError::Timeout(_)));
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[test]
fn test_cancel_kills_in_flight_child() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "ads_p", "sleep 5\necho \"$2, 1, 1\"");
    let oracle = oracle_at(script, None);
    let cancel = CancelToken::new();

    let canceller = {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            cancel.cancel();
        })
    };

    let start = Instant::now();
    let err = oracle.query(ParamPair::new(2, 1), &cancel).unwrap_err();
    canceller.join().unwrap();
    assert!(matches!(err, OracleError::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[test]
fn test_batch_with_external_oracle() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "ads_p", ARITHMETIC_ORACLE);
    let config = BatchConfig {
        p: 2,
        range_start: 0,
        n_max: 30,
        step: 3,
        out_dir: dir.path().join("data"),
        num_chunks: 4,
        jobs: 3,
        oracle: OracleConfig {
            program: script,
            timeout: Some(Duration::from_secs(30)),
        },
        best_effort: false,
    };

    let report = pipeline::run_batch(&config, &CancelToken::new(), |_| {}).unwrap();
    assert_eq!(report.csv_path, dir.path().join("data/ads_2_30_every_3.csv"));

    let rows = sink::read(&report.csv_path).unwrap();
    let ns: Vec<u64> = rows.iter().map(|r| r.n).collect();
    assert_eq!(ns, vec![3, 6, 9, 12, 15, 18, 21, 24, 27, 30]);
    for row in &rows {
        assert_eq!(row.a_size, BigUint::from(row.n));
        assert_eq!(row.aa_size, BigUint::from(2 * row.n - 1));
    }
    assert!(report.manifest_path.exists());
}

#[test]
fn test_batch_failure_writes_no_artifact() {
    let dir = tempfile::tempdir().unwrap();
    // Fails for n = 7 only
    let script = write_script(
        dir.path(),
        "ads_p",
        r#"if [ "$2" = "7" ]; then echo "bad n" >&2; exit 1; fi
echo "$2, $2, $(( 2 * $2 - 1 ))""#,
    );
    let out_dir = dir.path().join("data");
    let config = BatchConfig {
        p: 2,
        n_max: 12,
        step: 1,
        out_dir: out_dir.clone(),
        num_chunks: 4,
        jobs: 2,
        oracle: OracleConfig {
            program: script,
            timeout: None,
        },
        ..BatchConfig::default()
    };

    let err = pipeline::run_batch(&config, &CancelToken::new(), |_| {}).unwrap_err();
    match err {
        BatchError::Oracle { n, source } => {
            assert_eq!(n, 7);
            assert!(matches!(source, OracleError::Execution { .. }));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!out_dir.join(sink::artifact_name(2, 12, 1)).exists());
}

#[test]
fn test_best_effort_batch_lists_missing() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "ads_p",
        r#"if [ "$2" = "7" ]; then exit 1; fi
echo "$2, $2, $(( 2 * $2 - 1 ))""#,
    );
    let config = BatchConfig {
        p: 2,
        n_max: 12,
        step: 1,
        out_dir: dir.path().to_path_buf(),
        num_chunks: 4,
        jobs: 2,
        oracle: OracleConfig {
            program: script,
            timeout: None,
        },
        best_effort: true,
        ..BatchConfig::default()
    };

    let report = pipeline::run_batch(&config, &CancelToken::new(), |_| {}).unwrap();
    assert_eq!(report.outcome.rows.len(), 11);
    assert_eq!(report.outcome.missing.len(), 1);
    assert_eq!(report.outcome.missing[0].n, 7);

    let manifest = pipeline::read_manifest(&report.manifest_path).unwrap();
    assert!(manifest.best_effort);
    assert_eq!(manifest.missing.len(), 1);
    assert_eq!(manifest.missing[0].n, 7);
}

#[test]
fn test_verify_flags_corrupted_sumset() {
    let dir = tempfile::tempdir().unwrap();
    // p=2: n=1 -> (1, 1) correct; n=2 -> true (3, 6), report 7
    let script = write_script(
        dir.path(),
        "ads_p",
        r#"case "$2" in
  1) echo "1, 1, 1" ;;
  2) echo "2, 3, 7" ;;
  *) exit 1 ;;
esac"#,
    );
    let config = VerifyConfig {
        p: 2,
        n_max: 3,
        step: 1,
        oracle: OracleConfig {
            program: script,
            timeout: None,
        },
    };

    let results = pipeline::run_verification(&config, &CancelToken::new()).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].verdict, Verdict::Agree);
    assert_eq!(
        results[1].verdict,
        Verdict::Mismatch {
            set_size: false,
            sumset_size: true
        }
    );
    assert!(matches!(results[2].verdict, Verdict::OracleFailed(_)));
}

#[test]
fn test_cancel_verification_kills_oracles() {
    let dir = tempfile::tempdir().unwrap();
    let pid_dir = dir.path().join("pids");
    std::fs::create_dir(&pid_dir).unwrap();
    let script = write_script(
        dir.path(),
        "ads_p",
        &format!("echo $$ > {}/$2\nsleep 30\necho \"$2, 1, 1\"", pid_dir.display()),
    );
    let config = VerifyConfig {
        p: 2,
        n_max: 4,
        step: 1,
        oracle: OracleConfig {
            program: script,
            timeout: None,
        },
    };
    let cancel = CancelToken::new();

    let canceller = {
        let cancel = cancel.clone();
        let pid_dir = pid_dir.clone();
        std::thread::spawn(move || {
            // Wait until at least one oracle is running
            let deadline = Instant::now() + Duration::from_secs(5);
            while std::fs::read_dir(&pid_dir).unwrap().count() == 0 && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            cancel.cancel();
        })
    };

    let start = Instant::now();
    let results = pipeline::run_verification(&config, &cancel).unwrap();
    canceller.join().unwrap();
    assert!(start.elapsed() < Duration::from_secs(10));

    assert_eq!(results.len(), 4);
    for r in &results {
        assert_eq!(r.verdict, Verdict::OracleFailed("cancelled".to_string()));
    }

    // Every oracle that started has been killed and reaped
    for entry in std::fs::read_dir(&pid_dir).unwrap() {
        let text = std::fs::read_to_string(entry.unwrap().path()).unwrap();
        if text.trim().is_empty() {
            continue;
        }
        let pid: libc::pid_t = text.trim().parse().unwrap();
        let alive = unsafe { libc::kill(pid, 0) } == 0;
        assert!(!alive, "oracle {pid} outlived the verification run");
    }
}
