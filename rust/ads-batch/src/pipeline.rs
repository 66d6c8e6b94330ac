//! Invocation surfaces: batch computation and verification.
//!
//! Batch: partition -> parallel run (oracle + derivation per unit) ->
//! sort by `n` -> CSV artifact -> JSON manifest. Nothing is written unless
//! the run succeeds.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::{BatchConfig, VerifyConfig};
use crate::oracle::{CancelToken, CardinalityOracle, SubprocessOracle};
use crate::partition::{partition, RangeSpec};
use crate::runner::{self, BatchError, BatchOutcome, MissingUnit, ProgressEvent, RunnerOptions};
use crate::sink;
use crate::verify::{self, VerificationResult};

/// Bump when the CSV columns or manifest fields change meaning.
pub const SCHEMA_VERSION: &str = "ads-batch-v1";

pub const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Sidecar written next to each CSV artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: String,
    pub crate_version: String,
    pub git_commit: String,
    pub started_at: String,
    pub finished_at: String,
    pub p: u64,
    pub range_start: u64,
    pub n_max: u64,
    pub step: u64,
    pub num_chunks: usize,
    pub jobs: usize,
    pub oracle: String,
    pub best_effort: bool,
    pub rows: usize,
    pub elapsed_secs: f64,
    pub artifact: String,
    pub missing: Vec<MissingUnit>,
}

/// What a successful batch run left behind.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub csv_path: PathBuf,
    pub manifest_path: PathBuf,
    pub outcome: BatchOutcome,
}

/// Reject parameters that cannot produce a meaningful run.
pub fn validate_range(p: u64, range: &RangeSpec) -> Result<Vec<u64>, BatchError> {
    if p < 2 {
        return Err(BatchError::InvalidRange(format!("p must be >= 2, got {}", p)));
    }
    if range.step == 0 {
        return Err(BatchError::InvalidRange("step must be positive".to_string()));
    }
    let values = range.values();
    if values.is_empty() {
        return Err(BatchError::InvalidRange(format!(
            "no n values in {}..={} step {}",
            range.start, range.stop, range.step
        )));
    }
    Ok(values)
}

/// Run a batch against the external oracle named in `config`.
pub fn run_batch(
    config: &BatchConfig,
    cancel: &CancelToken,
    on_progress: impl FnMut(ProgressEvent),
) -> Result<BatchReport, BatchError> {
    let oracle = SubprocessOracle::new(&config.oracle);
    oracle.validate().map_err(BatchError::OracleUnavailable)?;
    run_batch_with(config, &oracle, cancel, on_progress)
}

/// Run a batch against any oracle.
pub fn run_batch_with(
    config: &BatchConfig,
    oracle: &dyn CardinalityOracle,
    cancel: &CancelToken,
    on_progress: impl FnMut(ProgressEvent),
) -> Result<BatchReport, BatchError> {
    let started_at = iso_now();
    let start = Instant::now();

    let range = RangeSpec::after(config.range_start, config.n_max, config.step);
    let values = validate_range(config.p, &range)?;
    let chunks = partition(config.p, range, config.num_chunks);

    log::info!(
        "p={}: {} values of n in {}..={} (step {}), {} chunks",
        config.p,
        values.len(),
        range.start,
        range.stop,
        range.step,
        chunks.len()
    );

    let options = RunnerOptions {
        workers: config.jobs,
        best_effort: config.best_effort,
    };
    let outcome = runner::run(chunks, oracle, &options, cancel, on_progress)?;

    let csv_path = config
        .out_dir
        .join(sink::artifact_name(config.p, config.n_max, config.step));
    sink::write(&outcome.rows, &csv_path)?;

    let manifest = RunManifest {
        schema_version: SCHEMA_VERSION.to_string(),
        crate_version: CRATE_VERSION.to_string(),
        git_commit: git_commit_hash(),
        started_at,
        finished_at: iso_now(),
        p: config.p,
        range_start: config.range_start,
        n_max: config.n_max,
        step: config.step,
        num_chunks: config.num_chunks,
        jobs: config.jobs,
        oracle: oracle.describe(),
        best_effort: config.best_effort,
        rows: outcome.rows.len(),
        elapsed_secs: start.elapsed().as_secs_f64(),
        artifact: csv_path.display().to_string(),
        missing: outcome.missing.clone(),
    };
    let manifest_path = csv_path.with_extension("json");
    write_manifest(&manifest, &manifest_path)?;

    Ok(BatchReport {
        csv_path,
        manifest_path,
        outcome,
    })
}

fn write_manifest(manifest: &RunManifest, path: &Path) -> Result<(), BatchError> {
    let json = serde_json::to_string_pretty(manifest)?;
    std::fs::write(path, json)?;
    log::info!("wrote manifest {}", path.display());
    Ok(())
}

/// Load a manifest written by a previous run.
pub fn read_manifest(path: &Path) -> Result<RunManifest, BatchError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// `n` values checked by a verification run: `step, 2*step, ... <= n_max`.
pub fn verification_values(config: &VerifyConfig) -> Result<Vec<u64>, BatchError> {
    validate_range(config.p, &RangeSpec::after(0, config.n_max, config.step))
}

/// Cross-check the external oracle against brute force.
///
/// Cancelling `cancel` kills in-flight oracle processes; unfinished values
/// come back as `OracleFailed("cancelled")`.
pub fn run_verification(
    config: &VerifyConfig,
    cancel: &CancelToken,
) -> Result<Vec<VerificationResult>, BatchError> {
    let oracle = SubprocessOracle::new(&config.oracle);
    oracle.validate().map_err(BatchError::OracleUnavailable)?;
    run_verification_with(config, &oracle, cancel)
}

pub fn run_verification_with(
    config: &VerifyConfig,
    oracle: &dyn CardinalityOracle,
    cancel: &CancelToken,
) -> Result<Vec<VerificationResult>, BatchError> {
    let values = verification_values(config)?;
    log::info!(
        "verifying {} against brute force for p={} on {} values of n",
        oracle.describe(),
        config.p,
        values.len()
    );
    Ok(verify::verify(oracle, config.p, &values, cancel))
}

/// Current time as an ISO 8601 string (UTC).
///
/// Uses `date` on Unix; falls back to seconds since the epoch.
pub fn iso_now() -> String {
    #[cfg(unix)]
    {
        let output = std::process::Command::new("date")
            .args(["-u", "+%Y-%m-%dT%H:%M:%SZ"])
            .output();
        if let Ok(out) = output {
            if out.status.success() {
                return String::from_utf8_lossy(&out.stdout).trim().to_string();
            }
        }
    }
    let d = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("epoch:{}", d.as_secs())
}

/// Short hash of the checked-out commit, or "unknown".
pub fn git_commit_hash() -> String {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output();
    if let Ok(out) = output {
        if out.status.success() {
            return String::from_utf8_lossy(&out.stdout).trim().to_string();
        }
    }
    "unknown".to_string()
}
