//! Run configuration and defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default oracle executable, relative to the working directory.
pub const DEFAULT_ORACLE: &str = "./ads_p";

/// Default number of chunks a range is split into.
pub const DEFAULT_NUM_CHUNKS: usize = 40;

/// Default output directory for CSV artifacts and manifests.
pub const DEFAULT_OUT_DIR: &str = "data";

/// How to reach the external cardinality oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Path to the oracle executable.
    pub program: PathBuf,
    /// Optional bound on a single oracle call. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        OracleConfig {
            program: PathBuf::from(DEFAULT_ORACLE),
            timeout: None,
        }
    }
}

/// Full configuration for one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Progression base, `p >= 2`.
    pub p: u64,
    /// Exclusive lower offset: the first evaluated `n` is `range_start + step`.
    pub range_start: u64,
    /// Largest `n` to evaluate (inclusive).
    pub n_max: u64,
    /// Spacing between evaluated `n` values.
    pub step: u64,
    pub out_dir: PathBuf,
    pub num_chunks: usize,
    /// Worker threads in the pool.
    pub jobs: usize,
    pub oracle: OracleConfig,
    /// Skip failing units instead of aborting; missing `n` are reported.
    pub best_effort: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            p: 2,
            range_start: 0,
            n_max: 100,
            step: 1,
            out_dir: PathBuf::from(DEFAULT_OUT_DIR),
            num_chunks: DEFAULT_NUM_CHUNKS,
            jobs: default_jobs(),
            oracle: OracleConfig::default(),
            best_effort: false,
        }
    }
}

/// Worker count matching the machine's available parallelism.
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Configuration for a verification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyConfig {
    pub p: u64,
    pub n_max: u64,
    pub step: u64,
    pub oracle: OracleConfig,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        VerifyConfig {
            p: 2,
            n_max: 20,
            step: 1,
            oracle: OracleConfig::default(),
        }
    }
}
