//! Parallel batch runner.
//!
//! Chunks are spawned onto a fixed-size rayon pool. Each job walks its
//! chunk sequentially (oracle query, then statistic derivation) and sends
//! one message back over a channel when the whole chunk is done. The
//! calling thread receives those messages in completion order, reports
//! progress, and finally sorts the concatenated rows by `n`.
//!
//! On the first hard failure the runner cancels the shared token: queued
//! chunks return immediately and in-flight oracle processes are killed.
//! The pool scope does not exit until every job has returned.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::oracle::{CancelToken, CardinalityOracle, OracleError};
use crate::partition::Chunk;
use crate::sink::SinkError;
use crate::stats::{self, ResultRow, StatsError};

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("oracle failed at n={n}: {source}")]
    Oracle {
        n: u64,
        #[source]
        source: OracleError,
    },

    #[error("oracle unavailable: {0}")]
    OracleUnavailable(#[source] OracleError),

    #[error("INVARIANT VIOLATION (oracle bug?): {0}")]
    Invariant(#[from] StatsError),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("batch cancelled")]
    Cancelled,

    #[error("could not build worker pool: {0}")]
    Pool(String),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("failed to write manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Observational progress, emitted once per completed chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    pub completed: usize,
    pub total: usize,
    pub elapsed: Duration,
}

impl ProgressEvent {
    pub fn percent(&self) -> usize {
        if self.total == 0 {
            100
        } else {
            100 * self.completed / self.total
        }
    }
}

/// A unit skipped in best-effort mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingUnit {
    pub n: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    pub workers: usize,
    pub best_effort: bool,
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// One row per successfully evaluated `n`, ascending.
    pub rows: Vec<ResultRow>,
    /// Skipped units, ascending by `n`. Always empty unless best-effort.
    pub missing: Vec<MissingUnit>,
    pub chunks: usize,
    pub elapsed: Duration,
}

/// Output of one worker invocation.
#[derive(Debug)]
struct ChunkReport {
    rows: Vec<ResultRow>,
    missing: Vec<MissingUnit>,
}

/// Evaluate every pair in `chunk`, in order, on the current thread.
fn run_chunk(
    oracle: &dyn CardinalityOracle,
    chunk: &Chunk,
    cancel: &CancelToken,
    best_effort: bool,
) -> Result<ChunkReport, BatchError> {
    let mut report = ChunkReport {
        rows: Vec::with_capacity(chunk.len()),
        missing: Vec::new(),
    };

    for &pair in &chunk.pairs {
        if cancel.is_cancelled() {
            return Err(BatchError::Cancelled);
        }

        let cards = match oracle.query(pair, cancel) {
            Ok(cards) => cards,
            Err(OracleError::Cancelled) => return Err(BatchError::Cancelled),
            Err(e) if best_effort => {
                log::warn!("skipping n={}: {}", pair.n, e);
                report.missing.push(MissingUnit {
                    n: pair.n,
                    reason: e.to_string(),
                });
                continue;
            }
            Err(e) => return Err(BatchError::Oracle { n: pair.n, source: e }),
        };

        let row = stats::derive(pair.n, cards).map_err(|e| {
            log::error!("{}", e);
            BatchError::Invariant(e)
        })?;
        report.rows.push(row);
    }

    Ok(report)
}

/// Concatenate per-chunk row lists (in any order) and sort by `n`.
pub fn merge_rows(chunk_rows: Vec<Vec<ResultRow>>) -> Vec<ResultRow> {
    let mut rows: Vec<ResultRow> = chunk_rows.into_iter().flatten().collect();
    rows.sort_by_key(|row| row.n);
    rows
}

/// Run all chunks on a pool of `options.workers` threads.
///
/// Returns rows sorted by `n`. Fails fast with the first error received;
/// rows already collected are discarded. `on_progress` runs on the
/// calling thread after each chunk completes.
pub fn run(
    chunks: Vec<Chunk>,
    oracle: &dyn CardinalityOracle,
    options: &RunnerOptions,
    cancel: &CancelToken,
    mut on_progress: impl FnMut(ProgressEvent),
) -> Result<BatchOutcome, BatchError> {
    let start = Instant::now();
    let total = chunks.len();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.workers.max(1))
        .thread_name(|i| format!("ads-worker-{i}"))
        .build()
        .map_err(|e| BatchError::Pool(e.to_string()))?;

    log::info!(
        "running {} chunks on {} workers against {}",
        total,
        options.workers.max(1),
        oracle.describe()
    );

    let (tx, rx) = mpsc::channel::<(usize, Result<ChunkReport, BatchError>)>();
    let best_effort = options.best_effort;

    let collected = pool.in_place_scope(|scope| {
        for chunk in chunks {
            let tx = tx.clone();
            scope.spawn(move |_| {
                let result = run_chunk(oracle, &chunk, cancel, best_effort);
                let _ = tx.send((chunk.index, result));
            });
        }
        drop(tx);

        let mut chunk_rows = Vec::with_capacity(total);
        let mut missing = Vec::new();
        let mut first_error: Option<BatchError> = None;
        let mut completed = 0;

        // Ends once every job has sent and dropped its sender
        for (index, result) in rx {
            completed += 1;
            match result {
                Ok(report) => {
                    log::debug!("chunk {} done ({} rows)", index, report.rows.len());
                    chunk_rows.push(report.rows);
                    missing.extend(report.missing);
                }
                Err(e) => {
                    if first_error.is_none() && !matches!(e, BatchError::Cancelled) {
                        log::error!("chunk {} failed: {}; cancelling remaining work", index, e);
                        cancel.cancel();
                        first_error = Some(e);
                    }
                }
            }
            if first_error.is_none() && !cancel.is_cancelled() {
                on_progress(ProgressEvent {
                    completed,
                    total,
                    elapsed: start.elapsed(),
                });
            }
        }

        match first_error {
            Some(e) => Err(e),
            None if cancel.is_cancelled() => Err(BatchError::Cancelled),
            None => Ok((chunk_rows, missing)),
        }
    });

    let (chunk_rows, mut missing) = collected?;
    missing.sort_by_key(|m| m.n);

    Ok(BatchOutcome {
        rows: merge_rows(chunk_rows),
        missing,
        chunks: total,
        elapsed: start.elapsed(),
    })
}
