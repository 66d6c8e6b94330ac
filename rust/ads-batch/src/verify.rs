//! Brute-force verification oracle.
//!
//! Rebuilds A_n(p) = { i * p^j : 1 <= i, j <= n } by direct enumeration,
//! forms A + A from every unordered pair, and counts both sets. This is
//! O(n^4) in the number of sums and only meant for small `n`; it exists
//! to certify the fast oracle, never to replace it on production ranges.

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Write};

use num_bigint::BigUint;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::oracle::{CancelToken, CardinalityOracle, OracleError};
use crate::{CardinalityPair, ParamPair};

/// Upper bound on up-front hash set reservations; larger sets grow on demand.
const PREALLOC_CAP: usize = 1 << 20;

fn prealloc(expected: u64) -> usize {
    expected.min(PREALLOC_CAP as u64) as usize
}

/// The generator set A_n(p), deduplicated, ascending.
pub fn generator_set(p: u64, n: u64) -> Vec<BigUint> {
    let base = BigUint::from(p);
    let mut set = HashSet::with_capacity(prealloc(n.saturating_mul(n)));

    let mut power = base.clone(); // p^j, starting at j = 1
    for _ in 1..=n {
        for i in 1..=n {
            set.insert(&power * i);
        }
        power *= &base;
    }

    let mut elems: Vec<BigUint> = set.into_iter().collect();
    elems.sort();
    elems
}

/// Number of distinct sums `a + b` with `a, b` in `set`.
pub fn sumset_size(set: &[BigUint]) -> usize {
    let len = set.len() as u64;
    let mut sums = HashSet::with_capacity(prealloc(len.saturating_mul(len.saturating_add(1)) / 2));
    for (idx, a) in set.iter().enumerate() {
        for b in &set[idx..] {
            sums.insert(a + b);
        }
    }
    sums.len()
}

/// `(|A_n(p)|, |A_n(p) + A_n(p)|)` by enumeration.
pub fn brute_force(p: u64, n: u64) -> CardinalityPair {
    let set = generator_set(p, n);
    let aa = sumset_size(&set);
    CardinalityPair::new(set.len(), aa)
}

/// The brute-force builder behind the oracle interface, for small ranges
/// and for running the pipeline without the external program.
#[derive(Debug, Clone, Copy, Default)]
pub struct BruteForceOracle;

impl CardinalityOracle for BruteForceOracle {
    fn query(&self, pair: ParamPair, cancel: &CancelToken) -> Result<CardinalityPair, OracleError> {
        if cancel.is_cancelled() {
            return Err(OracleError::Cancelled);
        }
        Ok(brute_force(pair.p, pair.n))
    }

    fn describe(&self) -> String {
        "brute-force".to_string()
    }
}

/// Outcome of cross-checking one `n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Agree,
    /// Either or both sizes differ; both flags can be set.
    Mismatch { set_size: bool, sumset_size: bool },
    /// The fast oracle could not answer for this `n`.
    OracleFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub n: u64,
    /// `None` when the run was cancelled before this `n` was enumerated.
    pub brute: Option<CardinalityPair>,
    pub oracle: Option<CardinalityPair>,
    pub verdict: Verdict,
}

impl VerificationResult {
    fn cancelled(n: u64) -> Self {
        VerificationResult {
            n,
            brute: None,
            oracle: None,
            verdict: Verdict::OracleFailed("cancelled".to_string()),
        }
    }

    pub fn matches_a(&self) -> bool {
        match (&self.oracle, &self.brute) {
            (Some(o), Some(b)) => o.a_size == b.a_size,
            _ => false,
        }
    }

    pub fn matches_aa(&self) -> bool {
        match (&self.oracle, &self.brute) {
            (Some(o), Some(b)) => o.aa_size == b.aa_size,
            _ => false,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.verdict == Verdict::Agree
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.verdict, &self.oracle, &self.brute) {
            (Verdict::Agree, _, Some(brute)) => write!(
                f,
                "n={:>4}  OK        |A| = {}, |A+A| = {}",
                self.n, brute.a_size, brute.aa_size
            ),
            (Verdict::Agree, _, None) => write!(f, "n={:>4}  OK", self.n),
            (Verdict::Mismatch { set_size, sumset_size }, Some(oracle), Some(brute)) => {
                let what = match (set_size, sumset_size) {
                    (true, true) => "SET+SUMSET MISMATCH",
                    (true, false) => "SET-SIZE MISMATCH",
                    _ => "SUMSET-SIZE MISMATCH",
                };
                write!(
                    f,
                    "n={:>4}  {}  oracle: {}  brute force: {}",
                    self.n, what, oracle, brute
                )
            }
            (Verdict::Mismatch { .. }, _, _) => write!(f, "n={:>4}  MISMATCH", self.n),
            (Verdict::OracleFailed(reason), _, _) => {
                write!(f, "n={:>4}  ORACLE FAILED  {}", self.n, reason)
            }
        }
    }
}

/// Compare brute-force and oracle results.
pub fn classify(brute: &CardinalityPair, oracle: &CardinalityPair) -> Verdict {
    let set_size = brute.a_size != oracle.a_size;
    let sumset_size = brute.aa_size != oracle.aa_size;
    if set_size || sumset_size {
        Verdict::Mismatch { set_size, sumset_size }
    } else {
        Verdict::Agree
    }
}

/// Cross-check `oracle` against brute force for every `n` in `n_values`.
///
/// Every `n` is checked regardless of earlier mismatches or oracle
/// failures. Brute-force construction runs in parallel; results come back
/// in the order of `n_values`. Once `cancel` fires, in-flight oracle calls
/// are killed and every unfinished `n` is reported as
/// `OracleFailed("cancelled")`.
pub fn verify(
    oracle: &dyn CardinalityOracle,
    p: u64,
    n_values: &[u64],
    cancel: &CancelToken,
) -> Vec<VerificationResult> {
    n_values
        .par_iter()
        .map(|&n| {
            if cancel.is_cancelled() {
                return VerificationResult::cancelled(n);
            }
            let brute = brute_force(p, n);
            match oracle.query(ParamPair::new(p, n), cancel) {
                Err(OracleError::Cancelled) => VerificationResult::cancelled(n),
                Ok(fast) => {
                    let verdict = classify(&brute, &fast);
                    if verdict != Verdict::Agree {
                        log::warn!("p={} n={}: oracle {} vs brute force {}", p, n, fast, brute);
                    }
                    VerificationResult {
                        n,
                        brute: Some(brute),
                        oracle: Some(fast),
                        verdict,
                    }
                }
                Err(e) => {
                    log::warn!("p={} n={}: oracle failed: {}", p, n, e);
                    VerificationResult {
                        n,
                        brute: Some(brute),
                        oracle: None,
                        verdict: Verdict::OracleFailed(e.to_string()),
                    }
                }
            }
        })
        .collect()
}

/// Counts over a verification run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub checked: usize,
    pub agree: usize,
    pub set_mismatches: usize,
    pub sumset_mismatches: usize,
    pub oracle_failures: usize,
}

impl VerificationSummary {
    pub fn from_results(results: &[VerificationResult]) -> Self {
        let mut summary = VerificationSummary {
            checked: results.len(),
            ..Default::default()
        };
        for r in results {
            match &r.verdict {
                Verdict::Agree => summary.agree += 1,
                Verdict::Mismatch { set_size, sumset_size } => {
                    summary.set_mismatches += usize::from(*set_size);
                    summary.sumset_mismatches += usize::from(*sumset_size);
                }
                Verdict::OracleFailed(_) => summary.oracle_failures += 1,
            }
        }
        summary
    }

    pub fn all_agree(&self) -> bool {
        self.agree == self.checked
    }
}

/// Write one line per `n` plus a summary line.
pub fn print_report<W: Write>(out: &mut W, p: u64, results: &[VerificationResult]) -> io::Result<VerificationSummary> {
    let summary = VerificationSummary::from_results(results);
    writeln!(out, "Verification for p = {}", p)?;
    for r in results {
        writeln!(out, "  {}", r)?;
    }
    writeln!(
        out,
        "{} checked: {} agree, {} set-size mismatches, {} sumset-size mismatches, {} oracle failures",
        summary.checked,
        summary.agree,
        summary.set_mismatches,
        summary.sumset_mismatches,
        summary.oracle_failures
    )?;
    Ok(summary)
}
