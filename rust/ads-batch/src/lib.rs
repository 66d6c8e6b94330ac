//! ads-batch: exact sumset statistics for geometric-progression-like sets.
//!
//! For a base `p >= 2` and size `n >= 1` the generator set is
//!
//!   A_n(p) = { i * p^j : 1 <= i <= n, 1 <= j <= n }
//!
//! and the quantity of interest is how far |A + A| falls below the
//! trivial bound |A|(|A|+1)/2. The exact cardinalities come from an
//! external program (the "oracle"); this crate fans a range of `n` out
//! over a worker pool, derives the doubling deficiency and duplicate
//! density in exact rational arithmetic, writes the sorted rows to CSV,
//! and cross-checks the oracle against a brute-force construction.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

pub mod config;
pub mod oracle;
pub mod partition;
pub mod pipeline;
pub mod runner;
pub mod sink;
pub mod stats;
pub mod verify;

/// One unit of work: progression base `p` and size parameter `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamPair {
    pub p: u64,
    pub n: u64,
}

impl ParamPair {
    pub fn new(p: u64, n: u64) -> Self {
        ParamPair { p, n }
    }
}

/// Exact cardinalities `(|A_n(p)|, |A_n(p) + A_n(p)|)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CardinalityPair {
    pub a_size: BigUint,
    pub aa_size: BigUint,
}

impl CardinalityPair {
    pub fn new(a_size: impl Into<BigUint>, aa_size: impl Into<BigUint>) -> Self {
        CardinalityPair {
            a_size: a_size.into(),
            aa_size: aa_size.into(),
        }
    }
}

impl std::fmt::Display for CardinalityPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "|A| = {}, |A+A| = {}", self.a_size, self.aa_size)
    }
}
