//! Statistic derivation: doubling deficiency and duplicate density.
//!
//! With P = |A|(|A|+1)/2 (the number of unordered sums with repetition):
//!
//!   dup_density = (P - |A+A|) / P
//!   delta       = 1/2 - |A+A| / |A|^2
//!
//! Both are held as exact `BigRational`s. Narrowing to `f64` happens once,
//! through [`ResultRow::delta_f64`] / [`ResultRow::dup_density_f64`], when
//! the row is serialized.

use std::fmt;

use num_bigint::{BigInt, BigUint};
use num_rational::BigRational;
use num_traits::{One, ToPrimitive, Zero};

use crate::CardinalityPair;

/// One output row, keyed by `n` within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
    pub n: u64,
    pub a_size: BigUint,
    pub aa_size: BigUint,
    pub delta: BigRational,
    pub dup_density: BigRational,
}

impl ResultRow {
    pub fn delta_f64(&self) -> f64 {
        ratio_to_f64(&self.delta)
    }

    pub fn dup_density_f64(&self) -> f64 {
        ratio_to_f64(&self.dup_density)
    }
}

/// Which sanity bound a cardinality pair broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// |A| = 0, impossible for n >= 1.
    EmptySet,
    /// |A| > n^2, more elements than generators.
    SetExceedsGenerators,
    /// |A+A| < |A|.
    SumsetBelowSet,
    /// |A+A| > |A|(|A|+1)/2.
    SumsetExceedsPairs,
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Bound::EmptySet => "|A| must be at least 1",
            Bound::SetExceedsGenerators => "|A| exceeds n^2",
            Bound::SumsetBelowSet => "|A+A| is smaller than |A|",
            Bound::SumsetExceedsPairs => "|A+A| exceeds |A|(|A|+1)/2",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StatsError {
    #[error("invariant violation at n={n}: {bound} (|A| = {a_size}, |A+A| = {aa_size})")]
    InvariantViolation {
        n: u64,
        a_size: BigUint,
        aa_size: BigUint,
        bound: Bound,
    },
}

/// P = |A|(|A|+1)/2, the largest possible |A+A| for a set of size |A|.
pub fn max_sumset_size(a_size: &BigUint) -> BigUint {
    // a(a+1) is always even
    (a_size * (a_size + 1u32)) >> 1usize
}

/// Check the cardinality invariants for size parameter `n`.
pub fn check_bounds(n: u64, cards: &CardinalityPair) -> Result<(), StatsError> {
    let violation = |bound| StatsError::InvariantViolation {
        n,
        a_size: cards.a_size.clone(),
        aa_size: cards.aa_size.clone(),
        bound,
    };

    if cards.a_size.is_zero() {
        return Err(violation(Bound::EmptySet));
    }
    let generators = BigUint::from(n) * BigUint::from(n);
    if cards.a_size > generators {
        return Err(violation(Bound::SetExceedsGenerators));
    }
    if cards.aa_size < cards.a_size {
        return Err(violation(Bound::SumsetBelowSet));
    }
    if cards.aa_size > max_sumset_size(&cards.a_size) {
        return Err(violation(Bound::SumsetExceedsPairs));
    }
    Ok(())
}

/// Derive the result row for `n` from the oracle's cardinalities.
///
/// Fails loudly on any bound violation: a bad pair means the oracle is
/// wrong, and clamping would hide it.
pub fn derive(n: u64, cards: CardinalityPair) -> Result<ResultRow, StatsError> {
    check_bounds(n, &cards)?;

    let a = BigInt::from(cards.a_size.clone());
    let aa = BigInt::from(cards.aa_size.clone());
    let p = BigInt::from(max_sumset_size(&cards.a_size));

    let half = BigRational::new(BigInt::one(), BigInt::from(2));
    let delta = half - BigRational::new(aa.clone(), &a * &a);
    let dup_density = BigRational::new(&p - &aa, p);

    Ok(ResultRow {
        n,
        a_size: cards.a_size,
        aa_size: cards.aa_size,
        delta,
        dup_density,
    })
}

fn ratio_to_f64(r: &BigRational) -> f64 {
    r.to_f64().unwrap_or(f64::NAN)
}
