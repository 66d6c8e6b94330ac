//! Work partitioning: range of `n` values -> balanced contiguous chunks.

use serde::{Deserialize, Serialize};

use crate::ParamPair;

/// An inclusive arithmetic range `start, start+step, ... <= stop`.
///
/// `n = 0` is never produced: it is not a valid size parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeSpec {
    pub start: u64,
    pub stop: u64,
    pub step: u64,
}

impl RangeSpec {
    pub fn new(start: u64, stop: u64, step: u64) -> Self {
        RangeSpec { start, stop, step }
    }

    /// Range that begins one step *after* `offset`: `offset+step, ... <= stop`.
    ///
    /// A run continuing from a previous `stop` uses that `stop` as `offset`
    /// and never repeats it.
    pub fn after(offset: u64, stop: u64, step: u64) -> Self {
        RangeSpec {
            start: offset.saturating_add(step),
            stop,
            step,
        }
    }

    /// All `n` values in ascending order. Empty when `step == 0`.
    pub fn values(&self) -> Vec<u64> {
        if self.step == 0 || self.start > self.stop {
            return Vec::new();
        }
        let count = (self.stop - self.start) / self.step + 1;
        (0..count)
            .map(|k| self.start + k * self.step)
            .filter(|&n| n > 0)
            .collect()
    }
}

/// An ordered, non-empty run of parameter pairs handed to one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position of this chunk in the partition (0-based).
    pub index: usize,
    pub pairs: Vec<ParamPair>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn ns(&self) -> impl Iterator<Item = u64> + '_ {
        self.pairs.iter().map(|pair| pair.n)
    }
}

/// Split the range into at most `num_chunks` contiguous, non-empty chunks.
///
/// Sizes differ by at most one; the `len % num_chunks` leftover values go
/// one each to the leading chunks. Chunks that would be empty (fewer values
/// than chunks) are dropped. Deterministic in its arguments.
pub fn partition(p: u64, range: RangeSpec, num_chunks: usize) -> Vec<Chunk> {
    let pairs: Vec<ParamPair> = range
        .values()
        .into_iter()
        .map(|n| ParamPair::new(p, n))
        .collect();
    split_balanced(&pairs, num_chunks)
}

fn split_balanced(pairs: &[ParamPair], num_chunks: usize) -> Vec<Chunk> {
    let k = num_chunks.max(1);
    let base = pairs.len() / k;
    let extra = pairs.len() % k;

    let mut chunks = Vec::with_capacity(k.min(pairs.len()));
    let mut offset = 0;
    for i in 0..k {
        let size = base + usize::from(i < extra);
        if size == 0 {
            break;
        }
        chunks.push(Chunk {
            index: chunks.len(),
            pairs: pairs[offset..offset + size].to_vec(),
        });
        offset += size;
    }
    chunks
}
