use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, str::FromStr};

use crate::{BowErr, BowVector, WordValue};

/// Similarity measure between two bag-of-words vectors.
///
/// Every variant is symmetric and lies in `[0, 1]`: 1 for two identical
/// nonzero vectors, 0 when one side is empty or the supports are disjoint.
///
/// Each score is a sum over the words present in both vectors followed by a
/// finalization step, which is what lets the database evaluate it from
/// posting lists alone.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScoringType {
    /// `1 - |a - b|_1 / 2` (Galvez, Eq 2).
    L1Norm,
    /// `1 - sqrt(1 - cos(a, b))`, for non-binary descriptor spaces.
    L2Norm,
    /// `sum 2 a_i b_i / (a_i + b_i)`.
    ChiSquare,
    /// `sum sqrt(a_i b_i)`.
    Bhattacharyya,
    /// Shared words over the union of words, i.e. one minus the normalized
    /// Hamming distance between the word-presence bit vectors.
    Hamming,
}

/// Per-vector quantities some scores need at finalization.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BowStats {
    /// Number of nonzero words.
    pub words: usize,
    /// Sum of squared weights.
    pub sq_norm: WordValue,
}

impl BowStats {
    pub fn of(v: &BowVector) -> Self {
        Self {
            words: v.len(),
            sq_norm: v.iter().fold(0., |a, (_, x)| a + x * x),
        }
    }
}

impl ScoringType {
    pub const ALL: [ScoringType; 5] = [
        ScoringType::L1Norm,
        ScoringType::L2Norm,
        ScoringType::ChiSquare,
        ScoringType::Bhattacharyya,
        ScoringType::Hamming,
    ];

    /// Canonical identifier, as written to containers.
    pub fn name(&self) -> &'static str {
        match self {
            ScoringType::L1Norm => "L1_NORM",
            ScoringType::L2Norm => "L2_NORM",
            ScoringType::ChiSquare => "CHI_SQUARE",
            ScoringType::Bhattacharyya => "BHATTACHARYYA",
            ScoringType::Hamming => "HAMMING",
        }
    }

    /// Best attainable score.
    pub fn max_score(&self) -> f64 {
        1.
    }

    /// Score of any vector against an empty one.
    pub fn min_score(&self) -> f64 {
        0.
    }

    /// Score two vectors. Inputs are L1 normalized first if they are not already.
    pub fn score(&self, a: &BowVector, b: &BowVector) -> f64 {
        let a = normalized(a);
        let b = normalized(b);
        let a = a.as_ref();
        let b = b.as_ref();

        let mut acc = 0.;
        let mut ia = a.iter().peekable();
        let mut ib = b.iter().peekable();
        loop {
            let (wa, va, wb, vb) = match (ia.peek(), ib.peek()) {
                (Some(&(wa, va)), Some(&(wb, vb))) => (wa, va, wb, vb),
                _ => break,
            };
            match wa.cmp(&wb) {
                Ordering::Less => {
                    ia.next();
                }
                Ordering::Greater => {
                    ib.next();
                }
                Ordering::Equal => {
                    acc += self.partial(va, vb);
                    ia.next();
                    ib.next();
                }
            }
        }
        self.finalize(acc, &BowStats::of(a), &BowStats::of(b))
    }

    /// Contribution of one word present in both vectors.
    #[inline]
    pub(crate) fn partial(&self, a: WordValue, b: WordValue) -> f64 {
        match self {
            ScoringType::L1Norm => a.abs() + b.abs() - (a - b).abs(),
            ScoringType::L2Norm => a * b,
            ScoringType::ChiSquare => {
                if a + b > 0. {
                    2. * a * b / (a + b)
                } else {
                    0.
                }
            }
            ScoringType::Bhattacharyya => (a * b).sqrt(),
            ScoringType::Hamming => 1.,
        }
    }

    /// Turn the accumulated partial sums into the final score.
    pub(crate) fn finalize(&self, acc: f64, a: &BowStats, b: &BowStats) -> f64 {
        let s = match self {
            ScoringType::L1Norm => 0.5 * acc,
            ScoringType::L2Norm => {
                let norms = (a.sq_norm * b.sq_norm).sqrt();
                if norms > 0. {
                    let cos = (acc / norms).min(1.);
                    1. - (1. - cos).sqrt()
                } else {
                    0.
                }
            }
            ScoringType::ChiSquare | ScoringType::Bhattacharyya => acc,
            ScoringType::Hamming => {
                let union = (a.words + b.words) as f64 - acc;
                if union > 0. {
                    acc / union
                } else {
                    0.
                }
            }
        };
        s.max(self.min_score()).min(self.max_score())
    }
}

pub(crate) fn normalized(v: &BowVector) -> std::borrow::Cow<'_, BowVector> {
    if v.is_empty() || v.is_normalized() {
        std::borrow::Cow::Borrowed(v)
    } else {
        let mut n = v.clone();
        n.retain_nonzero();
        n.normalize();
        std::borrow::Cow::Owned(n)
    }
}

impl Default for ScoringType {
    fn default() -> Self {
        ScoringType::L1Norm
    }
}

impl fmt::Display for ScoringType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScoringType {
    type Err = BowErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScoringType::ALL
            .iter()
            .find(|t| t.name() == s)
            .copied()
            .ok_or_else(|| BowErr::UnsupportedScheme(s.to_string()))
    }
}
