use bitvec::{order::Msb0, view::BitView};
use std::fmt;

use crate::{BowErr, BowResult};

/// Everything the vocabulary and the database need to know about a descriptor type.
///
/// Implementors are zero-sized marker types. Nothing above this trait looks at
/// the descriptor layout itself, so a new descriptor type only has to provide
/// a distance, a mean, a lossless text form and a bulk matrix conversion.
pub trait DescriptorSpace {
    /// Descriptor value handled by this space.
    type Desc: Clone + fmt::Debug + PartialEq;

    /// Identifier written to persisted containers.
    const NAME: &'static str;

    /// Expected length of every descriptor.
    const DIMENSION: usize;

    /// Actual length of a descriptor value.
    fn dimension_of(d: &Self::Desc) -> usize;

    /// Distance between two descriptors. Smaller is closer.
    fn distance(a: &Self::Desc, b: &Self::Desc) -> f64;

    /// Centroid of a non-empty set of descriptors.
    fn mean(descriptors: &[&Self::Desc]) -> Self::Desc;

    /// Lossless text form, inverted by [`DescriptorSpace::from_text`].
    fn to_text(d: &Self::Desc) -> String;

    fn from_text(s: &str) -> BowResult<Self::Desc>;

    /// Row-major `f32` matrix with one row per descriptor.
    fn to_matrix(descriptors: &[Self::Desc]) -> DescMatrix;

    /// Reject a descriptor whose length differs from [`DescriptorSpace::DIMENSION`].
    fn check_dimension(d: &Self::Desc) -> BowResult<()> {
        let found = Self::dimension_of(d);
        if found == Self::DIMENSION {
            Ok(())
        } else {
            Err(BowErr::InvalidDimension {
                expected: Self::DIMENSION,
                found,
            })
        }
    }
}

/// Dense row-major matrix of descriptors, used for batch distance computation.
#[derive(Debug, Clone, PartialEq)]
pub struct DescMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

impl DescMatrix {
    /// Row `i`, `None` past the last row.
    pub fn row(&self, i: usize) -> Option<&[f32]> {
        if i >= self.rows {
            return None;
        }
        self.data.get(i * self.cols..(i + 1) * self.cols)
    }

    /// Squared euclidean distance from `query` to every row.
    pub fn squared_distances(&self, query: &[f32]) -> BowResult<Vec<f32>> {
        if query.len() != self.cols {
            return Err(BowErr::InvalidDimension {
                expected: self.cols,
                found: query.len(),
            });
        }
        Ok((0..self.rows)
            .filter_map(|i| self.row(i))
            .map(|row| {
                row.iter()
                    .zip(query)
                    .fold(0., |a, (x, y)| a + (x - y) * (x - y))
            })
            .collect())
    }
}

/////////////////////             Float descriptors             ////////////////////////
/////////////////////////////////////////////////////////////////////////////////////

/// Fixed-length `f32` descriptors compared by squared euclidean distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FloatSpace<const D: usize>;

/// 256-dimensional SuperPoint descriptors.
pub type Superpoint256 = FloatSpace<256>;
/// 128-dimensional SIFT descriptors.
pub type Sift128 = FloatSpace<128>;
/// 64-dimensional SURF descriptors.
pub type Surf64 = FloatSpace<64>;

impl<const D: usize> DescriptorSpace for FloatSpace<D> {
    type Desc = Vec<f32>;

    const NAME: &'static str = "FLOAT";
    const DIMENSION: usize = D;

    fn dimension_of(d: &Vec<f32>) -> usize {
        d.len()
    }

    #[inline]
    fn distance(a: &Vec<f32>, b: &Vec<f32>) -> f64 {
        a.iter().zip(b).fold(0., |sqd, (x, y)| {
            let d = x - y;
            sqd + (d * d) as f64
        })
    }

    fn mean(descriptors: &[&Vec<f32>]) -> Vec<f32> {
        let mut mean = vec![0.; D];
        if descriptors.is_empty() {
            return mean;
        }
        let s = descriptors.len() as f32;
        for desc in descriptors {
            for (m, x) in mean.iter_mut().zip(desc.iter()) {
                *m += x / s;
            }
        }
        mean
    }

    fn to_text(d: &Vec<f32>) -> String {
        d.iter()
            .map(|x| x.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn from_text(s: &str) -> BowResult<Vec<f32>> {
        let d = s
            .split_whitespace()
            .map(|t| {
                t.parse::<f32>()
                    .map_err(|_| BowErr::InvalidDescriptorText(t.to_string()))
            })
            .collect::<BowResult<Vec<f32>>>()?;
        Self::check_dimension(&d)?;
        Ok(d)
    }

    fn to_matrix(descriptors: &[Vec<f32>]) -> DescMatrix {
        let mut data = Vec::with_capacity(descriptors.len() * D);
        for d in descriptors {
            data.extend_from_slice(d);
        }
        DescMatrix {
            rows: descriptors.len(),
            cols: D,
            data,
        }
    }
}

/////////////////////             Binary descriptors            ////////////////////////
/////////////////////////////////////////////////////////////////////////////////////

/// Fixed-size binary descriptors of `N` bytes compared by Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BinarySpace<const N: usize>;

/// 32-byte ORB descriptors.
pub type Orb = BinarySpace<32>;
/// 32-byte BRIEF descriptors.
pub type Brief = BinarySpace<32>;

impl<const N: usize> DescriptorSpace for BinarySpace<N> {
    type Desc = [u8; N];

    const NAME: &'static str = "BINARY";
    const DIMENSION: usize = N;

    fn dimension_of(_d: &[u8; N]) -> usize {
        N
    }

    #[inline]
    /// Hamming distance between two binary arrays (descriptors).
    fn distance(a: &[u8; N], b: &[u8; N]) -> f64 {
        a.iter()
            .zip(b)
            .fold(0u32, |acc, (x, y)| acc + (*x ^ *y).count_ones()) as f64
    }

    /// Bitwise majority vote over the descriptors.
    fn mean(descriptors: &[&[u8; N]]) -> [u8; N] {
        let n2 = descriptors.len() / 2;
        let mut counts = vec![0usize; N * 8];
        let mut result = [0u8; N];
        for d in descriptors {
            for (i, b) in d[..].view_bits::<Msb0>().iter().enumerate() {
                if *b {
                    counts[i] += 1;
                }
            }
        }
        let result_bits = result[..].view_bits_mut::<Msb0>();
        for (i, &c) in counts.iter().enumerate() {
            if c > n2 {
                result_bits.set(i, true);
            }
        }
        result
    }

    fn to_text(d: &[u8; N]) -> String {
        d.iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn from_text(s: &str) -> BowResult<[u8; N]> {
        let bytes = s
            .split_whitespace()
            .map(|t| {
                t.parse::<u8>()
                    .map_err(|_| BowErr::InvalidDescriptorText(t.to_string()))
            })
            .collect::<BowResult<Vec<u8>>>()?;
        let found = bytes.len();
        <[u8; N]>::try_from(bytes).map_err(|_| BowErr::InvalidDimension { expected: N, found })
    }

    /// One column per bit, holding 0.0 or 1.0.
    fn to_matrix(descriptors: &[[u8; N]]) -> DescMatrix {
        let mut data = Vec::with_capacity(descriptors.len() * N * 8);
        for d in descriptors {
            data.extend(
                d[..]
                    .view_bits::<Msb0>()
                    .iter()
                    .map(|b| if *b { 1. } else { 0. }),
            );
        }
        DescMatrix {
            rows: descriptors.len(),
            cols: N * 8,
            data,
        }
    }
}
