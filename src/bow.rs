use serde::{Deserialize, Serialize};
use std::collections::{btree_map, BTreeMap};
use std::fmt;

/// Id of a visual word (leaf of the vocabulary tree).
pub type WordId = u32;

/// Id of any node in the vocabulary tree. The root is always 0.
pub type NodeId = u32;

/// Weight of a word inside a bag-of-words vector.
pub type WordValue = f64;

/// Bag-of-Words representation of an image or descriptor set.
///
/// Key: word/leaf id in the vocabulary.
///
/// Value: total weight of that word in provided features.
///
/// Only nonzero entries are meaningful; vectors produced by a vocabulary never
/// store zeros. Iteration is in ascending word id.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BowVector(BTreeMap<WordId, WordValue>);

impl BowVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, word: WordId) -> Option<WordValue> {
        self.0.get(&word).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (WordId, WordValue)> + '_ {
        self.0.iter().map(|(&w, &v)| (w, v))
    }

    pub fn words(&self) -> impl Iterator<Item = WordId> + '_ {
        self.0.keys().copied()
    }

    /// Add `v` to the weight of `word`, inserting it if missing.
    pub fn add_weight(&mut self, word: WordId, v: WordValue) {
        *self.0.entry(word).or_insert(0.) += v;
    }

    /// Insert `word` with weight `v` only if it is not present yet.
    pub fn add_if_not_exist(&mut self, word: WordId, v: WordValue) {
        self.0.entry(word).or_insert(v);
    }

    /// Element-wise vector addition.
    pub fn add(&mut self, other: &BowVector) {
        for (w, v) in other.iter() {
            self.add_weight(w, v);
        }
        self.retain_nonzero();
    }

    /// Multiply every weight by `factor`.
    pub fn scale(&mut self, factor: WordValue) {
        for v in self.0.values_mut() {
            *v *= factor;
        }
        self.retain_nonzero();
    }

    pub fn retain_nonzero(&mut self) {
        self.0.retain(|_, v| *v != 0.);
    }

    pub fn l1_norm(&self) -> WordValue {
        self.0.values().fold(0., |a, v| a + v.abs())
    }

    pub fn l2_norm(&self) -> WordValue {
        self.0.values().fold(0., |a, v| a + v * v).sqrt()
    }

    /// L1 normalize in place. An all-zero vector is left untouched.
    pub fn normalize(&mut self) {
        let sum = self.l1_norm();
        if sum > 0. {
            let inv_sum = 1. / sum;
            for v in self.0.values_mut() {
                *v *= inv_sum;
            }
        }
    }

    /// Whether the weights already sum to one (within float tolerance).
    pub fn is_normalized(&self) -> bool {
        (self.l1_norm() - 1.).abs() <= 1e-9
    }
}

impl FromIterator<(WordId, WordValue)> for BowVector {
    fn from_iter<I: IntoIterator<Item = (WordId, WordValue)>>(iter: I) -> Self {
        let mut v = BowVector::new();
        for (w, x) in iter {
            v.add_weight(w, x);
        }
        v.retain_nonzero();
        v
    }
}

impl<'a> IntoIterator for &'a BowVector {
    type Item = (&'a WordId, &'a WordValue);
    type IntoIter = btree_map::Iter<'a, WordId, WordValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for BowVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self.iter().map(|(w, v)| format!("<{}, {}>", w, v)).collect();
        write!(f, "{}", entries.join(", "))
    }
}

/// Direct index: tree node -> indices of the features that passed through it.
///
/// The node is the ancestor of each feature's word at a fixed level of the
/// tree. Feature indices are kept in insertion order.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FeatureVector(BTreeMap<NodeId, Vec<usize>>);

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_feature(&mut self, node: NodeId, feature: usize) {
        self.0.entry(node).or_insert_with(Vec::new).push(feature);
    }

    pub fn get(&self, node: NodeId) -> Option<&[usize]> {
        self.0.get(&node).map(|f| f.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &[usize])> + '_ {
        self.0.iter().map(|(&n, f)| (n, f.as_slice()))
    }

    /// Number of distinct nodes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of features indexed.
    pub fn num_features(&self) -> usize {
        self.0.values().map(|f| f.len()).sum()
    }
}

impl FromIterator<(NodeId, Vec<usize>)> for FeatureVector {
    fn from_iter<I: IntoIterator<Item = (NodeId, Vec<usize>)>>(iter: I) -> Self {
        let mut fv = FeatureVector::new();
        for (n, features) in iter {
            fv.0.entry(n).or_insert_with(Vec::new).extend(features);
        }
        fv
    }
}
