use log::{debug, info, warn};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::{fmt, str::FromStr};

use crate::*;

/// How per-word weights are derived from the training corpus and combined at transform time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightingType {
    /// Term frequency times `ln(N / n_i)`.
    TfIdf,
    /// Term frequency only.
    Tf,
    /// `ln(N / n_i)`, counted once per word.
    Idf,
    /// Presence / absence.
    Binary,
}

impl WeightingType {
    pub const ALL: [WeightingType; 4] = [
        WeightingType::TfIdf,
        WeightingType::Tf,
        WeightingType::Idf,
        WeightingType::Binary,
    ];

    /// Canonical identifier, as written to containers.
    pub fn name(&self) -> &'static str {
        match self {
            WeightingType::TfIdf => "TF_IDF",
            WeightingType::Tf => "TF",
            WeightingType::Idf => "IDF",
            WeightingType::Binary => "BINARY",
        }
    }
}

impl Default for WeightingType {
    fn default() -> Self {
        WeightingType::TfIdf
    }
}

impl fmt::Display for WeightingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WeightingType {
    type Err = BowErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WeightingType::ALL
            .iter()
            .find(|t| t.name() == s)
            .copied()
            .ok_or_else(|| BowErr::UnsupportedScheme(s.to_string()))
    }
}

/// Initial centroid selection for each k-means step.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seeding {
    /// Deterministic: the first descriptor, then repeatedly the descriptor
    /// farthest from every centroid chosen so far.
    FarthestPoint,
    /// k-means++ driven by a seeded rng, so builds are reproducible.
    KMeansPlusPlus { seed: u64 },
}

/// Parameters of a vocabulary.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct VocabularyParams {
    /// Branching factor.
    pub k: usize,
    /// Number of levels below the root. Leaves live at this level.
    pub depth: usize,
    pub weighting: WeightingType,
    pub scoring: ScoringType,
    /// Iteration cap of each k-means step.
    pub max_iterations: usize,
    pub seeding: Seeding,
    /// Clusters smaller than this are pruned. 1 prunes only empty clusters.
    pub min_cluster_size: usize,
}

impl Default for VocabularyParams {
    fn default() -> Self {
        Self {
            k: 10,
            depth: 5,
            weighting: WeightingType::TfIdf,
            scoring: ScoringType::L1Norm,
            max_iterations: 100,
            seeding: Seeding::FarthestPoint,
            min_cluster_size: 1,
        }
    }
}

impl VocabularyParams {
    /// Args: (k: Branching factor, depth: Number of levels)
    pub fn new(k: usize, depth: usize) -> Self {
        Self {
            k,
            depth,
            ..Self::default()
        }
    }

    pub fn with_weighting(mut self, weighting: WeightingType) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn with_scoring(mut self, scoring: ScoringType) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_seeding(mut self, seeding: Seeding) -> Self {
        self.seeding = seeding;
        self
    }

    pub fn with_min_cluster_size(mut self, min_cluster_size: usize) -> Self {
        self.min_cluster_size = min_cluster_size;
        self
    }

    pub fn validate(&self) -> BowResult<()> {
        let check = |ok: bool, what: &str| {
            if ok {
                Ok(())
            } else {
                Err(BowErr::InvalidParameter(format!("{} must be at least 1", what)))
            }
        };
        check(self.k >= 1, "k")?;
        check(self.depth >= 1, "depth")?;
        check(self.max_iterations >= 1, "max_iterations")?;
        check(self.min_cluster_size >= 1, "min_cluster_size")
    }
}

/// Node ids from the first level down to a word.
pub type NodePath = SmallVec<[NodeId; 8]>;

#[derive(Debug, Clone, PartialEq)]
/// A node of the vocabulary tree. Relations are ids into the node arena.
pub(crate) struct Node<D> {
    pub(crate) id: NodeId,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    /// Cluster centroid. `None` only for the root.
    pub(crate) descriptor: Option<D>,
    /// Word weight, only meaningful on leaves.
    pub(crate) weight: WordValue,
    pub(crate) word_id: Option<WordId>,
    /// Number of training images with at least one feature reaching this word.
    pub(crate) doc_freq: u32,
    pub(crate) level: usize,
}

impl<D> Node<D> {
    pub(crate) fn root() -> Self {
        Self {
            id: 0,
            parent: None,
            children: Vec::new(),
            descriptor: None,
            weight: 0.,
            word_id: None,
            doc_freq: 0,
            level: 0,
        }
    }
}

#[derive(Clone, PartialEq)]
/// Feature vocabulary built from a collection of image keypoint descriptors. Can be:
/// 1. Created by hierarchical k-means over training images.
/// 2. Saved to a file & loaded from a file.
/// 3. Used to transform a new set of descriptors into a BoW representation (and
///    optionally get a direct index from tree nodes to features).
pub struct Vocabulary<S: DescriptorSpace> {
    pub(crate) params: VocabularyParams,
    pub(crate) nodes: Vec<Node<S::Desc>>,
    /// Word id -> node id.
    pub(crate) words: Vec<NodeId>,
    pub(crate) training_images: usize,
}

/// Vocabulary API
impl<S: DescriptorSpace> Vocabulary<S> {
    /// Build a vocabulary from the descriptors of a set of training images.
    ///
    /// An empty corpus yields a vocabulary with only a root and no words.
    /// Clusters that end up empty (or below `min_cluster_size`) are pruned, so
    /// small corpora give an irregular tree with fewer than `k^depth` words.
    pub fn create(params: VocabularyParams, training: &[Vec<S::Desc>]) -> BowResult<Self> {
        params.validate()?;
        for image in training {
            for d in image {
                S::check_dimension(d)?;
            }
        }

        // Start with root of tree
        let mut v = Self::empty(params);
        v.training_images = training.len();

        let pool: Vec<&S::Desc> = training.iter().flatten().collect();
        if pool.is_empty() {
            warn!("Creating vocabulary from an empty training set");
            return Ok(v);
        }

        // Build with recursive k-means clustering of features
        let mut rng = StdRng::seed_from_u64(match params.seeding {
            Seeding::KMeansPlusPlus { seed } => seed,
            Seeding::FarthestPoint => 0,
        });
        v.cluster(0, &pool, 1, &mut rng);

        v.create_words();
        v.set_doc_freqs(training);
        v.apply_weighting();

        info!(
            "Created vocabulary with {} words, {} nodes from {} features in {} images",
            v.word_count(),
            v.node_count(),
            pool.len(),
            v.training_images
        );
        Ok(v)
    }

    /// Transform a set of descriptors into its bag of words
    /// representation with respect to the Vocabulary. The result is l1 normalized.
    pub fn transform(&self, features: &[S::Desc]) -> BowResult<BowVector> {
        self.transform_generic(features, None).map(|(bow, _)| bow)
    }

    /// Transform a set of descriptors into its bag of words
    /// representation with respect to the Vocabulary. The result is l1 normalized.
    ///
    /// Also provides the direct index: feature `i` is listed under the ancestor
    /// of its word at tree level `level` (0 is the root, `depth` the word itself).
    pub fn transform_with_features(
        &self,
        features: &[S::Desc],
        level: usize,
    ) -> BowResult<(BowVector, FeatureVector)> {
        if level > self.params.depth {
            return Err(BowErr::InvalidParameter(format!(
                "direct index level {} exceeds depth {}",
                level, self.params.depth
            )));
        }
        self.transform_generic(features, Some(level))
    }

    /// Similarity of two BoW vectors under the active scoring scheme.
    pub fn score(&self, a: &BowVector, b: &BowVector) -> f64 {
        self.params.scoring.score(a, b)
    }

    /// Word a single descriptor falls into, `None` if the vocabulary is empty.
    pub fn word_of(&self, feature: &S::Desc) -> BowResult<Option<WordId>> {
        S::check_dimension(feature)?;
        Ok(self
            .descend(feature)
            .last()
            .and_then(|&n| self.nodes[n as usize].word_id))
    }

    /// Nodes visited by a descriptor, from the first level down to its word.
    pub fn word_path(&self, feature: &S::Desc) -> BowResult<NodePath> {
        S::check_dimension(feature)?;
        Ok(self.descend(feature))
    }

    /// Change the weighting scheme. Word weights are recomputed from the stored
    /// corpus statistics; the tree is not rebuilt.
    pub fn set_weighting_scheme(&mut self, weighting: WeightingType) {
        self.params.weighting = weighting;
        self.apply_weighting();
    }

    pub fn set_scoring_scheme(&mut self, scoring: ScoringType) {
        self.params.scoring = scoring;
    }

    pub fn params(&self) -> &VocabularyParams {
        &self.params
    }

    pub fn k(&self) -> usize {
        self.params.k
    }

    pub fn depth(&self) -> usize {
        self.params.depth
    }

    pub fn weighting(&self) -> WeightingType {
        self.params.weighting
    }

    pub fn scoring(&self) -> ScoringType {
        self.params.scoring
    }

    /// Number of visual words (leaves).
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of images the vocabulary was trained on.
    pub fn training_images(&self) -> usize {
        self.training_images
    }

    pub fn word_weight(&self, word: WordId) -> Option<WordValue> {
        self.word_node(word).map(|n| self.nodes[n as usize].weight)
    }

    pub fn word_descriptor(&self, word: WordId) -> Option<&S::Desc> {
        self.word_node(word)
            .and_then(|n| self.nodes[n as usize].descriptor.as_ref())
    }

    pub fn word_node(&self, word: WordId) -> Option<NodeId> {
        self.words.get(word as usize).copied()
    }

    pub fn parent_of(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node as usize).and_then(|n| n.parent)
    }

    pub fn children_of(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node as usize)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn level_of(&self, node: NodeId) -> Option<usize> {
        self.nodes.get(node as usize).map(|n| n.level)
    }
}

/////////////////////                Helpers                 ////////////////////////
/////////////////////////////////////////////////////////////////////////////////////

impl<S: DescriptorSpace> Vocabulary<S> {
    fn empty(params: VocabularyParams) -> Self {
        Self {
            params,
            nodes: vec![Node::root()],
            words: Vec::new(),
            training_images: 0,
        }
    }

    /// Rebuild a vocabulary from nodes whose `id`/`parent` links are already
    /// validated (parents before children). Children, levels and words are derived.
    pub(crate) fn from_nodes(
        params: VocabularyParams,
        mut nodes: Vec<Node<S::Desc>>,
        training_images: usize,
    ) -> Self {
        for i in 1..nodes.len() {
            if let Some(p) = nodes[i].parent {
                let level = nodes[p as usize].level + 1;
                nodes[i].level = level;
                let id = nodes[i].id;
                nodes[p as usize].children.push(id);
            }
        }
        let mut v = Self {
            params,
            nodes,
            words: Vec::new(),
            training_images,
        };
        v.create_words();
        v
    }

    fn transform_generic(
        &self,
        features: &[S::Desc],
        di_level: Option<usize>,
    ) -> BowResult<(BowVector, FeatureVector)> {
        for f in features {
            S::check_dimension(f)?;
        }
        let mut bow = BowVector::new();
        let mut fv = FeatureVector::new();
        if self.words.is_empty() {
            return Ok((bow, fv));
        }

        for (i, feature) in features.iter().enumerate() {
            let path = self.descend(feature);
            let leaf = match path.last() {
                Some(&leaf) => leaf,
                None => continue,
            };
            let node = &self.nodes[leaf as usize];
            let word = match node.word_id {
                Some(w) => w,
                None => continue,
            };

            if let Some(level) = di_level {
                let ancestor = match level {
                    0 => 0,
                    l => path.get(l - 1).copied().unwrap_or(leaf),
                };
                fv.add_feature(ancestor, i);
            }

            match self.params.weighting {
                WeightingType::Tf | WeightingType::TfIdf => bow.add_weight(word, node.weight),
                WeightingType::Idf | WeightingType::Binary => {
                    bow.add_if_not_exist(word, node.weight)
                }
            }
        }

        // Normalize BoW vector
        bow.retain_nonzero();
        bow.normalize();

        Ok((bow, fv))
    }

    /// Walk from the root to a leaf, taking the nearest child at every level.
    fn descend(&self, feature: &S::Desc) -> NodePath {
        let mut path = NodePath::new();
        let mut node = &self.nodes[0];
        while !node.children.is_empty() {
            let mut best: (NodeId, f64) = (node.children[0], f64::INFINITY);
            for &child in &node.children {
                if let Some(centroid) = &self.nodes[child as usize].descriptor {
                    let d = S::distance(feature, centroid);
                    if d < best.1 {
                        best = (child, d);
                    }
                }
            }
            path.push(best.0);
            node = &self.nodes[best.0 as usize];
        }
        path
    }

    fn cluster(&mut self, parent: NodeId, features: &[&S::Desc], level: usize, rng: &mut StdRng) {
        debug!(
            "KMeans step with {} features. parent: {}, level {}",
            features.len(),
            parent,
            level
        );
        if features.is_empty() {
            return;
        }

        let (clusters, groups) = if features.len() <= self.params.k {
            // Only one feature per cluster
            (
                features.iter().map(|&f| f.clone()).collect::<Vec<_>>(),
                (0..features.len()).map(|i| vec![i]).collect::<Vec<_>>(),
            )
        } else {
            // Proceed with kmeans clustering
            self.kmeans(features, rng)
        };

        // Create children, pruning clusters that came out too small
        let mut created: Vec<(NodeId, Vec<usize>)> = Vec::with_capacity(groups.len());
        for (centroid, group) in clusters.into_iter().zip(groups) {
            if group.len() < self.params.min_cluster_size {
                debug!(
                    "Pruning cluster of {} features under node {}",
                    group.len(),
                    parent
                );
                continue;
            }
            let id = self.push_node(parent, centroid, level);
            created.push((id, group));
        }

        // Recurse
        if level < self.params.depth {
            for (id, group) in created {
                let features: Vec<&S::Desc> = group.iter().map(|&i| features[i]).collect();
                self.cluster(id, &features, level + 1, rng);
            }
        }
    }

    /// One k-means step. Returns the centroids and, for each, the indices of its features.
    fn kmeans(&self, features: &[&S::Desc], rng: &mut StdRng) -> (Vec<S::Desc>, Vec<Vec<usize>>) {
        let mut clusters = self.initialize_clusters(features, rng);
        let mut groups: Vec<Vec<usize>> = Vec::new();

        for _ in 0..self.params.max_iterations {
            let mut new_groups: Vec<Vec<usize>> = vec![Vec::new(); clusters.len()];
            for (i, f) in features.iter().enumerate() {
                new_groups[Self::nearest(&clusters, f)].push(i);
            }

            if groups == new_groups {
                break; // converged
            }

            // update clusters; an empty group keeps its centroid and is pruned later
            clusters = new_groups
                .iter()
                .zip(clusters.iter())
                .map(|(group, old)| {
                    if group.is_empty() {
                        old.clone()
                    } else {
                        let desc: Vec<&S::Desc> = group.iter().map(|&i| features[i]).collect();
                        S::mean(&desc)
                    }
                })
                .collect();
            groups = new_groups;
        }
        (clusters, groups)
    }

    /// Initial centroids for kmeans, according to the seeding policy.
    fn initialize_clusters(&self, features: &[&S::Desc], rng: &mut StdRng) -> Vec<S::Desc> {
        let k = self.params.k.min(features.len());
        let first = match self.params.seeding {
            Seeding::FarthestPoint => 0,
            Seeding::KMeansPlusPlus { .. } => rng.gen_range(0..features.len()),
        };
        let mut chosen = vec![first];
        let mut min_dist: Vec<f64> = features
            .iter()
            .map(|f| S::distance(f, features[first]))
            .collect();

        while chosen.len() < k {
            let next = match self.params.seeding {
                Seeding::FarthestPoint => farthest(&min_dist),
                Seeding::KMeansPlusPlus { .. } => weighted_pick(&min_dist, rng).unwrap_or(first),
            };
            chosen.push(next);
            for (m, f) in min_dist.iter_mut().zip(features) {
                *m = m.min(S::distance(f, features[next]));
            }
        }
        chosen.into_iter().map(|i| features[i].clone()).collect()
    }

    #[inline]
    fn nearest(clusters: &[S::Desc], feature: &S::Desc) -> usize {
        let mut best: (usize, f64) = (0, f64::INFINITY);
        for (j, c) in clusters.iter().enumerate() {
            let d = S::distance(c, feature);
            if d < best.1 {
                best = (j, d);
            }
        }
        best.0
    }

    fn push_node(&mut self, parent: NodeId, centroid: S::Desc, level: usize) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node {
            id,
            parent: Some(parent),
            children: Vec::new(),
            descriptor: Some(centroid),
            weight: 0.,
            word_id: None,
            doc_freq: 0,
            level,
        });
        self.nodes[parent as usize].children.push(id);
        id
    }

    /// Number the leaves in node id order.
    fn create_words(&mut self) {
        self.words.clear();
        for node in self.nodes.iter_mut().skip(1) {
            if node.children.is_empty() {
                node.word_id = Some(self.words.len() as WordId);
                self.words.push(node.id);
            } else {
                node.word_id = None;
            }
        }
    }

    /// Count, per word, the training images that reach it.
    fn set_doc_freqs(&mut self, training: &[Vec<S::Desc>]) {
        for image in training {
            let mut leaves: Vec<NodeId> = image
                .iter()
                .filter_map(|f| self.descend(f).last().copied())
                .collect();
            leaves.sort_unstable();
            leaves.dedup();
            for leaf in leaves {
                self.nodes[leaf as usize].doc_freq += 1;
            }
        }
    }

    fn apply_weighting(&mut self) {
        let n = self.training_images as f64;
        let scheme = self.params.weighting;
        for &id in &self.words {
            let node = &mut self.nodes[id as usize];
            node.weight = match scheme {
                WeightingType::TfIdf | WeightingType::Idf => {
                    if node.doc_freq > 0 {
                        (n / node.doc_freq as f64).ln()
                    } else {
                        0.
                    }
                }
                WeightingType::Tf | WeightingType::Binary => 1.,
            };
        }
    }
}

/// Index of the largest value, first one on ties.
fn farthest(min_dist: &[f64]) -> usize {
    min_dist
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &d)| {
            if d > best.1 {
                (i, d)
            } else {
                best
            }
        })
        .0
}

/// Sample an index with probability proportional to its value.
fn weighted_pick(weights: &[f64], rng: &mut StdRng) -> Option<usize> {
    let total: f64 = weights.iter().sum();
    if !(total > 0.) {
        return None;
    }
    let mut r = rng.gen::<f64>() * total;
    for (i, &w) in weights.iter().enumerate() {
        if r < w {
            return Some(i);
        }
        r -= w;
    }
    weights.iter().rposition(|&w| w > 0.)
}

impl<S: DescriptorSpace> fmt::Debug for Vocabulary<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vocabulary")
            .field("Descriptor", &S::NAME)
            .field("Word/Leaf Nodes", &self.word_count())
            .field("Other Nodes", &(self.node_count() - self.word_count()))
            .field("Levels", &self.params.depth)
            .field("Branching Factor", &self.params.k)
            .field("Weighting", &self.params.weighting)
            .field("Scoring", &self.params.scoring)
            .field("Training Images", &self.training_images)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type P2 = FloatSpace<2>;

    /// Three images, each with five points in each of four far-apart blobs.
    fn blobs() -> Vec<Vec<Vec<f32>>> {
        let centers = [(0., 0.), (100., 0.), (0., 100.), (100., 100.)];
        (0..3)
            .map(|img| {
                centers
                    .iter()
                    .flat_map(|&(x, y)| {
                        (0..5).map(move |j| {
                            vec![x + j as f32 * 0.1 + img as f32 * 0.01, y + j as f32 * 0.1]
                        })
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn one_word_per_blob() {
        let params = VocabularyParams::new(4, 1).with_weighting(WeightingType::Tf);
        let voc = Vocabulary::<P2>::create(params, &blobs()).unwrap();
        assert_eq!(voc.word_count(), 4);
        assert_eq!(voc.node_count(), 5);

        let bow = voc.transform(&blobs()[1]).unwrap();
        assert_eq!(bow.len(), 4);
        for (_, w) in bow.iter() {
            assert!((w - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn words_seen_in_every_image_have_zero_idf() {
        let voc = Vocabulary::<P2>::create(VocabularyParams::new(4, 1), &blobs()).unwrap();
        for w in 0..voc.word_count() as WordId {
            assert_eq!(voc.word_weight(w), Some(0.));
        }
        assert!(voc.transform(&blobs()[0]).unwrap().is_empty());
    }

    #[test]
    fn leaves_sit_at_full_depth() {
        let voc = Vocabulary::<P2>::create(VocabularyParams::new(4, 2), &blobs()).unwrap();
        assert!(voc.word_count() > 4 && voc.word_count() <= 16);
        for w in 0..voc.word_count() as WordId {
            let node = voc.word_node(w).unwrap();
            assert_eq!(voc.level_of(node), Some(2));
            assert!(voc.children_of(node).is_empty());
            assert_eq!(voc.level_of(voc.parent_of(node).unwrap()), Some(1));
        }
    }

    #[test]
    fn small_training_set_prunes_leaves() {
        let image: Vec<Vec<f32>> = (0..5).map(|i| vec![i as f32 * 10., 0.]).collect();
        let voc = Vocabulary::<P2>::create(VocabularyParams::new(3, 3), &[image.clone()]).unwrap();
        assert_eq!(voc.word_count(), 5);
        assert!(voc.word_count() < 27);
        for w in 0..voc.word_count() as WordId {
            assert_eq!(voc.level_of(voc.word_node(w).unwrap()), Some(3));
        }
        // every training descriptor finds its own word again
        let mut words: Vec<WordId> = image
            .iter()
            .map(|d| voc.word_of(d).unwrap().unwrap())
            .collect();
        words.sort_unstable();
        words.dedup();
        assert_eq!(words.len(), 5);

        let path = voc.word_path(&image[4]).unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(voc.parent_of(path[2]), Some(path[1]));
        assert_eq!(voc.word_node(voc.word_of(&image[4]).unwrap().unwrap()), Some(path[2]));
    }

    #[test]
    fn identical_descriptors_collapse_to_one_branch() {
        let image = vec![vec![1., 1.]; 10];
        let voc = Vocabulary::<P2>::create(VocabularyParams::new(3, 2), &[image]).unwrap();
        assert_eq!(voc.children_of(0).len(), 1);
        assert_eq!(voc.word_count(), 1);
    }

    #[test]
    fn min_cluster_size_prunes_small_clusters() {
        let mut image = vec![vec![0., 0.]; 6];
        image.push(vec![50., 50.]);
        let params = VocabularyParams::new(2, 1).with_min_cluster_size(2);
        let voc = Vocabulary::<P2>::create(params, &[image]).unwrap();
        assert_eq!(voc.word_count(), 1);
    }

    #[test]
    fn empty_training_set_gives_empty_vocabulary() {
        let voc = Vocabulary::<P2>::create(VocabularyParams::new(3, 2), &[]).unwrap();
        assert_eq!(voc.word_count(), 0);
        assert_eq!(voc.node_count(), 1);
        assert!(voc.transform(&[vec![1., 2.]]).unwrap().is_empty());
        assert_eq!(voc.word_of(&vec![1., 2.]).unwrap(), None);
    }

    #[test]
    fn empty_descriptor_set_gives_empty_bow() {
        let voc = Vocabulary::<P2>::create(VocabularyParams::new(4, 2), &blobs()).unwrap();
        assert!(voc.transform(&[]).unwrap().is_empty());
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let bad = vec![vec![vec![1., 2., 3.]]];
        assert!(matches!(
            Vocabulary::<P2>::create(VocabularyParams::new(2, 1), &bad),
            Err(BowErr::InvalidDimension {
                expected: 2,
                found: 3
            })
        ));
        let voc = Vocabulary::<P2>::create(VocabularyParams::new(4, 1), &blobs()).unwrap();
        assert!(voc.transform(&[vec![0., 0.], vec![1.]]).is_err());
    }

    #[test]
    fn invalid_params_are_rejected() {
        let params = VocabularyParams::new(0, 2);
        assert!(matches!(
            Vocabulary::<P2>::create(params, &blobs()),
            Err(BowErr::InvalidParameter(_))
        ));
    }

    /// Image 0 holds a and b, image 1 holds a only.
    fn two_words() -> (Vec<f32>, Vec<f32>, Vocabulary<P2>) {
        let a = vec![0., 0.];
        let b = vec![10., 10.];
        let training = vec![vec![a.clone(), b.clone()], vec![a.clone()]];
        let voc = Vocabulary::<P2>::create(VocabularyParams::new(2, 1), &training).unwrap();
        (a, b, voc)
    }

    #[test]
    fn tf_idf_weights() {
        let (a, b, voc) = two_words();
        let wa = voc.word_of(&a).unwrap().unwrap();
        let wb = voc.word_of(&b).unwrap().unwrap();
        assert_eq!(voc.word_weight(wa), Some(0.));
        assert_eq!(voc.word_weight(wb), Some(2f64.ln()));

        let bow = voc.transform(&[a.clone(), b.clone()]).unwrap();
        assert_eq!(bow.len(), 1);
        assert!((bow.get(wb).unwrap() - 1.).abs() < 1e-12);
    }

    #[test]
    fn weighting_scheme_applies_retroactively() {
        let (a, b, mut voc) = two_words();
        let nodes = voc.node_count();
        voc.set_weighting_scheme(WeightingType::Tf);
        assert_eq!(voc.node_count(), nodes);

        let bow = voc.transform(&[a.clone(), a.clone(), b.clone()]).unwrap();
        let wa = voc.word_of(&a).unwrap().unwrap();
        assert!((bow.get(wa).unwrap() - 2. / 3.).abs() < 1e-12);

        voc.set_weighting_scheme(WeightingType::Binary);
        let bow = voc.transform(&[a.clone(), a.clone(), b.clone()]).unwrap();
        assert_eq!(bow.get(wa), Some(0.5));

        voc.set_weighting_scheme(WeightingType::TfIdf);
        assert_eq!(voc.transform(&[a, b]).unwrap().len(), 1);
    }

    #[test]
    fn idf_counts_each_word_once() {
        // b in image 0 only, c in images 0 and 1, a in image 2 only
        let a = vec![0., 0.];
        let b = vec![10., 10.];
        let c = vec![-10., 10.];
        let training = vec![vec![b.clone(), c.clone()], vec![c.clone()], vec![a]];
        let params = VocabularyParams::new(3, 1).with_weighting(WeightingType::Idf);
        let mut voc = Vocabulary::<P2>::create(params, &training).unwrap();
        assert_eq!(voc.word_count(), 3);

        let wb = voc.word_of(&b).unwrap().unwrap();
        let wc = voc.word_of(&c).unwrap().unwrap();
        let (idf_b, idf_c) = (3f64.ln(), 1.5f64.ln());
        assert!((voc.word_weight(wb).unwrap() - idf_b).abs() < 1e-12);
        assert!((voc.word_weight(wc).unwrap() - idf_c).abs() < 1e-12);

        let query = [b.clone(), c.clone(), c.clone()];
        let bow = voc.transform(&query).unwrap();
        assert!((bow.get(wb).unwrap() - idf_b / (idf_b + idf_c)).abs() < 1e-12);

        // tf-idf counts c twice
        voc.set_weighting_scheme(WeightingType::TfIdf);
        let bow = voc.transform(&query).unwrap();
        assert!((bow.get(wb).unwrap() - idf_b / (idf_b + 2. * idf_c)).abs() < 1e-12);
    }

    #[test]
    fn iteration_cap_stops_kmeans_early() {
        // Point 11 starts with the far seed and only moves once centroids update.
        let image: Vec<Vec<f32>> = [0., 9., 10., 11., 21.].iter().map(|&x| vec![x, 0.]).collect();
        let training = vec![image];

        let capped = VocabularyParams::new(2, 1).with_max_iterations(1);
        let voc = Vocabulary::<P2>::create(capped, &training).unwrap();
        assert_eq!(voc.word_count(), 2);
        assert!((voc.word_descriptor(0).unwrap()[0] - 19. / 3.).abs() < 1e-5);
        assert!((voc.word_descriptor(1).unwrap()[0] - 16.).abs() < 1e-5);
        for w in 0..voc.word_count() as WordId {
            let node = voc.word_node(w).unwrap();
            assert_eq!(voc.parent_of(node), Some(0));
            assert_eq!(voc.level_of(node), Some(1));
        }

        let voc = Vocabulary::<P2>::create(VocabularyParams::new(2, 1), &training).unwrap();
        assert!((voc.word_descriptor(0).unwrap()[0] - 7.5).abs() < 1e-5);
        assert!((voc.word_descriptor(1).unwrap()[0] - 21.).abs() < 1e-5);

        let params = VocabularyParams::new(2, 1).with_max_iterations(0);
        assert!(matches!(
            Vocabulary::<P2>::create(params, &training),
            Err(BowErr::InvalidParameter(_))
        ));
    }

    #[test]
    fn direct_index_groups_features_by_level() {
        let voc = Vocabulary::<P2>::create(VocabularyParams::new(4, 2), &blobs()).unwrap();
        let features = &blobs()[0];

        let (_, root) = voc.transform_with_features(features, 0).unwrap();
        assert_eq!(root.len(), 1);
        assert_eq!(root.get(0).unwrap().len(), features.len());

        let (_, top) = voc.transform_with_features(features, 1).unwrap();
        assert_eq!(top.len(), 4);
        assert_eq!(top.num_features(), features.len());

        let (_, leaves) = voc.transform_with_features(features, 2).unwrap();
        for (node, _) in leaves.iter() {
            assert!(voc.children_of(node).is_empty());
        }

        assert!(voc.transform_with_features(features, 3).is_err());
    }

    #[test]
    fn kmeans_plus_plus_is_reproducible() {
        let params = VocabularyParams::new(3, 2).with_seeding(Seeding::KMeansPlusPlus { seed: 7 });
        let a = Vocabulary::<P2>::create(params, &blobs()).unwrap();
        let b = Vocabulary::<P2>::create(params, &blobs()).unwrap();
        assert!(a == b);
        assert!(a.word_count() > 0);
    }

    #[test]
    fn binary_descriptors() {
        let mut rng = StdRng::seed_from_u64(3);
        let training: Vec<Vec<[u8; 32]>> = (0..4)
            .map(|_| {
                (0..50)
                    .map(|_| {
                        let mut d = [0u8; 32];
                        rng.fill(&mut d[..]);
                        d
                    })
                    .collect()
            })
            .collect();
        let params = VocabularyParams::new(4, 2).with_weighting(WeightingType::Tf);
        let voc = Vocabulary::<Orb>::create(params, &training).unwrap();
        assert!(voc.word_count() > 4);
        let bow = voc.transform(&training[2]).unwrap();
        assert!(!bow.is_empty());
        assert!(bow.is_normalized());
        assert!((voc.score(&bow, &bow) - 1.).abs() < 1e-9);
    }

    #[test]
    fn scheme_names_parse() {
        for w in WeightingType::ALL.iter() {
            assert_eq!(w.to_string().parse::<WeightingType>().unwrap(), *w);
        }
        assert!("TFIDF".parse::<WeightingType>().is_err());
    }
}
