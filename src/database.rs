use log::debug;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::HashMap, fmt};

use crate::scoring::normalized;
use crate::*;

/// Id of an image in a database. Assigned sequentially from 0, never reused.
pub type ImageId = u32;

/// Parameters of a database.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DatabaseParams {
    /// Keep the direct index (`FeatureVector`) of every added image.
    pub use_direct_index: bool,
    /// Tree level the direct index groups features by.
    pub direct_index_level: usize,
}

impl DatabaseParams {
    pub fn with_direct_index(level: usize) -> Self {
        Self {
            use_direct_index: true,
            direct_index_level: level,
        }
    }
}

/// One element of a posting list: an image and the weight of the word in it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Posting {
    pub image: ImageId,
    pub weight: WordValue,
}

/// Skip stored images whose id is within `gap` of `image`, e.g. the last few
/// frames of a sequence when looking for a loop closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusionGap {
    pub image: ImageId,
    pub gap: ImageId,
}

/// Query knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryOptions {
    /// Maximum number of results. 0 returns every candidate.
    pub max_results: usize,
    /// Only return images with id <= `max_id`.
    pub max_id: Option<ImageId>,
    pub exclusion: Option<ExclusionGap>,
}

impl QueryOptions {
    pub fn top(max_results: usize) -> Self {
        Self {
            max_results,
            ..Self::default()
        }
    }

    pub fn with_max_id(mut self, max_id: ImageId) -> Self {
        self.max_id = Some(max_id);
        self
    }

    pub fn excluding(mut self, image: ImageId, gap: ImageId) -> Self {
        self.exclusion = Some(ExclusionGap { image, gap });
        self
    }

    fn admits(&self, id: ImageId) -> bool {
        if let Some(max_id) = self.max_id {
            if id > max_id {
                return false;
            }
        }
        match self.exclusion {
            Some(e) => {
                let d = if id > e.image { id - e.image } else { e.image - id };
                d > e.gap
            }
            None => true,
        }
    }
}

/// A single match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryResult {
    pub id: ImageId,
    pub score: f64,
}

/// Ranked matches, best first, plus the size of the searched corpus.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResults {
    pub results: Vec<QueryResult>,
    /// Number of images present in the database at query time.
    pub corpus_size: usize,
}

impl QueryResults {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QueryResult> {
        self.results.iter()
    }

    pub fn ids(&self) -> Vec<ImageId> {
        self.results.iter().map(|r| r.id).collect()
    }

    pub fn best(&self) -> Option<&QueryResult> {
        self.results.first()
    }

    pub fn worst(&self) -> Option<&QueryResult> {
        self.results.last()
    }
}

impl<'a> IntoIterator for &'a QueryResults {
    type Item = &'a QueryResult;
    type IntoIter = std::slice::Iter<'a, QueryResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

impl fmt::Display for QueryResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} results of {} images:", self.len(), self.corpus_size)?;
        for r in self {
            write!(f, " <EntryId: {}, Score: {}>", r.id, r.score)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Entry {
    Present {
        bow: BowVector,
        features: Option<FeatureVector>,
        stats: BowStats,
    },
    /// Logically removed. Keeps its id, has no postings.
    Cleared,
}

/// Image database with an inverted file over the words of a vocabulary.
///
/// `add` needs `&mut self` and `query` only `&self`, so concurrent use is up
/// to the caller (e.g. an `RwLock` around the database).
pub struct Database<S: DescriptorSpace> {
    vocabulary: Vocabulary<S>,
    params: DatabaseParams,
    entries: Vec<Entry>,
    /// Word id -> postings, in insertion order.
    inverted: Vec<Vec<Posting>>,
}

impl<S: DescriptorSpace> Database<S> {
    pub fn new(vocabulary: Vocabulary<S>, params: DatabaseParams) -> BowResult<Self> {
        if params.use_direct_index && params.direct_index_level > vocabulary.depth() {
            return Err(BowErr::InvalidParameter(format!(
                "direct index level {} exceeds depth {}",
                params.direct_index_level,
                vocabulary.depth()
            )));
        }
        let inverted = vec![Vec::new(); vocabulary.word_count()];
        Ok(Self {
            vocabulary,
            params,
            entries: Vec::new(),
            inverted,
        })
    }

    /// Rebuild a database from validated entries. Posting lists are derived.
    pub(crate) fn from_entries(
        vocabulary: Vocabulary<S>,
        params: DatabaseParams,
        entries: Vec<Entry>,
    ) -> Self {
        let mut db = Self {
            inverted: vec![Vec::new(); vocabulary.word_count()],
            vocabulary,
            params,
            entries: Vec::with_capacity(entries.len()),
        };
        for entry in entries {
            db.push_entry(entry);
        }
        db
    }

    /// Transform a descriptor set and store it. Returns the new image id.
    ///
    /// On error nothing is stored.
    pub fn add(&mut self, features: &[S::Desc]) -> BowResult<ImageId> {
        let (bow, fv) = if self.params.use_direct_index {
            let (bow, fv) = self
                .vocabulary
                .transform_with_features(features, self.params.direct_index_level)?;
            (bow, Some(fv))
        } else {
            (self.vocabulary.transform(features)?, None)
        };
        Ok(self.insert(bow, fv))
    }

    /// Store a precomputed BoW vector (and optionally its direct index).
    pub fn add_bow(
        &mut self,
        bow: &BowVector,
        features: Option<FeatureVector>,
    ) -> BowResult<ImageId> {
        self.check_words(bow)?;
        let mut bow = normalized(bow).into_owned();
        bow.retain_nonzero();
        let features = if self.params.use_direct_index {
            features
        } else {
            None
        };
        Ok(self.insert(bow, features))
    }

    /// Logically remove an image. Its id stays taken.
    pub fn clear_entry(&mut self, id: ImageId) -> BowResult<()> {
        let bow = match self.entries.get(id as usize) {
            Some(Entry::Present { bow, .. }) => bow,
            _ => return Err(BowErr::UnknownImageId(id)),
        };
        for w in bow.words() {
            self.inverted[w as usize].retain(|p| p.image != id);
        }
        self.entries[id as usize] = Entry::Cleared;
        debug!("Cleared image {}", id);
        Ok(())
    }

    /// Rank stored images against a descriptor set, returning at most `max_results`.
    pub fn query(&self, features: &[S::Desc], max_results: usize) -> BowResult<QueryResults> {
        self.query_with(features, &QueryOptions::top(max_results))
    }

    pub fn query_with(
        &self,
        features: &[S::Desc],
        options: &QueryOptions,
    ) -> BowResult<QueryResults> {
        let bow = self.vocabulary.transform(features)?;
        self.query_bow(&bow, options)
    }

    /// Rank stored images against a BoW vector.
    ///
    /// Only images sharing at least one word with the query are scored. Results
    /// are sorted by descending score, ties by ascending id.
    pub fn query_bow(&self, bow: &BowVector, options: &QueryOptions) -> BowResult<QueryResults> {
        self.check_words(bow)?;
        if let Some(e) = options.exclusion {
            if !self.is_present(e.image) {
                return Err(BowErr::UnknownImageId(e.image));
            }
        }

        let scoring = self.vocabulary.scoring();
        let query = normalized(bow);
        let query_stats = BowStats::of(&query);

        let mut partial: HashMap<ImageId, f64> = HashMap::new();
        for (w, qv) in query.iter() {
            for p in &self.inverted[w as usize] {
                if options.admits(p.image) {
                    *partial.entry(p.image).or_insert(0.) += scoring.partial(qv, p.weight);
                }
            }
        }

        let mut results: Vec<QueryResult> = partial
            .into_iter()
            .filter_map(|(id, acc)| match &self.entries[id as usize] {
                Entry::Present { stats, .. } => Some(QueryResult {
                    id,
                    score: scoring.finalize(acc, &query_stats, stats),
                }),
                Entry::Cleared => None,
            })
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        if options.max_results > 0 {
            results.truncate(options.max_results);
        }

        Ok(QueryResults {
            results,
            corpus_size: self.present_count(),
        })
    }

    pub fn vocabulary(&self) -> &Vocabulary<S> {
        &self.vocabulary
    }

    pub fn params(&self) -> &DatabaseParams {
        &self.params
    }

    /// Scoring can be swapped freely; stored vectors do not depend on it.
    pub fn set_scoring_scheme(&mut self, scoring: ScoringType) {
        self.vocabulary.set_scoring_scheme(scoring);
    }

    /// Number of ids handed out, cleared ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of images not cleared.
    pub fn present_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, Entry::Present { .. }))
            .count()
    }

    pub fn is_present(&self, id: ImageId) -> bool {
        matches!(self.entries.get(id as usize), Some(Entry::Present { .. }))
    }

    pub fn bow_vector(&self, id: ImageId) -> BowResult<&BowVector> {
        match self.entries.get(id as usize) {
            Some(Entry::Present { bow, .. }) => Ok(bow),
            _ => Err(BowErr::UnknownImageId(id)),
        }
    }

    /// Direct index of an image, if the database keeps them.
    pub fn feature_vector(&self, id: ImageId) -> BowResult<Option<&FeatureVector>> {
        match self.entries.get(id as usize) {
            Some(Entry::Present { features, .. }) => Ok(features.as_ref()),
            _ => Err(BowErr::UnknownImageId(id)),
        }
    }

    /// Posting list of a word. Empty for unknown words.
    pub fn postings(&self, word: WordId) -> &[Posting] {
        self.inverted
            .get(word as usize)
            .map(|p| p.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn entries(&self) -> &[Entry] {
        &self.entries
    }

    fn check_words(&self, bow: &BowVector) -> BowResult<()> {
        match bow.words().find(|&w| w as usize >= self.inverted.len()) {
            Some(w) => Err(BowErr::UnknownWord(w)),
            None => Ok(()),
        }
    }

    fn insert(&mut self, bow: BowVector, features: Option<FeatureVector>) -> ImageId {
        let stats = BowStats::of(&bow);
        let id = self.push_entry(Entry::Present {
            bow,
            features,
            stats,
        });
        debug!("Added image {} with {} words", id, stats.words);
        id
    }

    /// Append an entry under the next id and index its words.
    fn push_entry(&mut self, entry: Entry) -> ImageId {
        let id = self.entries.len() as ImageId;
        if let Entry::Present { bow, .. } = &entry {
            for (w, v) in bow.iter() {
                self.inverted[w as usize].push(Posting {
                    image: id,
                    weight: v,
                });
            }
        }
        self.entries.push(entry);
        id
    }
}

impl<S: DescriptorSpace> fmt::Debug for Database<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("Entries", &self.len())
            .field("Present", &self.present_count())
            .field("Words", &self.inverted.len())
            .field("Direct Index", &self.params.use_direct_index)
            .field("Direct Index Level", &self.params.direct_index_level)
            .field("Vocabulary", &self.vocabulary)
            .finish()
    }
}
