//! Hierarchical visual vocabulary and bag-of-words image database.
//!
//! A [`Vocabulary`] is built by recursive k-means over a training corpus of
//! keypoint descriptors. It turns any descriptor set into a sparse, weighted
//! [`BowVector`]. A [`Database`] keeps an inverted file over those vectors
//! and answers top-K similarity queries.
//!
//! Descriptor layouts are abstracted behind [`DescriptorSpace`], so the same
//! vocabulary and database code serves float descriptors (SuperPoint, SIFT)
//! and binary ones (ORB, BRIEF).
use thiserror::Error;

/// Descriptor capability contract and the bundled descriptor spaces.
pub mod desc;
pub use desc::{
    BinarySpace, Brief, DescMatrix, DescriptorSpace, FloatSpace, Orb, Sift128, Superpoint256,
    Surf64,
};

/// Sparse bag-of-words and direct-index vectors.
pub mod bow;
pub use bow::{BowVector, FeatureVector, NodeId, WordId, WordValue};

/// Similarity measures between bag-of-words vectors.
pub mod scoring;
pub use scoring::{BowStats, ScoringType};

/// Implementation of a visual bag-of-words vocabulary,
/// which provides the main functionality of this crate.
pub mod vocab;
pub use vocab::{Seeding, Vocabulary, VocabularyParams, WeightingType};

/// Inverted-file image database built on top of a vocabulary.
pub mod database;
pub use database::{
    Database, DatabaseParams, ExclusionGap, ImageId, Posting, QueryOptions, QueryResult,
    QueryResults,
};

/// Save & load of vocabularies and databases.
pub mod persist;
pub use persist::{ContainerFormat, FORMAT_VERSION};

pub type BowResult<T> = std::result::Result<T, BowErr>;

#[derive(Error, Debug)]
pub enum BowErr {
    #[error("Io Error")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "bincode")]
    #[error("Container Serialization Error")]
    Bincode(#[from] bincode::Error),
    #[error("Container Serialization Error")]
    Json(#[from] serde_json::Error),
    #[error("Descriptor has dimension {found}, expected {expected}")]
    InvalidDimension { expected: usize, found: usize },
    #[error("Unknown or cleared image id {0}")]
    UnknownImageId(ImageId),
    #[error("Word id {0} is not part of the vocabulary")]
    UnknownWord(WordId),
    #[error("Corrupt container: {0}")]
    CorruptContainer(String),
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Invalid descriptor text: {0}")]
    InvalidDescriptorText(String),
}
