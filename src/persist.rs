//! Persisted containers.
//!
//! A container is one serde document with a `format` tag and a `version`.
//! The same document is written either as JSON (paths ending in `.json`) or
//! with bincode (any other path). Descriptors are stored in their
//! [`DescriptorSpace`] text form. A database document embeds its vocabulary
//! and its entries; posting lists are rebuilt from the entries on load.
//!
//! Loading validates the whole document before building anything, so a
//! malformed file yields [`BowErr::CorruptContainer`] and no half-built value.
use log::info;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs,
    io::{BufWriter, Write},
    path::Path,
};

use crate::database::Entry;
use crate::vocab::Node;
use crate::*;

/// Current container version. Newer versions are rejected.
pub const FORMAT_VERSION: u32 = 1;

const VOCABULARY_FORMAT: &str = "treebow.vocabulary";
const DATABASE_FORMAT: &str = "treebow.database";

/// Encoding of a container on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    /// bincode.
    Binary,
    /// Self-describing JSON.
    Json,
}

impl ContainerFormat {
    /// `.json` files are JSON, everything else is binary.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ContainerFormat::Json,
            _ => ContainerFormat::Binary,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct VocabularyDoc {
    format: String,
    version: u32,
    descriptor: String,
    dimension: usize,
    k: usize,
    depth: usize,
    weighting: String,
    scoring: String,
    max_iterations: usize,
    seeding: Seeding,
    min_cluster_size: usize,
    training_images: usize,
    /// Parents always precede their children.
    nodes: Vec<NodeDoc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct NodeDoc {
    id: NodeId,
    parent: Option<NodeId>,
    weight: WordValue,
    doc_freq: u32,
    /// Empty for the root.
    descriptor: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct DatabaseDoc {
    format: String,
    version: u32,
    vocabulary: VocabularyDoc,
    use_direct_index: bool,
    direct_index_level: usize,
    entries: Vec<EntryDoc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct EntryDoc {
    id: ImageId,
    cleared: bool,
    words: Vec<(WordId, WordValue)>,
    features: Option<Vec<(NodeId, Vec<usize>)>>,
}

fn corrupt<M: Into<String>>(msg: M) -> BowErr {
    BowErr::CorruptContainer(msg.into())
}

fn check_header(format: &str, version: u32, expected: &str) -> BowResult<()> {
    if format != expected {
        return Err(corrupt(format!("expected a {} container, found {:?}", expected, format)));
    }
    if version == 0 || version > FORMAT_VERSION {
        return Err(corrupt(format!("unsupported container version {}", version)));
    }
    Ok(())
}

fn write_doc<T: Serialize>(path: &Path, format: ContainerFormat, doc: &T) -> BowResult<()> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    match format {
        ContainerFormat::Json => serde_json::to_writer(&mut writer, doc)?,
        #[cfg(feature = "bincode")]
        ContainerFormat::Binary => bincode::serialize_into(&mut writer, doc)?,
        #[cfg(not(feature = "bincode"))]
        ContainerFormat::Binary => {
            return Err(BowErr::InvalidParameter(
                "binary containers require the `bincode` feature".to_string(),
            ))
        }
    }
    writer.flush()?;
    Ok(())
}

fn read_doc<T: DeserializeOwned>(path: &Path, format: ContainerFormat) -> BowResult<T> {
    let buffer = fs::read(path)?;
    match format {
        ContainerFormat::Json => {
            serde_json::from_slice(&buffer).map_err(|e| corrupt(e.to_string()))
        }
        #[cfg(feature = "bincode")]
        ContainerFormat::Binary => {
            bincode::deserialize(&buffer).map_err(|e| corrupt(e.to_string()))
        }
        #[cfg(not(feature = "bincode"))]
        ContainerFormat::Binary => Err(BowErr::InvalidParameter(
            "binary containers require the `bincode` feature".to_string(),
        )),
    }
}

/////////////////////               Vocabulary               ////////////////////////
/////////////////////////////////////////////////////////////////////////////////////

impl<S: DescriptorSpace> Vocabulary<S> {
    /// Save vocabulary to a file, encoding chosen from the extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> BowResult<()> {
        self.save_as(&path, ContainerFormat::from_path(&path))
    }

    pub fn save_as<P: AsRef<Path>>(&self, path: P, format: ContainerFormat) -> BowResult<()> {
        write_doc(path.as_ref(), format, &self.to_doc())?;
        info!(
            "Saved vocabulary ({} words) to {:?}",
            self.word_count(),
            path.as_ref()
        );
        Ok(())
    }

    /// Load a vocabulary from a file, encoding chosen from the extension.
    pub fn load<P: AsRef<Path>>(path: P) -> BowResult<Self> {
        Self::load_as(&path, ContainerFormat::from_path(&path))
    }

    pub fn load_as<P: AsRef<Path>>(path: P, format: ContainerFormat) -> BowResult<Self> {
        let doc: VocabularyDoc = read_doc(path.as_ref(), format)?;
        let v = Self::from_doc(doc)?;
        info!(
            "Loaded vocabulary ({} words) from {:?}",
            v.word_count(),
            path.as_ref()
        );
        Ok(v)
    }

    fn to_doc(&self) -> VocabularyDoc {
        let p = &self.params;
        VocabularyDoc {
            format: VOCABULARY_FORMAT.to_string(),
            version: FORMAT_VERSION,
            descriptor: S::NAME.to_string(),
            dimension: S::DIMENSION,
            k: p.k,
            depth: p.depth,
            weighting: p.weighting.name().to_string(),
            scoring: p.scoring.name().to_string(),
            max_iterations: p.max_iterations,
            seeding: p.seeding,
            min_cluster_size: p.min_cluster_size,
            training_images: self.training_images,
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeDoc {
                    id: n.id,
                    parent: n.parent,
                    weight: n.weight,
                    doc_freq: n.doc_freq,
                    descriptor: n.descriptor.as_ref().map(S::to_text).unwrap_or_default(),
                })
                .collect(),
        }
    }

    fn from_doc(doc: VocabularyDoc) -> BowResult<Self> {
        check_header(&doc.format, doc.version, VOCABULARY_FORMAT)?;
        if doc.descriptor != S::NAME || doc.dimension != S::DIMENSION {
            return Err(corrupt(format!(
                "container holds {} descriptors of dimension {}, expected {} of dimension {}",
                doc.descriptor,
                doc.dimension,
                S::NAME,
                S::DIMENSION
            )));
        }
        let params = VocabularyParams {
            k: doc.k,
            depth: doc.depth,
            weighting: doc.weighting.parse()?,
            scoring: doc.scoring.parse()?,
            max_iterations: doc.max_iterations,
            seeding: doc.seeding,
            min_cluster_size: doc.min_cluster_size,
        };
        params.validate().map_err(|e| corrupt(e.to_string()))?;
        if doc.nodes.is_empty() {
            return Err(corrupt("vocabulary has no root node"));
        }

        let mut nodes: Vec<Node<S::Desc>> = Vec::with_capacity(doc.nodes.len());
        let mut levels: Vec<usize> = Vec::with_capacity(doc.nodes.len());
        let mut child_counts: Vec<usize> = vec![0; doc.nodes.len()];
        for (i, n) in doc.nodes.into_iter().enumerate() {
            if n.id as usize != i {
                return Err(corrupt(format!("node {} found at position {}", n.id, i)));
            }
            if !n.weight.is_finite() {
                return Err(corrupt(format!("node {} has weight {}", i, n.weight)));
            }
            let (parent, descriptor, level) = match (i, n.parent) {
                (0, None) => (None, None, 0),
                (0, Some(_)) => return Err(corrupt("root node has a parent")),
                (_, None) => return Err(corrupt(format!("node {} has no parent", i))),
                (_, Some(p)) => {
                    if p as usize >= i {
                        return Err(corrupt(format!("node {} listed before its parent {}", i, p)));
                    }
                    let level = levels[p as usize] + 1;
                    child_counts[p as usize] += 1;
                    if level > params.depth || child_counts[p as usize] > params.k {
                        return Err(corrupt(format!(
                            "node {} does not fit a {}^{} tree",
                            i, params.k, params.depth
                        )));
                    }
                    let d = S::from_text(&n.descriptor)
                        .map_err(|e| corrupt(format!("node {}: {}", i, e)))?;
                    (Some(p), Some(d), level)
                }
            };
            levels.push(level);
            nodes.push(Node {
                id: n.id,
                parent,
                children: Vec::new(),
                descriptor,
                weight: n.weight,
                word_id: None,
                doc_freq: n.doc_freq,
                level,
            });
        }

        Ok(Self::from_nodes(params, nodes, doc.training_images))
    }
}

/////////////////////                Database                ////////////////////////
/////////////////////////////////////////////////////////////////////////////////////

impl<S: DescriptorSpace> Database<S> {
    /// Save database (vocabulary included) to a file, encoding chosen from the extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> BowResult<()> {
        self.save_as(&path, ContainerFormat::from_path(&path))
    }

    pub fn save_as<P: AsRef<Path>>(&self, path: P, format: ContainerFormat) -> BowResult<()> {
        write_doc(path.as_ref(), format, &self.to_doc())?;
        info!("Saved database ({} images) to {:?}", self.len(), path.as_ref());
        Ok(())
    }

    /// Load a database from a file, encoding chosen from the extension.
    pub fn load<P: AsRef<Path>>(path: P) -> BowResult<Self> {
        Self::load_as(&path, ContainerFormat::from_path(&path))
    }

    pub fn load_as<P: AsRef<Path>>(path: P, format: ContainerFormat) -> BowResult<Self> {
        let doc: DatabaseDoc = read_doc(path.as_ref(), format)?;
        let db = Self::from_doc(doc)?;
        info!("Loaded database ({} images) from {:?}", db.len(), path.as_ref());
        Ok(db)
    }

    fn to_doc(&self) -> DatabaseDoc {
        let entries = self
            .entries()
            .iter()
            .enumerate()
            .map(|(i, e)| match e {
                Entry::Present { bow, features, .. } => EntryDoc {
                    id: i as ImageId,
                    cleared: false,
                    words: bow.iter().collect(),
                    features: features
                        .as_ref()
                        .map(|fv| fv.iter().map(|(n, f)| (n, f.to_vec())).collect()),
                },
                Entry::Cleared => EntryDoc {
                    id: i as ImageId,
                    cleared: true,
                    words: Vec::new(),
                    features: None,
                },
            })
            .collect();
        DatabaseDoc {
            format: DATABASE_FORMAT.to_string(),
            version: FORMAT_VERSION,
            vocabulary: self.vocabulary().to_doc(),
            use_direct_index: self.params().use_direct_index,
            direct_index_level: self.params().direct_index_level,
            entries,
        }
    }

    fn from_doc(doc: DatabaseDoc) -> BowResult<Self> {
        check_header(&doc.format, doc.version, DATABASE_FORMAT)?;
        let vocabulary = Vocabulary::<S>::from_doc(doc.vocabulary)?;
        let params = DatabaseParams {
            use_direct_index: doc.use_direct_index,
            direct_index_level: doc.direct_index_level,
        };
        if params.use_direct_index && params.direct_index_level > vocabulary.depth() {
            return Err(corrupt(format!(
                "direct index level {} exceeds depth {}",
                params.direct_index_level,
                vocabulary.depth()
            )));
        }

        let mut entries = Vec::with_capacity(doc.entries.len());
        for (i, e) in doc.entries.into_iter().enumerate() {
            if e.id as usize != i {
                return Err(corrupt(format!("entry {} found at position {}", e.id, i)));
            }
            if e.cleared {
                if !e.words.is_empty() || e.features.is_some() {
                    return Err(corrupt(format!("cleared entry {} has data", i)));
                }
                entries.push(Entry::Cleared);
                continue;
            }

            let mut last: Option<WordId> = None;
            for &(w, v) in &e.words {
                if w as usize >= vocabulary.word_count() {
                    return Err(corrupt(format!("entry {} uses unknown word {}", i, w)));
                }
                if last.map_or(false, |l| w <= l) {
                    return Err(corrupt(format!("entry {} has unsorted or repeated words", i)));
                }
                if !v.is_finite() || v == 0. {
                    return Err(corrupt(format!("entry {} has weight {} for word {}", i, v, w)));
                }
                last = Some(w);
            }
            let bow: BowVector = e.words.into_iter().collect();

            let features = match e.features {
                Some(f) => {
                    let node_count = vocabulary.node_count();
                    if let Some(&(n, _)) = f.iter().find(|(n, _)| *n as usize >= node_count) {
                        return Err(corrupt(format!("entry {} indexes unknown node {}", i, n)));
                    }
                    Some(f.into_iter().collect::<FeatureVector>())
                }
                None => None,
            };

            let stats = BowStats::of(&bow);
            entries.push(Entry::Present {
                bow,
                features,
                stats,
            });
        }

        Ok(Database::from_entries(vocabulary, params, entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    type P2 = FloatSpace<2>;

    fn training() -> Vec<Vec<Vec<f32>>> {
        (0..4)
            .map(|i| {
                (0..12)
                    .map(|j| {
                        let t = (i * 12 + j) as f32;
                        vec![(t * 0.37).sin() * 50., (t * 0.11).cos() * 50. + i as f32]
                    })
                    .collect()
            })
            .collect()
    }

    fn vocabulary() -> Vocabulary<P2> {
        let params = VocabularyParams::new(3, 2).with_scoring(ScoringType::L2Norm);
        Vocabulary::create(params, &training()).unwrap()
    }

    fn database() -> Database<P2> {
        let mut db = Database::new(vocabulary(), DatabaseParams::with_direct_index(1)).unwrap();
        for img in training() {
            db.add(&img).unwrap();
        }
        db.clear_entry(2).unwrap();
        db
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(ContainerFormat::from_path("a/voc.json"), ContainerFormat::Json);
        assert_eq!(ContainerFormat::from_path("voc.JSON"), ContainerFormat::Json);
        assert_eq!(ContainerFormat::from_path("voc.bin"), ContainerFormat::Binary);
        assert_eq!(ContainerFormat::from_path("voc"), ContainerFormat::Binary);
    }

    #[test]
    fn vocabulary_round_trip_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("voc.json");
        let voc = vocabulary();
        voc.save(&path).unwrap();
        let loaded = Vocabulary::<P2>::load(&path).unwrap();
        assert!(voc == loaded);
        for img in training() {
            assert_eq!(voc.transform(&img).unwrap(), loaded.transform(&img).unwrap());
        }
    }

    #[cfg(feature = "bincode")]
    #[test]
    fn vocabulary_round_trip_binary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.voc");
        let voc = vocabulary();
        voc.save(&path).unwrap();
        let loaded = Vocabulary::<P2>::load(&path).unwrap();
        assert!(voc == loaded);
    }

    #[test]
    fn empty_vocabulary_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.json");
        let voc = Vocabulary::<P2>::create(VocabularyParams::new(3, 2), &[]).unwrap();
        voc.save(&path).unwrap();
        let loaded = Vocabulary::<P2>::load(&path).unwrap();
        assert_eq!(loaded.word_count(), 0);
        assert!(voc == loaded);
    }

    #[test]
    fn database_round_trip_rebuilds_postings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");
        let db = database();
        db.save(&path).unwrap();
        let loaded = Database::<P2>::load(&path).unwrap();

        assert_eq!(loaded.len(), db.len());
        assert!(!loaded.is_present(2));
        assert_eq!(loaded.entries(), db.entries());
        for w in 0..db.vocabulary().word_count() as WordId {
            assert_eq!(loaded.postings(w), db.postings(w));
        }
        for img in training() {
            assert_eq!(loaded.query(&img, 0).unwrap(), db.query(&img, 0).unwrap());
        }
        assert_eq!(loaded.feature_vector(0).unwrap(), db.feature_vector(0).unwrap());
    }

    #[cfg(feature = "bincode")]
    #[test]
    fn database_round_trip_binary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = database();
        db.save(&path).unwrap();
        let loaded = Database::<P2>::load(&path).unwrap();
        assert_eq!(loaded.entries(), db.entries());
        assert_eq!(
            loaded.query(&training()[1], 3).unwrap(),
            db.query(&training()[1], 3).unwrap()
        );
    }

    #[test]
    fn truncated_json_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("voc.json");
        vocabulary().save(&path).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(
            Vocabulary::<P2>::load(&path),
            Err(BowErr::CorruptContainer(_))
        ));
    }

    #[cfg(feature = "bincode")]
    #[test]
    fn truncated_binary_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        database().save(&path).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 9]).unwrap();
        assert!(matches!(
            Database::<P2>::load(&path),
            Err(BowErr::CorruptContainer(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Vocabulary::<P2>::load(dir.path().join("nope.json")),
            Err(BowErr::Io(_))
        ));
    }

    #[test]
    fn other_descriptor_space_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("voc.json");
        vocabulary().save(&path).unwrap();
        assert!(matches!(
            Vocabulary::<FloatSpace<3>>::load(&path),
            Err(BowErr::CorruptContainer(_))
        ));
        assert!(matches!(
            Vocabulary::<BinarySpace<2>>::load(&path),
            Err(BowErr::CorruptContainer(_))
        ));
    }

    /// Save, let `edit` tamper with the JSON document, then load.
    fn load_edited<F: FnOnce(&mut serde_json::Value)>(edit: F) -> BowResult<Vocabulary<P2>> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("voc.json");
        vocabulary().save(&path).unwrap();
        let mut doc: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        edit(&mut doc);
        fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();
        Vocabulary::<P2>::load(&path)
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let res = load_edited(|doc| doc["weighting"] = "TF_IDF_PLUS".into());
        assert!(matches!(res, Err(BowErr::UnsupportedScheme(_))));
        let res = load_edited(|doc| doc["scoring"] = "KL".into());
        assert!(matches!(res, Err(BowErr::UnsupportedScheme(_))));
    }

    #[test]
    fn newer_version_is_rejected() {
        let res = load_edited(|doc| doc["version"] = (FORMAT_VERSION + 1).into());
        assert!(matches!(res, Err(BowErr::CorruptContainer(_))));
        let res = load_edited(|doc| doc["format"] = "treebow.database".into());
        assert!(matches!(res, Err(BowErr::CorruptContainer(_))));
    }

    #[test]
    fn broken_tree_is_rejected() {
        let res = load_edited(|doc| doc["nodes"][1]["parent"] = 5.into());
        assert!(matches!(res, Err(BowErr::CorruptContainer(_))));
        let res = load_edited(|doc| doc["nodes"][2]["descriptor"] = "1.0".into());
        assert!(matches!(res, Err(BowErr::CorruptContainer(_))));
        let res = load_edited(|doc| doc["nodes"][0]["parent"] = 0.into());
        assert!(matches!(res, Err(BowErr::CorruptContainer(_))));
    }
}
