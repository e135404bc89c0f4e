use rand::prelude::*;
use treebow::*;

fn main() {
    // Stand-in for ORB descriptors extracted from 10 training images
    let mut rng = StdRng::seed_from_u64(2021);
    let features: Vec<Vec<[u8; 32]>> = (0..10)
        .map(|_| (0..400).map(|_| rng.gen::<[u8; 32]>()).collect())
        .collect();
    let total: usize = features.iter().map(|f| f.len()).sum();
    println!("Using {} ORB features from {} images.", total, features.len());

    // Create vocabulary from features
    let params = VocabularyParams::new(9, 3).with_scoring(ScoringType::Hamming);
    let voc = Vocabulary::<Orb>::create(params, &features).unwrap();
    println!("\nVocabulary = {:#?}", voc);

    // Save vocab and load it again just for fun
    let dir = std::env::temp_dir();
    let path = dir.join("treebow-orb.voc");
    voc.save(&path).unwrap();
    let loaded_voc = Vocabulary::<Orb>::load(&path).unwrap();

    // Make sure save & load worked
    assert!(voc == loaded_voc);

    // Score every training image against the others
    let bows: Vec<BowVector> = features.iter().map(|f| voc.transform(f).unwrap()).collect();
    for (i, a) in bows.iter().enumerate() {
        let scores: Vec<String> = bows.iter().map(|b| format!("{:.3}", voc.score(a, b))).collect();
        println!("{:>2} | {}", i, scores.join(" "));
    }
}
