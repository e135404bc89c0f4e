use rand::prelude::*;
use treebow::*;

fn main() {
    // Four synthetic images of 500 SuperPoint-like descriptors each
    let mut rng = StdRng::seed_from_u64(256);
    let images: Vec<Vec<Vec<f32>>> = (0..4)
        .map(|_| {
            (0..500)
                .map(|_| (0..256).map(|_| rng.gen::<f32>()).collect())
                .collect()
        })
        .collect();

    let params = VocabularyParams::new(10, 3).with_scoring(ScoringType::L2Norm);
    let voc = Vocabulary::<Superpoint256>::create(params, &images).unwrap();
    println!("Vocabulary: {:#?}", voc);

    // Match every image to every other image
    let bows: Vec<BowVector> = images.iter().map(|img| voc.transform(img).unwrap()).collect();
    println!("\nScore matrix ({}):", voc.scoring());
    for a in bows.iter() {
        let row: Vec<String> = bows.iter().map(|b| format!("{:.4}", voc.score(a, b))).collect();
        println!("{}", row.join("  "));
    }

    // Same thing through the inverted file
    let mut db = Database::new(voc, DatabaseParams::with_direct_index(2)).unwrap();
    for img in images.iter() {
        db.add(img).unwrap();
    }
    let results = db.query(&images[0], 4).unwrap();
    println!("\nQuery with image 0: {}", results);
    assert_eq!(results.best().map(|r| r.id), Some(0));

    let path = std::env::temp_dir().join("treebow-superpoint.json");
    db.save(&path).unwrap();
    let loaded = Database::<Superpoint256>::load(&path).unwrap();
    assert_eq!(loaded.query(&images[0], 4).unwrap(), results);
    println!("Database round trip through {:?} OK", path);
}
