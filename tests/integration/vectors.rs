use crate::common::*;
use mosaicdb::VectorConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
        .collect()
}

fn exact_top_k(vectors: &[Vec<f32>], query: &[f32], k: usize) -> Vec<String> {
    let mut scored: Vec<(f32, usize)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (v.iter().zip(query).map(|(a, b)| (a - b) * (a - b)).sum(), i))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.iter().take(k).map(|(_, i)| format!("v{}", i)).collect()
}

#[test]
fn recall_through_database() {
    let t = TestDb::new();
    t.db.create_vector_index_with("emb", VectorConfig::new(16, Metric::L2).with_ef_search(96))
        .unwrap();
    let vectors = random_vectors(300, 16, 7);
    // Batches of 50 per transaction
    for (chunk_no, chunk) in vectors.chunks(50).enumerate() {
        t.db.transaction(|txn| {
            for (i, v) in chunk.iter().enumerate() {
                txn.add_vector("emb", &doc(&format!("v{}", chunk_no * 50 + i), v))?;
            }
            Ok(())
        })
        .unwrap();
    }

    let queries = random_vectors(20, 16, 99);
    let k = 10;
    let mut found = 0;
    for q in &queries {
        let expected = exact_top_k(&vectors, q, k);
        let got: Vec<String> = t.db.search_knn("emb", q, k).unwrap().into_iter().map(|(pk, _)| pk).collect();
        assert_eq!(got.len(), k);
        found += got.iter().filter(|pk| expected.contains(pk)).count();
    }
    let recall = found as f64 / (queries.len() * k) as f64;
    assert!(recall >= 0.9, "recall {}", recall);
}

#[test]
fn deletions_are_tombstoned_and_survive_save() {
    let t = TestDb::new();
    let index = t.db.create_vector_index("emb", 4, Metric::L2).unwrap();
    let vectors = random_vectors(40, 4, 3);
    for (i, v) in vectors.iter().enumerate() {
        t.db.put("emb", &doc(&format!("v{}", i), v)).unwrap();
    }
    for i in (0..40).step_by(4) {
        t.db.delete("emb", &format!("v{}", i)).unwrap();
    }
    let stats = index.stats();
    assert_eq!(stats.live, 30);
    assert_eq!(stats.tombstones, 10);

    let query = vectors[0].clone();
    let before = t.db.search_knn("emb", &query, 5).unwrap();
    assert!(before.iter().all(|(pk, _)| pk != "v0"));

    t.db.close().unwrap();
    let t = t.reopen();
    assert_eq!(t.db.search_knn("emb", &query, 5).unwrap(), before);
    assert_eq!(t.db.vector_stats()[0].live, 30);
}

#[test]
fn cosine_ignores_magnitude() {
    let t = TestDb::new();
    t.db.create_vector_index("emb", 3, Metric::Cosine).unwrap();
    t.db.put("emb", &doc("x", &[10.0, 0.0, 0.0])).unwrap();
    t.db.put("emb", &doc("y", &[0.0, 0.1, 0.0])).unwrap();
    t.db.put("emb", &doc("xy", &[1.0, 1.0, 0.0])).unwrap();

    let hits = t.db.search_knn("emb", &[0.5, 0.0, 0.0], 3).unwrap();
    assert_eq!(hits[0].0, "x");
    assert!(hits[0].1.abs() < 1e-5);
    assert_eq!(hits[1].0, "xy");
    assert_eq!(hits[2].0, "y");
}

#[test]
fn rebuild_recovers_from_lost_file() {
    let t = TestDb::new();
    t.db.create_vector_index("emb", 2, Metric::L2).unwrap();
    t.db.put("emb", &doc("a", &[0.0, 0.0])).unwrap();
    t.db.put("emb", &doc("b", &[3.0, 4.0])).unwrap();
    t.db.close().unwrap();
    let path = t.path();
    let t = t.reopen();
    std::fs::remove_file(path.join("vectors").join("emb.mvx")).unwrap();

    // The in-memory index is unaffected; an explicit rebuild also works
    assert_eq!(t.db.rebuild_vector_index("emb").unwrap(), 2);
    assert_eq!(t.db.search_knn("emb", &[3.0, 4.0], 1).unwrap()[0].0, "b");
    t.db.save_vector_indexes().unwrap();
    assert!(path.join("vectors").join("emb.mvx").exists());
}
