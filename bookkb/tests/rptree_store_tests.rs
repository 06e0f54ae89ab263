//! Tests for the random-projection-tree store.

use std::sync::Arc;

use bookkb::{DistanceFunction, HashEmbedder, RpTreeVectorStore, VectorIndex};

fn open(dir: &std::path::Path, distance: DistanceFunction) -> RpTreeVectorStore {
    RpTreeVectorStore::open(dir, "trees", Arc::new(HashEmbedder::new(32)), distance, 10).unwrap()
}

#[tokio::test]
async fn exact_text_match_ranks_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), DistanceFunction::Cosine);

    let texts: Vec<String> = (0..50).map(|i| format!("filler sentence number {i}")).collect();
    store.add_texts(texts, None, None).await.unwrap();
    store.add_texts(vec!["the needle in the haystack".to_string()], None, None).await.unwrap();

    let results = store.search("the needle in the haystack", 5, None).await.unwrap();

    assert_eq!(results[0].text, "the needle in the haystack");
    // Angular score of identical vectors: d = 0, score = 1.
    assert!((results[0].score - 1.0).abs() < 1e-4);
    assert!(results.iter().all(|r| r.score <= 1.0 + 1e-5));
}

#[tokio::test]
async fn forest_is_rebuilt_on_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = open(dir.path(), DistanceFunction::Cosine);
        let texts: Vec<String> = (0..30).map(|i| format!("chapter {i} of the voyage")).collect();
        store.add_texts(texts, None, None).await.unwrap();
    }

    let reopened = open(dir.path(), DistanceFunction::Cosine);
    assert_eq!(reopened.count().await.unwrap(), 30);

    let results = reopened.search("chapter 7 of the voyage", 3, None).await.unwrap();
    assert_eq!(results[0].text, "chapter 7 of the voyage");
}

#[tokio::test]
async fn search_is_deterministic_for_fixed_contents() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), DistanceFunction::Cosine);

    let texts: Vec<String> = (0..40).map(|i| format!("line {i} of the log")).collect();
    store.add_texts(texts, None, None).await.unwrap();

    let first = store.search("line 12 of the log", 5, None).await.unwrap();
    let second = store.search("line 12 of the log", 5, None).await.unwrap();

    let first_ids: Vec<&str> = first.iter().map(|r| r.id.as_str()).collect();
    let second_ids: Vec<&str> = second.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(first_ids, second_ids);
}

#[tokio::test]
async fn delete_shrinks_the_forest() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), DistanceFunction::Cosine);

    store
        .add_texts(
            vec!["stay".to_string(), "go".to_string()],
            None,
            Some(vec!["s".to_string(), "g".to_string()]),
        )
        .await
        .unwrap();
    let ids = vec!["g".to_string()];
    store.delete(Some(&ids), None).await.unwrap();

    assert_eq!(store.count().await.unwrap(), 1);
    let results = store.search("go", 5, None).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "s");
}

#[tokio::test]
async fn euclidean_scores_decay_with_distance() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), DistanceFunction::L2);

    store
        .add_texts(vec!["alpha".to_string(), "beta".to_string()], None, None)
        .await
        .unwrap();
    let results = store.search("alpha", 2, None).await.unwrap();

    // Identical vector: d = 0, score = 1. Anything else scores below.
    assert_eq!(results[0].text, "alpha");
    assert!((results[0].score - 1.0).abs() < 1e-4);
    assert!(results[1].score < results[0].score);
    assert!(results[1].score > 0.0);
}

#[tokio::test]
async fn empty_store_searches_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), DistanceFunction::Cosine);
    assert!(store.search("nothing yet", 5, None).await.unwrap().is_empty());
    assert_eq!(store.count().await.unwrap(), 0);
}
