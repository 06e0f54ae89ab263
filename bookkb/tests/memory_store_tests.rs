//! Tests for the in-memory vector store, including a search-ordering
//! property over arbitrary embeddings.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bookkb::{
    DistanceFunction, EmbeddingProvider, HashEmbedder, Metadata, MemoryVectorStore, VectorIndex,
};
use proptest::prelude::*;
use serde_json::json;

/// A provider returning preset vectors keyed by text, so tests control
/// geometry exactly.
struct MapEmbedder {
    dimensions: usize,
    vectors: HashMap<String, Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for MapEmbedder {
    fn name(&self) -> &str {
        "map"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> bookkb::Result<Vec<f32>> {
        Ok(self.vectors.get(text).cloned().unwrap_or_else(|| vec![0.0; self.dimensions]))
    }
}

fn hash_store() -> MemoryVectorStore {
    MemoryVectorStore::new(Arc::new(HashEmbedder::new(64)), DistanceFunction::Cosine)
}

fn meta(key: &str, value: &str) -> Metadata {
    let mut m = Metadata::new();
    m.insert(key.to_string(), json!(value));
    m
}

#[tokio::test]
async fn add_generates_sequential_ids_when_missing() {
    let store = hash_store();

    let first = store
        .add_texts(vec!["alpha".to_string(), "beta".to_string()], None, None)
        .await
        .unwrap();
    let second = store.add_texts(vec!["gamma".to_string()], None, None).await.unwrap();

    assert_eq!(first, vec!["doc_0", "doc_1"]);
    assert_eq!(second, vec!["doc_2"]);
    assert_eq!(store.count().await.unwrap(), 3);
}

#[tokio::test]
async fn add_rejects_mismatched_lengths() {
    let store = hash_store();

    let result = store
        .add_texts(
            vec!["one".to_string(), "two".to_string()],
            None,
            Some(vec!["only_one".to_string()]),
        )
        .await;

    assert!(result.is_err());
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn search_on_empty_store_returns_nothing() {
    let store = hash_store();
    let results = store.search("anything", 5, None).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn identical_text_is_the_top_hit_under_cosine() {
    let store = hash_store();
    store
        .add_texts(
            vec![
                "the white whale breached at dawn".to_string(),
                "a recipe for sourdough bread".to_string(),
                "maintenance schedule for the engine".to_string(),
            ],
            None,
            None,
        )
        .await
        .unwrap();

    let results = store.search("the white whale breached at dawn", 3, None).await.unwrap();

    assert_eq!(results[0].text, "the white whale breached at dawn");
    assert!((results[0].score - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn filter_restricts_search_and_get() {
    let store = hash_store();
    store
        .add_texts(
            vec!["from the first book".to_string(), "from the second book".to_string()],
            Some(vec![meta("book", "first"), meta("book", "second")]),
            Some(vec!["a".to_string(), "b".to_string()]),
        )
        .await
        .unwrap();

    let mut filter = bookkb::Filter::new();
    filter.insert("book".to_string(), json!("second"));

    let hits = store.search("from the first book", 10, Some(&filter)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "b");

    let got = store.get(None, Some(&filter)).await.unwrap();
    assert_eq!(got.ids, vec!["b"]);
}

#[tokio::test]
async fn get_without_criteria_returns_everything() {
    let store = hash_store();
    store
        .add_texts(vec!["x".to_string(), "y".to_string()], None, None)
        .await
        .unwrap();

    let got = store.get(None, None).await.unwrap();

    assert_eq!(got.len(), 2);
    assert_eq!(got.documents.len(), got.metadatas.len());
}

#[tokio::test]
async fn delete_matches_ids_or_filter() {
    let store = hash_store();
    store
        .add_texts(
            vec!["keep me".to_string(), "delete by id".to_string(), "delete by tag".to_string()],
            Some(vec![meta("tag", "keep"), meta("tag", "keep"), meta("tag", "drop")]),
            Some(vec!["k".to_string(), "d1".to_string(), "d2".to_string()]),
        )
        .await
        .unwrap();

    let ids = vec!["d1".to_string()];
    let mut filter = bookkb::Filter::new();
    filter.insert("tag".to_string(), json!("drop"));
    let removed = store.delete(Some(&ids), Some(&filter)).await.unwrap();
    assert_eq!(removed, 2);

    let remaining = store.get(None, None).await.unwrap();
    assert_eq!(remaining.ids, vec!["k"]);
}

#[tokio::test]
async fn delete_without_criteria_is_a_noop() {
    let store = hash_store();
    store.add_texts(vec!["survivor".to_string()], None, None).await.unwrap();

    assert_eq!(store.delete(None, None).await.unwrap(), 0);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn reset_empties_the_store() {
    let store = hash_store();
    store.add_texts(vec!["gone soon".to_string()], None, None).await.unwrap();

    store.reset().await.unwrap();

    assert_eq!(store.count().await.unwrap(), 0);
    assert!(store.search("gone soon", 5, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn l2_scores_are_bounded_and_ordered() {
    let mut vectors = HashMap::new();
    vectors.insert("origin".to_string(), vec![0.0, 0.0]);
    vectors.insert("near".to_string(), vec![0.1, 0.0]);
    vectors.insert("far".to_string(), vec![3.0, 4.0]);
    let provider = MapEmbedder { dimensions: 2, vectors };
    let store = MemoryVectorStore::new(Arc::new(provider), DistanceFunction::L2);

    store
        .add_texts(vec!["near".to_string(), "far".to_string()], None, None)
        .await
        .unwrap();
    let results = store.search("origin", 2, None).await.unwrap();

    assert_eq!(results[0].text, "near");
    // 1 / (1 + d^2) stays within (0, 1].
    for r in &results {
        assert!(r.score > 0.0 && r.score <= 1.0);
    }
    assert!((results[1].score - 1.0 / 26.0).abs() < 1e-5);
}

/// Generate a non-zero L2-normalized vector of the given dimension.
fn arb_normalized_vector(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map("non-zero vector", |mut v| {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < 1e-8 {
            return None;
        }
        for val in &mut v {
            *val /= norm;
        }
        Some(v)
    })
}

/// *For any* set of stored texts and any query, search results are ordered
/// by descending score and there are at most `limit` of them.
mod prop_search_ordering {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn results_ordered_descending_and_bounded_by_limit(
            vectors in proptest::collection::vec(arb_normalized_vector(DIM), 1..20),
            query in arb_normalized_vector(DIM),
            limit in 1usize..25,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let results = rt.block_on(async {
                let mut map = HashMap::new();
                let texts: Vec<String> =
                    (0..vectors.len()).map(|i| format!("text {i}")).collect();
                for (text, vector) in texts.iter().zip(&vectors) {
                    map.insert(text.clone(), vector.clone());
                }
                map.insert("query".to_string(), query.clone());

                let provider = MapEmbedder { dimensions: DIM, vectors: map };
                let store =
                    MemoryVectorStore::new(Arc::new(provider), DistanceFunction::Cosine);
                store.add_texts(texts, None, None).await.unwrap();
                store.search("query", limit, None).await.unwrap()
            });

            prop_assert!(results.len() <= limit);
            for pair in results.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }
    }
}
