//! End-to-end tests for the document store façade.

use std::sync::Arc;

use async_trait::async_trait;
use bookkb::{
    Chunker, DistanceFunction, Document, DocumentStore, EmbeddingProvider, Filter, KbConfig,
    MemoryVectorStore, SplitStrategy,
};
use serde_json::json;
use tempfile::TempDir;

/// Embeds a text as its per-keyword indicator vector, giving predictable
/// overlap-based similarity.
struct KeywordEmbedder {
    keywords: Vec<&'static str>,
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn name(&self) -> &str {
        "keyword"
    }

    fn dimensions(&self) -> usize {
        self.keywords.len()
    }

    async fn embed(&self, text: &str) -> bookkb::Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(self
            .keywords
            .iter()
            .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
            .collect())
    }
}

fn keyword_store(dir: &TempDir) -> DocumentStore {
    let provider = Arc::new(KeywordEmbedder { keywords: vec!["cat", "dog", "whale", "bread"] });
    let index = Arc::new(MemoryVectorStore::new(provider, DistanceFunction::Cosine));
    let chunker = Chunker::new(100, 20, SplitStrategy::Paragraph).unwrap();
    DocumentStore::new(index, chunker, dir.path().join("documents"), 5, 0.0).unwrap()
}

fn flat_config(dir: &TempDir) -> KbConfig {
    KbConfig::builder()
        .collection_name("test_kb")
        .vector_dir(dir.path().join("vectors"))
        .data_dir(dir.path().join("documents"))
        .store("flat")
        .chunk_size(100)
        .chunk_overlap(20)
        .force_simple_embeddings(true)
        .build()
        .unwrap()
}

#[tokio::test]
async fn add_and_search_ranks_the_relevant_paragraph_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = keyword_store(&dir);

    let document = Document::new(
        "pets",
        "Cats are independent pets that enjoy solitude.\n\n\
         Dogs are loyal companions that love attention.",
    );
    let chunk_ids = store.add_document(&document).await.unwrap();
    assert_eq!(chunk_ids, vec!["pets_0", "pets_1"]);

    let results = store.search("tell me about cats", None, None).await.unwrap();
    assert_eq!(results[0].id, "pets_0");
    assert!(results[0].text.contains("Cats"));

    let results = store.search("tell me about dogs", None, None).await.unwrap();
    assert_eq!(results[0].id, "pets_1");
}

#[tokio::test]
async fn search_filter_restricts_results_to_one_document() {
    let dir = tempfile::tempdir().unwrap();
    let store = keyword_store(&dir);

    store
        .add_document(&Document::new("felines", "The cat stretched.\n\nAnother cat yawned."))
        .await
        .unwrap();
    store.add_document(&Document::new("canines", "The dog and the cat met.")).await.unwrap();

    let mut filter = Filter::new();
    filter.insert("document_id".to_string(), json!("felines"));

    let results = store.search("cat", None, Some(&filter)).await.unwrap();
    assert_eq!(results.len(), 2);
    for result in &results {
        assert_eq!(result.metadata["document_id"], json!("felines"));
    }

    let context = store.retrieve_context("cat", None, Some(&filter)).await.unwrap();
    assert!(!context.contains("dog"));
}

#[tokio::test]
async fn documents_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = keyword_store(&dir);

    let mut document = Document::new("kb1", "A whale appears.\n\nThen a dog appears.");
    document.metadata.insert("source".to_string(), json!("test"));
    store.add_document(&document).await.unwrap();

    let loaded = store.get_document("kb1").await.unwrap().unwrap();
    assert_eq!(loaded.id, "kb1");
    assert_eq!(loaded.text, document.text);
    assert_eq!(loaded.metadata["source"], json!("test"));
    assert_eq!(loaded.metadata["is_document"], json!(true));

    assert!(store.get_document("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn document_chunks_carry_provenance_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let store = keyword_store(&dir);

    let document =
        Document::new("prov", "First paragraph about a cat.\n\nSecond paragraph about a dog.");
    store.add_document(&document).await.unwrap();

    let chunks = store.document_chunks("prov").await;
    assert_eq!(chunks.len(), 2);
    for metadata in &chunks.metadatas {
        assert_eq!(metadata["document_id"], json!("prov"));
        assert_eq!(metadata["chunk_count"], json!(2));
    }
}

#[tokio::test]
async fn delete_document_removes_file_and_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let store = keyword_store(&dir);

    let document = Document::new(
        "doomed",
        "A cat paragraph.\n\nA dog paragraph.\n\nA whale paragraph.",
    );
    store.add_document(&document).await.unwrap();
    assert_eq!(store.stats().await.chunk_count, 3);

    let existed = store.delete_document("doomed").await.unwrap();
    assert!(existed);

    let stats = store.stats().await;
    assert_eq!(stats.document_count, 0);
    assert_eq!(stats.chunk_count, 0);
    assert!(store.document_chunks("doomed").await.is_empty());

    // Deleting again reports the document as already gone.
    assert!(!store.delete_document("doomed").await.unwrap());
}

#[tokio::test]
async fn one_off_chunk_limits_override_the_default() {
    let dir = tempfile::tempdir().unwrap();
    let store = keyword_store(&dir);

    // 120 chars in one paragraph: one chunk at the default limit,
    // hard-split at the smaller one.
    let text = "the cat slept on the mat all afternoon ".repeat(3);
    let default_ids = store.add_document(&Document::new("wide", &text)).await.unwrap();
    assert_eq!(default_ids.len(), 2);

    let narrow_ids = store
        .add_document_with_limits(&Document::new("narrow", &text), 40, 10)
        .await
        .unwrap();
    assert!(narrow_ids.len() > 2);
    assert!(store.add_document_with_limits(&Document::new("bad", &text), 40, 40).await.is_err());
}

#[tokio::test]
async fn invalid_document_ids_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = keyword_store(&dir);

    for id in ["", "../escape", "a/b", "a\\b"] {
        let document = Document::new(id, "Some text.");
        assert!(store.add_document(&document).await.is_err(), "accepted id {id:?}");
    }
}

#[tokio::test]
async fn list_documents_skips_unparsable_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = keyword_store(&dir);

    store.add_document(&Document::new("good", "A cat.\n\nA dog.")).await.unwrap();
    std::fs::write(dir.path().join("documents/broken.json"), b"{not json").unwrap();
    std::fs::write(dir.path().join("documents/notes.txt"), b"ignored").unwrap();

    let documents = store.list_documents().await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].id, "good");
}

#[tokio::test]
async fn search_threshold_filters_weak_matches() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(KeywordEmbedder { keywords: vec!["cat", "dog", "whale", "bread"] });
    let index = Arc::new(MemoryVectorStore::new(provider, DistanceFunction::Cosine));
    let chunker = Chunker::new(100, 20, SplitStrategy::Paragraph).unwrap();
    let store =
        DocumentStore::new(index, chunker, dir.path().join("documents"), 5, 0.5).unwrap();

    store
        .add_document(&Document::new("mix", "The cat sat.\n\nThe bread rose."))
        .await
        .unwrap();

    // "cat" matches one chunk perfectly and the other not at all.
    let results = store.search("cat", None, None).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].text.contains("cat"));
}

#[tokio::test]
async fn retrieve_context_joins_chunks_with_blank_lines() {
    let dir = tempfile::tempdir().unwrap();
    let store = keyword_store(&dir);

    store
        .add_document(&Document::new(
            "ctx",
            "The cat chapter begins here.\n\nThe cat chapter continues here.",
        ))
        .await
        .unwrap();

    let context = store.retrieve_context("cat", None, None).await.unwrap();
    assert!(context.contains("\n\n"));
    assert!(context.contains("begins"));
    assert!(context.contains("continues"));

    let empty = keyword_store(&tempfile::tempdir().unwrap());
    assert_eq!(empty.retrieve_context("cat", None, None).await.unwrap(), "");
}

#[tokio::test]
async fn reset_clears_documents_and_index() {
    let dir = tempfile::tempdir().unwrap();
    let store = keyword_store(&dir);

    store.add_document(&Document::new("a", "A cat.\n\nA dog.")).await.unwrap();
    store.add_document(&Document::new("b", "A whale.\n\nSome bread.")).await.unwrap();

    store.reset().await.unwrap();

    let stats = store.stats().await;
    assert_eq!(stats.document_count, 0);
    assert_eq!(stats.chunk_count, 0);
}

#[tokio::test]
async fn from_config_wires_a_persistent_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = flat_config(&dir);

    {
        let store = DocumentStore::from_config(&config).unwrap();
        assert!(store.degraded().is_some());
        store
            .add_document(&Document::new(
                "persisted",
                "First paragraph of the book.\n\nSecond paragraph of the book.",
            ))
            .await
            .unwrap();
    }

    // A fresh store over the same directories sees the same data.
    let reopened = DocumentStore::from_config(&config).unwrap();
    let stats = reopened.stats().await;
    assert_eq!(stats.document_count, 1);
    assert_eq!(stats.chunk_count, 2);

    let results =
        reopened.search("First paragraph of the book.", Some(1), None).await.unwrap();
    assert!((results[0].score - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn unknown_backend_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = flat_config(&dir);
    config.store = "warp_drive".to_string();

    let err = DocumentStore::from_config(&config).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("warp_drive"));
    assert!(message.contains("flat"));
}
