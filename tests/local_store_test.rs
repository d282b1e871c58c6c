mod helpers;

use std::sync::Arc;

use helpers::spike;
use nino_memory::error::MemoryError;
use nino_memory::memory::local::{LocalSettings, LocalStore};
use nino_memory::memory::MemoryStore;
use tempfile::TempDir;

async fn open(tmp: &TempDir) -> LocalStore {
    LocalStore::open(tmp.path(), LocalSettings::default()).await.unwrap()
}

#[tokio::test]
async fn search_ranks_by_similarity() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    store.add("u1", "likes tea", &[1.0, 0.0, 0.0]).await.unwrap();
    store.add("u1", "likes ramen", &[0.0, 1.0, 0.0]).await.unwrap();
    store.add("u1", "likes coffee", &[0.9, 0.1, 0.0]).await.unwrap();

    let results = store.search("u1", &[1.0, 0.0, 0.0], 2).await.unwrap();
    assert_eq!(results, ["likes tea", "likes coffee"]);
}

#[tokio::test]
async fn equal_scores_keep_insertion_order() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    store.add("u1", "first", &[1.0, 0.0]).await.unwrap();
    store.add("u1", "second", &[2.0, 0.0]).await.unwrap();
    store.add("u1", "third", &[0.5, 0.0]).await.unwrap();

    let results = store.search("u1", &[1.0, 0.0], 3).await.unwrap();
    assert_eq!(results, ["first", "second", "third"]);
}

#[tokio::test]
async fn search_edge_cases_return_nothing() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    assert!(store.search("nobody", &[1.0, 0.0], 5).await.unwrap().is_empty());

    store.add("u1", "likes tea", &[1.0, 0.0]).await.unwrap();
    assert!(store.search("u1", &[], 5).await.unwrap().is_empty());
    assert!(store.search("u1", &[1.0, 0.0], 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn mismatched_dimensions_rank_last() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    store.add("u1", "old model", &[1.0, 0.0, 0.0]).await.unwrap();
    store.add("u1", "new model", &[0.5, 0.5]).await.unwrap();

    let results = store.search("u1", &[1.0, 1.0], 5).await.unwrap();
    assert_eq!(results, ["new model", "old model"]);
}

#[tokio::test]
async fn minimum_similarity_gate_filters_weak_matches() {
    let tmp = TempDir::new().unwrap();
    let settings = LocalSettings {
        min_similarity: Some(0.6),
        ..LocalSettings::default()
    };
    let store = LocalStore::open(tmp.path(), settings).await.unwrap();

    store.add("u1", "likes tea", &[1.0, 0.0]).await.unwrap();
    store.add("u1", "likes ramen", &[0.0, 1.0]).await.unwrap();

    let results = store.search("u1", &[1.0, 0.0], 5).await.unwrap();
    assert_eq!(results, ["likes tea"]);
}

#[tokio::test]
async fn duplicate_text_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    store.add("u1", "likes tea", &[1.0, 0.0]).await.unwrap();
    let err = store.add("u1", "likes tea", &[1.0, 0.0]).await.unwrap_err();
    assert!(err.is_duplicate());

    // Same text for another owner is fine.
    store.add("u2", "likes tea", &[1.0, 0.0]).await.unwrap();
    assert_eq!(store.search("u1", &[1.0, 0.0], 5).await.unwrap().len(), 1);
}

#[tokio::test]
async fn rolling_context_keeps_the_newest_lines() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    for i in 1..=8 {
        store.add_recent_message("u1", &format!("line {i}")).await.unwrap();
    }

    let lines = store.get_recent_messages("u1").await.unwrap();
    assert_eq!(lines, ["line 4", "line 5", "line 6", "line 7", "line 8"]);
}

#[tokio::test]
async fn clearing_context_keeps_long_term_memory() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    store.add("u1", "likes tea", &[1.0, 0.0]).await.unwrap();
    store.add_recent_message("u1", "hi").await.unwrap();

    store.clear_recent_messages("u1").await.unwrap();
    assert!(store.get_recent_messages("u1").await.unwrap().is_empty());
    assert_eq!(store.search("u1", &[1.0, 0.0], 5).await.unwrap(), ["likes tea"]);

    // Clearing an owner with nothing stored is not an error.
    store.clear_recent_messages("nobody").await.unwrap();
}

#[tokio::test]
async fn delete_removes_only_that_owner() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    for owner in ["u1", "u2"] {
        store.add(owner, "likes tea", &[1.0, 0.0]).await.unwrap();
        store.add_recent_message(owner, "hi").await.unwrap();
    }

    store.delete_user_data("u1").await.unwrap();
    assert!(store.search("u1", &[1.0, 0.0], 5).await.unwrap().is_empty());
    assert!(store.get_recent_messages("u1").await.unwrap().is_empty());
    assert!(!tmp.path().join("u1").exists());

    assert_eq!(store.search("u2", &[1.0, 0.0], 5).await.unwrap(), ["likes tea"]);
    assert_eq!(store.get_recent_messages("u2").await.unwrap(), ["hi"]);

    store.delete_user_data("u1").await.unwrap();
}

#[tokio::test]
async fn data_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let store = open(&tmp).await;
        store.add("u1", "likes tea", &[1.0, 0.0]).await.unwrap();
        store.add_recent_message("u1", "hi").await.unwrap();
    }

    let store = open(&tmp).await;
    assert_eq!(store.search("u1", &[1.0, 0.0], 1).await.unwrap(), ["likes tea"]);
    assert_eq!(store.get_recent_messages("u1").await.unwrap(), ["hi"]);
}

#[tokio::test]
async fn corrupt_document_is_a_serialization_error() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;
    std::fs::create_dir_all(tmp.path().join("u1")).unwrap();
    std::fs::write(tmp.path().join("u1").join("memory.json"), b"{not json").unwrap();

    let err = store.search("u1", &[1.0], 1).await.unwrap_err();
    assert!(matches!(err, MemoryError::Serialization(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn path_like_owner_ids_are_refused() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    let err = store.add("../escape", "x", &[1.0]).await.unwrap_err();
    assert!(matches!(err, MemoryError::InvalidOwner(_)));
    assert!(store.get_recent_messages("").await.is_err());
}

#[tokio::test]
async fn concurrent_appends_lose_nothing() {
    let tmp = TempDir::new().unwrap();
    let settings = LocalSettings {
        recent_cap: 100,
        ..LocalSettings::default()
    };
    let store = Arc::new(LocalStore::open(tmp.path(), settings).await.unwrap());

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store.add_recent_message("u1", &format!("line {i}")).await.unwrap();
                store.add("u1", &format!("fact {i}"), &spike(20, i)).await.unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(store.get_recent_messages("u1").await.unwrap().len(), 20);
    for i in 0..20 {
        let top = store.search("u1", &spike(20, i), 1).await.unwrap();
        assert_eq!(top, [format!("fact {i}")]);
    }
}

#[tokio::test]
async fn non_finite_vectors_are_rejected_and_never_break_search() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    let err = store.add("u1", "bad", &[f32::NAN, 0.0]).await.unwrap_err();
    assert!(matches!(err, MemoryError::InvalidVector(_)), "unexpected error: {err}");
    assert!(store.add("u1", "bad", &[f32::INFINITY, 0.0]).await.is_err());

    for i in 0..30 {
        store.add("u1", &format!("fact {i}"), &[1.0, i as f32]).await.unwrap();
    }

    // A document written by something else may still hold non-finite values.
    let path = tmp.path().join("u1").join("memory.json");
    let mut doc: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    for record in doc.as_array_mut().unwrap().iter_mut().step_by(3) {
        record["vector"] = serde_json::json!([1e39, 1.0]);
    }
    std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

    let results = store.search("u1", &[1.0, 0.0], 25).await.unwrap();
    assert_eq!(results.len(), 25);
    assert!(store.search("u1", &[f32::NAN, 0.0], 5).await.unwrap().len() <= 5);
}

#[tokio::test]
async fn guarded_clear_runs_only_while_owner_is_idle() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;
    store.add_recent_message("u1", "hi").await.unwrap();

    assert!(!store.clear_recent_messages_if("u1", &|| false).await.unwrap());
    assert_eq!(store.get_recent_messages("u1").await.unwrap(), ["hi"]);

    assert!(store.clear_recent_messages_if("u1", &|| true).await.unwrap());
    assert!(store.get_recent_messages("u1").await.unwrap().is_empty());
}
