use docbridge::memory::MemoryStore;
use docbridge::prelude::*;
use serde_json::json;

fn config() -> ServiceConfig {
    ServiceConfig::default()
}

async fn seed_pair(store: &MemoryStore, config: &ServiceConfig) -> (String, String) {
    let engine = BatchEngine::new(store, config);
    let request = RecordRequest::new(Verb::Post, "users").with_payload(json!({
        "resource": [
            {"name": "Alice", "age": 34, "city": "Berlin"},
            {"name": "Bob", "age": 27, "city": "Paris"},
        ]
    }));
    let response = engine
        .execute(&request, &RequestContext::default())
        .await
        .unwrap();
    let RecordResponse::Set { records, .. } = response else {
        panic!("expected a set response");
    };
    (
        records[0]["_id"].as_str().unwrap().to_string(),
        records[1]["_id"].as_str().unwrap().to_string(),
    )
}

async fn fetch(engine: &BatchEngine<'_, MemoryStore>, id: &str) -> serde_json::Value {
    let request = RecordRequest::new(Verb::Get, "users").with_id(id);
    let response = engine
        .execute(&request, &RequestContext::default())
        .await
        .unwrap();
    let RecordResponse::Single(record) = response else {
        panic!("expected a single record");
    };
    record
}

#[tokio::test]
async fn test_default_mode_stops_at_the_first_failure() {
    let store = MemoryStore::new();
    let config = config();
    let engine = BatchEngine::new(&store, &config);
    let (a, b) = seed_pair(&store, &config).await;

    let request = RecordRequest::new(Verb::Patch, "users").with_payload(json!({
        "resource": [
            {"_id": a, "tag": 1},
            {"_id": "missing", "tag": 2},
            {"_id": b, "tag": 3},
        ]
    }));
    let err = engine
        .execute(&request, &RequestContext::default())
        .await
        .unwrap_err();

    // The failure surfaces as-is, not wrapped in a batch envelope.
    assert!(matches!(err, RecordError::NotFound(_)));

    // The first item had already been applied; the third was never reached.
    assert_eq!(fetch(&engine, &a).await["tag"], json!(1));
    assert!(!fetch(&engine, &b).await.as_object().unwrap().contains_key("tag"));
}

#[tokio::test]
async fn test_continue_mode_aggregates_failures_by_index() {
    let store = MemoryStore::new();
    let config = config();
    let engine = BatchEngine::new(&store, &config);
    let (a, b) = seed_pair(&store, &config).await;

    let request = RecordRequest::new(Verb::Patch, "users")
        .with_options(RequestOptions {
            continue_on_error: true,
            ..RequestOptions::default()
        })
        .with_payload(json!({
            "resource": [
                {"_id": a, "tag": 1},
                {"_id": "missing", "tag": 2},
                {"_id": b, "tag": 3},
            ]
        }));
    let err = engine
        .execute(&request, &RequestContext::default())
        .await
        .unwrap_err();

    let RecordError::Batch(failure) = err else {
        panic!("expected a batch failure");
    };
    assert_eq!(failure.message, "Not all records could be updated.");
    assert_eq!(failure.code, 400);
    assert_eq!(failure.error_indices, vec![1]);
    assert_eq!(failure.outcomes.len(), 3);
    assert_eq!(failure.outcomes[0]["tag"], json!(1));
    assert_eq!(failure.outcomes[1]["code"], json!(404));
    assert_eq!(failure.outcomes[2]["tag"], json!(3));

    // Every reachable item was still applied.
    assert_eq!(fetch(&engine, &b).await["tag"], json!(3));
}

#[tokio::test]
async fn test_continue_mode_create_keeps_the_successes() {
    let store = MemoryStore::new();
    let config = config();
    let engine = BatchEngine::new(&store, &config);

    let request = RecordRequest::new(Verb::Post, "users")
        .with_options(RequestOptions {
            continue_on_error: true,
            ..RequestOptions::default()
        })
        .with_payload(json!({
            "resource": [
                {"_id": "dup", "name": "First"},
                {"_id": "dup", "name": "Second"},
                {"name": "Third"},
            ]
        }));
    let err = engine
        .execute(&request, &RequestContext::default())
        .await
        .unwrap_err();

    let RecordError::Batch(failure) = err else {
        panic!("expected a batch failure");
    };
    assert_eq!(failure.message, "Not all records could be created.");
    assert_eq!(failure.error_indices, vec![1]);
    assert_eq!(failure.outcomes[0], json!({"_id": "dup"}));
    assert_eq!(failure.outcomes[1]["code"], json!(500));
    assert!(failure.outcomes[2]["_id"].is_string());

    let request = RecordRequest::new(Verb::Get, "users");
    let response = engine
        .execute(&request, &RequestContext::default())
        .await
        .unwrap();
    let RecordResponse::Set { records, .. } = response else {
        panic!("expected a set response");
    };
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn test_rollback_mode_deletes_created_records() {
    let store = MemoryStore::new();
    let config = config();
    let engine = BatchEngine::new(&store, &config);
    store.create_index("users", "email", true).await.unwrap();

    let request = RecordRequest::new(Verb::Post, "users")
        .with_options(RequestOptions {
            rollback_on_error: true,
            ..RequestOptions::default()
        })
        .with_payload(json!({
            "resource": [
                {"name": "First", "email": "x@example.com"},
                {"name": "Second", "email": "x@example.com"},
                {"name": "Third", "email": "y@example.com"},
            ]
        }));
    let err = engine
        .execute(&request, &RequestContext::default())
        .await
        .unwrap_err();

    let RecordError::Batch(failure) = err else {
        panic!("expected a batch failure");
    };
    assert_eq!(failure.message, "Not all records could be created.");
    assert_eq!(failure.error_indices, vec![1]);
    assert_eq!(failure.outcomes[0], json!(null));
    assert!(failure.outcomes[1]["message"].as_str().unwrap().contains("unique index"));
    assert_eq!(failure.outcomes[2], json!(null));

    // The first record was compensated; the third was never attempted.
    let request = RecordRequest::new(Verb::Get, "users");
    let response = engine
        .execute(&request, &RequestContext::default())
        .await
        .unwrap();
    let RecordResponse::Set { records, .. } = response else {
        panic!("expected a set response");
    };
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_rollback_mode_restores_replaced_records() {
    let store = MemoryStore::new();
    let config = config();
    let engine = BatchEngine::new(&store, &config);
    let (a, _) = seed_pair(&store, &config).await;

    let request = RecordRequest::new(Verb::Put, "users")
        .with_options(RequestOptions {
            rollback_on_error: true,
            ..RequestOptions::default()
        })
        .with_payload(json!({
            "resource": [
                {"_id": a, "name": "Alpha"},
                {"_id": "missing", "name": "Nobody"},
            ]
        }));
    let err = engine
        .execute(&request, &RequestContext::default())
        .await
        .unwrap_err();

    let RecordError::Batch(failure) = err else {
        panic!("expected a batch failure");
    };
    assert_eq!(failure.message, "Not all records could be replaced.");
    assert_eq!(failure.error_indices, vec![1]);

    // The replaced record came back exactly as it was.
    let record = fetch(&engine, &a).await;
    assert_eq!(record["name"], json!("Alice"));
    assert_eq!(record["age"], json!(34));
    assert_eq!(record["city"], json!("Berlin"));
}

#[tokio::test]
async fn test_rollback_mode_restores_deleted_records() {
    let store = MemoryStore::new();
    let config = config();
    let engine = BatchEngine::new(&store, &config);
    let (a, _) = seed_pair(&store, &config).await;

    let request = RecordRequest::new(Verb::Delete, "users").with_options(RequestOptions {
        ids: Some(format!("{a},missing")),
        rollback_on_error: true,
        ..RequestOptions::default()
    });
    let err = engine
        .execute(&request, &RequestContext::default())
        .await
        .unwrap_err();

    let RecordError::Batch(failure) = err else {
        panic!("expected a batch failure");
    };
    assert_eq!(failure.message, "Not all records could be deleted.");
    assert_eq!(failure.error_indices, vec![1]);

    let record = fetch(&engine, &a).await;
    assert_eq!(record["name"], json!("Alice"));
    assert_eq!(record["city"], json!("Berlin"));
}

#[tokio::test]
async fn test_bulk_update_count_mismatch_is_a_store_error() {
    let store = MemoryStore::new();
    let config = config();
    let engine = BatchEngine::new(&store, &config);
    let (a, _) = seed_pair(&store, &config).await;

    let request = RecordRequest::new(Verb::Patch, "users")
        .with_options(RequestOptions {
            ids: Some(format!("{a},missing")),
            ..RequestOptions::default()
        })
        .with_payload(json!({"status": "active"}));
    let err = engine
        .execute(&request, &RequestContext::default())
        .await
        .unwrap_err();

    assert!(matches!(err, RecordError::Store { .. }));
    assert_eq!(err.code(), 500);
    assert!(err.to_string().contains("bulk update matched 1 of 2 records"));
}

#[tokio::test]
async fn test_bulk_delete_count_mismatch_is_a_store_error() {
    let store = MemoryStore::new();
    let config = config();
    let engine = BatchEngine::new(&store, &config);
    let (a, _) = seed_pair(&store, &config).await;

    let request = RecordRequest::new(Verb::Delete, "users").with_options(RequestOptions {
        ids: Some(format!("{a},missing")),
        ..RequestOptions::default()
    });
    let err = engine
        .execute(&request, &RequestContext::default())
        .await
        .unwrap_err();

    assert!(matches!(err, RecordError::Store { .. }));
    assert!(err.to_string().contains("bulk delete removed 1 of 2 records"));
}

#[tokio::test]
async fn test_bulk_by_ids_read_reports_the_first_missing_identifier() {
    let store = MemoryStore::new();
    let config = config();
    let engine = BatchEngine::new(&store, &config);
    let (a, b) = seed_pair(&store, &config).await;

    let request = RecordRequest::new(Verb::Get, "users").with_options(RequestOptions {
        ids: Some(format!("{a},missing,{b}")),
        ..RequestOptions::default()
    });
    let err = engine
        .execute(&request, &RequestContext::default())
        .await
        .unwrap_err();

    assert!(matches!(err, RecordError::NotFound(_)));
    assert!(err.to_string().contains("'missing' in table 'users'"));
}

#[tokio::test]
async fn test_by_ids_read_with_continue_collects_misses() {
    let store = MemoryStore::new();
    let config = config();
    let engine = BatchEngine::new(&store, &config);
    let (a, b) = seed_pair(&store, &config).await;

    let request = RecordRequest::new(Verb::Get, "users")
        .with_target(Target::ByIds)
        .with_options(RequestOptions {
            ids: Some(format!("{a},missing,{b}")),
            continue_on_error: true,
            ..RequestOptions::default()
        });
    let err = engine
        .execute(&request, &RequestContext::default())
        .await
        .unwrap_err();

    let RecordError::Batch(failure) = err else {
        panic!("expected a batch failure");
    };
    assert_eq!(failure.message, "Not all records could be retrieved.");
    assert_eq!(failure.error_indices, vec![1]);
    assert_eq!(failure.outcomes[0]["name"], json!("Alice"));
    assert_eq!(failure.outcomes[1]["code"], json!(404));
    assert_eq!(failure.outcomes[2]["name"], json!("Bob"));
}

#[tokio::test]
async fn test_by_ids_selector_requires_the_ids_option() {
    let store = MemoryStore::new();
    let config = config();
    let engine = BatchEngine::new(&store, &config);
    seed_pair(&store, &config).await;

    let request = RecordRequest::new(Verb::Get, "users").with_target(Target::ByIds);
    let err = engine
        .execute(&request, &RequestContext::default())
        .await
        .unwrap_err();

    assert!(matches!(err, RecordError::Validation(_)));
    assert!(err.to_string().contains("'by-ids' requires the 'ids' option"));
}

#[tokio::test]
async fn test_malformed_identifier_lists_are_rejected() {
    let store = MemoryStore::new();
    let config = config();
    let engine = BatchEngine::new(&store, &config);
    let (a, _) = seed_pair(&store, &config).await;

    let request = RecordRequest::new(Verb::Get, "users").with_options(RequestOptions {
        ids: Some(format!("{a},,")),
        ..RequestOptions::default()
    });
    let err = engine
        .execute(&request, &RequestContext::default())
        .await
        .unwrap_err();

    assert!(matches!(err, RecordError::Validation(_)));
    assert!(err.to_string().contains("empty identifier"));
}
