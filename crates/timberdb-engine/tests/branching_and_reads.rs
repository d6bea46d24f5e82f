//! Branch hierarchy semantics, the read facade, document history, and the
//! ambient surfaces (metrics, health, retention).

use std::sync::Arc;

use serde_json::json;
use timberdb_core::{Document, Operation, TimberConfig, TimberError, Value};
use timberdb_engine::Engine;
use timberdb_storage::{FileCatalog, MemoryWalStore};

fn doc(v: serde_json::Value) -> Document {
    Document::from_json(v).unwrap()
}

fn memory_engine() -> Engine {
    Engine::with_stores(
        TimberConfig::default(),
        Arc::new(MemoryWalStore::new()),
        Arc::new(FileCatalog::in_memory()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_child_inherits_parent_prefix_only_up_to_fork() {
    let engine = memory_engine();
    engine.create_project("app").await.unwrap();
    let main_ctx = engine.branch_ctx("app", "main").await.unwrap();

    engine
        .insert_one(&main_ctx, "docs", doc(json!({"_id": "a"})))
        .await
        .unwrap();
    engine
        .insert_one(&main_ctx, "docs", doc(json!({"_id": "b"})))
        .await
        .unwrap();

    engine
        .create_branch("app", "feat", "main", None)
        .await
        .unwrap();

    // Writes to main after the fork must stay invisible to the child.
    engine
        .insert_one(&main_ctx, "docs", doc(json!({"_id": "post-fork"})))
        .await
        .unwrap();

    let feat = engine.get_branch("app", "feat").await.unwrap();
    let feat_state = engine
        .materialize_at_lsn("app", "feat", "docs", feat.head_lsn)
        .await
        .unwrap();
    assert_eq!(feat_state.len(), 2);
    assert!(feat_state.contains_key("a"));
    assert!(feat_state.contains_key("b"));
    assert!(!feat_state.contains_key("post-fork"));
}

#[tokio::test]
async fn test_grandchild_sees_whole_lineage() {
    let engine = memory_engine();
    engine.create_project("app").await.unwrap();
    let main_ctx = engine.branch_ctx("app", "main").await.unwrap();

    engine
        .insert_one(&main_ctx, "docs", doc(json!({"_id": "a", "from": "main"})))
        .await
        .unwrap();

    engine
        .create_branch("app", "feat", "main", None)
        .await
        .unwrap();
    let feat_ctx = engine.branch_ctx("app", "feat").await.unwrap();
    engine
        .insert_one(&feat_ctx, "docs", doc(json!({"_id": "b", "from": "feat"})))
        .await
        .unwrap();

    engine
        .create_branch("app", "deep", "feat", None)
        .await
        .unwrap();
    let deep_ctx = engine.branch_ctx("app", "deep").await.unwrap();
    engine
        .insert_one(&deep_ctx, "docs", doc(json!({"_id": "c", "from": "deep"})))
        .await
        .unwrap();

    let deep = engine.get_branch("app", "deep").await.unwrap();
    let state = engine
        .materialize_at_lsn("app", "deep", "docs", deep.head_lsn)
        .await
        .unwrap();
    assert_eq!(state.len(), 3);

    // The grandchild's write never leaks upward.
    let feat = engine.get_branch("app", "feat").await.unwrap();
    let feat_state = engine
        .materialize_at_lsn("app", "feat", "docs", feat.head_lsn)
        .await
        .unwrap();
    assert_eq!(feat_state.len(), 2);
    let main = engine.get_branch("app", "main").await.unwrap();
    let main_state = engine
        .materialize_at_lsn("app", "main", "docs", main.head_lsn)
        .await
        .unwrap();
    assert_eq!(main_state.len(), 1);
}

#[tokio::test]
async fn test_forked_branch_matches_source_at_fork_point() {
    let engine = memory_engine();
    engine.create_project("app").await.unwrap();
    let ctx = engine.branch_ctx("app", "main").await.unwrap();

    engine
        .insert_one(&ctx, "users", doc(json!({"_id": "u1", "n": 1})))
        .await
        .unwrap();
    let fork = engine
        .insert_one(&ctx, "users", doc(json!({"_id": "u2", "n": 2})))
        .await
        .unwrap()
        .lsn;
    engine
        .insert_one(&ctx, "users", doc(json!({"_id": "u3", "n": 3})))
        .await
        .unwrap();

    engine
        .create_branch_at_lsn("app", "main", "snap", fork)
        .await
        .unwrap();

    let source_view = engine
        .materialize_at_lsn("app", "main", "users", fork)
        .await
        .unwrap();
    let snap = engine.get_branch("app", "snap").await.unwrap();
    let snap_view = engine
        .materialize_at_lsn("app", "snap", "users", snap.head_lsn)
        .await
        .unwrap();
    assert_eq!(source_view, snap_view);

    // Repeated materialization is deterministic.
    let again = engine
        .materialize_at_lsn("app", "main", "users", fork)
        .await
        .unwrap();
    assert_eq!(again, source_view);
}

#[tokio::test]
async fn test_branch_creation_conflicts_and_bounds() {
    let engine = memory_engine();
    engine.create_project("app").await.unwrap();

    engine
        .create_branch("app", "feat", "main", None)
        .await
        .unwrap();
    assert!(matches!(
        engine.create_branch("app", "feat", "main", None).await,
        Err(TimberError::Conflict { .. })
    ));

    let main = engine.get_branch("app", "main").await.unwrap();
    assert!(matches!(
        engine
            .create_branch_at_lsn("app", "main", "late", main.head_lsn.next())
            .await,
        Err(TimberError::OutOfRange { .. })
    ));
}

#[tokio::test]
async fn test_delete_rules_recovery_and_sweep() {
    let engine = memory_engine();
    engine.create_project("app").await.unwrap();

    assert!(matches!(
        engine.delete_branch("app", "main").await,
        Err(TimberError::Conflict { .. })
    ));

    engine
        .create_branch("app", "parent", "main", None)
        .await
        .unwrap();
    engine
        .create_branch("app", "child", "parent", None)
        .await
        .unwrap();

    assert!(matches!(
        engine.delete_branch("app", "parent").await,
        Err(TimberError::Conflict { .. })
    ));

    engine.delete_branch("app", "child").await.unwrap();
    engine.delete_branch("app", "parent").await.unwrap();

    let active = engine.list_branches("app", false).await.unwrap();
    assert_eq!(active.len(), 1);

    engine.recover_branch("app", "parent").await.unwrap();
    let active = engine.list_branches("app", false).await.unwrap();
    assert_eq!(active.len(), 2);

    // Default retention keeps the remaining pending branch around.
    let report = engine.sweep_retention(true).await.unwrap();
    assert_eq!(report.checked, 1);
    assert!(report.retired.is_empty());
}

#[tokio::test]
async fn test_find_facade_with_filters_and_pins() {
    let engine = memory_engine();
    engine.create_project("app").await.unwrap();
    let ctx = engine.branch_ctx("app", "main").await.unwrap();

    engine
        .insert_many(
            &ctx,
            "users",
            vec![
                doc(json!({"_id": "u1", "name": "Alice", "age": 30, "address": {"city": "NY"}})),
                doc(json!({"_id": "u2", "name": "Bob", "age": 25, "address": {"city": "LA"}})),
                doc(json!({"_id": "u3", "name": "Cara", "age": 41, "address": {"city": "NY"}})),
            ],
        )
        .await
        .unwrap();
    let after_seed = engine.get_branch("app", "main").await.unwrap().head_lsn;

    engine
        .delete_one(&ctx, "users", doc(json!({"_id": "u3"})))
        .await
        .unwrap();

    let adults = engine
        .find(&ctx, "users", &doc(json!({"age": {"$gte": 26}})))
        .await
        .unwrap();
    assert_eq!(adults.len(), 1);
    assert_eq!(adults[0].get("_id").unwrap().as_str(), Some("u1"));

    let ny = engine
        .count(&ctx, "users", &doc(json!({"address.city": "NY"})))
        .await
        .unwrap();
    assert_eq!(ny, 1);

    let bob = engine
        .find_one(&ctx, "users", &doc(json!({"name": {"$in": ["Bob", "Zed"]}})))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bob.get("age").unwrap(), &Value::Int(25));

    // Pinned to before the delete, u3 is still visible.
    let pinned = ctx.clone().at_lsn(after_seed);
    let everyone = engine.find(&pinned, "users", &doc(json!({}))).await.unwrap();
    assert_eq!(everyone.len(), 3);
}

#[tokio::test]
async fn test_insert_many_generates_ids_in_order() {
    let engine = memory_engine();
    engine.create_project("app").await.unwrap();
    let ctx = engine.branch_ctx("app", "main").await.unwrap();

    let result = engine
        .insert_many(
            &ctx,
            "notes",
            vec![
                doc(json!({"text": "first"})),
                doc(json!({"_id": "fixed", "text": "second"})),
                doc(json!({"text": "third"})),
            ],
        )
        .await
        .unwrap();

    assert_eq!(result.inserted_ids.len(), 3);
    assert_eq!(result.inserted_ids[1], "fixed");
    assert_ne!(result.inserted_ids[0], result.inserted_ids[2]);

    let ctx_head = engine.get_branch("app", "main").await.unwrap().head_lsn;
    let state = engine
        .materialize_at_lsn("app", "main", "notes", ctx_head)
        .await
        .unwrap();
    assert_eq!(state.len(), 3);

    // Batch rejects a non-scalar _id before anything is appended.
    let err = engine
        .insert_many(
            &ctx,
            "notes",
            vec![doc(json!({"_id": {"bad": true}, "text": "x"}))],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TimberError::Validation { .. }));
    let head_after = engine.get_branch("app", "main").await.unwrap().head_lsn;
    assert_eq!(head_after, ctx_head);
}

#[tokio::test]
async fn test_identity_update_against_missing_document_is_recorded_noop() {
    let engine = memory_engine();
    engine.create_project("app").await.unwrap();
    let ctx = engine.branch_ctx("app", "main").await.unwrap();

    let result = engine
        .update_one(
            &ctx,
            "users",
            doc(json!({"_id": "ghost"})),
            doc(json!({"$set": {"seen": true}})),
        )
        .await
        .unwrap();
    // The MVP driver contract reports a match without consulting state.
    assert_eq!(result.matched, 1);

    let head = engine.get_branch("app", "main").await.unwrap().head_lsn;
    assert_eq!(head, result.lsn);
    let state = engine
        .materialize_at_lsn("app", "main", "users", head)
        .await
        .unwrap();
    assert!(state.is_empty());
}

#[tokio::test]
async fn test_document_history_spans_the_fork() {
    let engine = memory_engine();
    engine.create_project("app").await.unwrap();
    let main_ctx = engine.branch_ctx("app", "main").await.unwrap();

    let l1 = engine
        .insert_one(&main_ctx, "users", doc(json!({"_id": "u1", "v": 1})))
        .await
        .unwrap()
        .lsn;
    engine
        .update_one(
            &main_ctx,
            "users",
            doc(json!({"_id": "u1"})),
            doc(json!({"$inc": {"v": 1}})),
        )
        .await
        .unwrap();

    engine
        .create_branch("app", "feat", "main", None)
        .await
        .unwrap();
    let feat_ctx = engine.branch_ctx("app", "feat").await.unwrap();
    engine
        .update_one(
            &feat_ctx,
            "users",
            doc(json!({"_id": "u1"})),
            doc(json!({"$inc": {"v": 10}})),
        )
        .await
        .unwrap();

    let feat = engine.get_branch("app", "feat").await.unwrap();
    let history = engine
        .get_document_history_at_lsn("app", "feat", "users", "u1", feat.head_lsn)
        .await
        .unwrap();

    assert_eq!(history.len(), 3);
    assert_eq!(history[0].lsn, l1);
    assert_eq!(history[0].op, Operation::Insert);
    assert!(history.windows(2).all(|w| w[0].lsn < w[1].lsn));

    let state = engine
        .materialize_at_lsn("app", "feat", "users", feat.head_lsn)
        .await
        .unwrap();
    assert_eq!(state.get("u1").unwrap().get("v"), Some(&Value::Int(12)));
}

#[tokio::test]
async fn test_time_travel_info_and_modified_collections() {
    let engine = memory_engine();
    engine.create_project("app").await.unwrap();
    let ctx = engine.branch_ctx("app", "main").await.unwrap();

    let info = engine.get_time_travel_info("app", "main").await.unwrap();
    assert_eq!(info.entry_count, 0);
    assert!(info.earliest_lsn.is_none());

    let first = engine
        .insert_one(&ctx, "users", doc(json!({"_id": "u1"})))
        .await
        .unwrap()
        .lsn;
    let last = engine
        .insert_one(&ctx, "orders", doc(json!({"_id": "o1"})))
        .await
        .unwrap()
        .lsn;

    let info = engine.get_time_travel_info("app", "main").await.unwrap();
    assert_eq!(info.entry_count, 2);
    assert_eq!(info.earliest_lsn, Some(first));
    assert_eq!(info.latest_lsn, Some(last));
    assert!(info.earliest_time.unwrap() <= info.latest_time.unwrap());

    let modified = engine
        .find_modified_collections("app", "main", first, last)
        .await
        .unwrap();
    assert_eq!(
        modified.into_iter().collect::<Vec<_>>(),
        vec!["orders".to_string(), "users".to_string()]
    );
}

#[tokio::test]
async fn test_branch_state_at_lsn_covers_all_collections() {
    let engine = memory_engine();
    engine.create_project("app").await.unwrap();
    let ctx = engine.branch_ctx("app", "main").await.unwrap();

    engine
        .insert_one(&ctx, "users", doc(json!({"_id": "u1"})))
        .await
        .unwrap();
    engine
        .insert_one(&ctx, "orders", doc(json!({"_id": "o1"})))
        .await
        .unwrap();

    let head = engine.get_branch("app", "main").await.unwrap().head_lsn;
    let full = engine
        .get_branch_state_at_lsn("app", "main", head)
        .await
        .unwrap();
    assert_eq!(full.len(), 2);
    assert!(full["users"].contains_key("u1"));
    assert!(full["orders"].contains_key("o1"));
}

#[tokio::test]
async fn test_create_collection_marker_registers_empty_collection() {
    let engine = memory_engine();
    engine.create_project("app").await.unwrap();
    let ctx = engine.branch_ctx("app", "main").await.unwrap();

    let lsn = engine.create_collection(&ctx, "audit").await.unwrap();
    assert_eq!(engine.get_branch("app", "main").await.unwrap().head_lsn, lsn);

    let full = engine
        .get_branch_state_at_lsn("app", "main", lsn)
        .await
        .unwrap();
    assert!(full.contains_key("audit"));
    assert!(full["audit"].is_empty());

    // Beyond-head lookups fail even when no data records exist.
    assert!(matches!(
        engine.get_branch_state_at_lsn("app", "main", lsn.next()).await,
        Err(TimberError::OutOfRange { .. })
    ));
}

#[tokio::test]
async fn test_metrics_and_health_surface() {
    let engine = memory_engine();
    engine.create_project("app").await.unwrap();
    let ctx = engine.branch_ctx("app", "main").await.unwrap();

    engine
        .insert_one(&ctx, "users", doc(json!({"_id": "u1"})))
        .await
        .unwrap();
    engine
        .find(&ctx, "users", &doc(json!({})))
        .await
        .unwrap();

    let snapshot = engine.metrics().snapshot();
    let append = snapshot
        .operations
        .iter()
        .find(|op| op.operation == "append")
        .unwrap();
    assert!(append.success >= 1);
    let query = snapshot
        .operations
        .iter()
        .find(|op| op.operation == "query")
        .unwrap();
    assert_eq!(query.success, 1);
    assert!(snapshot.current_lsn >= 2);
    assert_eq!(snapshot.active_projects, 1);
    assert_eq!(snapshot.active_branches, 1);

    let report = engine.health();
    assert!(report.healthy, "unexpected issues: {:?}", report.issues);

    let text = engine.metrics().export_text();
    assert!(text.contains("timberdb_operations_total"));
}

#[tokio::test]
async fn test_writes_rejected_on_pinned_or_deleted_branches() {
    let engine = memory_engine();
    engine.create_project("app").await.unwrap();
    let ctx = engine.branch_ctx("app", "main").await.unwrap();
    engine
        .insert_one(&ctx, "users", doc(json!({"_id": "u1"})))
        .await
        .unwrap();

    let head = engine.get_branch("app", "main").await.unwrap().head_lsn;
    let pinned = ctx.clone().at_lsn(head);
    assert!(matches!(
        engine
            .insert_one(&pinned, "users", doc(json!({"_id": "u2"})))
            .await,
        Err(TimberError::Validation { .. })
    ));

    engine
        .create_branch("app", "doomed", "main", None)
        .await
        .unwrap();
    let doomed_ctx = engine.branch_ctx("app", "doomed").await.unwrap();
    engine.delete_branch("app", "doomed").await.unwrap();
    assert!(matches!(
        engine
            .insert_one(&doomed_ctx, "users", doc(json!({"_id": "u2"})))
            .await,
        Err(TimberError::Conflict { .. })
    ));
}
