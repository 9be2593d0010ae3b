//! Integration tests for the SQLite export file store and export source.

mod common;

use beacon_jobs::{ExportFileStore, ExportRow, ExportSource, NewExportFile, StoreError};
use chrono::{Duration as ChronoDuration, Utc};
use common::TestDatabase;
use serde_json::{json, Value};

fn filters(value: Value) -> ExportRow {
    match value {
        Value::Object(map) => map,
        other => panic!("filters must be an object, got {other}"),
    }
}

async fn seed_users(db: &TestDatabase) {
    sqlx::query(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL, score REAL, role TEXT)",
    )
    .execute(db.pool().inner())
    .await
    .expect("Failed to create users");

    for (email, score, role) in [
        ("ann@example.com", Some(9.5), Some("admin")),
        ("bob@example.com", None, Some("member")),
        ("cy@example.com", Some(4.0), None),
    ] {
        sqlx::query("INSERT INTO users (email, score, role) VALUES (?, ?, ?)")
            .bind(email)
            .bind(score)
            .bind(role)
            .execute(db.pool().inner())
            .await
            .expect("Failed to insert user");
    }
}

#[tokio::test]
async fn test_export_file_round_trip() {
    let db = TestDatabase::new().await;
    let store = db.export_files();

    let created = store
        .create(
            NewExportFile::new("job-1", "users_job-1.csv", b"id\n1\n".to_vec(), 1)
                .with_user("user-7")
                .expires_in_days(7),
        )
        .await
        .expect("Failed to create export file");

    let found = store
        .find_by_job_id("job-1")
        .await
        .expect("Query failed")
        .expect("Export file not found");
    assert_eq!(found, created);
    assert_eq!(found.content, b"id\n1\n");
    assert_eq!(found.user_id, "user-7");

    let age = found.expires_at - found.created;
    assert!(age > ChronoDuration::days(6) && age <= ChronoDuration::days(7));
}

#[tokio::test]
async fn test_export_file_latest_wins() {
    let db = TestDatabase::new().await;
    let store = db.export_files();

    store
        .create(NewExportFile::new("job-1", "first.csv", Vec::new(), 0))
        .await
        .unwrap();
    let second = store
        .create(NewExportFile::new("job-1", "second.csv", Vec::new(), 0))
        .await
        .unwrap();

    let found = store.find_by_job_id("job-1").await.unwrap().unwrap();
    assert_eq!(found.id, second.id);
    assert!(store.find_by_job_id("job-2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_file_is_still_found() {
    let db = TestDatabase::new().await;
    let store = db.export_files();

    store
        .create(NewExportFile::new("job-1", "old.csv", Vec::new(), 0).expires_in_days(0))
        .await
        .unwrap();

    let found = store.find_by_job_id("job-1").await.unwrap().unwrap();
    assert!(found.is_expired(Utc::now()));
}

#[tokio::test]
async fn test_source_reads_table_rows() {
    let db = TestDatabase::new().await;
    seed_users(&db).await;

    let rows = db
        .export_source()
        .fetch("users", &ExportRow::new())
        .await
        .expect("Failed to read users");

    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["email"], json!("ann@example.com"));
    assert_eq!(rows[0]["score"], json!(9.5));
    assert_eq!(rows[1]["score"], Value::Null);
    assert_eq!(rows[2]["role"], Value::Null);
    assert!(rows[0]["id"].is_i64());
}

#[tokio::test]
async fn test_source_applies_filters() {
    let db = TestDatabase::new().await;
    seed_users(&db).await;
    let source = db.export_source();

    let admins = source
        .fetch("users", &filters(json!({"role": "admin"})))
        .await
        .unwrap();
    assert_eq!(admins.len(), 1);
    assert_eq!(admins[0]["email"], json!("ann@example.com"));

    let unranked = source
        .fetch("users", &filters(json!({"role": null})))
        .await
        .unwrap();
    assert_eq!(unranked.len(), 1);
    assert_eq!(unranked[0]["email"], json!("cy@example.com"));

    let scored = source
        .fetch("users", &filters(json!({"score": 4.0})))
        .await
        .unwrap();
    assert_eq!(scored.len(), 1);
}

#[tokio::test]
async fn test_source_rejects_unknown_and_unsafe_names() {
    let db = TestDatabase::new().await;
    seed_users(&db).await;
    let source = db.export_source();

    let err = source.fetch("orders", &ExportRow::new()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(name) if name == "orders"));

    let err = source
        .fetch("users; DROP TABLE queues", &ExportRow::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid export source name"));

    let err = source
        .fetch("users", &filters(json!({"role OR 1=1": "x"})))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid export filter name"));

    let err = source
        .fetch("users", &filters(json!({"role": ["admin"]})))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("must be a scalar"));
}
