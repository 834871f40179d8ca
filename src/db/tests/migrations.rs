use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_database_creation() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path();

    let db = Database::new(db_path).await.unwrap();

    // Verify tables exist
    let mut conn = db.pool.acquire().await.unwrap();

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(&mut *conn)
            .await
            .unwrap();

    assert!(tables.contains(&"cdx_record_specimen".to_string()));
    assert!(tables.contains(&"memento_specimen".to_string()));
    assert!(tables.contains(&"memento_failure".to_string()));
    assert!(tables.contains(&"schema_version".to_string()));

    let triggers: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='trigger' ORDER BY name")
            .fetch_all(&mut *conn)
            .await
            .unwrap();

    assert_eq!(
        triggers,
        vec![
            "memento_failure_after_specimen".to_string(),
            "memento_specimen_after_failure".to_string(),
        ]
    );

    drop(conn);
    db.close().await;
}

#[tokio::test]
async fn test_reopen_does_not_reapply_migrations() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path();

    let db = Database::new(db_path).await.unwrap();
    db.insert_cdx_record(&super::new_record(1, Some(200)))
        .await
        .unwrap();
    db.close().await;

    let db = Database::new(db_path).await.unwrap();
    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_version")
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(versions, vec![1]);
    assert_eq!(db.count_cdx_records().await.unwrap(), 1);

    db.close().await;
}

#[tokio::test]
async fn test_database_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("gather.db");

    let db = Database::new(&db_path).await.unwrap();
    assert!(db_path.exists());

    db.close().await;
}
