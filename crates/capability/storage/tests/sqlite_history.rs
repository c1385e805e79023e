use domain::{DataPoint, ValueType};
use gw_storage::{
    DATA_MIGRATIONS, HistoryStore, PointQuery, PoolSettings, SqliteHistoryStore, connect_sqlite,
    run_migrations,
};

fn point(device_id: i64, field: &str, value: &str, ts: i64) -> DataPoint {
    DataPoint {
        id: 0,
        device_id,
        device_name: format!("dev-{}", device_id),
        field_name: field.to_string(),
        value: value.to_string(),
        value_type: ValueType::infer(value),
        collected_at_ms: ts,
    }
}

async fn open_store(dir: &tempfile::TempDir) -> SqliteHistoryStore {
    let path = dir.path().join("data.db");
    let pool = connect_sqlite(path.to_str().expect("path"), PoolSettings::default())
        .await
        .expect("connect");
    run_migrations(&pool, DATA_MIGRATIONS).await.expect("migrate");
    SqliteHistoryStore::new(pool)
}

#[tokio::test]
async fn replayed_batch_does_not_duplicate_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir).await;
    let batch = vec![
        point(1, "temp", "25.5", 1_000),
        point(1, "hum", "60", 1_000),
        point(2, "temp", "18", 1_000),
    ];

    let first = store.insert_points(&batch).await.expect("insert");
    let second = store.insert_points(&batch).await.expect("replay");

    assert_eq!(first, 3);
    assert_eq!(second, 0);
    assert_eq!(store.count_points().await.expect("count"), 3);
}

#[tokio::test]
async fn query_filters_and_orders_newest_first() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir).await;
    store
        .insert_points(&[
            point(1, "temp", "20", 1_000),
            point(1, "temp", "21", 2_000),
            point(1, "temp", "22", 3_000),
            point(1, "hum", "50", 2_000),
        ])
        .await
        .expect("insert");

    let rows = store
        .query_points(&PointQuery {
            device_id: Some(1),
            field_name: Some("temp".to_string()),
            start_ms: Some(1_500),
            end_ms: None,
            limit: 10,
        })
        .await
        .expect("query");

    let values: Vec<&str> = rows.iter().map(|p| p.value.as_str()).collect();
    assert_eq!(values, vec!["22", "21"]);
    assert_eq!(rows[0].value_type, ValueType::Int);
}

#[tokio::test]
async fn retention_deletes_rows_older_than_cutoff() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir).await;
    store
        .insert_points(&[point(1, "temp", "1", 100), point(1, "temp", "2", 200)])
        .await
        .expect("insert");

    let deleted = store.delete_points_before(150).await.expect("delete");

    assert_eq!(deleted, 1);
    assert_eq!(store.count_points().await.expect("count"), 1);
}
