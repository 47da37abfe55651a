mod mock_store;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use pipeline::db::Db;
use pipeline::store::{SqlxUpdateStore, UpdateStore};
use pipeline::time::now_ms;

use mock_store::update;

/// Isolated, uniquely named in-memory SQLite database per test.
async fn setup_db(retention: Duration) -> Db {
    let conn_str = format!("sqlite:file:{}?mode=memory&cache=shared", Uuid::new_v4());
    let db = Db::connect(&conn_str).await.unwrap();
    db.migrate(retention).await.unwrap();
    db
}

const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[tokio::test]
async fn append_then_query_latest_round_trips() {
    let db = setup_db(WEEK).await;
    let store = SqlxUpdateStore::new(db.pool.clone());

    let original = update(1, Some("101.25"));
    let seq = store.append(&original).await.unwrap();

    let rows = store.query_latest(10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].seq, seq);
    assert_eq!(rows[0].update, original);
    assert!(rows[0].created_at.timestamp_millis() > 0);
}

#[tokio::test]
async fn query_latest_is_newest_first_and_limited() {
    let db = setup_db(WEEK).await;
    let store = SqlxUpdateStore::new(db.pool.clone());

    // Inserted out of timestamp order on purpose.
    for i in [3, 1, 4, 2, 5] {
        store.append(&update(i, Some("1"))).await.unwrap();
    }

    let rows = store.query_latest(3).await.unwrap();
    let ids: Vec<i64> = rows.iter().map(|r| r.update.data.first_update_id / 10).collect();
    assert_eq!(ids, vec![5, 4, 3]);
}

#[tokio::test]
async fn equal_timestamps_break_ties_by_insertion_order() {
    let db = setup_db(WEEK).await;
    let store = SqlxUpdateStore::new(db.pool.clone());

    let ts = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
    let mut seqs = Vec::new();
    for i in 0..3 {
        let mut u = update(i, Some("1"));
        u.timestamp = ts;
        seqs.push(store.append(&u).await.unwrap());
    }

    let rows = store.query_latest(3).await.unwrap();
    let got: Vec<i64> = rows.iter().map(|r| r.seq).collect();
    seqs.reverse();
    assert_eq!(got, seqs);
}

async fn insert_stale(db: &Db, age_ms: i64) {
    sqlx::query(
        r#"
INSERT INTO order_book_updates
  (event_type, event_time, symbol, first_update_id, final_update_id, bids, asks, ts_ms, created_at_ms)
VALUES ('depthUpdate', 1, 'BTCUSDT', 1, 1, '[["1","1"]]', '[]', 1, ?);
"#,
    )
    .bind(now_ms() as i64 - age_ms)
    .execute(&db.pool)
    .await
    .unwrap();
}

async fn row_count(db: &Db) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM order_book_updates;")
        .fetch_one(&db.pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn expired_rows_are_hidden_without_further_inserts() {
    let db = setup_db(Duration::from_secs(60)).await;
    let store = SqlxUpdateStore::new(db.pool.clone());

    // Two minutes old, outside the one-minute window. Nothing is written
    // afterwards, so the row is still physically present.
    insert_stale(&db, 120_000).await;
    assert_eq!(row_count(&db).await, 1);

    assert!(store.query_latest(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn expired_rows_are_deleted_on_next_append() {
    let db = setup_db(Duration::from_secs(60)).await;
    let store = SqlxUpdateStore::new(db.pool.clone());

    insert_stale(&db, 120_000).await;
    store.append(&update(2, Some("2"))).await.unwrap();

    assert_eq!(row_count(&db).await, 1);
    let rows = store.query_latest(10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].update.data.first_bid_price(), Some("2"));
}

#[tokio::test]
async fn rows_just_inside_retention_are_visible() {
    let db = setup_db(Duration::from_secs(60)).await;
    let store = SqlxUpdateStore::new(db.pool.clone());

    insert_stale(&db, 30_000).await;
    assert_eq!(store.query_latest(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn rows_within_retention_survive() {
    let db = setup_db(WEEK).await;
    let store = SqlxUpdateStore::new(db.pool.clone());

    for i in 0..5 {
        store.append(&update(i, Some("1"))).await.unwrap();
    }
    assert_eq!(store.query_latest(100).await.unwrap().len(), 5);
}

#[tokio::test]
async fn malformed_rows_are_skipped_on_read() {
    let db = setup_db(WEEK).await;
    let store = SqlxUpdateStore::new(db.pool.clone());

    store.append(&update(1, Some("1"))).await.unwrap();
    sqlx::query(
        r#"
INSERT INTO order_book_updates
  (event_type, event_time, symbol, first_update_id, final_update_id, bids, asks, ts_ms)
VALUES ('depthUpdate', 1, 'BTCUSDT', 1, 1, 'not json', '[]', 9999999999999);
"#,
    )
    .execute(&db.pool)
    .await
    .unwrap();

    let rows = store.query_latest(10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].update.data.first_bid_price(), Some("1"));
}

#[tokio::test]
async fn migrate_is_idempotent_and_updates_retention() {
    let db = setup_db(WEEK).await;
    db.migrate(Duration::from_secs(30)).await.unwrap();

    let secs: i64 = sqlx::query_scalar(
        "SELECT expire_after_secs FROM retention_policies WHERE collection = 'order_book_updates';",
    )
    .fetch_one(&db.pool)
    .await
    .unwrap();
    assert_eq!(secs, 30);
    db.ping().await.unwrap();
}
