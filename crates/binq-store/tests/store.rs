use binq_store::Store;
use chrono::{Duration, Utc};

#[tokio::test]
async fn create_queue_rejects_duplicate_name() {
    let store = Store::open_in_memory().unwrap();
    store.create_queue("q".into(), 4).await.unwrap();
    let err = store.create_queue("q".into(), 8).await.unwrap_err();
    assert!(matches!(err, binq_store::StoreError::DuplicateQueue(_)));
}

#[tokio::test]
async fn published_message_is_visible_until_locked() {
    let store = Store::open_in_memory().unwrap();
    store.create_queue("q".into(), 4).await.unwrap();
    store
        .create_message("q".into(), 1, b"A".to_vec(), None, None)
        .await
        .unwrap();

    let visible = store
        .find_visible("q".into(), vec![1, 2, 3, 4], 100)
        .await
        .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].data, b"A");
}

#[tokio::test]
async fn locked_message_disappears_until_lock_expires() {
    let store = Store::open_in_memory().unwrap();
    store.create_queue("q".into(), 4).await.unwrap();
    let id = store
        .create_message("q".into(), 1, b"A".to_vec(), None, None)
        .await
        .unwrap();

    store
        .lock_messages(vec![id], Utc::now() + Duration::minutes(10))
        .await
        .unwrap();
    let visible = store
        .find_visible("q".into(), vec![1], 100)
        .await
        .unwrap();
    assert!(visible.is_empty(), "locked message must not be visible");

    // Simulate expiry by re-locking into the past.
    store
        .lock_messages(vec![id], Utc::now() - Duration::seconds(1))
        .await
        .unwrap();
    let visible = store
        .find_visible("q".into(), vec![1], 100)
        .await
        .unwrap();
    assert_eq!(visible.len(), 1, "expired lock must become visible again");
}

#[tokio::test]
async fn ack_is_idempotent() {
    let store = Store::open_in_memory().unwrap();
    store.create_queue("q".into(), 4).await.unwrap();
    let id = store
        .create_message("q".into(), 1, b"A".to_vec(), None, None)
        .await
        .unwrap();

    store.soft_delete(vec![id]).await.unwrap();
    let after_first = store.find_visible("q".into(), vec![1], 100).await.unwrap();

    store.soft_delete(vec![id]).await.unwrap();
    let after_second = store.find_visible("q".into(), vec![1], 100).await.unwrap();

    assert!(after_first.is_empty());
    assert!(after_second.is_empty());
}

#[tokio::test]
async fn find_visible_only_returns_requested_partitions() {
    let store = Store::open_in_memory().unwrap();
    store.create_queue("q".into(), 4).await.unwrap();
    for p in 1..=4u32 {
        store
            .create_message("q".into(), p, vec![p as u8], None, None)
            .await
            .unwrap();
    }

    let visible = store.find_visible("q".into(), vec![1, 3], 100).await.unwrap();
    let partitions: Vec<u32> = visible.iter().map(|m| m.partition).collect();
    assert_eq!(partitions, vec![1, 3]);
}

#[tokio::test]
async fn hard_delete_only_removes_old_tombstones() {
    let store = Store::open_in_memory().unwrap();
    store.create_queue("q".into(), 4).await.unwrap();
    let id = store
        .create_message("q".into(), 1, b"A".to_vec(), None, None)
        .await
        .unwrap();
    store.soft_delete(vec![id]).await.unwrap();

    let deleted = store
        .hard_delete_tombstones(Utc::now() - Duration::days(1))
        .await
        .unwrap();
    assert_eq!(deleted, 0, "tombstone is younger than the cutoff");

    let deleted = store
        .hard_delete_tombstones(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(deleted, 1);
}
