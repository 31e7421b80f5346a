//! Redis job store integration tests.

use std::time::Duration;

use vproc_models::{JobState, Priority, VideoId};
use vproc_queue::{EnqueueRequest, JobStore, QueueConfig, QueueError, RedisJobStore, StatusQuery};

const LEASE: Duration = Duration::from_secs(60);

/// Store under a throwaway prefix so runs do not see each other.
fn store(max_active: usize) -> RedisJobStore {
    dotenvy::dotenv().ok();

    let config = QueueConfig {
        key_prefix: format!("vproc:test:{}", uuid::Uuid::new_v4()),
        max_active,
        ..QueueConfig::from_env()
    };
    RedisJobStore::new(config).expect("Failed to create store")
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    let store = store(2);
    store.ping().await.expect("Failed to ping Redis");

    let stats = store.stats().await.expect("Failed to get stats");
    assert_eq!(stats.total(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_enqueue_is_idempotent() {
    let store = store(2);

    let first = store
        .enqueue(EnqueueRequest::new("v1", "/srv/uploads/v1.mp4"))
        .await
        .expect("Failed to enqueue");
    let second = store
        .enqueue(EnqueueRequest::new("v1", "/srv/uploads/v1.mp4"))
        .await
        .expect("Failed to enqueue");

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.job_id, second.job_id);
    assert_eq!(store.stats().await.unwrap().waiting, 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dequeue_cap_and_priority() {
    let store = store(2);
    store
        .enqueue(EnqueueRequest::new("low", "/srv/low.mp4").with_priority(Priority::LOW))
        .await
        .unwrap();
    store.enqueue(EnqueueRequest::new("a", "/srv/a.mp4")).await.unwrap();
    store.enqueue(EnqueueRequest::new("b", "/srv/b.mp4")).await.unwrap();

    let first = store.dequeue("w1", LEASE).await.unwrap().unwrap();
    let second = store.dequeue("w2", LEASE).await.unwrap().unwrap();
    assert_eq!(first.video_id, VideoId::from("a"));
    assert_eq!(second.video_id, VideoId::from("b"));
    assert_eq!(first.state, JobState::Active);
    assert_eq!(first.attempts, 1);
    assert_eq!(first.worker_id.as_deref(), Some("w1"));

    assert!(store.dequeue("w3", LEASE).await.unwrap().is_none());

    store.mark_completed(&first.id).await.unwrap();
    let third = store.dequeue("w3", LEASE).await.unwrap().unwrap();
    assert_eq!(third.video_id, VideoId::from("low"));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_retry_then_fail() {
    let store = store(1);
    let handle = store
        .enqueue(EnqueueRequest::new("v1", "/srv/v1.mp4"))
        .await
        .unwrap();

    store.dequeue("w1", LEASE).await.unwrap().unwrap();
    store.mark_progress(&handle.job_id, 10).await.unwrap();
    store
        .retry_later(&handle.job_id, "media probe failed", Duration::from_millis(100))
        .await
        .unwrap();
    assert!(store.dequeue("w1", LEASE).await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(150)).await;
    let job = store.dequeue("w1", LEASE).await.unwrap().unwrap();
    assert_eq!(job.attempts, 2);
    assert_eq!(job.progress_percent, 10);

    store.mark_failed(&job.id, "media probe failed").await.unwrap();

    let query = StatusQuery::new(std::sync::Arc::new(store));
    let response = query
        .get_processing_status(&VideoId::from("v1"))
        .await
        .unwrap();
    assert_eq!(response.error.as_deref(), Some("media probe failed"));
    assert_eq!(response.attempts, Some(2));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_recover_stalled() {
    let store = store(1);
    let handle = store
        .enqueue(EnqueueRequest::new("v1", "/srv/v1.mp4"))
        .await
        .unwrap();
    store
        .dequeue("w1", Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let report = store.recover_stalled().await.unwrap();
    assert_eq!(report.requeued, vec![handle.job_id.clone()]);
    assert!(report.failed.is_empty());

    let status = store.get_status(&handle.job_id).await.unwrap().unwrap();
    assert_eq!(status.state, JobState::Waiting);
    assert_eq!(status.queue_position, Some(0));
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_recovered_job_rejects_the_old_worker() {
    let store = store(1);
    let handle = store
        .enqueue(EnqueueRequest::new("v1", "/srv/v1.mp4"))
        .await
        .unwrap();
    store
        .dequeue("w1", Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.recover_stalled().await.unwrap().requeued.len(), 1);

    // w1 comes back after its lease was taken away
    let err = store.mark_completed(&handle.job_id).await.unwrap_err();
    assert!(matches!(err, QueueError::InvalidState { state: JobState::Waiting, .. }));
    assert!(store.mark_progress(&handle.job_id, 50).await.is_err());

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.waiting, 1);
    assert_eq!(stats.completed, 0);

    // w2 picks it up; w1's late failure report must not land either
    let job = store.dequeue("w2", LEASE).await.unwrap().unwrap();
    assert_eq!(job.attempts, 2);
    store.mark_progress(&job.id, 40).await.unwrap();
    store.mark_completed(&job.id).await.unwrap();
    assert!(store.mark_failed(&job.id, "late").await.is_err());

    let job = store.get_job(&handle.job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.last_error, None);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_closed_store_refuses_new_jobs() {
    let store = store(1);
    store.close().await.unwrap();
    let err = store
        .enqueue(EnqueueRequest::new("v1", "/srv/v1.mp4"))
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Closed));
    assert!(store.dequeue("w1", LEASE).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_retention_and_sweep() {
    let store = RedisJobStore::new(QueueConfig {
        keep_completed: 2,
        max_active: 1,
        ..store(1).config().clone()
    })
    .unwrap();

    for id in ["v1", "v2", "v3"] {
        store
            .enqueue(EnqueueRequest::new(id, format!("/srv/{}.mp4", id)))
            .await
            .unwrap();
        let job = store.dequeue("w1", LEASE).await.unwrap().unwrap();
        store.mark_completed(&job.id).await.unwrap();
    }
    assert_eq!(store.stats().await.unwrap().completed, 2);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = store
        .sweep_old(Duration::from_millis(1), Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(report.completed_removed, 2);
    assert_eq!(store.stats().await.unwrap().completed, 0);
}
