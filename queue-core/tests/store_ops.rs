use chrono::{Duration, Utc};
use queue_core::{JobState, NewJob, QueueError, Store};
use tempfile::TempDir;

async fn open_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let store = Store::open(dir.path().join("queuectl.db"))
        .await
        .expect("failed to open store");
    (dir, store)
}

fn new_job(id: &str) -> NewJob {
    NewJob {
        id: id.to_owned(),
        command: "echo ok".to_owned(),
        max_retries: None,
    }
}

#[tokio::test]
async fn create_sets_pending_with_config_default_budget() {
    let (_dir, store) = open_store().await;
    let now = Utc::now();

    let job = store.create_job(new_job("a"), now).await.unwrap();

    assert_eq!(job.id, "a");
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_retries, 3);
    assert_eq!(job.created_at, job.updated_at);
    assert!(job.locked_by.is_none());
    assert!(job.locked_at.is_none());
    assert!(job.retry_at.is_none());
}

#[tokio::test]
async fn create_rejects_duplicate_ids() {
    let (_dir, store) = open_store().await;
    let now = Utc::now();

    store.create_job(new_job("a"), now).await.unwrap();
    let err = store.create_job(new_job("a"), now).await.unwrap_err();

    assert!(matches!(err, QueueError::AlreadyExists(id) if id == "a"));
}

#[tokio::test]
async fn explicit_budget_overrides_config_default() {
    let (_dir, store) = open_store().await;
    let job = store
        .create_job(
            NewJob {
                id: "a".to_owned(),
                command: "echo ok".to_owned(),
                max_retries: Some(7),
            },
            Utc::now(),
        )
        .await
        .unwrap();

    assert_eq!(job.max_retries, 7);
}

#[tokio::test]
async fn budget_is_snapshotted_at_creation() {
    let (_dir, store) = open_store().await;
    let now = Utc::now();

    store.set_config("max_retries", "7").await.unwrap();
    let job = store.create_job(new_job("a"), now).await.unwrap();
    assert_eq!(job.max_retries, 7);

    // Later config changes must not reach back into existing rows.
    store.set_config("max_retries", "1").await.unwrap();
    assert_eq!(store.job("a").await.unwrap().max_retries, 7);

    let fresh = store.create_job(new_job("b"), now).await.unwrap();
    assert_eq!(fresh.max_retries, 1);
}

#[tokio::test]
async fn get_unknown_job_is_not_found() {
    let (_dir, store) = open_store().await;
    let err = store.job("ghost").await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(id) if id == "ghost"));
}

#[tokio::test]
async fn lease_is_fifo_over_pending_jobs() {
    let (_dir, store) = open_store().await;
    let t0 = Utc::now();

    store.create_job(new_job("late"), t0 + Duration::seconds(5)).await.unwrap();
    store.create_job(new_job("early"), t0).await.unwrap();

    let first = store.lease_next("w1", t0 + Duration::seconds(10)).await.unwrap().unwrap();
    let second = store.lease_next("w1", t0 + Duration::seconds(10)).await.unwrap().unwrap();

    assert_eq!(first.id, "early");
    assert_eq!(second.id, "late");
}

#[tokio::test]
async fn lease_marks_the_job_processing_and_locked() {
    let (_dir, store) = open_store().await;
    let now = Utc::now();
    store.create_job(new_job("a"), now).await.unwrap();

    let leased = store.lease_next("w1", now).await.unwrap().unwrap();

    assert_eq!(leased.state, JobState::Processing);
    assert_eq!(leased.locked_by.as_deref(), Some("w1"));
    assert!(leased.locked_at.is_some());
    assert!(leased.retry_at.is_none());

    // Nothing else is eligible.
    assert!(store.lease_next("w2", now).await.unwrap().is_none());
}

#[tokio::test]
async fn retry_ready_failed_jobs_lease_before_pending_ones() {
    let (_dir, store) = open_store().await;
    let t0 = Utc::now();

    store.create_job(new_job("pending"), t0).await.unwrap();
    store.create_job(new_job("flaky"), t0).await.unwrap();

    let leased = store.lease_next("w1", t0).await.unwrap().unwrap();
    store
        .mark_failed_for_retry(&leased.id, t0, t0 + Duration::seconds(1))
        .await
        .unwrap();

    // Past the retry gate the failed job outranks the pending one.
    let next = store.lease_next("w1", t0 + Duration::seconds(2)).await.unwrap().unwrap();
    assert_eq!(next.id, leased.id);
    assert_eq!(next.state, JobState::Processing);
}

#[tokio::test]
async fn failed_jobs_are_gated_until_retry_at_elapses() {
    let (_dir, store) = open_store().await;
    let t0 = Utc::now();

    store.create_job(new_job("flaky"), t0).await.unwrap();
    let leased = store.lease_next("w1", t0).await.unwrap().unwrap();
    store
        .mark_failed_for_retry(&leased.id, t0, t0 + Duration::seconds(60))
        .await
        .unwrap();

    assert!(store.lease_next("w1", t0 + Duration::seconds(30)).await.unwrap().is_none());

    let relased = store.lease_next("w1", t0 + Duration::seconds(61)).await.unwrap();
    assert_eq!(relased.unwrap().id, "flaky");
}

#[tokio::test]
async fn completion_requires_a_processing_lease() {
    let (_dir, store) = open_store().await;
    let now = Utc::now();
    store.create_job(new_job("a"), now).await.unwrap();

    let err = store.mark_completed("a", now).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::IllegalTransition {
            from: JobState::Pending,
            to: JobState::Completed,
            ..
        }
    ));

    let err = store.mark_completed("ghost", now).await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(_)));
}

#[tokio::test]
async fn completed_jobs_are_terminal() {
    let (_dir, store) = open_store().await;
    let now = Utc::now();
    store.create_job(new_job("a"), now).await.unwrap();
    store.lease_next("w1", now).await.unwrap().unwrap();
    store.mark_completed("a", now).await.unwrap();

    // A completed job can be neither leased nor transitioned again.
    assert!(store.lease_next("w1", now + Duration::seconds(5)).await.unwrap().is_none());
    assert!(store.mark_dead("a", now).await.is_err());

    let job = store.job("a").await.unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert!(job.locked_by.is_none());
    assert!(job.locked_at.is_none());
}

#[tokio::test]
async fn attempts_increment_and_survive_failure_transitions() {
    let (_dir, store) = open_store().await;
    let now = Utc::now();
    store.create_job(new_job("a"), now).await.unwrap();
    store.lease_next("w1", now).await.unwrap().unwrap();

    assert_eq!(store.increment_attempts("a", now).await.unwrap(), 1);
    store
        .mark_failed_for_retry("a", now, now + Duration::seconds(2))
        .await
        .unwrap();

    let job = store.job("a").await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.retry_at, Some(job.updated_at + Duration::seconds(2)));

    let err = store.increment_attempts("ghost", now).await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(_)));
}

#[tokio::test]
async fn dlq_retry_round_trip_resets_the_job() {
    let (_dir, store) = open_store().await;
    let now = Utc::now();
    store
        .create_job(
            NewJob {
                id: "doomed".to_owned(),
                command: "exit 1".to_owned(),
                max_retries: Some(1),
            },
            now,
        )
        .await
        .unwrap();

    store.lease_next("w1", now).await.unwrap().unwrap();
    store.increment_attempts("doomed", now).await.unwrap();
    store.mark_dead("doomed", now).await.unwrap();
    assert_eq!(store.job("doomed").await.unwrap().state, JobState::Dead);

    store.reset_to_pending("doomed", now).await.unwrap();

    let job = store.job("doomed").await.unwrap();
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);
    assert!(job.retry_at.is_none());
    assert!(job.locked_by.is_none());

    let err = store.reset_to_pending("ghost", now).await.unwrap_err();
    assert!(matches!(err, QueueError::NotFound(_)));
}

#[tokio::test]
async fn listing_filters_by_state_and_returns_newest_first() {
    let (_dir, store) = open_store().await;
    let t0 = Utc::now();

    store.create_job(new_job("old"), t0).await.unwrap();
    store.create_job(new_job("new"), t0 + Duration::seconds(3)).await.unwrap();

    let all = store.list_jobs(None).await.unwrap();
    assert_eq!(
        all.iter().map(|j| j.id.as_str()).collect::<Vec<_>>(),
        vec!["new", "old"]
    );

    store.lease_next("w1", t0 + Duration::seconds(4)).await.unwrap().unwrap();

    let pending = store.list_jobs(Some(JobState::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "new");

    assert!(store.list_jobs(Some(JobState::Dead)).await.unwrap().is_empty());
}

#[tokio::test]
async fn stats_cover_every_state_even_when_zero() {
    let (_dir, store) = open_store().await;
    let now = Utc::now();

    let counts = store.stats_by_state().await.unwrap();
    for (_, count) in counts.iter() {
        assert_eq!(count, 0);
    }

    store.create_job(new_job("a"), now).await.unwrap();
    store.create_job(new_job("b"), now).await.unwrap();
    store.lease_next("w1", now).await.unwrap().unwrap();

    let counts = store.stats_by_state().await.unwrap();
    assert_eq!(counts.pending, 1);
    assert_eq!(counts.processing, 1);
    assert_eq!(counts.completed, 0);
    assert_eq!(counts.total(), 2);
}

#[tokio::test]
async fn config_defaults_are_seeded_on_first_open() {
    let (_dir, store) = open_store().await;

    assert_eq!(store.get_config("max_retries").await.unwrap().as_deref(), Some("3"));
    assert_eq!(store.get_config("backoff_base").await.unwrap().as_deref(), Some("2"));
    assert_eq!(store.get_config("unknown").await.unwrap(), None);

    store.set_config("backoff_base", "1.5").await.unwrap();
    assert_eq!(store.backoff_base().await.unwrap(), 1.5);
}

#[tokio::test]
async fn state_survives_reopening_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queuectl.db");
    let now = Utc::now();

    let created = {
        let store = Store::open(&path).await.unwrap();
        store.create_job(new_job("e"), now).await.unwrap()
    };

    let store = Store::open(&path).await.unwrap();
    let reloaded = store.job("e").await.unwrap();

    assert_eq!(reloaded, created);
    assert_eq!(reloaded.state, JobState::Pending);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_never_double_lease() {
    let (_dir, store) = open_store().await;
    let now = Utc::now();

    for i in 0..5 {
        store.create_job(new_job(&format!("job-{i}")), now).await.unwrap();
    }

    let mut handles = Vec::new();
    for worker in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let worker_id = format!("worker-{worker}");
            let mut leased = Vec::new();
            while let Some(job) = store.lease_next(&worker_id, Utc::now()).await.unwrap() {
                leased.push(job.id);
            }
            leased
        }));
    }

    let mut seen = Vec::new();
    for handle in handles {
        seen.extend(handle.await.unwrap());
    }

    seen.sort();
    let total = seen.len();
    seen.dedup();
    assert_eq!(total, 5, "every job leased exactly once");
    assert_eq!(seen.len(), 5, "no job leased twice");
}
