mod common;

use std::sync::Arc;

use common::setup_db;
use goodjob::concurrency::ConcurrencyLimiter;
use goodjob::executor::Executor;
use goodjob::fetch::Fetcher;
use goodjob::handler::{BoxFuture, HandlerRegistry, Outcome};
use goodjob::jobs::{ExecutionsRepo, JobsRepo, NewJob};
use goodjob::pause::PauseRegistry;
use serial_test::serial;
use uuid::Uuid;

fn new_job(job_class: &str) -> NewJob {
    let payload = serde_json::json!({
        "job_class": job_class,
        "job_id": Uuid::new_v4(),
        "queue_name": "default",
        "priority": null,
        "arguments": [],
        "executions": 0,
    });
    NewJob::new(job_class, "default", payload)
}

fn boxed<'a, T>(fut: impl std::future::Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(fut)
}

#[tokio::test]
#[serial]
async fn happy_path_fetch_execute_succeeds() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let executions = ExecutionsRepo::new(pool.clone());
    let pauses = Arc::new(PauseRegistry::new(pool.clone()));
    let limiter = Arc::new(ConcurrencyLimiter::new(pool.clone(), executions.clone()));
    let process_id = Uuid::new_v4();

    let fetcher = Fetcher::new(pool.clone(), jobs.clone(), pauses, limiter, process_id);

    let mut registry = HandlerRegistry::new();
    registry.register("EchoJob", |_job, _args| {
        boxed(async move { Outcome::Ok(serde_json::json!({"ok": true})) })
    });
    let executor = Executor::new(pool.clone(), Arc::new(registry), executions.clone(), 5, process_id);

    let enqueued = jobs.enqueue(new_job("EchoJob")).await.unwrap();

    let claimed = fetcher
        .fetch_one(&[], 5)
        .await
        .unwrap()
        .expect("expected a claimed job");
    assert_eq!(claimed.job.id, enqueued.id);

    executor.execute(claimed).await.unwrap();

    let finished = jobs.find_by_id(enqueued.id).await.unwrap().unwrap();
    assert!(finished.finished_at.is_some());
    assert!(finished.error.is_none());

    let runs = executions.list_for_job(enqueued.id).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].finished_at.is_some());
}

#[tokio::test]
#[serial]
async fn claimed_job_is_invisible_to_a_second_fetch() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let executions = ExecutionsRepo::new(pool.clone());
    let pauses = Arc::new(PauseRegistry::new(pool.clone()));
    let limiter = Arc::new(ConcurrencyLimiter::new(pool.clone(), executions));
    let process_id = Uuid::new_v4();
    let fetcher = Fetcher::new(pool.clone(), jobs.clone(), pauses, limiter, process_id);

    jobs.enqueue(new_job("EchoJob")).await.unwrap();

    let first = fetcher.fetch_one(&[], 5).await.unwrap();
    assert!(first.is_some());

    // The row is now performing (locked) — a second fetch must not see it,
    // even though its advisory lock is held by a live connection in this
    // same process.
    let second = fetcher.fetch_one(&[], 5).await.unwrap();
    assert!(second.is_none());

    first.unwrap().release().await.unwrap();
}

#[tokio::test]
#[serial]
async fn unregistered_job_class_is_discarded() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let executions = ExecutionsRepo::new(pool.clone());
    let pauses = Arc::new(PauseRegistry::new(pool.clone()));
    let limiter = Arc::new(ConcurrencyLimiter::new(pool.clone(), executions.clone()));
    let process_id = Uuid::new_v4();
    let fetcher = Fetcher::new(pool.clone(), jobs.clone(), pauses, limiter, process_id);
    let executor = Executor::new(pool.clone(), Arc::new(HandlerRegistry::new()), executions, 5, process_id);

    let enqueued = jobs.enqueue(new_job("NoSuchHandler")).await.unwrap();
    let claimed = fetcher.fetch_one(&[], 5).await.unwrap().unwrap();
    executor.execute(claimed).await.unwrap();

    let finished = jobs.find_by_id(enqueued.id).await.unwrap().unwrap();
    assert!(finished.finished_at.is_some());
    assert!(finished.error.as_deref().unwrap().contains("no handler"));
}
