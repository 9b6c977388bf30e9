mod common;

use std::sync::Arc;

use common::setup_db;
use goodjob::concurrency::ConcurrencyLimiter;
use goodjob::fetch::Fetcher;
use goodjob::jobs::{ExecutionsRepo, JobsRepo, NewJob};
use goodjob::pause::PauseRegistry;
use serial_test::serial;
use uuid::Uuid;

#[tokio::test]
#[serial]
async fn a_paused_queue_is_never_claimed() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let executions = ExecutionsRepo::new(pool.clone());
    let pauses = Arc::new(PauseRegistry::new(pool.clone()));
    let limiter = Arc::new(ConcurrencyLimiter::new(pool.clone(), executions));
    let fetcher = Fetcher::new(pool.clone(), jobs.clone(), pauses.clone(), limiter, Uuid::new_v4());

    jobs.enqueue(NewJob::new("AnyJob", "reports", serde_json::json!({ "arguments": [] })))
        .await
        .unwrap();

    pauses.pause_queue("reports").await.unwrap();
    assert!(fetcher.fetch_one(&[], 5).await.unwrap().is_none());

    pauses.unpause_queue("reports").await.unwrap();
    assert!(fetcher.fetch_one(&[], 5).await.unwrap().is_some());
}

#[tokio::test]
#[serial]
async fn a_paused_job_class_is_never_claimed() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let executions = ExecutionsRepo::new(pool.clone());
    let pauses = Arc::new(PauseRegistry::new(pool.clone()));
    let limiter = Arc::new(ConcurrencyLimiter::new(pool.clone(), executions));
    let fetcher = Fetcher::new(pool.clone(), jobs.clone(), pauses.clone(), limiter, Uuid::new_v4());

    jobs.enqueue(NewJob::new("QuarantinedJob", "default", serde_json::json!({ "arguments": [] })))
        .await
        .unwrap();

    pauses.pause_job_class("QuarantinedJob").await.unwrap();
    assert!(fetcher.fetch_one(&[], 5).await.unwrap().is_none());
    assert!(pauses.is_job_class_paused("QuarantinedJob").await.unwrap());
}
