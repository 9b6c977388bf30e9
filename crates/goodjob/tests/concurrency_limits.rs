mod common;

use common::setup_db;
use goodjob::concurrency::{CheckOutcome, ConcurrencyConfig, ConcurrencyLimiter};
use goodjob::jobs::{ExecutionsRepo, JobsRepo, NewJob};
use serial_test::serial;

fn new_job(concurrency_key: &str) -> NewJob {
    let mut job = NewJob::new("ThrottledJob", "default", serde_json::json!({ "arguments": [] }));
    job.concurrency_key = Some(concurrency_key.to_string());
    job
}

#[tokio::test]
#[serial]
async fn enqueue_is_blocked_once_total_limit_is_reached() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let executions = ExecutionsRepo::new(pool.clone());
    let limiter = ConcurrencyLimiter::new(pool.clone(), executions);
    limiter.configure(
        "ThrottledJob",
        ConcurrencyConfig {
            total_limit: Some(1),
            ..Default::default()
        },
    );

    jobs.enqueue(new_job("tenant-1")).await.unwrap();

    let outcome = limiter.check_enqueue("ThrottledJob", "tenant-1").await.unwrap();
    assert_eq!(outcome, CheckOutcome::LimitExceeded);

    // A different key is an entirely separate slot.
    let outcome_other_key = limiter.check_enqueue("ThrottledJob", "tenant-2").await.unwrap();
    assert_eq!(outcome_other_key, CheckOutcome::Ok);
}

#[tokio::test]
#[serial]
async fn perform_is_blocked_while_another_job_with_the_same_key_is_running() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let executions = ExecutionsRepo::new(pool.clone());
    let limiter = ConcurrencyLimiter::new(pool.clone(), executions);
    limiter.configure(
        "ThrottledJob",
        ConcurrencyConfig {
            perform_limit: Some(1),
            ..Default::default()
        },
    );

    let running = jobs.enqueue(new_job("tenant-1")).await.unwrap();
    sqlx::query("UPDATE good_jobs SET performed_at = now(), locked_by_id = gen_random_uuid() WHERE id = $1")
        .bind(running.id)
        .execute(&pool)
        .await
        .unwrap();

    let allowed = limiter.allow_perform("ThrottledJob", "tenant-1").await.unwrap();
    assert!(!allowed);
}

#[tokio::test]
#[serial]
async fn unconfigured_job_classes_are_unlimited() {
    let pool = setup_db().await;
    let executions = ExecutionsRepo::new(pool.clone());
    let limiter = ConcurrencyLimiter::new(pool.clone(), executions);

    let outcome = limiter.check_enqueue("AnyJob", "whatever").await.unwrap();
    assert_eq!(outcome, CheckOutcome::Ok);
    assert!(limiter.allow_perform("AnyJob", "whatever").await.unwrap());
}
