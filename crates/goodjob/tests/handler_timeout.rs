mod common;

use std::sync::Arc;
use std::time::Duration;

use common::setup_db;
use goodjob::concurrency::ConcurrencyLimiter;
use goodjob::executor::Executor;
use goodjob::fetch::Fetcher;
use goodjob::handler::{BoxFuture, HandlerOptions, HandlerRegistry, Outcome};
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
async fn handler_exceeding_its_timeout_is_recorded_as_a_timed_out_error() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let executions = ExecutionsRepo::new(pool.clone());
    let pauses = Arc::new(PauseRegistry::new(pool.clone()));
    let limiter = Arc::new(ConcurrencyLimiter::new(pool.clone(), executions.clone()));
    let process_id = Uuid::new_v4();
    let fetcher = Fetcher::new(pool.clone(), jobs.clone(), pauses, limiter, process_id);

    let mut registry = HandlerRegistry::new();
    registry.register_with_options(
        "SlowJob",
        |_job, _args| boxed(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Outcome::Ok(serde_json::Value::Null)
        }),
        HandlerOptions::new().timeout(Duration::from_millis(20)),
    );
    let executor = Executor::new(pool.clone(), Arc::new(registry), executions, 25, process_id);

    let enqueued = jobs.enqueue(new_job("SlowJob")).await.unwrap();
    let claimed = fetcher.fetch_one(&[], 5).await.unwrap().unwrap();
    executor.execute(claimed).await.unwrap();

    let finished = jobs.find_by_id(enqueued.id).await.unwrap().unwrap();
    let error = finished.error.expect("timeout should be recorded as an error");
    assert!(error.contains("timed out"), "error was: {error}");
    assert!(
        error.contains(&enqueued.id.to_string()),
        "error should identify the job id, was: {error}"
    );
}
