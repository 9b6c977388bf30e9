mod common;

use std::time::Duration;

use common::setup_db;
use goodjob::cleanup::Lifeline;
use goodjob::jobs::{JobsRepo, NewJob};
use serial_test::serial;
use uuid::Uuid;

#[tokio::test]
#[serial]
async fn rescues_a_row_whose_lock_is_not_actually_held() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());

    let job = jobs
        .enqueue(NewJob::new("StuckJob", "default", serde_json::json!({ "arguments": [] })))
        .await
        .unwrap();

    // Simulate a worker that claimed the row, stamped it, and then died
    // without releasing its session-level advisory lock (the connection
    // simply closed, which Postgres already cleans up).
    sqlx::query(
        r#"
        UPDATE good_jobs
        SET performed_at = now() - interval '10 minutes',
            locked_at = now() - interval '10 minutes',
            locked_by_id = $2,
            executions_count = 1
        WHERE id = $1
        "#,
    )
    .bind(job.id)
    .bind(Uuid::new_v4())
    .execute(&pool)
    .await
    .unwrap();

    let lifeline = Lifeline::new(pool.clone(), Duration::from_secs(60));
    let rescued = lifeline.run_once().await.unwrap();
    assert_eq!(rescued, 1);

    let row = jobs.find_by_id(job.id).await.unwrap().unwrap();
    assert!(row.performed_at.is_none());
    assert!(row.locked_by_id.is_none());
    assert!(row.finished_at.is_none());
}

#[tokio::test]
#[serial]
async fn leaves_a_recently_locked_row_alone() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());

    let job = jobs
        .enqueue(NewJob::new("StuckJob", "default", serde_json::json!({ "arguments": [] })))
        .await
        .unwrap();

    sqlx::query(
        r#"
        UPDATE good_jobs
        SET performed_at = now(), locked_at = now(), locked_by_id = $2
        WHERE id = $1
        "#,
    )
    .bind(job.id)
    .bind(Uuid::new_v4())
    .execute(&pool)
    .await
    .unwrap();

    let lifeline = Lifeline::new(pool.clone(), Duration::from_secs(300));
    let rescued = lifeline.run_once().await.unwrap();
    assert_eq!(rescued, 0);
}
