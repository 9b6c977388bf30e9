mod common;

use std::time::Duration;

use common::setup_db;
use goodjob::cron::{CronEntry, CronManager};
use goodjob::jobs::JobsRepo;
use serial_test::serial;

/// Wide enough that `@daily`'s next occurrence always falls inside one tick
/// window, so both ticks below compute the same firing time and the second
/// one collides on `(cron_key, cron_at)`.
const WIDE_WINDOW: Duration = Duration::from_secs(25 * 3600);

fn daily_entry() -> CronEntry {
    CronEntry {
        key: "nightly_report".to_string(),
        expression: "@daily".to_string(),
        job_class: "NightlyReportJob".to_string(),
        arguments: Vec::new(),
        queue_name: "cron".to_string(),
        priority: None,
        enabled: true,
    }
}

#[tokio::test]
#[serial]
async fn two_ticks_in_the_same_window_fire_once() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let manager = CronManager::new(jobs.clone(), vec![daily_entry()]).with_tick_interval(WIDE_WINDOW);

    manager.tick().await.unwrap();
    manager.tick().await.unwrap();

    let rows = jobs.in_queue("cron").await.unwrap();
    assert_eq!(rows.len(), 1, "second tick's firing should be deduplicated");
    assert_eq!(rows[0].cron_key.as_deref(), Some("nightly_report"));
}

#[tokio::test]
#[serial]
async fn disabled_entry_never_fires() {
    let pool = setup_db().await;
    let jobs = JobsRepo::new(pool.clone());
    let mut entry = daily_entry();
    entry.enabled = false;
    let manager = CronManager::new(jobs.clone(), vec![entry]);

    manager.tick().await.unwrap();

    let rows = jobs.in_queue("cron").await.unwrap();
    assert!(rows.is_empty());
}
