//! Cron manager (spec §4.7): on each minute tick, compute each enabled
//! entry's next firing and attempt to insert a deduplicated job row for
//! it. `(cron_key, cron_at)` uniqueness is the whole dedup mechanism —
//! multiple cooperating processes racing the same tick is expected and
//! harmless.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use croner::{
    CronIterator, Direction,
    parser::{CronParser, Seconds},
};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::jobs::{JobsRepo, NewJob};

/// One entry in the cron table (spec §4.7).
#[derive(Debug, Clone)]
pub struct CronEntry {
    pub key: String,
    pub expression: String,
    pub job_class: String,
    pub arguments: Vec<Value>,
    pub queue_name: String,
    pub priority: Option<i32>,
    pub enabled: bool,
}

/// Expands the shorthand nicknames spec §4.7 requires on top of the
/// standard 5-field grammar, which `croner` doesn't recognize on its own.
fn expand_nickname(expr: &str) -> &str {
    match expr.trim() {
        "@yearly" | "@annually" => "0 0 1 1 *",
        "@monthly" => "0 0 1 * *",
        "@weekly" => "0 0 * * 0",
        "@daily" | "@midnight" => "0 0 * * *",
        "@hourly" => "0 * * * *",
        // @reboot has no periodic firing time; callers handle it by
        // running the entry once at process startup instead of through
        // the tick loop.
        other => other,
    }
}

pub struct CronManager {
    jobs: JobsRepo,
    entries: Vec<CronEntry>,
    tick_interval: Duration,
}

impl CronManager {
    pub fn new(jobs: JobsRepo, entries: Vec<CronEntry>) -> Self {
        Self {
            jobs,
            entries,
            tick_interval: Duration::from_secs(60),
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub async fn run(&self) {
        // @reboot entries fire once, here, before the periodic loop starts.
        for entry in self.entries.iter().filter(|e| e.enabled && e.expression.trim() == "@reboot") {
            if let Err(e) = self.fire(entry, Utc::now()).await {
                error!(cron_key = %entry.key, error = %e, "@reboot cron firing failed");
            }
        }

        let mut ticker = tokio::time::interval(self.tick_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!(error = %e, "cron tick failed");
            }
        }
    }

    pub async fn tick(&self) -> Result<()> {
        let now = Utc::now();
        let window_end = now + chrono::Duration::from_std(self.tick_interval).unwrap_or_default();

        let parser = CronParser::builder().seconds(Seconds::Optional).build();

        for entry in self.entries.iter().filter(|e| e.enabled && e.expression.trim() != "@reboot") {
            let expanded = expand_nickname(&entry.expression);
            let schedule = match parser.parse(expanded) {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!(cron_key = %entry.key, expression = %entry.expression, error = %e, "invalid cron expression, skipping");
                    continue;
                }
            };

            let Some(next) = CronIterator::new(schedule, now, false, Direction::Forward).next() else {
                continue;
            };

            if next >= now && next < window_end {
                if let Err(e) = self.fire(entry, next).await {
                    error!(cron_key = %entry.key, error = %e, "cron firing failed");
                }
            }
        }

        Ok(())
    }

    async fn fire(&self, entry: &CronEntry, firing_time: chrono::DateTime<Utc>) -> Result<()> {
        let job_id = uuid::Uuid::new_v4();
        let payload = serde_json::json!({
            "job_class": entry.job_class,
            "job_id": job_id,
            "queue_name": entry.queue_name,
            "priority": entry.priority,
            "arguments": entry.arguments,
            "executions": 0,
        });

        let mut job = NewJob::new(&entry.job_class, &entry.queue_name, payload);
        job.priority = entry.priority;
        job.cron_key = Some(entry.key.clone());
        job.cron_at = Some(firing_time);

        match self.jobs.enqueue_cron(job).await? {
            Some(_) => info!(cron_key = %entry.key, at = %firing_time, "cron fired"),
            None => info!(cron_key = %entry.key, at = %firing_time, "cron firing deduplicated"),
        }

        Ok(())
    }
}

/// Parsed representation of a raw `key -> expression` map, useful for
/// configuring cron entries from a flat config file or env var.
pub fn entries_from_map(
    specs: HashMap<String, (String, String, String)>,
) -> Vec<CronEntry> {
    specs
        .into_iter()
        .map(|(key, (expression, job_class, queue_name))| CronEntry {
            key,
            expression,
            job_class,
            arguments: Vec::new(),
            queue_name,
            priority: None,
            enabled: true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_known_nicknames() {
        assert_eq!(expand_nickname("@hourly"), "0 * * * *");
        assert_eq!(expand_nickname("@daily"), "0 0 * * *");
        assert_eq!(expand_nickname("@weekly"), "0 0 * * 0");
        assert_eq!(expand_nickname("@monthly"), "0 0 1 * *");
        assert_eq!(expand_nickname("@yearly"), "0 0 1 1 *");
    }

    #[test]
    fn passes_through_standard_expressions() {
        assert_eq!(expand_nickname("*/5 * * * *"), "*/5 * * * *");
    }
}
