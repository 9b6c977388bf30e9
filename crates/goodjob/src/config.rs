// Config is a central place for runtime configuration. It loads values from
// environment variables (with a PGFLOW_-prefixed legacy fallback so existing
// deployments don't break) and gives you a typed, validated struct instead
// of raw strings everywhere.

use std::time::Duration;

/// How job execution is dispatched, per the `execution_mode` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run synchronously in the caller that enqueued the job.
    Inline,
    /// Run in worker tasks within the hosting process.
    AsyncInServer,
    /// Run in worker tasks in any process that has the handler registered.
    AsyncAnywhere,
    /// Enqueue only; some other process performs the job.
    External,
}

impl ExecutionMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "inline" => Some(Self::Inline),
            "async_in_server" => Some(Self::AsyncInServer),
            "async_anywhere" => Some(Self::AsyncAnywhere),
            "external" => Some(Self::External),
            _ => None,
        }
    }
}

/// One queue group, as parsed from a `queues` specifier string:
/// `name[:concurrency]`, optionally prefixed `+` (ordered) or `-` (excluded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueGroup {
    pub name: String,
    pub concurrency: Option<usize>,
    pub ordered: bool,
    pub excluded: bool,
}

/// A parsed `queues` specifier: either "all queues" (`*`) or an explicit
/// set of queue groups, organized into semicolon-separated pools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueSpec {
    All,
    Pools(Vec<Vec<QueueGroup>>),
}

impl QueueSpec {
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if spec.is_empty() || spec == "*" {
            return QueueSpec::All;
        }

        let pools = spec
            .split(';')
            .map(|pool| {
                pool.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(parse_queue_group)
                    .collect::<Vec<_>>()
            })
            .filter(|pool: &Vec<QueueGroup>| !pool.is_empty())
            .collect();

        QueueSpec::Pools(pools)
    }

    /// Flat list of every non-excluded queue name referenced. Used by
    /// components (e.g. the pruner) that need "every queue this process
    /// cares about" rather than pool structure.
    pub fn queue_names(&self) -> Vec<String> {
        match self {
            QueueSpec::All => Vec::new(),
            QueueSpec::Pools(pools) => pools
                .iter()
                .flatten()
                .filter(|g| !g.excluded)
                .map(|g| g.name.clone())
                .collect(),
        }
    }
}

fn parse_queue_group(raw: &str) -> QueueGroup {
    let mut raw = raw.trim();
    let mut ordered = false;
    let mut excluded = false;

    if let Some(rest) = raw.strip_prefix('+') {
        ordered = true;
        raw = rest;
    } else if let Some(rest) = raw.strip_prefix('-') {
        excluded = true;
        raw = rest;
    }

    let (name, concurrency) = match raw.split_once(':') {
        Some((n, c)) => (n.to_string(), c.parse().ok()),
        None => (raw.to_string(), None),
    };

    QueueGroup {
        name,
        concurrency,
        ordered,
        excluded,
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    /// Stable-for-this-process identity stamped into `locked_by_id`.
    /// Regenerated on every process start; cooperating processes never
    /// need to agree on its value, only that it is unique while the
    /// process is alive.
    pub process_id: uuid::Uuid,

    pub queues: QueueSpec,
    pub max_processes: usize,
    pub poll_interval: Duration,
    pub enable_listen_notify: bool,
    pub enable_cron: bool,

    pub cleanup_interval: Duration,
    pub cleanup_preserved_jobs_before: Duration,
    pub lifeline_rescue_after: Duration,

    pub shutdown_timeout: Duration,
    pub max_attempts: i32,

    pub execution_mode: ExecutionMode,
    pub migrate_on_startup: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_id = env_or_fallback("GOOD_JOB_WORKER_ID", "PGFLOW_WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()));

        let queues = QueueSpec::parse(
            &env_or_fallback("GOOD_JOB_QUEUES", "PGFLOW_QUEUE").unwrap_or_else(|| "*".to_string()),
        );

        let max_processes = env_or_fallback("GOOD_JOB_MAX_PROCESSES", "MAX_PROCESSES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let poll_interval = Duration::from_secs(
            env_or_fallback("GOOD_JOB_POLL_INTERVAL", "PGFLOW_LEASE_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        );

        let enable_listen_notify = env_bool("GOOD_JOB_ENABLE_LISTEN_NOTIFY").unwrap_or(true);
        let enable_cron = env_bool("GOOD_JOB_ENABLE_CRON").unwrap_or(false);

        let cleanup_interval = Duration::from_secs(
            env_or_fallback(
                "GOOD_JOB_CLEANUP_INTERVAL_SECONDS",
                "CLEANUP_INTERVAL_SECONDS",
            )
            .and_then(|s| s.parse().ok())
            .unwrap_or(600),
        );

        let cleanup_preserved_jobs_before = Duration::from_secs(
            env_or_fallback(
                "GOOD_JOB_CLEANUP_PRESERVED_JOBS_BEFORE_SECONDS_AGO",
                "CLEANUP_PRESERVED_JOBS_BEFORE_SECONDS_AGO",
            )
            .and_then(|s| s.parse().ok())
            .unwrap_or(14 * 24 * 3600),
        );

        let lifeline_rescue_after = Duration::from_secs(
            env_or_fallback(
                "GOOD_JOB_LIFELINE_RESCUE_AFTER_SECONDS",
                "LIFELINE_RESCUE_AFTER_SECONDS",
            )
            .and_then(|s| s.parse().ok())
            .unwrap_or(5 * 60),
        );

        let shutdown_timeout = Duration::from_secs(
            env_or_fallback("GOOD_JOB_SHUTDOWN_TIMEOUT", "SHUTDOWN_TIMEOUT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(25),
        );

        let max_attempts = env_or_fallback("GOOD_JOB_MAX_ATTEMPTS", "MAX_ATTEMPTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let execution_mode = env_or_fallback("GOOD_JOB_EXECUTION_MODE", "EXECUTION_MODE")
            .as_deref()
            .and_then(ExecutionMode::from_str)
            .unwrap_or(ExecutionMode::AsyncInServer);

        let migrate_on_startup = env_bool("GOOD_JOB_MIGRATE_ON_STARTUP")
            .or_else(|| env_bool("PGFLOW_MIGRATE_ON_STARTUP"))
            .unwrap_or(false);

        Ok(Self {
            database_url,
            worker_id,
            process_id: uuid::Uuid::new_v4(),
            queues,
            max_processes,
            poll_interval,
            enable_listen_notify,
            enable_cron,
            cleanup_interval,
            cleanup_preserved_jobs_before,
            lifeline_rescue_after,
            shutdown_timeout,
            max_attempts,
            execution_mode,
            migrate_on_startup,
        })
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_queues() {
        assert_eq!(QueueSpec::parse("*"), QueueSpec::All);
        assert_eq!(QueueSpec::parse(""), QueueSpec::All);
    }

    #[test]
    fn parses_single_pool_with_concurrency() {
        let spec = QueueSpec::parse("default:5,mailers:2");
        match spec {
            QueueSpec::Pools(pools) => {
                assert_eq!(pools.len(), 1);
                assert_eq!(pools[0].len(), 2);
                assert_eq!(pools[0][0].name, "default");
                assert_eq!(pools[0][0].concurrency, Some(5));
                assert_eq!(pools[0][1].name, "mailers");
                assert_eq!(pools[0][1].concurrency, Some(2));
            }
            _ => panic!("expected Pools"),
        }
    }

    #[test]
    fn parses_multiple_pools_and_prefixes() {
        let spec = QueueSpec::parse("default;+priority:1;-slow");
        match spec {
            QueueSpec::Pools(pools) => {
                assert_eq!(pools.len(), 3);
                assert!(pools[1][0].ordered);
                assert!(pools[2][0].excluded);
            }
            _ => panic!("expected Pools"),
        }
    }

    #[test]
    fn queue_names_skips_excluded() {
        let spec = QueueSpec::parse("default,-slow");
        assert_eq!(spec.queue_names(), vec!["default".to_string()]);
    }
}
