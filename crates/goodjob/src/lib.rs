//! A PostgreSQL-backed concurrent job queue. Producers enqueue jobs that
//! are durably stored in a single table, dispatched to worker pools across
//! one or many processes (including processes written in other languages,
//! via the wire-compatible payload format in [`payload`]), executed with
//! at-most-once semantics per successful run, retried on failure with
//! backoff, and optionally scheduled by cron expressions.

pub mod advisory_lock;
pub mod cleanup;
pub mod concurrency;
pub mod config;
pub mod cron;
pub mod db;
pub mod error;
pub mod executor;
pub mod fetch;
pub mod handler;
pub mod health;
pub mod install;
pub mod jobs;
pub mod notifier;
pub mod pause;
pub mod payload;
pub mod retry;
pub mod scheduler;
pub mod stats;

pub use config::Config;
pub use cron::{CronEntry, CronManager};
pub use error::{GoodJobError, Result};
pub use handler::{HandlerRegistry, JobHandler, Outcome};
pub use health::{health_check, Health};
pub use install::install;
pub use jobs::{Job, JobState, JobsRepo, NewJob};
pub use stats::{stats, Stats};

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::cleanup::{Lifeline, Pruner};
use crate::concurrency::ConcurrencyLimiter;
use crate::cron::{CronEntry, CronManager};
use crate::executor::Executor;
use crate::fetch::Fetcher;
use crate::jobs::ExecutionsRepo;
use crate::notifier::Notifier;
use crate::pause::PauseRegistry;
use crate::scheduler::Scheduler;

/// Top-level handle wiring config, store, fetcher, executor, and scheduler
/// together, for a caller that just wants "run the queue" without
/// assembling each component by hand.
pub struct GoodJob {
    pub config: Config,
    pub pool: sqlx::PgPool,
    pub jobs: JobsRepo,
    pub executions: ExecutionsRepo,
    pub pauses: Arc<PauseRegistry>,
    pub limiter: Arc<ConcurrencyLimiter>,
    pub handlers: Arc<HandlerRegistry>,
    notifier: Option<Notifier>,
    cron_entries: Vec<CronEntry>,
    shutdown: CancellationToken,
}

impl GoodJob {
    pub async fn connect(config: Config, handlers: Arc<HandlerRegistry>) -> anyhow::Result<Self> {
        let pool = db::make_pool(&config.database_url).await?;
        if config.migrate_on_startup {
            db::run_migrations(&pool).await?;
        }

        let jobs = JobsRepo::new(pool.clone());
        let executions = ExecutionsRepo::new(pool.clone());
        let pauses = Arc::new(PauseRegistry::new(pool.clone()));
        let limiter = Arc::new(ConcurrencyLimiter::new(pool.clone(), executions.clone()));

        let notifier = if config.enable_listen_notify {
            Some(Notifier::spawn(config.database_url.clone()))
        } else {
            None
        };

        Ok(Self {
            config,
            pool,
            jobs,
            executions,
            pauses,
            limiter,
            handlers,
            notifier,
            cron_entries: Vec::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Registers the cron table this process should drive (spec §4.7).
    /// A no-op until `run()` is called, and only ever started if
    /// `Config::enable_cron` is set.
    pub fn with_cron_entries(mut self, entries: Vec<CronEntry>) -> Self {
        self.cron_entries = entries;
        self
    }

    /// Run worker pools, the pruner, the lifeline sweep, and (if enabled)
    /// the cron manager until [`GoodJob::shutdown`] is called. Does not
    /// return until every in-flight job has finished or the shutdown
    /// drain timeout elapses.
    pub async fn run(&self) {
        let fetcher = Arc::new(Fetcher::new(
            self.pool.clone(),
            self.jobs.clone(),
            self.pauses.clone(),
            self.limiter.clone(),
            self.config.process_id,
        ));
        let executor = Arc::new(Executor::new(
            self.pool.clone(),
            self.handlers.clone(),
            self.executions.clone(),
            self.config.max_attempts,
            self.config.process_id,
        ));
        let scheduler = Scheduler::new(fetcher, executor, &self.config);

        let notify_rx: Option<broadcast::Receiver<_>> =
            self.notifier.as_ref().map(|n| n.subscribe());

        let pruner = Pruner::new(
            self.pool.clone(),
            self.config.cleanup_preserved_jobs_before,
            1_000,
        );
        let lifeline = Lifeline::new(self.pool.clone(), self.config.lifeline_rescue_after);
        let cleanup_interval = self.config.cleanup_interval;
        let cleanup_shutdown = self.shutdown.clone();
        let cleanup_task = tokio::spawn(async move {
            tokio::select! {
                _ = cleanup_shutdown.cancelled() => {}
                _ = pruner.run_forever(cleanup_interval) => {}
            }
        });
        let lifeline_shutdown = self.shutdown.clone();
        let lifeline_task = tokio::spawn(async move {
            tokio::select! {
                _ = lifeline_shutdown.cancelled() => {}
                _ = lifeline.run_forever(cleanup_interval) => {}
            }
        });

        let cron_task = if self.config.enable_cron && !self.cron_entries.is_empty() {
            let manager = CronManager::new(self.jobs.clone(), self.cron_entries.clone());
            let cron_shutdown = self.shutdown.clone();
            Some(tokio::spawn(async move {
                tokio::select! {
                    _ = cron_shutdown.cancelled() => {}
                    _ = manager.run() => {}
                }
            }))
        } else {
            None
        };

        scheduler
            .run(
                &self.config.queues,
                self.config.max_processes,
                notify_rx,
                self.shutdown.clone(),
            )
            .await;

        cleanup_task.abort();
        lifeline_task.abort();
        if let Some(task) = cron_task {
            task.abort();
        }
    }

    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
