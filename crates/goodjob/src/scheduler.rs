//! Scheduler/Supervisor (spec §4.3, §5 "Scheduling model"). Drives one
//! pool of worker tasks per configured queue group: each task loops
//! wait-for-wake → fetch-and-claim → execute → persist → release-lock →
//! repeat. Workers share a single task pool per group; there's no
//! per-queue thread.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, QueueGroup, QueueSpec};
use crate::executor::Executor;
use crate::fetch::Fetcher;
use crate::notifier::NotifyPayload;

/// Job ids currently being executed by some worker, shared across every
/// worker task in a run so the shutdown drain can interrupt whatever is
/// still in flight when its timeout fires.
type InFlight = Arc<Mutex<HashSet<Uuid>>>;

pub struct Scheduler {
    fetcher: Arc<Fetcher>,
    executor: Arc<Executor>,
    poll_interval: Duration,
    shutdown_timeout: Duration,
}

/// One worker-task pool's share of the overall run (spec §5 "the scheduler
/// owns one worker-task pool per queue group"). `queue_names` empty means
/// "any queue" — only `QueueSpec::All` produces that.
struct WorkerGroup {
    queue_names: Vec<String>,
    concurrency: usize,
}

impl Scheduler {
    pub fn new(fetcher: Arc<Fetcher>, executor: Arc<Executor>, config: &Config) -> Self {
        Self {
            fetcher,
            executor,
            poll_interval: config.poll_interval,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Run pools for every group in `queues` until `shutdown` fires, then
    /// wait up to `shutdown_timeout` for in-flight jobs before returning.
    pub async fn run(
        &self,
        queues: &QueueSpec,
        pool_size: usize,
        notify: Option<broadcast::Receiver<NotifyPayload>>,
        shutdown: CancellationToken,
    ) {
        let groups = worker_groups(queues, pool_size.max(1));
        let mut handles = Vec::new();
        let mut worker_idx = 0usize;
        let in_flight: InFlight = Arc::new(Mutex::new(HashSet::new()));

        for group in groups {
            let semaphore = Arc::new(Semaphore::new(group.concurrency.max(1)));

            for _ in 0..group.concurrency.max(1) {
                let fetcher = self.fetcher.clone();
                let executor = self.executor.clone();
                let queue_names = group.queue_names.clone();
                let semaphore = semaphore.clone();
                let poll_interval = self.poll_interval;
                let shutdown = shutdown.clone();
                let mut notify_rx = notify.as_ref().map(|r| r.resubscribe());
                let window = group.concurrency.max(1);
                let idx = worker_idx;
                let in_flight = in_flight.clone();
                worker_idx += 1;

                handles.push(tokio::spawn(async move {
                    worker_loop(
                        idx,
                        fetcher,
                        executor,
                        queue_names,
                        semaphore,
                        window,
                        poll_interval,
                        &mut notify_rx,
                        shutdown,
                        in_flight,
                    )
                    .await;
                }));
            }
        }

        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            let stuck: Vec<Uuid> = in_flight.lock().unwrap().iter().copied().collect();
            warn!(
                timeout_secs = self.shutdown_timeout.as_secs(),
                in_flight = stuck.len(),
                "shutdown drain timed out; interrupting jobs still in flight"
            );
            for job_id in stuck {
                if let Err(e) = self.executor.interrupt(job_id).await {
                    warn!(job_id = %job_id, error = %e, "failed to interrupt in-flight job on shutdown");
                }
            }
        }

        info!("scheduler drained");
    }
}

/// Flattens a parsed `queues` specifier (spec §6.4) into one worker group per
/// queue group, honoring each group's own `concurrency` and treating an
/// `ordered` group as single-worker so its jobs can never run out of order
/// against each other. Groups prefixed `-` are excluded entirely. A bare
/// `*` (or empty spec) produces a single group spanning every queue, sized
/// to the process's overall `default_concurrency`.
fn worker_groups(queues: &QueueSpec, default_concurrency: usize) -> Vec<WorkerGroup> {
    match queues {
        QueueSpec::All => vec![WorkerGroup {
            queue_names: Vec::new(),
            concurrency: default_concurrency,
        }],
        QueueSpec::Pools(pools) => pools
            .iter()
            .flatten()
            .filter(|g: &&QueueGroup| !g.excluded)
            .map(|g| WorkerGroup {
                queue_names: vec![g.name.clone()],
                concurrency: if g.ordered {
                    1
                } else {
                    g.concurrency.unwrap_or(default_concurrency)
                },
            })
            .collect(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_idx: usize,
    fetcher: Arc<Fetcher>,
    executor: Arc<Executor>,
    queue_names: Vec<String>,
    semaphore: Arc<Semaphore>,
    pool_size: usize,
    poll_interval: Duration,
    notify_rx: &mut Option<broadcast::Receiver<NotifyPayload>>,
    shutdown: CancellationToken,
    in_flight: InFlight,
) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let permit = semaphore.acquire().await;
        let Ok(_permit) = permit else { break };

        match fetcher.fetch_one(&queue_names, pool_size as i64).await {
            Ok(Some(claimed)) => {
                let job_id = claimed.job.id;
                in_flight.lock().unwrap().insert(job_id);
                if let Err(e) = executor.execute(claimed).await {
                    warn!(worker = worker_idx, error = %e, "execution failed");
                }
                in_flight.lock().unwrap().remove(&job_id);
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(worker = worker_idx, error = %e, "fetch failed");
            }
        }
        drop(_permit);

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
            woke = wait_for_notify(notify_rx) => {
                if !woke {
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }
}

async fn wait_for_notify(notify_rx: &mut Option<broadcast::Receiver<NotifyPayload>>) -> bool {
    match notify_rx {
        Some(rx) => rx.recv().await.is_ok(),
        None => {
            // No notifier configured: block forever here so the poll-interval
            // branch of the outer `select!` is always the one that wins.
            std::future::pending::<()>().await;
            false
        }
    }
}
