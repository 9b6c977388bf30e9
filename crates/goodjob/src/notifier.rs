//! LISTEN/NOTIFY notifier (spec §4.4). Owns a dedicated connection separate
//! from the application pool, fans incoming notifications out to
//! subscriber channels, and reconnects with capped exponential backoff if
//! the connection drops. Schedulers keep polling on their own interval
//! while disconnected, so this component only shortens dispatch latency —
//! it is never load-bearing for correctness.

use std::time::Duration;

use serde::Deserialize;
use sqlx::postgres::PgListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub const CHANNEL: &str = "good_job";

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyPayload {
    pub queue_name: String,
    #[serde(default)]
    pub scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<NotifyPayload>,
}

impl Notifier {
    /// Spawns the listener loop and returns a handle subscribers can use
    /// to receive a `NotifyPayload` each time a job is enqueued.
    pub fn spawn(database_url: String) -> Self {
        let (sender, _) = broadcast::channel(1024);
        let task_sender = sender.clone();

        tokio::spawn(async move {
            run_loop(database_url, task_sender).await;
        });

        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotifyPayload> {
        self.sender.subscribe()
    }
}

async fn run_loop(database_url: String, sender: broadcast::Sender<NotifyPayload>) {
    let mut backoff = Duration::from_millis(200);
    const MAX_BACKOFF: Duration = Duration::from_secs(30);

    loop {
        match PgListener::connect(&database_url).await {
            Ok(mut listener) => {
                if let Err(e) = listener.listen(CHANNEL).await {
                    warn!(error = %e, "failed to LISTEN on {CHANNEL}, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }

                info!("notifier connected, listening on {CHANNEL}");
                backoff = Duration::from_millis(200);

                loop {
                    tokio::select! {
                        notification = listener.recv() => {
                            match notification {
                                Ok(notification) => {
                                    match serde_json::from_str::<NotifyPayload>(notification.payload()) {
                                        Ok(payload) => {
                                            debug!(queue = %payload.queue_name, "notify received");
                                            let _ = sender.send(payload);
                                        }
                                        Err(e) => {
                                            warn!(error = %e, "malformed notify payload, ignoring");
                                        }
                                    }
                                }
                                Err(e) => {
                                    error!(error = %e, "notifier connection lost, reconnecting");
                                    break;
                                }
                            }
                        }
                        _ = tokio::time::sleep(Duration::from_secs(30)) => {
                            // Keepalive: a lapsed connection surfaces on the next recv().
                            debug!("notifier keepalive tick");
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, delay = ?backoff, "notifier failed to connect, retrying");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_payload_parses_minimal_json() {
        let payload: NotifyPayload = serde_json::from_str(r#"{"queue_name":"default"}"#).unwrap();
        assert_eq!(payload.queue_name, "default");
        assert!(payload.scheduled_at.is_none());
    }
}
