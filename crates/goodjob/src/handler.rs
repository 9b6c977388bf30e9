//! Handler registry (spec §4.5 step 1 "resolve handler name through the
//! configured name-map"). Generalizes the closure-based registry the
//! worker binary used, plus an [`async_trait`]-based [`JobHandler`] trait
//! for callers who'd rather implement a type than write a boxed closure.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::jobs::Job;
use crate::payload::ArgumentValue;

pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Normalized outcome of one handler invocation (spec §4.5 step 4
/// "Normalize result"). `Other` covers any handler-specific value that
/// isn't one of the recognized shapes; it is treated as `Ok`.
#[derive(Debug)]
pub enum Outcome {
    Ok(serde_json::Value),
    Error(String),
    Cancel(String),
    Discard(String),
    Snooze(i64),
    Other(serde_json::Value),
}

/// Implement this for a job type, or use [`HandlerRegistry::register`]
/// with a boxed closure if a trait impl is more ceremony than the job is
/// worth.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn perform(&self, job: &Job, arguments: &[ArgumentValue]) -> Outcome;

    /// Called before `perform`; a non-ok return short-circuits execution
    /// and is treated as the execution's outcome (spec §4.5 step 2).
    async fn before_perform(&self, _job: &Job, _arguments: &[ArgumentValue]) -> Option<Outcome> {
        None
    }

    async fn after_perform(&self, _job: &Job, _outcome: &Outcome) {}

    async fn on_error(&self, _job: &Job, _outcome: &Outcome) {}
}

type ClosureHandler =
    dyn for<'a> Fn(&'a Job, &'a [ArgumentValue]) -> BoxFuture<'a, Outcome> + Send + Sync;

enum Dispatch {
    Trait(Arc<dyn JobHandler>),
    Closure(Arc<ClosureHandler>),
}

struct HandlerEntry {
    dispatch: Dispatch,
    semaphore: Option<Arc<Semaphore>>,
    timeout: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct HandlerOptions {
    max_concurrency: Option<usize>,
    timeout: Option<Duration>,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    pub fn timeout(mut self, dur: Duration) -> Self {
        self.timeout = Some(dur);
        self
    }
}

/// Maps a `job_class` name to the code that runs it. Unregistered classes
/// fail fetch-time resolution with a fatal (non-retryable) error per spec
/// §4.5 step 1.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&mut self, job_class: &str, handler: Arc<dyn JobHandler>) {
        self.register_with_options(job_class, handler, HandlerOptions::new());
    }

    pub fn register<F>(&mut self, job_class: &str, handler: F)
    where
        F: for<'a> Fn(&'a Job, &'a [ArgumentValue]) -> BoxFuture<'a, Outcome> + Send + Sync + 'static,
    {
        self.register_with_options(job_class, handler, HandlerOptions::new());
    }

    pub fn register_with_options<F>(&mut self, job_class: &str, handler: F, opts: HandlerOptions)
    where
        F: Into<DispatchInput>,
    {
        let semaphore = opts.max_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1))));
        self.handlers.insert(
            job_class.to_string(),
            HandlerEntry {
                dispatch: handler.into().0,
                semaphore,
                timeout: opts.timeout,
            },
        );
    }

    pub fn is_registered(&self, job_class: &str) -> bool {
        self.handlers.contains_key(job_class)
    }

    pub async fn run(&self, job_class: &str, job: &Job, arguments: &[ArgumentValue]) -> Option<Outcome> {
        let entry = self.handlers.get(job_class)?;

        let _permit = if let Some(sem) = &entry.semaphore {
            match sem.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => return Some(Outcome::Error("handler semaphore closed".to_string())),
            }
        } else {
            None
        };

        if let Dispatch::Trait(handler) = &entry.dispatch {
            if let Some(short_circuit) = handler.before_perform(job, arguments).await {
                return Some(short_circuit);
            }
        }

        let fut = dispatch(&entry.dispatch, job, arguments);
        let outcome = if let Some(dur) = entry.timeout {
            match tokio::time::timeout(dur, fut).await {
                Ok(outcome) => outcome,
                Err(_) => Outcome::Error(format!(
                    "job {} timed out after {}ms",
                    job.id,
                    dur.as_millis()
                )),
            }
        } else {
            fut.await
        };

        if let Dispatch::Trait(handler) = &entry.dispatch {
            handler.after_perform(job, &outcome).await;
            if !matches!(outcome, Outcome::Ok(_) | Outcome::Other(_)) {
                handler.on_error(job, &outcome).await;
            }
        }

        Some(outcome)
    }
}

fn dispatch<'a>(d: &'a Dispatch, job: &'a Job, arguments: &'a [ArgumentValue]) -> BoxFuture<'a, Outcome> {
    match d {
        Dispatch::Trait(handler) => Box::pin(async move { handler.perform(job, arguments).await }),
        Dispatch::Closure(f) => f(job, arguments),
    }
}

/// Glue so `register_with_options` accepts either a boxed closure or a
/// `Arc<dyn JobHandler>` without two near-identical method bodies.
pub struct DispatchInput(Dispatch);

impl From<Arc<dyn JobHandler>> for DispatchInput {
    fn from(value: Arc<dyn JobHandler>) -> Self {
        DispatchInput(Dispatch::Trait(value))
    }
}

impl<F> From<F> for DispatchInput
where
    F: for<'a> Fn(&'a Job, &'a [ArgumentValue]) -> BoxFuture<'a, Outcome> + Send + Sync + 'static,
{
    fn from(value: F) -> Self {
        DispatchInput(Dispatch::Closure(Arc::new(value)))
    }
}
