//! Throughput governor — global admission control for backend calls.
//!
//! Every execution task funnels through an [`Admitter`]. The
//! rate-limited implementation owns a FIFO queue and starts tasks in
//! strict submission order, pacing starts against a rolling window
//! (default 5 per second) and capping in-flight tasks (default 1).
//! A whole evaluation run is admitted as one task, so a single
//! submission can never fragment into many competing queue entries.
//!
//! If the governor cannot be set up, admission degrades to direct
//! unthrottled execution instead of failing startup.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::GovernorConfig;

/// A deferred unit of work. The governor owns the task until it
/// completes; its result travels back to the submitter on a channel
/// captured inside the closure.
pub type QueueTask = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// The admitted task can no longer produce a result — the queue shut
/// down or the task was dropped before running.
#[derive(Debug, Error)]
#[error("admission queue dropped the task")]
pub struct QueueClosed;

/// Admission strategy. Selected once at startup.
#[async_trait]
pub trait Admitter: Send + Sync {
    /// Hands a task to the admission queue. Returns an error only when
    /// the queue itself can no longer accept work; the task's own
    /// outcome is delivered through whatever channel it captured.
    async fn submit(&self, task: QueueTask) -> Result<(), QueueClosed>;

    /// Short label for status output.
    fn description(&self) -> &'static str;
}

/// Admits `task` and waits for its result.
///
/// The closure runs inside the governor's concurrency slot; its output
/// (including any error it returns) comes back to this caller only.
/// One task failing never affects the processing of later tasks.
pub async fn admit<T, F, Fut>(admitter: &dyn Admitter, task: F) -> Result<T, QueueClosed>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    admitter
        .submit(Box::new(move || {
            Box::pin(async move {
                let _ = tx.send(task().await);
            })
        }))
        .await?;
    rx.await.map_err(|_| QueueClosed)
}

/// Builds the admitter selected by config, falling back to direct
/// execution when the governor cannot be initialized.
pub fn from_config(config: &GovernorConfig) -> Arc<dyn Admitter> {
    if !config.enabled {
        warn!("admission control disabled, executing submissions unthrottled");
        return Arc::new(PassthroughAdmitter);
    }
    match RateLimitedAdmitter::new(config) {
        Ok(admitter) => Arc::new(admitter),
        Err(e) => {
            warn!("governor initialization failed ({e}), falling back to direct execution");
            Arc::new(PassthroughAdmitter)
        }
    }
}

// ── RateLimitedAdmitter ──────────────────────────────────

pub struct RateLimitedAdmitter {
    queue: mpsc::UnboundedSender<QueueTask>,
}

impl RateLimitedAdmitter {
    pub fn new(config: &GovernorConfig) -> anyhow::Result<Self> {
        if config.concurrency == 0 {
            anyhow::bail!("governor concurrency must be at least 1");
        }
        if config.max_starts_per_window == 0 || config.window_ms == 0 {
            anyhow::bail!("governor rate window must allow at least one start");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_loop(
            rx,
            config.concurrency,
            config.max_starts_per_window,
            config.window(),
        ));
        Ok(Self { queue: tx })
    }
}

#[async_trait]
impl Admitter for RateLimitedAdmitter {
    async fn submit(&self, task: QueueTask) -> Result<(), QueueClosed> {
        self.queue.send(task).map_err(|_| QueueClosed)
    }

    fn description(&self) -> &'static str {
        "rate-limited"
    }
}

/// Dispatch loop — sole owner of the rate window and concurrency
/// slots; no other component touches them.
async fn dispatch_loop(
    mut queue: mpsc::UnboundedReceiver<QueueTask>,
    concurrency: usize,
    max_starts: usize,
    window: Duration,
) {
    let slots = Arc::new(Semaphore::new(concurrency));
    let mut recent_starts: VecDeque<Instant> = VecDeque::with_capacity(max_starts);

    while let Some(task) = queue.recv().await {
        // Pace starts against the rolling window.
        loop {
            let now = Instant::now();
            while recent_starts
                .front()
                .is_some_and(|t| now.duration_since(*t) >= window)
            {
                recent_starts.pop_front();
            }
            if recent_starts.len() < max_starts {
                break;
            }
            // Window full: sleep until its oldest start expires.
            let Some(oldest) = recent_starts.front() else {
                break;
            };
            tokio::time::sleep_until(*oldest + window).await;
        }

        // Waiting for a slot keeps starts in strict submission order.
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };

        recent_starts.push_back(Instant::now());
        debug!("admitting task ({} start(s) in window)", recent_starts.len());
        tokio::spawn(async move {
            task().await;
            drop(permit);
        });
    }
}

// ── PassthroughAdmitter ──────────────────────────────────

/// Degraded mode: every task runs immediately, no queueing, no pacing.
pub struct PassthroughAdmitter;

#[async_trait]
impl Admitter for PassthroughAdmitter {
    async fn submit(&self, task: QueueTask) -> Result<(), QueueClosed> {
        tokio::spawn(task());
        Ok(())
    }

    fn description(&self) -> &'static str {
        "direct"
    }
}
