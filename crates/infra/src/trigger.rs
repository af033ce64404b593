use std::io;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::ServiceError;
use crate::inbound::InboxSync;

/// A unit of periodic work (fetch, sync, sweep).
pub trait Workflow: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn run(&self) -> Result<(), ServiceError>;
}

impl Workflow for InboxSync {
    fn name(&self) -> &'static str {
        "inbox-sync"
    }

    fn run(&self) -> Result<(), ServiceError> {
        self.run_once().map(|_| ())
    }
}

/// Schedule for a [`Workflow`].
#[derive(Debug, Clone)]
pub struct IntervalTrigger {
    pub interval: Duration,
    /// Failed runs retried with backoff before waiting for the next tick.
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for IntervalTrigger {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            max_retries: 5,
            base_backoff: Duration::from_millis(250),
        }
    }
}

impl IntervalTrigger {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// Run `workflow` on its own thread: once at startup, then every
    /// `interval`, and whenever [`TriggerHandle::trigger`] is called.
    ///
    /// Failures are logged and retried with bounded exponential backoff;
    /// they never stop the loop.
    pub fn spawn<W: Workflow>(&self, workflow: Arc<W>) -> io::Result<TriggerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::sync_channel::<()>(1);

        let cfg = self.clone();
        let join = thread::Builder::new()
            .name(workflow.name().to_string())
            .spawn(move || trigger_loop(cfg, shutdown_rx, trigger_rx, workflow))?;

        Ok(TriggerHandle {
            shutdown: shutdown_tx,
            trigger: trigger_tx,
            join: Some(join),
        })
    }
}

/// Handle for a running trigger (shutdown + manual trigger).
#[derive(Debug)]
pub struct TriggerHandle {
    shutdown: mpsc::Sender<()>,
    trigger: mpsc::SyncSender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl TriggerHandle {
    /// Request a run now. Triggers are coalesced: if a run is already
    /// pending this is a no-op.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    /// Stop the loop and wait for the thread.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

fn trigger_loop<W: Workflow>(
    cfg: IntervalTrigger,
    shutdown_rx: mpsc::Receiver<()>,
    trigger_rx: mpsc::Receiver<()>,
    workflow: Arc<W>,
) {
    let name = workflow.name();
    info!(workflow = name, interval_secs = cfg.interval.as_secs(), "trigger started");

    let mut next_tick = Instant::now() + cfg.interval;
    let mut pending = true;
    let mut failures: u32 = 0;
    let mut backoff_until: Option<Instant> = None;

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let now = Instant::now();
        if now >= next_tick {
            pending = true;
            while next_tick <= now {
                next_tick += cfg.interval;
            }
        }

        while trigger_rx.try_recv().is_ok() {
            pending = true;
        }

        if let Some(until) = backoff_until {
            if Instant::now() < until {
                thread::sleep(Duration::from_millis(50).min(until.saturating_duration_since(Instant::now())));
                continue;
            }
            backoff_until = None;
        }

        if !pending {
            let sleep_for = next_tick
                .saturating_duration_since(Instant::now())
                .min(Duration::from_millis(250));
            thread::sleep(sleep_for);
            continue;
        }

        pending = false;
        match workflow.run() {
            Ok(()) => failures = 0,
            Err(err) => {
                failures += 1;
                warn!(workflow = name, attempt = failures, error = %err, "workflow run failed");
                if failures <= cfg.max_retries {
                    pending = true;
                    backoff_until = Some(Instant::now() + backoff(cfg.base_backoff, failures));
                } else {
                    failures = 0;
                }
            }
        }
    }

    info!(workflow = name, "trigger stopped");
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    // base * 2^(attempt-1), capped at 10s
    let pow = 1u32 << attempt.saturating_sub(1).min(10);
    let ms = base.as_millis().saturating_mul(pow as u128);
    Duration::from_millis(ms.min(10_000) as u64)
}
