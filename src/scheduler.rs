//! Periodic pass scheduler
//!
//! Each pass gets its own tokio task and its own interval. The first run
//! happens immediately at startup, then once per tick. Passes are not
//! synchronized with each other; a pass that overruns its interval delays
//! its next tick rather than bursting to catch up.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::passes::Pass;
use crate::stats::{PassStats, StatsReporter};

struct ScheduledPass {
    pass: Arc<dyn Pass>,
    interval: Duration,
}

pub struct Scheduler {
    passes: Vec<ScheduledPass>,
    reporter: StatsReporter,
}

impl Scheduler {
    pub fn new(reporter: StatsReporter) -> Self {
        Self {
            passes: Vec::new(),
            reporter,
        }
    }

    /// Register a pass on its own cadence
    pub fn add(&mut self, pass: Arc<dyn Pass>, interval: Duration) {
        self.passes.push(ScheduledPass { pass, interval });
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Spawn one task per pass
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = self
            .passes
            .into_iter()
            .map(|scheduled| {
                let reporter = self.reporter.clone();
                let shutdown = shutdown_rx.clone();
                tokio::spawn(run_periodic(scheduled, reporter, shutdown))
            })
            .collect();

        SchedulerHandle { shutdown_tx, tasks }
    }
}

async fn run_periodic(scheduled: ScheduledPass, reporter: StatsReporter, mut shutdown: watch::Receiver<bool>) {
    let ScheduledPass { pass, interval } = scheduled;
    info!("Scheduling {} pass every {:?}", pass.name(), interval);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        run_once(pass.as_ref(), &reporter).await;
    }

    info!("Stopped {} pass", pass.name());
}

/// Run a pass once and report its stats
pub async fn run_once(pass: &dyn Pass, reporter: &StatsReporter) -> PassStats {
    let stats = pass.run().await;
    reporter.report(&stats);
    stats
}

/// Stops the scheduled tasks
///
/// A pass already in progress runs to completion before its task exits.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub async fn shutdown(self) {
        // Receivers may already be gone if every task ended
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Pass task ended abnormally: {}", e);
            }
        }
    }
}
