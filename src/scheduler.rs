//! Background loop driving dispatch and the dispatch-timeout sweep.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::dispatch::Dispatcher;

/// Runs a dispatch pass on every tick and whenever it is notified.
pub struct Scheduler {
    dispatcher: Arc<Dispatcher>,
    notify: Arc<Notify>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(dispatcher: Arc<Dispatcher>, notify: Arc<Notify>, interval: Duration) -> Self {
        Self {
            dispatcher,
            notify,
            interval,
        }
    }

    /// One pass: expire starved requests, then hand out ready tasks.
    pub async fn tick(&self) {
        match self.dispatcher.expire_starved(Utc::now()).await {
            Ok(0) => {}
            Ok(n) => tracing::warn!("{} requests failed on dispatch timeout", n),
            Err(e) => tracing::error!("Dispatch timeout sweep failed: {}", e),
        }
        match self.dispatcher.dispatch_ready_tasks().await {
            Ok(report) if report.busy > 0 => {
                tracing::debug!("Dispatch pass skipped {} busy requests", report.busy);
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Dispatch pass failed: {}", e),
        }
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!("Scheduler started (interval {:?})", self.interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.notify.notified() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                        continue;
                    }
                }
                self.tick().await;
            }

            tracing::info!("Scheduler stopped");
        })
    }
}
