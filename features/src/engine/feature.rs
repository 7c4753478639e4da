//! Per-feature dispatch loop.
//!
//! Each feature registers exactly once per topic and handles its events
//! on one dedicated task, answering every event on the paired
//! completion channel with the job IDs it spawned. Handlers run
//! sequentially per feature, so a feature never races itself over its
//! own store.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use strata_bus::{CHANNEL_SIZE, EventBus};
use strata_scheduler::{JobIds, SchedulerError};

use crate::engine::pipeline::Pipeline;

pub struct Feature {
    name: &'static str,
    worker: JoinHandle<()>,
}

impl Feature {
    /// Subscribe the pipeline to every topic and start its dispatch
    /// loop.
    pub async fn start(
        pipeline: Arc<Pipeline>,
        bus: &EventBus,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let (discover_done, discover_done_rx) = mpsc::channel(CHANNEL_SIZE);
        let mut discover_rx = bus.discover().subscribe(Some(discover_done_rx)).await;
        let (open_done, open_done_rx) = mpsc::channel(CHANNEL_SIZE);
        let mut open_rx = bus.did_open().subscribe(Some(open_done_rx)).await;
        let (change_done, change_done_rx) = mpsc::channel(CHANNEL_SIZE);
        let mut change_rx = bus.did_change().subscribe(Some(change_done_rx)).await;
        let (watched_done, watched_done_rx) = mpsc::channel(CHANNEL_SIZE);
        let mut watched_rx = bus.did_change_watched().subscribe(Some(watched_done_rx)).await;

        let name = pipeline.name();
        let mut cancel = cancel;
        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = discover_rx.recv() => {
                        let Some(event) = event else { break };
                        pipeline.discover(&event.dir, &event.files);
                        if discover_done.send(JobIds::new()).await.is_err() {
                            break;
                        }
                    }
                    event = open_rx.recv() => {
                        let Some(event) = event else { break };
                        let ids = log_handler_err(
                            name,
                            "didOpen",
                            Arc::clone(&pipeline).did_open(&event.dir, &event.language_id),
                        );
                        if open_done.send(ids).await.is_err() {
                            break;
                        }
                    }
                    event = change_rx.recv() => {
                        let Some(event) = event else { break };
                        let ids = log_handler_err(
                            name,
                            "didChange",
                            Arc::clone(&pipeline).did_change(&event.dir, &event.file, &event.language_id),
                        );
                        if change_done.send(ids).await.is_err() {
                            break;
                        }
                    }
                    event = watched_rx.recv() => {
                        let Some(event) = event else { break };
                        let ids = log_handler_err(
                            name,
                            "didChangeWatched",
                            Arc::clone(&pipeline).did_change_watched(&event),
                        );
                        if watched_done.send(ids).await.is_err() {
                            break;
                        }
                    }
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(feature = name, "dispatch loop stopped");
        });

        Self { name, worker }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for the dispatch loop to exit after cancellation.
    pub async fn join(self) {
        let _ = self.worker.await;
    }
}

fn log_handler_err(
    feature: &'static str,
    topic: &'static str,
    result: Result<JobIds, SchedulerError>,
) -> JobIds {
    match result {
        Ok(ids) => ids,
        Err(err) => {
            tracing::warn!(feature, topic, error = %err, "event handling failed");
            JobIds::new()
        }
    }
}
