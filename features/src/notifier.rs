//! Change-batch drain: decides what to re-publish to the editor.
//!
//! Reads released batches from the change store and pushes the affected
//! directory's diagnostics to the sink. It works off the coarse flags
//! only; it never diffs diagnostic sets itself.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use strata_state::ChangeStore;
use strata_types::SourceDiagnostics;

use crate::api::DiagnosticsSink;
use crate::engine::store::FeatureStore;

pub struct Notifier {
    worker: JoinHandle<()>,
}

impl Notifier {
    /// One publication per feature store holding a record for the
    /// changed directory; the sink owns protocol-level merging.
    #[must_use]
    pub fn start(
        changes: Arc<ChangeStore>,
        stores: Vec<Arc<FeatureStore>>,
        sink: Arc<dyn DiagnosticsSink>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let worker = tokio::spawn(async move {
            loop {
                let batch = match changes.await_next_batch(cancel.clone()).await {
                    Ok(batch) => batch,
                    Err(_) => break,
                };

                if batch.changes.is_removal {
                    // Clear whatever was published for the directory.
                    sink.publish(&batch.dir, &SourceDiagnostics::default());
                    continue;
                }
                if !batch.changes.diagnostics {
                    continue;
                }
                for store in &stores {
                    if let Ok(record) = store.get(&batch.dir) {
                        sink.publish(&batch.dir, &record.diagnostics);
                    }
                }
            }
            tracing::debug!("notifier stopped");
        });
        Self { worker }
    }

    pub async fn join(self) {
        let _ = self.worker.await;
    }
}
