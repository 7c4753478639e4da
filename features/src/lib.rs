//! Feature pipelines: the analysis domains of the server.
//!
//! Five independent features (modules, variables, config tests,
//! policy, policy tests) share one generic pipeline engine. Each runs
//! the same parse → metadata → references → validation chain over its
//! own record store, triggered by lifecycle events from the bus and
//! executed as jobs on the shared schedulers.

pub mod api;
pub mod engine;

pub mod modules;
pub mod policy;
pub mod variables;

mod notifier;

#[cfg(test)]
mod testing;

pub use api::{DiagnosticsSink, ParseOutcome, ParsedFiles, ReadOnlyFs, SchemaDecoder, StdFs};
pub use engine::feature::Feature;
pub use engine::pipeline::{FeatureDefinition, Pipeline};
pub use engine::record::FeatureRecord;
pub use engine::store::FeatureStore;
pub use notifier::Notifier;

use std::sync::Arc;

use tokio::sync::watch;

use strata_bus::EventBus;
use strata_scheduler::{JobPriority, Scheduler};
use strata_state::{JobStore, StateStore};
use strata_types::Options;

/// The five features plus their shared runtime: two schedulers (one per
/// priority class) and the change notifier.
pub struct FeatureSet {
    modules: Arc<FeatureStore>,
    variables: Arc<FeatureStore>,
    config_tests: Arc<FeatureStore>,
    policy: Arc<FeatureStore>,
    policy_tests: Arc<FeatureStore>,
    features: Vec<Feature>,
    high: Scheduler<JobStore>,
    low: Scheduler<JobStore>,
    notifier: Notifier,
    cancel_tx: watch::Sender<bool>,
}

impl FeatureSet {
    /// Wire every feature to the bus and start the schedulers and the
    /// notifier.
    pub async fn start(
        state: &StateStore,
        bus: &EventBus,
        fs: Arc<dyn ReadOnlyFs>,
        decoder: Arc<dyn SchemaDecoder>,
        sink: Arc<dyn DiagnosticsSink>,
        options: Options,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let jobs = Arc::clone(state.jobs());
        let documents = Arc::clone(state.documents());
        let changes = Arc::clone(state.changes());

        let store = |name| {
            Arc::new(FeatureStore::new(
                name,
                Arc::clone(&jobs),
                Arc::clone(&changes),
            ))
        };
        let modules = store("modules");
        let variables = store("variables");
        let config_tests = store("config-tests");
        let policy = store("policy");
        let policy_tests = store("policy-tests");

        let pipeline = |def, feature_store: &Arc<FeatureStore>, schema_store| {
            Pipeline::new(
                def,
                Arc::clone(feature_store),
                Arc::clone(&jobs),
                Arc::clone(&documents),
                Arc::clone(&fs),
                Arc::clone(&decoder),
                schema_store,
                options,
            )
        };
        let pipelines = [
            pipeline(modules::definition(), &modules, None),
            pipeline(
                variables::definition(),
                &variables,
                Some(Arc::clone(&modules)),
            ),
            pipeline(
                config_tests::definition(),
                &config_tests,
                Some(Arc::clone(&modules)),
            ),
            pipeline(policy::definition(), &policy, None),
            pipeline(
                policy_tests::definition(),
                &policy_tests,
                Some(Arc::clone(&policy)),
            ),
        ];

        let mut features = Vec::with_capacity(pipelines.len());
        for p in pipelines {
            features.push(Feature::start(p, bus, cancel_rx.clone()).await);
        }

        let parallelism = options
            .parallelism
            .unwrap_or_else(Scheduler::<JobStore>::default_parallelism);
        let mut high = Scheduler::new(Arc::clone(&jobs), parallelism, JobPriority::High);
        high.start();
        let mut low = Scheduler::new(Arc::clone(&jobs), 1, JobPriority::Low);
        low.start();

        let notifier = Notifier::start(
            changes,
            vec![
                Arc::clone(&modules),
                Arc::clone(&variables),
                Arc::clone(&config_tests),
                Arc::clone(&policy),
                Arc::clone(&policy_tests),
            ],
            sink,
            cancel_rx,
        );

        Self {
            modules,
            variables,
            config_tests,
            policy,
            policy_tests,
            features,
            high,
            low,
            notifier,
            cancel_tx,
        }
    }

    #[must_use]
    pub fn modules(&self) -> &Arc<FeatureStore> {
        &self.modules
    }

    #[must_use]
    pub fn variables(&self) -> &Arc<FeatureStore> {
        &self.variables
    }

    #[must_use]
    pub fn config_tests(&self) -> &Arc<FeatureStore> {
        &self.config_tests
    }

    #[must_use]
    pub fn policy(&self) -> &Arc<FeatureStore> {
        &self.policy
    }

    #[must_use]
    pub fn policy_tests(&self) -> &Arc<FeatureStore> {
        &self.policy_tests
    }

    /// Stop dispatch loops, schedulers, and the notifier, and wait for
    /// all of them to exit. Jobs already executing run to completion.
    pub async fn shutdown(self) {
        let _ = self.cancel_tx.send(true);
        for feature in self.features {
            feature.join().await;
        }
        self.high.shutdown().await;
        self.low.shutdown().await;
        self.notifier.join().await;
    }
}
