//! Event bus with a static list of lifecycle topics.
//!
//! The editor-facing layer publishes document/directory lifecycle events
//! here; each feature subscribes once per topic and answers on a paired
//! completion channel with the job IDs it spawned. That completion
//! handshake is what makes "wait for everything this event triggered"
//! deterministic in tests and in chained commands.
//!
//! The bus performs no interpretation of payloads; relevance filtering
//! is entirely the subscriber's responsibility.

mod event;

pub use event::{
    DidChangeEvent, DidChangeWatchedEvent, DidOpenEvent, DiscoverEvent, FileChangeType,
};

use tokio::sync::{Mutex, mpsc};

use strata_scheduler::JobIds;

/// Capacity of every subscription and completion channel.
pub const CHANNEL_SIZE: usize = 10;

/// The fixed set of topics.
#[derive(Default)]
pub struct EventBus {
    discover: Topic<DiscoverEvent>,
    did_open: Topic<DidOpenEvent>,
    did_change: Topic<DidChangeEvent>,
    did_change_watched: Topic<DidChangeWatchedEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn discover(&self) -> &Topic<DiscoverEvent> {
        &self.discover
    }

    #[must_use]
    pub fn did_open(&self) -> &Topic<DidOpenEvent> {
        &self.did_open
    }

    #[must_use]
    pub fn did_change(&self) -> &Topic<DidChangeEvent> {
        &self.did_change
    }

    #[must_use]
    pub fn did_change_watched(&self) -> &Topic<DidChangeWatchedEvent> {
        &self.did_change_watched
    }
}

struct Subscriber<T> {
    channel: mpsc::Sender<T>,
    /// Paired completion channel: after handling an event the subscriber
    /// reports the job IDs it spawned. `None` for fire-and-forget
    /// subscribers.
    done_channel: Option<mpsc::Receiver<JobIds>>,
}

/// One subscription topic.
pub struct Topic<T> {
    subscribers: Mutex<Vec<Subscriber<T>>>,
}

impl<T> Default for Topic<T> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> Topic<T> {
    /// Add a subscriber. `done_channel` carries the subscriber's spawned
    /// job IDs back to the publisher, one message per delivered event.
    pub async fn subscribe(&self, done_channel: Option<mpsc::Receiver<JobIds>>) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(CHANNEL_SIZE);
        self.subscribers.lock().await.push(Subscriber {
            channel: tx,
            done_channel,
        });
        rx
    }

    /// Deliver `event` to every subscriber in registration order and
    /// collect the job IDs each one reports having spawned.
    pub async fn publish(&self, event: T) -> JobIds {
        let mut ids = JobIds::new();
        let mut subscribers = self.subscribers.lock().await;

        for subscriber in subscribers.iter_mut() {
            if subscriber.channel.send(event.clone()).await.is_err() {
                tracing::warn!("event subscriber dropped its receiver");
                continue;
            }
            if let Some(done) = &mut subscriber.done_channel {
                // Wait until the subscriber is done processing it.
                match done.recv().await {
                    Some(spawned) => ids.extend(spawned),
                    None => tracing::warn!("event subscriber dropped its completion channel"),
                }
            }
        }

        ids
    }
}
