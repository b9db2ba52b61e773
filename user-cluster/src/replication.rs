//! Replication hub run by the primary.
//!
//! The hub folds every mutation reported by a worker into its mirror and
//! pushes the whole mirror back to all workers, the reporting one included.
//! Events are handled one at a time, so the mirror follows a single linear
//! history no matter how the workers interleave.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    message::PrimaryToWorker,
    model::MutationEvent,
    outbox::{Delivery, DropReason, Outbox},
    store::UserStore,
};

pub struct ReplicationHub {
    mirror: UserStore,
    subscribers: Vec<Outbox<PrimaryToWorker>>,
}

impl ReplicationHub {
    pub fn new(subscribers: Vec<Outbox<PrimaryToWorker>>) -> Self {
        Self {
            mirror: UserStore::new(),
            subscribers,
        }
    }

    pub fn mirror(&self) -> &UserStore {
        &self.mirror
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Applies `event` to the mirror and offers the resulting snapshot to
    /// every subscriber. A subscriber whose pipe is gone is dropped for good.
    pub fn relay(&mut self, event: MutationEvent) {
        debug!(
            operation = ?event.operation,
            id = %event.record.id,
            "relaying mutation"
        );
        self.mirror.apply(&event);

        let users = self.mirror.snapshot();
        self.subscribers.retain(|outbox| {
            let delivery = outbox.offer(PrimaryToWorker::Snapshot {
                users: users.clone(),
            });
            if delivery == Delivery::Dropped(DropReason::Disconnected) {
                warn!(peer = outbox.peer(), "worker disconnected, removing it from replication");
                return false;
            }
            true
        });
    }

    /// Relays events until every sender is gone, then returns the hub.
    pub async fn run(mut self, mut events: mpsc::Receiver<MutationEvent>) -> Self {
        while let Some(event) = events.recv().await {
            self.relay(event);
        }
        info!(records = self.mirror.len(), "replication hub stopped");
        self
    }
}
