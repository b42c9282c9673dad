// Copyright The Tailscope Authors
// SPDX-License-Identifier: Apache-2.0

//! Snapshot publication: an atomic swap of the latest immutable view.

use arc_swap::ArcSwap;
use std::sync::Arc;

use tailscope_analysis::snapshot::Snapshot;

/// Creates a connected publisher/handle pair around one snapshot slot.
#[must_use]
pub fn snapshot_slot() -> (SnapshotPublisher, SnapshotHandle) {
    let slot = Arc::new(ArcSwap::from_pointee(Snapshot::default()));
    (
        SnapshotPublisher { slot: slot.clone() },
        SnapshotHandle { slot },
    )
}

/// Writer end: owned by the consumer task.
#[derive(Debug)]
pub struct SnapshotPublisher {
    slot: Arc<ArcSwap<Snapshot>>,
}

impl SnapshotPublisher {
    /// Publishes a new snapshot. Readers holding the previous value keep
    /// it alive; nobody blocks.
    pub fn publish(&self, snapshot: Snapshot) {
        self.slot.store(Arc::new(snapshot));
    }
}

/// Reader end: cheap to clone, hand one to every consumer of state.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    slot: Arc<ArcSwap<Snapshot>>,
}

impl SnapshotHandle {
    /// The latest published snapshot.
    #[must_use]
    pub fn load(&self) -> Arc<Snapshot> {
        self.slot.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_see_the_latest_publication() {
        let (publisher, handle) = snapshot_slot();
        assert_eq!(handle.load().ingestion.total_logs_ever, 0);

        let held = handle.load();
        let mut snapshot = Snapshot::default();
        snapshot.ingestion.total_logs_ever = 42;
        publisher.publish(snapshot);

        // The old value stays valid for holders; new loads see the update.
        assert_eq!(held.ingestion.total_logs_ever, 0);
        assert_eq!(handle.load().ingestion.total_logs_ever, 42);
    }
}
