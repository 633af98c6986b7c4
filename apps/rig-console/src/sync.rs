//! Keeps a context's durable collections in step with other contexts.
//!
//! Two observers feed the same reducer, [`ConsoleStore::apply_persisted`]:
//! storage-change notices from the bus, and a periodic re-read of durable
//! storage that also covers writers the bus cannot reach.

use std::sync::Arc;
use std::time::Duration;

use rig_bus::{decode_storage_change, ContextId, StorageChange, TOPIC_STORAGE_CHANGE};
use rig_store::ConsoleStore;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::scheduler::{spawn_loop, PollHandle, TeardownGuard};

/// A context ignores the notices it published itself.
pub fn is_foreign(change: &StorageChange, context: ContextId) -> bool {
    change.origin != context
}

/// Listens for storage-change notices and re-reads the changed key. When
/// the receiver falls behind, everything is re-read.
pub fn bus_observer(store: Arc<ConsoleStore>, guard: TeardownGuard) -> PollHandle {
    let mut changes = store.bus().subscribe(TOPIC_STORAGE_CHANGE);
    let context = store.context();
    let task = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(message) => {
                    let change = match decode_storage_change(&message) {
                        Ok(change) => change,
                        Err(err) => {
                            warn!(
                                target = "rig.sync",
                                error = %err,
                                "dropping malformed storage notice"
                            );
                            continue;
                        }
                    };
                    if !is_foreign(&change, context) {
                        continue;
                    }
                    debug!(
                        target = "rig.sync",
                        key = %change.key,
                        origin = %change.origin,
                        "foreign storage change"
                    );
                    if guard
                        .apply(|| store.reload(&[change.key.as_str()]))
                        .is_none()
                    {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target = "rig.sync", skipped, "storage notices lagged, re-reading all");
                    if guard.apply(|| store.reload_all()).is_none() {
                        break;
                    }
                }
                Err(RecvError::Closed) => {
                    debug!(target = "rig.sync", "storage notice channel closed");
                    break;
                }
            }
        }
    });
    PollHandle::new("sync-bus", task)
}

/// Re-reads every durable collection on a fixed cadence.
pub fn reread_loop(store: Arc<ConsoleStore>, guard: TeardownGuard, period: Duration) -> PollHandle {
    spawn_loop("sync-reread", period, move || {
        let store = store.clone();
        let guard = guard.clone();
        async move {
            if guard.apply(|| store.reload_all()) == Some(true) {
                debug!(target = "rig.sync", "re-read picked up a change");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_notices_are_not_foreign() {
        let mine = ContextId::new();
        let change = StorageChange {
            key: "cameraPositions".into(),
            origin: mine,
        };
        assert!(!is_foreign(&change, mine));
        assert!(is_foreign(&change, ContextId::new()));
    }
}
