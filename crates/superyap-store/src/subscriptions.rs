use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use superyap_shared::StorePath;
use tokio::sync::mpsc;

use crate::store::{Snapshot, SubscriptionHandle, SubscriptionId};

struct Listener {
    path: StorePath,
    sender: mpsc::UnboundedSender<Snapshot>,
}

/// Listeners of one local tree, shared by every handle on it.
#[derive(Default)]
pub(crate) struct Registry {
    listeners: Mutex<HashMap<SubscriptionId, Listener>>,
}

impl Registry {
    pub fn register(
        self: &Arc<Self>,
        path: StorePath,
        sender: mpsc::UnboundedSender<Snapshot>,
    ) -> SubscriptionHandle {
        let id = SubscriptionId::next();
        self.lock().insert(
            id,
            Listener {
                path: path.clone(),
                sender,
            },
        );

        let registry = Arc::downgrade(self);
        SubscriptionHandle::new(id, path, move || {
            if let Some(registry) = registry.upgrade() {
                if registry.remove(id) {
                    tracing::debug!(subscription = %id, "subscription disposed");
                }
            }
        })
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Send a snapshot to every listener whose path overlaps `changed`.
    /// Listeners whose receiver is gone are dropped.
    pub fn notify<F>(&self, changed: &StorePath, value_at: F)
    where
        F: Fn(&StorePath) -> Option<serde_json::Value>,
    {
        let mut listeners = self.lock();
        listeners.retain(|id, listener| {
            if !listener.path.overlaps(changed) {
                return true;
            }
            let snapshot = Snapshot::new(*id, listener.path.clone(), value_at(&listener.path));
            listener.sender.send(snapshot).is_ok()
        });
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
