use std::collections::{BTreeMap, BTreeSet, HashMap};

use superyap_store::{StoreError, SubscriptionHandle, SubscriptionId};

/// Outcome of [`SubscriptionSet::reconcile`].
#[derive(Debug)]
pub struct Reconciled<K> {
    pub added: Vec<K>,
    pub removed: Vec<K>,
    pub failed: Vec<(K, StoreError)>,
}

impl<K> Reconciled<K> {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.failed.is_empty()
    }
}

/// Live subscriptions keyed by the thing that owns them (a contact, say).
///
/// After every [`reconcile`](Self::reconcile) the set holds exactly one
/// handle per desired key. Handles of keys that dropped out are disposed
/// right away.
pub struct SubscriptionSet<K> {
    handles: BTreeMap<K, SubscriptionHandle>,
    owners: HashMap<SubscriptionId, K>,
}

impl<K: Ord + Clone> Default for SubscriptionSet<K> {
    fn default() -> Self {
        Self {
            handles: BTreeMap::new(),
            owners: HashMap::new(),
        }
    }
}

impl<K: Ord + Clone> SubscriptionSet<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconcile<I, F>(&mut self, desired: I, mut open: F) -> Reconciled<K>
    where
        I: IntoIterator<Item = K>,
        F: FnMut(&K) -> Result<SubscriptionHandle, StoreError>,
    {
        let desired: BTreeSet<K> = desired.into_iter().collect();

        let stale: Vec<K> = self
            .handles
            .keys()
            .filter(|key| !desired.contains(*key))
            .cloned()
            .collect();
        for key in &stale {
            if let Some(handle) = self.handles.remove(key) {
                self.owners.remove(&handle.id());
                handle.dispose();
            }
        }

        let mut added = Vec::new();
        let mut failed = Vec::new();
        for key in desired {
            if self.handles.contains_key(&key) {
                continue;
            }
            match open(&key) {
                Ok(handle) => {
                    self.owners.insert(handle.id(), key.clone());
                    self.handles.insert(key.clone(), handle);
                    added.push(key);
                }
                Err(e) => failed.push((key, e)),
            }
        }

        Reconciled {
            added,
            removed: stale,
            failed,
        }
    }

    /// Key that owns the subscription `id`, if it is still live.
    pub fn owner_of(&self, id: SubscriptionId) -> Option<&K> {
        self.owners.get(&id)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.handles.contains_key(key)
    }

    #[cfg(test)]
    pub fn id_of(&self, key: &K) -> Option<SubscriptionId> {
        self.handles.get(key).map(SubscriptionHandle::id)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.handles.keys()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Dispose every handle.
    pub fn clear(&mut self) {
        self.owners.clear();
        for (_, handle) in std::mem::take(&mut self.handles) {
            handle.dispose();
        }
    }
}
