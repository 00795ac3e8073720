//! Per-device locks serializing session creation and to-device sends.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use strata_shared::{DeviceId, UserId};

type DeviceKey = (UserId, DeviceId);

#[derive(Default, Clone)]
pub struct DeviceLocks {
    locks: Arc<Mutex<HashMap<DeviceKey, Arc<AsyncMutex<()>>>>>,
}

/// Guards held for a set of devices; dropping it releases them all.
pub struct DeviceGuards {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &DeviceKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // An entry only the map refers to is neither held nor awaited.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key.clone()).or_default().clone()
    }

    /// Acquire the locks of every device in `devices`. Locks are taken in
    /// sorted order, so overlapping callers cannot deadlock.
    pub async fn acquire<'a, I>(&self, devices: I) -> DeviceGuards
    where
        I: IntoIterator<Item = (&'a UserId, &'a DeviceId)>,
    {
        let sorted: BTreeSet<DeviceKey> = devices
            .into_iter()
            .map(|(u, d)| (u.clone(), d.clone()))
            .collect();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in &sorted {
            guards.push(self.lock_for(key).lock_owned().await);
        }
        DeviceGuards { _guards: guards }
    }
}
