//! Single-writer discipline per room: sync batches and pagination into the
//! same room never interleave their chunk mutations.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use strata_shared::RoomId;

#[derive(Default, Clone)]
pub struct RoomLocks {
    locks: Arc<Mutex<HashMap<RoomId, Arc<AsyncMutex<()>>>>>,
}

/// Held room locks; dropping releases them.
pub struct RoomGuards {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl RoomLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, room_id: &RoomId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // An entry only the map refers to is neither held nor awaited.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(room_id.clone()).or_default().clone()
    }

    pub async fn lock(&self, room_id: &RoomId) -> RoomGuards {
        self.lock_all([room_id]).await
    }

    /// Lock every room of a batch, in sorted order.
    pub async fn lock_all<'a, I>(&self, rooms: I) -> RoomGuards
    where
        I: IntoIterator<Item = &'a RoomId>,
    {
        let sorted: BTreeSet<&RoomId> = rooms.into_iter().collect();
        let mut guards = Vec::with_capacity(sorted.len());
        for room_id in sorted {
            guards.push(self.lock_for(room_id).lock_owned().await);
        }
        RoomGuards { _guards: guards }
    }
}
