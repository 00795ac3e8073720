//! Per-session record of verification transactions another of our devices
//! has taken over.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tracing::debug;

use strata_shared::constants::EVENT_VERIFICATION_PREFIX;
use strata_shared::{DeviceId, ToDeviceEvent, UserId};

const HANDOVER_STEPS: [&str; 3] = ["accept", "ready", "done"];

pub struct VerificationTracker {
    own_user: UserId,
    own_device: DeviceId,
    handled_elsewhere: Mutex<HashSet<String>>,
}

impl VerificationTracker {
    pub fn new(own_user: UserId, own_device: DeviceId) -> Self {
        Self {
            own_user,
            own_device,
            handled_elsewhere: Mutex::new(HashSet::new()),
        }
    }

    /// Inspect a (decrypted) to-device event. Returns whether it marked a
    /// transaction as handled by another of our devices.
    pub fn observe(&self, event: &ToDeviceEvent) -> bool {
        let Some(step) = event.clear_type().strip_prefix(EVENT_VERIFICATION_PREFIX) else {
            return false;
        };
        let content = event.clear_content();
        let Some(txn_id) = content.get("transaction_id").and_then(Value::as_str) else {
            return false;
        };

        if step == "cancel" {
            self.forget(txn_id);
            return false;
        }
        if !HANDOVER_STEPS.contains(&step) || event.sender != self.own_user {
            return false;
        }
        let from_device = content.get("from_device").and_then(Value::as_str);
        if from_device.map_or(true, |d| d == self.own_device.as_str()) {
            return false;
        }

        debug!(txn_id, step, "verification handled by another device");
        self.lock().insert(txn_id.to_string())
    }

    pub fn is_handled_elsewhere(&self, txn_id: &str) -> bool {
        self.lock().contains(txn_id)
    }

    pub fn forget(&self, txn_id: &str) {
        self.lock().remove(txn_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.handled_elsewhere
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
