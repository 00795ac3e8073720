use std::collections::BTreeMap;

use tracing::{debug, warn};

use strata_net::Transport;
use strata_shared::constants::SIGNED_CURVE25519;
use strata_shared::keys::{KeysClaimRequest, OneTimeKey};
use strata_shared::{DeviceId, UserId};

use crate::error::{KeyExchangeError, Result};

#[derive(Debug, Default)]
pub struct ClaimedKeys {
    /// `(user, device) -> (key id, key)`
    pub keys: BTreeMap<(UserId, DeviceId), (String, OneTimeKey)>,
    /// Devices that were asked for but had no key left.
    pub exhausted: Vec<(UserId, DeviceId)>,
    pub failures: BTreeMap<String, serde_json::Value>,
}

/// Claim one signed one-time key per device.
///
/// Each claim consumes server inventory, so this is never retried here. An
/// answer without a single key is an error: [`KeyExchangeError::NoOneTimeKeys`]
/// when every device was simply exhausted, [`KeyExchangeError::PartialFailure`]
/// when servers failed.
pub async fn claim_one_time_keys(
    transport: &dyn Transport,
    devices: &[(UserId, DeviceId)],
    timeout_ms: Option<u64>,
) -> Result<ClaimedKeys> {
    let mut request = KeysClaimRequest {
        one_time_keys: BTreeMap::new(),
        timeout: timeout_ms,
    };
    for (user, device) in devices {
        request
            .one_time_keys
            .entry(user.to_string())
            .or_default()
            .insert(device.to_string(), SIGNED_CURVE25519.to_string());
    }

    let response = transport.claim_keys(&request).await?;

    let mut claimed = ClaimedKeys {
        failures: response.failures,
        ..Default::default()
    };
    for (user, device) in devices {
        let key = response
            .one_time_keys
            .get(user.as_str())
            .and_then(|d| d.get(device.as_str()))
            .and_then(|keys| {
                keys.iter()
                    .find(|(id, _)| id.starts_with(SIGNED_CURVE25519))
                    .or_else(|| keys.iter().next())
            });
        match key {
            Some((id, key)) => {
                claimed
                    .keys
                    .insert((user.clone(), device.clone()), (id.clone(), key.clone()));
            }
            None => claimed.exhausted.push((user.clone(), device.clone())),
        }
    }

    debug!(
        claimed = claimed.keys.len(),
        exhausted = claimed.exhausted.len(),
        "claimed one-time keys"
    );

    if claimed.keys.is_empty() && !devices.is_empty() {
        if claimed.failures.is_empty() {
            return Err(KeyExchangeError::NoOneTimeKeys(claimed.exhausted));
        }
        warn!(servers = ?claimed.failures.keys().collect::<Vec<_>>(), "claim failed");
        return Err(KeyExchangeError::PartialFailure {
            failures: claimed.failures,
        });
    }
    Ok(claimed)
}
