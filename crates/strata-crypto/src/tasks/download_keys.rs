use std::collections::BTreeMap;

use tracing::debug;

use strata_net::Transport;
use strata_shared::keys::{KeysQueryRequest, KeysQueryResponse};
use strata_shared::UserId;

use crate::error::Result;

/// Download every device of `users`. `token` is the sync token the caller
/// considers the keys current as of. Safe to repeat.
pub async fn download_device_keys(
    transport: &dyn Transport,
    users: &[UserId],
    token: Option<&str>,
) -> Result<KeysQueryResponse> {
    let request = KeysQueryRequest {
        device_keys: users
            .iter()
            .map(|u| (u.to_string(), Vec::new()))
            .collect::<BTreeMap<_, _>>(),
        token: token.map(str::to_string),
        timeout: None,
    };
    debug!(users = users.len(), token = ?token, "downloading device keys");
    Ok(transport.query_keys(&request).await?)
}
