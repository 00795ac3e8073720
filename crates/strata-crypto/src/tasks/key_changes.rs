use strata_net::Transport;
use strata_shared::keys::KeyChangesResponse;

use crate::error::Result;

/// Users whose device keys changed between two sync tokens. Read-only.
pub async fn get_key_changes(
    transport: &dyn Transport,
    from: &str,
    to: &str,
) -> Result<KeyChangesResponse> {
    Ok(transport.key_changes(from, to).await?)
}
